//! Paging of ledger iterators into bounded query responses.

use chaincode_protocol::QueryResponse;

use crate::{
    config::Config,
    error::HandlerError,
    handler::QueryResponseBuilder,
    ledger::QueryIterator,
    transaction_context::TransactionContext,
};

/// Builds [`QueryResponse`] pages of at most `max_result_limit` rows.
///
/// Rows accumulate in the transaction context's pending buffer for the
/// query id; a page is cut either when the iterator is exhausted
/// (`has_more: false`, query context released) or when the buffer reaches
/// the limit (`has_more: true`, iterator kept for QUERY_STATE_NEXT). Any
/// failure releases the query context before returning.
#[derive(Clone, Copy, Debug)]
pub struct QueryResponseGenerator {
    pub max_result_limit: usize,
}

impl QueryResponseGenerator {
    pub fn new(config: &Config) -> Self {
        QueryResponseGenerator {
            max_result_limit: config.max_query_result_limit,
        }
    }
}

impl QueryResponseBuilder for QueryResponseGenerator {
    fn build_query_response(
        &self,
        tx_context: &TransactionContext,
        iterator: &QueryIterator,
        query_id: &str,
    ) -> Result<Option<QueryResponse>, HandlerError> {
        let pending = tx_context
            .get_pending_query_result(query_id)
            .ok_or(HandlerError::QueryIteratorNotFound)?;

        loop {
            // The row lock is released before any cleanup call below;
            // cleanup takes the same iterator lock to close it.
            let row = iterator.lock().expect("lock poisoned").next();

            match row {
                Err(err) => {
                    tx_context.cleanup_query_context(query_id);
                    return Err(err.into());
                }

                Ok(None) => {
                    let batch = pending.lock().expect("lock poisoned").cut();
                    tx_context.cleanup_query_context(query_id);
                    return Ok(Some(QueryResponse {
                        results: batch,
                        has_more: false,
                        id: query_id.to_owned(),
                    }));
                }

                Ok(Some(row)) => {
                    let mut pending = pending.lock().expect("lock poisoned");
                    if pending.size() == self.max_result_limit {
                        let batch = pending.cut();
                        if let Err(err) = pending.add(&row) {
                            drop(pending);
                            tx_context.cleanup_query_context(query_id);
                            return Err(err);
                        }
                        return Ok(Some(QueryResponse {
                            results: batch,
                            has_more: true,
                            id: query_id.to_owned(),
                        }));
                    }
                    if let Err(err) = pending.add(&row) {
                        drop(pending);
                        tx_context.cleanup_query_context(query_id);
                        return Err(err);
                    }
                }
            }
        }
    }
}
