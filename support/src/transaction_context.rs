//! Per-transaction state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use chaincode_protocol::{
    marshal, ChaincodeMessage, Proposal, QueryResult, QueryResultBytes, SignedProposal,
};

use crate::{
    error::HandlerError,
    ledger::{HistoryQueryExecutor, QueryIterator, ResultsIterator, TxSimulator},
    runtime::ExecuteContext,
};

/// Result rows accumulated for an open query between response pages.
///
/// Rows are added as the iterator is drained and cut into bounded batches
/// by the response builder; a producer may add past the page limit, the
/// bound applies on emission.
#[derive(Debug, Default)]
pub struct PendingQueryResult {
    batch: Vec<QueryResultBytes>,
}

impl PendingQueryResult {
    /// Marshals a row and appends it to the pending batch.
    pub fn add(&mut self, result: &QueryResult) -> Result<(), HandlerError> {
        let result_bytes = marshal(Some(result)).map_err(HandlerError::Marshal)?;
        self.batch.push(QueryResultBytes { result_bytes });
        Ok(())
    }

    /// Takes the accumulated batch, leaving the buffer empty.
    pub fn cut(&mut self) -> Vec<QueryResultBytes> {
        std::mem::take(&mut self.batch)
    }

    pub fn size(&self) -> usize {
        self.batch.len()
    }
}

/// State for one in-flight (channel, txid).
///
/// Holds the ledger view the transaction simulates against, the
/// authorization material that arrived with the proposal, the one-shot
/// reply slot the execute driver waits on, and the table of open query
/// iterators. The context is the only closer of its iterators.
pub struct TransactionContext {
    chain_id: String,
    signed_proposal: Option<SignedProposal>,
    proposal: Option<Proposal>,
    tx_simulator: Option<Arc<dyn TxSimulator>>,
    history_query_executor: Option<Arc<dyn HistoryQueryExecutor>>,

    responder: mpsc::Sender<ChaincodeMessage>,
    response_rx: Mutex<Option<mpsc::Receiver<ChaincodeMessage>>>,

    query_iterators: Mutex<HashMap<String, QueryIterator>>,
    pending_results: Mutex<HashMap<String, Arc<Mutex<PendingQueryResult>>>>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("chain_id", &self.chain_id)
            .field("signed_proposal", &self.signed_proposal)
            .field("proposal", &self.proposal)
            .finish_non_exhaustive()
    }
}

impl TransactionContext {
    pub fn new(
        chain_id: impl Into<String>,
        signed_proposal: Option<SignedProposal>,
        proposal: Option<Proposal>,
        ctx: &ExecuteContext,
    ) -> Self {
        // Capacity 1: the protocol delivers at most one terminal response
        // per transaction.
        let (responder, response_rx) = mpsc::channel(1);
        TransactionContext {
            chain_id: chain_id.into(),
            signed_proposal,
            proposal,
            tx_simulator: ctx.tx_simulator.clone(),
            history_query_executor: ctx.history_query_executor.clone(),
            responder,
            response_rx: Mutex::new(Some(response_rx)),
            query_iterators: Mutex::new(HashMap::new()),
            pending_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn signed_proposal(&self) -> Option<&SignedProposal> {
        self.signed_proposal.as_ref()
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub fn tx_simulator(&self) -> Option<Arc<dyn TxSimulator>> {
        self.tx_simulator.clone()
    }

    pub fn history_query_executor(&self) -> Option<Arc<dyn HistoryQueryExecutor>> {
        self.history_query_executor.clone()
    }

    /// Delivers the chaincode's terminal message to the waiting driver.
    /// Signalled at most once per transaction; anything further (or a
    /// signal with no driver left) is dropped.
    pub fn notify(&self, msg: ChaincodeMessage) {
        if let Err(err) = self.responder.try_send(msg) {
            debug!(%err, "discarding transaction response, no waiter");
        }
    }

    /// Hands the reply slot's receiving side to the execute driver. There
    /// is exactly one; a second call returns `None`.
    pub fn take_response_receiver(&self) -> Option<mpsc::Receiver<ChaincodeMessage>> {
        self.response_rx.lock().expect("lock poisoned").take()
    }

    /// Records a fresh iterator and pending-result buffer for `query_id`.
    pub fn initialize_query_context(&self, query_id: &str, iterator: Box<dyn ResultsIterator>) {
        self.query_iterators
            .lock()
            .expect("lock poisoned")
            .insert(query_id.to_owned(), Arc::new(Mutex::new(iterator)));
        self.pending_results
            .lock()
            .expect("lock poisoned")
            .insert(query_id.to_owned(), Arc::default());
    }

    pub fn get_query_iterator(&self, query_id: &str) -> Option<QueryIterator> {
        self.query_iterators
            .lock()
            .expect("lock poisoned")
            .get(query_id)
            .cloned()
    }

    pub fn get_pending_query_result(
        &self,
        query_id: &str,
    ) -> Option<Arc<Mutex<PendingQueryResult>>> {
        self.pending_results
            .lock()
            .expect("lock poisoned")
            .get(query_id)
            .cloned()
    }

    /// Closes the iterator for `query_id` and drops both table entries.
    /// Idempotent.
    pub fn cleanup_query_context(&self, query_id: &str) {
        let iterator = self
            .query_iterators
            .lock()
            .expect("lock poisoned")
            .remove(query_id);
        self.pending_results
            .lock()
            .expect("lock poisoned")
            .remove(query_id);
        if let Some(iterator) = iterator {
            iterator.lock().expect("lock poisoned").close();
        }
    }

    /// Closes every open iterator. Runs when the transaction reaches its
    /// terminal message or the context is deleted.
    pub fn close_query_iterators(&self) {
        let iterators = std::mem::take(&mut *self.query_iterators.lock().expect("lock poisoned"));
        self.pending_results.lock().expect("lock poisoned").clear();
        for (_, iterator) in iterators {
            iterator.lock().expect("lock poisoned").close();
        }
    }
}
