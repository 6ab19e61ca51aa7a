//! Ledger-facing collaborator traits.
//!
//! The ledger itself lives outside this crate. These traits describe
//! exactly the surface the handler consumes: an isolated read/write view
//! per transaction (the simulator), a history view, and iterators over
//! range and rich-query results. Implementations are expected to be cheap
//! to clone behind `Arc` and safe for use from the dispatch workers.

use std::sync::{Arc, Mutex};

use chaincode_protocol::QueryResult;

use crate::error::ExternalError;

/// An iterator over ledger query results.
///
/// Owned by exactly one transaction context, which is also its only
/// closer. `next` returning `Ok(None)` means exhaustion; `close` must be
/// idempotent.
pub trait ResultsIterator: Send {
    fn next(&mut self) -> Result<Option<QueryResult>, ExternalError>;
    fn close(&mut self);
}

/// Shared handle to an open query iterator.
///
/// The handle lives in the transaction context's query table while a
/// response builder pages it; the lock is held per row, never across a
/// cleanup call.
pub type QueryIterator = Arc<Mutex<Box<dyn ResultsIterator>>>;

/// An isolated read/write view of the ledger used to execute a proposal
/// without committing.
pub trait TxSimulator: Send + Sync {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ExternalError>;

    fn set_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), ExternalError>;

    fn delete_state(&self, namespace: &str, key: &str) -> Result<(), ExternalError>;

    fn get_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ExternalError>;

    fn set_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ExternalError>;

    fn delete_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), ExternalError>;

    fn get_state_range_scan_iterator(
        &self,
        namespace: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError>;

    fn get_private_data_range_scan_iterator(
        &self,
        namespace: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError>;

    fn execute_query(
        &self,
        namespace: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError>;

    fn execute_query_on_private_data(
        &self,
        namespace: &str,
        collection: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError>;

    /// Releases the simulator. Must be called exactly once when the
    /// transaction no longer needs it.
    fn done(&self);
}

/// Read-only access to the history of keys.
pub trait HistoryQueryExecutor: Send + Sync {
    fn get_history_for_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError>;
}

/// One channel's ledger.
pub trait PeerLedger: Send + Sync {
    fn new_tx_simulator(&self, txid: &str) -> Result<Arc<dyn TxSimulator>, ExternalError>;

    fn new_history_query_executor(&self)
        -> Result<Arc<dyn HistoryQueryExecutor>, ExternalError>;
}

/// Resolves a channel id to its ledger, if the peer has joined it.
pub trait LedgerGetter: Send + Sync {
    fn get_ledger(&self, channel_id: &str) -> Option<Arc<dyn PeerLedger>>;
}
