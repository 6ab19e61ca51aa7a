//! The set of transactions currently being processed.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::handler::TransactionRegistry;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct TxKey {
    channel_id: String,
    tx_id: String,
}

/// Tracks which (channel, txid) pairs have a dispatch worker running, so a
/// replayed txid cannot get a second worker while the first is live.
#[derive(Debug, Default)]
pub struct ActiveTransactions {
    ids: Mutex<HashSet<TxKey>>,
}

impl ActiveTransactions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionRegistry for ActiveTransactions {
    fn add(&self, channel_id: &str, tx_id: &str) -> bool {
        let key = TxKey {
            channel_id: channel_id.to_owned(),
            tx_id: tx_id.to_owned(),
        };
        self.ids.lock().expect("lock poisoned").insert(key)
    }

    fn remove(&self, channel_id: &str, tx_id: &str) {
        let key = TxKey {
            channel_id: channel_id.to_owned(),
            tx_id: tx_id.to_owned(),
        };
        self.ids.lock().expect("lock poisoned").remove(&key);
    }
}
