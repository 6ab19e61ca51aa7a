//! Registry of in-flight transaction contexts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chaincode_protocol::{Proposal, SignedProposal};

use crate::{
    error::HandlerError, handler::ContextRegistry, runtime::ExecuteContext,
    transaction_context::TransactionContext,
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ContextId {
    channel_id: String,
    tx_id: String,
}

/// Owns every live [`TransactionContext`], keyed by (channel, txid).
///
/// A (channel, txid) pair has at most one context for its lifetime;
/// deleting a context closes its query iterators.
#[derive(Default)]
pub struct TransactionContexts {
    contexts: Mutex<HashMap<ContextId, Arc<TransactionContext>>>,
}

impl TransactionContexts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextRegistry for TransactionContexts {
    fn create(
        &self,
        ctx: &ExecuteContext,
        channel_id: &str,
        tx_id: &str,
        signed_proposal: Option<SignedProposal>,
        proposal: Option<Proposal>,
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        let key = ContextId {
            channel_id: channel_id.to_owned(),
            tx_id: tx_id.to_owned(),
        };

        let mut contexts = self.contexts.lock().expect("lock poisoned");
        if contexts.contains_key(&key) {
            return Err(HandlerError::TxContextExists {
                txid: tx_id.to_owned(),
                channel_id: channel_id.to_owned(),
            });
        }

        let tx_context = Arc::new(TransactionContext::new(
            channel_id,
            signed_proposal,
            proposal,
            ctx,
        ));
        contexts.insert(key, Arc::clone(&tx_context));
        Ok(tx_context)
    }

    fn get(&self, channel_id: &str, tx_id: &str) -> Option<Arc<TransactionContext>> {
        let key = ContextId {
            channel_id: channel_id.to_owned(),
            tx_id: tx_id.to_owned(),
        };
        self.contexts.lock().expect("lock poisoned").get(&key).cloned()
    }

    fn delete(&self, channel_id: &str, tx_id: &str) {
        let key = ContextId {
            channel_id: channel_id.to_owned(),
            tx_id: tx_id.to_owned(),
        };
        let removed = self.contexts.lock().expect("lock poisoned").remove(&key);
        if let Some(ctx) = removed {
            ctx.close_query_iterators();
        }
    }

    /// Closes the query iterators of every live context. Used when the
    /// stream that owns these transactions is torn down.
    fn close(&self) {
        let contexts = self.contexts.lock().expect("lock poisoned");
        for ctx in contexts.values() {
            ctx.close_query_iterators();
        }
    }
}
