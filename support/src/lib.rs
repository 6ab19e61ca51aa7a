//! Peer-side handler for the streaming chaincode protocol.
//!
//! A chaincode is an untrusted, user-supplied program that executes
//! transactions against a ledger. It talks to its peer over a single
//! long-lived, bidirectional stream of
//! [`ChaincodeMessage`](chaincode_protocol::ChaincodeMessage)s. The
//! [`Handler`] in this crate is the peer's side of that conversation: it
//! multiplexes many concurrent transactions over the one stream, brokers
//! every ledger read and write on the chaincode's behalf, enforces access
//! control on chaincode-to-chaincode calls, drives the per-connection
//! lifecycle state machine and keeps the connection alive.
//!
//! The ledger, the executor that launches and runs chaincode, the
//! transport, and the authorization services are all external collaborators
//! reached through the traits in [`ledger`] and [`runtime`].

mod active_transactions;
pub mod config;
mod error;
mod handler;
mod handler_registry;
pub mod ledger;
mod metrics;
mod query_response;
pub mod runtime;
mod transaction_context;
mod transaction_contexts;

#[cfg(test)]
mod testing;

pub use active_transactions::ActiveTransactions;
pub use config::Config;
pub use error::{ExternalError, HandlerError, StreamError};
pub use handler::{
    ChaincodeStream, Collaborators, ContextRegistry, Handler, QueryResponseBuilder, Registry,
    State, TransactionRegistry,
};
pub use handler_registry::{HandlerRegistry, LaunchState};
pub use metrics::HandlerMetrics;
pub use query_response::QueryResponseGenerator;
pub use transaction_context::{PendingQueryResult, TransactionContext};
pub use transaction_contexts::TransactionContexts;
