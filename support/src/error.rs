//! Error types.
//!
//! The `Display` text of several variants is part of the wire contract:
//! transaction-local failures are relayed to the chaincode verbatim inside
//! ERROR message payloads, so the texts here must stay stable.

use thiserror::Error;

use chaincode_protocol::{ChaincodeInstance, CodecError};

use crate::handler::State;

/// An error produced by an external collaborator (ledger, executor,
/// authorization services). The collaborator decides the text; the handler
/// only relays it.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct ExternalError(String);

impl ExternalError {
    pub fn new(message: impl Into<String>) -> Self {
        ExternalError(message.into())
    }
}

impl From<String> for ExternalError {
    fn from(message: String) -> Self {
        ExternalError(message)
    }
}

impl From<&str> for ExternalError {
    fn from(message: &str) -> Self {
        ExternalError(message.to_owned())
    }
}

/// Failure of the underlying message transport.
#[derive(Clone, Debug, Error)]
pub enum StreamError {
    /// The remote side closed the stream in an orderly fashion.
    #[error("EOF")]
    Eof,
    /// The transport broke; the text comes from the stream implementation.
    #[error("{0}")]
    Transport(String),
}

/// Handler failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Graceful close of the stream, passed through unchanged.
    #[error("EOF")]
    Eof,
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] StreamError),
    #[error("received nil message, ending chaincode support stream")]
    NilMessage,
    /// A send scheduled without a waiting caller failed; the stream is torn
    /// down when the read loop drains this from the error sink.
    #[error("received error while sending message, ending chaincode support stream: {0}")]
    AsyncSendFailed(#[source] Box<HandlerError>),
    #[error("error handling message, ending stream: {0}")]
    HandleMessageFailed(#[source] Box<HandlerError>),
    #[error("[{txid}] handler cannot handle message ({message_type}) while in {state} state")]
    UnexpectedMessage {
        txid: String,
        message_type: String,
        state: State,
    },
    #[error("handle message: invalid state {state} for transaction {txid}")]
    InvalidState { txid: String, state: State },
    #[error("[{txid}] error sending {message_type}: {source}")]
    SendFailed {
        txid: String,
        message_type: String,
        #[source]
        source: StreamError,
    },
    #[error("unmarshal failed: {0}")]
    Unmarshal(#[source] CodecError),
    #[error("marshal failed: {0}")]
    Marshal(#[source] CodecError),
    /// No transaction context, or a context without a simulator, for a
    /// ledger-mediating message.
    #[error("no ledger context")]
    NoLedgerContext,
    /// Chaincode-to-chaincode invocation without a usable transaction.
    #[error("could not get valid transaction")]
    InvalidTransaction,
    /// System-chaincode invocation on the empty channel with no context.
    #[error("failed to get transaction context")]
    MissingTxContext,
    #[error("query iterator not found")]
    QueryIteratorNotFound,
    #[error("chaincode id is not set in chaincode spec")]
    MissingChaincodeId,
    #[error("system chaincode {0} cannot be invoked with a cc2cc invocation")]
    NotInvokableCc2cc(String),
    #[error("failed to find ledger for channel: {0}")]
    LedgerNotFound(String),
    #[error("signed proposal must not be nil from caller [{0}]")]
    NilSignedProposal(ChaincodeInstance),
    #[error("execute failed: {0}")]
    ExecuteFailed(#[source] ExternalError),
    #[error("timeout expired while executing transaction")]
    ExecuteTimeout,
    #[error("failed getting proposal context. Signed proposal is nil")]
    NilProposalContext,
    /// A transaction context for this (channel, txid) already exists.
    #[error("txid: {txid}({channel_id}) exists")]
    TxContextExists { txid: String, channel_id: String },
    #[error("duplicate chaincodeID: {0}")]
    DuplicateChaincodeName(String),
    #[error(transparent)]
    External(#[from] ExternalError),
}
