//! Wire-level data model for the peer/chaincode message protocol.
//!
//! A peer and a running chaincode talk over a single bidirectional stream of
//! [`ChaincodeMessage`]s. Each message carries a numeric type tag, a
//! transaction id, a channel id and an opaque payload whose sub-schema is
//! determined by the tag. This crate defines the message envelope, the
//! payload sub-schemas, the [`marshal`]/[`unmarshal`] codec used to move
//! payloads in and out of their byte form, and the parsing of composite
//! chaincode names (`name[:version][/channel]`).
//!
//! The transport that carries the messages is out of scope; so is everything
//! that interprets them. See the `chaincode-support` crate for the peer-side
//! handler.

mod codec;
mod instance;
mod message;
mod payloads;

pub use codec::{marshal, unmarshal, CodecError};
pub use instance::{parse_name, ChaincodeInstance};
pub use message::{ChaincodeMessage, MessageType};
pub use payloads::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeSpec, DelState, GetHistoryForKey,
    GetQueryResult, GetState, GetStateByRange, KeyModification, KeyValue, Proposal, PutState,
    QueryResponse, QueryResult, QueryResultBytes, QueryStateClose, QueryStateNext, Response,
    SignedProposal,
};
