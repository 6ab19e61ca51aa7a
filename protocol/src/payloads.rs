//! Payload sub-schemas.
//!
//! Each ledger-mediating message type carries one of these structs in its
//! payload, in [`marshal`](crate::marshal)led form. The structs are kept
//! deliberately flat; everything the peer does not interpret stays bytes.

use serde::{Deserialize, Serialize};

/// Payload of GET_STATE.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetState {
    pub key: String,
    /// Private-data collection; empty means the public namespace.
    pub collection: String,
}

/// Payload of PUT_STATE.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PutState {
    pub key: String,
    pub value: Vec<u8>,
    pub collection: String,
}

/// Payload of DEL_STATE.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DelState {
    pub key: String,
    pub collection: String,
}

/// Payload of GET_STATE_BY_RANGE.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetStateByRange {
    pub start_key: String,
    pub end_key: String,
    pub collection: String,
}

/// Payload of QUERY_STATE_NEXT: request the next page for an open query.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryStateNext {
    pub id: String,
}

/// Payload of QUERY_STATE_CLOSE: release an open query early.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryStateClose {
    pub id: String,
}

/// Payload of GET_QUERY_RESULT: a rich query in the backing store's query
/// language, passed through uninterpreted.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetQueryResult {
    pub query: String,
    pub collection: String,
}

/// Payload of GET_HISTORY_FOR_KEY.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GetHistoryForKey {
    pub key: String,
}

/// One marshalled result row inside a [`QueryResponse`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryResultBytes {
    pub result_bytes: Vec<u8>,
}

/// Payload of RESPONSE for range/query/history operations.
///
/// `has_more` signals that further pages can be requested with
/// QUERY_STATE_NEXT under the same `id`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResultBytes>,
    pub has_more: bool,
    pub id: String,
}

/// A row produced by a ledger iterator, prior to marshalling.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum QueryResult {
    KeyValue(KeyValue),
    KeyModification(KeyModification),
}

/// A current state row.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub namespace: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// A historic version of a key, produced by history queries.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyModification {
    pub tx_id: String,
    pub value: Vec<u8>,
    pub timestamp: u64,
    pub is_delete: bool,
}

/// Identity of a chaincode.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
    pub version: String,
}

/// Invocation arguments, opaque to the peer.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    pub args: Vec<Vec<u8>>,
}

/// Payload of INVOKE_CHAINCODE: what to invoke and with which arguments.
///
/// The target name may be composite (`name[:version][/channel]`), see
/// [`parse_name`](crate::parse_name).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    pub chaincode_id: Option<ChaincodeId>,
    pub input: Option<ChaincodeInput>,
}

/// The application-level response produced by a chaincode execution.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub payload: Vec<u8>,
}

/// An event emitted by a chaincode during execution.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub tx_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
}

/// A client transaction proposal. The peer treats header and payload as
/// opaque; they are relayed for definition lookups.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

/// The signed envelope of a proposal, carried through the call chain for
/// authorization checks.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal_bytes: Vec<u8>,
    pub signature: Vec<u8>,
}
