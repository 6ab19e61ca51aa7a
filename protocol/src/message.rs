//! The message envelope exchanged between peer and chaincode.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::payloads::SignedProposal;

/// Message type tags.
///
/// The numeric values are part of the wire contract and must never be
/// reordered. Tag `12` is retired and intentionally absent.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum MessageType {
    Undefined = 0,
    Register = 1,
    Registered = 2,
    Init = 3,
    Ready = 4,
    Transaction = 5,
    Completed = 6,
    Error = 7,
    GetState = 8,
    PutState = 9,
    DelState = 10,
    InvokeChaincode = 11,
    Response = 13,
    GetStateByRange = 14,
    GetQueryResult = 15,
    QueryStateNext = 16,
    QueryStateClose = 17,
    Keepalive = 18,
    GetHistoryForKey = 19,
}

impl MessageType {
    /// Maps a raw wire tag back to a known message type.
    pub fn from_tag(tag: i32) -> Option<MessageType> {
        match tag {
            0 => Some(MessageType::Undefined),
            1 => Some(MessageType::Register),
            2 => Some(MessageType::Registered),
            3 => Some(MessageType::Init),
            4 => Some(MessageType::Ready),
            5 => Some(MessageType::Transaction),
            6 => Some(MessageType::Completed),
            7 => Some(MessageType::Error),
            8 => Some(MessageType::GetState),
            9 => Some(MessageType::PutState),
            10 => Some(MessageType::DelState),
            11 => Some(MessageType::InvokeChaincode),
            13 => Some(MessageType::Response),
            14 => Some(MessageType::GetStateByRange),
            15 => Some(MessageType::GetQueryResult),
            16 => Some(MessageType::QueryStateNext),
            17 => Some(MessageType::QueryStateClose),
            18 => Some(MessageType::Keepalive),
            19 => Some(MessageType::GetHistoryForKey),
            _ => None,
        }
    }

    /// Returns the raw wire tag.
    #[inline]
    pub const fn tag(self) -> i32 {
        self as i32
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Undefined => "UNDEFINED",
            MessageType::Register => "REGISTER",
            MessageType::Registered => "REGISTERED",
            MessageType::Init => "INIT",
            MessageType::Ready => "READY",
            MessageType::Transaction => "TRANSACTION",
            MessageType::Completed => "COMPLETED",
            MessageType::Error => "ERROR",
            MessageType::GetState => "GET_STATE",
            MessageType::PutState => "PUT_STATE",
            MessageType::DelState => "DEL_STATE",
            MessageType::InvokeChaincode => "INVOKE_CHAINCODE",
            MessageType::Response => "RESPONSE",
            MessageType::GetStateByRange => "GET_STATE_BY_RANGE",
            MessageType::GetQueryResult => "GET_QUERY_RESULT",
            MessageType::QueryStateNext => "QUERY_STATE_NEXT",
            MessageType::QueryStateClose => "QUERY_STATE_CLOSE",
            MessageType::Keepalive => "KEEPALIVE",
            MessageType::GetHistoryForKey => "GET_HISTORY_FOR_KEY",
        };
        f.write_str(name)
    }
}

/// A single unit on the peer/chaincode stream.
///
/// The type tag is stored raw so that a message carrying a tag this build
/// does not know survives long enough to be reported (and rejected) by the
/// handler's state machine instead of dying in deserialization.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeMessage {
    pub message_type: i32,
    pub txid: String,
    pub channel_id: String,
    pub payload: Vec<u8>,
    /// Signed proposal attached by the peer on TRANSACTION/INIT so that the
    /// caller's authorization travels with the request.
    pub proposal: Option<SignedProposal>,
}

impl ChaincodeMessage {
    /// Creates a message of the given type with no payload.
    pub fn new(message_type: MessageType) -> Self {
        ChaincodeMessage {
            message_type: message_type.tag(),
            ..Default::default()
        }
    }

    /// The decoded message type, if the tag is known.
    #[inline]
    pub fn message_kind(&self) -> Option<MessageType> {
        MessageType::from_tag(self.message_type)
    }

    /// The message type rendered for error texts: the symbolic name for
    /// known tags, the raw number otherwise.
    pub fn type_string(&self) -> String {
        match self.message_kind() {
            Some(kind) => kind.to_string(),
            None => self.message_type.to_string(),
        }
    }

    /// True for the tags that mediate ledger access and are only legal once
    /// the handler is ready.
    pub fn is_ledger_message(&self) -> bool {
        matches!(
            self.message_kind(),
            Some(
                MessageType::GetState
                    | MessageType::PutState
                    | MessageType::DelState
                    | MessageType::GetStateByRange
                    | MessageType::QueryStateNext
                    | MessageType::QueryStateClose
                    | MessageType::GetQueryResult
                    | MessageType::GetHistoryForKey
                    | MessageType::InvokeChaincode
            )
        )
    }
}
