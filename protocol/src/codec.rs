//! Marshalling of payload sub-schemas to and from their byte form.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Asked to marshal a message that is not there.
    #[error("Marshal called with nil")]
    NilMessage,
    /// The encoder rejected the value.
    #[error("{0}")]
    Encode(#[source] bincode::Error),
    /// The bytes did not decode as the expected sub-schema.
    #[error("{0}")]
    Decode(#[source] bincode::Error),
}

/// Marshals a payload into its wire bytes.
///
/// Accepts an `Option` because several producers (executors, response
/// builders) legitimately hand back nothing; that case must surface as a
/// codec failure rather than as an empty payload.
pub fn marshal<T: Serialize>(msg: Option<&T>) -> Result<Vec<u8>, CodecError> {
    let msg = msg.ok_or(CodecError::NilMessage)?;
    bincode::serialize(msg).map_err(CodecError::Encode)
}

/// Unmarshals wire bytes into a payload sub-schema.
pub fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}
