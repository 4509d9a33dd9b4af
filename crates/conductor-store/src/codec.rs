//! State serialization.
//!
//! Encodes a [`WorkflowState`] to a self-describing JSON document and back.
//! Round-trips preserve semantics, not bytes; in particular the integer
//! keys of `task_results` survive the trip through JSON object keys, which
//! are strings on the wire.

use serde_json::Value;
use thiserror::Error;

use crate::models::WorkflowState;

/// Errors from encoding or decoding a stored state.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode workflow state: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored workflow state is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Encode a state to bytes for storage.
pub fn encode(state: &WorkflowState) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(state).map_err(CodecError::Encode)
}

/// Encode a state to a JSON value (for stores with a native JSON column).
pub fn encode_value(state: &WorkflowState) -> Result<Value, CodecError> {
    serde_json::to_value(state).map_err(CodecError::Encode)
}

/// Decode a state from stored bytes.
///
/// A failure here means the entry exists but cannot be read; callers must
/// surface it rather than treat the thread as absent, so a corrupt entry is
/// never silently overwritten.
pub fn decode(bytes: &[u8]) -> Result<WorkflowState, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Corrupt)
}

/// Decode a state from a JSON value.
pub fn decode_value(value: Value) -> Result<WorkflowState, CodecError> {
    serde_json::from_value(value).map_err(CodecError::Corrupt)
}
