//! Bridges the shared wire vocabulary and the dispatcher's results.

use common::protocol::{parse_response, DecodeError, SensorKind};

use crate::models::command_result::{CommandResult, FailureKind};

pub use common::protocol::{encode, EncodeError, Frame};

/// Decode one response line for a query of `kind`.
/// Write commands never reach this, they are acknowledged on a successful
/// write and flush.
pub fn decode(kind: SensorKind, line: &str) -> CommandResult {
    match parse_response(kind, line) {
        Ok(reading) => reading.into(),
        Err(DecodeError::EmptyLine) => CommandResult::failure(
            FailureKind::ReadError,
            format!("Empty response to {} query.", kind),
        ),
        Err(e) => CommandResult::failure(
            FailureKind::DecodeError,
            format!("Malformed {} response '{}'. Error: {}", kind, line, e),
        ),
    }
}
