//! Point-to-point byte stream primitives. No retries or pooling here, the
//! dispatcher composes these.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::endpoint::DeviceEndpoint;

#[cfg(test)]
pub mod mock;
pub mod tcp;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}. Error: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Timed out connecting to {0}.")]
    ConnectTimeout(String),

    #[error("Failed to write to device. Error: {0}")]
    WriteFailed(String),

    #[error("Timed out waiting for a response line.")]
    ReadTimeout,

    #[error("Failed to read from device. Error: {0}")]
    ReadFailed(String),

    #[error("Connection closed before a line arrived.")]
    Closed,
}

/// Opens one connection per call.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn open(
        &self,
        endpoint: &DeviceEndpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, TransportError>;
}

/// A single short lived connection, owned by exactly one request.
#[async_trait]
pub trait Connection: Send {
    /// Write and flush all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read one line. The terminator is stripped; an empty line is returned
    /// as an empty string.
    async fn read_line(&mut self, read_timeout: Duration) -> Result<String, TransportError>;

    /// Release the socket. Safe to call more than once and after errors.
    async fn close(&mut self);
}
