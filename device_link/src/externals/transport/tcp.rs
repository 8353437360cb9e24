use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, instrument, trace, warn};

use crate::models::endpoint::DeviceEndpoint;

use super::{Connection, Connector, TransportError};

/// Longest response line accepted before the read is cut short.
const MAX_LINE_LEN: u64 = 256;

/// Opens plain TCP connections to the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

pub struct TcpConnection {
    stream: Option<BufReader<TcpStream>>,
    write_timeout: Duration,
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    #[instrument(skip_all, fields(endpoint = %endpoint))]
    async fn open(
        &self,
        endpoint: &DeviceEndpoint,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, TransportError> {
        let address = endpoint.to_string();
        trace!("Opening connection.");

        let stream = match timeout(connect_timeout, TcpStream::connect(address.as_str())).await {
            Err(_) => {
                debug!("Timed out after {:?}.", connect_timeout);
                return Err(TransportError::ConnectTimeout(address));
            }
            Ok(Err(e)) => {
                debug!("Failed to connect. Error: {}", e);
                return Err(TransportError::ConnectFailed {
                    endpoint: address,
                    reason: e.to_string(),
                });
            }
            Ok(Ok(stream)) => stream,
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!("Failed to disable Nagle. Error: {}", e);
        }
        debug!("Connected.");

        Ok(TcpConnection {
            stream: Some(BufReader::new(stream)),
            write_timeout: connect_timeout,
        })
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?.get_mut();

        let written = timeout(self.write_timeout, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await;

        match written {
            Err(_) => Err(TransportError::WriteFailed("write timed out".into())),
            Ok(Err(e)) => Err(TransportError::WriteFailed(e.to_string())),
            Ok(Ok(())) => {
                trace!("Wrote {} bytes.", bytes.len());
                Ok(())
            }
        }
    }

    async fn read_line(&mut self, read_timeout: Duration) -> Result<String, TransportError> {
        let reader = self.stream.as_mut().ok_or(TransportError::Closed)?;

        let mut line = String::new();
        let read = timeout(
            read_timeout,
            reader.take(MAX_LINE_LEN).read_line(&mut line),
        )
        .await;

        match read {
            Err(_) => Err(TransportError::ReadTimeout),
            Ok(Err(e)) => Err(TransportError::ReadFailed(e.to_string())),
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(length)) => {
                trace!("Read {} bytes.", length);
                if !line.ends_with('\n') {
                    warn!("Response line was not terminated, using it as is.");
                }
                let trimmed = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed);
                Ok(line)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            if let Err(e) = reader.get_mut().shutdown().await {
                trace!("Failed to shut down socket cleanly. Error: {}", e);
            }
            trace!("Closed connection.");
        }
    }
}
