use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    application::{Application, DeviceState},
    sensors::{DriftingSensors, SensorSource},
};

/// Connections that stay quiet for this long are dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Connection I/O failed. Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection idle for too long.")]
    Idle,
}

/// TCP front of the simulated controller. Serves every connection on its own
/// task; the device state is shared between them.
pub struct Simulator<S: SensorSource> {
    listener: TcpListener,
    application: Arc<Mutex<Application<S>>>,
}

impl Simulator<DriftingSensors> {
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        Self::bind_with(addr, DriftingSensors::new()).await
    }
}

impl<S: SensorSource + 'static> Simulator<S> {
    pub async fn bind_with(addr: impl ToSocketAddrs, sensors: S) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            application: Arc::new(Mutex::new(Application::new(sensors))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Snapshot of the actuator state.
    pub fn state(&self) -> DeviceState {
        self.application
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Accept connections until `token` is cancelled, then wait for the open
    /// ones to finish.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, token: CancellationToken) {
        info!("Started.");
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    warn!("Cancelled.");
                    break;
                },
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept connection. Error: {}", e);
                            continue;
                        }
                    };
                    trace!("Accepted connection from {}.", peer);

                    let application = self.application.clone();
                    let token = token.clone();
                    tracker.spawn(async move {
                        if let Err(e) = serve_connection(stream, peer, application, token).await {
                            debug!("Connection from {} ended. Error: {}", peer, e);
                        }
                    });
                }
            }
        }

        tracker.close();
        tracker.wait().await;
    }
}

#[instrument(skip(stream, application, token))]
async fn serve_connection<S: SensorSource>(
    stream: TcpStream,
    peer: SocketAddr,
    application: Arc<Mutex<Application<S>>>,
    token: CancellationToken,
) -> Result<(), SimulatorError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            line = timeout(IDLE_TIMEOUT, lines.next_line()) => line,
        };
        let Some(line) = line.map_err(|_| SimulatorError::Idle)?? else {
            trace!("Peer closed.");
            return Ok(());
        };

        let response = {
            let mut application = application.lock().unwrap_or_else(PoisonError::into_inner);
            match application.handle_line(&line) {
                Ok(response) => {
                    debug!("Handled '{}'. State: {}", line, application.state);
                    response
                }
                Err(e) => {
                    warn!("Ignoring line. Error: {}", e);
                    None
                }
            }
        };

        if let Some(response) = response {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
}
