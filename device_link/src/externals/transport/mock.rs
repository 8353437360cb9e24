//! Recording transport used by the dispatcher and poller tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::models::endpoint::DeviceEndpoint;

use super::{Connection, Connector, TransportError};

/// What the mock device does with one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Accept, then answer a read with this line.
    Reply(String),

    /// Refuse the connection.
    Refuse,

    /// Accept but never answer, so the read times out.
    Silent,

    /// Accept, then close before sending a line.
    CloseEarly,

    /// Accept, then fail every write.
    BrokenPipe,

    /// Accept, then block the read forever, ignoring its timeout.
    Hang,

    /// Never finish connecting, ignoring the connect timeout.
    HangConnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Connect {
        connection: usize,
        endpoint: String,
        accepted: bool,
    },
    Write {
        connection: usize,
        bytes: Vec<u8>,
    },
    Read {
        connection: usize,
    },
    Close {
        connection: usize,
    },
}

#[derive(Debug)]
struct MockState {
    events: Vec<WireEvent>,
    scripts: VecDeque<Script>,
    fallback: Script,
    next_connection: usize,
    chunked_writes: bool,
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

pub struct MockConnection {
    id: usize,
    script: Script,
    closed: bool,
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockConnector {
    /// Every connection follows `fallback` once the queued scripts run out.
    pub fn new(fallback: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                events: vec![],
                scripts: VecDeque::new(),
                fallback,
                next_connection: 0,
                chunked_writes: false,
            })),
        }
    }

    /// Record each written byte as its own write and yield between them, so
    /// unserialised writers would interleave on the wire.
    pub fn chunked(self) -> Self {
        lock(&self.state).chunked_writes = true;
        self
    }

    pub fn push(&self, script: Script) {
        lock(&self.state).scripts.push_back(script);
    }

    pub fn set_fallback(&self, script: Script) {
        lock(&self.state).fallback = script;
    }

    pub fn events(&self) -> Vec<WireEvent> {
        lock(&self.state).events.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, WireEvent::Connect { .. }))
            .count()
    }

    pub fn accepted_connections(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, WireEvent::Connect { accepted: true, .. }))
            .count()
    }

    pub fn closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, WireEvent::Close { .. }))
            .count()
    }

    /// Every byte written, in wire order.
    pub fn wire(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                WireEvent::Write { bytes, .. } => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, event: WireEvent) {
        lock(&self.state).events.push(event);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn open(
        &self,
        endpoint: &DeviceEndpoint,
        _connect_timeout: Duration,
    ) -> Result<Self::Connection, TransportError> {
        let (id, script) = {
            let mut state = lock(&self.state);
            let id = state.next_connection;
            state.next_connection += 1;
            let script = state
                .scripts
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone());
            (id, script)
        };

        let accepted = !matches!(script, Script::Refuse | Script::HangConnect);
        self.record(WireEvent::Connect {
            connection: id,
            endpoint: endpoint.to_string(),
            accepted,
        });
        if script == Script::HangConnect {
            std::future::pending::<()>().await;
        }
        if !accepted {
            return Err(TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }

        Ok(MockConnection {
            id,
            script,
            closed: false,
            state: self.state.clone(),
        })
    }
}

impl MockConnection {
    fn record(&self, event: WireEvent) {
        lock(&self.state).events.push(event);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.script == Script::BrokenPipe {
            return Err(TransportError::WriteFailed("broken pipe".into()));
        }

        let chunked = lock(&self.state).chunked_writes;
        if !chunked {
            self.record(WireEvent::Write {
                connection: self.id,
                bytes: bytes.to_vec(),
            });
            return Ok(());
        }

        for byte in bytes {
            self.record(WireEvent::Write {
                connection: self.id,
                bytes: vec![*byte],
            });
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn read_line(&mut self, read_timeout: Duration) -> Result<String, TransportError> {
        self.record(WireEvent::Read {
            connection: self.id,
        });
        match &self.script {
            Script::Reply(line) => Ok(line.clone()),
            Script::Silent => {
                tokio::time::sleep(read_timeout).await;
                Err(TransportError::ReadTimeout)
            }
            Script::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::ReadTimeout)
            }
            Script::CloseEarly => Err(TransportError::Closed),
            Script::Refuse | Script::BrokenPipe | Script::HangConnect => {
                Err(TransportError::Closed)
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.record(WireEvent::Close {
                connection: self.id,
            });
        }
    }
}
