use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use common::{
    physical::Rgb,
    protocol::{Command, SensorKind},
};
use tokio::{sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    codec::{decode, encode, Frame},
    externals::transport::{Connection, Connector, TransportError},
    models::{
        command_result::{CommandResult, FailureKind},
        endpoint::DeviceEndpoint,
    },
};

/// Delay between attempts: starts at `initial`, doubles, never exceeds `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// Delay to wait after `failed_attempts` consecutive failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let doublings = failed_attempts.saturating_sub(1).min(16);
        self.initial
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            cap: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub connect_timeout: Duration,

    /// Read timeout used by [`Dispatcher::send`].
    pub read_timeout: Duration,

    /// Total attempts used by [`Dispatcher::send`].
    pub max_retries: u32,

    pub backoff: Backoff,

    /// Replay requests whose response line was malformed. Off by default: a
    /// stable device that sent garbage once will likely send it again.
    pub retry_decode_errors: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            max_retries: 3,
            backoff: Backoff::default(),
            retry_decode_errors: false,
        }
    }
}

/// Lifecycle of one attempt of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Idle,
    Connecting,
    Writing,
    ReadingResponse,
    Completed,
    Failed,
}

impl Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Idle => "idle",
            RequestState::Connecting => "connecting",
            RequestState::Writing => "writing",
            RequestState::ReadingResponse => "reading response",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

struct Attempt {
    number: u32,
    state: RequestState,
}

impl Attempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            state: RequestState::Idle,
        }
    }

    fn advance(&mut self, next: RequestState) {
        trace!("Attempt {}: {} -> {}.", self.number, self.state, next);
        self.state = next;
    }
}

/// Why a single attempt ended without a result.
#[derive(Debug)]
enum AttemptFailure {
    Connect(TransportError),
    Write(TransportError),
    Timeout(String),
    Read(String),
    Decode(String),
}

impl AttemptFailure {
    fn is_retryable(&self, retry_decode_errors: bool) -> bool {
        match self {
            AttemptFailure::Decode(_) => retry_decode_errors,
            _ => true,
        }
    }

    fn into_result(self, attempts: u32) -> CommandResult {
        match self {
            AttemptFailure::Connect(e) | AttemptFailure::Write(e) => CommandResult::failure(
                FailureKind::Unreachable,
                format!("Device unreachable after {} attempt(s). Error: {}", attempts, e),
            ),
            AttemptFailure::Timeout(message) => CommandResult::failure(FailureKind::Timeout, message),
            AttemptFailure::Read(message) => CommandResult::failure(FailureKind::ReadError, message),
            AttemptFailure::Decode(message) => {
                CommandResult::failure(FailureKind::DecodeError, message)
            }
        }
    }
}

impl Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Connect(e) => write!(f, "connect: {}", e),
            AttemptFailure::Write(e) => write!(f, "write: {}", e),
            AttemptFailure::Timeout(message) => write!(f, "timeout: {}", message),
            AttemptFailure::Read(message) => write!(f, "read: {}", message),
            AttemptFailure::Decode(message) => write!(f, "decode: {}", message),
        }
    }
}

fn encode_or_reject(command: &Command) -> Result<Frame, CommandResult> {
    encode(command).map_err(|e| {
        warn!("Refusing to send command. Error: {}", e);
        CommandResult::failure(FailureKind::Unsupported, e.to_string())
    })
}

/// Serialises every request to an endpoint, one fresh connection per request,
/// with bounded timeouts and retries. Failures are returned as
/// [`CommandResult::Failure`], never as panics.
pub struct Dispatcher<C: Connector> {
    connector: C,
    config: DispatcherConfig,

    /// One lock per endpoint. `tokio::sync::Mutex` queues waiters in FIFO
    /// order, which gives callers their ordering guarantee.
    endpoint_locks: StdMutex<HashMap<DeviceEndpoint, Arc<Mutex<()>>>>,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C, config: DispatcherConfig) -> Self {
        Self {
            connector,
            config,
            endpoint_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn lock_for(&self, endpoint: &DeviceEndpoint) -> Arc<Mutex<()>> {
        let mut locks = self
            .endpoint_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(endpoint.clone()).or_default().clone()
    }

    /// Run `command` against `endpoint`, making at most `max_retries` attempts
    /// (at least one). Queries read one response line within `read_timeout`.
    #[instrument(skip_all, fields(endpoint = %endpoint, command = ?command))]
    pub async fn execute(
        &self,
        endpoint: &DeviceEndpoint,
        command: Command,
        read_timeout: Duration,
        max_retries: u32,
    ) -> CommandResult {
        let frame = match encode_or_reject(&command) {
            Ok(frame) => frame,
            Err(rejected) => return rejected,
        };

        let lock = self.lock_for(endpoint);
        let _guard = lock.lock().await;
        trace!("Acquired endpoint lock.");

        self.run_locked(endpoint, &command, &frame, read_timeout, max_retries)
            .await
    }

    /// [`Dispatcher::execute`] that gives up while still queued behind other
    /// requests once `token` is cancelled, returning `None`. A request that
    /// already holds the endpoint lock runs to completion.
    #[instrument(skip_all, fields(endpoint = %endpoint, command = ?command))]
    pub async fn execute_until_cancelled(
        &self,
        endpoint: &DeviceEndpoint,
        command: Command,
        read_timeout: Duration,
        max_retries: u32,
        token: &CancellationToken,
    ) -> Option<CommandResult> {
        let frame = match encode_or_reject(&command) {
            Ok(frame) => frame,
            Err(rejected) => return Some(rejected),
        };

        let lock = self.lock_for(endpoint);
        let _guard = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Cancelled while waiting for the endpoint lock.");
                return None;
            },
            guard = lock.lock() => guard,
        };
        trace!("Acquired endpoint lock.");

        Some(
            self.run_locked(endpoint, &command, &frame, read_timeout, max_retries)
                .await,
        )
    }

    async fn run_locked(
        &self,
        endpoint: &DeviceEndpoint,
        command: &Command,
        frame: &Frame,
        read_timeout: Duration,
        max_retries: u32,
    ) -> CommandResult {
        let attempts = max_retries.max(1);
        let mut number = 1;
        loop {
            let failure = match self
                .attempt(number, endpoint, command, frame.as_bytes(), read_timeout)
                .await
            {
                Ok(result) => {
                    debug!("Request completed on attempt {}. Result: {}", number, result);
                    return result;
                }
                Err(failure) => failure,
            };

            if number >= attempts || !failure.is_retryable(self.config.retry_decode_errors) {
                warn!(
                    "Request failed after {} attempt(s). Error: {}",
                    number, failure
                );
                return failure.into_result(number);
            }

            let delay = self.config.backoff.delay_after(number);
            debug!(
                "Attempt {}/{} failed, retrying in {:?}. Error: {}",
                number, attempts, delay, failure
            );
            tokio::time::sleep(delay).await;
            number += 1;
        }
    }

    /// [`Dispatcher::execute`] with the configured read timeout and retries.
    pub async fn send(&self, endpoint: &DeviceEndpoint, command: Command) -> CommandResult {
        self.execute(
            endpoint,
            command,
            self.config.read_timeout,
            self.config.max_retries,
        )
        .await
    }

    pub async fn set_color(&self, endpoint: &DeviceEndpoint, color: Rgb) -> CommandResult {
        self.send(endpoint, Command::SetColor(color)).await
    }

    pub async fn set_servo(&self, endpoint: &DeviceEndpoint, open: bool) -> CommandResult {
        self.send(endpoint, Command::SetServo { open }).await
    }

    pub async fn query(&self, endpoint: &DeviceEndpoint, kind: SensorKind) -> CommandResult {
        self.send(endpoint, Command::Query(kind)).await
    }

    /// Query with the configured settings, abandoned if `token` is cancelled
    /// before the request reaches the front of the endpoint queue.
    pub async fn query_until_cancelled(
        &self,
        endpoint: &DeviceEndpoint,
        kind: SensorKind,
        token: &CancellationToken,
    ) -> Option<CommandResult> {
        self.execute_until_cancelled(
            endpoint,
            Command::Query(kind),
            self.config.read_timeout,
            self.config.max_retries,
            token,
        )
        .await
    }

    /// One connect, write, optional read cycle. The connection lives outside
    /// the timed future, so it is closed exactly once however the attempt
    /// ends, including when the deadline cancels it mid I/O.
    async fn attempt(
        &self,
        number: u32,
        endpoint: &DeviceEndpoint,
        command: &Command,
        frame: &[u8],
        read_timeout: Duration,
    ) -> Result<CommandResult, AttemptFailure> {
        let mut attempt = Attempt::new(number);
        let mut slot: Option<C::Connection> = None;

        // Sum of the connect, write and read bounds. Catches a transport
        // that ignores its own step timeouts.
        let deadline = self.config.connect_timeout * 2 + read_timeout;
        let timed = timeout(
            deadline,
            self.run_attempt(&mut attempt, &mut slot, endpoint, command, frame, read_timeout),
        )
        .await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) if attempt.state == RequestState::Connecting => Err(AttemptFailure::Connect(
                TransportError::ConnectTimeout(endpoint.to_string()),
            )),
            Err(_) => Err(AttemptFailure::Timeout(format!(
                "Attempt exceeded its {:?} deadline while {}.",
                deadline, attempt.state
            ))),
        };

        if let Some(mut connection) = slot.take() {
            connection.close().await;
        }
        attempt.advance(if outcome.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        });
        outcome
    }

    async fn run_attempt(
        &self,
        attempt: &mut Attempt,
        slot: &mut Option<C::Connection>,
        endpoint: &DeviceEndpoint,
        command: &Command,
        frame: &[u8],
        read_timeout: Duration,
    ) -> Result<CommandResult, AttemptFailure> {
        attempt.advance(RequestState::Connecting);
        let connection = self
            .connector
            .open(endpoint, self.config.connect_timeout)
            .await
            .map_err(AttemptFailure::Connect)?;
        let connection = slot.insert(connection);

        attempt.advance(RequestState::Writing);
        connection
            .write(frame)
            .await
            .map_err(AttemptFailure::Write)?;

        let Some(kind) = command.query_kind() else {
            return Ok(CommandResult::Ack);
        };

        attempt.advance(RequestState::ReadingResponse);
        let line = match connection.read_line(read_timeout).await {
            Ok(line) => line,
            Err(TransportError::ReadTimeout) => {
                return Err(AttemptFailure::Timeout(format!(
                    "No {} response within {:?}.",
                    kind, read_timeout
                )))
            }
            Err(e) => return Err(AttemptFailure::Read(e.to_string())),
        };
        trace!("Received line '{}'.", line);

        match decode(kind, &line) {
            CommandResult::Failure {
                kind: FailureKind::ReadError,
                message,
            } => Err(AttemptFailure::Read(message)),
            CommandResult::Failure { message, .. } => Err(AttemptFailure::Decode(message)),
            result => Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use common::protocol::SensorKind;

    use super::*;
    use crate::externals::transport::mock::{MockConnector, Script, WireEvent};

    fn endpoint() -> DeviceEndpoint {
        DeviceEndpoint::new("192.168.200.122", 8080)
    }

    fn dispatcher(connector: &MockConnector) -> Dispatcher<MockConnector> {
        Dispatcher::new(connector.clone(), DispatcherConfig::default())
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_after(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_after(4), Duration::from_secs(1));
        assert_eq!(backoff.delay_after(40), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_set_color_is_one_connection_one_write_one_close() {
        let connector = MockConnector::new(Script::Silent);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::SetColor(Rgb::new(255, 0, 0)),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result, CommandResult::Ack);
        assert_eq!(
            connector.events(),
            vec![
                WireEvent::Connect {
                    connection: 0,
                    endpoint: "192.168.200.122:8080".into(),
                    accepted: true,
                },
                WireEvent::Write {
                    connection: 0,
                    bytes: b"255,0,0\n".to_vec(),
                },
                WireEvent::Close { connection: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_water_query_returns_reading() {
        let connector = MockConnector::new(Script::Reply("WATER:57".into()));
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Water),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result, CommandResult::WaterReading { percent_full: 57 });
        assert_eq!(connector.wire(), b"WATER?\n".to_vec());
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_connect_failure_uses_exact_budget() {
        let connector = MockConnector::new(Script::Refuse);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::SetServo { open: true },
                Duration::from_secs(2),
                4,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(connector.connect_attempts(), 4);
        assert_eq!(connector.accepted_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_connect_failure() {
        let connector = MockConnector::new(Script::Reply("PIR:VAR".into()));
        connector.push(Script::Refuse);
        connector.push(Script::Refuse);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Motion),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result, CommandResult::MotionReading { present: true });
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_retried_then_unreachable() {
        let connector = MockConnector::new(Script::BrokenPipe);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::SetPower { on: false },
                Duration::from_secs(2),
                2,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(connector.accepted_connections(), 2);
        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_retries_with_fresh_connections() {
        let connector = MockConnector::new(Script::Silent);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Gas),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(connector.accepted_connections(), 3);
        assert_eq!(connector.closes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_close_and_empty_line_are_read_errors() {
        let connector = MockConnector::new(Script::CloseEarly);
        connector.push(Script::Reply(String::new()));
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Gas),
                Duration::from_secs(2),
                2,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::ReadError));
        assert_eq!(connector.accepted_connections(), 2);
        assert_eq!(connector.closes(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_replayed() {
        let connector = MockConnector::new(Script::Reply("WATER:abc".into()));
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Water),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::DecodeError));
        assert_eq!(connector.accepted_connections(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_replayed_when_enabled() {
        let connector = MockConnector::new(Script::Reply("WATER:140".into()));
        let dispatcher = Dispatcher::new(
            connector.clone(),
            DispatcherConfig {
                retry_decode_errors: true,
                ..DispatcherConfig::default()
            },
        );

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::Query(SensorKind::Water),
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::DecodeError));
        assert_eq!(connector.accepted_connections(), 3);
    }

    #[tokio::test]
    async fn test_power_on_is_rejected_without_touching_the_network() {
        let connector = MockConnector::new(Script::Silent);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(
                &endpoint(),
                Command::SetPower { on: true },
                Duration::from_secs(2),
                3,
            )
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Unsupported));
        assert!(connector.events().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries_still_makes_one_attempt() {
        let connector = MockConnector::new(Script::Refuse);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(&endpoint(), Command::SetServo { open: false }, Duration::from_secs(2), 0)
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_read_hits_deadline_and_releases_the_lock() {
        let connector = MockConnector::new(Script::Reply("GAS:VAR".into()));
        connector.push(Script::Hang);
        connector.push(Script::Hang);
        let dispatcher = Arc::new(dispatcher(&connector));

        let hung = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(
                        &endpoint(),
                        Command::Query(SensorKind::Gas),
                        Duration::from_secs(2),
                        2,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let queued = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(
                        &endpoint(),
                        Command::Query(SensorKind::Gas),
                        Duration::from_secs(2),
                        1,
                    )
                    .await
            })
        };

        let hung = hung.await.expect("Hung task panicked.");
        assert_eq!(hung.failure_kind(), Some(FailureKind::Timeout));
        let queued = queued.await.expect("Queued task panicked.");
        assert_eq!(queued, CommandResult::GasReading { present: true });

        assert_eq!(connector.accepted_connections(), 3);
        assert_eq!(connector.closes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_connecting_is_unreachable() {
        let connector = MockConnector::new(Script::HangConnect);
        let dispatcher = dispatcher(&connector);

        let result = dispatcher
            .execute(&endpoint(), Command::SetServo { open: true }, Duration::from_secs(2), 1)
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(connector.accepted_connections(), 0);
        assert_eq!(connector.closes(), 0);

        connector.set_fallback(Script::Silent);
        let result = dispatcher
            .execute(&endpoint(), Command::SetServo { open: true }, Duration::from_secs(2), 1)
            .await;
        assert_eq!(result, CommandResult::Ack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_waiting_for_the_lock_never_runs() {
        let connector = MockConnector::new(Script::Silent);
        let dispatcher = Arc::new(dispatcher(&connector));
        let token = CancellationToken::new();

        let holder = {
            let dispatcher = dispatcher.clone();
            let token = token.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute_until_cancelled(
                        &endpoint(),
                        Command::Query(SensorKind::Gas),
                        Duration::from_secs(2),
                        1,
                        &token,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = {
            let dispatcher = dispatcher.clone();
            let token = token.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute_until_cancelled(
                        &endpoint(),
                        Command::Query(SensorKind::Motion),
                        Duration::from_secs(2),
                        1,
                        &token,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        // The holder already owned the lock, so it still finishes.
        let held = holder.await.expect("Holder panicked.");
        assert_eq!(held.map(|result| result.failure_kind()), Some(Some(FailureKind::Timeout)));
        assert_eq!(waiter.await.expect("Waiter panicked."), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.wire(), b"GAS?\n".to_vec());
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_interleave_on_the_wire() {
        let connector = MockConnector::new(Script::Reply("GAS:VAR".into())).chunked();
        let dispatcher = Arc::new(dispatcher(&connector));
        let endpoint = endpoint();

        let colour = {
            let dispatcher = dispatcher.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(
                        &endpoint,
                        Command::SetColor(Rgb::new(10, 20, 30)),
                        Duration::from_secs(2),
                        1,
                    )
                    .await
            })
        };
        let gas = {
            let dispatcher = dispatcher.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                dispatcher
                    .execute(
                        &endpoint,
                        Command::Query(SensorKind::Gas),
                        Duration::from_secs(2),
                        1,
                    )
                    .await
            })
        };

        let colour = colour.await.expect("Colour task panicked.");
        let gas = gas.await.expect("Gas task panicked.");
        assert_eq!(colour, CommandResult::Ack);
        assert_eq!(gas, CommandResult::GasReading { present: true });

        let wire = String::from_utf8(connector.wire()).expect("Wire is not utf8.");
        assert!(
            wire == "10,20,30\nGAS?\n" || wire == "GAS?\n10,20,30\n",
            "interleaved wire: {:?}",
            wire
        );

        // Every event of one connection happens before any event of the next.
        let mut finished: HashSet<usize> = HashSet::new();
        let mut current = None;
        for event in connector.events() {
            let connection = match event {
                WireEvent::Connect { connection, .. }
                | WireEvent::Write { connection, .. }
                | WireEvent::Read { connection }
                | WireEvent::Close { connection } => connection,
            };
            if current != Some(connection) {
                if let Some(previous) = current {
                    finished.insert(previous);
                }
                assert!(!finished.contains(&connection), "connection {} resumed", connection);
                current = Some(connection);
            }
        }
    }

    #[tokio::test]
    async fn test_many_callers_are_served_one_at_a_time() {
        let connector = MockConnector::new(Script::Silent).chunked();
        let dispatcher = Arc::new(dispatcher(&connector));

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .execute(
                            &endpoint(),
                            Command::SetColor(Rgb::new(i, i, i)),
                            Duration::from_secs(2),
                            1,
                        )
                        .await
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.expect("Task panicked."), CommandResult::Ack);
        }

        let wire = String::from_utf8(connector.wire()).expect("Wire is not utf8.");
        let mut lines: Vec<&str> = wire.lines().collect();
        assert_eq!(lines.len(), 8);
        lines.sort();
        let mut expected: Vec<String> = (0..8u8).map(|i| format!("{},{},{}", i, i, i)).collect();
        expected.sort();
        assert_eq!(lines, expected);
    }
}
