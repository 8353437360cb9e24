use std::{collections::HashMap, sync::Arc, time::Duration};

use common::protocol::SensorKind;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    dispatcher::Dispatcher,
    externals::transport::Connector,
    models::{command_result::CommandResult, endpoint::DeviceEndpoint, poll_snapshot::PollSnapshot},
};

const MAILBOX_CAPACITY: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerError {
    #[error("Poller is not running!")]
    Stopped,

    #[error("Poll interval must be greater than zero!")]
    InvalidInterval,
}

/// One observer of a sensor kind. Dropping it does not unsubscribe; pass it
/// to [`TelemetryPoller::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    kind: SensorKind,
    receiver: watch::Receiver<PollSnapshot>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.receiver.borrow().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<PollSnapshot> {
        self.receiver.clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<PollSnapshot, PollerError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| PollerError::Stopped)?;
        Ok(self.receiver.borrow_and_update().clone())
    }
}

enum Request {
    Subscribe {
        kind: SensorKind,
        interval: Duration,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe {
        id: u64,
        kind: SensorKind,
        reply: oneshot::Sender<bool>,
    },
}

/// Result of one poll, tagged with the lifecycle of the kind that issued it.
#[derive(Debug)]
struct PollOutcome {
    kind: SensorKind,
    epoch: u64,
    result: CommandResult,
}

/// Client side of the poller. Cheap to clone; every clone talks to the same
/// actor.
#[derive(Clone)]
pub struct TelemetryPoller {
    tx: mpsc::Sender<Request>,
    token: CancellationToken,
}

impl TelemetryPoller {
    /// Start the poller actor on `tracker`. It stops when `token` is
    /// cancelled, when [`TelemetryPoller::shutdown`] is called, or when every
    /// clone of the returned poller is dropped.
    pub fn spawn<C: Connector>(
        dispatcher: Arc<Dispatcher<C>>,
        endpoint: DeviceEndpoint,
        tracker: &TaskTracker,
        token: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let token = token.child_token();
        let (tx_outcomes, rx_outcomes) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = PollerActor {
            dispatcher,
            endpoint,
            tracker: tracker.clone(),
            token: token.clone(),
            tx_outcomes,
            kinds: HashMap::new(),
            next_id: 0,
            next_epoch: 0,
        };
        tracker.spawn(task_poller_actor(actor, rx, rx_outcomes));

        Self { tx, token }
    }

    /// Start observing `kind`. The kind is polled at the shortest interval
    /// any of its subscribers asked for.
    pub async fn subscribe(
        &self,
        kind: SensorKind,
        interval: Duration,
    ) -> Result<SubscriptionHandle, PollerError> {
        if interval.is_zero() {
            return Err(PollerError::InvalidInterval);
        }
        let (reply, rx_reply) = oneshot::channel();
        self.tx
            .send(Request::Subscribe {
                kind,
                interval,
                reply,
            })
            .await
            .map_err(|_| PollerError::Stopped)?;
        rx_reply.await.map_err(|_| PollerError::Stopped)
    }

    /// Stop observing. Once this returns no new poll is started on behalf of
    /// `handle`; a poll already in flight finishes and its result is dropped
    /// if nobody observes the kind anymore.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), PollerError> {
        let (reply, rx_reply) = oneshot::channel();
        self.tx
            .send(Request::Unsubscribe {
                id: handle.id,
                kind: handle.kind,
                reply,
            })
            .await
            .map_err(|_| PollerError::Stopped)?;
        if !rx_reply.await.map_err(|_| PollerError::Stopped)? {
            warn!("Subscription {} for {} was not registered.", handle.id, handle.kind);
        }
        Ok(())
    }

    /// Cancel every timer and stop the actor.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// Per kind registry entry. Exists while the kind has at least one subscriber.
struct KindEntry {
    epoch: u64,
    subscribers: HashMap<u64, Duration>,
    interval: Duration,
    timer: CancellationToken,
    tx_snapshot: watch::Sender<PollSnapshot>,
}

impl KindEntry {
    fn shortest_interval(&self) -> Option<Duration> {
        self.subscribers.values().min().copied()
    }
}

struct PollerActor<C: Connector> {
    dispatcher: Arc<Dispatcher<C>>,
    endpoint: DeviceEndpoint,
    tracker: TaskTracker,
    token: CancellationToken,
    tx_outcomes: mpsc::Sender<PollOutcome>,
    kinds: HashMap<SensorKind, KindEntry>,
    next_id: u64,
    next_epoch: u64,
}

impl<C: Connector> PollerActor<C> {
    fn subscribe(&mut self, kind: SensorKind, interval: Duration) -> SubscriptionHandle {
        let id = self.next_id;
        self.next_id += 1;

        let receiver = match self.kinds.get_mut(&kind) {
            Some(entry) => {
                entry.subscribers.insert(id, interval);
                let receiver = entry.tx_snapshot.subscribe();
                self.rearm_if_needed(kind);
                receiver
            }
            None => {
                let epoch = self.next_epoch;
                self.next_epoch += 1;
                let (tx_snapshot, receiver) = watch::channel(PollSnapshot::new(kind, interval));
                let timer = self.arm(kind, epoch, interval);
                self.kinds.insert(
                    kind,
                    KindEntry {
                        epoch,
                        subscribers: HashMap::from([(id, interval)]),
                        interval,
                        timer,
                        tx_snapshot,
                    },
                );
                info!("Polling {} every {:?}.", kind, interval);
                receiver
            }
        };

        SubscriptionHandle { id, kind, receiver }
    }

    fn unsubscribe(&mut self, id: u64, kind: SensorKind) -> bool {
        let Some(entry) = self.kinds.get_mut(&kind) else {
            return false;
        };
        if entry.subscribers.remove(&id).is_none() {
            return false;
        }

        if entry.subscribers.is_empty() {
            if let Some(entry) = self.kinds.remove(&kind) {
                entry.timer.cancel();
                info!("Stopped polling {}.", kind);
            }
        } else {
            self.rearm_if_needed(kind);
        }
        true
    }

    /// Restart the kind's timer when the shortest requested interval moved.
    fn rearm_if_needed(&mut self, kind: SensorKind) {
        let Some(entry) = self.kinds.get(&kind) else {
            return;
        };
        let Some(shortest) = entry.shortest_interval() else {
            return;
        };
        if shortest == entry.interval {
            return;
        }

        let epoch = entry.epoch;
        entry.timer.cancel();
        let timer = self.arm(kind, epoch, shortest);
        if let Some(entry) = self.kinds.get_mut(&kind) {
            entry.timer = timer;
            entry.interval = shortest;
            entry
                .tx_snapshot
                .send_modify(|snapshot| snapshot.interval = shortest);
            debug!("Polling {} every {:?} now.", kind, shortest);
        }
    }

    fn arm(&self, kind: SensorKind, epoch: u64, interval: Duration) -> CancellationToken {
        let timer = self.token.child_token();
        self.tracker.spawn(task_poll_sensor(
            timer.clone(),
            self.dispatcher.clone(),
            self.endpoint.clone(),
            kind,
            epoch,
            interval,
            self.tx_outcomes.clone(),
        ));
        timer
    }

    fn apply(&mut self, outcome: PollOutcome) {
        let Some(entry) = self.kinds.get(&outcome.kind) else {
            trace!("Dropping {} result, nobody observes it.", outcome.kind);
            return;
        };
        if entry.epoch != outcome.epoch {
            trace!("Dropping {} result from an earlier subscription.", outcome.kind);
            return;
        }

        match outcome.result.reading() {
            Some(reading) => {
                let at = Instant::now();
                entry
                    .tx_snapshot
                    .send_modify(|snapshot| snapshot.record_success(reading, at));
            }
            None => {
                warn!(
                    "Poll of {} failed, keeping last value. Result: {}",
                    outcome.kind, outcome.result
                );
                entry.tx_snapshot.send_modify(PollSnapshot::record_failure);
            }
        }
    }
}

/// Task: Own the subscription registry. Only this task mutates it; clients
/// reach it through the mailbox and timers report back through `rx_outcomes`.
#[tracing::instrument(skip_all)]
async fn task_poller_actor<C: Connector>(
    mut actor: PollerActor<C>,
    mut rx_requests: mpsc::Receiver<Request>,
    mut rx_outcomes: mpsc::Receiver<PollOutcome>,
) {
    info!("Started.");
    loop {
        tokio::select! {
            biased;
            _ = actor.token.cancelled() => {
                warn!("Cancelled.");
                break;
            },
            request = rx_requests.recv() => {
                let Some(request) = request else {
                    debug!("All poller handles dropped.");
                    break;
                };
                match request {
                    Request::Subscribe { kind, interval, reply } => {
                        let handle = actor.subscribe(kind, interval);
                        if reply.send(handle).is_err() {
                            error!("Failed to hand out subscription for {}.", kind);
                        }
                    }
                    Request::Unsubscribe { id, kind, reply } => {
                        let removed = actor.unsubscribe(id, kind);
                        if reply.send(removed).is_err() {
                            trace!("Unsubscribe caller went away.");
                        }
                    }
                }
            },
            Some(outcome) = rx_outcomes.recv() => {
                actor.apply(outcome);
            }
        }
    }

    for (_, entry) in actor.kinds.drain() {
        entry.timer.cancel();
    }
    actor.token.cancel();
}

/// Task: Query one sensor kind on every tick until cancelled. A failed poll
/// never stops the cadence.
#[instrument(skip_all, fields(kind = %kind))]
async fn task_poll_sensor<C: Connector>(
    token: CancellationToken,
    dispatcher: Arc<Dispatcher<C>>,
    endpoint: DeviceEndpoint,
    kind: SensorKind,
    epoch: u64,
    period: Duration,
    tx_outcomes: mpsc::Sender<PollOutcome>,
) {
    info!("Started.");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!("Cancelled.");
                break;
            },
            _ = interval.tick() => {}
        }

        // Unsubscribing cancels a poll still queued behind other requests.
        let Some(result) = dispatcher.query_until_cancelled(&endpoint, kind, &token).await else {
            warn!("Cancelled.");
            break;
        };
        trace!("Polled {}. Result: {}", kind, result);
        if let Err(e) = tx_outcomes.send(PollOutcome { kind, epoch, result }).await {
            debug!("Poller actor is gone. Error: {}", e);
            break;
        }
    }
}
