use futures::{stream::select_all, StreamExt};
use tokio::sync::{broadcast::Receiver, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::{device_state_event::DeviceStateEvent, poll_snapshot::PollSnapshot};

/// Task: Log every published snapshot and every acknowledged device state
/// change until cancelled.
#[tracing::instrument(skip_all)]
pub async fn task_telemetry_logging(
    token: CancellationToken,
    rx_snapshots: Vec<watch::Receiver<PollSnapshot>>,
    mut rx_device_state: Receiver<DeviceStateEvent>,
) {
    info!("Started.");
    let mut snapshots = select_all(rx_snapshots.into_iter().map(WatchStream::from_changes));

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                warn!("Cancelled.");
                break;
            },
            Some(snapshot) = snapshots.next() => {
                if snapshot.stale {
                    warn!("Got stale snapshot: {}", snapshot);
                } else {
                    info!("Got snapshot: {}", snapshot);
                }
            },
            Ok(event) = rx_device_state.recv() => {
                info!("Got device state event: {}", event);
            }
        };
    }
}
