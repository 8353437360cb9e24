use std::{io::BufRead, sync::Arc, time::Duration};

use anyhow::Result;
use common::protocol::SensorKind;
use device_link::{
    controls::LightController,
    dispatcher::Dispatcher,
    externals::{event_logging::task::task_telemetry_logging, transport::tcp::TcpConnector},
    settings::Settings,
    tasks::{console::task_console, poller::TelemetryPoller},
};
use tokio::{
    signal,
    sync::{broadcast, mpsc},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A path given on the command line wins over DEVICE_LINK_CONFIG.
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_path(path)?,
        None => Settings::new()?,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
        EnvFilter::new(format!("{}={}", app_name, settings.logger.level))
    });
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    let tracker = TaskTracker::new();

    let token = CancellationToken::new();

    let endpoint = settings.endpoint();
    info!("Linking to device at {}.", endpoint);
    let dispatcher = Arc::new(Dispatcher::new(
        TcpConnector::default(),
        settings.dispatcher_config(),
    ));

    let (tx_device_state, rx_device_state) = broadcast::channel(32);
    let light = Arc::new(LightController::new(
        dispatcher.clone(),
        endpoint.clone(),
        settings.default_color(),
        tx_device_state,
    ));

    let poller = TelemetryPoller::spawn(dispatcher.clone(), endpoint.clone(), &tracker, token.clone());

    let mut subscriptions = vec![
        (SensorKind::Water, settings.poller.water_interval_ms),
        (SensorKind::Motion, settings.poller.motion_interval_ms),
    ];
    if let Some(gas_interval_ms) = settings.poller.gas_interval_ms {
        subscriptions.push((SensorKind::Gas, gas_interval_ms));
    }
    let mut handles = vec![];
    for (kind, interval_ms) in subscriptions {
        handles.push(
            poller
                .subscribe(kind, Duration::from_millis(interval_ms))
                .await?,
        );
    }

    let token_clone = token.clone();
    let rx_snapshots: Vec<_> = handles.iter().map(|handle| handle.receiver()).collect();
    tracker.spawn(async {
        task_telemetry_logging(token_clone, rx_snapshots, rx_device_state).await
    });

    // Blocking stdin reads live on a plain thread so they never hold up
    // runtime shutdown.
    let (tx_lines, rx_lines) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx_lines.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let token_clone = token.clone();
    let dispatcher_clone = dispatcher.clone();
    let endpoint_clone = endpoint.clone();
    tracker.spawn(async {
        task_console(token_clone, rx_lines, light, dispatcher_clone, endpoint_clone).await
    });

    let token_clone = token.clone();

    tokio::select! {
        _ = token_clone.cancelled() => {}
        res = signal::ctrl_c() => {
            match res {
                Ok(_) => {
                    info!("Shutting down.");
                    token.cancel();
                },
                Err(e) => {
                    tracing::error!("Failed to listen for ctrl_c. Error: {}", e);
                    token.cancel();
                }
            };
        },
    }

    poller.shutdown();
    drop(handles);

    tracker.close();
    tracker.wait().await;

    Ok(())
}
