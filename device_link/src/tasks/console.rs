use std::sync::Arc;

use common::{physical::Rgb, protocol::SensorKind};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    controls::LightController, dispatcher::Dispatcher, externals::transport::Connector,
    models::endpoint::DeviceEndpoint,
};

/// Operator input, one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Power(bool),
    Color(Rgb),
    Servo(bool),
    Query(SensorKind),
}

impl ConsoleCommand {
    /// `on`, `off`, `color <r> <g> <b>`, `servo open|close`, `gas`, `water`
    /// or `motion`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()? {
            "on" => ConsoleCommand::Power(true),
            "off" => ConsoleCommand::Power(false),
            "color" => {
                let mut component = || words.next()?.parse::<i32>().ok();
                let rgb = (component()?, component()?, component()?);
                ConsoleCommand::Color(Rgb::try_from(rgb).ok()?)
            }
            "servo" => match words.next()? {
                "open" => ConsoleCommand::Servo(true),
                "close" => ConsoleCommand::Servo(false),
                _ => return None,
            },
            "gas" => ConsoleCommand::Query(SensorKind::Gas),
            "water" => ConsoleCommand::Query(SensorKind::Water),
            "motion" => ConsoleCommand::Query(SensorKind::Motion),
            _ => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

/// Task: Run operator commands received on `rx_lines` against the device
/// until cancelled or the input ends.
#[tracing::instrument(skip_all)]
pub async fn task_console<C: Connector>(
    token: CancellationToken,
    mut rx_lines: Receiver<String>,
    light: Arc<LightController<C>>,
    dispatcher: Arc<Dispatcher<C>>,
    endpoint: DeviceEndpoint,
) {
    info!("Started.");

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => {
                warn!("Cancelled.");
                break;
            },
            line = rx_lines.recv() => line,
        };
        let Some(line) = line else {
            info!("Input closed.");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = ConsoleCommand::parse(&line) else {
            warn!("Unknown command '{}'.", line.trim());
            continue;
        };
        let outcome = match command {
            ConsoleCommand::Power(on) => light.set_power(on).await.map(|_| "ok".to_string()),
            ConsoleCommand::Color(color) => light.set_color(color).await.map(|_| "ok".to_string()),
            ConsoleCommand::Servo(open) => light.set_servo(open).await.map(|_| "ok".to_string()),
            ConsoleCommand::Query(kind) => Ok(dispatcher.query(&endpoint, kind).await.to_string()),
        };
        match outcome {
            Ok(message) => info!("{:?}: {}", command, message),
            Err(e) => warn!("{:?} failed. Error: {}", command, e),
        }
    }
}
