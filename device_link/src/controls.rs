use std::sync::Arc;

use common::{physical::Rgb, protocol::Command};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, instrument, trace, warn};

use crate::{
    dispatcher::Dispatcher,
    externals::transport::Connector,
    models::{
        command_result::{CommandResult, FailureKind},
        device_state_event::DeviceStateEvent,
        endpoint::DeviceEndpoint,
    },
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LightError {
    /// Colour changes are dropped while the light is off.
    #[error("Light is powered off!")]
    PoweredOff,

    #[error("Device rejected light command ({kind}). Error: {message}")]
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy)]
struct LightState {
    powered: bool,
    last_color: Option<Rgb>,
}

/// Owns the light's power flag and last colour. There is no "ON" line on the
/// wire, so switching on replays the last colour, or `default_color` if none
/// was ever sent.
pub struct LightController<C: Connector> {
    dispatcher: Arc<Dispatcher<C>>,
    endpoint: DeviceEndpoint,
    default_color: Rgb,
    state: Mutex<LightState>,
    tx_state: broadcast::Sender<DeviceStateEvent>,
}

impl<C: Connector> LightController<C> {
    pub fn new(
        dispatcher: Arc<Dispatcher<C>>,
        endpoint: DeviceEndpoint,
        default_color: Rgb,
        tx_state: broadcast::Sender<DeviceStateEvent>,
    ) -> Self {
        Self {
            dispatcher,
            endpoint,
            default_color,
            state: Mutex::new(LightState {
                powered: false,
                last_color: None,
            }),
            tx_state,
        }
    }

    pub async fn is_powered(&self) -> bool {
        self.state.lock().await.powered
    }

    pub async fn last_color(&self) -> Option<Rgb> {
        self.state.lock().await.last_color
    }

    /// The power flag only changes once the device acknowledged the write.
    #[instrument(skip(self))]
    pub async fn set_power(&self, on: bool) -> Result<(), LightError> {
        let mut state = self.state.lock().await;

        if !on {
            let result = self
                .dispatcher
                .send(&self.endpoint, Command::SetPower { on: false })
                .await;
            into_ack(result)?;
            state.powered = false;
            self.publish(DeviceStateEvent::LightPower { on: false });
            return Ok(());
        }

        let color = state.last_color.unwrap_or(self.default_color);
        trace!("Switching on with {}.", color);
        let result = self
            .dispatcher
            .send(&self.endpoint, Command::SetColor(color))
            .await;
        into_ack(result)?;
        state.powered = true;
        state.last_color = Some(color);
        self.publish(DeviceStateEvent::LightPower { on: true });
        self.publish(DeviceStateEvent::LightColor(color));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_color(&self, color: Rgb) -> Result<(), LightError> {
        let mut state = self.state.lock().await;
        if !state.powered {
            debug!("Dropping colour change while powered off.");
            return Err(LightError::PoweredOff);
        }

        let result = self
            .dispatcher
            .send(&self.endpoint, Command::SetColor(color))
            .await;
        into_ack(result)?;
        state.last_color = Some(color);
        self.publish(DeviceStateEvent::LightColor(color));
        Ok(())
    }

    /// Colour picker input, each component in `0.0..=1.0`.
    pub async fn set_color_from_unit(&self, r: f32, g: f32, b: f32) -> Result<(), LightError> {
        self.set_color(Rgb::from_unit_floats(r, g, b)).await
    }

    /// One-shot servo write, published like the light changes.
    #[instrument(skip(self))]
    pub async fn set_servo(&self, open: bool) -> Result<(), LightError> {
        let result = self.dispatcher.set_servo(&self.endpoint, open).await;
        into_ack(result)?;
        self.publish(DeviceStateEvent::Servo { open });
        Ok(())
    }

    fn publish(&self, event: DeviceStateEvent) {
        // No receivers is fine, nothing mirrors the state yet.
        if let Err(e) = self.tx_state.send(event) {
            trace!("No one is listening for state events. Error: {}", e);
        } else {
            debug!("Published {}.", event);
        }
    }
}

fn into_ack(result: CommandResult) -> Result<(), LightError> {
    match result {
        CommandResult::Ack => Ok(()),
        CommandResult::Failure { kind, message } => {
            warn!("Light command failed. Error: {}", message);
            Err(LightError::Failed { kind, message })
        }
        other => Err(LightError::Failed {
            kind: FailureKind::DecodeError,
            message: format!("Unexpected response to a write: {}", other),
        }),
    }
}
