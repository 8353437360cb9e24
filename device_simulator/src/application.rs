use std::fmt::Display;

use common::{
    physical::Rgb,
    protocol::{SensorKind, GAS_PRESENT, MOTION_PRESENT, WATER_PREFIX},
};
use thiserror::Error;

use crate::sensors::SensorSource;

const GAS_ABSENT: &str = "GAS:YOK";
const MOTION_ABSENT: &str = "PIR:YOK";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("Unknown line '{0}'!")]
    UnknownLine(String),
}

/// Actuator state of the simulated controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub color: Rgb,
    pub powered: bool,
    pub servo_open: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            color: Rgb::new(0, 0, 0),
            powered: false,
            servo_open: false,
        }
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<DeviceState | powered:{}, color:{}, servo_open:{}>",
            self.powered, self.color, self.servo_open
        )
    }
}

/// Line handling of the firmware: every write line updates `state`, every
/// query line produces exactly one response line (without terminator).
pub struct Application<S: SensorSource> {
    pub state: DeviceState,
    sensors: S,
}

impl<S: SensorSource> Application<S> {
    pub fn new(sensors: S) -> Self {
        Self {
            state: DeviceState::default(),
            sensors,
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Result<Option<String>, ApplicationError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(kind) = SensorKind::from_query_line(line) {
            return Ok(Some(self.respond(kind)));
        }

        match line {
            "OFF" => self.state.powered = false,
            "SERVO:OPEN" => self.state.servo_open = true,
            "SERVO:CLOSE" => self.state.servo_open = false,
            _ => {
                let color = parse_color(line)
                    .ok_or_else(|| ApplicationError::UnknownLine(line.to_string()))?;
                self.state.color = color;
                self.state.powered = true;
            }
        }
        Ok(None)
    }

    fn respond(&mut self, kind: SensorKind) -> String {
        match kind {
            SensorKind::Gas if self.sensors.gas_present() => GAS_PRESENT.to_string(),
            SensorKind::Gas => GAS_ABSENT.to_string(),
            SensorKind::Water => format!("{}{}", WATER_PREFIX, self.sensors.water_level().value()),
            SensorKind::Motion if self.sensors.motion_present() => MOTION_PRESENT.to_string(),
            SensorKind::Motion => MOTION_ABSENT.to_string(),
        }
    }
}

/// `r,g,b` with decimal components in 0-255.
fn parse_color(line: &str) -> Option<Rgb> {
    let mut parts = line.split(',');
    let mut component = || parts.next()?.trim().parse::<i32>().ok();
    let rgb = (component()?, component()?, component()?);
    if parts.next().is_some() {
        return None;
    }
    Rgb::try_from(rgb).ok()
}
