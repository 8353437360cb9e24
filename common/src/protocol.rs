use core::fmt::{Display, Write};

use heapless::String;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::physical::{Percentage, Rgb};

/// Capacity of an encoded frame. The longest frames the host sends,
/// `255,255,255\n` and `SERVO:CLOSE\n`, are 12 bytes.
pub const MAX_FRAME_LEN: usize = 16;

/// One encoded line, terminator included.
pub type Frame = String<MAX_FRAME_LEN>;

/// Exact response meaning "gas detected".
pub const GAS_PRESENT: &str = "GAS:VAR";

/// Exact response meaning "motion detected".
pub const MOTION_PRESENT: &str = "PIR:VAR";

/// Prefix of every water level response, followed by the percentage.
pub const WATER_PREFIX: &str = "WATER:";

/// Sensors the controller can be queried for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    Gas,
    Water,
    Motion,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [SensorKind::Gas, SensorKind::Water, SensorKind::Motion];

    /// The query line for this sensor, without its terminator.
    pub fn query_line(&self) -> &'static str {
        match self {
            SensorKind::Gas => "GAS?",
            SensorKind::Water => "WATER?",
            SensorKind::Motion => "PIR?",
        }
    }

    /// Inverse of [`SensorKind::query_line`].
    pub fn from_query_line(line: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.query_line() == line)
    }
}

impl Display for SensorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorKind::Gas => write!(f, "gas"),
            SensorKind::Water => write!(f, "water"),
            SensorKind::Motion => write!(f, "motion"),
        }
    }
}

/// High level intents sent to the controller.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Drive the addressable light with a colour.
    SetColor(Rgb),

    /// Switch the addressable light. The firmware only understands "off";
    /// turning the light on is done by sending a colour.
    SetPower { on: bool },

    /// Open or close the servo driven door.
    SetServo { open: bool },

    /// Ask for a single sensor value. The only command with a response line.
    Query(SensorKind),
}

impl Command {
    /// The sensor this command queries, if it is a query.
    pub fn query_kind(&self) -> Option<SensorKind> {
        match self {
            Command::Query(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_query(&self) -> bool {
        self.query_kind().is_some()
    }
}

/// Represents errors in encoding a `Command` into a frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// There is no "ON" line in the firmware protocol. Power on is achieved
    /// by sending a colour.
    #[error("Power on has no wire form, send a colour instead!")]
    PowerOnHasNoWireForm,

    /// The frame did not fit in `MAX_FRAME_LEN` bytes.
    #[error("Encoded frame does not fit in the frame buffer!")]
    FrameOverflow,
}

/// Encode a command into the line based text protocol, terminator included.
///
/// ```
/// use common::{physical::Rgb, protocol::{encode, Command}};
/// let frame = encode(&Command::SetColor(Rgb::new(255, 0, 0))).expect("Failed to encode.");
/// assert_eq!(frame.as_str(), "255,0,0\n");
/// ```
pub fn encode(command: &Command) -> Result<Frame, EncodeError> {
    let mut frame = Frame::new();
    let written = match command {
        Command::SetColor(rgb) => writeln!(frame, "{},{},{}", rgb.r, rgb.g, rgb.b),
        Command::SetPower { on: false } => writeln!(frame, "OFF"),
        Command::SetPower { on: true } => return Err(EncodeError::PowerOnHasNoWireForm),
        Command::SetServo { open: true } => writeln!(frame, "SERVO:OPEN"),
        Command::SetServo { open: false } => writeln!(frame, "SERVO:CLOSE"),
        Command::Query(kind) => writeln!(frame, "{}", kind.query_line()),
    };
    written.map_err(|_| EncodeError::FrameOverflow)?;
    Ok(frame)
}

/// A decoded sensor value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Gas { present: bool },
    Water { percent_full: Percentage },
    Motion { present: bool },
}

impl Reading {
    pub fn kind(&self) -> SensorKind {
        match self {
            Reading::Gas { .. } => SensorKind::Gas,
            Reading::Water { .. } => SensorKind::Water,
            Reading::Motion { .. } => SensorKind::Motion,
        }
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Reading::Gas { present } => write!(f, "<Gas | present:{}>", present),
            Reading::Water { percent_full } => write!(f, "<Water | {}>", percent_full),
            Reading::Motion { present } => write!(f, "<Motion | present:{}>", present),
        }
    }
}

/// Represents errors in parsing a response line.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing but a terminator arrived.
    #[error("Response line was empty!")]
    EmptyLine,

    /// The line does not start with the prefix expected for the sensor.
    #[error("Response line is missing the expected prefix!")]
    MissingPrefix,

    /// The value after the prefix is not an integer.
    #[error("Response value is not an integer!")]
    NotANumber,

    /// The value parsed but is outside of 0-100.
    #[error("Response value {0} outside of valid range!")]
    OutOfRange(i64),
}

impl DecodeError {
    /// True when the line arrived but its content is wrong, as opposed to no
    /// content arriving at all.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::EmptyLine)
    }
}

/// Parse a single response line for a query of `kind`.
/// A trailing `\n` or `\r\n` is ignored. Water values are never coerced: a
/// malformed or out of range value is an error.
pub fn parse_response(kind: SensorKind, line: &str) -> Result<Reading, DecodeError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Err(DecodeError::EmptyLine);
    }

    match kind {
        SensorKind::Gas => Ok(Reading::Gas {
            present: line == GAS_PRESENT,
        }),
        SensorKind::Motion => Ok(Reading::Motion {
            present: line == MOTION_PRESENT,
        }),
        SensorKind::Water => {
            let raw = line
                .strip_prefix(WATER_PREFIX)
                .ok_or(DecodeError::MissingPrefix)?;
            // Only `-?[0-9]+`; `i64::from_str` would also take a leading `+`.
            let digits = raw.strip_prefix('-').unwrap_or(raw);
            if !digits.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(DecodeError::NotANumber);
            }
            let value: i64 = raw.parse().map_err(|_| DecodeError::NotANumber)?;
            let percent_full =
                Percentage::try_from(value).map_err(|_| DecodeError::OutOfRange(value))?;
            Ok(Reading::Water { percent_full })
        }
    }
}
