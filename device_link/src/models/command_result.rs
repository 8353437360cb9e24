use std::fmt::Display;

use common::{physical::Percentage, protocol::Reading};

/// Why a request ended without a usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connecting or writing kept failing until the retry budget ran out.
    Unreachable,

    /// No response line arrived within the read timeout.
    Timeout,

    /// The connection produced an empty line or closed before a line.
    ReadError,

    /// A line arrived but does not match the expected grammar.
    DecodeError,

    /// The command cannot be expressed on the wire. Nothing was sent.
    Unsupported,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Unreachable => "unreachable",
            FailureKind::Timeout => "timeout",
            FailureKind::ReadError => "read error",
            FailureKind::DecodeError => "decode error",
            FailureKind::Unsupported => "unsupported",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a single dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// A write command was written and flushed. The device sends nothing back.
    Ack,
    GasReading { present: bool },
    WaterReading { percent_full: u8 },
    MotionReading { present: bool },
    Failure { kind: FailureKind, message: String },
}

impl CommandResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        CommandResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, CommandResult::Failure { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CommandResult::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The sensor reading carried by this result, if any.
    pub fn reading(&self) -> Option<Reading> {
        match self {
            CommandResult::GasReading { present } => Some(Reading::Gas { present: *present }),
            CommandResult::MotionReading { present } => {
                Some(Reading::Motion { present: *present })
            }
            CommandResult::WaterReading { percent_full } => Percentage::try_from(*percent_full)
                .ok()
                .map(|percent_full| Reading::Water { percent_full }),
            CommandResult::Ack | CommandResult::Failure { .. } => None,
        }
    }
}

impl From<Reading> for CommandResult {
    fn from(value: Reading) -> Self {
        match value {
            Reading::Gas { present } => CommandResult::GasReading { present },
            Reading::Water { percent_full } => CommandResult::WaterReading {
                percent_full: percent_full.value(),
            },
            Reading::Motion { present } => CommandResult::MotionReading { present },
        }
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandResult::Ack => write!(f, "<Ack>"),
            CommandResult::GasReading { present } => write!(f, "<Gas | present:{}>", present),
            CommandResult::WaterReading { percent_full } => {
                write!(f, "<Water | {}% full>", percent_full)
            }
            CommandResult::MotionReading { present } => {
                write!(f, "<Motion | present:{}>", present)
            }
            CommandResult::Failure { kind, message } => {
                write!(f, "<Failure | {}: {}>", kind, message)
            }
        }
    }
}
