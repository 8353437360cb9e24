pub mod event_logging;
pub mod transport;
