pub mod command_result;
pub mod device_state_event;
pub mod endpoint;
pub mod poll_snapshot;
