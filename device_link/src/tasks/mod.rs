pub mod console;
pub mod poller;
