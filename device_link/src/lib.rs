//! Host side link to the home automation controller: a per endpoint request
//! dispatcher over short lived TCP connections and a telemetry poller on top.

pub mod codec;
pub mod controls;
pub mod dispatcher;
pub mod externals;
pub mod models;
pub mod settings;
pub mod tasks;
