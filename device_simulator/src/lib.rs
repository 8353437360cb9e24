//! Stand-in for the home automation controller: speaks the same line
//! protocol over TCP, one request per connection.

pub mod application;
pub mod sensors;
pub mod server;
