use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Network identity of the embedded controller. Configured statically, there
/// is no discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display(fmt = "{}:{}", host, port)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}
