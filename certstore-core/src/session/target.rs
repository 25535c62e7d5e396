use std::time::Duration;

use crate::config::{AuthScheme, StoreConfig, SPN_SERVICE_CLASS, WINRM_HTTP_PORT, WSMAN_PATH};

/// Connection parameters derived from the host address and store config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    /// Service principal presented during authentication.
    pub spn: String,
    pub auth_scheme: AuthScheme,
    pub timeout: Option<Duration>,
}

impl ConnectionTarget {
    pub fn new(host: &str, config: &StoreConfig) -> Self {
        let host = host.trim().to_string();
        let port = WINRM_HTTP_PORT;

        let spn = if config.include_port_in_spn {
            format!("{}/{}:{}", SPN_SERVICE_CLASS, host, port)
        } else {
            format!("{}/{}", SPN_SERVICE_CLASS, host)
        };

        Self {
            endpoint: format!("http://{}:{}/{}", host, port, WSMAN_PATH),
            host,
            port,
            spn,
            auth_scheme: config.auth_scheme,
            timeout: config.timeout,
        }
    }
}
