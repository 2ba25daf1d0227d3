//! Client configuration.

use std::time::Duration;

use bytes::Bytes;

use crate::cip::ConnectionParameters;
use crate::core::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

/// Settings shared by [`EipClient`](super::EipClient) and
/// [`ModbusClient`](super::ModbusClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on TCP connect, session registration and Forward Open.
    pub connect_timeout: Duration,

    /// Per-request timeout; `None` waits until the chain goes away.
    pub request_timeout: Option<Duration>,

    /// Forward Open parameters.
    pub connection: ConnectionParameters,

    /// Modbus unit id.
    pub unit_id: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            connection: ConnectionParameters::default(),
            unit_id: 1,
        }
    }
}

impl ClientConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Let requests wait without a deadline.
    pub fn no_request_timeout(mut self) -> Self {
        self.config.request_timeout = None;
        self
    }

    /// Replace the Forward Open parameters.
    pub fn connection(mut self, connection: ConnectionParameters) -> Self {
        self.config.connection = connection;
        self
    }

    /// Set the route path to the target.
    pub fn route_path(mut self, path: impl Into<Bytes>) -> Self {
        self.config.connection.route_path = path.into();
        self
    }

    /// Set the requested packet interval in microseconds.
    pub fn rpi(mut self, rpi_us: u32) -> Self {
        self.config.connection.rpi_us = rpi_us;
        self
    }

    /// Set the maximum connection size in bytes.
    pub fn max_connection_size(mut self, size: u16) -> Self {
        self.config.connection.max_size = size;
        self
    }

    /// Set the Modbus unit id.
    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.config.unit_id = unit_id;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.connection.max_size, 500);
        assert_eq!(config.unit_id, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::builder()
            .connect_timeout(Duration::from_secs(2))
            .no_request_timeout()
            .route_path(vec![0x01, 0x00])
            .rpi(500_000)
            .max_connection_size(4000)
            .unit_id(17)
            .build();

        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.connection.route_path.as_ref(), &[0x01, 0x00]);
        assert_eq!(config.connection.rpi_us, 500_000);
        assert!(config.connection.network_parameters(4000).is_large());
        assert_eq!(config.unit_id, 17);
    }
}
