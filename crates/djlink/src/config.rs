// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database client configuration.

use std::time::Duration;

use crate::protocol::QUERY_PORT_SERVICE;

/// Configuration for the database client worker.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device number this client announces in queries. 0 is accepted by
    /// every known device.
    pub own_device_number: u8,

    /// TCP port of the query-port directory service on each device.
    pub query_port_service: u16,

    /// Receive buffer requested for query sockets. Render replies for large
    /// menus arrive in bursts well past the platform default.
    pub recv_buffer_size: usize,

    /// Connection timeout for the directory probe and the query socket.
    pub connect_timeout: Duration,

    /// Read timeout on the query socket; one expiry counts as one receive
    /// attempt against the retry budgets.
    pub read_timeout: Duration,

    /// How long the worker waits on an empty queue before running the idle
    /// connection sweep.
    pub pop_timeout: Duration,

    /// Idle sweeps a connection survives without being used.
    pub connection_ttl_ticks: u32,

    /// Receive attempts for a single reply message.
    pub message_recv_tries: u32,

    /// Receive attempts for a render reply stream.
    pub render_recv_tries: u32,

    /// Pause after deferring a request against a device that is mid-load.
    pub defer_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            own_device_number: 0,
            query_port_service: QUERY_PORT_SERVICE,
            recv_buffer_size: 64 * 1024,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(1),
            pop_timeout: Duration::from_secs(1),
            connection_ttl_ticks: 30,
            message_recv_tries: 30,
            render_recv_tries: 40,
            defer_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Builder: set the announced device number.
    pub fn with_own_device_number(mut self, number: u8) -> Self {
        self.own_device_number = number;
        self
    }

    /// Builder: set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the queue pop timeout (and thus the sweep cadence).
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Builder: set the directory service port.
    pub fn with_query_port_service(mut self, port: u16) -> Self {
        self.query_port_service = port;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.own_device_number > 4 {
            return Err("own_device_number must be 0..4");
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.read_timeout.is_zero() {
            return Err("read_timeout must be > 0");
        }
        if self.pop_timeout.is_zero() {
            return Err("pop_timeout must be > 0");
        }
        if self.connection_ttl_ticks == 0 {
            return Err("connection_ttl_ticks must be > 0");
        }
        if self.message_recv_tries == 0 || self.render_recv_tries == 0 {
            return Err("receive retry budgets must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.own_device_number, 0);
        assert_eq!(config.query_port_service, 12523);
        assert_eq!(config.recv_buffer_size, 65536);
        assert_eq!(config.connection_ttl_ticks, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = ClientConfig::default()
            .with_own_device_number(2)
            .with_read_timeout(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(1))
            .with_pop_timeout(Duration::from_millis(100))
            .with_query_port_service(40000);

        assert_eq!(config.own_device_number, 2);
        assert_eq!(config.read_timeout, Duration::from_millis(50));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.pop_timeout, Duration::from_millis(100));
        assert_eq!(config.query_port_service, 40000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let config = ClientConfig::default().with_own_device_number(5);
        assert!(config.validate().is_err());

        let config = ClientConfig {
            read_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            message_recv_tries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
