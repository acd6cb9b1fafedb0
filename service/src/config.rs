//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Server configuration
//!
//! A [`ServerConfig`] is built once at startup and handed to
//! [`KinxServer::new`](crate::KinxServer::new). It can be assembled in code with
//! the `with_*` builders, or seeded from an optional JSON file:
//!
//! ```json
//! { "name": "chat", "host": "127.0.0.1", "port": 9000 }
//! ```
//!
//! Loading never fails. A missing or unparseable file yields the defaults, and
//! each field that is absent or invalid falls back to its own default.
//!
//! # Example
//!
//! ```
//! use kinx_service::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::from_json(r#"{"name": "chat", "port": "oops"}"#)
//!     .with_idle_timeout(Some(Duration::from_secs(30)))
//!     .with_pool_capacity(300);
//!
//! assert_eq!(config.name, "chat");
//! assert_eq!(config.port, 9780);
//! assert_eq!(config.workers_per_session(), 3);
//! ```

use crate::{KinxError, Result};
use kinx_codec::DEFAULT_MAX_PAYLOAD_LEN;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration file loaded when no other path is given
pub const DEFAULT_CONFIG_FILE: &str = "config/kinx.json";

/// Default display name
pub const DEFAULT_NAME: &str = "kinx";

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 9780;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Display name, used only in logs and snapshots
    pub name: String,

    /// Host to bind
    pub host: String,

    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,

    /// Idle timeout for sessions
    ///
    /// When set, every session runs an idle timer and is closed after this
    /// long without a received message. `None` disables idle eviction.
    pub idle_timeout: Option<Duration>,

    /// How long a single read waits for the next frame to start
    ///
    /// Expiry is not an error; the reader polls again.
    pub read_timeout: Duration,

    /// Upper bound on a single write to the connection
    pub write_timeout: Duration,

    /// Maximum number of concurrently running session role tasks
    pub pool_capacity: usize,

    /// Capacity of each session's outbound queue
    pub outbound_queue_capacity: usize,

    /// Largest payload accepted from or sent to a peer
    pub max_payload_len: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: None,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(10),
            pool_capacity: 1024,
            outbound_queue_capacity: 16,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration bound to the given host and port
    ///
    /// All other settings will use their default values.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Load a configuration file, falling back to defaults
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded configuration file");
                Self::from_json(&text)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read configuration file, using defaults");
                Self::default()
            }
        }
    }

    /// Parse the `name`, `host` and `port` fields of a JSON document
    pub fn from_json(text: &str) -> Self {
        let mut config = Self::default();
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to parse configuration, using defaults");
                return config;
            }
        };

        if let Some(name) = value
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            config.name = name.to_string();
        }
        if let Some(host) = value
            .get("host")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            config.host = host.to_string();
        }
        if let Some(port) = value
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
        {
            config.port = port;
        }
        config
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the bind host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable the idle timer
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the read timeout duration
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the worker pool capacity
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set the outbound queue capacity
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Set the payload limit
    pub fn with_max_payload_len(mut self, max: u64) -> Self {
        self.max_payload_len = max;
        self
    }

    /// Address string passed to the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Number of role tasks each session occupies
    ///
    /// Reader and writer always run; the idle timer only when enabled.
    pub fn workers_per_session(&self) -> usize {
        if self.idle_timeout.is_some() { 3 } else { 2 }
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(KinxError::Config("host must not be empty".to_string()));
        }
        if self.pool_capacity < self.workers_per_session() {
            return Err(KinxError::Config(format!(
                "pool_capacity must be at least {}",
                self.workers_per_session()
            )));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(KinxError::Config(
                "outbound_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(KinxError::Config(
                "read_timeout must be greater than 0".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(KinxError::Config(
                "write_timeout must be greater than 0".to_string(),
            ));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(KinxError::Config(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.name, "kinx");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9780);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.outbound_queue_capacity, 16);
        assert_eq!(config.workers_per_session(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::new("127.0.0.1", 0)
            .with_name("chat")
            .with_idle_timeout(Some(Duration::from_secs(30)))
            .with_pool_capacity(6);

        assert_eq!(config.bind_address(), "127.0.0.1:0");
        assert_eq!(config.name, "chat");
        assert_eq!(config.workers_per_session(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = ServerConfig::default().with_pool_capacity(1);
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_idle_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_outbound_queue_capacity(0);
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_host("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_full() {
        let config = ServerConfig::from_json(r#"{"name":"chat","host":"127.0.0.1","port":9000}"#);
        assert_eq!(config.name, "chat");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_from_json_field_fallbacks() {
        let config = ServerConfig::from_json(r#"{"name":"","host":42,"port":70000}"#);
        assert_eq!(config.name, DEFAULT_NAME);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);

        let config = ServerConfig::from_json(r#"{"port":0}"#);
        assert_eq!(config.port, DEFAULT_PORT);

        let config = ServerConfig::from_json(r#"{"host":"10.0.0.1"}"#);
        assert_eq!(config.name, DEFAULT_NAME);
        assert_eq!(config.host, "10.0.0.1");
    }

    #[test]
    fn test_from_json_garbage() {
        let config = ServerConfig::from_json("not json at all {");
        assert_eq!(config.bind_address(), "0.0.0.0:9780");

        let config = ServerConfig::from_json("[1, 2, 3]");
        assert_eq!(config.name, DEFAULT_NAME);
    }

    #[test]
    fn test_load_missing_file() {
        let config = ServerConfig::load("definitely/not/here/kinx.json");
        assert_eq!(config.bind_address(), "0.0.0.0:9780");
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("kinx-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"name":"from-file","port":9999}"#).unwrap();

        let config = ServerConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.name, "from-file");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, 9999);
    }
}
