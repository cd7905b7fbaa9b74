// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relay configuration.
//
// The on-disk format is the flat `KEY=VALUE` file that existing deployments
// already ship (`printer.config`).  It is parsed once at startup into a
// `RelayConfig` value which is then handed to every component constructor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{DruckpostError, Result};

/// Default raw TCP port for receipt printers.
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

/// Default MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Connection details for the pub/sub broker.
///
/// The relay core never connects to the broker itself; these settings are
/// carried for whatever collaborator feeds it payloads.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_BROKER_PORT,
            username: String::new(),
            password: String::new(),
            topic: String::new(),
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .finish()
    }
}

/// Where printable bytes go.  Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkTarget {
    /// Raw TCP socket (JetDirect style).
    Tcp { host: String, port: u16 },
    /// Character device opened write-only, e.g. `/dev/usb/lp0`.
    Device { path: PathBuf },
}

impl Default for SinkTarget {
    fn default() -> Self {
        SinkTarget::Tcp {
            host: String::new(),
            port: DEFAULT_PRINTER_PORT,
        }
    }
}

impl std::fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkTarget::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            SinkTarget::Device { path } => write!(f, "device:{}", path.display()),
        }
    }
}

/// Timing policy of the delivery loop and sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// A job older than this that fails again is dropped.
    pub staleness: Duration,
    /// First retry delay, and the value backoff resets to after a success.
    pub backoff_floor: Duration,
    /// Multiplier applied after every retry delay.
    pub backoff_factor: f64,
    /// Upper bound of the retry delay.
    pub backoff_ceiling: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Deadline for writing one job (payload plus cut) over TCP.
    pub write_timeout: Duration,
    /// Pause before and after a device write.
    pub device_settle: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(60),
            backoff_floor: Duration::from_secs(1),
            backoff_factor: 1.5,
            backoff_ceiling: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            device_settle: Duration::from_millis(100),
        }
    }
}

/// Complete relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub broker: BrokerConfig,
    pub sink: SinkTarget,
    /// Capacity of the delivery queue.
    pub queue_capacity: usize,
    /// Capacity of the callback queue.
    pub callback_queue_capacity: usize,
    pub delivery: DeliveryPolicy,
    /// Client-side timeout for one callback POST.
    pub callback_timeout: Duration,
    /// Interval between health reports.
    pub health_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            sink: SinkTarget::default(),
            queue_capacity: 100,
            callback_queue_capacity: 100,
            delivery: DeliveryPolicy::default(),
            callback_timeout: Duration::from_secs(10),
            health_interval: Duration::from_secs(60),
        }
    }
}

impl RelayConfig {
    /// Read and validate a `KEY=VALUE` configuration file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DruckpostError::Config(format!("read {}: {e}", path.as_ref().display()))
        })?;
        let config = Self::from_kv_str(&text)?;
        config.validate()?;
        info!(sink = %config.sink, topic = %config.broker.topic, "configuration loaded");
        Ok(config)
    }

    /// Parse the `KEY=VALUE` format.
    ///
    /// Blank lines and `#` comments are skipped, as are lines without `=`.
    /// Unknown keys are ignored.  A value that should be numeric but is not
    /// is an error.
    pub fn from_kv_str(text: &str) -> Result<Self> {
        let mut config = RelayConfig::default();
        let mut tcp_host = String::new();
        let mut tcp_port = DEFAULT_PRINTER_PORT;
        let mut device_path: Option<PathBuf> = None;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(line = lineno + 1, "skipping line without '='");
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "MQTT_HOST" => config.broker.host = value.to_string(),
                "MQTT_PORT" => config.broker.port = parse_num(key, value)?,
                "MQTT_USER" => config.broker.username = value.to_string(),
                "MQTT_PASS" => config.broker.password = value.to_string(),
                "TOPIC" => config.broker.topic = value.to_string(),
                "TCP_HOST" => tcp_host = value.to_string(),
                "TCP_PORT" => tcp_port = parse_num(key, value)?,
                "USB_HOST" => {
                    device_path = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "QUEUE_CAPACITY" => config.queue_capacity = parse_num(key, value)?,
                "CALLBACK_QUEUE_CAPACITY" => {
                    config.callback_queue_capacity = parse_num(key, value)?
                }
                "STALENESS_SECS" => {
                    config.delivery.staleness = Duration::from_secs(parse_num(key, value)?)
                }
                "CALLBACK_TIMEOUT_SECS" => {
                    config.callback_timeout = Duration::from_secs(parse_num(key, value)?)
                }
                "HEALTH_INTERVAL_SECS" => {
                    config.health_interval = Duration::from_secs(parse_num(key, value)?)
                }
                other => debug!(key = other, "ignoring unknown configuration key"),
            }
        }

        config.sink = match device_path {
            Some(path) => SinkTarget::Device { path },
            None => SinkTarget::Tcp {
                host: tcp_host,
                port: tcp_port,
            },
        };

        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        match &self.sink {
            SinkTarget::Tcp { host, port } => {
                if host.is_empty() {
                    return Err(DruckpostError::Config(
                        "TCP_HOST is required when USB_HOST is not set".into(),
                    ));
                }
                if *port == 0 {
                    return Err(DruckpostError::Config("TCP_PORT must not be 0".into()));
                }
            }
            SinkTarget::Device { path } => {
                if path.as_os_str().is_empty() {
                    return Err(DruckpostError::Config("USB_HOST is empty".into()));
                }
            }
        }

        if self.queue_capacity == 0 || self.callback_queue_capacity == 0 {
            return Err(DruckpostError::Config(
                "queue capacities must be at least 1".into(),
            ));
        }

        let policy = &self.delivery;
        if policy.backoff_factor < 1.0 || policy.backoff_floor > policy.backoff_ceiling {
            return Err(DruckpostError::Config(
                "backoff must be non-decreasing and floor <= ceiling".into(),
            ));
        }

        if self.health_interval.is_zero() {
            return Err(DruckpostError::Config("health interval must be > 0".into()));
        }

        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| DruckpostError::Config(format!("{key}: '{value}' is not a valid number")))
}
