//! Reactor configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReactorError, Result};

/// Default scratch buffer capacity for reads from the child
pub const DEFAULT_READ_BUFFER_SIZE: usize = 0xffff;

/// Largest accepted scratch buffer capacity
pub const MAX_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default delay before a graceful exit escalates to SIGKILL
const DEFAULT_KILL_ESCALATION_MS: u64 = 5000;

/// Default sleep between liveness probes while reaping
const DEFAULT_REAP_INTERVAL_MS: u64 = 1;

/// Default cap on a single readiness wait while the child is alive
const DEFAULT_EXIT_POLL_INTERVAL_MS: u64 = 50;

/// Configuration for a [`Reactor`](crate::Reactor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Capacity of the single read buffer shared by all reads
    pub read_buffer_size: usize,
    /// Escalate to SIGKILL this long after a graceful exit signal (None = wait forever)
    pub kill_escalation_ms: Option<u64>,
    /// Sleep between liveness probes while reaping the child
    pub reap_interval_ms: u64,
    /// Upper bound on one readiness wait while the child is alive
    pub exit_poll_interval_ms: u64,
    /// Working directory for the child (None = inherit)
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child
    pub env: HashMap<String, String>,
    /// Send the child's stderr to /dev/null instead of inheriting it
    pub discard_stderr: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            kill_escalation_ms: Some(DEFAULT_KILL_ESCALATION_MS),
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
            exit_poll_interval_ms: DEFAULT_EXIT_POLL_INTERVAL_MS,
            working_dir: None,
            env: HashMap::new(),
            discard_stderr: false,
        }
    }
}

impl ReactorConfig {
    /// Create configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ReactorConfig =
            toml::from_str(source).map_err(|e| ReactorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            ReactorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Serialize configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ReactorError::Config(e.to_string()))
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(ReactorError::Config(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ReactorError::Config(format!(
                "read_buffer_size must not exceed {} bytes",
                MAX_READ_BUFFER_SIZE
            )));
        }
        if self.exit_poll_interval_ms == 0 {
            return Err(ReactorError::Config(
                "exit_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.exit_poll_interval_ms > u64::from(u16::MAX) {
            return Err(ReactorError::Config(format!(
                "exit_poll_interval_ms must not exceed {}",
                u16::MAX
            )));
        }
        Ok(())
    }

    /// Set read buffer capacity
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set SIGKILL escalation delay (None = never escalate)
    pub fn kill_escalation(mut self, delay: Option<Duration>) -> Self {
        self.kill_escalation_ms = delay.map(duration_to_ms);
        self
    }

    /// Set reaper probe interval
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set exit poll interval
    pub fn exit_poll_interval(mut self, interval: Duration) -> Self {
        self.exit_poll_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Enable/disable stderr discard
    pub fn discard_stderr(mut self, discard: bool) -> Self {
        self.discard_stderr = discard;
        self
    }

    pub(crate) fn kill_escalation_delay(&self) -> Option<Duration> {
        self.kill_escalation_ms.map(Duration::from_millis)
    }

    pub(crate) fn reap_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub(crate) fn exit_poll_duration(&self) -> Duration {
        Duration::from_millis(self.exit_poll_interval_ms)
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
