//! TOML configuration for a [`crate::Disk`].
//!
//! ```toml
//! device = "/dev/sda"
//! backend = "gdisk"        # default: parted
//! partition_tries = 10
//! retry_delay_ms = 1000
//! ```

use crate::disk::{PARTITION_TRIES, RETRY_DELAY};
use crate::partitioner::Backend;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_partition_tries() -> u32 {
    PARTITION_TRIES
}

fn default_retry_delay_ms() -> u64 {
    RETRY_DELAY.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub device: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_partition_tries")]
    pub partition_tries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl DiskConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            backend: Backend::default(),
            partition_tries: PARTITION_TRIES,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }

    pub fn parse(toml_text: &str) -> Result<Self> {
        let config: DiskConfig =
            toml::from_str(toml_text).context("failed to parse disk config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid disk config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("device must not be empty"));
        }
        if self.partition_tries == 0 {
            return Err(anyhow!("partition_tries must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
