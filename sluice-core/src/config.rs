use anyhow::{bail, Result};
use log::error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error_bail;
use crate::tool::{MS_PER_DAY, MS_PER_SEC};

/// Pipeline configuration. Loaded once at startup, validated before any
/// record is processed, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fixed window duration, in seconds. 90 is the shipped default.
    pub window_secs: u64,

    /// Allowed lateness, in days. Data within the bound refires its window;
    /// anything older is dropped with a counted metric.
    pub allowed_lateness_days: u64,

    /// Dead-letter flush interval, in seconds, relative to the first
    /// malformed record in the buffer.
    pub dead_letter_flush_secs: u64,

    /// Slack subtracted from observed batch minima when advancing the
    /// watermark, in seconds.
    pub allowed_skew_secs: u64,

    pub listen_port: u16,

    /// Directory of the windowed account table. One file per window key.
    pub table_dir: String,

    /// Directory of dead-letter flush files.
    pub dead_letter_dir: String,

    /// Each dead-letter flush is split across this many files.
    pub dead_letter_shards: usize,

    pub emitter_workers: usize,

    pub channel_capacity: usize,

    pub sink_max_retries: usize,

    pub sink_retry_base_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_secs: 90,
            allowed_lateness_days: 10,
            dead_letter_flush_secs: 10,
            allowed_skew_secs: 2,
            listen_port: 50061,
            table_dir: "data/account_table".to_string(),
            dead_letter_dir: "data/dead_letter".to_string(),
            dead_letter_shards: 10,
            emitter_workers: num_cpus::get().min(4).max(1),
            channel_capacity: 256,
            sink_max_retries: 5,
            sink_retry_base_ms: 100,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Reject bad configuration before the pipeline starts. A non-positive
    /// duration would make window assignment or flushing meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            error_bail!("window_secs must be positive");
        }

        if self.dead_letter_flush_secs == 0 {
            error_bail!("dead_letter_flush_secs must be positive");
        }

        if self.table_dir.is_empty() {
            error_bail!("table_dir is empty");
        }

        if self.dead_letter_dir.is_empty() {
            error_bail!("dead_letter_dir is empty");
        }

        if self.dead_letter_shards == 0 {
            error_bail!("dead_letter_shards must be positive");
        }

        if self.emitter_workers == 0 {
            error_bail!("emitter_workers must be positive");
        }

        if self.channel_capacity == 0 {
            error_bail!("channel_capacity must be positive");
        }

        Ok(())
    }

    pub fn window_ms(&self) -> i64 {
        self.window_secs as i64 * MS_PER_SEC
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_days as i64 * MS_PER_DAY
    }

    pub fn allowed_skew_ms(&self) -> i64 {
        self.allowed_skew_secs as i64 * MS_PER_SEC
    }

    pub fn dead_letter_flush_interval(&self) -> Duration {
        Duration::from_secs(self.dead_letter_flush_secs)
    }
}
