//! `~/.gridsync/config.yaml`. Every field is optional.
//!
//! ```yaml
//! queue:
//!   stalled_interval_ms: 30000
//!   max_stalled_count: 1
//!   lock_duration_ms: 30000
//! grid:
//!   sheet: Sheet1
//!   header: [id, name, age, city]
//! relational:
//!   channel: user_change
//!   pool_size: 10
//! guard:
//!   recent_batches: 64
//! logging:
//!   format: json
//!   filter: gridsync_sync=debug
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use gridsync_core::memory::{DEFAULT_CHANNEL, DEFAULT_POOL_SIZE, DEFAULT_SHEET};
use gridsync_core::types::DEFAULT_COLUMNS;
use gridsync_sync::guard::DEFAULT_RECENT_CAPACITY;
use gridsync_sync::{EngineOptions, QueueSettings};

use crate::error::{io_err, DaemonError};
use crate::paths::config_path;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub queue: QueueSettings,
    pub grid: GridConfig,
    pub relational: RelationalConfig,
    pub guard: GuardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub sheet: String,
    pub header: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            sheet: DEFAULT_SHEET.to_string(),
            header: DEFAULT_COLUMNS.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub channel: String,
    pub pool_size: usize,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub recent_batches: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            recent_batches: DEFAULT_RECENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

impl DaemonConfig {
    /// Load from `~/.gridsync/config.yaml`, falling back to defaults when
    /// the file does not exist.
    pub fn load(home: &Path) -> Result<Self, DaemonError> {
        let path = config_path(home);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(io_err(&path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| DaemonError::Config { path, source })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            queue: self.queue,
            channel: self.relational.channel.clone(),
            guard_capacity: self.guard.recent_batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::paths::gridsync_root;

    fn write_config(home: &TempDir, yaml: &str) {
        let root = gridsync_root(home.path());
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("config.yaml"), yaml).expect("write config");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("home");
        let config = DaemonConfig::load(home.path()).expect("load");
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.queue.lock_duration, Duration::from_secs(30));
        assert_eq!(config.relational.channel, "user_change");
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let home = TempDir::new().expect("home");
        write_config(
            &home,
            "queue:\n  lock_duration_ms: 5000\nrelational:\n  channel: people_change\nlogging:\n  format: json\n",
        );
        let config = DaemonConfig::load(home.path()).expect("load");

        assert_eq!(config.queue.lock_duration, Duration::from_secs(5));
        assert_eq!(config.queue.max_stalled_count, 1);
        assert_eq!(config.relational.channel, "people_change");
        assert_eq!(config.relational.pool_size, 10);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.grid.header, vec!["id", "name", "age", "city"]);
    }

    #[test]
    fn zero_durations_are_rejected() {
        let home = TempDir::new().expect("home");
        write_config(&home, "queue:\n  stalled_interval_ms: 0\n");
        let err = DaemonConfig::load(home.path()).unwrap_err();
        assert!(matches!(err, DaemonError::Config { .. }), "{err}");
        assert!(err.to_string().contains("at least 1 ms"), "{err}");
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().expect("home");
        write_config(&home, "queue: [not, a, map]\n");
        let err = DaemonConfig::load(home.path()).unwrap_err();
        assert!(err.to_string().contains("config.yaml"), "{err}");
    }
}
