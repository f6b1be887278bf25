/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::path::Path;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::retry::RetryOptions;

/// Configuration for courier clients and senders.
///
/// Loaded from TOML in XDG-compliant locations. Every section and field is
/// optional; anything missing takes its default.
///
/// ```toml
/// [retry]
/// max_attempts = 5
/// initial_delay_ms = 250
///
/// [batch]
/// max_bytes_override = 65536
///
/// [link]
/// close_timeout_ms = 2000
///
/// [tracing]
/// log_level = "courier=debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Retry budget and backoff for sender operations
    pub retry: RetryOptions,
    /// Batch sizing
    pub batch: BatchConfig,
    /// Link lifecycle
    pub link: LinkConfig,
    /// Tracing and logging
    pub tracing: TracingConfig,
}

/// Batch sizing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Ceiling for new batches in bytes. `0` uses the broker-advertised maximum.
    pub max_bytes_override: u64,
}

/// Link lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bound on closing a link in milliseconds
    pub close_timeout_ms: u64,
}

/// Tracing and logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter directive, in `EnvFilter` syntax
    pub log_level: String,
    /// Directory for log files
    pub log_directory: String,
    /// File name prefix for the daily log file
    pub log_file_prefix: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 5_000,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_directory: "logs".to_string(),
            log_file_prefix: "courier.log".to_string(),
        }
    }
}

impl LinkConfig {
    /// Convert the close timeout to Duration
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl BatchConfig {
    /// The configured ceiling, if one is set.
    #[must_use]
    pub const fn max_bytes(&self) -> Option<u64> {
        if self.max_bytes_override == 0 {
            None
        } else {
            Some(self.max_bytes_override)
        }
    }
}

impl CourierConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns the parser error for malformed TOML or mistyped fields.
    pub fn load_from_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Load configuration from a specific file.
    ///
    /// A missing, unreadable or malformed file logs an error and yields the
    /// default configuration.
    pub fn load_from_path(path: &Path) -> Self {
        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(path) {
            Ok(source) => match Self::load_from_str(&source) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from XDG-compliant locations.
    ///
    /// Looks for `courier/config.toml` under the XDG configuration
    /// directories, `$XDG_CONFIG_HOME` first. Without a file the defaults are
    /// used.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("courier") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        match xdg_dirs.find_config_file("config.toml") {
            Some(path) => Self::load_from_path(&path),
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration loaded from XDG-compliant locations on first use
    pub static ref CONFIG: CourierConfig = CourierConfig::load();
}
