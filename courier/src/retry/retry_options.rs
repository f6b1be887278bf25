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

//! Retry budget and backoff shape.
//!
//! # Example
//!
//! ```rust,ignore
//! let options = RetryOptions {
//!     max_attempts: 5,
//!     initial_delay_ms: 200,
//!     max_delay_ms: 10_000,
//!     ..Default::default()
//! };
//! let sender = client.new_sender("orders", Some(SenderOptions::with_retry(options)))?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum attempts, including the first one.
    ///
    /// Zero or negative values mean exactly one attempt.
    pub max_attempts: i32,

    /// Time budget for a single attempt in milliseconds, link creation included.
    pub try_timeout_ms: u64,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any retry delay in milliseconds.
    pub max_delay_ms: u64,

    /// Factor applied to the delay after each retry.
    ///
    /// With multiplier 2.0 and an initial delay of 100ms:
    /// - First retry: 100ms
    /// - Second retry: 200ms
    /// - Third retry: 400ms
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay, as a fraction.
    ///
    /// `0.2` scales each delay by a random factor in `[0.8, 1.2]`.
    pub jitter: f64,

    /// Retry the first link recovery of an operation without waiting.
    ///
    /// A detached link is usually fixed by reopening it, so the first
    /// recovery skips the backoff delay. Later recoveries back off normally.
    pub quick_link_retry: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            try_timeout_ms: 60_000,
            initial_delay_ms: 4_000,
            max_delay_ms: 120_000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
            quick_link_retry: true,
        }
    }
}

impl RetryOptions {
    /// Options that make exactly one attempt.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Number of attempts actually made, never less than one.
    #[must_use]
    pub fn effective_attempts(&self) -> u32 {
        u32::try_from(self.max_attempts).unwrap_or(0).max(1)
    }

    /// Get the per-attempt timeout.
    #[must_use]
    pub const fn try_timeout(&self) -> Duration {
        Duration::from_millis(self.try_timeout_ms)
    }

    /// Get the initial retry delay.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Get the maximum retry delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
