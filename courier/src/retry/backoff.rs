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

use std::time::Duration;

use rand::Rng;

use super::RetryOptions;

/// Exponential backoff with jitter for one retried operation.
///
/// Each call to [`next_delay`](Self::next_delay) multiplies the base delay by
/// `backoff_multiplier`, caps it at `max_delay_ms`, then spreads it by
/// `jitter`. The jittered value never exceeds the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter: f64,
    retries: u32,
}

impl Backoff {
    /// Creates a backoff tracker from retry options.
    #[must_use]
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            initial_delay_ms: options.initial_delay_ms,
            max_delay_ms: options.max_delay_ms,
            multiplier: options.backoff_multiplier,
            jitter: options.jitter.clamp(0.0, 1.0),
            retries: 0,
        }
    }

    /// Records a retry and returns how long to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.peek_base_ms();
        self.retries = self.retries.saturating_add(1);

        let spread = if self.jitter > 0.0 {
            rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        #[allow(
            clippy::cast_sign_loss,
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss
        )]
        let jittered_ms = (base * spread).min(self.max_delay_ms as f64).max(0.0) as u64;

        Duration::from_millis(jittered_ms)
    }

    /// The delay the next retry would use before jitter, without recording it.
    #[must_use]
    pub fn peek_delay(&self) -> Duration {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let ms = self.peek_base_ms() as u64;
        Duration::from_millis(ms)
    }

    /// Number of retries recorded so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    #[allow(clippy::cast_precision_loss)]
    fn peek_base_ms(&self) -> f64 {
        let grown = self.initial_delay_ms as f64
            * self
                .multiplier
                .powi(i32::try_from(self.retries).unwrap_or(i32::MAX));
        grown.min(self.max_delay_ms as f64).max(0.0)
    }
}
