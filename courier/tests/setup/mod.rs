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
use std::sync::Arc;
use std::sync::Once;

use courier::prelude::*;
use courier::testing::MockTransport;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Installs the file-backed tracing subscriber shared by all integration tests.
///
/// Safe to call from every test; only the first call has an effect.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "courier_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked so buffered lines are flushed at process exit.
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive("courier::retry=trace".parse().unwrap())
            .add_directive("courier::link=trace".parse().unwrap())
            .add_directive("courier::common::sender=trace".parse().unwrap())
            .add_directive(tracing_subscriber::filter::LevelFilter::TRACE.into());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

/// Retry options with short, deterministic delays.
#[allow(dead_code)]
pub fn fast_retry(max_attempts: i32) -> RetryOptions {
    RetryOptions {
        max_attempts,
        try_timeout_ms: 1_000,
        initial_delay_ms: 10,
        max_delay_ms: 80,
        backoff_multiplier: 2.0,
        jitter: 0.0,
        quick_link_retry: true,
    }
}

/// A sender for `orders` backed by `transport`.
#[allow(dead_code)]
pub fn sender_for(transport: &MockTransport, retry: RetryOptions) -> Sender {
    Sender::new(Arc::new(transport.clone()), "orders", retry)
}

/// Lets spawned link closes run before asserting on them.
///
/// Only reliable on the current-thread runtime of `#[courier_test(start_paused)]`.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
