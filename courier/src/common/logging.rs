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

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::common::TracingConfig;

/// Installs a global subscriber writing to a daily log file.
///
/// Courier never installs a subscriber on its own; applications that have no
/// logging setup can call this once at startup. `RUST_LOG` takes precedence
/// over `config.log_level`.
///
/// Returns the writer guard, which must be kept alive for buffered lines to
/// be flushed, or `None` if a global subscriber was already installed or the
/// log directory could not be created.
#[must_use]
pub fn init_tracing(config: &TracingConfig) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(&config.log_directory) {
        eprintln!("could not create log directory {}: {e}", config.log_directory);
        return None;
    }

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &config.log_directory,
        &config.log_file_prefix,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .with_line_number(true)
        .with_target(true)
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .ok()
        .map(|()| guard)
}
