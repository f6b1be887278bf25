//! Public building blocks: senders, clients, configuration, errors and
//! cancellation contexts.
//!
//! # Key Components
//!
//! *   [`Client`]: owns a transport and configuration, creates and tracks
//!     [`Sender`]s.
//! *   [`Sender`]: sends, batches, schedules and cancels messages for one
//!     destination, retrying every operation through the
//!     [`RetryExecutor`](crate::retry::RetryExecutor).
//! *   [`Context`]: cancellation token plus optional deadline accepted by
//!     every operation.
//! *   [`CourierConfig`]: TOML configuration loaded from XDG locations.
//! *   [`CourierError`]: the classified error every operation returns.

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

// --- Public Re-exports ---
pub use client::{Client, SenderOptions};
pub use config::{BatchConfig, CourierConfig, LinkConfig, TracingConfig, CONFIG};
pub use context::{Context, Interrupt};
pub use error::{BatchError, CourierError, LinkError};
pub use logging::init_tracing;
pub use sender::Sender;

// --- Submodules ---

/// Defines [`Client`] and [`SenderOptions`].
mod client;
/// Configuration loading.
mod config;
/// Defines [`Context`].
mod context;
/// Error types.
mod error;
/// Subscriber setup for applications.
mod logging;
/// Defines [`Sender`].
mod sender;
