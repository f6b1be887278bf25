//! Seams to the broker transport.
//!
//! *   [`BrokerTransport`]: opens send links for a destination.
//! *   [`SenderLink`]: one live send path, including the control channel used to
//!     schedule and cancel messages.
//!
//! The wire protocol itself lives behind these traits; the crate only
//! classifies and retries their failures.

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
pub use transport::{BrokerTransport, SenderLink};

// --- Submodules ---

/// Defines [`BrokerTransport`] and [`SenderLink`].
mod transport;
