//! The link layer: one live, recreatable send path per destination.
//!
//! *   [`LinkManager`]: owns the current link, creates it lazily and recreates it
//!     after invalidation.
//! *   [`LinkHandle`]: a generation-tagged reference handed to each unit of work.
//! *   [`LinkStats`]: counters describing link churn.

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
pub use link_manager::{EnsureError, LinkHandle, LinkManager, LinkStats};

// --- Submodules ---

/// Defines [`LinkManager`] and [`LinkHandle`].
mod link_manager;
