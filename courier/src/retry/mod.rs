//! Retrying link operations.
//!
//! Every broker operation a [`Sender`](crate::common::Sender) performs runs
//! through a [`RetryExecutor`]. The executor owns the attempt loop and defers
//! two decisions to pluggable parts:
//!
//! *   [`Classifier`]: turns a [`LinkError`](crate::common::LinkError) into a
//!     [`RecoveryKind`]. [`DefaultClassifier`] is used unless replaced.
//! *   [`RetryOptions`]: the attempt budget and the exponential [`Backoff`]
//!     shape between attempts.

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
pub use backoff::Backoff;
pub use executor::{AttemptInfo, RetryExecutor};
pub use recovery::{Classifier, DefaultClassifier, RecoveryKind};
pub use retry_options::RetryOptions;

// --- Submodules ---

/// Exponential backoff with jitter.
mod backoff;
/// The attempt loop.
mod executor;
/// Failure classification.
mod recovery;
/// Retry budget configuration.
mod retry_options;
