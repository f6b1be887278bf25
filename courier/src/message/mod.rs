//! Messages and batches.
//!
//! *   [`Message`]: a body plus broker metadata, encoded to JSON before transmission.
//! *   [`MessageBatch`]: a group of encoded messages bounded by a byte ceiling and
//!     sent as one unit.
//! *   [`MessageBatchOptions`]: overrides for batch creation.

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
pub use broker_message::Message;
pub use message_batch::{MessageBatch, MessageBatchOptions, BATCH_MESSAGE_OVERHEAD};

// --- Submodules ---

/// Defines [`Message`].
mod broker_message;
/// Defines [`MessageBatch`] and the batch wire form.
mod message_batch;
