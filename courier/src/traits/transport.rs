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

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::LinkError;

/// Opens send links to broker entities.
///
/// Implementations own connection and session establishment. Every call may
/// fail; failures are classified and retried by the
/// [`RetryExecutor`](crate::retry::RetryExecutor).
#[async_trait]
pub trait BrokerTransport: Send + Sync + Debug {
    /// Opens a session-scoped send link targeting `destination`.
    async fn open_sender_link(&self, destination: &str) -> Result<Arc<dyn SenderLink>, LinkError>;
}

/// A live send path to one destination.
///
/// Once closed, or once the broker detaches it, every method is expected to
/// fail with a link-level error such as [`LinkError::LinkDetached`].
#[async_trait]
pub trait SenderLink: Send + Sync + Debug {
    /// Name of the link, used to key control-channel requests.
    fn link_name(&self) -> &str;

    /// Largest message, in bytes, the broker accepts on this link.
    async fn max_message_size(&self) -> Result<u64, LinkError>;

    /// Transmits one encoded message.
    async fn send_message(&self, encoded: &[u8]) -> Result<(), LinkError>;

    /// Transmits a batch in its wire form.
    async fn send_batch(&self, wire_form: &[u8]) -> Result<(), LinkError>;

    /// Asks the broker to enqueue `messages` at `enqueue_time`.
    ///
    /// Returns one sequence number per message, in input order.
    async fn schedule_messages(
        &self,
        link_name: &str,
        enqueue_time: DateTime<Utc>,
        messages: &[Vec<u8>],
    ) -> Result<Vec<i64>, LinkError>;

    /// Cancels previously scheduled messages by sequence number.
    async fn cancel_scheduled_messages(
        &self,
        link_name: &str,
        sequence_numbers: &[i64],
    ) -> Result<(), LinkError>;

    /// Detaches the link and releases its resources.
    async fn close(&self) -> Result<(), LinkError>;
}
