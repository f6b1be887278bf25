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

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use crate::common::{Context, CourierError};
use crate::link::LinkManager;
use crate::message::{Message, MessageBatch, MessageBatchOptions};
use crate::retry::{Classifier, RetryExecutor, RetryOptions};
use crate::traits::BrokerTransport;

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Sends messages to one queue or topic.
///
/// Every operation runs through a [`RetryExecutor`], so transient failures
/// are retried and broken links are replaced transparently. Operations take
/// `&self` and may run concurrently from many tasks.
///
/// A sender must be closed with [`close`](Self::close). Dropping it without
/// closing leaks the open link until the transport tears it down.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = Context::new();
/// let mut batch = sender.new_message_batch(&ctx, None).await?;
/// for order in orders {
///     if let Err(BatchError::MessageTooLarge { .. }) = batch.try_add(&order) {
///         sender.send_message_batch(&ctx, batch).await?;
///         batch = sender.new_message_batch(&ctx, None).await?;
///         batch.try_add(&order)?;
///     }
/// }
/// sender.send_message_batch(&ctx, batch).await?;
/// sender.close(&ctx).await?;
/// ```
pub struct Sender {
    destination: String,
    links: Arc<LinkManager>,
    executor: RetryExecutor,
    cleanup_on_close: Mutex<Option<CleanupFn>>,
    default_batch_max_bytes: Option<u64>,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("destination", &self.destination)
            .field("links", &self.links)
            .field("default_batch_max_bytes", &self.default_batch_max_bytes)
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Creates a sender for `destination`. The link is opened on first use.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        destination: impl Into<String>,
        retry: RetryOptions,
    ) -> Self {
        Self::from_links(LinkManager::new(destination, transport), retry)
    }

    /// Creates a sender around an already configured [`LinkManager`].
    #[must_use]
    pub fn from_links(links: LinkManager, retry: RetryOptions) -> Self {
        let links = Arc::new(links);
        Self {
            destination: links.destination().to_string(),
            executor: RetryExecutor::new(Arc::clone(&links), retry),
            links,
            cleanup_on_close: Mutex::new(None),
            default_batch_max_bytes: None,
        }
    }

    /// Registers a callback run once, at the start of the first [`close`](Self::close).
    #[must_use]
    pub fn with_cleanup(self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        *self.cleanup_on_close.lock() = Some(Box::new(cleanup));
        self
    }

    /// Replaces the failure classifier used for every operation.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.executor = self.executor.with_classifier(classifier);
        self
    }

    /// Sets the batch ceiling used when [`new_message_batch`](Self::new_message_batch)
    /// gets no override. `0` restores the broker-advertised maximum.
    #[must_use]
    pub fn with_default_batch_max_bytes(mut self, max_bytes: u64) -> Self {
        self.default_batch_max_bytes = if max_bytes == 0 { None } else { Some(max_bytes) };
        self
    }

    /// The queue or topic this sender targets.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Link churn counters.
    #[must_use]
    pub fn link_stats(&self) -> &crate::link::LinkStats {
        self.links.stats()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.links.is_closed()
    }

    /// Creates an empty batch for this destination.
    ///
    /// The ceiling comes from `options`, then the sender's default, and
    /// finally from the maximum message size advertised on the live link.
    /// Only the last case performs I/O.
    ///
    /// # Errors
    ///
    /// [`CourierError::Closed`] after close, or any error from querying the link.
    #[instrument(skip(self, ctx), fields(destination = %self.destination))]
    pub async fn new_message_batch(
        &self,
        ctx: &Context,
        options: Option<MessageBatchOptions>,
    ) -> Result<MessageBatch, CourierError> {
        let override_bytes = options
            .map(|o| o.max_bytes)
            .filter(|max| *max > 0)
            .or(self.default_batch_max_bytes);

        if let Some(max_bytes) = override_bytes {
            self.check_open(ctx, "new_message_batch")?;
            trace!(max_bytes, "Creating batch with explicit ceiling");
            return Ok(MessageBatch::new(max_bytes));
        }

        let max_bytes = self
            .executor
            .run(ctx, "new_message_batch", |handle, _| async move {
                handle.link().max_message_size().await
            })
            .await?;
        trace!(max_bytes, "Creating batch with broker ceiling");
        Ok(MessageBatch::new(max_bytes))
    }

    /// Sends a single message.
    ///
    /// # Errors
    ///
    /// Encoding failures, or the classified error from the retry executor.
    #[instrument(skip(self, ctx, message), fields(destination = %self.destination))]
    pub async fn send_message(&self, ctx: &Context, message: &Message) -> Result<(), CourierError> {
        let encoded = message.encode()?;
        let encoded = encoded.as_slice();

        self.executor
            .run(ctx, "send_message", |handle, _| async move {
                handle.link().send_message(encoded).await
            })
            .await
    }

    /// Sends every message of `batch` as one unit.
    ///
    /// # Errors
    ///
    /// [`CourierError::Validation`] for an empty batch, without any I/O.
    /// Otherwise the classified error from the retry executor.
    #[instrument(skip(self, ctx, batch), fields(destination = %self.destination, messages = batch.num_messages()))]
    pub async fn send_message_batch(
        &self,
        ctx: &Context,
        mut batch: MessageBatch,
    ) -> Result<(), CourierError> {
        if batch.is_empty() {
            return Err(CourierError::Validation(
                "cannot send an empty batch".to_string(),
            ));
        }
        let wire_form = batch.to_wire_form()?;
        let wire_form = wire_form.as_slice();

        self.executor
            .run(ctx, "send_message_batch", |handle, _| async move {
                handle.link().send_batch(wire_form).await
            })
            .await
    }

    /// Schedules `messages` for delivery at `enqueue_time`.
    ///
    /// Returns the broker-assigned sequence numbers in input order. They are
    /// needed to [cancel](Self::cancel_scheduled_messages) the messages later.
    /// An empty slice returns an empty result without I/O.
    ///
    /// # Errors
    ///
    /// [`CourierError::PartialSchedule`] if the broker answers with a
    /// different number of sequence numbers. Otherwise the classified error
    /// from the retry executor.
    #[instrument(skip(self, ctx, messages), fields(destination = %self.destination, messages = messages.len()))]
    pub async fn schedule_messages(
        &self,
        ctx: &Context,
        messages: &[Message],
        enqueue_time: DateTime<Utc>,
    ) -> Result<Vec<i64>, CourierError> {
        if messages.is_empty() {
            self.check_open(ctx, "schedule_messages")?;
            return Ok(Vec::new());
        }

        let encoded = messages
            .iter()
            .map(|message| {
                let mut stamped = message.clone();
                stamped.scheduled_enqueue_time = Some(enqueue_time);
                stamped.encode()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let encoded = encoded.as_slice();

        let sequence_numbers = self
            .executor
            .run(ctx, "schedule_messages", |handle, _| async move {
                let link = handle.link();
                link.schedule_messages(link.link_name(), enqueue_time, encoded)
                    .await
            })
            .await?;

        if sequence_numbers.len() != messages.len() {
            return Err(CourierError::PartialSchedule {
                expected: messages.len(),
                received: sequence_numbers.len(),
            });
        }
        debug!(scheduled = sequence_numbers.len(), %enqueue_time, "Scheduled messages");
        Ok(sequence_numbers)
    }

    /// Schedules one message. See [`schedule_messages`](Self::schedule_messages).
    ///
    /// # Errors
    ///
    /// Same as [`schedule_messages`](Self::schedule_messages).
    pub async fn schedule_message(
        &self,
        ctx: &Context,
        message: &Message,
        enqueue_time: DateTime<Utc>,
    ) -> Result<i64, CourierError> {
        let sequence_numbers = self
            .schedule_messages(ctx, std::slice::from_ref(message), enqueue_time)
            .await?;
        sequence_numbers
            .first()
            .copied()
            .ok_or(CourierError::PartialSchedule {
                expected: 1,
                received: 0,
            })
    }

    /// Cancels scheduled messages by sequence number.
    ///
    /// # Errors
    ///
    /// The broker's own error for unknown or already delivered sequence
    /// numbers, surfaced as [`CourierError::Remote`].
    #[instrument(skip(self, ctx, sequence_numbers), fields(destination = %self.destination, count = sequence_numbers.len()))]
    pub async fn cancel_scheduled_messages(
        &self,
        ctx: &Context,
        sequence_numbers: &[i64],
    ) -> Result<(), CourierError> {
        if sequence_numbers.is_empty() {
            return self.check_open(ctx, "cancel_scheduled_messages");
        }

        self.executor
            .run(ctx, "cancel_scheduled_messages", |handle, _| async move {
                let link = handle.link();
                link.cancel_scheduled_messages(link.link_name(), sequence_numbers)
                    .await
            })
            .await
    }

    /// Marks the sender closed, runs the cleanup callback, then releases the link.
    ///
    /// The sender is closed as soon as this is called: every later operation
    /// fails with [`CourierError::Closed`], even if this call is interrupted.
    /// Closing again is a no-op and does not run the callback a second time.
    ///
    /// # Errors
    ///
    /// A cancellation error if `ctx` finishes while the link is busy being
    /// opened. The link is then released in the background.
    #[instrument(skip(self, ctx), fields(destination = %self.destination))]
    pub async fn close(&self, ctx: &Context) -> Result<(), CourierError> {
        self.links.mark_closed();
        let cleanup = self.cleanup_on_close.lock().take();
        if let Some(cleanup) = cleanup {
            trace!("Running cleanup callback");
            cleanup();
        }
        self.links.close(ctx).await
    }

    /// Fails for a closed sender or a finished context, without waiting on the link.
    fn check_open(&self, ctx: &Context, operation: &str) -> Result<(), CourierError> {
        if self.links.is_closed() {
            return Err(CourierError::Closed);
        }
        ctx.check().map_err(|i| i.into_error(operation))
    }
}
