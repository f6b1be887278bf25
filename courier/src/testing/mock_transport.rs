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

//! An in-memory broker for exercising senders without a network.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::common::LinkError;
use crate::message::{Message, MessageBatch};
use crate::traits::{BrokerTransport, SenderLink};

/// Maximum message size advertised unless overridden.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 256 * 1024;

/// A message accepted by a schedule request and not yet cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEntry {
    /// Sequence number the broker assigned.
    pub sequence_number: i64,
    /// Requested enqueue time.
    pub enqueue_time: DateTime<Utc>,
    /// The decoded message.
    pub message: Message,
}

#[derive(Default)]
struct Recorded {
    open_failures: VecDeque<LinkError>,
    failures: VecDeque<LinkError>,
    always_fail: Option<LinkError>,
    sent_messages: Vec<Vec<u8>>,
    sent_batches: Vec<Vec<u8>>,
    scheduled: BTreeMap<i64, ScheduledEntry>,
    cancelled: Vec<i64>,
}

struct MockState {
    max_message_size: AtomicU64,
    latency: Mutex<Option<Duration>>,
    truncate_schedule_responses: AtomicBool,
    hang_on_close: AtomicBool,
    open_attempts: AtomicU64,
    opens: AtomicU64,
    closed_links: AtomicU64,
    link_calls: AtomicU64,
    next_sequence_number: AtomicU64,
    recorded: Mutex<Recorded>,
}

impl MockState {
    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn max_message_size(&self) -> u64 {
        self.max_message_size.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<LinkError> {
        let mut recorded = self.recorded.lock();
        recorded
            .failures
            .pop_front()
            .or_else(|| recorded.always_fail.clone())
    }
}

/// A [`BrokerTransport`] that keeps everything in memory.
///
/// Clones share state, so a test can hand one clone to a sender and inspect
/// traffic through another. Failures are injected per operation:
/// [`push_open_failure`](Self::push_open_failure) for link creation and
/// [`push_failure`](Self::push_failure) for the next operation on any link.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("max_message_size", &self.state.max_message_size())
            .field("opens", &self.opens())
            .field("link_calls", &self.link_calls())
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a healthy transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                max_message_size: AtomicU64::new(DEFAULT_MAX_MESSAGE_SIZE),
                latency: Mutex::new(None),
                truncate_schedule_responses: AtomicBool::new(false),
                hang_on_close: AtomicBool::new(false),
                open_attempts: AtomicU64::new(0),
                opens: AtomicU64::new(0),
                closed_links: AtomicU64::new(0),
                link_calls: AtomicU64::new(0),
                next_sequence_number: AtomicU64::new(1),
                recorded: Mutex::new(Recorded::default()),
            }),
        }
    }

    /// Sets the maximum message size links advertise.
    #[must_use]
    pub fn with_max_message_size(self, max_message_size: u64) -> Self {
        self.state
            .max_message_size
            .store(max_message_size, Ordering::SeqCst);
        self
    }

    /// Delays every open and link operation by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(Some(latency));
        self
    }

    /// Changes the latency of later operations. `None` removes it.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.state.latency.lock() = latency;
    }

    /// Makes closing a link never complete. The close is still counted.
    pub fn hang_on_close(&self, hang: bool) {
        self.state.hang_on_close.store(hang, Ordering::SeqCst);
    }

    /// Makes the next link creation fail with `error`. Failures queue up.
    pub fn push_open_failure(&self, error: LinkError) {
        self.state.recorded.lock().open_failures.push_back(error);
    }

    /// Makes the next link operation fail with `error`. Failures queue up.
    pub fn push_failure(&self, error: LinkError) {
        self.state.recorded.lock().failures.push_back(error);
    }

    /// Fails every link operation with `error` once queued failures run out.
    /// `None` restores normal behavior.
    pub fn always_fail(&self, error: Option<LinkError>) {
        self.state.recorded.lock().always_fail = error;
    }

    /// Makes schedule requests return one sequence number fewer than asked.
    pub fn truncate_schedule_responses(&self, truncate: bool) {
        self.state
            .truncate_schedule_responses
            .store(truncate, Ordering::SeqCst);
    }

    /// Number of link creations attempted, failed ones included.
    #[must_use]
    pub fn open_attempts(&self) -> u64 {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    /// Number of links successfully opened.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of links a close was requested for.
    #[must_use]
    pub fn closed_links(&self) -> u64 {
        self.state.closed_links.load(Ordering::SeqCst)
    }

    /// Number of operations invoked on links, failed ones included.
    ///
    /// Closing a link is not counted.
    #[must_use]
    pub fn link_calls(&self) -> u64 {
        self.state.link_calls.load(Ordering::SeqCst)
    }

    /// Messages delivered through single sends, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<Message> {
        self.state
            .recorded
            .lock()
            .sent_messages
            .iter()
            .filter_map(|bytes| Message::decode(bytes).ok())
            .collect()
    }

    /// Batches delivered, each split back into its messages.
    #[must_use]
    pub fn sent_batches(&self) -> Vec<Vec<Message>> {
        self.state
            .recorded
            .lock()
            .sent_batches
            .iter()
            .filter_map(|wire| MessageBatch::split_wire_form(wire).ok())
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|bytes| Message::decode(bytes).ok())
                    .collect()
            })
            .collect()
    }

    /// Scheduled messages that have not been cancelled, by sequence number.
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledEntry> {
        self.state.recorded.lock().scheduled.values().cloned().collect()
    }

    /// Sequence numbers cancelled so far, in order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<i64> {
        self.state.recorded.lock().cancelled.clone()
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn open_sender_link(&self, destination: &str) -> Result<Arc<dyn SenderLink>, LinkError> {
        let attempt = self.state.open_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.delay().await;

        let failure = self.state.recorded.lock().open_failures.pop_front();
        if let Some(error) = failure {
            trace!(destination, attempt, error = %error, "Mock link open failed");
            return Err(error);
        }

        let id = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(MockLink {
            name: format!("{destination}-link-{id}"),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    name: String,
    closed: AtomicBool,
    state: Arc<MockState>,
}

impl fmt::Debug for MockLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockLink {
    async fn begin(&self) -> Result<(), LinkError> {
        self.state.link_calls.fetch_add(1, Ordering::SeqCst);
        self.state.delay().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::LinkDetached(format!("{} is closed", self.name)));
        }
        match self.state.next_failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SenderLink for MockLink {
    fn link_name(&self) -> &str {
        &self.name
    }

    async fn max_message_size(&self) -> Result<u64, LinkError> {
        self.begin().await?;
        Ok(self.state.max_message_size())
    }

    async fn send_message(&self, encoded: &[u8]) -> Result<(), LinkError> {
        self.begin().await?;
        if encoded.len() as u64 > self.state.max_message_size() {
            return Err(LinkError::MessageTooLarge {
                size: encoded.len() as u64,
                max: self.state.max_message_size(),
            });
        }
        self.state.recorded.lock().sent_messages.push(encoded.to_vec());
        Ok(())
    }

    async fn send_batch(&self, wire_form: &[u8]) -> Result<(), LinkError> {
        self.begin().await?;
        if wire_form.len() as u64 > self.state.max_message_size() {
            return Err(LinkError::MessageTooLarge {
                size: wire_form.len() as u64,
                max: self.state.max_message_size(),
            });
        }
        self.state.recorded.lock().sent_batches.push(wire_form.to_vec());
        Ok(())
    }

    async fn schedule_messages(
        &self,
        link_name: &str,
        enqueue_time: DateTime<Utc>,
        messages: &[Vec<u8>],
    ) -> Result<Vec<i64>, LinkError> {
        self.begin().await?;
        if link_name != self.name {
            return Err(LinkError::MalformedRequest(format!("unknown link {link_name}")));
        }

        let decoded = messages
            .iter()
            .map(|bytes| Message::decode(bytes))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LinkError::MalformedRequest(e.to_string()))?;

        let mut sequence_numbers = Vec::with_capacity(decoded.len());
        let mut recorded = self.state.recorded.lock();
        for mut message in decoded {
            let next = self.state.next_sequence_number.fetch_add(1, Ordering::SeqCst);
            let sequence_number = i64::try_from(next)
                .map_err(|_| LinkError::Other("sequence numbers exhausted".to_string()))?;
            message.sequence_number = Some(sequence_number);
            recorded.scheduled.insert(
                sequence_number,
                ScheduledEntry {
                    sequence_number,
                    enqueue_time,
                    message,
                },
            );
            sequence_numbers.push(sequence_number);
        }

        if self.state.truncate_schedule_responses.load(Ordering::SeqCst) {
            sequence_numbers.pop();
        }
        Ok(sequence_numbers)
    }

    async fn cancel_scheduled_messages(
        &self,
        link_name: &str,
        sequence_numbers: &[i64],
    ) -> Result<(), LinkError> {
        self.begin().await?;
        if link_name != self.name {
            return Err(LinkError::MalformedRequest(format!("unknown link {link_name}")));
        }

        let mut recorded = self.state.recorded.lock();
        if let Some(unknown) = sequence_numbers
            .iter()
            .find(|n| !recorded.scheduled.contains_key(*n))
        {
            return Err(LinkError::Rejected(format!(
                "no scheduled message with sequence number {unknown}"
            )));
        }
        for number in sequence_numbers {
            recorded.scheduled.remove(number);
            recorded.cancelled.push(*number);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed_links.fetch_add(1, Ordering::SeqCst);
        }
        if self.state.hang_on_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
