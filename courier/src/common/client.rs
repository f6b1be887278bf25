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
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, error, instrument, trace};

use crate::common::{Context, CourierConfig, CourierError, Sender, CONFIG};
use crate::link::LinkManager;
use crate::retry::RetryOptions;
use crate::traits::BrokerTransport;

/// Per-sender overrides for [`Client::new_sender`].
///
/// Unset fields fall back to the client's [`CourierConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderOptions {
    /// Retry budget and backoff for this sender.
    pub retry: Option<RetryOptions>,
    /// Default batch ceiling in bytes.
    pub batch_max_bytes: Option<u64>,
}

impl SenderOptions {
    /// Options overriding only the retry settings.
    #[must_use]
    pub fn with_retry(retry: RetryOptions) -> Self {
        Self {
            retry: Some(retry),
            batch_max_bytes: None,
        }
    }
}

struct ClientInner {
    transport: Arc<dyn BrokerTransport>,
    config: CourierConfig,
    senders: DashMap<u64, Arc<Sender>>,
    next_sender_id: AtomicU64,
    closed: AtomicBool,
}

/// Entry point owning a transport and handing out [`Sender`]s.
///
/// The client tracks every sender it creates. A sender closed on its own is
/// forgotten; [`Client::close`] closes whatever is left. Each sender owns its
/// own link, nothing is multiplexed.
///
/// Cloning a client is cheap and yields a handle to the same senders.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.transport)
            .field("senders", &self.inner.senders.len())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Client {
    /// Creates a client using the global [`CONFIG`].
    #[must_use]
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self::with_config(transport, CONFIG.clone())
    }

    /// Creates a client with an explicit configuration.
    #[must_use]
    pub fn with_config(transport: Arc<dyn BrokerTransport>, config: CourierConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                senders: DashMap::new(),
                next_sender_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The configuration senders are created with.
    #[must_use]
    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    /// Number of senders created and not yet closed.
    #[must_use]
    pub fn num_senders(&self) -> usize {
        self.inner.senders.len()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Creates a sender for `destination`.
    ///
    /// No link is opened until the sender's first operation.
    ///
    /// # Errors
    ///
    /// [`CourierError::Closed`] once the client is closed.
    pub fn new_sender(
        &self,
        destination: impl Into<String>,
        options: Option<SenderOptions>,
    ) -> Result<Arc<Sender>, CourierError> {
        if self.is_closed() {
            return Err(CourierError::Closed);
        }

        let options = options.unwrap_or_default();
        let config = &self.inner.config;
        let retry = options.retry.unwrap_or_else(|| config.retry.clone());
        let batch_max_bytes = options
            .batch_max_bytes
            .or_else(|| config.batch.max_bytes())
            .unwrap_or(0);

        let id = self.inner.next_sender_id.fetch_add(1, Ordering::SeqCst);
        let registry: Weak<ClientInner> = Arc::downgrade(&self.inner);

        let links = LinkManager::new(destination, Arc::clone(&self.inner.transport))
            .with_close_timeout(config.link.close_timeout());
        let sender = Arc::new(
            Sender::from_links(links, retry)
                .with_default_batch_max_bytes(batch_max_bytes)
                .with_cleanup(move || {
                    if let Some(inner) = registry.upgrade() {
                        inner.senders.remove(&id);
                        trace!(sender_id = id, "Sender unregistered");
                    }
                }),
        );

        self.inner.senders.insert(id, Arc::clone(&sender));
        // A close that started after the first check may already have taken its snapshot.
        if self.is_closed() {
            self.inner.senders.remove(&id);
            return Err(CourierError::Closed);
        }
        debug!(sender_id = id, destination = sender.destination(), "Sender created");
        Ok(sender)
    }

    /// Closes every tracked sender and refuses new ones.
    ///
    /// All senders are closed even if some fail; the first failure is returned.
    ///
    /// # Errors
    ///
    /// The first error reported by a sender's close.
    #[instrument(skip(self, ctx))]
    pub async fn close(&self, ctx: &Context) -> Result<(), CourierError> {
        self.inner.closed.store(true, Ordering::SeqCst);

        let senders: Vec<Arc<Sender>> = self
            .inner
            .senders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        debug!(senders = senders.len(), "Closing client");

        let results = join_all(senders.iter().map(|sender| sender.close(ctx))).await;

        let mut first_error = None;
        for (sender, result) in senders.iter().zip(results) {
            if let Err(e) = result {
                error!(destination = sender.destination(), error = %e, "Failed to close sender");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
