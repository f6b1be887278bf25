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

//! Ownership of the single live send link for a destination.
//!
//! The manager hands out generation-tagged [`LinkHandle`]s. Work that fails
//! with a link-level error invalidates the handle by generation, so a burst of
//! failures against the same broken link leads to exactly one recreation, and
//! a late invalidation can never tear down a freshly created link.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::common::{Context, CourierError, Interrupt, LinkError};
use crate::traits::{BrokerTransport, SenderLink};

/// Default bound on closing a stale or shut-down link.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live link tagged with the generation that created it.
#[derive(Clone)]
pub struct LinkHandle {
    generation: u64,
    link: Arc<dyn SenderLink>,
}

impl LinkHandle {
    /// Generation of this handle. Increases with every recreation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The underlying link.
    #[must_use]
    pub fn link(&self) -> &dyn SenderLink {
        self.link.as_ref()
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("generation", &self.generation)
            .field("link_name", &self.link.link_name())
            .finish()
    }
}

/// Why [`LinkManager::ensure`] could not produce a handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnsureError {
    /// The manager was closed.
    #[error("link manager is closed")]
    Closed,
    /// The caller's context finished while waiting.
    #[error("interrupted while acquiring link: {0:?}")]
    Interrupted(Interrupt),
    /// The transport failed to open the link.
    #[error("failed to open link: {0}")]
    Open(LinkError),
}

/// Counters describing link churn.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Links successfully opened.
    pub links_opened: AtomicU64,
    /// Invalidations that discarded the current link.
    pub invalidations: AtomicU64,
    /// Invalidations ignored because the generation was already stale.
    pub stale_invalidations: AtomicU64,
}

impl LinkStats {
    /// Get the number of links opened.
    #[must_use]
    pub fn links_opened(&self) -> u64 {
        self.links_opened.load(Ordering::Relaxed)
    }

    /// Get the number of applied invalidations.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Get the number of ignored, stale invalidations.
    #[must_use]
    pub fn stale_invalidations(&self) -> u64 {
        self.stale_invalidations.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct LinkState {
    current: Option<LinkHandle>,
    generation: u64,
}

/// Owns the current [`LinkHandle`] for one destination and recreates it on demand.
///
/// # Thread Safety
///
/// Link state sits behind one async mutex. Link creation holds the lock, so
/// concurrent [`ensure`](Self::ensure) callers share a single creation
/// instead of racing to open several links. The closed flag lives outside
/// the lock: checking or setting it never waits on a creation in progress.
///
/// Discarded links are closed on a background task, so neither recovery nor
/// shutdown waits on a peer that stopped answering.
pub struct LinkManager {
    destination: String,
    transport: Arc<dyn BrokerTransport>,
    state: Arc<Mutex<LinkState>>,
    closed: AtomicBool,
    close_timeout: Duration,
    stats: LinkStats,
}

impl fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkManager")
            .field("destination", &self.destination)
            .field("closed", &self.is_closed())
            .field("close_timeout", &self.close_timeout)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl LinkManager {
    /// Creates a manager for `destination`. No link is opened until first use.
    #[must_use]
    pub fn new(destination: impl Into<String>, transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            destination: destination.into(),
            transport,
            state: Arc::new(Mutex::new(LinkState::default())),
            closed: AtomicBool::new(false),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            stats: LinkStats::default(),
        }
    }

    /// Bounds how long closing a link may take.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// The destination this manager is bound to.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Returns a reference to the statistics.
    #[must_use]
    pub const fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Generation of the most recently created link, `0` before the first.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Whether the manager refuses further use.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuses all further use without releasing the current link.
    ///
    /// Returns `true` for the call that actually closed the manager.
    /// [`close`](Self::close) does this first, then releases the link.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Returns the current handle, opening a link if there is none.
    ///
    /// # Errors
    ///
    /// - [`EnsureError::Closed`] once the manager is closed.
    /// - [`EnsureError::Interrupted`] if `ctx` finishes first.
    /// - [`EnsureError::Open`] if the transport fails to open the link.
    pub async fn ensure(&self, ctx: &Context) -> Result<LinkHandle, EnsureError> {
        if self.is_closed() {
            return Err(EnsureError::Closed);
        }
        let mut state = ctx
            .run(self.state.lock())
            .await
            .map_err(EnsureError::Interrupted)?;

        if self.is_closed() {
            return Err(EnsureError::Closed);
        }
        if let Some(handle) = &state.current {
            trace!(destination = %self.destination, generation = handle.generation, "Reusing current link");
            return Ok(handle.clone());
        }

        debug!(destination = %self.destination, "Opening sender link");
        let link = ctx
            .run(self.transport.open_sender_link(&self.destination))
            .await
            .map_err(EnsureError::Interrupted)?
            .map_err(|e| {
                debug!(destination = %self.destination, error = %e, "Failed to open sender link");
                EnsureError::Open(e)
            })?;

        state.generation += 1;
        let handle = LinkHandle {
            generation: state.generation,
            link,
        };

        // Closed while opening: a close that gave up on the lock never sees this link.
        if self.is_closed() {
            debug!(destination = %self.destination, generation = handle.generation, "Closed while opening, releasing new link");
            self.release(handle);
            return Err(EnsureError::Closed);
        }

        state.current = Some(handle.clone());
        self.stats.links_opened.fetch_add(1, Ordering::Relaxed);
        debug!(
            destination = %self.destination,
            generation = handle.generation,
            link_name = handle.link.link_name(),
            "Sender link ready"
        );
        Ok(handle)
    }

    /// Discards the current link if it still has `generation`.
    ///
    /// Returns `true` if a link was discarded. Invalidating a generation that
    /// was already replaced is a no-op, which makes the call idempotent and
    /// safe to race with in-flight work and with other invalidations. The
    /// discarded link is closed in the background.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let stale = {
            let mut state = self.state.lock().await;
            if state
                .current
                .as_ref()
                .is_some_and(|handle| handle.generation == generation)
            {
                state.current.take()
            } else {
                None
            }
        };

        let Some(stale) = stale else {
            self.stats.stale_invalidations.fetch_add(1, Ordering::Relaxed);
            trace!(destination = %self.destination, generation, "Ignoring stale invalidation");
            return false;
        };

        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        warn!(destination = %self.destination, generation, "Invalidated sender link; it will be recreated on next use");
        self.release(stale);
        true
    }

    /// Refuses all further use, then closes the current link.
    ///
    /// The manager is closed as soon as this is called, whatever the outcome.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a cancellation error if `ctx` finishes while a link creation
    /// holds the lock. The link is then released in the background.
    #[instrument(skip(self, ctx), fields(destination = %self.destination))]
    pub async fn close(&self, ctx: &Context) -> Result<(), CourierError> {
        self.mark_closed();

        let current = match self.state.try_lock() {
            Ok(mut state) => state.current.take(),
            Err(_) => match ctx.run(self.state.lock()).await {
                Ok(mut state) => state.current.take(),
                Err(interrupt) => {
                    debug!("Interrupted while waiting for link, releasing it in the background");
                    self.release_when_unlocked();
                    return Err(interrupt.into_error("close"));
                }
            },
        };

        match current {
            Some(handle) => close_link(&self.destination, self.close_timeout, &handle).await,
            None => trace!("No open link to release"),
        }
        debug!("Link manager closed");
        Ok(())
    }

    fn release(&self, handle: LinkHandle) {
        let destination = self.destination.clone();
        let close_timeout = self.close_timeout;
        tokio::spawn(async move {
            close_link(&destination, close_timeout, &handle).await;
        });
    }

    fn release_when_unlocked(&self) {
        let state = Arc::clone(&self.state);
        let destination = self.destination.clone();
        let close_timeout = self.close_timeout;
        tokio::spawn(async move {
            let current = state.lock().await.current.take();
            if let Some(handle) = current {
                close_link(&destination, close_timeout, &handle).await;
            }
        });
    }
}

async fn close_link(destination: &str, close_timeout: Duration, handle: &LinkHandle) {
    match tokio::time::timeout(close_timeout, handle.link.close()).await {
        Ok(Ok(())) => {
            trace!(destination, generation = handle.generation, "Closed sender link");
        }
        Ok(Err(e)) => {
            debug!(destination, generation = handle.generation, error = %e, "Error closing sender link");
        }
        Err(_) => {
            debug!(destination, generation = handle.generation, "Timed out closing sender link");
        }
    }
}
