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
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, trace, warn};

use super::{Backoff, Classifier, DefaultClassifier, RecoveryKind, RetryOptions};
use crate::common::{Context, CourierError, LinkError};
use crate::link::{EnsureError, LinkHandle, LinkManager};

/// Position of an attempt within its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptInfo {
    /// One-based attempt number.
    pub attempt: u32,
    /// Total attempts allowed.
    pub max_attempts: u32,
}

impl AttemptInfo {
    /// Whether this is the final allowed attempt.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

enum AttemptError {
    /// Stop retrying and return this error as is.
    Abort(CourierError),
    /// The attempt failed and should be classified.
    Failed {
        error: LinkError,
        generation: Option<u64>,
    },
}

/// Runs link operations under a retry budget.
///
/// Each attempt acquires a link from the [`LinkManager`] and hands it to the
/// caller's work closure. Failures are classified:
///
/// - `Fatal` errors are returned at once as [`CourierError::Remote`].
/// - `Link` errors invalidate the generation the attempt used, so the next
///   attempt runs on a freshly created link.
/// - `Transient` errors retry on the same link.
///
/// Between attempts the executor sleeps for an exponentially growing,
/// jittered delay. Cancelling the [`Context`] interrupts any wait at once.
#[derive(Clone)]
pub struct RetryExecutor {
    links: Arc<LinkManager>,
    options: RetryOptions,
    classifier: Arc<dyn Classifier>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("destination", &self.links.destination())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor using the [`DefaultClassifier`].
    #[must_use]
    pub fn new(links: Arc<LinkManager>, options: RetryOptions) -> Self {
        Self {
            links,
            options,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    /// Replaces the failure classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// The options this executor retries with.
    #[must_use]
    pub const fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// The link manager attempts draw their links from.
    #[must_use]
    pub const fn links(&self) -> &Arc<LinkManager> {
        &self.links
    }

    /// Runs `work` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `work` is called once per attempt with the current link and the
    /// attempt's position. It must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// - [`CourierError::Remote`] for a fatal failure.
    /// - [`CourierError::RetriesExhausted`] once every attempt failed. The
    ///   last failure is attached.
    /// - [`CourierError::Cancelled`] or [`CourierError::DeadlineExceeded`]
    ///   when `ctx` finishes first.
    /// - [`CourierError::Closed`] if the link manager was closed.
    #[instrument(skip(self, ctx, work), fields(destination = %self.links.destination()))]
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &Context,
        operation: &str,
        mut work: F,
    ) -> Result<T, CourierError>
    where
        F: FnMut(LinkHandle, AttemptInfo) -> Fut,
        Fut: Future<Output = Result<T, LinkError>>,
    {
        let max_attempts = self.options.effective_attempts();
        let mut backoff = Backoff::new(&self.options);
        let mut quick_retry_available = self.options.quick_link_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.check().map_err(|i| i.into_error(operation))?;

            let info = AttemptInfo {
                attempt,
                max_attempts,
            };
            trace!(attempt, max_attempts, "Starting attempt");

            let (error, generation) = match self.attempt(ctx, operation, &mut work, info).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Abort(err)) => return Err(err),
                Err(AttemptError::Failed { error, generation }) => (error, generation),
            };

            let kind = self.classifier.classify(&error);
            match kind {
                RecoveryKind::Fatal => {
                    error!(attempt, operation, error = %error, "Fatal failure, not retrying");
                    return Err(CourierError::Remote {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
                RecoveryKind::Link => {
                    if let Some(generation) = generation {
                        ctx.run(self.links.invalidate(generation))
                            .await
                            .map_err(|i| i.into_error(operation))?;
                    }
                }
                RecoveryKind::Transient => {}
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "Retry budget exhausted");
                return Err(CourierError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = if kind == RecoveryKind::Link && quick_retry_available {
                quick_retry_available = false;
                Duration::ZERO
            } else {
                backoff.next_delay()
            };
            debug!(
                attempt,
                recovery = %kind,
                error = %error,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Attempt failed, retrying"
            );

            if !delay.is_zero() {
                ctx.run(tokio::time::sleep(delay))
                    .await
                    .map_err(|i| i.into_error(operation))?;
            }
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        ctx: &Context,
        operation: &str,
        work: &mut F,
        info: AttemptInfo,
    ) -> Result<T, AttemptError>
    where
        F: FnMut(LinkHandle, AttemptInfo) -> Fut,
        Fut: Future<Output = Result<T, LinkError>>,
    {
        let mut used_generation = None;
        let bounded = tokio::time::timeout(self.options.try_timeout(), async {
            let handle = match self.links.ensure(ctx).await {
                Ok(handle) => handle,
                Err(EnsureError::Closed) => return Err(AttemptError::Abort(CourierError::Closed)),
                Err(EnsureError::Interrupted(interrupt)) => {
                    return Err(AttemptError::Abort(interrupt.into_error(operation)))
                }
                Err(EnsureError::Open(error)) => {
                    return Err(AttemptError::Failed {
                        error,
                        generation: None,
                    })
                }
            };
            let generation = handle.generation();
            used_generation = Some(generation);
            work(handle, info).await.map_err(|error| AttemptError::Failed {
                error,
                generation: Some(generation),
            })
        });

        let outcome = ctx.run(bounded).await;
        match outcome {
            Err(interrupt) => Err(AttemptError::Abort(interrupt.into_error(operation))),
            Ok(Err(_elapsed)) => Err(AttemptError::Failed {
                error: LinkError::Timeout,
                generation: used_generation,
            }),
            Ok(Ok(result)) => result,
        }
    }
}
