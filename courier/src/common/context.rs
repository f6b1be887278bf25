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

//! Caller-supplied cancellation and deadline signal.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::CourierError;

/// Why a [`Context`] stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The context's cancellation token fired.
    Cancelled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl Interrupt {
    /// Converts the interrupt into the error surfaced for `operation`.
    #[must_use]
    pub fn into_error(self, operation: &str) -> CourierError {
        match self {
            Self::Cancelled => CourierError::Cancelled {
                operation: operation.to_string(),
            },
            Self::DeadlineExceeded => CourierError::DeadlineExceeded {
                operation: operation.to_string(),
            },
        }
    }
}

/// Cancellation token plus an optional deadline, passed to every operation.
///
/// Cloning a context shares its token: cancelling any clone cancels them all.
/// Use [`Context::child`] for a context that can be cancelled on its own.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = Context::new().with_timeout(Duration::from_secs(5));
/// sender.send_message(&ctx, &Message::new("hello")).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context driven by an existing cancellation token.
    #[must_use]
    pub const fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets a deadline `timeout` from now, keeping an earlier existing one.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline, keeping an earlier existing one.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// A context cancelled whenever this one is, but cancellable independently.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every clone and child of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The cancellation token backing this context.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The deadline, if one was set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the interrupt if the context is already done.
    ///
    /// Cancellation wins over an expired deadline.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Interrupt::Cancelled,
                    () = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Drives `future` to completion unless the context finishes first.
    ///
    /// On interruption the future is dropped, not awaited.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            interrupt = self.done() => Err(interrupt),
            output = future => Ok(output),
        }
    }
}
