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

//! Failure classification for retried operations.
//!
//! Every [`LinkError`] an attempt produces is mapped to a [`RecoveryKind`]
//! that tells the [`RetryExecutor`](super::RetryExecutor) what to do next.
//!
//! # Kinds
//!
//! - [`RecoveryKind::Fatal`]: Stop and return the error
//! - [`RecoveryKind::Link`]: Discard the link, then retry on a fresh one
//! - [`RecoveryKind::Transient`]: Retry on the same link after a delay

use serde::{Deserialize, Serialize};

use crate::common::LinkError;

/// Recovery action chosen for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryKind {
    /// Retry after a delay, keeping the current link.
    Transient,

    /// The link is broken. Invalidate it and retry on a new one.
    Link,

    /// Retrying cannot help. The error is returned immediately.
    Fatal,
}

impl RecoveryKind {
    /// Whether another attempt may be made after this kind of failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl std::fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Link => write!(f, "link"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Maps transport failures to recovery actions.
///
/// Any `Fn(&LinkError) -> RecoveryKind` closure is a classifier, which makes
/// per-sender overrides a one-liner:
///
/// ```rust,ignore
/// let sender = sender.with_classifier(|err: &LinkError| match err {
///     LinkError::Throttled(_) => RecoveryKind::Fatal,
///     other => DefaultClassifier.classify(other),
/// });
/// ```
pub trait Classifier: Send + Sync {
    /// Chooses how to recover from `error`.
    fn classify(&self, error: &LinkError) -> RecoveryKind;
}

impl<F> Classifier for F
where
    F: Fn(&LinkError) -> RecoveryKind + Send + Sync,
{
    fn classify(&self, error: &LinkError) -> RecoveryKind {
        self(error)
    }
}

/// The classification used unless a sender installs its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, error: &LinkError) -> RecoveryKind {
        match error {
            LinkError::ConnectionReset(_)
            | LinkError::LinkDetached(_)
            | LinkError::SessionClosed
            | LinkError::ServerBusy(_)
            | LinkError::QuotaExceeded(_) => RecoveryKind::Link,

            LinkError::Timeout | LinkError::Throttled(_) | LinkError::Other(_) => {
                RecoveryKind::Transient
            }

            LinkError::Unauthorized(_)
            | LinkError::EntityNotFound(_)
            | LinkError::MalformedRequest(_)
            | LinkError::MessageTooLarge { .. }
            | LinkError::Rejected(_) => RecoveryKind::Fatal,
        }
    }
}
