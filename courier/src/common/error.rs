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

//! Error types surfaced by senders, links and batches.
//!
//! Three layers of errors exist:
//!
//! - [`LinkError`]: what a transport reports for a single attempt. The retry
//!   executor classifies these and never shows them to callers unwrapped.
//! - [`BatchError`]: local batch-packing failures. No I/O is involved.
//! - [`CourierError`]: the single classified error every public operation
//!   returns.

use thiserror::Error;

/// Failure reported by the broker transport for one attempt.
///
/// Variants describe *what happened*; whether it is retried is decided by a
/// [`Classifier`](crate::retry::Classifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The underlying connection was reset by the peer.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The broker detached the send link.
    #[error("link detached: {0}")]
    LinkDetached(String),

    /// The session owning the link was closed.
    #[error("session closed")]
    SessionClosed,

    /// The broker reports it is overloaded and the session should be rebuilt.
    #[error("server busy: {0}")]
    ServerBusy(String),

    /// The broker rejected the request because a quota was exceeded.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The attempt did not complete within its time budget.
    #[error("operation timed out")]
    Timeout,

    /// The broker asked the client to slow down.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Credentials were rejected or lack the needed rights.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The destination queue or topic does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The broker could not parse the request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The payload exceeds the size the broker accepts.
    #[error("message too large: {size} bytes exceeds the limit of {max} bytes")]
    MessageTooLarge {
        /// Size of the rejected payload.
        size: u64,
        /// Limit advertised by the broker.
        max: u64,
    },

    /// The broker refused the request, for example cancelling an unknown
    /// sequence number.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Anything the transport could not map to a more specific variant.
    #[error("{0}")]
    Other(String),
}

/// Failure while packing or serializing a [`MessageBatch`](crate::message::MessageBatch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Adding the message would push the batch past its ceiling.
    ///
    /// The batch is unchanged; start a new batch for this message.
    #[error("message of {size} bytes does not fit: batch holds {current} of {max} bytes")]
    MessageTooLarge {
        /// Encoded size of the message, including its framing overhead.
        size: u64,
        /// Bytes already used by the batch.
        current: u64,
        /// Ceiling fixed when the batch was created.
        max: u64,
    },

    /// The batch holds no messages.
    #[error("batch is empty")]
    Empty,

    /// The batch was already turned into its wire form and may not be reused.
    #[error("batch has already been sent")]
    Sealed,

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// A wire-form payload could not be split back into messages.
    #[error("malformed batch payload: {0}")]
    MalformedWireForm(String),
}

/// The classified error returned by every public operation.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The caller misused the API. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The broker rejected the operation permanently.
    #[error("{operation} failed: {source}")]
    Remote {
        /// Operation that failed.
        operation: String,
        /// Error reported by the broker.
        #[source]
        source: LinkError,
    },

    /// The attempt budget ran out. Carries the last underlying error.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Operation that failed.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: LinkError,
    },

    /// The caller cancelled the operation.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        operation: String,
    },

    /// The caller's deadline passed before the operation completed.
    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded {
        /// Operation that ran out of time.
        operation: String,
    },

    /// The sender or client has been closed.
    #[error("sender is closed")]
    Closed,

    /// The broker returned a different number of sequence numbers than
    /// messages were scheduled.
    #[error("broker returned {received} sequence number(s) for {expected} scheduled message(s)")]
    PartialSchedule {
        /// Number of messages submitted.
        expected: usize,
        /// Number of sequence numbers returned.
        received: usize,
    },

    /// Local batch failure.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CourierError {
    /// Whether the caller aborted the operation, by cancellation or deadline.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }

    /// Whether the operation gave up after using its whole attempt budget.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// The underlying broker error, if this error carries one.
    #[must_use]
    pub const fn link_error(&self) -> Option<&LinkError> {
        match self {
            Self::Remote { source, .. } | Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}
