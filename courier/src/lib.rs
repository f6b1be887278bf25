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

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

//! # Courier
//!
//! The dispatch core of a message-broker producer. Courier sends messages and
//! size-bounded batches to a named queue or topic, schedules messages for
//! delayed delivery and cancels them again, retrying every broker operation
//! and transparently replacing broken links.
//!
//! ## Key Concepts
//!
//! - **Senders (`Sender`)**: the public operations for one destination. Every
//!   operation is one run of the retry executor.
//! - **Batches (`MessageBatch`)**: messages packed under a byte ceiling and
//!   sent as one unit.
//! - **Links (`LinkManager`)**: the single live send path of a sender, tagged
//!   with a generation so stale failures never tear down a fresh link.
//! - **Retries (`RetryExecutor`)**: classify each failure as fatal, link or
//!   transient, then back off with jitter and try again.
//! - **Contexts (`Context`)**: cancellation and deadlines for every
//!   operation, honored during I/O and backoff alike.
//! - **Transport (`BrokerTransport`, `SenderLink`)**: the wire protocol sits
//!   behind these traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! let client = Client::new(Arc::new(my_transport));
//! let sender = client.new_sender("orders", None)?;
//! let ctx = Context::new().with_timeout(Duration::from_secs(30));
//!
//! sender.send_message(&ctx, &Message::new("hello")).await?;
//! client.close(&ctx).await?;
//! ```

/// Senders, clients, configuration, errors and contexts.
pub mod common;

/// Link ownership and recreation.
pub mod link;

/// Messages and batches.
pub mod message;

/// The retry loop and failure classification.
pub mod retry;

/// In-memory transport for tests.
pub mod testing;

/// Transport traits.
pub mod traits;

/// Commonly used items.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::common::{
        BatchError, Client, Context, CourierConfig, CourierError, Interrupt, LinkError, Sender,
        SenderOptions, CONFIG,
    };
    pub use crate::link::{LinkHandle, LinkManager};
    pub use crate::message::{Message, MessageBatch, MessageBatchOptions};
    pub use crate::retry::{Classifier, DefaultClassifier, RecoveryKind, RetryOptions};
    pub use crate::traits::{BrokerTransport, SenderLink};
}
