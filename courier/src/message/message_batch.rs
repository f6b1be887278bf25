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

//! Size-bounded message batches.
//!
//! A batch is sent to the broker as one payload. Its wire form is the
//! concatenation of length-prefixed frames, one per message:
//!
//! ```text
//! ┌──────────────┬──────────────────┬──────────────┬──────────────────┬───
//! │ len (u32 BE) │ encoded message  │ len (u32 BE) │ encoded message  │ ...
//! └──────────────┴──────────────────┴──────────────┴──────────────────┴───
//! ```
//!
//! The length prefix is the fixed per-message overhead counted against the
//! batch ceiling, so `num_bytes()` is always the exact wire-form length.

use tracing::trace;

use crate::common::BatchError;
use crate::message::Message;

/// Framing overhead added to every message in a batch.
pub const BATCH_MESSAGE_OVERHEAD: u64 = 4;

/// Options for [`Sender::new_message_batch`](crate::common::Sender::new_message_batch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageBatchOptions {
    /// Overrides the batch ceiling in bytes.
    ///
    /// `0` or unset uses the maximum message size advertised by the broker.
    pub max_bytes: u64,
}

/// An ordered group of encoded messages sent as one unit.
///
/// Messages are only appended if they fit under the ceiling fixed at
/// creation; a rejected message leaves the batch untouched. Once
/// [`to_wire_form`](Self::to_wire_form) succeeds the batch is sealed and
/// cannot be reused. Batches are moved into
/// [`Sender::send_message_batch`](crate::common::Sender::send_message_batch)
/// and cannot be cloned, so the same contents are never sent twice.
///
/// ```compile_fail
/// let batch = courier::message::MessageBatch::new(1024);
/// let copy = batch.clone();
/// ```
#[derive(Debug)]
pub struct MessageBatch {
    max_bytes: u64,
    current_size: u64,
    messages: Vec<Vec<u8>>,
    sealed: bool,
}

impl MessageBatch {
    /// Creates an empty batch bounded by `max_bytes`.
    #[must_use]
    pub const fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            current_size: 0,
            messages: Vec::new(),
            sealed: false,
        }
    }

    /// Encodes `message` and appends it if it fits.
    ///
    /// # Errors
    ///
    /// - [`BatchError::MessageTooLarge`] if the message does not fit. Start a
    ///   new batch for it.
    /// - [`BatchError::Sealed`] if the batch was already sent.
    /// - [`BatchError::Encode`] if the message cannot be serialized.
    pub fn try_add(&mut self, message: &Message) -> Result<(), BatchError> {
        if self.sealed {
            return Err(BatchError::Sealed);
        }
        let encoded = message
            .encode()
            .map_err(|e| BatchError::Encode(e.to_string()))?;
        self.try_add_encoded(encoded)
    }

    /// Appends an already encoded message if it fits.
    ///
    /// # Errors
    ///
    /// Same as [`try_add`](Self::try_add), minus encoding failures.
    pub fn try_add_encoded(&mut self, encoded: Vec<u8>) -> Result<(), BatchError> {
        if self.sealed {
            return Err(BatchError::Sealed);
        }

        let framed = encoded.len() as u64 + BATCH_MESSAGE_OVERHEAD;
        let too_large = BatchError::MessageTooLarge {
            size: framed,
            current: self.current_size,
            max: self.max_bytes,
        };

        if u32::try_from(encoded.len()).is_err() {
            return Err(too_large);
        }
        match self.current_size.checked_add(framed) {
            Some(total) if total <= self.max_bytes => {
                self.current_size = total;
                self.messages.push(encoded);
                trace!(
                    messages = self.messages.len(),
                    bytes = self.current_size,
                    max_bytes = self.max_bytes,
                    "Added message to batch"
                );
                Ok(())
            }
            _ => Err(too_large),
        }
    }

    /// Number of messages in the batch.
    #[must_use]
    pub fn num_messages(&self) -> usize {
        self.messages.len()
    }

    /// Bytes used, including per-message overhead.
    #[must_use]
    pub const fn num_bytes(&self) -> u64 {
        self.current_size
    }

    /// The ceiling fixed at creation.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Whether the batch holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the batch has been turned into its wire form.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Produces the payload to transmit and seals the batch.
    ///
    /// # Errors
    ///
    /// - [`BatchError::Empty`] for a batch without messages.
    /// - [`BatchError::Sealed`] if called a second time.
    pub fn to_wire_form(&mut self) -> Result<Vec<u8>, BatchError> {
        if self.sealed {
            return Err(BatchError::Sealed);
        }
        if self.messages.is_empty() {
            return Err(BatchError::Empty);
        }

        let capacity = usize::try_from(self.current_size).unwrap_or_default();
        let mut wire = Vec::with_capacity(capacity);
        for encoded in &self.messages {
            let len = u32::try_from(encoded.len())
                .map_err(|_| BatchError::MalformedWireForm("frame length overflow".to_string()))?;
            wire.extend_from_slice(&len.to_be_bytes());
            wire.extend_from_slice(encoded);
        }
        self.sealed = true;
        Ok(wire)
    }

    /// Splits a wire-form payload back into its encoded messages.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::MalformedWireForm`] on truncated frames.
    pub fn split_wire_form(wire: &[u8]) -> Result<Vec<Vec<u8>>, BatchError> {
        let mut frames = Vec::new();
        let mut rest = wire;
        while !rest.is_empty() {
            let Some((header, tail)) = rest.split_first_chunk::<4>() else {
                return Err(BatchError::MalformedWireForm(format!(
                    "truncated frame header ({} bytes left)",
                    rest.len()
                )));
            };
            let len = u32::from_be_bytes(*header) as usize;
            if tail.len() < len {
                return Err(BatchError::MalformedWireForm(format!(
                    "frame declares {len} bytes but only {} remain",
                    tail.len()
                )));
            }
            let (frame, next) = tail.split_at(len);
            frames.push(frame.to_vec());
            rest = next;
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_len(message: &Message) -> u64 {
        message.encode().unwrap().len() as u64
    }

    #[test]
    fn size_is_sum_of_encoded_sizes_plus_overhead() {
        let messages: Vec<Message> = (0..5).map(|i| Message::new(format!("payload {i}"))).collect();
        let expected: u64 = messages
            .iter()
            .map(|m| encoded_len(m) + BATCH_MESSAGE_OVERHEAD)
            .sum();

        let mut batch = MessageBatch::new(expected);
        for message in &messages {
            batch.try_add(message).unwrap();
        }

        assert_eq!(batch.num_messages(), 5);
        assert_eq!(batch.num_bytes(), expected);
        assert_eq!(batch.num_bytes(), batch.max_bytes());
    }

    #[test]
    fn rejected_message_leaves_batch_unchanged() {
        let first = Message::new("first");
        let max = encoded_len(&first) + BATCH_MESSAGE_OVERHEAD + 3;
        let mut batch = MessageBatch::new(max);
        batch.try_add(&first).unwrap();
        let before = (batch.num_messages(), batch.num_bytes(), batch.messages.clone());

        let err = batch.try_add(&Message::new("second")).unwrap_err();

        assert!(matches!(err, BatchError::MessageTooLarge { current, max: m, .. } if current == before.1 && m == max));
        assert_eq!((batch.num_messages(), batch.num_bytes(), batch.messages.clone()), before);
    }

    #[test]
    fn message_that_alone_exceeds_ceiling_is_rejected() {
        let mut batch = MessageBatch::new(8);
        assert!(matches!(
            batch.try_add_encoded(vec![0; 5]),
            Err(BatchError::MessageTooLarge { size: 9, current: 0, max: 8 })
        ));
        assert!(batch.is_empty());
    }

    #[test]
    fn exact_fit_is_accepted() {
        let mut batch = MessageBatch::new(12);
        batch.try_add_encoded(vec![1; 8]).unwrap();
        assert_eq!(batch.num_bytes(), 12);
        assert!(batch.try_add_encoded(Vec::new()).is_err());
    }

    #[test]
    fn wire_form_length_matches_counted_size() {
        let mut batch = MessageBatch::new(1024);
        batch.try_add_encoded(b"abc".to_vec()).unwrap();
        batch.try_add_encoded(b"defgh".to_vec()).unwrap();

        let wire = batch.to_wire_form().unwrap();
        assert_eq!(wire.len() as u64, batch.num_bytes());
        assert_eq!(&wire[..4], &3_u32.to_be_bytes());
        assert_eq!(
            MessageBatch::split_wire_form(&wire).unwrap(),
            vec![b"abc".to_vec(), b"defgh".to_vec()]
        );
    }

    #[test]
    fn empty_batch_has_no_wire_form() {
        let mut batch = MessageBatch::new(1024);
        assert_eq!(batch.to_wire_form(), Err(BatchError::Empty));
        assert!(!batch.is_sealed());
    }

    #[test]
    fn sealed_batch_cannot_be_reused() {
        let mut batch = MessageBatch::new(1024);
        batch.try_add_encoded(b"abc".to_vec()).unwrap();
        batch.to_wire_form().unwrap();

        assert!(batch.is_sealed());
        assert_eq!(batch.to_wire_form(), Err(BatchError::Sealed));
        assert_eq!(batch.try_add_encoded(b"x".to_vec()), Err(BatchError::Sealed));
    }

    #[test]
    fn truncated_wire_form_is_rejected() {
        assert!(MessageBatch::split_wire_form(&[0, 0, 0]).is_err());
        assert!(MessageBatch::split_wire_form(&[0, 0, 0, 9, 1, 2]).is_err());
        assert!(MessageBatch::split_wire_form(&[]).unwrap().is_empty());
    }
}
