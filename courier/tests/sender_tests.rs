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

//! Integration tests for the sender operations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use courier::prelude::*;
use courier::testing::MockTransport;
use courier_test::prelude::*;

use crate::setup::*;

mod setup;

/// Sending one message delivers it unchanged.
#[courier_test]
async fn test_send_message_delivers() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));
    let ctx = Context::new();

    let message = Message::new("hello")
        .with_message_id("m-1")
        .with_subject("greeting")
        .with_property("priority", 5);
    sender.send_message(&ctx, &message).await?;

    assert_eq!(transport.sent_messages(), vec![message]);
    assert_eq!(transport.opens(), 1);
    sender.close(&ctx).await?;
    Ok(())
}

/// A detached link is replaced and the send retried on the new one.
#[courier_test(start_paused)]
async fn test_send_message_recovers_from_detached_link() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    transport.push_failure(LinkError::LinkDetached("idle timeout".into()));
    let sender = sender_for(&transport, fast_retry(3));
    let ctx = Context::new();

    sender.send_message(&ctx, &Message::new("retry me")).await?;

    assert_eq!(transport.sent_messages().len(), 1);
    assert_eq!(transport.opens(), 2);
    assert_eq!(sender.link_stats().invalidations(), 1);
    Ok(())
}

/// A message the broker refuses as too large is not retried.
#[courier_test(start_paused)]
async fn test_oversized_message_is_fatal() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new().with_max_message_size(64);
    let sender = sender_for(&transport, fast_retry(3));

    let err = sender
        .send_message(&Context::new(), &Message::new(vec![0_u8; 256]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CourierError::Remote { source: LinkError::MessageTooLarge { max: 64, .. }, .. }
    ));
    assert_eq!(transport.link_calls(), 1);
    Ok(())
}

/// Scheduling N messages returns N sequence numbers in input order.
#[courier_test]
async fn test_schedule_messages_returns_numbers_in_order() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));
    let ctx = Context::new();
    let enqueue_time = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();

    let messages: Vec<Message> = (0..5)
        .map(|i| Message::new(format!("order {i}")).with_message_id(format!("order-{i}")))
        .collect();
    let sequence_numbers = sender.schedule_messages(&ctx, &messages, enqueue_time).await?;

    assert_eq!(sequence_numbers.len(), 5);
    let scheduled = transport.scheduled();
    for ((message, number), entry) in messages.iter().zip(&sequence_numbers).zip(&scheduled) {
        assert_eq!(entry.sequence_number, *number);
        assert_eq!(entry.message.sequence_number, Some(*number));
        assert_eq!(entry.message.message_id, message.message_id);
        assert_eq!(entry.message.scheduled_enqueue_time, Some(enqueue_time));
        assert_eq!(entry.enqueue_time, enqueue_time);
    }
    assert!(messages.iter().all(|m| m.scheduled_enqueue_time.is_none()));
    assert!(messages.iter().all(|m| m.sequence_number.is_none()));
    Ok(())
}

/// Scheduling nothing performs no I/O.
#[courier_test]
async fn test_schedule_nothing_is_a_no_op() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));

    let numbers = sender
        .schedule_messages(&Context::new(), &[], Utc::now())
        .await?;

    assert!(numbers.is_empty());
    assert_eq!(transport.open_attempts(), 0);
    Ok(())
}

/// A response with missing sequence numbers is one aggregate failure.
#[courier_test]
async fn test_partial_schedule_is_an_error() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    transport.truncate_schedule_responses(true);
    let sender = sender_for(&transport, fast_retry(3));
    let messages = vec![Message::new("a"), Message::new("b"), Message::new("c")];

    let err = sender
        .schedule_messages(&Context::new(), &messages, Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CourierError::PartialSchedule { expected: 3, received: 2 }
    ));
    Ok(())
}

/// Scheduled messages can be cancelled by sequence number.
#[courier_test]
async fn test_cancel_scheduled_messages() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));
    let ctx = Context::new();

    let first = sender
        .schedule_message(&ctx, &Message::new("first"), Utc::now())
        .await?;
    let second = sender
        .schedule_message(&ctx, &Message::new("second"), Utc::now())
        .await?;
    sender.cancel_scheduled_messages(&ctx, &[first]).await?;

    assert_eq!(transport.cancelled(), vec![first]);
    let remaining: Vec<i64> = transport.scheduled().iter().map(|e| e.sequence_number).collect();
    assert_eq!(remaining, vec![second]);
    Ok(())
}

/// Cancelling an unknown sequence number surfaces the broker's rejection.
#[courier_test(start_paused)]
async fn test_cancel_unknown_sequence_number_surfaces_broker_error() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));

    let err = sender
        .cancel_scheduled_messages(&Context::new(), &[404])
        .await
        .unwrap_err();

    assert!(matches!(
        err.link_error(),
        Some(LinkError::Rejected(_))
    ));
    assert_eq!(transport.link_calls(), 1);
    Ok(())
}

/// Closing twice runs the cleanup callback once and disables the sender.
#[courier_test]
async fn test_close_twice_runs_cleanup_once() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&cleanups);
    let sender = sender_for(&transport, fast_retry(3)).with_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let ctx = Context::new();

    sender.send_message(&ctx, &Message::new("before close")).await?;
    sender.close(&ctx).await?;
    sender.close(&ctx).await?;

    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(sender.is_closed());
    assert_eq!(transport.closed_links(), 1);

    let err = sender
        .send_message(&ctx, &Message::new("after close"))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Closed));
    assert!(matches!(
        sender.schedule_messages(&ctx, &[], Utc::now()).await,
        Err(CourierError::Closed)
    ));
    Ok(())
}

/// Closing a sender that never opened a link still runs the callback.
#[courier_test]
async fn test_close_without_link() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&cleanups);
    let sender = sender_for(&transport, fast_retry(3)).with_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    sender.close(&Context::new()).await?;

    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(transport.opens(), 0);
    Ok(())
}

/// Concurrent sends from many tasks share one link.
#[courier_test]
async fn test_concurrent_sends_share_link() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new().with_latency(Duration::from_millis(5));
    let sender = Arc::new(sender_for(&transport, fast_retry(3)));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move {
                sender
                    .send_message(&Context::new(), &Message::new(format!("msg {i}")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    assert_eq!(transport.sent_messages().len(), 10);
    assert_eq!(transport.opens(), 1);
    Ok(())
}

/// A custom classifier can turn throttling into a hard failure.
#[courier_test(start_paused)]
async fn test_custom_classifier() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    transport.always_fail(Some(LinkError::Throttled("slow down".into())));
    let sender = sender_for(&transport, fast_retry(4)).with_classifier(|err: &LinkError| {
        match err {
            LinkError::Throttled(_) => RecoveryKind::Fatal,
            other => DefaultClassifier.classify(other),
        }
    });

    let err = sender
        .send_message(&Context::new(), &Message::new("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::Remote { .. }));
    assert_eq!(transport.link_calls(), 1);
    Ok(())
}

/// Closing with a cancelled context still closes the sender for good.
#[courier_test]
async fn test_close_with_cancelled_context_disables_sender() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let cleanups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&cleanups);
    let sender = sender_for(&transport, fast_retry(3)).with_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let ctx = Context::new();
    sender.send_message(&ctx, &Message::new("before close")).await?;

    let cancelled = Context::new();
    cancelled.cancel();
    sender.close(&cancelled).await?;

    assert!(sender.is_closed());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(transport.closed_links(), 1);

    let err = sender
        .send_message(&ctx, &Message::new("after close"))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Closed));
    assert_eq!(transport.sent_messages().len(), 1);

    sender.close(&ctx).await?;
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    Ok(())
}

/// A deadline reached while a send is on the wire abandons the send.
#[courier_test(start_paused)]
async fn test_deadline_during_send_abandons_it() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let sender = sender_for(&transport, fast_retry(3));
    sender
        .send_message(&Context::new(), &Message::new("warm up"))
        .await?;

    transport.set_latency(Some(Duration::from_secs(10)));
    let ctx = Context::new().with_timeout(Duration::from_millis(100));
    let started = tokio::time::Instant::now();
    let err = sender
        .send_message(&ctx, &Message::new("slow"))
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::DeadlineExceeded { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.link_calls(), 2);
    assert_eq!(transport.sent_messages().len(), 1);
    Ok(())
}
