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

//! Integration tests for client sender tracking.

use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;
use courier::testing::MockTransport;
use courier_test::prelude::*;

use crate::setup::*;

mod setup;

fn client(transport: &MockTransport) -> Client {
    let config = CourierConfig {
        retry: fast_retry(3),
        ..Default::default()
    };
    Client::with_config(Arc::new(transport.clone()), config)
}

/// Senders are tracked until they close themselves.
#[courier_test]
async fn test_closed_sender_is_forgotten() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let client = client(&transport);
    let ctx = Context::new();

    let orders = client.new_sender("orders", None)?;
    let invoices = client.new_sender("invoices", None)?;
    assert_eq!(client.num_senders(), 2);

    orders.send_message(&ctx, &Message::new("o-1")).await?;
    orders.close(&ctx).await?;

    assert_eq!(client.num_senders(), 1);
    assert!(!invoices.is_closed());
    Ok(())
}

/// Closing the client closes every remaining sender and refuses new ones.
#[courier_test]
async fn test_client_close_closes_all_senders() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let client = client(&transport);
    let ctx = Context::new();

    let senders: Vec<_> = ["orders", "invoices", "audit"]
        .into_iter()
        .map(|destination| client.new_sender(destination, None))
        .collect::<Result<_, _>>()?;
    for sender in &senders {
        sender.send_message(&ctx, &Message::new("ping")).await?;
    }

    client.close(&ctx).await?;

    assert!(client.is_closed());
    assert_eq!(client.num_senders(), 0);
    assert_eq!(transport.closed_links(), 3);
    for sender in &senders {
        assert!(sender.is_closed());
    }
    assert!(matches!(
        client.new_sender("late", None),
        Err(CourierError::Closed)
    ));
    Ok(())
}

/// Each sender owns its own link.
#[courier_test]
async fn test_senders_do_not_share_links() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let client = client(&transport);
    let ctx = Context::new();

    let first = client.new_sender("orders", None)?;
    let second = client.new_sender("orders", None)?;
    first.send_message(&ctx, &Message::new("a")).await?;
    second.send_message(&ctx, &Message::new("b")).await?;

    assert_eq!(transport.opens(), 2);
    client.close(&ctx).await?;
    Ok(())
}

/// Sender options override the client configuration.
#[courier_test(start_paused)]
async fn test_sender_options_override_config() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    transport.always_fail(Some(LinkError::Timeout));
    let client = client(&transport);

    let sender = client.new_sender(
        "orders",
        Some(SenderOptions {
            retry: Some(fast_retry(2)),
            batch_max_bytes: Some(128),
        }),
    )?;

    let batch = sender.new_message_batch(&Context::new(), None).await?;
    assert_eq!(batch.max_bytes(), 128);

    let err = sender
        .send_message(&Context::new(), &Message::new("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::RetriesExhausted { attempts: 2, .. }));
    Ok(())
}

/// The configured batch ceiling applies to every sender.
#[courier_test]
async fn test_config_batch_ceiling() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let mut config = CourierConfig::default();
    config.batch.max_bytes_override = 2048;
    let client = Client::with_config(Arc::new(transport.clone()), config);

    let sender = client.new_sender("orders", None)?;
    let batch = sender.new_message_batch(&Context::new(), None).await?;

    assert_eq!(batch.max_bytes(), 2048);
    assert_eq!(transport.open_attempts(), 0);
    Ok(())
}

/// A sender closed with a cancelled context during link creation stays closed.
#[courier_test(start_paused)]
async fn test_interrupted_sender_close_still_closes() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new().with_latency(Duration::from_millis(500));
    let client = client(&transport);
    let sender = client.new_sender("orders", None)?;

    let sending = {
        let sender = Arc::clone(&sender);
        tokio::spawn(async move {
            sender
                .send_message(&Context::new(), &Message::new("in flight"))
                .await
        })
    };
    settle().await;

    let cancelled = Context::new();
    cancelled.cancel();
    let err = sender.close(&cancelled).await.unwrap_err();
    assert!(matches!(err, CourierError::Cancelled { .. }), "{err:?}");
    assert!(sender.is_closed());
    assert_eq!(client.num_senders(), 0);

    assert!(matches!(sending.await?, Err(CourierError::Closed)));
    settle().await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(transport.closed_links(), 1);

    client.close(&Context::new()).await?;
    Ok(())
}

/// Senders created while the client closes are either closed or refused.
#[courier_test]
async fn test_new_sender_racing_close_is_not_leaked() -> anyhow::Result<()> {
    initialize_tracing();
    let transport = MockTransport::new();
    let client = client(&transport);

    let creators: Vec<_> = (0..32)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.new_sender(format!("queue-{i}"), None) })
        })
        .collect();
    client.close(&Context::new()).await?;

    for creator in creators {
        match creator.await? {
            Ok(sender) => assert!(sender.is_closed()),
            Err(err) => assert!(matches!(err, CourierError::Closed), "{err:?}"),
        }
    }
    assert_eq!(client.num_senders(), 0);
    Ok(())
}
