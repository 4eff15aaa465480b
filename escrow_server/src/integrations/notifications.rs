//! Forwards escrow events to the notification service.
//!
//! Sellers and buyers are told about releases, refunds and disputes by the notification service, not by this server.
//! Delivery is best effort: a failed notification is logged and never affects the escrow.
use escrow_engine::events::{EscrowDisputedEvent, EscrowRefundedEvent, EscrowReleasedEvent, EventHooks};
use log::*;
use serde::Serialize;
use settlement_clients::NotificationClient;

/// Builds the hooks that forward every escrow event to `client`. With no client, no hooks are installed.
pub fn notification_hooks(client: Option<NotificationClient>) -> EventHooks {
    let mut hooks = EventHooks::default();
    let Some(client) = client else {
        return hooks;
    };
    let released = client.clone();
    let refunded = client.clone();
    hooks
        .on_escrow_released(move |ev| {
            let client = released.clone();
            Box::pin(async move { forward(&client, EscrowReleasedEvent::TOPIC, &ev).await })
        })
        .on_escrow_refunded(move |ev| {
            let client = refunded.clone();
            Box::pin(async move { forward(&client, EscrowRefundedEvent::TOPIC, &ev).await })
        })
        .on_escrow_disputed(move |ev| {
            let client = client.clone();
            Box::pin(async move { forward(&client, EscrowDisputedEvent::TOPIC, &ev).await })
        });
    hooks
}

async fn forward<T: Serialize>(client: &NotificationClient, topic: &str, event: &T) {
    match client.notify(topic, event).await {
        Ok(()) => debug!("📬️ Forwarded {topic} notification"),
        Err(e) => warn!("📬️ Could not forward {topic} notification. {e}"),
    }
}
