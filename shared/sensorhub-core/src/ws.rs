//! WebSocket delivery of a hub subscription
//!
//! One JSON text frame per item. The session ends when the client closes,
//! a send fails, or the hub shuts down; the subscription is dropped (and so
//! unregistered) on every exit path.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Routable;
use crate::fanout::Subscription;

/// Why a subscription session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    SendFailed,
    HubShutdown,
}

/// Forward `subscription` to `socket` until either side goes away.
pub async fn pump_subscription<T>(socket: WebSocket, mut subscription: Subscription<T>) -> SessionEnd
where
    T: Routable + Serialize,
{
    let subscription_id = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    let end = loop {
        tokio::select! {
            item = subscription.recv() => {
                let Some(item) = item else {
                    let _ = sender.send(Message::Close(None)).await;
                    break SessionEnd::HubShutdown;
                };
                let json = match serde_json::to_string(&item) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(subscription_id, error = %e, "Failed to encode item");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json.into())).await {
                    debug!(subscription_id, error = %e, "Send failed");
                    break SessionEnd::SendFailed;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                    Some(Err(e)) => {
                        debug!(subscription_id, error = %e, "Receive failed");
                        break SessionEnd::ClientClosed;
                    }
                    // Requests carry no payload after the upgrade.
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    debug!(subscription_id, reason = ?end, "Subscription session ended");
    end
}
