//! WebSocket handler for metric subscriptions

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::IntoResponse,
};
use sensorhub_core::{ws::pump_subscription, SubscriptionFilter};
use tracing::info;
use uuid::Uuid;

use super::AppState;

/// `GET /v1/metrics/subscribe?sensor_id=&site=`
///
/// The subscription is registered before the upgrade completes, so every
/// metric published after the handshake reaches the client.
pub async fn subscribe_metrics(
    ws: WebSocketUpgrade,
    Query(filter): Query<SubscriptionFilter>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = Uuid::new_v4();
    let subscription = state.hub.subscribe(filter.clone());

    info!(
        %session_id,
        subscription_id = subscription.id(),
        sensor_id = filter.sensor_id.as_deref().unwrap_or("*"),
        site = filter.site.as_deref().unwrap_or("*"),
        "Metric subscriber connected"
    );

    ws.on_upgrade(move |socket| async move {
        let end = pump_subscription(socket, subscription).await;
        info!(%session_id, reason = ?end, "Metric subscriber disconnected");
    })
}
