//! WebSocket handler for alert subscriptions

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::IntoResponse,
};
use sensorhub_core::{ws::pump_subscription, SubscriptionFilter};
use tracing::info;
use uuid::Uuid;

use super::AppState;

/// `GET /v1/alerts/subscribe?sensor_id=&site=`
pub async fn subscribe_alerts(
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
        "Alert subscriber connected"
    );

    ws.on_upgrade(move |socket| async move {
        let end = pump_subscription(socket, subscription).await;
        info!(%session_id, reason = ?end, "Alert subscriber disconnected");
    })
}
