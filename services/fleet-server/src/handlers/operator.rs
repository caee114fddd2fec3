//! Operator API: start, preview, close and watch campaigns.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use osfleet_campaign::CampaignEvent;
use osfleet_core::{Campaign, FleetError, TargetMetrics, TargetSelection};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunQueryRequest {
    /// Ad-hoc SQL; mutually exclusive with `query_id`
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_id: Option<u64>,
    #[serde(default)]
    pub selected: TargetSelection,
    #[serde(default)]
    pub user_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunQueryResponse {
    pub campaign: Campaign,
    pub metrics: TargetMetrics,
}

#[derive(Debug, Deserialize)]
pub struct TargetsRequest {
    #[serde(default)]
    pub selected: TargetSelection,
}

pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunQueryRequest>,
) -> Result<Json<RunQueryResponse>, ApiError> {
    let campaign = match (&req.query, req.query_id) {
        (Some(sql), None) => state
            .manager
            .new_adhoc_campaign(sql, &req.selected, req.user_id)?,
        (None, Some(query_id)) => state
            .manager
            .new_campaign(query_id, &req.selected, req.user_id)?,
        _ => {
            return Err(FleetError::InvalidInput(
                "exactly one of query or query_id is required".to_string(),
            )
            .into())
        }
    };

    let metrics = state.manager.campaign_metrics(campaign.id, Utc::now())?;
    Ok(Json(RunQueryResponse { campaign, metrics }))
}

pub async fn preview_targets(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TargetsRequest>,
) -> Result<Json<TargetMetrics>, ApiError> {
    let (_, metrics) = state.manager.resolver().resolve(
        &req.selected,
        Utc::now(),
        state.manager.online_interval(),
    )?;
    Ok(Json(metrics))
}

pub async fn close_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<u64>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(state.manager.close_campaign(campaign_id).await?))
}

pub async fn campaign_results(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<u64>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let cancel = CancellationToken::new();
    let events = state.streamer.stream(campaign_id, cancel.clone()).await?;
    Ok(ws
        .on_upgrade(move |socket| forward_events(socket, events, cancel, campaign_id))
        .into_response())
}

async fn forward_events(
    mut socket: WebSocket,
    mut events: mpsc::Receiver<CampaignEvent>,
    cancel: CancellationToken,
    campaign_id: u64,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(campaign_id, error = %e, "Failed to encode campaign event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    cancel.cancel();
    let _ = socket.send(Message::Close(None)).await;
    debug!(campaign_id, "Result viewer disconnected");
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "osfleet-server",
        "timestamp": Utc::now().to_rfc3339()
    }))
}
