//! osquery TLS remote API: enrollment, config, distributed queries, logs.

use axum::{extract::State, response::Json};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use osfleet_campaign::QueryName;
use osfleet_core::{FleetError, FleetResult, Host};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::state::AppState;
use crate::wire::{
    DistributedReadResponse, DistributedWriteRequest, EnrollRequest, EnrollResponse, LogRequest,
    NodeInvalidResponse, NodeKeyRequest, ReportedResult,
};

pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let node_key = state
        .host_auth
        .enroll_agent(&req.enroll_secret, &req.host_identifier)?;
    Ok(Json(EnrollResponse { node_key }))
}

pub async fn config(
    State(state): State<Arc<AppState>>,
    auth: Authenticated<NodeKeyRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut document = state.config_provider.config_for_host(&auth.host)?;
    if let Value::Object(map) = &mut document {
        map.insert("node_invalid".to_string(), Value::Bool(false));
    }
    Ok(Json(document))
}

pub async fn distributed_read(
    State(state): State<Arc<AppState>>,
    auth: Authenticated<NodeKeyRequest>,
) -> Result<Json<DistributedReadResponse>, ApiError> {
    let now = Utc::now();
    let host = &auth.host;

    let campaign_queries = state.manager.pending_queries_for_host(host, now)?;
    let accelerate_seconds = if campaign_queries.is_empty() {
        0
    } else {
        state.config.osquery.accelerate_secs
    };

    let mut queries = state.distributor.label_queries_for_host(host, now)?;
    queries.extend(state.distributor.detail_queries_for_host(host, now));
    queries.extend(
        campaign_queries
            .into_iter()
            .map(|(execution_id, sql)| (QueryName::Campaign(execution_id).to_string(), sql)),
    );

    debug!(host_id = host.id, queries = queries.len(), "Distributed read");
    Ok(Json(DistributedReadResponse {
        queries,
        accelerate_seconds,
    }))
}

async fn ingest_result(
    state: &AppState,
    host: &Host,
    result: ReportedResult,
    now: chrono::DateTime<Utc>,
) -> FleetResult<()> {
    match QueryName::parse(&result.name) {
        Some(QueryName::Campaign(execution_id)) => {
            state
                .manager
                .record_result(execution_id, host, result.status, result.rows, result.message, now)
                .await
        }
        Some(QueryName::Label(label_id)) => {
            state
                .distributor
                .record_label_result(host, label_id, result.status, &result.rows, now)
        }
        Some(QueryName::Detail(name)) => {
            state
                .distributor
                .record_detail_result(host, &name, result.status, &result.rows, now)
        }
        None => Err(FleetError::InvalidInput(format!(
            "unknown distributed query name {}",
            result.name
        ))),
    }
}

/// Record every reported entry. Bad entries are logged and skipped; a
/// storage failure on any entry fails the request after the rest are
/// processed, so the agent retries.
pub async fn distributed_write(
    State(state): State<Arc<AppState>>,
    auth: Authenticated<DistributedWriteRequest>,
) -> Result<Json<NodeInvalidResponse>, ApiError> {
    let now = Utc::now();
    let host = &auth.host;
    let mut storage_failure = None;

    for reported in auth.body.results() {
        let result = match reported {
            Ok(result) => result,
            Err((name, reason)) => {
                warn!(
                    host_id = host.id,
                    query = %name,
                    reason = %reason,
                    "Malformed distributed result"
                );
                continue;
            }
        };

        let name = result.name.clone();
        match ingest_result(&state, host, result, now).await {
            Ok(()) => {}
            Err(e @ FleetError::Datastore(_)) => {
                error!(
                    host_id = host.id,
                    query = %name,
                    error = %e,
                    "Failed to store distributed result"
                );
                if storage_failure.is_none() {
                    storage_failure = Some(e);
                }
            }
            Err(e) => {
                warn!(
                    host_id = host.id,
                    query = %name,
                    error = %e,
                    "Distributed result not recorded"
                );
            }
        }
    }

    match storage_failure {
        Some(e) => Err(ApiError(e)),
        None => Ok(Json(NodeInvalidResponse::default())),
    }
}

pub async fn log(
    State(state): State<Arc<AppState>>,
    auth: Authenticated<LogRequest>,
) -> Json<NodeInvalidResponse> {
    let Authenticated { host, body } = auth;
    let host_id = host.id;
    let log_type = body.log_type;
    let sink = state.log_sink.clone();

    let written =
        tokio::task::spawn_blocking(move || sink.write(body.log_type, &host, &body.data)).await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(
            host_id,
            log_type = log_type.as_str(),
            error = %e,
            "Failed to store osquery logs"
        ),
        Err(e) => warn!(host_id, error = %e, "Log sink task did not complete"),
    }
    Json(NodeInvalidResponse::default())
}
