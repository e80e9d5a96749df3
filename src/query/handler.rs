use crate::auth::bearer::{resolve_owner, TokenAuth};
use crate::error::{AppError, AppResult};
use crate::storage::store::{ScanFilter, ScanStore};
use crate::types::{HealthResponse, PaginationParams, ProcessedScan, ScanEvent, ScanType};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct QueryState {
    pub store: ScanStore,
    pub channel_capacity: usize,
    pub channel_tx: mpsc::Sender<ProcessedScan>,
}

#[derive(Debug, Deserialize)]
pub struct ScanQueryParams {
    #[serde(rename = "subjectId", alias = "subject_id")]
    pub subject_id: Option<String>,
    #[serde(rename = "type")]
    pub scan_type: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /v1/scans/list - Raw scan listing, oldest first.
pub async fn list_scans(
    State(state): State<Arc<QueryState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Query(params): Query<ScanQueryParams>,
) -> AppResult<Json<Vec<ScanEvent>>> {
    let types = match params.scan_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(name) => Some(vec![ScanType::from_name(name).ok_or_else(|| {
            AppError::Validation(format!("unknown scan type: {name}"))
        })?]),
    };
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };

    let scans = state
        .store
        .list_scans(ScanFilter {
            subject_id: params.subject_id,
            types,
            since: params.since,
            until: params.until,
            owner_id: resolve_owner(&token_auth),
            limit: Some(page.limit()),
            offset: Some(page.offset()),
        })
        .await?;

    Ok(Json(scans))
}

/// GET /health
pub async fn health(State(state): State<Arc<QueryState>>) -> Json<HealthResponse> {
    let db_ok = state.store.ping().await;

    // Approximate buffer usage from channel capacity
    let buffer_usage = 1.0 - (state.channel_tx.capacity() as f64 / state.channel_capacity as f64);

    Json(HealthResponse {
        status: if db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        db_ok,
        buffer_usage,
    })
}
