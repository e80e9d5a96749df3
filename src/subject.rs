use crate::auth::bearer::{resolve_owner, TokenAuth};
use crate::config::CacheConfig;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::{PaginationParams, ProcessedScan, ScanType};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use deadpool_sqlite::Pool;
use moka::sync::Cache;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A trackable artifact: URL/QR record, vCard, ticket or product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub kind: ScanType,
    pub name: String,
    pub target: Option<String>,
    pub owner_id: String,
    pub created_at: i64,
}

/// Public view returned by the scan endpoint (no owner).
#[derive(Debug, Clone, Serialize)]
pub struct SubjectView {
    pub id: String,
    pub kind: ScanType,
    pub name: String,
    pub target: Option<String>,
}

impl From<Subject> for SubjectView {
    fn from(s: Subject) -> Self {
        Self {
            id: s.id,
            kind: s.kind,
            name: s.name,
            target: s.target,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSubject {
    pub kind: ScanType,
    pub name: String,
    pub target: Option<String>,
    /// Only honoured when the request carries no token.
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSubjectsParams {
    pub owner_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Subject lookups for the public scan path, cached by id.
pub struct SubjectCache {
    cache: Cache<String, Subject>,
    pool: Pool,
}

impl SubjectCache {
    pub fn new(pool: Pool, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.subject_capacity)
            .time_to_live(Duration::from_secs(config.subject_ttl_secs))
            .build();
        Self { cache, pool }
    }

    pub async fn resolve(&self, id: &str) -> AppResult<Option<Subject>> {
        if let Some(subject) = self.cache.get(id) {
            return Ok(Some(subject));
        }

        let found = load_subject(&self.pool, id).await?;
        if let Some(ref subject) = found {
            self.cache.insert(id.to_string(), subject.clone());
        }
        Ok(found)
    }
}

pub struct SubjectState {
    pub pool: Pool,
    pub cache: SubjectCache,
    pub tx: mpsc::Sender<ProcessedScan>,
}

fn row_to_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    let code: i64 = row.get(1)?;
    let kind = ScanType::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown subject kind {code}").into(),
        )
    })?;
    Ok(Subject {
        id: row.get(0)?,
        kind,
        name: row.get(2)?,
        target: row.get(3)?,
        owner_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

async fn load_subject(pool: &Pool, id: &str) -> AppResult<Option<Subject>> {
    let id = id.to_string();
    let conn = pool.get().await?;
    let subject = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT id, kind, name, target, owner_id, created_at FROM subjects WHERE id = ?1",
                params![id],
                row_to_subject,
            )
            .optional()
        })
        .await??;
    Ok(subject)
}

fn validate_target(kind: ScanType, target: Option<&str>) -> AppResult<()> {
    match target {
        Some(raw) => {
            let parsed = url::Url::parse(raw)
                .map_err(|e| AppError::Validation(format!("invalid target url: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Validation(
                    "target url must use http or https".to_string(),
                ));
            }
            Ok(())
        }
        None if kind == ScanType::Url => Err(AppError::Validation(
            "url subjects require a target".to_string(),
        )),
        None => Ok(()),
    }
}

/// POST /v1/subjects - Register a subject.
pub async fn create_subject(
    State(state): State<Arc<SubjectState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    LoggedJson(input): LoggedJson<CreateSubject>,
) -> AppResult<Json<Subject>> {
    let owner_id = resolve_owner(&token_auth)
        .or(input.owner_id.clone())
        .filter(|o| !o.is_empty())
        .ok_or_else(|| AppError::Validation("owner_id is required".to_string()))?;
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    validate_target(input.kind, input.target.as_deref())?;

    let subject = Subject {
        id: uuid::Uuid::new_v4().to_string(),
        kind: input.kind,
        name: input.name.trim().to_string(),
        target: input.target,
        owner_id,
        created_at: chrono::Utc::now().timestamp(),
    };

    let s = subject.clone();
    let conn = state.pool.get().await?;
    conn.interact(move |conn| {
        conn.execute(
            "INSERT INTO subjects (id, kind, name, target, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![s.id, s.kind.code(), s.name, s.target, s.owner_id, s.created_at],
        )
    })
    .await??;

    tracing::info!(subject_id = %subject.id, kind = %subject.kind, owner_id = %subject.owner_id, "subject created");
    Ok(Json(subject))
}

/// GET /v1/subjects - List subjects of the caller (or of `owner_id` without a token).
pub async fn list_subjects(
    State(state): State<Arc<SubjectState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Query(params): Query<ListSubjectsParams>,
) -> AppResult<Json<Vec<Subject>>> {
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let (limit, offset) = (page.limit(), page.offset());
    let owner_id = resolve_owner(&token_auth).or(params.owner_id);

    let conn = state.pool.get().await?;
    let subjects = conn
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, name, target, owner_id, created_at
                 FROM subjects
                 WHERE (?1 IS NULL OR owner_id = ?1)
                 ORDER BY created_at, id
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![owner_id, limit, offset], row_to_subject)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await??;

    Ok(Json(subjects))
}

/// GET /v1/subjects/{id}
pub async fn get_subject(
    State(state): State<Arc<SubjectState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(id): Path<String>,
) -> AppResult<Json<Subject>> {
    let subject = load_subject(&state.pool, &id).await?;
    match (subject, resolve_owner(&token_auth)) {
        (Some(s), Some(owner)) if s.owner_id != owner => {
            Err(AppError::NotFound(format!("subject {id}")))
        }
        (Some(s), _) => Ok(Json(s)),
        (None, _) => Err(AppError::NotFound(format!("subject {id}"))),
    }
}

/// GET /s/{id} - Public scan: record a scan of the subject, then redirect
/// URL subjects to their target or return the subject view.
pub async fn public_scan(
    State(state): State<Arc<SubjectState>>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let Some(subject) = state.cache.resolve(&id).await? else {
        return Err(AppError::NotFound(format!("subject {id}")));
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let scan = ProcessedScan {
        scan_type: subject.kind,
        subject_id: subject.id.clone(),
        scanned_at: now_ms,
        received_at: now_ms,
    };
    if state.tx.try_send(scan).is_err() {
        tracing::warn!(subject_id = %subject.id, "scan channel full, scan dropped");
    }

    match (subject.kind, subject.target.as_deref()) {
        (ScanType::Url, Some(target)) => Ok(Redirect::temporary(target).into_response()),
        _ => Ok(Json(SubjectView::from(subject)).into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_subject_needs_http_target() {
        assert!(validate_target(ScanType::Url, None).is_err());
        assert!(validate_target(ScanType::Url, Some("ftp://example.com")).is_err());
        assert!(validate_target(ScanType::Url, Some("not a url")).is_err());
        assert!(validate_target(ScanType::Url, Some("https://example.com/menu")).is_ok());
    }

    #[test]
    fn test_other_kinds_target_optional() {
        assert!(validate_target(ScanType::Vcard, None).is_ok());
        assert!(validate_target(ScanType::Product, Some("https://shop.example.com/p/1")).is_ok());
    }
}
