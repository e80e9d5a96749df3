use crate::analytics::engine::{
    aggregate_by_month, aggregate_single_type, AggregateOptions, LabelCounts, MonthFormat,
    MonthlySeries, SingleTypeOptions, SingleTypeSeries, TypeMap,
};
use crate::analytics::types::{
    check_range, parse_format, parse_types, BySubjectParams, MonthlyParams, SingleTypeParams,
};
use crate::analytics::AnalyticsState;
use crate::auth::bearer::{resolve_owner, TokenAuth};
use crate::error::{AppError, AppResult};
use crate::storage::store::ScanFilter;
use crate::types::{ScanEvent, ScanType};
use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;

/// Load the scans an aggregation needs. Refuses rather than truncates when the
/// range holds more than the configured maximum, so no partial series is served.
async fn load_events(state: &AnalyticsState, mut filter: ScanFilter) -> AppResult<Vec<ScanEvent>> {
    check_range(filter.since, filter.until)?;
    let max = state.config.max_events_per_query;
    let limit = i64::try_from(max)
        .ok()
        .and_then(|m| m.checked_add(1))
        .ok_or_else(|| {
            AppError::Internal(format!("max_events_per_query {max} out of range"))
        })?;
    filter.limit = Some(limit);

    let events = state.store.list_scans(filter).await?;
    if events.len() > max {
        tracing::warn!(max, "aggregation range exceeds max_events_per_query");
        return Err(AppError::Validation(format!(
            "more than {max} scans in range; narrow since/until"
        )));
    }
    Ok(events)
}

/// GET /analytics/monthly - Per-type monthly counts.
pub async fn monthly(
    State(state): State<Arc<AnalyticsState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Query(qp): Query<MonthlyParams>,
) -> AppResult<Json<MonthlySeries>> {
    let types = parse_types(qp.types.as_deref(), &state.config.scan_types())?;
    let month_format = parse_format(qp.format.as_deref(), state.config.month_format())?;

    // Types are not pushed down: scans of other types still open their month.
    let events = load_events(
        &state,
        ScanFilter {
            subject_id: qp.subject_id,
            since: qp.since,
            until: qp.until,
            owner_id: resolve_owner(&token_auth),
            ..Default::default()
        },
    )
    .await?;

    let options = AggregateOptions {
        type_map: TypeMap::from_types(&types),
        month_format,
    };
    let series = aggregate_by_month(&events, &options);
    tracing::debug!(
        events = events.len(),
        months = series.len(),
        fields = ?options.type_map.fields(),
        "monthly aggregation"
    );
    Ok(Json(series))
}

/// GET /analytics/monthly/vcard-only - vCard scans per month.
pub async fn vcard_only(
    State(state): State<Arc<AnalyticsState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Query(qp): Query<SingleTypeParams>,
) -> AppResult<Json<SingleTypeSeries>> {
    let month_format = parse_format(qp.format.as_deref(), state.config.month_format())?;

    let events = load_events(
        &state,
        ScanFilter {
            subject_id: qp.subject_id.clone(),
            types: Some(vec![ScanType::Vcard]),
            since: qp.since,
            until: qp.until,
            owner_id: resolve_owner(&token_auth),
            ..Default::default()
        },
    )
    .await?;

    let options = SingleTypeOptions {
        subject_id: qp.subject_id,
        month_format,
        field: None,
    };
    Ok(Json(aggregate_single_type(
        &events,
        ScanType::Vcard,
        &options,
    )))
}

/// GET /analytics/monthly/by-subject/{id} - `{ "January 2025": n, ... }` for one subject.
pub async fn by_subject(
    State(state): State<Arc<AnalyticsState>>,
    token_auth: Option<axum::Extension<TokenAuth>>,
    Path(subject_id): Path<String>,
    Query(qp): Query<BySubjectParams>,
) -> AppResult<Json<LabelCounts>> {
    let scan_type = match qp.scan_type.as_deref().map(str::trim) {
        None | Some("") => ScanType::Vcard,
        Some(name) => ScanType::from_name(name)
            .ok_or_else(|| AppError::Validation(format!("unknown scan type: {name}")))?,
    };

    let events = load_events(
        &state,
        ScanFilter {
            subject_id: Some(subject_id.clone()),
            types: Some(vec![scan_type]),
            since: qp.since,
            until: qp.until,
            owner_id: resolve_owner(&token_auth),
            ..Default::default()
        },
    )
    .await?;

    let options = SingleTypeOptions {
        subject_id: Some(subject_id),
        month_format: MonthFormat::NameYear,
        field: None,
    };
    let series = aggregate_single_type(&events, scan_type, &options);
    Ok(Json(series.label_counts(scan_type.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::storage::store::ScanStore;
    use crate::types::ProcessedScan;

    async fn state_with_scans(max_events_per_query: usize, count: i64) -> AnalyticsState {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let db_path = tmp.path().to_path_buf();
        std::mem::forget(tmp);

        let pool = deadpool_sqlite::Config::new(&db_path)
            .create_pool(deadpool_sqlite::Runtime::Tokio1)
            .unwrap();
        crate::storage::sqlite::init_pool(&pool).await.unwrap();
        let scans = (0..count)
            .map(|i| ProcessedScan {
                scan_type: ScanType::Vcard,
                subject_id: "card-1".to_string(),
                scanned_at: 1_736_000_000_000 + i,
                received_at: 1_736_000_000_000 + i,
            })
            .collect();
        crate::storage::writer::write_batch(&pool, scans)
            .await
            .unwrap();

        AnalyticsState::new(
            ScanStore::new(pool),
            AnalyticsConfig {
                max_events_per_query,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_unrepresentable_limit_is_an_error_not_an_empty_result() {
        let state = state_with_scans(usize::MAX, 1).await;
        let result = load_events(&state, ScanFilter::default()).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_limit_boundary() {
        let state = state_with_scans(2, 2).await;
        assert_eq!(
            load_events(&state, ScanFilter::default()).await.unwrap().len(),
            2
        );

        let state = state_with_scans(2, 3).await;
        let result = load_events(&state, ScanFilter::default()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
