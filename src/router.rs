use crate::analytics::{self, AnalyticsState};
use crate::auth::bearer::{self, CredentialProvider};
use crate::config::AppConfig;
use crate::ingest::auth::{HmacBodyLimit, HmacSecret};
use crate::ingest::{self, handler::IngestState};
use crate::query::handler::{self as query_handler, QueryState};
use crate::storage::store::ScanStore;
use crate::subject::{self, SubjectCache, SubjectState};
use crate::types::ProcessedScan;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use deadpool_sqlite::Pool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Assemble every route with its auth, rate limit and CORS layers.
pub fn build_router(
    config: &AppConfig,
    pool: Pool,
    tx: mpsc::Sender<ProcessedScan>,
) -> Result<Router, Box<dyn std::error::Error>> {
    let store = ScanStore::new(pool.clone());

    let credentials = Arc::new(CredentialProvider::from_config(&config.auth));
    if credentials.is_enabled() {
        tracing::info!(tokens = config.auth.api_tokens.len(), "bearer auth enabled");
    } else {
        tracing::warn!("no api_tokens configured, analytics API is open");
    }

    // Build shared state
    let ingest_state = Arc::new(IngestState {
        config: config.ingest.clone(),
        tx: tx.clone(),
    });

    let query_state = Arc::new(QueryState {
        store: store.clone(),
        channel_capacity: config.ingest.channel_capacity,
        channel_tx: tx.clone(),
    });

    let analytics_state = Arc::new(AnalyticsState::new(store, config.analytics.clone()));

    let subject_state = Arc::new(SubjectState {
        pool: pool.clone(),
        cache: SubjectCache::new(pool, &config.cache),
        tx,
    });

    let hmac_secret = HmacSecret(config.auth.hmac_secret.clone());
    let hmac_body_limit = HmacBodyLimit(config.ingest.max_payload_bytes);

    // Rate limiter for ingest routes
    let governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.per_second)
        .burst_size(config.rate_limit.burst_size)
        .finish()
        .ok_or("invalid rate_limit settings")?;

    // Rate limiter for the public scan endpoint
    let public_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.public_per_second)
        .burst_size(config.rate_limit.public_burst_size)
        .finish()
        .ok_or("invalid rate_limit public settings")?;

    // ── Ingest routes (HMAC-signed, from the view/redirect tier) ──
    let ingest_routes = Router::new()
        .route("/v1/scans", post(ingest::handler::record_single))
        .route("/v1/scans/batch", post(ingest::handler::record_batch))
        .layer(DefaultBodyLimit::max(config.ingest.max_payload_bytes))
        .layer(middleware::from_fn(ingest::auth::hmac_auth))
        .layer(axum::Extension(hmac_secret))
        .layer(axum::Extension(hmac_body_limit))
        .layer(GovernorLayer::new(governor_conf))
        .with_state(ingest_state);

    // ── Public scan route ──
    let public_routes = Router::new()
        .route("/s/{id}", get(subject::public_scan))
        .layer(GovernorLayer::new(public_governor_conf))
        .with_state(subject_state.clone());

    // ── Health route (public) ──
    let health_route = Router::new()
        .route("/health", get(query_handler::health))
        .with_state(query_state.clone());

    // ── Protected routes (bearer token) ──
    let analytics_routes = Router::new()
        .route("/analytics/monthly", get(analytics::handler::monthly))
        .route(
            "/analytics/monthly/vcard-only",
            get(analytics::handler::vcard_only),
        )
        .route(
            "/analytics/monthly/by-subject/{id}",
            get(analytics::handler::by_subject),
        )
        .with_state(analytics_state);

    let subject_routes = Router::new()
        .route(
            "/v1/subjects",
            get(subject::list_subjects).post(subject::create_subject),
        )
        .route("/v1/subjects/{id}", get(subject::get_subject))
        .with_state(subject_state);

    // Kept off the ingest paths so each path has exactly one CORS policy.
    let query_routes = Router::new()
        .route("/v1/scans/list", get(query_handler::list_scans))
        .with_state(query_state);

    let protected_routes = analytics_routes
        .merge(subject_routes)
        .merge(query_routes)
        .layer(RequestBodyLimitLayer::new(config.ingest.max_payload_bytes))
        .layer(middleware::from_fn(bearer::require_bearer))
        .layer(axum::Extension(credentials));

    let api_cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(config.server.dashboard_origin.parse()?))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    let ingest_cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-signature"),
        ]);

    let api_routes = protected_routes
        .merge(health_route)
        .merge(public_routes)
        .layer(api_cors);

    Ok(api_routes.merge(ingest_routes.layer(ingest_cors)))
}
