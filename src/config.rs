use crate::analytics::engine::MonthFormat;
use crate::types::ScanType;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed to call the analytics API from a browser.
    #[serde(default = "default_dashboard_origin")]
    pub dashboard_origin: String,
}

fn default_dashboard_origin() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub max_payload_bytes: usize,
    pub max_subject_id_bytes: usize,
    pub max_batch_size: usize,
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub flush_interval_secs: u64,
    pub flush_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared secret the view/redirect tier signs ingest bodies with.
    pub hmac_secret: String,
    /// API tokens issued by the identity provider, stored as SHA-256 hex.
    #[serde(default)]
    pub api_tokens: Vec<ApiTokenConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiTokenConfig {
    pub token_sha256: String,
    pub owner_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub per_second: u64,
    pub burst_size: u32,
    #[serde(default = "default_public_per_second")]
    pub public_per_second: u64,
    #[serde(default = "default_public_burst_size")]
    pub public_burst_size: u32,
}

fn default_public_per_second() -> u64 {
    20
}
fn default_public_burst_size() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// `name` or `name+year`.
    #[serde(default = "default_month_format")]
    pub default_month_format: String,
    /// Types charted when a request names none.
    #[serde(default = "default_types")]
    pub default_types: Vec<String>,
    /// Upper bound on scans loaded for one aggregation.
    #[serde(default = "default_max_events")]
    pub max_events_per_query: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_month_format: default_month_format(),
            default_types: default_types(),
            max_events_per_query: default_max_events(),
        }
    }
}

fn default_month_format() -> String {
    "name".to_string()
}
fn default_types() -> Vec<String> {
    ["url", "vcard", "ticket", "product"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_events() -> usize {
    1_000_000
}

impl AnalyticsConfig {
    pub fn month_format(&self) -> MonthFormat {
        self.default_month_format.parse().unwrap_or_default()
    }

    pub fn scan_types(&self) -> Vec<ScanType> {
        self.default_types
            .iter()
            .filter_map(|name| ScanType::from_name(name))
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_subject_ttl")]
    pub subject_ttl_secs: u64,
    #[serde(default = "default_subject_capacity")]
    pub subject_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            subject_ttl_secs: default_subject_ttl(),
            subject_capacity: default_subject_capacity(),
        }
    }
}

fn default_subject_ttl() -> u64 {
    300
}
fn default_subject_capacity() -> u64 {
    10_000
}

impl AppConfig {
    /// Validate configuration before anything binds or opens files.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth.hmac_secret.is_empty() || self.auth.hmac_secret == "change-me-in-production" {
            return Err("auth.hmac_secret must be set to a strong, unique value. \
                 Set it in config.toml or via SCANTALLY__AUTH__HMAC_SECRET env var."
                .to_string());
        }
        if self.auth.hmac_secret.len() < 32 {
            return Err("auth.hmac_secret must be at least 32 characters.".to_string());
        }
        for token in &self.auth.api_tokens {
            if token.token_sha256.len() != 64 || hex::decode(&token.token_sha256).is_err() {
                return Err(format!(
                    "auth.api_tokens entry for owner {} must be a 64-char SHA-256 hex digest",
                    token.owner_id
                ));
            }
            if token.owner_id.is_empty() {
                return Err("auth.api_tokens entries need an owner_id".to_string());
            }
        }
        if let Err(e) = self.analytics.default_month_format.parse::<MonthFormat>() {
            return Err(format!("analytics.default_month_format: {e}"));
        }
        if let Some(bad) = self
            .analytics
            .default_types
            .iter()
            .find(|name| ScanType::from_name(name).is_none())
        {
            return Err(format!("analytics.default_types: unknown scan type {bad}"));
        }
        if self.analytics.default_types.is_empty() {
            return Err("analytics.default_types must name at least one type".to_string());
        }
        let max_events = self.analytics.max_events_per_query;
        if max_events == 0 || max_events >= i64::MAX as usize {
            return Err(format!(
                "analytics.max_events_per_query must be between 1 and {}",
                i64::MAX - 1
            ));
        }
        if self.ingest.max_batch_size == 0 || self.pipeline.flush_batch_size == 0 {
            return Err("batch sizes must be greater than zero".to_string());
        }
        if self.ingest.channel_capacity == 0 {
            return Err("ingest.channel_capacity must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // SCANTALLY__SERVER__PORT=3001 etc.
        builder = builder.add_source(
            Environment::with_prefix("SCANTALLY")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

/// Minimal valid configuration for unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 5340,
            dashboard_origin: default_dashboard_origin(),
        },
        database: DatabaseConfig {
            path: "scans.db".into(),
            pool_size: 4,
        },
        ingest: IngestConfig {
            max_payload_bytes: 32768,
            max_subject_id_bytes: 128,
            max_batch_size: 100,
            channel_capacity: 1024,
        },
        pipeline: PipelineConfig {
            flush_interval_secs: 1,
            flush_batch_size: 100,
        },
        auth: AuthConfig {
            hmac_secret: "a".repeat(40),
            api_tokens: vec![],
        },
        rate_limit: RateLimitConfig {
            per_second: 100,
            burst_size: 200,
            public_per_second: 20,
            public_burst_size: 50,
        },
        analytics: AnalyticsConfig::default(),
        cache: CacheConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        test_config()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut cfg = base();
        cfg.auth.hmac_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_token_digest_rejected() {
        let mut cfg = base();
        cfg.auth.api_tokens.push(ApiTokenConfig {
            token_sha256: "not-hex".into(),
            owner_id: "acme".into(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_default_type_rejected() {
        let mut cfg = base();
        cfg.analytics.default_types = vec!["url".into(), "coupon".into()];
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("coupon"));
    }

    #[test]
    fn test_max_events_bounds() {
        let mut cfg = base();
        cfg.analytics.max_events_per_query = 0;
        assert!(cfg.validate().unwrap_err().contains("max_events_per_query"));

        cfg.analytics.max_events_per_query = usize::MAX;
        assert!(cfg.validate().unwrap_err().contains("max_events_per_query"));

        cfg.analytics.max_events_per_query = i64::MAX as usize;
        assert!(cfg.validate().is_err());

        cfg.analytics.max_events_per_query = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let mut cfg = base();
        cfg.ingest.channel_capacity = 0;
        assert!(cfg.validate().unwrap_err().contains("channel_capacity"));
    }

    #[test]
    fn test_analytics_defaults() {
        let analytics = AnalyticsConfig::default();
        assert_eq!(analytics.month_format(), MonthFormat::Name);
        assert_eq!(
            analytics.scan_types(),
            vec![
                ScanType::Url,
                ScanType::Vcard,
                ScanType::Ticket,
                ScanType::Product
            ]
        );
    }
}
