pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod router;
pub mod storage;
pub mod subject;
pub mod types;
