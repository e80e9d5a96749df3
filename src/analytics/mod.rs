pub mod engine;
pub mod handler;
pub mod types;

use crate::config::AnalyticsConfig;
use crate::storage::store::ScanStore;

/// Shared state for analytics endpoints.
pub struct AnalyticsState {
    pub store: ScanStore,
    pub config: AnalyticsConfig,
}

impl AnalyticsState {
    pub fn new(store: ScanStore, config: AnalyticsConfig) -> Self {
        Self { store, config }
    }
}
