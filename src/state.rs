use std::sync::Arc;

use crate::{
    ai::AnalysisClient, auth::jwt::JwtService, config::AppConfig, realtime::ChangeFeed,
    storage::ObjectStorage, store::RecordStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub changes: ChangeFeed,
    pub ai: Arc<dyn AnalysisClient>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        config: AppConfig,
        jwt: JwtService,
        ai: Arc<dyn AnalysisClient>,
    ) -> Self {
        Self {
            store,
            storage,
            config: Arc::new(config),
            jwt,
            changes: ChangeFeed::default(),
            ai,
        }
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }
}
