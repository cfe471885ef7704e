pub mod config;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod id;
pub mod ingest;
pub mod model;
pub mod predictor;
pub mod query;
pub mod source;
pub mod store;
pub mod tracker;
pub mod wind;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::ingest::IngestController;
use crate::predictor::Predictor;
use crate::query::QueryService;
use crate::source::SourceClient;
use crate::store::{InMemoryStore, SnapshotStore};
use crate::wind::{WindCache, WindClient};

/// Everything an HTTP handler needs, wired once at startup and shared
/// behind `actix_web::web::Data` (mirrors `sat_api`'s `AppState` in
/// `backend/sat_api/src/main.rs`).
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub ingest: Arc<IngestController>,
    pub query: Arc<QueryService>,
    pub predictor: Arc<Predictor>,
    pub wind_client: Arc<WindClient>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemoryStore::new());
        let source = SourceClient::new(config.balloon_feed_base_url.clone());
        let wind_cache = Arc::new(WindCache::new());
        let wind_client = Arc::new(WindClient::new(config.wind_provider_base_url.clone(), wind_cache));

        let ingest = Arc::new(IngestController::new(store.clone(), source).await?);
        let query = Arc::new(QueryService::new(store.clone(), ingest.clone()));
        let predictor = Arc::new(Predictor::new(store.clone(), wind_client.clone()));

        Ok(Self { store, ingest, query, predictor, wind_client })
    }
}
