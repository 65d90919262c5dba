use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::error;

use linkboard_core::config::Config;
use linkboard_core::service::MetricsService;
use linkboard_duckdb::DuckDbStore;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB store. Internally `Arc<tokio::sync::Mutex<Connection>>`,
    /// so it is cheap to clone and async-safe.
    pub db: Arc<DuckDbStore>,

    /// The metrics query engine, reading through the store trait.
    pub service: MetricsService,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Fast in-process cache of known-valid site slugs.
    ///
    /// Populated lazily: the first request for a site triggers a store
    /// lookup; subsequent requests hit the cache. Never invalidated during a
    /// server run (sites are not deleted at runtime).
    site_cache: RwLock<HashSet<String>>,
}

impl AppState {
    pub fn new(db: DuckDbStore, config: Config) -> Self {
        let db = Arc::new(db);
        Self {
            service: MetricsService::new(db.clone()),
            db,
            config: Arc::new(config),
            site_cache: RwLock::new(HashSet::new()),
        }
    }

    /// Return `true` if the site slug is known to exist.
    ///
    /// Checks the in-process cache first; on a miss falls back to the store
    /// and populates the cache on success. A store failure propagates — an
    /// unreachable store must never read as "site not found".
    pub async fn is_known_site(&self, site_slug: &str) -> anyhow::Result<bool> {
        {
            let cache = self.site_cache.read().await;
            if cache.contains(site_slug) {
                return Ok(true);
            }
        }

        match self.service.store().site_exists(site_slug).await {
            Ok(true) => {
                let mut cache = self.site_cache.write().await;
                cache.insert(site_slug.to_string());
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                error!(site_slug, error = %e, "site_exists lookup failed");
                Err(e)
            }
        }
    }
}
