//! ConfigStore - Desired camera set
//!
//! ## Responsibilities
//!
//! - `Datastore` seam: active cameras in, alert events out
//! - Cache of the last successfully loaded desired set
//! - MySQL and in-memory datastore implementations
//!
//! A failed refresh keeps the previous cache; the manager skips that
//! reconciliation tick instead of stopping every camera.

mod memory;
mod repository;
mod types;

pub use memory::MemoryDatastore;
pub use repository::{CameraRow, MySqlDatastore};
pub use types::*;

use crate::alert_state::AlertEvent;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence collaborator
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Cameras that should currently be running
    async fn list_active_cameras(&self) -> Result<Vec<CameraConfig>>;

    /// Durable alert log; returns the stored row id
    async fn insert_alert_event(&self, event: &AlertEvent) -> Result<u64>;
}

#[derive(Debug, Default)]
struct ConfigCache {
    cameras: Vec<CameraConfig>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// ConfigStore instance
pub struct ConfigStore {
    datastore: Arc<dyn Datastore>,
    cache: RwLock<ConfigCache>,
}

impl ConfigStore {
    /// Create new ConfigStore (cache starts empty)
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            cache: RwLock::new(ConfigCache::default()),
        }
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    /// Reload the desired set; on error the previous cache is kept
    pub async fn refresh_cache(&self) -> Result<usize> {
        let cameras: Vec<CameraConfig> = self
            .datastore
            .list_active_cameras()
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect();

        let mut cache = self.cache.write().await;
        cache.cameras = cameras;
        cache.refreshed_at = Some(Utc::now());

        tracing::debug!("ConfigStore cache refreshed: {} cameras", cache.cameras.len());

        Ok(cache.cameras.len())
    }

    /// Get cached cameras (fast read)
    pub async fn get_cached_cameras(&self) -> Vec<CameraConfig> {
        self.cache.read().await.cameras.clone()
    }

    pub async fn get_cached_camera(&self, camera_id: &str) -> Option<CameraConfig> {
        self.cache
            .read()
            .await
            .cameras
            .iter()
            .find(|c| c.camera_id == camera_id)
            .cloned()
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.cache.read().await.refreshed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_filters_disabled() {
        let datastore = Arc::new(MemoryDatastore::new());
        datastore.upsert(CameraConfig::new("cam-001", "rtsp://a"));
        let mut disabled = CameraConfig::new("cam-002", "rtsp://b");
        disabled.enabled = false;
        datastore.upsert(disabled);

        let store = ConfigStore::new(datastore);
        assert_eq!(store.refresh_cache().await.unwrap(), 1);
        assert!(store.get_cached_camera("cam-001").await.is_some());
        assert!(store.get_cached_camera("cam-002").await.is_none());
        assert!(store.last_refreshed().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let datastore = Arc::new(MemoryDatastore::new());
        datastore.upsert(CameraConfig::new("cam-001", "rtsp://a"));

        let store = ConfigStore::new(datastore.clone());
        store.refresh_cache().await.unwrap();

        datastore.set_unavailable(true);
        assert!(store.refresh_cache().await.is_err());
        assert_eq!(store.get_cached_cameras().await.len(), 1);
    }
}
