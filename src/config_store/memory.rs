//! In-memory datastore (tests, demos)

use super::{CameraConfig, Datastore};
use crate::alert_state::AlertEvent;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Datastore backed by process memory
#[derive(Default)]
pub struct MemoryDatastore {
    cameras: RwLock<BTreeMap<String, CameraConfig>>,
    alerts: Mutex<Vec<AlertEvent>>,
    unavailable: AtomicBool,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cameras(cameras: impl IntoIterator<Item = CameraConfig>) -> Self {
        let store = Self::new();
        for camera in cameras {
            store.upsert(camera);
        }
        store
    }

    pub fn upsert(&self, camera: CameraConfig) {
        self.cameras.write().insert(camera.camera_id.clone(), camera);
    }

    pub fn remove(&self, camera_id: &str) -> Option<CameraConfig> {
        self.cameras.write().remove(camera_id)
    }

    pub fn set_enabled(&self, camera_id: &str, enabled: bool) -> bool {
        match self.cameras.write().get_mut(camera_id) {
            Some(camera) => {
                camera.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Simulate an outage: every call fails until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn inserted_alerts(&self) -> Vec<AlertEvent> {
        self.alerts.lock().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database("memory datastore unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn list_active_cameras(&self) -> Result<Vec<CameraConfig>> {
        self.check_available()?;
        Ok(self
            .cameras
            .read()
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    async fn insert_alert_event(&self, event: &AlertEvent) -> Result<u64> {
        self.check_available()?;
        let mut alerts = self.alerts.lock();
        alerts.push(event.clone());
        Ok(alerts.len() as u64)
    }
}
