//! End-to-end pipeline: datastore -> manager -> worker -> alerts -> read surface

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use parking_lot::Mutex;
use posture_camserver::alert_aggregator::AlertAggregator;
use posture_camserver::alert_dispatch::AlertDispatcher;
use posture_camserver::alert_state::AlertLevel;
use posture_camserver::camera_manager::{CameraManager, ManagerConfig};
use posture_camserver::camera_status::CameraStatus;
use posture_camserver::config_store::{
    AlertPolicy, CameraConfig, ConfigStore, Datastore, MemoryDatastore,
};
use posture_camserver::frame_buffer::{Frame, FrameBuffer};
use posture_camserver::frame_source::{FrameSource, SourceConnector};
use posture_camserver::notification::Notifier;
use posture_camserver::overlay::OverlayStyle;
use posture_camserver::perception::{Landmark, PerceptionEngine, Point, PointSet};
use posture_camserver::posture::Metric;
use posture_camserver::state::{AppConfig, AppState};
use posture_camserver::stream_worker::{WorkerConfig, WorkerContext};
use posture_camserver::Result;
use std::sync::Arc;
use std::time::Duration;

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

fn test_jpeg() -> Bytes {
    let image = RgbImage::from_pixel(64, 48, image::Rgb([90, 90, 90]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 80)
        .encode(image.as_raw(), 64, 48, ExtendedColorType::Rgb8)
        .unwrap();
    Bytes::from(out)
}

struct SteadyCamera {
    jpeg: Bytes,
}

#[async_trait]
impl SourceConnector for SteadyCamera {
    async fn open(&self, _camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(SteadySource {
            jpeg: self.jpeg.clone(),
        }))
    }
}

struct SteadySource {
    jpeg: Bytes,
}

#[async_trait]
impl FrameSource for SteadySource {
    async fn read_frame(&mut self) -> Result<Bytes> {
        tokio::time::sleep(FRAME_INTERVAL).await;
        Ok(self.jpeg.clone())
    }
}

/// Reports a seated figure whose left knee is at a settable angle
struct SeatedFigure {
    knee_angle: Mutex<f64>,
}

impl SeatedFigure {
    fn set_knee_angle(&self, degrees: f64) {
        *self.knee_angle.lock() = degrees;
    }
}

#[async_trait]
impl PerceptionEngine for SeatedFigure {
    async fn extract(&self, _camera_id: &str, _frame: &Frame) -> Result<Option<PointSet>> {
        let theta = (*self.knee_angle.lock() - 90.0).to_radians();
        let knee = Point::new(0.5, 0.5);
        Ok(Some(
            PointSet::new()
                .with(Landmark::LeftHip, Point::new(0.5, 0.3))
                .with(Landmark::LeftKnee, knee)
                .with(
                    Landmark::LeftAnkle,
                    Point::new(knee.x + 0.2 * theta.cos(), knee.y + 0.2 * theta.sin()),
                ),
        ))
    }
}

fn desk_camera() -> CameraConfig {
    CameraConfig::new("desk-1", "rtsp://office/desk-1")
        .with_name("Desk 1")
        .with_alert_policy(AlertPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(60),
        ))
}

#[tokio::test(start_paused = true)]
async fn test_bent_knee_escalates_and_clears_end_to_end() {
    let datastore = Arc::new(MemoryDatastore::with_cameras([desk_camera()]));
    let config_store = Arc::new(ConfigStore::new(datastore.clone()));

    let store: Arc<dyn Datastore> = datastore.clone();
    let (dispatcher, dispatch_task) = AlertDispatcher::spawn(Some(store), Vec::<Arc<dyn Notifier>>::new());
    let mut alerts = dispatcher.subscribe();

    let figure = Arc::new(SeatedFigure {
        knee_angle: Mutex::new(40.0),
    });
    let frame_buffer = Arc::new(FrameBuffer::new());
    let aggregator = Arc::new(AlertAggregator::default());

    let ctx = WorkerContext {
        connector: Arc::new(SteadyCamera { jpeg: test_jpeg() }),
        perception: figure.clone(),
        frame_buffer: frame_buffer.clone(),
        aggregator: aggregator.clone(),
        dispatcher: Some(dispatcher.clone()),
    };
    let manager_config = ManagerConfig {
        reconcile_interval: Duration::from_secs(5),
        worker: WorkerConfig {
            sample_interval: 1,
            overlay: Some(OverlayStyle::default()),
            ..WorkerConfig::default()
        },
        ..ManagerConfig::default()
    };
    let manager = Arc::new(CameraManager::new(manager_config, ctx));

    let state = AppState {
        config: AppConfig::default(),
        config_store: config_store.clone(),
        manager: manager.clone(),
        frame_buffer,
        aggregator,
        dispatcher: Some(dispatcher),
    };

    let run_task = {
        let manager = manager.clone();
        let config_store = config_store.clone();
        tokio::spawn(async move { manager.run(&config_store).await })
    };

    // Streaming with annotated frames
    tokio::time::sleep(Duration::from_secs(1)).await;
    let frame = state.latest_frame("desk-1").expect("frame published");
    assert!(frame.annotated);
    let states = state.camera_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, CameraStatus::Streaming);
    assert!(states[0].frames_analyzed > 0);

    // Warning after 2s, critical after 4s of the bent knee
    tokio::time::sleep(Duration::from_secs(5)).await;
    let first = alerts.recv().await.unwrap();
    assert_eq!(first.metric, Metric::LeftKnee);
    assert_eq!(first.level, AlertLevel::Warning);
    let second = alerts.recv().await.unwrap();
    assert_eq!(second.level, AlertLevel::Critical);

    let active = state.active_alerts("desk-1");
    assert_eq!(active.worst_level(), AlertLevel::Critical);
    assert!(active.critical.contains(&Metric::LeftKnee));

    let persisted = datastore.inserted_alerts();
    assert_eq!(persisted.len(), 2);
    assert!(persisted[1].message().contains("left_knee"));

    // Sitting upright clears the alert but keeps history
    figure.set_knee_angle(90.0);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(state.active_alerts("desk-1").is_empty());

    let recent = state.recent_alerts("desk-1", 10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].event.level, AlertLevel::Critical);

    let stats = state.statistics(Some("desk-1"), Duration::from_secs(3600));
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_level.warning, 1);
    assert_eq!(stats.by_level.critical, 1);

    // Disabling the camera stops it and releases its surfaces
    datastore.set_enabled("desk-1", false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(state.camera_states().is_empty());
    assert!(state.latest_frame("desk-1").is_none());
    assert!(state.dead_cameras().is_empty());

    manager.shutdown().await;
    run_task.await.unwrap();

    let dispatched = state.dispatch_stats().unwrap();
    assert_eq!(dispatched.received, 2);
    assert_eq!(dispatched.persisted, 2);

    drop(state);
    drop(manager);
    dispatch_task.await.unwrap();
}
