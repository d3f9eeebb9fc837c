//! In-memory driver used by lifecycle and manager tests.

use super::lifecycle::{EventDispatcher, ProtocolDriver};
use super::types::{
    Capabilities, CameraConfig, CameraInfo, Preset, PtzMovement, StatsSnapshot, StreamOptions,
    StreamProfile,
};
use crate::error::{ControlError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct FakeDriver {
    discovered: Capabilities,
    active: RwLock<Capabilities>,
    connect_outcome: Mutex<std::result::Result<bool, &'static str>>,
    calls: Mutex<Vec<String>>,
    failing_unsubscribes: Mutex<HashSet<String>>,
    streams: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl FakeDriver {
    pub(crate) fn new(discovered: Capabilities) -> Arc<Self> {
        Arc::new(Self {
            discovered,
            active: RwLock::new(Capabilities::default()),
            connect_outcome: Mutex::new(Ok(true)),
            calls: Mutex::new(Vec::new()),
            failing_unsubscribes: Mutex::new(HashSet::new()),
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub(crate) fn with_all_capabilities() -> Arc<Self> {
        Self::new(Capabilities {
            ptz: true,
            presets: true,
            events: true,
            home_position: true,
            encodings: vec!["H264".to_string()],
            ..Default::default()
        })
    }

    pub(crate) fn set_connect_outcome(&self, outcome: std::result::Result<bool, &'static str>) {
        *self.connect_outcome.lock() = outcome;
    }

    pub(crate) fn fail_unsubscribe(&self, subscription_id: &str) {
        self.failing_unsubscribes
            .lock()
            .insert(subscription_id.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ProtocolDriver for FakeDriver {
    fn protocol_id(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        self.active.read().clone()
    }

    async fn perform_connect(&self, _config: &CameraConfig) -> Result<bool> {
        self.record("perform_connect");
        let outcome = *self.connect_outcome.lock();
        match outcome {
            Ok(true) => {
                *self.active.write() = self.discovered.clone();
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(message) => Err(ControlError::Connection(message.to_string())),
        }
    }

    async fn perform_disconnect(&self) {
        self.record("perform_disconnect");
        *self.active.write() = Capabilities::default();
        self.streams.lock().clear();
    }

    async fn probe(&self, _config: &CameraConfig) -> Result<bool> {
        self.record("probe");
        Ok(true)
    }

    async fn fetch_frame(&self) -> Result<Vec<u8>> {
        self.record("fetch_frame");
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    async fn camera_info(&self) -> Result<CameraInfo> {
        self.record("camera_info");
        Ok(CameraInfo {
            manufacturer: "Fake".to_string(),
            model: "F-1".to_string(),
            ..Default::default()
        })
    }

    async fn stream_profiles(&self) -> Result<Vec<StreamProfile>> {
        self.record("stream_profiles");
        Ok(vec![StreamProfile::new("main", "Main")])
    }

    async fn open_stream(&self, _options: &StreamOptions) -> Result<String> {
        self.record("open_stream");
        let id = format!("stream-{}", self.next());
        self.streams
            .lock()
            .insert(id.clone(), format!("rtsp://fake/{}", id));
        Ok(id)
    }

    async fn close_stream(&self, stream_id: Option<&str>) -> Result<()> {
        self.record(format!("close_stream:{}", stream_id.unwrap_or("*")));
        match stream_id {
            Some(id) => {
                self.streams.lock().remove(id);
            }
            None => self.streams.lock().clear(),
        }
        Ok(())
    }

    fn stream_uri(&self, stream_id: &str) -> Option<String> {
        self.streams.lock().get(stream_id).cloned()
    }

    async fn move_ptz(&self, _movement: &PtzMovement) -> Result<()> {
        self.record("move_ptz");
        Ok(())
    }

    async fn stop_ptz(&self) -> Result<()> {
        self.record("stop_ptz");
        Ok(())
    }

    async fn goto_home(&self) -> Result<()> {
        self.record("goto_home");
        Ok(())
    }

    async fn goto_preset(&self, preset_id: &str) -> Result<()> {
        self.record(format!("goto_preset:{}", preset_id));
        Ok(())
    }

    async fn save_preset(&self, name: &str) -> Result<String> {
        self.record(format!("save_preset:{}", name));
        Ok(format!("preset-{}", self.next()))
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        self.record("presets");
        Ok(Vec::new())
    }

    async fn subscribe(&self, _types: &[String], _dispatcher: EventDispatcher) -> Result<String> {
        self.record("subscribe");
        Ok(format!("sub-{}", self.next()))
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.record(format!("unsubscribe:{}", subscription_id));
        if self.failing_unsubscribes.lock().contains(subscription_id) {
            return Err(ControlError::Transport("device went away".to_string()));
        }
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::default()
    }
}
