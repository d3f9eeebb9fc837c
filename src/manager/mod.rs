//! Fleet manager: the single entry point for driving cameras.
//!
//! `CameraManager` is constructed explicitly and passed to whoever needs it.
//! Registry maps are only touched in short synchronous sections; protocol
//! handles are cloned out before any network call.

mod instance;

pub use instance::{AddCameraOptions, CameraInstance, CameraSummary};

use crate::error::{ControlError, Result};
use crate::protocol::{
    CameraConfig, CameraEvent, CameraInfo, CameraProtocol, Capability, ConnectionStatus,
    EventHandler, Preset, ProtocolRegistry, PtzMovement, StreamOptions, StreamProfile,
    matches_event_type,
};
use futures_util::future::join_all;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Links a global handler id to the handler registered on the protocol.
#[derive(Clone)]
struct EventHandlerRecord {
    camera_id: String,
    protocol_handler_id: String,
    types: Vec<String>,
    /// Filtered handler as registered, kept so it can move to a new protocol.
    handler: EventHandler,
}

/// The one device subscription all handlers of a camera share.
#[derive(Debug, Clone)]
struct CameraSubscription {
    subscription_id: String,
    types: Vec<String>,
}

/// Event types a shared subscription must request: empty when any handler
/// wants everything, otherwise the sorted union.
fn merged_types<'a>(lists: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for types in lists {
        if types.is_empty() {
            return Vec::new();
        }
        merged.extend(types.iter().cloned());
    }
    merged.sort();
    merged.dedup();
    merged
}

pub struct CameraManager {
    registry: Arc<dyn ProtocolRegistry>,
    cameras: RwLock<HashMap<String, CameraInstance>>,
    event_handlers: RwLock<HashMap<String, EventHandlerRecord>>,
    subscriptions: RwLock<HashMap<String, CameraSubscription>>,
}

impl CameraManager {
    pub fn new(registry: Arc<dyn ProtocolRegistry>) -> Self {
        Self {
            registry,
            cameras: RwLock::new(HashMap::new()),
            event_handlers: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    fn protocol(&self, camera_id: &str) -> Result<Arc<dyn CameraProtocol>> {
        self.cameras
            .read()
            .get(camera_id)
            .map(|camera| camera.protocol.clone())
            .ok_or_else(|| ControlError::CameraNotFound(camera_id.to_string()))
    }

    fn connected_protocol(&self, camera_id: &str) -> Result<Arc<dyn CameraProtocol>> {
        let cameras = self.cameras.read();
        let camera = cameras
            .get(camera_id)
            .ok_or_else(|| ControlError::CameraNotFound(camera_id.to_string()))?;
        if camera.status != ConnectionStatus::Connected {
            return Err(ControlError::NotConnected(format!(
                "camera {} is {}",
                camera_id, camera.status
            )));
        }
        Ok(camera.protocol.clone())
    }

    /// Protocol of the camera, provided it currently has the capability.
    fn capable_protocol(
        &self,
        camera_id: &str,
        capability: Capability,
    ) -> Result<Arc<dyn CameraProtocol>> {
        let protocol = self.protocol(camera_id)?;
        if !protocol.capabilities().supports(capability) {
            return Err(ControlError::CapabilityUnsupported(format!(
                "camera {} does not support {}",
                camera_id, capability
            )));
        }
        Ok(protocol)
    }

    fn update<F>(&self, camera_id: &str, apply: F)
    where
        F: FnOnce(&mut CameraInstance),
    {
        if let Some(camera) = self.cameras.write().get_mut(camera_id) {
            apply(camera);
        }
    }

    pub async fn add_camera(&self, options: AddCameraOptions) -> Result<CameraInstance> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| format!("camera-{}", uuid::Uuid::new_v4()));
        if self.cameras.read().contains_key(&id) {
            return Err(ControlError::Conflict(id));
        }

        let protocol = self
            .registry
            .detect_protocol(&options.config, options.protocol.as_deref())
            .await?;

        let mut status = ConnectionStatus::Disconnected;
        if options.connect_immediately {
            status = if protocol.connect(&options.config).await? {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Error
            };
        }

        let camera = CameraInstance {
            id: id.clone(),
            name: options.name,
            config: options.config,
            protocol: protocol.clone(),
            status,
            active_streams: Vec::new(),
            metadata: options.metadata,
            added_at: chrono::Utc::now(),
        };

        let inserted = {
            let mut cameras = self.cameras.write();
            if cameras.contains_key(&id) {
                false
            } else {
                cameras.insert(id.clone(), camera.clone());
                true
            }
        };
        if !inserted {
            // Lost a race against another add with the same id.
            if status == ConnectionStatus::Connected {
                protocol.disconnect().await;
            }
            return Err(ControlError::Conflict(id));
        }

        info!(
            "Added camera {} ({}) via {} [{}]",
            camera.id,
            camera.config.host,
            protocol.protocol_id(),
            camera.status
        );
        Ok(camera)
    }

    pub async fn remove_camera(&self, camera_id: &str) -> Result<()> {
        let protocol = self.protocol(camera_id)?;
        if protocol.status() == ConnectionStatus::Connected {
            protocol.disconnect().await;
        }
        self.subscriptions.write().remove(camera_id);

        let owned = self.handlers_of(camera_id);
        for (handler_id, record) in &owned {
            protocol.remove_event_handler(&record.protocol_handler_id);
            self.event_handlers.write().remove(handler_id);
            debug!("Dropped handler {} of camera {}", handler_id, camera_id);
        }

        self.cameras.write().remove(camera_id);
        info!(
            "Removed camera {} and {} event handlers",
            camera_id,
            owned.len()
        );
        Ok(())
    }

    pub async fn connect_camera(&self, camera_id: &str) -> Result<bool> {
        self.connect_using(camera_id, None).await
    }

    /// Swap the camera's protocol for `protocol`, then connect through it.
    /// The old protocol is disconnected and registered event handlers move
    /// over to the new one.
    pub async fn connect_camera_with(
        &self,
        camera_id: &str,
        protocol: Arc<dyn CameraProtocol>,
    ) -> Result<bool> {
        self.connect_using(camera_id, Some(protocol)).await
    }

    async fn connect_using(
        &self,
        camera_id: &str,
        replacement: Option<Arc<dyn CameraProtocol>>,
    ) -> Result<bool> {
        let (current, config) = {
            let cameras = self.cameras.read();
            let camera = cameras
                .get(camera_id)
                .ok_or_else(|| ControlError::CameraNotFound(camera_id.to_string()))?;
            (camera.protocol.clone(), camera.config.clone())
        };

        let protocol = match replacement {
            Some(replacement) => {
                self.install_protocol(camera_id, &current, replacement.clone())
                    .await;
                replacement
            }
            None => current,
        };

        // A live session is torn down by connect, and its subscription with it.
        self.subscriptions.write().remove(camera_id);

        match protocol.connect(&config).await {
            Ok(connected) => {
                let status = if connected {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Error
                };
                self.update(camera_id, |camera| {
                    camera.status = status;
                    camera.active_streams.clear();
                });
                if connected {
                    self.resubscribe(camera_id, &protocol).await;
                }
                Ok(connected)
            }
            Err(e) => {
                self.update(camera_id, |camera| camera.status = ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    async fn install_protocol(
        &self,
        camera_id: &str,
        current: &Arc<dyn CameraProtocol>,
        replacement: Arc<dyn CameraProtocol>,
    ) {
        if current.status() != ConnectionStatus::Disconnected {
            current.disconnect().await;
        }
        self.subscriptions.write().remove(camera_id);

        for (handler_id, record) in self.handlers_of(camera_id) {
            current.remove_event_handler(&record.protocol_handler_id);
            let protocol_handler_id = replacement.on_event(record.handler.clone());
            if let Some(entry) = self.event_handlers.write().get_mut(&handler_id) {
                entry.protocol_handler_id = protocol_handler_id;
            }
        }

        info!(
            "Camera {} switches from {} to {}",
            camera_id,
            current.protocol_id(),
            replacement.protocol_id()
        );
        self.update(camera_id, |camera| {
            camera.protocol = replacement;
            camera.status = ConnectionStatus::Disconnected;
            camera.active_streams.clear();
        });
    }

    /// Disconnect keeps event handlers registered; they resume on the next
    /// successful connect.
    pub async fn disconnect_camera(&self, camera_id: &str) -> Result<()> {
        let protocol = self.protocol(camera_id)?;
        protocol.disconnect().await;
        self.subscriptions.write().remove(camera_id);
        self.update(camera_id, |camera| {
            camera.status = ConnectionStatus::Disconnected;
            camera.active_streams.clear();
        });
        info!("Disconnected camera {}", camera_id);
        Ok(())
    }

    pub async fn start_stream(
        &self,
        camera_id: &str,
        options: Option<StreamOptions>,
    ) -> Result<String> {
        let protocol = self.connected_protocol(camera_id)?;
        let stream_id = protocol.start_stream(options).await?;
        self.update(camera_id, |camera| {
            camera.active_streams.push(stream_id.clone())
        });
        Ok(stream_id)
    }

    /// `None` stops every stream of the camera.
    pub async fn stop_stream(&self, camera_id: &str, stream_id: Option<&str>) -> Result<()> {
        let protocol = self.connected_protocol(camera_id)?;
        protocol.stop_stream(stream_id).await?;
        self.update(camera_id, |camera| match stream_id {
            Some(id) => camera.active_streams.retain(|s| s != id),
            None => camera.active_streams.clear(),
        });
        Ok(())
    }

    pub fn stream_uri(&self, camera_id: &str, stream_id: &str) -> Result<String> {
        self.protocol(camera_id)?
            .stream_uri(stream_id)
            .ok_or_else(|| ControlError::NotFound(format!("stream {}", stream_id)))
    }

    pub async fn move_camera(&self, camera_id: &str, movement: &PtzMovement) -> Result<()> {
        self.capable_protocol(camera_id, Capability::Ptz)?
            .move_ptz(movement)
            .await
    }

    pub async fn stop_camera(&self, camera_id: &str) -> Result<()> {
        self.capable_protocol(camera_id, Capability::Ptz)?
            .stop_ptz()
            .await
    }

    pub async fn goto_home(&self, camera_id: &str) -> Result<()> {
        self.capable_protocol(camera_id, Capability::HomePosition)?
            .goto_home()
            .await
    }

    pub async fn goto_preset(&self, camera_id: &str, preset_id: &str) -> Result<()> {
        self.capable_protocol(camera_id, Capability::Presets)?
            .goto_preset(preset_id)
            .await
    }

    pub async fn save_preset(&self, camera_id: &str, name: &str) -> Result<String> {
        self.capable_protocol(camera_id, Capability::Presets)?
            .save_preset(name)
            .await
    }

    pub async fn list_presets(&self, camera_id: &str) -> Result<Vec<Preset>> {
        self.capable_protocol(camera_id, Capability::Presets)?
            .list_presets()
            .await
    }

    pub async fn get_frame(&self, camera_id: &str) -> Result<Vec<u8>> {
        self.protocol(camera_id)?.get_frame().await
    }

    pub async fn get_camera_info(&self, camera_id: &str) -> Result<CameraInfo> {
        self.protocol(camera_id)?.get_camera_info().await
    }

    pub async fn get_available_streams(&self, camera_id: &str) -> Result<Vec<StreamProfile>> {
        self.protocol(camera_id)?.get_available_streams().await
    }

    fn handlers_of(&self, camera_id: &str) -> Vec<(String, EventHandlerRecord)> {
        self.event_handlers
            .read()
            .iter()
            .filter(|(_, record)| record.camera_id == camera_id)
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Types the camera's shared subscription needs, or `None` without handlers.
    fn camera_types(&self, camera_id: &str) -> Option<Vec<String>> {
        let handlers = self.event_handlers.read();
        let lists: Vec<&[String]> = handlers
            .values()
            .filter(|record| record.camera_id == camera_id)
            .map(|record| record.types.as_slice())
            .collect();
        (!lists.is_empty()).then(|| merged_types(lists))
    }

    /// Make sure the camera has one live subscription covering `types`,
    /// replacing a narrower one.
    async fn ensure_subscription(
        &self,
        camera_id: &str,
        protocol: &Arc<dyn CameraProtocol>,
        types: Vec<String>,
    ) -> Result<()> {
        let covered = self
            .subscriptions
            .read()
            .get(camera_id)
            .is_some_and(|current| current.types == types);
        if covered {
            return Ok(());
        }

        let subscription_id = protocol.subscribe_to_events(&types).await?;
        debug!(
            "Camera {} subscribed as {} for {:?}",
            camera_id, subscription_id, types
        );
        let replaced = self.subscriptions.write().insert(
            camera_id.to_string(),
            CameraSubscription {
                subscription_id,
                types,
            },
        );
        if let Some(old) = replaced {
            Self::release(protocol, &old.subscription_id).await;
        }
        Ok(())
    }

    async fn release(protocol: &Arc<dyn CameraProtocol>, subscription_id: &str) {
        match protocol.unsubscribe_from_events(subscription_id).await {
            Ok(()) | Err(ControlError::NotFound(_)) => {}
            Err(e) => warn!("Failed to unsubscribe {}: {}", subscription_id, e),
        }
    }

    async fn resubscribe(&self, camera_id: &str, protocol: &Arc<dyn CameraProtocol>) {
        let Some(types) = self.camera_types(camera_id) else {
            return;
        };
        if !protocol.capabilities().supports(Capability::Events) {
            warn!(
                "Camera {} reconnected without event support; its handlers stay idle",
                camera_id
            );
            return;
        }
        if let Err(e) = self.ensure_subscription(camera_id, protocol, types).await {
            warn!("Failed to resubscribe events of camera {}: {}", camera_id, e);
        }
    }

    /// Register a handler for a camera's events.
    ///
    /// All handlers of a camera share one device subscription, widened as
    /// needed. Returns a global id of the form
    /// `handler-{cameraId}-{protocolHandlerId}`.
    pub async fn on_camera_event(
        &self,
        camera_id: &str,
        types: Vec<String>,
        handler: EventHandler,
    ) -> Result<String> {
        let protocol = self.connected_protocol(camera_id)?;
        if !protocol.capabilities().supports(Capability::Events) {
            return Err(ControlError::CapabilityUnsupported(format!(
                "camera {} does not support events",
                camera_id
            )));
        }

        let filter = types.clone();
        let filtered: EventHandler = Arc::new(move |event: &CameraEvent| {
            if matches_event_type(&filter, &event.event_type) {
                handler(event);
            }
        });
        let protocol_handler_id = protocol.on_event(filtered.clone());

        let needed = {
            let mut lists: Vec<Vec<String>> = self
                .handlers_of(camera_id)
                .into_iter()
                .map(|(_, record)| record.types)
                .collect();
            lists.push(types.clone());
            merged_types(lists.iter().map(Vec::as_slice))
        };
        if let Err(e) = self.ensure_subscription(camera_id, &protocol, needed).await {
            protocol.remove_event_handler(&protocol_handler_id);
            return Err(e);
        }

        let handler_id = format!("handler-{}-{}", camera_id, protocol_handler_id);
        self.event_handlers.write().insert(
            handler_id.clone(),
            EventHandlerRecord {
                camera_id: camera_id.to_string(),
                protocol_handler_id,
                types: types.clone(),
                handler: filtered,
            },
        );
        debug!("Registered {} for {:?}", handler_id, types);
        Ok(handler_id)
    }

    /// Drop a handler. The camera's subscription ends with its last handler.
    pub async fn remove_camera_event_handler(&self, handler_id: &str) -> Result<()> {
        let record = self
            .event_handlers
            .read()
            .get(handler_id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(format!("event handler {}", handler_id)))?;

        let protocol = self.protocol(&record.camera_id).ok();
        if let Some(protocol) = &protocol {
            protocol.remove_event_handler(&record.protocol_handler_id);
        }
        self.event_handlers.write().remove(handler_id);

        if self.camera_types(&record.camera_id).is_none() {
            let subscription = self.subscriptions.write().remove(&record.camera_id);
            if let (Some(protocol), Some(subscription)) = (&protocol, subscription) {
                Self::release(protocol, &subscription.subscription_id).await;
            }
        }
        Ok(())
    }

    /// Connect every camera that is not connected. Failures are reported per
    /// camera and never abort the sweep.
    pub async fn reconnect_all_cameras(&self) -> HashMap<String, bool> {
        let targets: Vec<(String, ConnectionStatus)> = self
            .cameras
            .read()
            .values()
            .map(|camera| (camera.id.clone(), camera.status))
            .collect();

        let attempts = targets.into_iter().map(|(id, status)| async move {
            if status == ConnectionStatus::Connected {
                return (id, true);
            }
            let connected = match self.connect_camera(&id).await {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("Reconnect of camera {} failed: {}", id, e);
                    false
                }
            };
            (id, connected)
        });

        join_all(attempts).await.into_iter().collect()
    }

    pub async fn disconnect_all(&self) {
        let connected: Vec<String> = self
            .cameras
            .read()
            .values()
            .filter(|camera| camera.status != ConnectionStatus::Disconnected)
            .map(|camera| camera.id.clone())
            .collect();

        for camera_id in connected {
            if let Err(e) = self.disconnect_camera(&camera_id).await {
                warn!("Failed to disconnect camera {}: {}", camera_id, e);
            }
        }
    }

    pub fn get_camera(&self, camera_id: &str) -> Option<CameraInstance> {
        self.cameras.read().get(camera_id).cloned()
    }

    /// All cameras ordered by id.
    pub fn list_cameras(&self) -> Vec<CameraInstance> {
        let mut cameras: Vec<CameraInstance> = self.cameras.read().values().cloned().collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        cameras
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.read().len()
    }

    pub fn handler_count(&self) -> usize {
        self.event_handlers.read().len()
    }

    pub fn camera_config(&self, camera_id: &str) -> Option<CameraConfig> {
        self.cameras.read().get(camera_id).map(|c| c.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::FakeDriver;
    use crate::protocol::{Capabilities, ProtocolLifecycle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    /// Hands out fake-driver protocols and keeps them for inspection.
    struct FakeRegistry {
        capabilities: Capabilities,
        created: Mutex<Vec<(Arc<FakeDriver>, Arc<ProtocolLifecycle>)>>,
    }

    impl FakeRegistry {
        fn new(capabilities: Capabilities) -> Arc<Self> {
            Arc::new(Self {
                capabilities,
                created: Mutex::new(Vec::new()),
            })
        }

        fn full() -> Arc<Self> {
            Self::new(Capabilities {
                ptz: true,
                presets: true,
                events: true,
                home_position: true,
                ..Default::default()
            })
        }

        fn driver(&self, index: usize) -> Arc<FakeDriver> {
            self.created.lock()[index].0.clone()
        }

        fn lifecycle(&self, index: usize) -> Arc<ProtocolLifecycle> {
            self.created.lock()[index].1.clone()
        }

        fn detections(&self) -> usize {
            self.created.lock().len()
        }
    }

    #[async_trait]
    impl ProtocolRegistry for FakeRegistry {
        async fn detect_protocol(
            &self,
            _config: &CameraConfig,
            _preferred: Option<&str>,
        ) -> Result<Arc<dyn CameraProtocol>> {
            let driver = FakeDriver::new(self.capabilities.clone());
            let lifecycle = Arc::new(ProtocolLifecycle::from_driver(driver.clone()));
            self.created.lock().push((driver, lifecycle.clone()));
            let protocol: Arc<dyn CameraProtocol> = lifecycle;
            Ok(protocol)
        }
    }

    fn options(id: &str) -> AddCameraOptions {
        AddCameraOptions::new(format!("Camera {}", id), CameraConfig::new("10.0.0.20", 80))
            .with_id(id)
    }

    #[tokio::test]
    async fn test_added_camera_is_disconnected_unless_asked() {
        let manager = CameraManager::new(FakeRegistry::full());

        manager.add_camera(options("cam-1")).await.unwrap();
        assert_eq!(
            manager.get_camera("cam-1").unwrap().status,
            ConnectionStatus::Disconnected
        );

        manager
            .add_camera(options("cam-2").connect_immediately())
            .await
            .unwrap();
        assert_eq!(
            manager.get_camera("cam-2").unwrap().status,
            ConnectionStatus::Connected
        );
        assert_eq!(manager.camera_count(), 2);
    }

    #[tokio::test]
    async fn test_generated_ids() {
        let manager = CameraManager::new(FakeRegistry::full());
        let camera = manager
            .add_camera(AddCameraOptions::new("Lobby", CameraConfig::new("10.0.0.21", 80)))
            .await
            .unwrap();
        assert!(camera.id.starts_with("camera-"));
        assert!(manager.get_camera(&camera.id).is_some());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected_without_mutation() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager.add_camera(options("cam-1")).await.unwrap();

        let mut duplicate = options("cam-1");
        duplicate.name = "Impostor".to_string();
        let result = manager.add_camera(duplicate).await;

        assert!(matches!(result, Err(ControlError::Conflict(_))));
        assert_eq!(manager.get_camera("cam-1").unwrap().name, "Camera cam-1");
        assert_eq!(registry.detections(), 1);
    }

    #[tokio::test]
    async fn test_move_without_ptz_makes_no_driver_call() {
        let registry = FakeRegistry::new(Capabilities::default());
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let result = manager
            .move_camera("cam-1", &PtzMovement::relative(0.1, 0.0, 0.0))
            .await;
        assert!(matches!(result, Err(ControlError::CapabilityUnsupported(_))));
        assert!(matches!(
            manager.goto_preset("cam-1", "1").await,
            Err(ControlError::CapabilityUnsupported(_))
        ));
        assert_eq!(registry.driver(0).count("move_ptz"), 0);
        assert_eq!(registry.driver(0).count("goto_preset"), 0);
    }

    #[tokio::test]
    async fn test_ptz_operations_delegate() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        assert_ok!(
            manager
                .move_camera("cam-1", &PtzMovement::continuous(0.5, 0.0, 0.0))
                .await
        );
        assert_ok!(manager.stop_camera("cam-1").await);
        assert_ok!(manager.goto_home("cam-1").await);
        let preset = manager.save_preset("cam-1", "Gate").await.unwrap();
        assert_ok!(manager.goto_preset("cam-1", &preset).await);

        let driver = registry.driver(0);
        assert_eq!(driver.count("move_ptz"), 1);
        assert_eq!(driver.count("stop_ptz"), 1);
        assert_eq!(driver.count("goto_home"), 1);
        assert_eq!(driver.count("save_preset:Gate"), 1);
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let manager = CameraManager::new(FakeRegistry::full());
        assert!(matches!(
            manager.connect_camera("ghost").await,
            Err(ControlError::CameraNotFound(_))
        ));
        assert!(matches!(
            manager.remove_camera("ghost").await,
            Err(ControlError::CameraNotFound(_))
        ));
        assert!(manager.get_camera("ghost").is_none());
    }

    #[tokio::test]
    async fn test_streams_require_connection_and_are_tracked() {
        let manager = CameraManager::new(FakeRegistry::full());
        manager.add_camera(options("cam-1")).await.unwrap();

        assert!(matches!(
            manager.start_stream("cam-1", None).await,
            Err(ControlError::NotConnected(_))
        ));

        assert!(manager.connect_camera("cam-1").await.unwrap());
        let first = manager.start_stream("cam-1", None).await.unwrap();
        let second = manager.start_stream("cam-1", None).await.unwrap();
        assert_eq!(
            manager.get_camera("cam-1").unwrap().active_streams,
            vec![first.clone(), second.clone()]
        );
        assert!(manager.stream_uri("cam-1", &second).is_ok());

        manager.stop_stream("cam-1", Some(&first)).await.unwrap();
        assert_eq!(
            manager.get_camera("cam-1").unwrap().active_streams,
            vec![second]
        );

        manager.disconnect_camera("cam-1").await.unwrap();
        let camera = manager.get_camera("cam-1").unwrap();
        assert_eq!(camera.status, ConnectionStatus::Disconnected);
        assert!(camera.active_streams.is_empty());
    }

    #[tokio::test]
    async fn test_event_handlers_are_filtered_and_removed_with_camera() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();
        manager
            .add_camera(options("cam-2").connect_immediately())
            .await
            .unwrap();

        let motion = Arc::new(AtomicUsize::new(0));
        let counter = motion.clone();
        let first = manager
            .on_camera_event(
                "cam-1",
                vec!["Motion".to_string()],
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert_eq!(first, "handler-cam-1-1");
        manager
            .on_camera_event("cam-1", Vec::new(), Arc::new(|_| {}))
            .await
            .unwrap();
        manager
            .on_camera_event("cam-2", Vec::new(), Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(manager.handler_count(), 3);

        let cam1 = registry.lifecycle(0);
        cam1.dispatch_event(&CameraEvent::new("VideoSource/Motion", "cam-1"));
        cam1.dispatch_event(&CameraEvent::new("Device/Trigger", "cam-1"));
        assert_eq!(motion.load(Ordering::SeqCst), 1);

        manager.remove_camera("cam-1").await.unwrap();
        assert_eq!(manager.handler_count(), 1);
        assert_eq!(cam1.handler_count(), 0);
        assert_eq!(registry.lifecycle(1).handler_count(), 1);
        assert!(manager.get_camera("cam-1").is_none());
    }

    #[tokio::test]
    async fn test_remove_event_handler_unsubscribes() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let handler_id = manager
            .on_camera_event("cam-1", Vec::new(), Arc::new(|_| {}))
            .await
            .unwrap();
        manager.remove_camera_event_handler(&handler_id).await.unwrap();

        assert_eq!(manager.handler_count(), 0);
        assert_eq!(registry.lifecycle(0).handler_count(), 0);
        assert_eq!(registry.driver(0).count("unsubscribe:"), 1);
        assert!(matches!(
            manager.remove_camera_event_handler(&handler_id).await,
            Err(ControlError::NotFound(_))
        ));
    }

    fn counting_handler(count: &Arc<AtomicUsize>) -> EventHandler {
        let count = count.clone();
        Arc::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_handlers_of_a_camera_share_one_subscription() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        manager
            .on_camera_event("cam-1", Vec::new(), counting_handler(&first))
            .await
            .unwrap();
        manager
            .on_camera_event("cam-1", Vec::new(), counting_handler(&second))
            .await
            .unwrap();
        manager
            .on_camera_event("cam-1", vec!["Motion".to_string()], Arc::new(|_| {}))
            .await
            .unwrap();

        let driver = registry.driver(0);
        let lifecycle = registry.lifecycle(0);
        assert_eq!(driver.count("subscribe"), 1);
        assert_eq!(lifecycle.subscription_ids().len(), 1);

        lifecycle.dispatch_event(&CameraEvent::new("Device/Trigger", "cam-1"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_widens_for_new_event_types() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let motion = manager
            .on_camera_event("cam-1", vec!["Motion".to_string()], Arc::new(|_| {}))
            .await
            .unwrap();
        manager
            .on_camera_event("cam-1", vec!["Tamper".to_string()], Arc::new(|_| {}))
            .await
            .unwrap();

        let driver = registry.driver(0);
        let lifecycle = registry.lifecycle(0);
        assert_eq!(driver.count("subscribe"), 2);
        assert!(driver.calls().contains(&"unsubscribe:sub-1".to_string()));
        assert_eq!(lifecycle.subscription_ids(), vec!["sub-2".to_string()]);

        // The remaining handler keeps the shared subscription alive
        manager.remove_camera_event_handler(&motion).await.unwrap();
        assert_eq!(lifecycle.subscription_ids().len(), 1);
        assert_eq!(driver.count("unsubscribe:"), 1);
    }

    #[tokio::test]
    async fn test_handlers_fire_again_after_reconnect() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        manager
            .on_camera_event("cam-1", Vec::new(), counting_handler(&seen))
            .await
            .unwrap();

        let lifecycle = registry.lifecycle(0);
        manager.disconnect_camera("cam-1").await.unwrap();
        assert!(lifecycle.subscription_ids().is_empty());
        assert_eq!(manager.handler_count(), 1);

        assert!(manager.connect_camera("cam-1").await.unwrap());
        assert_eq!(registry.driver(0).count("subscribe"), 2);
        assert_eq!(lifecycle.subscription_ids().len(), 1);

        lifecycle.dispatch_event(&CameraEvent::new("VideoSource/Motion", "cam-1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_with_replacement_protocol() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let handler_id = manager
            .on_camera_event("cam-1", Vec::new(), counting_handler(&seen))
            .await
            .unwrap();

        let old_driver = registry.driver(0);
        let old = registry.lifecycle(0);
        let driver = FakeDriver::with_all_capabilities();
        let replacement = Arc::new(ProtocolLifecycle::from_driver(driver.clone()));

        assert!(
            manager
                .connect_camera_with("cam-1", replacement.clone())
                .await
                .unwrap()
        );

        assert_eq!(old_driver.count("perform_disconnect"), 1);
        assert_eq!(old.status(), ConnectionStatus::Disconnected);
        assert_eq!(old.handler_count(), 0);
        assert_eq!(driver.count("perform_connect"), 1);
        assert_eq!(replacement.status(), ConnectionStatus::Connected);
        assert_eq!(
            manager.get_camera("cam-1").unwrap().status,
            ConnectionStatus::Connected
        );

        manager
            .move_camera("cam-1", &PtzMovement::relative(0.1, 0.0, 0.0))
            .await
            .unwrap();
        assert_eq!(driver.count("move_ptz"), 1);
        assert_eq!(old_driver.count("move_ptz"), 0);

        // Handlers moved with the camera and keep their global id
        assert_eq!(replacement.handler_count(), 1);
        assert_eq!(replacement.subscription_ids().len(), 1);
        replacement.dispatch_event(&CameraEvent::new("VideoSource/Motion", "cam-1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        manager.remove_camera_event_handler(&handler_id).await.unwrap();
        assert_eq!(replacement.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_with_unknown_camera() {
        let manager = CameraManager::new(FakeRegistry::full());
        let replacement = Arc::new(ProtocolLifecycle::from_driver(
            FakeDriver::with_all_capabilities(),
        ));
        assert!(matches!(
            manager.connect_camera_with("ghost", replacement).await,
            Err(ControlError::CameraNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_events_require_connection() {
        let manager = CameraManager::new(FakeRegistry::full());
        manager.add_camera(options("cam-1")).await.unwrap();
        let result = manager
            .on_camera_event("cam-1", Vec::new(), Arc::new(|_| {}))
            .await;
        assert!(matches!(result, Err(ControlError::NotConnected(_))));
        assert_eq!(manager.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_all_skips_connected_cameras() {
        let registry = FakeRegistry::full();
        let manager = CameraManager::new(registry.clone());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();
        manager.add_camera(options("cam-2")).await.unwrap();
        manager.add_camera(options("cam-3")).await.unwrap();
        registry
            .driver(2)
            .set_connect_outcome(Err("host unreachable"));

        let results = manager.reconnect_all_cameras().await;

        assert_eq!(results.len(), 3);
        assert!(results["cam-1"]);
        assert!(results["cam-2"]);
        assert!(!results["cam-3"]);
        assert_eq!(registry.driver(0).count("perform_connect"), 1);
        assert_eq!(registry.driver(1).count("perform_connect"), 1);
        assert_eq!(
            manager.get_camera("cam-3").unwrap().status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let manager = CameraManager::new(FakeRegistry::full());
        manager
            .add_camera(options("cam-1").connect_immediately())
            .await
            .unwrap();
        manager
            .add_camera(options("cam-2").connect_immediately())
            .await
            .unwrap();

        manager.disconnect_all().await;
        assert!(
            manager
                .list_cameras()
                .iter()
                .all(|c| c.status == ConnectionStatus::Disconnected)
        );
    }
}
