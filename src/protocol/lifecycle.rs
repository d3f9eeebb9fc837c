//! Shared connection lifecycle wrapped around a vendor-specific driver.
//!
//! `ProtocolLifecycle` owns the bookkeeping every protocol needs (status,
//! handler table, outstanding subscriptions) and orders the driver's hook
//! calls around it. Drivers do the I/O and never touch that bookkeeping.

use super::contract::{CameraProtocol, EventHandler};
use super::types::{
    Capabilities, Capability, CameraConfig, CameraEvent, CameraInfo, ConnectionStatus, Preset,
    PtzMovement, StatsSnapshot, StreamOptions, StreamProfile, matches_event_type,
};
use crate::error::{ControlError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Vendor-specific hook operations.
///
/// Optional operations default to `CapabilityUnsupported` so a driver only
/// implements what its device family can do.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    fn protocol_id(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    async fn perform_connect(&self, config: &CameraConfig) -> Result<bool>;

    async fn perform_disconnect(&self);

    async fn probe(&self, config: &CameraConfig) -> Result<bool>;

    async fn fetch_frame(&self) -> Result<Vec<u8>>;

    async fn camera_info(&self) -> Result<CameraInfo>;

    async fn stream_profiles(&self) -> Result<Vec<StreamProfile>>;

    async fn open_stream(&self, options: &StreamOptions) -> Result<String>;

    async fn close_stream(&self, stream_id: Option<&str>) -> Result<()>;

    fn stream_uri(&self, stream_id: &str) -> Option<String>;

    async fn move_ptz(&self, movement: &PtzMovement) -> Result<()>;

    async fn stop_ptz(&self) -> Result<()> {
        Err(unsupported(self.protocol_id(), "ptz stop"))
    }

    async fn goto_home(&self) -> Result<()> {
        Err(unsupported(self.protocol_id(), "home position"))
    }

    async fn goto_preset(&self, _preset_id: &str) -> Result<()> {
        Err(unsupported(self.protocol_id(), "presets"))
    }

    async fn save_preset(&self, _name: &str) -> Result<String> {
        Err(unsupported(self.protocol_id(), "presets"))
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        Err(unsupported(self.protocol_id(), "presets"))
    }

    async fn subscribe(&self, _types: &[String], _dispatcher: EventDispatcher) -> Result<String> {
        Err(unsupported(self.protocol_id(), "events"))
    }

    async fn unsubscribe(&self, _subscription_id: &str) -> Result<()> {
        Err(unsupported(self.protocol_id(), "events"))
    }

    fn stats(&self) -> StatsSnapshot;
}

fn unsupported(protocol: &str, what: &str) -> ControlError {
    ControlError::CapabilityUnsupported(format!("{} does not support {}", protocol, what))
}

struct HandlerEntry {
    filter: Option<Vec<String>>,
    handler: EventHandler,
}

/// Handler table shared between a lifecycle and the tasks that emit events.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<BTreeMap<u64, HandlerEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, filter: Option<Vec<String>>, handler: EventHandler) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.handlers
            .write()
            .insert(id, HandlerEntry { filter, handler });
        id.to_string()
    }

    fn remove(&self, handler_id: &str) -> bool {
        match handler_id.parse::<u64>() {
            Ok(id) => self.handlers.write().remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Invoke every handler whose filter matches. Returns how many ran.
    pub fn dispatch(&self, event: &CameraEvent) -> usize {
        // Handlers run outside the lock so they may register or remove handlers.
        let matching: Vec<EventHandler> = self
            .handlers
            .read()
            .values()
            .filter(|entry| match &entry.filter {
                Some(types) => matches_event_type(types, &event.event_type),
                None => true,
            })
            .map(|entry| entry.handler.clone())
            .collect();

        for handler in &matching {
            handler(event);
        }
        matching.len()
    }
}

/// Template-method lifecycle around an injected [`ProtocolDriver`].
pub struct ProtocolLifecycle {
    driver: Arc<dyn ProtocolDriver>,
    status: RwLock<ConnectionStatus>,
    dispatcher: EventDispatcher,
    subscriptions: Mutex<Vec<String>>,
}

impl ProtocolLifecycle {
    pub fn new(driver: impl ProtocolDriver + 'static) -> Self {
        Self::from_driver(Arc::new(driver))
    }

    pub fn from_driver(driver: Arc<dyn ProtocolDriver>) -> Self {
        Self {
            driver,
            status: RwLock::new(ConnectionStatus::Disconnected),
            dispatcher: EventDispatcher::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn dispatch_event(&self, event: &CameraEvent) -> usize {
        self.dispatcher.dispatch(event)
    }

    pub fn handler_count(&self) -> usize {
        self.dispatcher.handler_count()
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.write();
        if *current != status {
            debug!(
                "{} status {} -> {}",
                self.driver.protocol_id(),
                *current,
                status
            );
            *current = status;
        }
    }

    fn require_connected(&self) -> Result<()> {
        let status = *self.status.read();
        if status != ConnectionStatus::Connected {
            return Err(ControlError::NotConnected(format!(
                "{} session is {}",
                self.driver.protocol_id(),
                status
            )));
        }
        Ok(())
    }

    fn require_capability(&self, capability: Capability) -> Result<()> {
        if !self.driver.capabilities().supports(capability) {
            return Err(ControlError::CapabilityUnsupported(format!(
                "{} session lacks {}",
                self.driver.protocol_id(),
                capability
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CameraProtocol for ProtocolLifecycle {
    fn protocol_id(&self) -> &str {
        self.driver.protocol_id()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    async fn connect(&self, config: &CameraConfig) -> Result<bool> {
        if self.status() == ConnectionStatus::Connected {
            // One live connection per instance: tear the old one down first.
            self.disconnect().await;
        }

        match self.driver.perform_connect(config).await {
            Ok(true) => {
                self.set_status(ConnectionStatus::Connected);
                info!(
                    "{} connected to {}:{}",
                    self.driver.protocol_id(),
                    config.host,
                    config.port
                );
                Ok(true)
            }
            Ok(false) => {
                self.set_status(ConnectionStatus::Error);
                warn!(
                    "{} failed to connect to {}:{}",
                    self.driver.protocol_id(),
                    config.host,
                    config.port
                );
                Ok(false)
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let outstanding = std::mem::take(&mut *self.subscriptions.lock());
        for subscription_id in outstanding {
            if let Err(e) = self.driver.unsubscribe(&subscription_id).await {
                warn!(
                    "Failed to unsubscribe {} during disconnect: {}",
                    subscription_id, e
                );
            }
        }

        self.driver.perform_disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn get_frame(&self) -> Result<Vec<u8>> {
        self.require_connected()?;
        self.driver.fetch_frame().await
    }

    async fn get_camera_info(&self) -> Result<CameraInfo> {
        self.require_connected()?;
        self.driver.camera_info().await
    }

    async fn get_available_streams(&self) -> Result<Vec<StreamProfile>> {
        self.require_connected()?;
        self.driver.stream_profiles().await
    }

    async fn start_stream(&self, options: Option<StreamOptions>) -> Result<String> {
        self.require_connected()?;
        self.driver.open_stream(&options.unwrap_or_default()).await
    }

    async fn stop_stream(&self, stream_id: Option<&str>) -> Result<()> {
        self.driver.close_stream(stream_id).await
    }

    fn stream_uri(&self, stream_id: &str) -> Option<String> {
        self.driver.stream_uri(stream_id)
    }

    async fn move_ptz(&self, movement: &PtzMovement) -> Result<()> {
        self.require_connected()?;
        self.require_capability(Capability::Ptz)?;
        movement.validate()?;
        self.driver.move_ptz(movement).await
    }

    async fn stop_ptz(&self) -> Result<()> {
        self.require_connected()?;
        self.require_capability(Capability::Ptz)?;
        self.driver.stop_ptz().await
    }

    async fn goto_home(&self) -> Result<()> {
        self.require_connected()?;
        self.require_capability(Capability::HomePosition)?;
        self.driver.goto_home().await
    }

    async fn goto_preset(&self, preset_id: &str) -> Result<()> {
        self.require_connected()?;
        self.require_capability(Capability::Presets)?;
        self.driver.goto_preset(preset_id).await
    }

    async fn save_preset(&self, name: &str) -> Result<String> {
        self.require_connected()?;
        self.require_capability(Capability::Presets)?;
        self.driver.save_preset(name).await
    }

    async fn list_presets(&self) -> Result<Vec<Preset>> {
        self.require_connected()?;
        self.require_capability(Capability::Presets)?;
        self.driver.presets().await
    }

    async fn subscribe_to_events(&self, types: &[String]) -> Result<String> {
        self.require_connected()?;
        self.require_capability(Capability::Events)?;
        let subscription_id = self
            .driver
            .subscribe(types, self.dispatcher.clone())
            .await?;
        self.subscriptions.lock().push(subscription_id.clone());
        Ok(subscription_id)
    }

    async fn unsubscribe_from_events(&self, subscription_id: &str) -> Result<()> {
        let known = {
            let mut subscriptions = self.subscriptions.lock();
            let before = subscriptions.len();
            subscriptions.retain(|id| id != subscription_id);
            subscriptions.len() != before
        };
        if !known {
            return Err(ControlError::NotFound(format!(
                "subscription {}",
                subscription_id
            )));
        }
        self.driver.unsubscribe(subscription_id).await
    }

    fn on_event(&self, handler: EventHandler) -> String {
        self.dispatcher.register(None, handler)
    }

    fn on_filtered_event(&self, types: Vec<String>, handler: EventHandler) -> String {
        self.dispatcher.register(Some(types), handler)
    }

    fn remove_event_handler(&self, handler_id: &str) -> bool {
        self.dispatcher.remove(handler_id)
    }

    async fn test_connection(&self, config: &CameraConfig) -> Result<bool> {
        self.driver.probe(config).await
    }

    fn stats(&self) -> StatsSnapshot {
        self.driver.stats()
    }
}
