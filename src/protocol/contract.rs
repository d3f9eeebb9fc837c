//! The uniform contract every camera protocol exposes.

use super::types::{
    Capabilities, CameraConfig, CameraEvent, CameraInfo, ConnectionStatus, Preset, PtzMovement,
    StatsSnapshot, StreamOptions, StreamProfile,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked for every dispatched event.
pub type EventHandler = Arc<dyn Fn(&CameraEvent) + Send + Sync>;

/// Capability-typed camera interface.
///
/// Capability flags are authoritative only after a successful `connect`;
/// before that every flag reports unsupported.
#[async_trait]
pub trait CameraProtocol: Send + Sync {
    /// Identifier of the wire protocol, e.g. `onvif`.
    fn protocol_id(&self) -> &str;

    fn status(&self) -> ConnectionStatus;

    fn capabilities(&self) -> Capabilities;

    /// Establish a session. `Ok(false)` means the device answered but the
    /// session could not be set up.
    async fn connect(&self, config: &CameraConfig) -> Result<bool>;

    /// Best-effort teardown. Always ends disconnected.
    async fn disconnect(&self);

    async fn get_frame(&self) -> Result<Vec<u8>>;

    async fn get_camera_info(&self) -> Result<CameraInfo>;

    async fn get_available_streams(&self) -> Result<Vec<StreamProfile>>;

    async fn start_stream(&self, options: Option<StreamOptions>) -> Result<String>;

    /// `None` stops every stream of this protocol instance.
    async fn stop_stream(&self, stream_id: Option<&str>) -> Result<()>;

    fn stream_uri(&self, stream_id: &str) -> Option<String>;

    async fn move_ptz(&self, movement: &PtzMovement) -> Result<()>;

    async fn stop_ptz(&self) -> Result<()>;

    async fn goto_home(&self) -> Result<()>;

    async fn goto_preset(&self, preset_id: &str) -> Result<()>;

    async fn save_preset(&self, name: &str) -> Result<String>;

    async fn list_presets(&self) -> Result<Vec<Preset>>;

    async fn subscribe_to_events(&self, types: &[String]) -> Result<String>;

    async fn unsubscribe_from_events(&self, subscription_id: &str) -> Result<()>;

    fn on_event(&self, handler: EventHandler) -> String;

    fn on_filtered_event(&self, types: Vec<String>, handler: EventHandler) -> String;

    fn remove_event_handler(&self, handler_id: &str) -> bool;

    /// Connectivity probe independent of any live session.
    async fn test_connection(&self, config: &CameraConfig) -> Result<bool>;

    fn stats(&self) -> StatsSnapshot;
}
