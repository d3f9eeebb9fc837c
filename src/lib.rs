//! Camera control plane library.
//!
//! A uniform, capability-typed interface over heterogeneous IP cameras
//! (ONVIF and vendor HTTP APIs) and a fleet manager built on top of it.

pub mod config;
pub mod error;
pub mod manager;
pub mod onvif;
pub mod protocol;
pub mod vendor;

pub use error::{ControlError, Result};
pub use manager::{AddCameraOptions, CameraInstance, CameraManager, CameraSummary};
pub use protocol::{
    CameraConfig, CameraEvent, CameraProtocol, Capabilities, ConnectionStatus,
    DefaultProtocolRegistry, ProtocolRegistry, PtzMovement, StreamOptions,
};
