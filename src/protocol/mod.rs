//! Protocol abstraction: the uniform camera contract, the shared lifecycle
//! around vendor drivers, and protocol selection.

pub mod contract;
pub mod lifecycle;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use contract::{CameraProtocol, EventHandler};
pub use lifecycle::{EventDispatcher, ProtocolDriver, ProtocolLifecycle};
pub use registry::{DefaultProtocolRegistry, ProtocolRegistry};
pub use types::{
    ActiveStream, CameraConfig, CameraEvent, CameraInfo, Capabilities, Capability,
    ConnectionStatus, Preset, ProtocolStats, PtzMovement, PtzPosition, Resolution,
    StatsSnapshot, StreamOptions, StreamProfile, matches_event_type,
};
