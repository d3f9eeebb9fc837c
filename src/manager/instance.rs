use crate::protocol::{CameraConfig, CameraProtocol, ConnectionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A managed camera. Owned by the manager; the protocol holds no reference back.
#[derive(Clone)]
pub struct CameraInstance {
    pub id: String,
    pub name: String,
    pub config: CameraConfig,
    pub protocol: Arc<dyn CameraProtocol>,
    pub status: ConnectionStatus,
    pub active_streams: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub added_at: DateTime<Utc>,
}

impl CameraInstance {
    pub fn summary(&self) -> CameraSummary {
        CameraSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            host: self.config.host.clone(),
            protocol: self.protocol.protocol_id().to_string(),
            status: self.status,
            active_streams: self.active_streams.len(),
        }
    }
}

impl fmt::Debug for CameraInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.config.host)
            .field("protocol", &self.protocol.protocol_id())
            .field("status", &self.status)
            .field("active_streams", &self.active_streams)
            .finish()
    }
}

/// Serializable view of a camera for listings and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraSummary {
    pub id: String,
    pub name: String,
    pub host: String,
    pub protocol: String,
    pub status: ConnectionStatus,
    pub active_streams: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddCameraOptions {
    /// Generated as `camera-<uuid>` when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub config: CameraConfig,
    /// Protocol id or vendor brand to use instead of probing.
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub connect_immediately: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AddCameraOptions {
    pub fn new(name: impl Into<String>, config: CameraConfig) -> Self {
        Self {
            id: None,
            name: name.into(),
            config,
            protocol: None,
            connect_immediately: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn connect_immediately(mut self) -> Self {
        self.connect_immediately = true;
        self
    }
}
