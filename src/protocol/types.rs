//! Data model shared by every camera protocol.

use crate::error::{ControlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn default_timeout_ms() -> u64 {
    10_000
}

/// Connection parameters for one camera. Immutable per connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Media profile to prefer when the caller does not name one.
    #[serde(default)]
    pub profile_token: Option<String>,
    /// Vendor hint used when the camera speaks a vendor HTTP API.
    #[serde(default)]
    pub brand: Option<String>,
}

impl CameraConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            timeout_ms: default_timeout_ms(),
            profile_token: None,
            brand: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

/// A single capability flag, used for up-front checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Ptz,
    Presets,
    Events,
    HomePosition,
}

/// Capability set discovered at connect time. Everything is unsupported until then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub ptz: bool,
    pub presets: bool,
    pub events: bool,
    pub home_position: bool,
    pub analytics: bool,
    pub imaging: bool,
    pub encodings: Vec<String>,
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Ptz => self.ptz,
            Capability::Presets => self.presets,
            Capability::Events => self.events,
            Capability::HomePosition => self.home_position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Combined distance `|Δwidth| + |Δheight|`.
    pub fn distance(&self, other: &Resolution) -> u64 {
        u64::from(self.width.abs_diff(other.width)) + u64::from(self.height.abs_diff(other.height))
    }
}

/// Media profile enumerated from the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamProfile {
    pub token: String,
    pub name: String,
    pub encoding: Option<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f32>,
    pub bitrate: Option<u32>,
    /// Token of the PTZ configuration bound to this profile, if any.
    pub ptz_configuration: Option<String>,
    pub parameters: HashMap<String, String>,
}

impl StreamProfile {
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            encoding: None,
            resolution: None,
            frame_rate: None,
            bitrate: None,
            ptz_configuration: None,
            parameters: HashMap::new(),
        }
    }

    pub fn supports_ptz(&self) -> bool {
        self.ptz_configuration.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub profile_token: Option<String>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

/// A stream started through `start_stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveStream {
    pub id: String,
    pub profile_token: String,
    pub uri: String,
    pub started_at: DateTime<Utc>,
}

/// Pan/tilt/zoom request. `continuous` and `absolute` are mutually exclusive;
/// neither set means a relative move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PtzMovement {
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub tilt: f32,
    #[serde(default)]
    pub zoom: f32,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub continuous: bool,
    #[serde(default)]
    pub absolute: bool,
    /// Move duration for vendor APIs that take one.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl PtzMovement {
    pub fn relative(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self {
            pan,
            tilt,
            zoom,
            ..Default::default()
        }
    }

    pub fn continuous(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self {
            continuous: true,
            ..Self::relative(pan, tilt, zoom)
        }
    }

    pub fn absolute(pan: f32, tilt: f32, zoom: f32) -> Self {
        Self {
            absolute: true,
            ..Self::relative(pan, tilt, zoom)
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.continuous && self.absolute {
            return Err(ControlError::Validation(
                "continuous and absolute moves are mutually exclusive".to_string(),
            ));
        }
        if ![self.pan, self.tilt, self.zoom].iter().all(|v| v.is_finite()) {
            return Err(ControlError::Validation(
                "pan, tilt and zoom must be finite numbers".to_string(),
            ));
        }
        if let Some(speed) = self.speed
            && (!speed.is_finite() || speed < 0.0)
        {
            return Err(ControlError::Validation(format!(
                "speed must be a non-negative number, got {}",
                speed
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtzPosition {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub token: String,
    pub name: String,
    pub position: Option<PtzPosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

/// Event delivered to handlers. Never persisted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data: HashMap<String, serde_json::Value>,
}

impl CameraEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            data: HashMap::new(),
        }
    }
}

/// Event type filter: an empty list matches everything, otherwise any entry
/// must be a substring of the event type.
pub fn matches_event_type(types: &[String], event_type: &str) -> bool {
    types.is_empty() || types.iter().any(|t| event_type.contains(t.as_str()))
}

/// Per-protocol counters.
#[derive(Debug, Default)]
pub struct ProtocolStats {
    pub streams_started: AtomicU64,
    pub frames_captured: AtomicU64,
    pub ptz_commands: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub poll_failures: AtomicU64,
}

impl ProtocolStats {
    pub fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            streams_started: self.streams_started.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            ptz_commands: self.ptz_commands.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub streams_started: u64,
    pub frames_captured: u64,
    pub ptz_commands: u64,
    pub events_dispatched: u64,
    pub poll_failures: u64,
}
