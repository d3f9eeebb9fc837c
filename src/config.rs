use crate::error::Result;
use crate::manager::AddCameraOptions;
use crate::onvif::PollSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the user config dir holding the fleet file
const CONFIG_DIR: &str = "camera-control-plane";
const FLEET_FILE: &str = "fleet.json";

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        // Env vars already set take precedence
        if std::env::var(&key).is_err() {
            // SAFETY: called from main before the runtime spawns any threads
            unsafe { std::env::set_var(&key, &value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub events: EventsConfig,
    pub discovery: DiscoveryConfig,
    pub fleet: FleetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub poll_interval_secs: u64,
    pub max_poll_backoff_secs: u64,
    pub pull_message_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Probe ONVIF and vendor APIs when a camera names no protocol
    pub probe_protocols: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub file: PathBuf,
    pub reconnect_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let poll = PollSettings::default();
        Self {
            events: EventsConfig {
                poll_interval_secs: poll.interval.as_secs(),
                max_poll_backoff_secs: poll.max_backoff.as_secs(),
                pull_message_limit: poll.message_limit,
            },
            discovery: DiscoveryConfig {
                probe_protocols: true,
            },
            fleet: FleetConfig {
                file: default_fleet_path(),
                reconnect_interval_secs: 60,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("CAMERA_POLL_INTERVAL_SECS")
            && let Ok(i) = interval.parse()
        {
            config.events.poll_interval_secs = i;
        }
        if let Ok(backoff) = std::env::var("CAMERA_MAX_POLL_BACKOFF_SECS")
            && let Ok(b) = backoff.parse()
        {
            config.events.max_poll_backoff_secs = b;
        }
        if let Ok(limit) = std::env::var("CAMERA_PULL_MESSAGE_LIMIT")
            && let Ok(l) = limit.parse()
        {
            config.events.pull_message_limit = l;
        }
        if let Ok(probe) = std::env::var("CAMERA_PROBE_PROTOCOLS") {
            config.discovery.probe_protocols = parse_flag(&probe);
        }
        if let Ok(file) = std::env::var("CAMERA_FLEET_FILE") {
            config.fleet.file = PathBuf::from(file);
        }
        if let Ok(interval) = std::env::var("CAMERA_RECONNECT_INTERVAL_SECS")
            && let Ok(i) = interval.parse()
        {
            config.fleet.reconnect_interval_secs = i;
        }

        config
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.events.poll_interval_secs.max(1)),
            max_backoff: Duration::from_secs(self.events.max_poll_backoff_secs),
            message_limit: self.events.pull_message_limit.max(1),
            ..PollSettings::default()
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.fleet.reconnect_interval_secs.max(1))
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Default location of the fleet file
pub fn default_fleet_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(FLEET_FILE)
}

/// Cameras to register at startup, plus the event types to log for them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub cameras: Vec<AddCameraOptions>,
    /// Empty subscribes to every event type
    #[serde(default)]
    pub event_types: Vec<String>,
}

impl FleetFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}
