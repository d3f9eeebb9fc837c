use camera_control_plane::config::{self, Config, FleetFile};
use camera_control_plane::onvif::OnvifDriver;
use camera_control_plane::protocol::ProtocolLifecycle;
use camera_control_plane::{
    CameraConfig, CameraEvent, CameraManager, CameraProtocol, ConnectionStatus,
    DefaultProtocolRegistry,
};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "camera-control-plane")]
#[command(about = "Control plane for ONVIF and vendor HTTP camera fleets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the fleet, connect every camera and log events until Ctrl+C
    Run {
        /// Fleet definition (JSON)
        #[arg(long, env = "CAMERA_FLEET_FILE")]
        fleet: Option<PathBuf>,
    },
    /// Check a single ONVIF endpoint and print what it reports
    Probe {
        host: String,

        #[arg(long, default_value_t = 80)]
        port: u16,

        #[arg(long, env = "CAMERA_USERNAME", default_value = "")]
        username: String,

        #[arg(long, env = "CAMERA_PASSWORD", default_value = "", hide_env_values = true)]
        password: String,
    },
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Run { fleet } => run(config, fleet).await,
        Commands::Probe {
            host,
            port,
            username,
            password,
        } => {
            let camera = CameraConfig::new(host, port).with_credentials(username, password);
            if !probe(camera).await {
                std::process::exit(1);
            }
        }
    }
}

async fn run(config: Config, fleet_path: Option<PathBuf>) {
    info!("Starting camera control plane");

    let fleet_path = fleet_path.unwrap_or_else(|| config.fleet.file.clone());
    let fleet = match FleetFile::load(&fleet_path) {
        Ok(fleet) => fleet,
        Err(e) => {
            error!("Failed to load fleet {}: {}", fleet_path.display(), e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded:");
    info!("  Fleet: {} ({} cameras)", fleet_path.display(), fleet.cameras.len());
    info!("  Poll interval: {}s", config.events.poll_interval_secs);
    info!("  Protocol probing: {}", config.discovery.probe_protocols);

    let registry = DefaultProtocolRegistry::new()
        .with_poll_settings(config.poll_settings())
        .with_probing(config.discovery.probe_protocols);
    let manager = Arc::new(CameraManager::new(Arc::new(registry)));

    // Cameras whose logging handler is registered; the manager resubscribes
    // them by itself after a reconnect
    let mut logged = HashSet::new();
    for options in fleet.cameras {
        let name = options.name.clone();
        match manager.add_camera(options).await {
            Ok(camera) => {
                if camera.status == ConnectionStatus::Connected
                    && subscribe(&manager, &camera.id, &fleet.event_types).await
                {
                    logged.insert(camera.id);
                }
            }
            Err(e) => warn!("Skipping camera {}: {}", name, e),
        }
    }

    // Periodically bring back cameras that dropped or never connected
    let sweeper = manager.clone();
    let event_types = fleet.event_types.clone();
    let interval = config.reconnect_interval();
    let reconnect_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let results = sweeper.reconnect_all_cameras().await;
            for (camera_id, connected) in results {
                if connected
                    && !logged.contains(&camera_id)
                    && subscribe(&sweeper, &camera_id, &event_types).await
                {
                    logged.insert(camera_id);
                }
            }
        }
    });

    for camera in manager.list_cameras() {
        info!("  {:?}", camera.summary());
    }
    info!("Camera control plane is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    reconnect_task.abort();
    manager.disconnect_all().await;
    info!("Camera control plane stopped");
}

async fn subscribe(manager: &CameraManager, camera_id: &str, types: &[String]) -> bool {
    let supports_events = manager
        .get_camera(camera_id)
        .is_some_and(|c| c.protocol.capabilities().events);
    if !supports_events {
        return false;
    }

    let result = manager
        .on_camera_event(
            camera_id,
            types.to_vec(),
            Arc::new(|event: &CameraEvent| match serde_json::to_string(event) {
                Ok(json) => info!("event {}", json),
                Err(e) => warn!("Unserializable event {}: {}", event.event_type, e),
            }),
        )
        .await;
    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("Event subscription for {} failed: {}", camera_id, e);
            false
        }
    }
}

async fn probe(camera: CameraConfig) -> bool {
    let protocol = ProtocolLifecycle::new(OnvifDriver::new());

    match protocol.test_connection(&camera).await {
        Ok(true) => info!("{}:{} answers ONVIF", camera.host, camera.port),
        Ok(false) => {
            error!("{}:{} does not answer ONVIF", camera.host, camera.port);
            return false;
        }
        Err(e) => {
            error!("Probe of {} failed: {}", camera.host, e);
            return false;
        }
    }

    match protocol.connect(&camera).await {
        Ok(true) => {}
        Ok(false) => {
            error!("Could not set up a session with {}", camera.host);
            return false;
        }
        Err(e) => {
            error!("Connect to {} failed: {}", camera.host, e);
            return false;
        }
    }

    match protocol.get_camera_info().await {
        Ok(info) => info!(
            "Device: {} {} (firmware {}, serial {})",
            info.manufacturer, info.model, info.firmware_version, info.serial_number
        ),
        Err(e) => warn!("Device information unavailable: {}", e),
    }
    info!("Capabilities: {:?}", protocol.capabilities());
    match protocol.get_available_streams().await {
        Ok(profiles) => {
            for profile in profiles {
                info!("  profile {} ({})", profile.token, profile.name);
            }
        }
        Err(e) => warn!("Stream profiles unavailable: {}", e),
    }

    protocol.disconnect().await;
    true
}
