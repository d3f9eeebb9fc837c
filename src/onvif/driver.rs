//! ONVIF driver: discovery, media, PTZ, presets and pull-point events.

use super::device::{self, ServiceKind};
use super::events::{
    self, PollSettings, PullPointPoller, SubscriptionMap, SubscriptionRecord,
};
use super::media;
use super::ptz::{self, PtzCommand};
use super::soap::{self, Credentials};
use super::transport::{SoapTransport, TransportFactory, http_transport_factory};
use crate::error::{ControlError, Result};
use crate::protocol::lifecycle::{EventDispatcher, ProtocolDriver};
use crate::protocol::{
    ActiveStream, Capabilities, CameraConfig, CameraInfo, Preset, ProtocolStats, PtzMovement,
    StatsSnapshot, StreamOptions, StreamProfile,
};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub const PROTOCOL_ID: &str = "onvif";

/// Live connection to one device.
struct DeviceHandle {
    transport: Arc<dyn SoapTransport>,
    credentials: Option<Credentials>,
    device_url: String,
    services: HashMap<ServiceKind, String>,
    source: String,
    default_profile: Option<String>,
}

impl DeviceHandle {
    fn new(transport: Arc<dyn SoapTransport>, config: &CameraConfig) -> Self {
        Self {
            transport,
            credentials: config
                .has_credentials()
                .then(|| Credentials::new(&config.username, &config.password)),
            device_url: device_service_url(config),
            services: HashMap::new(),
            source: config.host.clone(),
            default_profile: config.profile_token.clone(),
        }
    }

    fn has(&self, kind: ServiceKind) -> bool {
        self.services.contains_key(&kind)
    }

    fn endpoint(&self, kind: ServiceKind) -> Result<&str> {
        match self.services.get(&kind) {
            Some(address) => Ok(address),
            None if kind == ServiceKind::Device => Ok(&self.device_url),
            None => Err(ControlError::CapabilityUnsupported(format!(
                "device exposes no {} service",
                kind
            ))),
        }
    }

    async fn call(&self, kind: ServiceKind, body: &str) -> Result<String> {
        let endpoint = self.endpoint(kind)?;
        self.transport
            .call(endpoint, soap::envelope(self.credentials.as_ref(), body))
            .await
    }
}

fn device_service_url(config: &CameraConfig) -> String {
    format!("http://{}:{}/onvif/device_service", config.host, config.port)
}

/// Everything learned during connect. Built completely before it is committed.
#[derive(Default)]
struct Discovery {
    info: Option<CameraInfo>,
    profiles: Vec<StreamProfile>,
    presets: Vec<Preset>,
}

pub struct OnvifDriver {
    transport_factory: TransportFactory,
    poll_settings: PollSettings,
    device: RwLock<Option<Arc<DeviceHandle>>>,
    cache: RwLock<Discovery>,
    capabilities: RwLock<Capabilities>,
    subscriptions: SubscriptionMap,
    streams: Mutex<HashMap<String, ActiveStream>>,
    stats: Arc<ProtocolStats>,
}

impl Default for OnvifDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OnvifDriver {
    pub fn new() -> Self {
        Self::with_transport_factory(http_transport_factory())
    }

    pub fn with_transport_factory(transport_factory: TransportFactory) -> Self {
        Self {
            transport_factory,
            poll_settings: PollSettings::default(),
            device: RwLock::new(None),
            cache: RwLock::new(Discovery::default()),
            capabilities: RwLock::new(Capabilities::default()),
            subscriptions: SubscriptionMap::default(),
            streams: Mutex::new(HashMap::new()),
            stats: Arc::new(ProtocolStats::default()),
        }
    }

    pub fn with_poll_settings(mut self, poll_settings: PollSettings) -> Self {
        self.poll_settings = poll_settings;
        self
    }

    fn device(&self) -> Result<Arc<DeviceHandle>> {
        self.device
            .read()
            .clone()
            .ok_or_else(|| ControlError::NotConnected("no ONVIF device session".to_string()))
    }

    async fn discover(&self, handle: &mut DeviceHandle) -> Result<(Discovery, Capabilities)> {
        let info = device::parse_device_info(
            &handle
                .call(ServiceKind::Device, device::GET_DEVICE_INFORMATION)
                .await?,
        )?;
        handle.services =
            device::parse_services(&handle.call(ServiceKind::Device, device::GET_SERVICES).await?);
        debug!(
            "{} exposes services: {:?}",
            handle.source,
            handle.services.keys().collect::<Vec<_>>()
        );

        let profiles = if handle.has(ServiceKind::Media) {
            media::parse_profiles(&handle.call(ServiceKind::Media, media::GET_PROFILES).await?)
        } else {
            Vec::new()
        };

        let mut encodings: Vec<String> = Vec::new();
        for encoding in profiles.iter().filter_map(|p| p.encoding.clone()) {
            if !encodings.contains(&encoding) {
                encodings.push(encoding);
            }
        }

        let has_ptz = handle.has(ServiceKind::Ptz);
        let presets = match ptz_profile_token(&profiles, handle.default_profile.as_deref()) {
            Some(token) if has_ptz => ptz::parse_presets(
                &handle
                    .call(ServiceKind::Ptz, &ptz::get_presets(&token))
                    .await?,
            ),
            _ => Vec::new(),
        };

        let capabilities = Capabilities {
            ptz: has_ptz,
            presets: has_ptz,
            home_position: has_ptz,
            events: handle.has(ServiceKind::Events),
            analytics: handle.has(ServiceKind::Analytics),
            imaging: handle.has(ServiceKind::Imaging),
            encodings,
        };

        Ok((
            Discovery {
                info: Some(info),
                profiles,
                presets,
            },
            capabilities,
        ))
    }

    fn ptz_profile(&self, handle: &DeviceHandle) -> Result<String> {
        ptz_profile_token(&self.cache.read().profiles, handle.default_profile.as_deref())
            .ok_or_else(|| {
                ControlError::Configuration(format!(
                    "{} has no media profile with a PTZ configuration",
                    handle.source
                ))
            })
    }

    async fn refresh_presets(&self, handle: &DeviceHandle, token: &str) -> Result<Vec<Preset>> {
        let presets = ptz::parse_presets(
            &handle
                .call(ServiceKind::Ptz, &ptz::get_presets(token))
                .await?,
        );
        self.cache.write().presets = presets.clone();
        Ok(presets)
    }

    async fn send_unsubscribe(&self, subscription_id: &str, address: &str) -> Result<()> {
        let handle = self.device()?;
        handle
            .transport
            .call(
                address,
                soap::envelope(handle.credentials.as_ref(), events::UNSUBSCRIBE),
            )
            .await?;
        debug!("Unsubscribed {} at {}", subscription_id, address);
        Ok(())
    }
}

/// The configured profile when it carries PTZ, else the first PTZ profile.
fn ptz_profile_token(profiles: &[StreamProfile], preferred: Option<&str>) -> Option<String> {
    preferred
        .and_then(|token| {
            profiles
                .iter()
                .find(|p| p.token == token && p.supports_ptz())
        })
        .or_else(|| profiles.iter().find(|p| p.supports_ptz()))
        .map(|p| p.token.clone())
}

#[async_trait]
impl ProtocolDriver for OnvifDriver {
    fn protocol_id(&self) -> &'static str {
        PROTOCOL_ID
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.read().clone()
    }

    async fn perform_connect(&self, config: &CameraConfig) -> Result<bool> {
        let transport = (self.transport_factory)(config)?;
        let mut handle = DeviceHandle::new(transport, config);

        match self.discover(&mut handle).await {
            Ok((discovery, capabilities)) => {
                info!(
                    "ONVIF device {} ({} {}) with {} profiles, ptz={}, events={}",
                    handle.source,
                    discovery
                        .info
                        .as_ref()
                        .map(|i| i.manufacturer.as_str())
                        .unwrap_or_default(),
                    discovery
                        .info
                        .as_ref()
                        .map(|i| i.model.as_str())
                        .unwrap_or_default(),
                    discovery.profiles.len(),
                    capabilities.ptz,
                    capabilities.events
                );
                *self.cache.write() = discovery;
                *self.capabilities.write() = capabilities;
                *self.device.write() = Some(Arc::new(handle));
                Ok(true)
            }
            Err(e) => {
                warn!("ONVIF discovery on {} failed: {}", handle.source, e);
                Ok(false)
            }
        }
    }

    async fn perform_disconnect(&self) {
        let remaining: Vec<(String, SubscriptionRecord)> =
            self.subscriptions.lock().drain().collect();
        for (subscription_id, mut record) in remaining {
            record.stop();
            if let Err(e) = self.send_unsubscribe(&subscription_id, &record.address).await {
                warn!("Failed to unsubscribe {}: {}", subscription_id, e);
            }
        }

        *self.device.write() = None;
        *self.cache.write() = Discovery::default();
        *self.capabilities.write() = Capabilities::default();
        self.streams.lock().clear();
    }

    async fn probe(&self, config: &CameraConfig) -> Result<bool> {
        let transport = (self.transport_factory)(config)?;
        let url = device_service_url(config);
        match transport
            .call(&url, soap::envelope(None, device::GET_SYSTEM_DATE_AND_TIME))
            .await
        {
            Ok(response) => Ok(response.contains("GetSystemDateAndTimeResponse")),
            Err(e) => {
                debug!("ONVIF probe of {} failed: {}", url, e);
                Ok(false)
            }
        }
    }

    async fn fetch_frame(&self) -> Result<Vec<u8>> {
        let handle = self.device()?;
        let token = {
            let cache = self.cache.read();
            media::select_profile(
                &cache.profiles,
                &StreamOptions::default(),
                handle.default_profile.as_deref(),
            )
            .map(|p| p.token.clone())
        }
        .ok_or_else(|| {
            ControlError::Configuration(format!("{} has no media profiles", handle.source))
        })?;

        let uri = media::parse_uri(
            &handle
                .call(ServiceKind::Media, &media::get_snapshot_uri(&token))
                .await?,
        )?;
        let frame = handle.transport.fetch(&uri).await?;
        ProtocolStats::record(&self.stats.frames_captured);
        Ok(frame)
    }

    async fn camera_info(&self) -> Result<CameraInfo> {
        let cached = self.cache.read().info.clone();
        if let Some(info) = cached {
            return Ok(info);
        }

        let handle = self.device()?;
        let info = device::parse_device_info(
            &handle
                .call(ServiceKind::Device, device::GET_DEVICE_INFORMATION)
                .await?,
        )?;
        self.cache.write().info = Some(info.clone());
        Ok(info)
    }

    async fn stream_profiles(&self) -> Result<Vec<StreamProfile>> {
        let cached = self.cache.read().profiles.clone();
        if !cached.is_empty() {
            return Ok(cached);
        }

        let handle = self.device()?;
        let profiles =
            media::parse_profiles(&handle.call(ServiceKind::Media, media::GET_PROFILES).await?);
        self.cache.write().profiles = profiles.clone();
        Ok(profiles)
    }

    async fn open_stream(&self, options: &StreamOptions) -> Result<String> {
        let handle = self.device()?;
        let profiles = self.stream_profiles().await?;

        let profile = match media::select_profile(
            &profiles,
            options,
            handle.default_profile.as_deref(),
        ) {
            Some(profile) => profile,
            None => {
                return Err(match &options.profile_token {
                    Some(token) => ControlError::NotFound(format!("media profile {}", token)),
                    None => ControlError::Configuration(format!(
                        "{} has no media profiles",
                        handle.source
                    )),
                });
            }
        };

        let uri = media::parse_uri(
            &handle
                .call(ServiceKind::Media, &media::get_stream_uri(&profile.token))
                .await?,
        )?;

        let stream = ActiveStream {
            id: uuid::Uuid::new_v4().to_string(),
            profile_token: profile.token.clone(),
            uri,
            started_at: chrono::Utc::now(),
        };
        info!(
            "Stream {} on {} using profile {}",
            stream.id, handle.source, stream.profile_token
        );

        let stream_id = stream.id.clone();
        self.streams.lock().insert(stream_id.clone(), stream);
        ProtocolStats::record(&self.stats.streams_started);
        Ok(stream_id)
    }

    async fn close_stream(&self, stream_id: Option<&str>) -> Result<()> {
        let mut streams = self.streams.lock();
        match stream_id {
            Some(id) => {
                streams
                    .remove(id)
                    .ok_or_else(|| ControlError::NotFound(format!("stream {}", id)))?;
            }
            None => streams.clear(),
        }
        Ok(())
    }

    fn stream_uri(&self, stream_id: &str) -> Option<String> {
        self.streams.lock().get(stream_id).map(|s| s.uri.clone())
    }

    async fn move_ptz(&self, movement: &PtzMovement) -> Result<()> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;
        let command = PtzCommand::from_movement(movement);

        handle
            .call(ServiceKind::Ptz, &command.to_body(&token))
            .await?;
        ProtocolStats::record(&self.stats.ptz_commands);
        debug!("{} on {} ({})", command.action(), handle.source, token);
        Ok(())
    }

    async fn stop_ptz(&self) -> Result<()> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;
        handle.call(ServiceKind::Ptz, &ptz::stop(&token)).await?;
        ProtocolStats::record(&self.stats.ptz_commands);
        Ok(())
    }

    async fn goto_home(&self) -> Result<()> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;
        handle
            .call(ServiceKind::Ptz, &ptz::goto_home(&token))
            .await?;
        ProtocolStats::record(&self.stats.ptz_commands);
        Ok(())
    }

    async fn goto_preset(&self, preset_id: &str) -> Result<()> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;

        let known = self
            .cache
            .read()
            .presets
            .iter()
            .any(|p| p.token == preset_id);
        if !known {
            return Err(ControlError::NotFound(format!("preset {}", preset_id)));
        }

        handle
            .call(ServiceKind::Ptz, &ptz::goto_preset(&token, preset_id))
            .await?;
        ProtocolStats::record(&self.stats.ptz_commands);
        Ok(())
    }

    async fn save_preset(&self, name: &str) -> Result<String> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;

        let preset_token = ptz::parse_preset_token(
            &handle
                .call(ServiceKind::Ptz, &ptz::set_preset(&token, name))
                .await?,
        )?;
        self.refresh_presets(&handle, &token).await?;
        info!("Saved preset {} ({}) on {}", name, preset_token, handle.source);
        Ok(preset_token)
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        let handle = self.device()?;
        let token = self.ptz_profile(&handle)?;
        self.refresh_presets(&handle, &token).await
    }

    async fn subscribe(&self, types: &[String], dispatcher: EventDispatcher) -> Result<String> {
        let handle = self.device()?;
        let address = events::parse_subscription_address(
            &handle
                .call(ServiceKind::Events, events::CREATE_PULL_POINT_SUBSCRIPTION)
                .await?,
        )?;

        let subscription_id = uuid::Uuid::new_v4().to_string();
        let record = SubscriptionRecord::new(address.clone(), types.to_vec());
        let poller = PullPointPoller {
            subscription_id: subscription_id.clone(),
            address,
            types: types.to_vec(),
            source: handle.source.clone(),
            transport: handle.transport.clone(),
            credentials: handle.credentials.clone(),
            settings: self.poll_settings,
            subscriptions: self.subscriptions.clone(),
            dispatcher,
            stats: self.stats.clone(),
            cancel: record.cancel.clone(),
        };

        // Registered before the task starts so its first poll sees it.
        {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.insert(subscription_id.clone(), record);
            if let Some(record) = subscriptions.get_mut(&subscription_id) {
                record.task = Some(tokio::spawn(poller.run()));
            }
        }
        info!(
            "Pull-point subscription {} on {} for {:?}",
            subscription_id, handle.source, types
        );
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut record = self
            .subscriptions
            .lock()
            .remove(subscription_id)
            .ok_or_else(|| ControlError::NotFound(format!("subscription {}", subscription_id)))?;
        record.stop();
        self.send_unsubscribe(subscription_id, &record.address).await
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
