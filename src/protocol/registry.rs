//! Protocol selection for newly added cameras.

use super::contract::CameraProtocol;
use super::lifecycle::ProtocolLifecycle;
use super::types::CameraConfig;
use crate::error::{ControlError, Result};
use crate::onvif::{self, OnvifDriver, PollSettings, TransportFactory};
use crate::vendor::{
    VendorHttpDriver, VendorRegistry, VendorTransportFactory, http_vendor_transport_factory,
};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

/// Picks and builds the protocol instance for a camera. Called once per
/// `add_camera`.
#[async_trait]
pub trait ProtocolRegistry: Send + Sync {
    async fn detect_protocol(
        &self,
        config: &CameraConfig,
        preferred: Option<&str>,
    ) -> Result<Arc<dyn CameraProtocol>>;
}

/// ONVIF first, then the configured vendor brand.
pub struct DefaultProtocolRegistry {
    vendors: VendorRegistry,
    onvif_transport: TransportFactory,
    vendor_transport: VendorTransportFactory,
    poll_settings: PollSettings,
    probe: bool,
}

impl Default for DefaultProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultProtocolRegistry {
    pub fn new() -> Self {
        Self {
            vendors: VendorRegistry::with_defaults(),
            onvif_transport: onvif::http_transport_factory(),
            vendor_transport: http_vendor_transport_factory(),
            poll_settings: PollSettings::default(),
            probe: true,
        }
    }

    pub fn with_vendors(mut self, vendors: VendorRegistry) -> Self {
        self.vendors = vendors;
        self
    }

    pub fn with_onvif_transport(mut self, factory: TransportFactory) -> Self {
        self.onvif_transport = factory;
        self
    }

    pub fn with_vendor_transport(mut self, factory: VendorTransportFactory) -> Self {
        self.vendor_transport = factory;
        self
    }

    pub fn with_poll_settings(mut self, poll_settings: PollSettings) -> Self {
        self.poll_settings = poll_settings;
        self
    }

    /// Skip network probes and decide from the preference and brand hint only.
    pub fn with_probing(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn vendors(&self) -> &VendorRegistry {
        &self.vendors
    }

    fn onvif(&self) -> Arc<dyn CameraProtocol> {
        Arc::new(ProtocolLifecycle::new(
            OnvifDriver::with_transport_factory(self.onvif_transport.clone())
                .with_poll_settings(self.poll_settings),
        ))
    }

    fn vendor(&self, brand: &str) -> Option<Arc<dyn CameraProtocol>> {
        let profile = self.vendors.get(brand)?.clone();
        let protocol: Arc<dyn CameraProtocol> = Arc::new(ProtocolLifecycle::new(
            VendorHttpDriver::with_transport_factory(
                brand.to_ascii_lowercase(),
                profile,
                self.vendor_transport.clone(),
            ),
        ));
        Some(protocol)
    }

    async fn answers(protocol: &Arc<dyn CameraProtocol>, config: &CameraConfig) -> bool {
        match protocol.test_connection(config).await {
            Ok(answered) => answered,
            Err(e) => {
                debug!("{} probe of {} failed: {}", protocol.protocol_id(), config.host, e);
                false
            }
        }
    }
}

#[async_trait]
impl ProtocolRegistry for DefaultProtocolRegistry {
    async fn detect_protocol(
        &self,
        config: &CameraConfig,
        preferred: Option<&str>,
    ) -> Result<Arc<dyn CameraProtocol>> {
        if let Some(preferred) = preferred {
            if preferred.eq_ignore_ascii_case(onvif::PROTOCOL_ID) {
                return Ok(self.onvif());
            }
            return self.vendor(preferred).ok_or_else(|| {
                ControlError::Validation(format!("unknown protocol {}", preferred))
            });
        }

        let brand = config.brand.as_deref();
        if !self.probe {
            return Ok(brand
                .and_then(|b| self.vendor(b))
                .unwrap_or_else(|| self.onvif()));
        }

        let onvif = self.onvif();
        if Self::answers(&onvif, config).await {
            info!("{} answers ONVIF", config.host);
            return Ok(onvif);
        }
        if let Some(vendor) = brand.and_then(|b| self.vendor(b))
            && Self::answers(&vendor, config).await
        {
            info!("{} answers the {} API", config.host, brand.unwrap_or_default());
            return Ok(vendor);
        }

        debug!("No protocol answered on {}, defaulting to ONVIF", config.host);
        Ok(onvif)
    }
}
