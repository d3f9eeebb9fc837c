//! Device service: identity and service discovery.

use super::soap::ns;
use super::xml;
use crate::error::{ControlError, Result};
use crate::protocol::CameraInfo;
use std::collections::HashMap;

pub const GET_DEVICE_INFORMATION: &str = "<tds:GetDeviceInformation/>";

/// Answered without authentication by conforming devices.
pub const GET_SYSTEM_DATE_AND_TIME: &str = "<tds:GetSystemDateAndTime/>";

pub const GET_SERVICES: &str =
    "<tds:GetServices><tds:IncludeCapability>false</tds:IncludeCapability></tds:GetServices>";

/// ONVIF services this crate talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceKind {
    Device,
    Media,
    Ptz,
    Events,
    Analytics,
    Imaging,
}

impl ServiceKind {
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace.trim() {
            ns::DEVICE => Some(ServiceKind::Device),
            ns::MEDIA => Some(ServiceKind::Media),
            ns::PTZ => Some(ServiceKind::Ptz),
            ns::EVENTS => Some(ServiceKind::Events),
            ns::ANALYTICS => Some(ServiceKind::Analytics),
            ns::IMAGING => Some(ServiceKind::Imaging),
            _ => None,
        }
    }
}

/// Service endpoints keyed by kind. Unknown namespaces are ignored.
pub fn parse_services(response: &str) -> HashMap<ServiceKind, String> {
    xml::elements(response, "Service")
        .into_iter()
        .filter_map(|service| {
            let kind = ServiceKind::from_namespace(&service.text("Namespace")?)?;
            let address = service.text("XAddr")?;
            Some((kind, address))
        })
        .collect()
}

pub fn parse_device_info(response: &str) -> Result<CameraInfo> {
    let body = xml::elements(response, "GetDeviceInformationResponse")
        .into_iter()
        .next()
        .ok_or_else(|| {
            ControlError::Protocol("missing GetDeviceInformationResponse".to_string())
        })?;

    let field = |name: &str| body.text(name).unwrap_or_default();
    Ok(CameraInfo {
        manufacturer: field("Manufacturer"),
        model: field("Model"),
        firmware_version: field("FirmwareVersion"),
        serial_number: field("SerialNumber"),
        hardware_id: field("HardwareId"),
    })
}
