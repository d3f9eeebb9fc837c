use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ControlError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Camera already exists: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Camera not connected: {0}")]
    NotConnected(String),

    #[error("Capability not supported: {0}")]
    CapabilityUnsupported(String),

    /// The device is reachable but lacks the profile/PTZ configuration needed.
    #[error("Device configuration error: {0}")]
    Configuration(String),

    /// Unreachable device or rejected credentials.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Network failure during a move/frame/poll call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed response or SOAP fault returned by the device.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;

impl ControlError {
    /// HTTP status the surrounding REST layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ControlError::Validation(_)
            | ControlError::CapabilityUnsupported(_)
            | ControlError::NotConnected(_) => 400,
            ControlError::CameraNotFound(_) | ControlError::NotFound(_) => 404,
            ControlError::Conflict(_) => 409,
            ControlError::Configuration(_)
            | ControlError::Connection(_)
            | ControlError::Transport(_)
            | ControlError::Protocol(_)
            | ControlError::Http(_)
            | ControlError::SerdeJsonError(_)
            | ControlError::IoError(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ControlError::CameraNotFound(_) => "CAMERA_NOT_FOUND",
            ControlError::NotFound(_) => "NOT_FOUND",
            ControlError::Conflict(_) => "CONFLICT",
            ControlError::Validation(_) => "VALIDATION_ERROR",
            ControlError::NotConnected(_) => "NOT_CONNECTED",
            ControlError::CapabilityUnsupported(_) => "CAPABILITY_UNSUPPORTED",
            ControlError::Configuration(_) => "CONFIGURATION_ERROR",
            ControlError::Connection(_) => "CONNECTION_ERROR",
            ControlError::Transport(_) | ControlError::Http(_) => "TRANSPORT_ERROR",
            ControlError::Protocol(_) => "PROTOCOL_ERROR",
            ControlError::SerdeJsonError(_) => "SERIALIZATION_ERROR",
            ControlError::IoError(_) => "IO_ERROR",
        }
    }

    /// JSON body for the REST layer; the upstream message travels as `details`.
    pub fn to_response_body(&self) -> serde_json::Value {
        json!({
            "error": self.error_code(),
            "details": self.to_string(),
        })
    }

    /// True for failures caused by the network rather than by the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, ControlError::Transport(_) | ControlError::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ControlError::Validation("speed".into()).status_code(), 400);
        assert_eq!(
            ControlError::CapabilityUnsupported("ptz".into()).status_code(),
            400
        );
        assert_eq!(ControlError::CameraNotFound("cam".into()).status_code(), 404);
        assert_eq!(ControlError::NotFound("preset 9".into()).status_code(), 404);
        assert_eq!(ControlError::Transport("timeout".into()).status_code(), 500);
        assert_eq!(ControlError::Configuration("no ptz".into()).status_code(), 500);
    }

    #[test]
    fn test_response_body_passes_details_through() {
        let err = ControlError::Transport("connection reset by peer".into());
        let body = err.to_response_body();
        assert_eq!(body["error"], "TRANSPORT_ERROR");
        assert_eq!(body["details"], "Transport error: connection reset by peer");
        assert!(err.is_transient());
    }
}
