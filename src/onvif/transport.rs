//! HTTP transport for SOAP calls and snapshot downloads.

use super::soap;
use crate::error::{ControlError, Result};
use crate::protocol::CameraConfig;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

#[async_trait]
pub trait SoapTransport: Send + Sync {
    /// POST a complete envelope and return the response document.
    async fn call(&self, endpoint: &str, envelope: String) -> Result<String>;

    /// GET a binary resource such as a snapshot.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Builds the device handle's transport from a connection config.
pub type TransportFactory =
    Arc<dyn Fn(&CameraConfig) -> Result<Arc<dyn SoapTransport>> + Send + Sync>;

pub fn http_transport_factory() -> TransportFactory {
    Arc::new(|config: &CameraConfig| {
        let transport: Arc<dyn SoapTransport> = Arc::new(HttpSoapTransport::new(config)?);
        Ok(transport)
    })
}

pub struct HttpSoapTransport {
    client: Client,
    username: String,
    password: String,
}

impl HttpSoapTransport {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

fn transport_error(endpoint: &str, e: reqwest::Error) -> ControlError {
    if e.is_connect() {
        ControlError::Connection(format!("{} unreachable: {}", endpoint, e))
    } else {
        ControlError::Transport(format!("{}: {}", endpoint, e))
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn call(&self, endpoint: &str, envelope: String) -> Result<String> {
        debug!("SOAP request to {}", endpoint);

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ControlError::Connection(format!(
                "{} rejected the credentials",
                endpoint
            )));
        }
        if let Some(reason) = soap::fault_reason(&body) {
            return Err(ControlError::Protocol(format!(
                "{} returned a fault: {}",
                endpoint, reason
            )));
        }
        if !status.is_success() {
            return Err(ControlError::Transport(format!(
                "{} answered with status {}",
                endpoint, status
            )));
        }

        Ok(body)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Transport(format!(
                "{} answered with status {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e))?;
        Ok(bytes.to_vec())
    }
}
