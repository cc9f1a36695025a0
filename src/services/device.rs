use crate::{
    config::DeviceEndpointConfig,
    error::ProvisioningError,
    http_client::device_client,
    models::{DeviceConfig, InstallationId, NetworkCredentials, Platform},
};
use log::{error, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{StatusCode, blocking::Client};
use std::{sync::OnceLock, time::Duration};

/// Everything the device needs to join the home network and report back
#[derive(Clone)]
pub struct ProvisioningRequest {
    pub device: DeviceConfig,
    pub credentials: NetworkCredentials,
    pub application_id: String,
    pub client_key: String,
    pub installation_id: InstallationId,
    pub session_token: String,
}

impl ProvisioningRequest {
    /// Form fields in the order the device firmware expects them
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("__SL_P_USA", self.credentials.ssid.clone()),
            ("__SL_P_USB", self.credentials.security.code().to_string()),
            ("__SL_P_USC", self.credentials.password.clone()),
            ("__SL_P_USD", self.application_id.clone()),
            ("__SL_P_USE", self.client_key.clone()),
            ("__SL_P_USF", self.installation_id.to_string()),
            ("__SL_P_USG", self.session_token.clone()),
            ("__SL_P_USH", self.device.name.clone()),
            ("__SL_P_USZ", "Add".to_string()),
        ]
    }
}

/// Delivers provisioning requests to a device access point
///
/// Implementations block; callers run them on the blocking thread pool.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DeviceConfigurator: Send + Sync {
    fn send(&self, request: &ProvisioningRequest) -> Result<(), ProvisioningError>;
}

/// Posts the request form to the configuration page served by the device
pub struct HttpDeviceConfigurator {
    url: String,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl HttpDeviceConfigurator {
    pub fn new(endpoint: &DeviceEndpointConfig) -> Self {
        Self {
            url: endpoint.url.clone(),
            timeout: endpoint.request_timeout,
            client: OnceLock::new(),
        }
    }

    // the blocking client must be created on the thread that uses it
    fn client(&self) -> Result<&Client, ProvisioningError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let client = device_client(self.timeout).map_err(|e| {
            error!("{e:#}");
            ProvisioningError::ConfigSendFailed(format!("{e:#}"))
        })?;

        Ok(self.client.get_or_init(|| client))
    }
}

impl DeviceConfigurator for HttpDeviceConfigurator {
    fn send(&self, request: &ProvisioningRequest) -> Result<(), ProvisioningError> {
        let ssid = &request.device.ssid;

        if !Platform::is_supported(ssid) {
            error!("unsupported device platform for {ssid}");
            return Err(ProvisioningError::ConfigSendFailed(format!(
                "unsupported device platform for {ssid}"
            )));
        }

        info!("POST {}", self.url);

        let res = self
            .client()?
            .post(&self.url)
            .form(&request.form_fields())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    error!("timed out sending config to {}", self.url);
                    ProvisioningError::ConfigSendTimedOut
                } else {
                    error!("failed to send config to {}: {e}", self.url);
                    ProvisioningError::ConfigSendFailed(format!(
                        "failed to send config to {}: {e}",
                        self.url
                    ))
                }
            })?;

        let status = res.status();
        if status != StatusCode::OK {
            error!("device rejected config with status {status}");
            return Err(ProvisioningError::ConfigSendFailed(format!(
                "device rejected config with status {status}"
            )));
        }

        info!("config accepted by {ssid}");
        Ok(())
    }
}
