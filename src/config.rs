use anyhow::{Context, Result};
use std::{env, sync::OnceLock, time::Duration};

/// Provisioning configuration loaded and validated once
#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    /// Device access point endpoint configuration
    pub device: DeviceEndpointConfig,

    /// Remote session store configuration
    pub backend: BackendConfig,

    /// Stage timeouts
    pub timeouts: TimeoutConfig,
}

#[derive(Clone, Debug)]
pub struct DeviceEndpointConfig {
    pub url: String,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub url: String,
    pub application_id: String,
    pub client_key: String,
}

#[derive(Clone, Debug)]
pub struct TimeoutConfig {
    pub connect: Duration,
    pub confirmation: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            device: DeviceEndpointConfig {
                url: DeviceEndpointConfig::DEFAULT_URL.to_string(),
                request_timeout: Duration::from_secs(DeviceEndpointConfig::DEFAULT_TIMEOUT_SECS),
            },
            backend: BackendConfig {
                url: BackendConfig::DEFAULT_URL.to_string(),
                application_id: String::new(),
                client_key: String::new(),
            },
            timeouts: TimeoutConfig {
                connect: Duration::from_secs(TimeoutConfig::DEFAULT_CONNECT_SECS),
                confirmation: Duration::from_secs(TimeoutConfig::DEFAULT_CONFIRMATION_SECS),
            },
        }
    }
}

impl ProvisioningConfig {
    /// Get or load the provisioning configuration
    ///
    /// On first call the configuration is read from environment variables, subsequent
    /// calls return the cached instance.
    ///
    /// # Panics
    /// Panics if a variable is set but cannot be parsed.
    pub fn get() -> &'static Self {
        static CONFIG: OnceLock<ProvisioningConfig> = OnceLock::new();
        CONFIG.get_or_init(|| {
            Self::load_from(|key| env::var(key).ok())
                .expect("failed to load provisioning configuration")
        })
    }

    /// Load configuration through a variable lookup
    ///
    /// Missing variables fall back to their defaults.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable if it is set
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            device: DeviceEndpointConfig::load(&lookup)?,
            backend: BackendConfig::load(&lookup),
            timeouts: TimeoutConfig::load(&lookup)?,
        })
    }
}

impl DeviceEndpointConfig {
    const DEFAULT_URL: &str = "http://192.168.1.1:8080/parse_config.html";
    const DEFAULT_TIMEOUT_SECS: u64 = 20;

    fn load<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DEVICE_CONFIG_URL").unwrap_or_else(|| Self::DEFAULT_URL.to_string());
        let request_timeout =
            secs_or_default(lookup, "DEVICE_REQUEST_TIMEOUT_SECS", Self::DEFAULT_TIMEOUT_SECS)?;

        Ok(Self {
            url,
            request_timeout,
        })
    }
}

impl BackendConfig {
    const DEFAULT_URL: &str = "https://api.parse.com/1";

    fn load<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            url: lookup("BACKEND_URL").unwrap_or_else(|| Self::DEFAULT_URL.to_string()),
            application_id: lookup("BACKEND_APPLICATION_ID").unwrap_or_default(),
            client_key: lookup("BACKEND_CLIENT_KEY").unwrap_or_default(),
        }
    }
}

impl TimeoutConfig {
    const DEFAULT_CONNECT_SECS: u64 = 30;
    const DEFAULT_CONFIRMATION_SECS: u64 = 60;

    fn load<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            connect: secs_or_default(lookup, "CONNECT_TIMEOUT_SECS", Self::DEFAULT_CONNECT_SECS)?,
            confirmation: secs_or_default(
                lookup,
                "CONFIRMATION_TIMEOUT_SECS",
                Self::DEFAULT_CONFIRMATION_SECS,
            )?,
        })
    }
}

fn secs_or_default<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(value) => value
            .parse::<u64>()
            .context(format!("failed to parse {key}: invalid format"))?,
        None => default,
    };

    Ok(Duration::from_secs(secs))
}
