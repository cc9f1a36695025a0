pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod orchestrator;
pub mod services;

pub use config::ProvisioningConfig;
pub use error::{ErrorKind, ProvisioningError};
pub use orchestrator::{ProvisioningOrchestrator, Stage};
