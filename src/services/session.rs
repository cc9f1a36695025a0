//! Provisioning session records
//!
//! A session is created before the device is touched and deleted again when a later stage
//! fails. On success it stays, since it links the device to its confirmation events.

use crate::{
    config::BackendConfig,
    error::ProvisioningError,
    http_client::{backend_client, handle_http_response},
    models::ProvisioningSession,
};
use anyhow::{Context, Result};
use log::{error, info};
use reqwest::Client;
use std::sync::Arc;
use tokio::runtime::Handle;
use trait_variant::make;

#[make(Send)]
pub trait SessionStore {
    async fn create(&self) -> Result<ProvisioningSession>;
    async fn delete(&self, session: &ProvisioningSession) -> Result<()>;
}

/// Session store backed by the REST backend
#[derive(Clone)]
pub struct HttpSessionStore {
    client: Client,
    base_url: String,
}

impl HttpSessionStore {
    const SESSIONS_ENDPOINT: &str = "/sessions";

    pub fn new(backend: &BackendConfig, user_session_token: &str) -> Result<Self> {
        Ok(Self {
            client: backend_client(backend, user_session_token)?,
            base_url: backend.url.trim_end_matches('/').to_string(),
        })
    }

    fn build_url(&self, path: &str) -> String {
        let normalized_path = path.trim_start_matches('/');
        format!("{}/{normalized_path}", self.base_url)
    }
}

impl SessionStore for HttpSessionStore {
    async fn create(&self) -> Result<ProvisioningSession> {
        let url = self.build_url(Self::SESSIONS_ENDPOINT);
        info!("POST {url}");

        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context(format!("failed to send POST request to {url}"))?;

        let body = handle_http_response(res, &format!("POST {url}")).await?;
        serde_json::from_str(&body).context("failed to parse created session")
    }

    async fn delete(&self, session: &ProvisioningSession) -> Result<()> {
        let url = self.build_url(&format!("{}/{}", Self::SESSIONS_ENDPOINT, session.id));
        info!("DELETE {url}");

        let res = self
            .client
            .delete(&url)
            .send()
            .await
            .context(format!("failed to send DELETE request to {url}"))?;

        handle_http_response(res, &format!("DELETE {url}")).await?;
        Ok(())
    }
}

/// Creates sessions for provisioning attempts and rolls them back on failure
pub struct SessionRegistrar<S> {
    store: Arc<S>,
}

impl<S> Clone for SessionRegistrar<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> SessionRegistrar<S>
where
    S: SessionStore + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create the session for a new attempt
    ///
    /// # Returns
    /// The created session, or `SessionCreateFailed` if the store rejected the request
    pub async fn create(&self) -> Result<ProvisioningSession, ProvisioningError> {
        match self.store.create().await {
            Ok(session) => {
                info!("created provisioning session {}", session.id);
                Ok(session)
            }
            Err(e) => {
                error!("failed to create provisioning session: {e:#}");
                Err(ProvisioningError::SessionCreateFailed(format!("{e:#}")))
            }
        }
    }

    /// Delete a session in the background
    ///
    /// Failures are logged only. A stale session record does not change the outcome of
    /// the attempt.
    pub fn delete(&self, session: ProvisioningSession) {
        let Ok(runtime) = Handle::try_current() else {
            error!(
                "failed to delete provisioning session {}: no runtime",
                session.id
            );
            return;
        };
        let store = self.store.clone();

        runtime.spawn(async move {
            match store.delete(&session).await {
                Ok(()) => info!("deleted provisioning session {}", session.id),
                Err(e) => error!("failed to delete provisioning session {}: {e:#}", session.id),
            }
        });
    }
}
