use crate::{
    config::ProvisioningConfig,
    error::ProvisioningError,
    models::{
        DeviceConfig, InstallationId, NetworkCredentials, ProvisioningReport, ProvisioningSession,
    },
    services::{
        confirmation::EventWaiter,
        device::{DeviceConfigurator, ProvisioningRequest},
        network::{NetworkSwitcher, WifiControl, associate},
        push::PushBus,
        session::{SessionRegistrar, SessionStore},
    },
};
use log::{error, info, warn};
use serde_valid::Validate;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::watch, task};

type Callback = Box<dyn FnOnce(Result<ProvisioningReport, ProvisioningError>) + Send>;

/// Progress of the current provisioning attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    RegisteringSession,
    Connecting,
    SendingConfig,
    AwaitingConfirmation,
    Done { success: bool },
}

/// Drives a device through session registration, network switch, configuration and
/// confirmation
///
/// Only one attempt runs at a time.
pub struct ProvisioningOrchestrator<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    inner: Arc<Inner<S, W, C>>,
}

struct Inner<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    config: ProvisioningConfig,
    sessions: SessionRegistrar<S>,
    switcher: NetworkSwitcher<W>,
    configurator: Arc<C>,
    waiter: EventWaiter,
    busy: AtomicBool,
    stage: watch::Sender<Stage>,
    // created but not yet handed to the caller
    live_session: Mutex<Option<ProvisioningSession>>,
}

impl<S, W, C> Clone for ProvisioningOrchestrator<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, W, C> ProvisioningOrchestrator<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    /// # Arguments
    /// * `config` - Backend credentials and stage timeouts
    /// * `sessions` - Remote session store
    /// * `wifi` - Control over the phone's Wi-Fi stack
    /// * `configurator` - Delivers the request to the device
    /// * `bus` - Push payloads sent by devices
    pub fn new(
        config: ProvisioningConfig,
        sessions: Arc<S>,
        wifi: Arc<W>,
        configurator: Arc<C>,
        bus: Arc<PushBus>,
    ) -> Self {
        let waiter = EventWaiter::new(bus, config.timeouts.confirmation);
        let (stage, _) = watch::channel(Stage::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                sessions: SessionRegistrar::new(sessions),
                switcher: NetworkSwitcher::new(wifi),
                configurator,
                waiter,
                busy: AtomicBool::new(false),
                stage,
                live_session: Mutex::new(None),
            }),
        }
    }

    /// Observe the stage of the current attempt
    pub fn stages(&self) -> watch::Receiver<Stage> {
        self.inner.stage.subscribe()
    }

    /// Leave the device access point if still associated
    pub fn disconnect(&self) {
        self.inner.switcher.disconnect();
    }

    /// Start provisioning a device
    ///
    /// Must be called within a tokio runtime. `on_done` is called exactly once, either
    /// right away for rejected input or when the attempt ends.
    ///
    /// # Arguments
    /// * `device` - Access point and display name of the device
    /// * `credentials` - Home network the device should join
    /// * `on_done` - Receives the outcome of the attempt
    pub fn begin_provisioning<F>(
        &self,
        device: DeviceConfig,
        credentials: NetworkCredentials,
        on_done: F,
    ) where
        F: FnOnce(Result<ProvisioningReport, ProvisioningError>) + Send + 'static,
    {
        if let Err(e) = validate(&device, &credentials) {
            error!("rejected provisioning request: {e}");
            on_done(Err(e));
            return;
        }

        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("rejected provisioning of '{}': attempt in progress", device.name);
            on_done(Err(ProvisioningError::AttemptInProgress));
            return;
        }

        let completion = Completion {
            inner: self.inner.clone(),
            on_done: Some(Box::new(on_done)),
        };
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let result = inner.run(device, credentials).await;
            completion.complete(result);
        });
    }
}

fn validate(device: &DeviceConfig, credentials: &NetworkCredentials) -> Result<(), ProvisioningError> {
    device
        .validate()
        .map_err(|e| ProvisioningError::InvalidInput(format!("device: {e}")))?;
    credentials
        .validate()
        .map_err(|e| ProvisioningError::InvalidInput(format!("credentials: {e}")))
}

impl<S, W, C> Inner<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    fn live_session(&self) -> MutexGuard<'_, Option<ProvisioningSession>> {
        self.live_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, stage: Stage) {
        info!("provisioning stage: {stage:?}");
        self.stage.send_replace(stage);
    }

    async fn run(
        &self,
        device: DeviceConfig,
        credentials: NetworkCredentials,
    ) -> Result<ProvisioningReport, ProvisioningError> {
        info!("provisioning '{}' via {}", device.name, device.ssid);

        self.enter(Stage::RegisteringSession);
        let session = self.sessions.create().await?;
        *self.live_session() = Some(session.clone());
        let installation_id = InstallationId::new();

        self.enter(Stage::Connecting);
        associate(
            &self.switcher,
            &device.ssid,
            &device.bssid,
            self.config.timeouts.connect,
        )
        .await?;

        self.enter(Stage::SendingConfig);
        let request = ProvisioningRequest {
            device,
            credentials,
            application_id: self.config.backend.application_id.clone(),
            client_key: self.config.backend.client_key.clone(),
            installation_id,
            session_token: session.token.clone(),
        };
        let sent = self.send(request).await;

        self.switcher.disconnect();
        sent?;

        let pending = self.waiter.listen(&session.id);
        self.enter(Stage::AwaitingConfirmation);
        let confirmation = pending.wait().await;

        self.live_session().take();
        Ok(ProvisioningReport {
            session,
            installation_id,
            confirmation,
        })
    }

    // the device request blocks, keep it off the sequencing task
    async fn send(&self, request: ProvisioningRequest) -> Result<(), ProvisioningError> {
        let configurator = self.configurator.clone();

        match task::spawn_blocking(move || configurator.send(&request)).await {
            Ok(result) => result,
            Err(e) => {
                error!("failed to run config request: {e:#}");
                Err(ProvisioningError::ConfigSendFailed(format!("{e:#}")))
            }
        }
    }

    fn finish(&self, success: bool) {
        self.switcher.disconnect();

        if let Some(session) = self.live_session().take() {
            if !success {
                self.sessions.delete(session);
            }
        }

        self.enter(Stage::Done { success });
        self.busy.store(false, Ordering::Release);
    }
}

/// Hands the outcome of an attempt to its caller exactly once
///
/// Dropping it unfinished reports `Interrupted`.
struct Completion<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    inner: Arc<Inner<S, W, C>>,
    on_done: Option<Callback>,
}

impl<S, W, C> Completion<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    fn complete(mut self, result: Result<ProvisioningReport, ProvisioningError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<ProvisioningReport, ProvisioningError>) {
        let Some(on_done) = self.on_done.take() else {
            return;
        };

        match &result {
            Ok(report) => info!(
                "provisioning succeeded for session {} ({:?})",
                report.session.id, report.confirmation
            ),
            Err(e) => error!("provisioning failed: {e}"),
        }

        self.inner.finish(result.is_ok());
        on_done(result);
    }
}

impl<S, W, C> Drop for Completion<S, W, C>
where
    S: SessionStore + Send + Sync + 'static,
    W: WifiControl + 'static,
    C: DeviceConfigurator + 'static,
{
    fn drop(&mut self) {
        self.finish(Err(ProvisioningError::Interrupted));
    }
}
