use crate::{
    error::ProvisioningError,
    models::{AccessPointRecord, NetworkHandle, NetworkProfile},
};
use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::broadcast::{self, error::RecvError};

// ============================================================================
// Platform capability
// ============================================================================

/// Connectivity notification delivered by the OS
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectivityEvent {
    /// The Wi-Fi association changed
    StateChanged {
        connected: bool,
        ssid: Option<String>,
        bssid: Option<String>,
    },
    /// A previously requested Wi-Fi network became usable
    NetworkAvailable { handle: NetworkHandle },
}

/// Control over the phone's Wi-Fi stack
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait WifiControl: Send + Sync {
    /// Subscribe to connectivity notifications
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent>;
    /// Current association
    fn connection_info(&self) -> Result<AccessPointRecord>;
    fn configured_networks(&self) -> Result<Vec<NetworkProfile>>;
    fn add_network(&self, profile: &NetworkProfile) -> Result<NetworkHandle>;
    fn remove_network(&self, handle: NetworkHandle) -> Result<()>;
    /// Enable a profile, disabling all others when `exclusive` is set
    fn enable_network(&self, handle: NetworkHandle, exclusive: bool) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn reconnect(&self) -> Result<()>;
    /// Whether traffic must be bound explicitly to a Wi-Fi network without internet uplink
    fn requires_process_binding(&self) -> bool;
    /// Request a Wi-Fi transport; availability arrives as `NetworkAvailable`
    fn request_wifi_network(&self) -> Result<()>;
    fn release_network_request(&self) -> Result<()>;
    fn bind_process_to_network(&self, handle: Option<NetworkHandle>) -> Result<()>;
}

// ============================================================================
// Switcher
// ============================================================================

/// Network the phone left and network it switched to
///
/// Both records exist together or not at all.
#[derive(Clone, Debug)]
struct SwitchRecords {
    previous: AccessPointRecord,
    desired: AccessPointRecord,
}

#[derive(Default)]
struct SwitchState {
    records: Option<SwitchRecords>,
    subscription: Option<broadcast::Receiver<ConnectivityEvent>>,
    subscribed: bool,
    notify_pending: bool,
    awaiting_network: bool,
    network_requested: bool,
}

/// Moves the phone onto a device access point and back
pub struct NetworkSwitcher<W> {
    wifi: Arc<W>,
    state: Mutex<SwitchState>,
}

impl<W> NetworkSwitcher<W>
where
    W: WifiControl,
{
    pub fn new(wifi: Arc<W>) -> Self {
        Self {
            wifi,
            state: Mutex::new(SwitchState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a switch to a device access point is outstanding
    pub fn is_switch_outstanding(&self) -> bool {
        self.state().records.is_some()
    }

    /// Start switching to the device access point
    ///
    /// Remembers the current association, registers the device network with a priority
    /// above every existing profile and reconnects to it. Association is reported through
    /// [`NetworkSwitcher::handle_connectivity_change`].
    ///
    /// # Arguments
    /// * `ssid` - Name of the device access point
    /// * `bssid` - Hardware address of the device access point
    ///
    /// # Returns
    /// Receiver for the connectivity notifications to feed back into the switcher
    pub fn connect(&self, ssid: &str, bssid: &str) -> Result<broadcast::Receiver<ConnectivityEvent>> {
        let mut state = self.state();

        if state.records.is_some() {
            bail!("failed to connect to {ssid}: another switch is outstanding");
        }

        let events = self.wifi.subscribe();
        state.subscribed = true;

        let previous = self
            .wifi
            .connection_info()
            .context("failed to read current connection")?;
        debug!("previous network is '{}' @ {:?}", previous.ssid, previous.bssid);

        let priority = self
            .wifi
            .configured_networks()
            .context("failed to read configured networks")?
            .iter()
            .map(|profile| profile.priority)
            .fold(0, i32::max)
            .checked_add(1)
            .context(format!("failed to rank {ssid}: priority exhausted"))?;

        let profile = NetworkProfile {
            ssid: ssid.to_string(),
            bssid: Some(bssid.to_string()),
            priority,
            open: true,
        };

        let handle = self
            .wifi
            .add_network(&profile)
            .context(format!("failed to add network profile for {ssid}"))?;

        state.records = Some(SwitchRecords {
            previous,
            desired: AccessPointRecord {
                ssid: ssid.to_string(),
                bssid: Some(bssid.to_string()),
                handle,
            },
        });
        state.notify_pending = true;

        info!("switching to '{ssid}' @ {bssid} with priority {priority}");

        if let Err(e) = self.wifi.disconnect() {
            warn!("failed to disconnect before switching: {e:#}");
        }
        self.wifi
            .enable_network(handle, true)
            .context(format!("failed to enable network {ssid}"))?;
        self.wifi.reconnect().context("failed to reconnect")?;

        Ok(events)
    }

    /// Process a connectivity notification
    ///
    /// # Returns
    /// `true` exactly once, when the phone is associated with the device access point and,
    /// where the platform requires it, the process is bound to that network
    pub fn handle_connectivity_change(&self, event: &ConnectivityEvent) -> Result<bool> {
        let mut state = self.state();

        if !state.subscribed || !state.notify_pending {
            debug!("ignoring connectivity change: no association pending");
            return Ok(false);
        }

        let Some(records) = state.records.clone() else {
            debug!("ignoring connectivity change: no desired network");
            return Ok(false);
        };

        match event {
            ConnectivityEvent::StateChanged {
                connected,
                ssid,
                bssid,
            } => {
                let (true, Some(bssid)) = (*connected, bssid) else {
                    return Ok(false);
                };

                let ssid = strip_quotes(ssid.as_deref().unwrap_or_default());
                info!("connected to '{ssid}' @ {bssid}");

                if ssid == strip_quotes(&records.previous.ssid) {
                    return Ok(false);
                }

                let desired = records.desired.bssid.as_deref().unwrap_or_default();
                if !bssid.eq_ignore_ascii_case(desired) || state.awaiting_network {
                    return Ok(false);
                }

                if self.wifi.requires_process_binding() {
                    self.wifi
                        .request_wifi_network()
                        .context("failed to request wifi network")?;
                    state.network_requested = true;
                    state.awaiting_network = true;
                    debug!("waiting for device network to become available");
                    return Ok(false);
                }

                state.notify_pending = false;
                Ok(true)
            }
            ConnectivityEvent::NetworkAvailable { handle } => {
                if !state.awaiting_network {
                    return Ok(false);
                }

                self.wifi
                    .bind_process_to_network(Some(*handle))
                    .context("failed to bind process to device network")?;

                state.awaiting_network = false;
                state.notify_pending = false;
                Ok(true)
            }
        }
    }

    /// Keep the connectivity subscription alive until [`NetworkSwitcher::disconnect`]
    pub fn retain_subscription(&self, events: broadcast::Receiver<ConnectivityEvent>) {
        let mut state = self.state();
        if state.subscribed {
            state.subscription = Some(events);
        }
    }

    /// Leave the device access point and restore the previous network
    ///
    /// Does nothing but drop the subscription when no switch is outstanding.
    pub fn disconnect(&self) {
        let mut state = self.state();

        state.subscription = None;
        state.subscribed = false;
        state.notify_pending = false;

        let Some(records) = state.records.clone() else {
            debug!("disconnect called without outstanding switch");
            return;
        };

        match self.wifi.disconnect() {
            Ok(()) => info!("disconnecting from '{}'", records.desired.ssid),
            Err(e) => error!("failed to disconnect from '{}': {e:#}", records.desired.ssid),
        }

        if let Err(e) = self.wifi.remove_network(records.desired.handle) {
            error!("failed to remove network '{}': {e:#}", records.desired.ssid);
        }

        if records.previous.handle != NetworkHandle::NONE {
            if let Err(e) = self.wifi.enable_network(records.previous.handle, true) {
                error!("failed to enable network '{}': {e:#}", records.previous.ssid);
            }
        }

        if let Err(e) = self.wifi.reconnect() {
            error!("failed to reconnect to '{}': {e:#}", records.previous.ssid);
        }

        state.records = None;

        if state.network_requested {
            if let Err(e) = self.wifi.bind_process_to_network(None) {
                error!("failed to release process network binding: {e:#}");
            }
            if let Err(e) = self.wifi.release_network_request() {
                error!("failed to release network request: {e:#}");
            }
        }
        state.network_requested = false;
        state.awaiting_network = false;
    }
}

fn strip_quotes(ssid: &str) -> String {
    ssid.replace('"', "")
}

// ============================================================================
// Connect step
// ============================================================================

/// Switch to the device access point and wait for the association
///
/// The wait races a timer. Whichever loses is dropped, and on every failure the switcher
/// is disconnected so the previous network is restored.
///
/// # Arguments
/// * `switcher` - Switcher owning the phone's association
/// * `ssid` - Name of the device access point
/// * `bssid` - Hardware address of the device access point
/// * `timeout` - How long to wait for the association
pub async fn associate<W>(
    switcher: &NetworkSwitcher<W>,
    ssid: &str,
    bssid: &str,
    timeout: Duration,
) -> Result<(), ProvisioningError>
where
    W: WifiControl,
{
    let mut events = match switcher.connect(ssid, bssid) {
        Ok(events) => events,
        Err(e) => {
            error!("failed to start connecting: {e:#}");
            switcher.disconnect();
            return Err(ProvisioningError::ConnectFailed(format!("{e:#}")));
        }
    };

    match tokio::time::timeout(timeout, wait_for_association(switcher, &mut events)).await {
        Ok(Ok(())) => {
            info!("associated with '{ssid}' @ {bssid}");
            switcher.retain_subscription(events);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("failed to associate with '{ssid}': {e:#}");
            switcher.disconnect();
            Err(ProvisioningError::ConnectFailed(format!("{e:#}")))
        }
        Err(_) => {
            error!("timed out associating with '{ssid}' after {timeout:?}");
            switcher.disconnect();
            Err(ProvisioningError::ConnectTimedOut)
        }
    }
}

async fn wait_for_association<W>(
    switcher: &NetworkSwitcher<W>,
    events: &mut broadcast::Receiver<ConnectivityEvent>,
) -> Result<()>
where
    W: WifiControl,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                if switcher.handle_connectivity_change(&event)? {
                    return Ok(());
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("missed {missed} connectivity notifications");
            }
            Err(RecvError::Closed) => bail!("connectivity notifications closed"),
        }
    }
}
