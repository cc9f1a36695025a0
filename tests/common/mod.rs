#![allow(dead_code)]

use anyhow::{Result, bail};
use device_provisioning::{
    ProvisioningError,
    models::{
        AccessPointRecord, DeviceConfig, NetworkCredentials, NetworkHandle, NetworkProfile,
        ProvisioningSession, SecurityMode,
    },
    services::{
        device::{DeviceConfigurator, ProvisioningRequest},
        network::{ConnectivityEvent, WifiControl},
        push::{Notification, NotificationSink},
        session::SessionStore,
    },
};
use std::{
    sync::{Arc, Mutex},
    thread::ThreadId,
};
use tokio::sync::{broadcast, mpsc};

pub const HOME_HANDLE: NetworkHandle = NetworkHandle(1);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn lamp() -> DeviceConfig {
    DeviceConfig {
        name: "Lamp".to_string(),
        ssid: "TL04-Light-ab12".to_string(),
        bssid: "AA:BB:CC:DD:EE:FF".to_string(),
        model: None,
    }
}

pub fn home_net() -> NetworkCredentials {
    NetworkCredentials {
        ssid: "HomeNet".to_string(),
        password: "secret123".to_string(),
        security: SecurityMode::Wpa,
    }
}

/// Ordered record of what the fakes were asked to do
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

// ============================================================================
// Session store
// ============================================================================

pub struct FakeSessionStore {
    pub journal: Journal,
    pub fail_create: bool,
    deleted_tx: mpsc::UnboundedSender<String>,
}

impl FakeSessionStore {
    pub fn new(journal: Journal) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (deleted_tx, deleted_rx) = mpsc::unbounded_channel();
        (
            Self {
                journal,
                fail_create: false,
                deleted_tx,
            },
            deleted_rx,
        )
    }
}

impl SessionStore for FakeSessionStore {
    async fn create(&self) -> Result<ProvisioningSession> {
        self.journal.record("session.create");
        if self.fail_create {
            bail!("backend unreachable");
        }
        Ok(ProvisioningSession {
            token: "r:lamp-token".to_string(),
            id: "session-lamp".to_string(),
        })
    }

    async fn delete(&self, session: &ProvisioningSession) -> Result<()> {
        self.journal.record("session.delete");
        let _ = self.deleted_tx.send(session.id.clone());
        Ok(())
    }
}

// ============================================================================
// Wi-Fi
// ============================================================================

struct WifiState {
    current: AccessPointRecord,
    profiles: Vec<(NetworkHandle, NetworkProfile)>,
    enabled: Option<NetworkHandle>,
    next_handle: i32,
}

/// Wi-Fi stack that joins whichever profile was enabled last
pub struct FakeWifi {
    pub journal: Journal,
    /// Access points that are in range
    pub reachable: Mutex<Vec<String>>,
    events: broadcast::Sender<ConnectivityEvent>,
    state: Mutex<WifiState>,
}

impl FakeWifi {
    pub fn new(journal: Journal) -> Self {
        let (events, _) = broadcast::channel(16);
        let home = AccessPointRecord {
            ssid: "\"HomeNet\"".to_string(),
            bssid: Some("11:22:33:44:55:66".to_string()),
            handle: HOME_HANDLE,
        };
        let home_profile = NetworkProfile {
            ssid: "HomeNet".to_string(),
            bssid: home.bssid.clone(),
            priority: 3,
            open: false,
        };

        Self {
            journal,
            reachable: Mutex::new(vec![
                "11:22:33:44:55:66".to_string(),
                "AA:BB:CC:DD:EE:FF".to_string(),
            ]),
            events,
            state: Mutex::new(WifiState {
                current: home,
                profiles: vec![(HOME_HANDLE, home_profile)],
                enabled: Some(HOME_HANDLE),
                next_handle: 10,
            }),
        }
    }

    /// Device access point is switched off
    pub fn out_of_range(self) -> Self {
        self.reachable
            .lock()
            .unwrap()
            .retain(|bssid| bssid != "AA:BB:CC:DD:EE:FF");
        self
    }

    pub fn current_ssid(&self) -> String {
        self.state.lock().unwrap().current.ssid.clone()
    }

    pub fn profile_count(&self) -> usize {
        self.state.lock().unwrap().profiles.len()
    }

    pub fn priorities(&self) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .iter()
            .map(|(_, p)| p.priority)
            .collect()
    }
}

impl WifiControl for FakeWifi {
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    fn connection_info(&self) -> Result<AccessPointRecord> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    fn configured_networks(&self) -> Result<Vec<NetworkProfile>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .profiles
            .iter()
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn add_network(&self, profile: &NetworkProfile) -> Result<NetworkHandle> {
        let mut state = self.state.lock().unwrap();
        let handle = NetworkHandle(state.next_handle);
        state.next_handle += 1;
        state.profiles.push((handle, profile.clone()));
        self.journal.record(format!("wifi.add {}", profile.ssid));
        Ok(handle)
    }

    fn remove_network(&self, handle: NetworkHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.profiles.iter().position(|(h, _)| *h == handle) else {
            bail!("unknown network {handle:?}");
        };
        let (_, profile) = state.profiles.remove(index);
        self.journal.record(format!("wifi.remove {}", profile.ssid));
        Ok(())
    }

    fn enable_network(&self, handle: NetworkHandle, _exclusive: bool) -> Result<()> {
        self.state.lock().unwrap().enabled = Some(handle);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.current = AccessPointRecord {
            ssid: "<unknown ssid>".to_string(),
            bssid: None,
            handle: NetworkHandle::NONE,
        };
        let _ = self.events.send(ConnectivityEvent::StateChanged {
            connected: false,
            ssid: None,
            bssid: None,
        });
        Ok(())
    }

    fn reconnect(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(enabled) = state.enabled else {
            return Ok(());
        };
        let Some((_, profile)) = state.profiles.iter().find(|(h, _)| *h == enabled).cloned()
        else {
            return Ok(());
        };
        let Some(bssid) = profile.bssid.clone() else {
            return Ok(());
        };
        if !self.reachable.lock().unwrap().contains(&bssid) {
            return Ok(());
        }

        let ssid = format!("\"{}\"", profile.ssid);
        self.journal.record(format!("wifi.joined {}", profile.ssid));
        state.current = AccessPointRecord {
            ssid: ssid.clone(),
            bssid: Some(bssid.clone()),
            handle: enabled,
        };
        let _ = self.events.send(ConnectivityEvent::StateChanged {
            connected: true,
            ssid: Some(ssid),
            bssid: Some(bssid),
        });
        Ok(())
    }

    fn requires_process_binding(&self) -> bool {
        false
    }

    fn request_wifi_network(&self) -> Result<()> {
        bail!("process binding not supported")
    }

    fn release_network_request(&self) -> Result<()> {
        Ok(())
    }

    fn bind_process_to_network(&self, _handle: Option<NetworkHandle>) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Device and notifications
// ============================================================================

#[derive(Clone, Copy)]
pub enum DeviceReply {
    Accept,
    Reject,
    Hang,
}

pub struct FakeConfigurator {
    pub journal: Journal,
    pub reply: DeviceReply,
    pub requests: Mutex<Vec<(ThreadId, Vec<(&'static str, String)>)>>,
}

impl FakeConfigurator {
    pub fn new(journal: Journal, reply: DeviceReply) -> Self {
        Self {
            journal,
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl DeviceConfigurator for FakeConfigurator {
    fn send(&self, request: &ProvisioningRequest) -> Result<(), ProvisioningError> {
        let thread = std::thread::current().id();
        self.requests
            .lock()
            .unwrap()
            .push((thread, request.form_fields()));
        self.journal.record("device.send");

        match self.reply {
            DeviceReply::Accept => Ok(()),
            DeviceReply::Reject => Err(ProvisioningError::ConfigSendFailed(
                "device rejected config with status 500 Internal Server Error".to_string(),
            )),
            DeviceReply::Hang => Err(ProvisioningError::ConfigSendTimedOut),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}
