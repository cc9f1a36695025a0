use crate::{
    models::Confirmation,
    services::push::{Propagation, PushBus, Subscription},
};
use log::{info, warn};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::oneshot;

/// Waits for the device to confirm it joined the home network
pub struct EventWaiter {
    bus: Arc<PushBus>,
    timeout: Duration,
}

impl EventWaiter {
    pub fn new(bus: Arc<PushBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Start listening for the confirmation of a session
    ///
    /// Registration happens immediately. Payloads arriving before
    /// [`PendingConfirmation::wait`] is polled are not lost.
    pub fn listen(&self, session_id: &str) -> PendingConfirmation {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let expected = session_id.to_string();

        let subscription = self.bus.register(move |payload| {
            if payload.user_session_id.as_deref() != Some(expected.as_str()) {
                return Propagation::Continue;
            }

            let tx = tx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();

            match tx {
                Some(tx) => match tx.send(()) {
                    Ok(()) => Propagation::Consumed,
                    Err(()) => Propagation::Continue,
                },
                None => Propagation::Continue,
            }
        });

        PendingConfirmation {
            session_id: session_id.to_string(),
            timeout: self.timeout,
            confirmed: rx,
            _subscription: subscription,
        }
    }

    /// Wait for the confirmation of a session or the timeout, whichever comes first
    pub async fn wait(&self, session_id: &str) -> Confirmation {
        self.listen(session_id).wait().await
    }
}

pub struct PendingConfirmation {
    session_id: String,
    timeout: Duration,
    confirmed: oneshot::Receiver<()>,
    _subscription: Subscription,
}

impl PendingConfirmation {
    pub async fn wait(self) -> Confirmation {
        match tokio::time::timeout(self.timeout, self.confirmed).await {
            Ok(Ok(())) => {
                info!("session {} confirmed by device", self.session_id);
                Confirmation::Confirmed
            }
            Ok(Err(_)) => {
                warn!("confirmation listener for session {} closed", self.session_id);
                Confirmation::TimedOut
            }
            Err(_) => {
                warn!(
                    "no confirmation for session {} within {:?}",
                    self.session_id, self.timeout
                );
                Confirmation::TimedOut
            }
        }
    }
}
