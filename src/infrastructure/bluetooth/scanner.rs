//! BLE Scan Session
//!
//! Owns the start/stop lifecycle of advertisement reception and exposes it
//! as a stream of [`ScanEvent`]s.

use crate::domain::models::{ScanEvent, ScanFilter};
use crate::infrastructure::bluetooth::radio::{RadioError, RadioEvent, RadioStack};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a start waits for a requested stop to be confirmed
const STOP_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// Stop requested, waiting for the radio's stopped notification
    Stopping,
}

/// One discovery pass over the radio
pub struct ScanSession {
    radio: Arc<dyn RadioStack>,
    filter: ScanFilter,
    state: Arc<Mutex<ScanState>>,
    // Serializes start/stop and holds the current scan's forwarder
    lifecycle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    event_sender: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanSession {
    /// Create an idle session and the receiver its events are delivered to
    pub fn new(
        radio: Arc<dyn RadioStack>,
        filter: ScanFilter,
    ) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (event_sender, events) = mpsc::unbounded_channel();
        let session = Self {
            radio,
            filter,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            lifecycle: tokio::sync::Mutex::new(None),
            event_sender,
        };
        (session, events)
    }

    /// Start scanning.
    ///
    /// A call while scanning is a no-op, so the radio never feeds two
    /// subscriptions at once. A call while a stop is pending first waits for
    /// that scan's stopped notification. Radio failures are returned to the
    /// caller and leave the session idle.
    pub async fn start(&self) -> Result<(), RadioError> {
        let mut forwarder = self.lifecycle.lock().await;

        if self.state() == ScanState::Stopping {
            if let Some(handle) = forwarder.take() {
                *forwarder = self.wait_for_stop(handle).await;
            }
        }

        {
            let mut state = lock_state(&self.state);
            if *state != ScanState::Idle {
                warn!("Scan start ignored, session is {:?}", *state);
                return Ok(());
            }
            *state = ScanState::Scanning;
        }

        info!("Starting BLE scan with {:?}", self.filter);
        let (radio_sender, radio_events) = mpsc::unbounded_channel();

        if let Err(e) = self.radio.start_scan(&self.filter, radio_sender).await {
            error!("Failed to start scan: {}", e);
            *lock_state(&self.state) = ScanState::Idle;
            return Err(e);
        }

        *forwarder = Some(tokio::spawn(forward_events(
            radio_events,
            self.state.clone(),
            self.event_sender.clone(),
        )));

        Ok(())
    }

    /// Request the scan to end. [`ScanEvent::ScanStopped`] is delivered once
    /// the radio confirms. Calling this while idle or already stopping does
    /// nothing.
    pub async fn stop(&self) -> Result<(), RadioError> {
        let _forwarder = self.lifecycle.lock().await;

        {
            let mut state = lock_state(&self.state);
            if *state != ScanState::Scanning {
                debug!("Scan stop ignored, session is {:?}", *state);
                return Ok(());
            }
            *state = ScanState::Stopping;
        }

        info!("Stopping BLE scan...");
        if let Err(e) = self.radio.stop_scan().await {
            error!("Failed to stop scan: {}", e);
            let mut state = lock_state(&self.state);
            if *state == ScanState::Stopping {
                *state = ScanState::Scanning;
            }
            return Err(e);
        }

        Ok(())
    }

    pub fn state(&self) -> ScanState {
        *lock_state(&self.state)
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    /// Wait for the stopping scan's forwarder to finish. Returns the handle
    /// when the radio has not confirmed within [`STOP_WAIT`].
    async fn wait_for_stop(&self, mut handle: JoinHandle<()>) -> Option<JoinHandle<()>> {
        debug!("Waiting for the previous scan to stop");
        match tokio::time::timeout(STOP_WAIT, &mut handle).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                error!("Scan event forwarder failed: {}", e);
                *lock_state(&self.state) = ScanState::Idle;
                None
            }
            Err(_) => {
                warn!(
                    "Previous scan not confirmed stopped within {}ms",
                    STOP_WAIT.as_millis()
                );
                Some(handle)
            }
        }
    }
}

fn lock_state(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Relay one scan's radio events to the session consumer. Ends after the
/// scan's stopped notification, or when the radio drops its sender.
async fn forward_events(
    mut radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    state: Arc<Mutex<ScanState>>,
    sender: mpsc::UnboundedSender<ScanEvent>,
) {
    while let Some(event) = radio_events.recv().await {
        match event {
            RadioEvent::Advertisement(advertisement) => {
                if sender
                    .send(ScanEvent::AdvertisementReceived(advertisement))
                    .is_err()
                {
                    debug!("Scan consumer gone, dropping advertisement");
                }
            }
            RadioEvent::Stopped => break,
        }
    }

    // Reached on the radio's stopped notification or when the radio dropped
    // the channel without one; either way this scan is over.
    let was_active = {
        let mut state = lock_state(&state);
        let was_active = *state != ScanState::Idle;
        *state = ScanState::Idle;
        was_active
    };

    if was_active {
        info!("Scan stopped.");
        let _ = sender.send(ScanEvent::ScanStopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdvertisementEvent;
    use crate::infrastructure::bluetooth::simulated::SimulatedRadio;

    fn session(radio: &Arc<SimulatedRadio>) -> (ScanSession, mpsc::UnboundedReceiver<ScanEvent>) {
        ScanSession::new(radio.clone(), ScanFilter::default())
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ScanEvent>) -> Option<ScanEvent> {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .ok()
            .flatten()
    }

    async fn assert_no_event(events: &mut mpsc::UnboundedReceiver<ScanEvent>) {
        let next = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert!(next.is_err(), "unexpected event {:?}", next);
    }

    #[tokio::test]
    async fn test_lifecycle_idle_scanning_idle() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);
        assert_eq!(session.state(), ScanState::Idle);

        session.start().await.unwrap();
        assert!(session.is_scanning());

        radio.advertise(AdvertisementEvent::new(0xAABBCCDDEEFFu64, "Tag", -50));
        session.stop().await.unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            Some(ScanEvent::AdvertisementReceived(ad)) if ad.name == "Tag"
        ));
        assert_eq!(next_event(&mut events).await, Some(ScanEvent::ScanStopped));
        assert_eq!(session.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_start_failure_is_surfaced() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.set_available(false);
        let (session, _events) = session(&radio);

        let result = session.start().await;
        assert!(matches!(result, Err(RadioError::Unavailable(_))));
        assert_eq!(session.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_double_start_single_subscription() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);

        session.start().await.unwrap();
        session.start().await.unwrap();

        radio.advertise(AdvertisementEvent::new(1u64, "", -50));
        session.stop().await.unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            Some(ScanEvent::AdvertisementReceived(_))
        ));
        assert_eq!(next_event(&mut events).await, Some(ScanEvent::ScanStopped));
        assert_no_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_double_stop_single_notification() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);

        session.start().await.unwrap();
        session.stop().await.unwrap();
        session.stop().await.unwrap();

        assert_eq!(next_event(&mut events).await, Some(ScanEvent::ScanStopped));
        assert_no_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);

        session.stop().await.unwrap();
        assert_eq!(session.state(), ScanState::Idle);
        assert_no_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_radio_initiated_stop_and_restart() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);

        session.start().await.unwrap();
        radio.drop_scan();
        assert_eq!(next_event(&mut events).await, Some(ScanEvent::ScanStopped));
        assert_eq!(session.state(), ScanState::Idle);

        session.start().await.unwrap();
        assert!(radio.advertise(AdvertisementEvent::new(2u64, "Again", -40)));
        assert!(matches!(
            next_event(&mut events).await,
            Some(ScanEvent::AdvertisementReceived(ad)) if ad.name == "Again"
        ));
    }

    #[tokio::test]
    async fn test_start_right_after_stop_waits_for_confirmation() {
        let radio = Arc::new(SimulatedRadio::new());
        let (session, mut events) = session(&radio);

        session.start().await.unwrap();
        session.stop().await.unwrap();
        assert_eq!(session.state(), ScanState::Stopping);

        session.start().await.unwrap();
        assert!(session.is_scanning());
        assert!(radio.is_scanning());
        assert_eq!(next_event(&mut events).await, Some(ScanEvent::ScanStopped));

        assert!(radio.advertise(AdvertisementEvent::new(3u64, "Back", -45)));
        assert!(matches!(
            next_event(&mut events).await,
            Some(ScanEvent::AdvertisementReceived(ad)) if ad.name == "Back"
        ));
        assert_no_event(&mut events).await;
    }
}
