//! Discovery Service Module
//!
//! Consumes the scan event stream, deduplicates devices by address and, for
//! each newly seen device, walks its GATT profile and emits one report.

use crate::domain::models::{AdvertisementEvent, DeviceAddress, ScanEvent};
use crate::domain::report::DiscoveryReport;
use crate::domain::seen::SeenDevices;
use crate::domain::settings::DiscoverySettings;
use crate::infrastructure::bluetooth::enumeration::GattEnumerator;
use crate::infrastructure::bluetooth::radio::RadioStack;
use crate::infrastructure::report_sink::ReportSink;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

/// Outcome of a [`DiscoveryService::run`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySummary {
    /// Distinct addresses seen during the run
    pub devices_seen: usize,
    /// Enumerations still running when the shutdown grace period ran out.
    /// Each one gets an "abandoned at shutdown" entry in the report stream.
    pub abandoned: usize,
}

/// Main service coordinating device discovery
#[derive(Clone)]
pub struct DiscoveryService {
    enumerator: Arc<GattEnumerator>,
    seen: Arc<SeenDevices>,
    // Claimed devices whose report has not been written yet
    pending: Arc<Mutex<BTreeMap<DeviceAddress, AdvertisementEvent>>>,
    sink: Arc<dyn ReportSink>,
    limiter: Arc<Semaphore>,
    settings: DiscoverySettings,
}

impl DiscoveryService {
    pub fn new(
        radio: Arc<dyn RadioStack>,
        sink: Arc<dyn ReportSink>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            enumerator: Arc::new(GattEnumerator::new(radio, settings.enumeration_timeout())),
            seen: Arc::new(SeenDevices::new()),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            sink,
            limiter: Arc::new(Semaphore::new(settings.concurrency_limit())),
            settings,
        }
    }

    /// Handle one advertisement. Returns the spawned enumeration task when
    /// the address was not seen before, `None` for repeats.
    pub fn handle_advertisement(&self, event: AdvertisementEvent) -> Option<JoinHandle<()>> {
        self.discover(event).map(tokio::spawn)
    }

    /// Drive discovery from a scan session until its event stream closes,
    /// then wait for in-flight enumerations within the shutdown grace period.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ScanEvent>) -> DiscoverySummary {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ScanEvent::AdvertisementReceived(advertisement)) => {
                        if let Some(enumeration) = self.discover(advertisement) {
                            tasks.spawn(enumeration);
                        }
                    }
                    Some(ScanEvent::ScanStopped) => {
                        info!("Scan stopped, {} enumeration(s) still running", tasks.len());
                        self.sink.emit("scan stopped");
                    }
                    None => break,
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task_result(result);
                }
            }
        }

        let abandoned = self.drain(tasks).await;
        DiscoverySummary {
            devices_seen: self.seen.len(),
            abandoned,
        }
    }

    /// Echo the advertisement, then claim its address. Only the claiming
    /// caller gets an enumeration future back.
    fn discover(
        &self,
        event: AdvertisementEvent,
    ) -> Option<impl Future<Output = ()> + Send + 'static> {
        if self.settings.echo_advertisements {
            self.sink.emit(&event.to_string());
        }

        if !self.seen.insert_if_absent(event.address) {
            trace!(address = %event.address, "Already seen, skipping enumeration");
            return None;
        }

        info!(
            address = %event.address,
            name = %event.name,
            "New device, enumerating GATT profile"
        );
        self.lock_pending().insert(event.address, event.clone());
        let service = self.clone();
        Some(async move { service.enumerate_and_report(event).await })
    }

    async fn enumerate_and_report(self, event: AdvertisementEvent) {
        let address = event.address;
        let Ok(_permit) = self.limiter.clone().acquire_owned().await else {
            warn!(%address, "Enumeration limiter closed, skipping device");
            self.lock_pending().remove(&address);
            return;
        };

        let mut report =
            DiscoveryReport::new(event).with_descriptions(self.settings.show_descriptions);

        match self.enumerator.enumerate(&mut report).await {
            Ok(()) => debug!(%address, "Enumeration complete"),
            Err(e) => {
                warn!(%address, "Enumeration failed: {}", e);
                report.record_failure(&e);
            }
        }

        // Drain may already have reported this device as abandoned
        if self.lock_pending().remove(&address).is_some() {
            self.sink.emit(&report.to_string());
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) -> usize {
        if tasks.is_empty() {
            return 0;
        }

        info!("Waiting for {} in-flight enumeration(s)", tasks.len());
        let grace = self.settings.shutdown_grace();
        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        })
        .await;

        if finished.is_ok() {
            return 0;
        }

        let abandoned: Vec<AdvertisementEvent> = {
            let mut pending = self.lock_pending();
            std::mem::take(&mut *pending).into_values().collect()
        };
        warn!(
            "Abandoning {} enumeration(s) after {}ms shutdown grace",
            abandoned.len(),
            grace.as_millis()
        );
        tasks.abort_all();

        for advertisement in &abandoned {
            warn!(address = %advertisement.address, "Enumeration abandoned at shutdown");
            let report = DiscoveryReport::abandoned(advertisement.clone());
            self.sink.emit(&report.to_string());
        }
        abandoned.len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<DeviceAddress, AdvertisementEvent>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Enumeration task panicked: {}", e);
        }
    }
}
