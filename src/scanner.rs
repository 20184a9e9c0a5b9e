use std::any::Any;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::{ProbeConfig, MAX_CONCURRENCY};
use crate::error::{Result, ScanError};
use crate::evaluate::evaluate;
use crate::iprange::{self, AddressQueue};
use crate::ping::PingProbe;
use crate::types::{
    ControlResponse, DeviceResult, DeviceType, ScanJob, ScanMode, ScanState, ScanStatus,
};

/// Per-address evaluation run by every worker.
pub trait DeviceCheck: Send + Sync {
    fn check(
        &self,
        address: Ipv4Addr,
        mode: ScanMode,
        port: u16,
    ) -> BoxFuture<'_, Option<DeviceResult>>;
}

/// Ping, then the protocol classifier, then the verdict.
#[derive(Debug)]
pub struct NetworkCheck {
    ping: PingProbe,
    classifier: Classifier,
}

impl NetworkCheck {
    pub fn new(cfg: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            ping: PingProbe::new(cfg),
            classifier: Classifier::new(cfg)?,
        })
    }
}

impl DeviceCheck for NetworkCheck {
    fn check(
        &self,
        address: Ipv4Addr,
        mode: ScanMode,
        port: u16,
    ) -> BoxFuture<'_, Option<DeviceResult>> {
        async move {
            let ping = self.ping.probe(address).await;
            let found = self.classifier.classify(address, port).await;
            evaluate(address, port, mode, ping, found)
        }
        .boxed()
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    status: ScanStatus,
    cancel: Option<CancellationToken>,
}

/// Owns the single scan job of a process and its status record.
///
/// Cloning is cheap and every clone drives the same job, so one instance can
/// be handed to any number of callers. At most one job scans at a time;
/// workers and pollers meet on a single mutex around the status.
#[derive(Clone)]
pub struct Scanner {
    state: Arc<Mutex<ControllerState>>,
    checker: Arc<dyn DeviceCheck>,
    ping: PingProbe,
}

impl Scanner {
    pub fn new() -> Result<Self> {
        Self::with_config(ProbeConfig::default())
    }

    pub fn with_config(cfg: ProbeConfig) -> Result<Self> {
        let checker = NetworkCheck::new(&cfg)?;
        Ok(Self::with_checker(&cfg, Arc::new(checker)))
    }

    /// Controller whose workers evaluate addresses with `checker`.
    pub fn with_checker(cfg: &ProbeConfig, checker: Arc<dyn DeviceCheck>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState::default())),
            checker,
            ping: PingProbe::new(cfg),
        }
    }

    pub fn ping_probe(&self) -> &PingProbe {
        &self.ping
    }

    /// Start a background scan; returns immediately.
    pub async fn start(
        &self,
        start_ip: &str,
        end_ip: &str,
        mode: ScanMode,
        port: u16,
        concurrency: usize,
    ) -> ControlResponse {
        match self.try_start(start_ip, end_ip, mode, port, concurrency).await {
            Ok(_) => ControlResponse::accepted("Scan started"),
            Err(e) => ControlResponse::rejected(e.to_string()),
        }
    }

    /// Like [`Scanner::start`] but with the typed rejection. Returns the address count.
    ///
    /// An invalid range replaces the previous status with one in `error`; a
    /// running job is left untouched.
    pub async fn try_start(
        &self,
        start_ip: &str,
        end_ip: &str,
        mode: ScanMode,
        port: u16,
        concurrency: usize,
    ) -> Result<u64> {
        let mut st = self.state.lock().await;
        if st.status.state == ScanState::Scanning {
            return Err(ScanError::AlreadyRunning);
        }

        let now = OffsetDateTime::now_utc();
        let (start, end) = match iprange::parse_range(start_ip, end_ip) {
            Ok(range) => range,
            Err(e) => {
                warn!(start_ip, end_ip, error = %e, "scan rejected");
                st.cancel = None;
                st.status = ScanStatus {
                    state: ScanState::Error,
                    start_time: Some(now),
                    end_time: Some(now),
                    error_message: Some(e.to_string()),
                    ..ScanStatus::default()
                };
                return Err(e);
            }
        };

        let total = iprange::range_len(start, end);
        let workers = worker_count(concurrency, total);
        let job = ScanJob { start, end, mode, port, concurrency: workers };
        let cancel = CancellationToken::new();

        st.status = ScanStatus {
            state: ScanState::Scanning,
            start_time: Some(now),
            job: Some(job.clone()),
            total_addresses: total,
            ..ScanStatus::default()
        };
        st.cancel = Some(cancel.clone());
        drop(st);

        info!(%start, %end, %mode, port, workers, total, "scan started");
        tokio::spawn(run_job(self.state.clone(), self.checker.clone(), job, cancel));
        Ok(total)
    }

    /// Ask the running job to stop. Workers finish their current address first.
    pub async fn stop(&self) -> ControlResponse {
        match self.try_stop().await {
            Ok(()) => ControlResponse::accepted("Stopping scan"),
            Err(e) => ControlResponse::rejected(e.to_string()),
        }
    }

    pub async fn try_stop(&self) -> Result<()> {
        let st = self.state.lock().await;
        match (&st.status.state, &st.cancel) {
            (ScanState::Scanning, Some(cancel)) => {
                cancel.cancel();
                info!("scan stop requested");
                Ok(())
            }
            _ => Err(ScanError::NoActiveJob),
        }
    }

    /// Snapshot of the current status.
    pub async fn status(&self) -> ScanStatus {
        self.state.lock().await.status.clone()
    }

    /// Run all probes against one address and apply the mode filter.
    pub async fn check_device(
        &self,
        address: Ipv4Addr,
        mode: ScanMode,
        port: u16,
    ) -> Option<DeviceResult> {
        self.checker.check(address, mode, port).await
    }
}

/// Pool size: at least one, at most one per address and never above `MAX_CONCURRENCY`.
fn worker_count(requested: usize, total: u64) -> usize {
    let per_address = usize::try_from(total).unwrap_or(usize::MAX);
    requested.min(per_address).clamp(1, MAX_CONCURRENCY)
}

/// Supervisor of one job: spawns the pool, waits for it, freezes the status.
async fn run_job(
    state: Arc<Mutex<ControllerState>>,
    checker: Arc<dyn DeviceCheck>,
    job: ScanJob,
    cancel: CancellationToken,
) {
    let queue = Arc::new(AddressQueue::new(job.start, job.end));
    let mut set = JoinSet::new();
    for _ in 0..job.concurrency {
        set.spawn(worker(
            state.clone(),
            checker.clone(),
            queue.clone(),
            job.mode,
            job.port,
            cancel.clone(),
        ));
    }
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "scan worker ended abnormally");
        }
    }

    let mut st = state.lock().await;
    st.status.state = if cancel.is_cancelled() {
        ScanState::Stopped
    } else {
        ScanState::Completed
    };
    st.status.end_time = Some(OffsetDateTime::now_utc());
    st.status.progress_percent = 100;
    st.cancel = None;
    info!(
        state = ?st.status.state,
        scanned = st.status.scanned_count,
        found = st.status.found_count,
        drained = queue.is_drained(),
        "scan finished"
    );
}

async fn worker(
    state: Arc<Mutex<ControllerState>>,
    checker: Arc<dyn DeviceCheck>,
    queue: Arc<AddressQueue>,
    mode: ScanMode,
    port: u16,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let Some(address) = queue.pop() else {
            break;
        };
        let outcome = AssertUnwindSafe(async { checker.check(address, mode, port).await })
            .catch_unwind()
            .await;
        let device = match outcome {
            Ok(device) => device,
            Err(payload) => {
                let err = ScanError::ProbeFailure {
                    address: address.to_string(),
                    reason: panic_reason(payload.as_ref()),
                };
                warn!(error = %err, "counting address as offline");
                None
            }
        };
        debug!(%address, found = device.is_some(), "address scanned");
        record(&state, device).await;
    }
}

async fn record(state: &Mutex<ControllerState>, device: Option<DeviceResult>) {
    let mut st = state.lock().await;
    let s = &mut st.status;
    s.scanned_count += 1;
    match device {
        Some(d) => {
            s.found_count += 1;
            match d.device_type {
                DeviceType::Antbox => s.antbox_count += 1,
                DeviceType::Miner => s.miner_count += 1,
                DeviceType::Unknown | DeviceType::PingOnly => s.unclassified_count += 1,
            }
            s.results.push(d);
        }
        None => s.offline_count += 1,
    }
    s.progress_percent = running_progress(s.scanned_count, s.total_addresses);
}

/// Percentage shown while scanning; 100 is reserved for the terminal transition.
fn running_progress(scanned: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (scanned.saturating_mul(100) / total).min(99) as u8
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}
