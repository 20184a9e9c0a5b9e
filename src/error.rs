use thiserror::Error;

/// Failures surfaced by the scan controller and its probes.
///
/// Only `InvalidRange` ever moves a job into the `error` state. `AlreadyRunning`
/// and `NoActiveJob` are rejections with no state change, and `ProbeFailure`
/// is absorbed per address by the worker loop.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid IP range: {0}")]
    InvalidRange(String),

    #[error("Scan already in progress")]
    AlreadyRunning,

    #[error("No active scan")]
    NoActiveJob,

    #[error("Probe failure for {address}: {reason}")]
    ProbeFailure { address: String, reason: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
