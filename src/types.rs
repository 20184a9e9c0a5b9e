use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Which device family a scan is interested in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    All,
    Antbox,
    Miner,
}

impl ScanMode {
    /// Device type a specific mode asks for; `None` for `All`.
    pub fn wanted(self) -> Option<DeviceType> {
        match self {
            ScanMode::All => None,
            ScanMode::Antbox => Some(DeviceType::Antbox),
            ScanMode::Miner => Some(DeviceType::Miner),
        }
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ScanMode::All),
            "antbox" => Ok(ScanMode::Antbox),
            "miner" => Ok(ScanMode::Miner),
            other => Err(format!("unknown scan mode: {other}")),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanMode::All => "all",
            ScanMode::Antbox => "antbox",
            ScanMode::Miner => "miner",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Completed,
    Stopped,
    Error,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Stopped | ScanState::Error)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Cooling controller recognised from its web page.
    Antbox,
    /// Mining rig, found through the binary API or its web page.
    Miner,
    /// Reachable HTTP service that matched no keyword set.
    Unknown,
    /// Answered ping and nothing else.
    PingOnly,
}

/// Probe that produced the classification.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    BinaryProtocol,
    HttpHeuristic,
    Ping,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    PingOnly,
}

/// Outcome of one ping invocation. Never an error: failures set `success=false`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingResult {
    pub address: Ipv4Addr,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub packet_loss: f64,
    pub ttl: Option<u32>,
    pub error: Option<String>,
    pub platform: String,
}

impl PingResult {
    pub fn failed(address: Ipv4Addr, platform: &str, error: impl Into<String>) -> Self {
        Self {
            address,
            success: false,
            latency_ms: None,
            packet_loss: 100.0,
            ttl: None,
            error: Some(error.into()),
            platform: platform.to_string(),
        }
    }
}

/// One reported device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceResult {
    pub address: Ipv4Addr,
    pub port: u16,
    pub device_type: DeviceType,
    pub detected_by: DetectionMethod,
    pub status: DeviceStatus,
    pub ping: PingResult,
    pub info: BTreeMap<String, String>,
}

/// Parameters of a scan; fixed once the job starts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub mode: ScanMode,
    pub port: u16,
    pub concurrency: usize,
}

/// Live and final state of the controller's current job.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScanStatus {
    pub state: ScanState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub job: Option<ScanJob>,
    pub total_addresses: u64,
    pub scanned_count: u64,
    pub found_count: u64,
    pub antbox_count: u64,
    pub miner_count: u64,
    pub unclassified_count: u64,
    pub offline_count: u64,
    pub progress_percent: u8,
    pub results: Vec<DeviceResult>,
    pub error_message: Option<String>,
}

/// Reply to `start` / `stop` on the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub accepted: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self { accepted: true, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { accepted: false, message: message.into() }
    }
}
