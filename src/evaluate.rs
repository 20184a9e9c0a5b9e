//! Turns ping and classifier outcomes into at most one device record per address.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::classify::Classification;
use crate::types::{DetectionMethod, DeviceResult, DeviceStatus, DeviceType, PingResult, ScanMode};

/// Combine the probe results for `address` into a verdict.
///
/// Precedence is fixed: a miner API hit beats any HTTP result, which beats a
/// bare ping reply. Mode filtering:
/// - `antbox` keeps a miner API hit only when ping also answered;
/// - a type mismatch on an HTTP hit is kept, except an unknown HTTP service
///   whose ping failed, which is dropped whenever the mode is not `all`;
/// - offline addresses with nothing classified yield `None`.
pub fn evaluate(
    address: Ipv4Addr,
    port: u16,
    mode: ScanMode,
    ping: PingResult,
    found: Classification,
) -> Option<DeviceResult> {
    let reachable = ping.success;
    let mut info = BTreeMap::new();
    if reachable {
        info.insert(
            "ping".to_string(),
            format!("latency: {:.1}ms", ping.latency_ms.unwrap_or(0.0)),
        );
    }

    if let Some(miner) = found.miner {
        info.extend(miner.to_info());
        let result = DeviceResult {
            address,
            port,
            device_type: DeviceType::Miner,
            detected_by: DetectionMethod::BinaryProtocol,
            status: DeviceStatus::Online,
            ping,
            info,
        };
        if mode == ScanMode::Antbox && !reachable {
            return None;
        }
        return Some(result);
    }

    if let Some(http) = found.http {
        if let Some(wanted) = mode.wanted() {
            if http.device_type != wanted && http.device_type == DeviceType::Unknown && !reachable {
                return None;
            }
        }
        info.extend(http.info);
        return Some(DeviceResult {
            address,
            port: http.port,
            device_type: http.device_type,
            detected_by: DetectionMethod::HttpHeuristic,
            status: DeviceStatus::Online,
            ping,
            info,
        });
    }

    if reachable {
        return Some(DeviceResult {
            address,
            port,
            device_type: DeviceType::PingOnly,
            detected_by: DetectionMethod::Ping,
            status: DeviceStatus::PingOnly,
            ping,
            info,
        });
    }

    None
}
