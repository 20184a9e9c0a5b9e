use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, ScanError};

/// Expand a start/end pair of IPv4 literals into every address between them, inclusive.
///
/// Ordering follows the unsigned 32-bit value of each address. Fails with
/// `InvalidRange` when either literal does not parse or `start > end`.
pub fn generate_ips(start: &str, end: &str) -> Result<Vec<Ipv4Addr>> {
    let (start, end) = parse_range(start, end)?;
    Ok(expand_range(start, end))
}

/// Parse and order-check a literal range without expanding it.
pub fn parse_range(start: &str, end: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let s = parse_ipv4(start)?;
    let e = parse_ipv4(end)?;
    if u32::from(s) > u32::from(e) {
        return Err(ScanError::InvalidRange(format!(
            "start {s} is greater than end {e}"
        )));
    }
    Ok((s, e))
}

/// Number of addresses in an already validated range.
pub fn range_len(start: Ipv4Addr, end: Ipv4Addr) -> u64 {
    u64::from(u32::from(end)) - u64::from(u32::from(start)) + 1
}

/// Every address from `start` to `end` inclusive.
pub fn expand_range(start: Ipv4Addr, end: Ipv4Addr) -> Vec<Ipv4Addr> {
    (u32::from(start)..=u32::from(end))
        .map(Ipv4Addr::from)
        .collect()
}

/// Shared work queue over a validated range.
///
/// Addresses are handed out in ascending order, each exactly once, without
/// materialising the range. `pop` never blocks.
#[derive(Debug)]
pub struct AddressQueue {
    next: AtomicU64,
    end: u64,
}

impl AddressQueue {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self {
            next: AtomicU64::new(u64::from(u32::from(start))),
            end: u64::from(u32::from(end)),
        }
    }

    pub fn pop(&self) -> Option<Ipv4Addr> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        if n > self.end {
            return None;
        }
        u32::try_from(n).ok().map(Ipv4Addr::from)
    }

    pub fn is_drained(&self) -> bool {
        self.next.load(Ordering::Relaxed) > self.end
    }
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| ScanError::InvalidRange(format!("{s:?}: {e}")))
}
