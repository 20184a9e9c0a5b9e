use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::types::PingResult;

/// Argument and output conventions of the host's `ping` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Posix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// Fields extracted from the textual output of one ping run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPing {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub packet_loss: f64,
    pub ttl: Option<u32>,
}

struct PingParser {
    platform: Platform,
    replied: fn(&str) -> bool,
    average: Regex,
    reply_time: Regex,
    ttl: Regex,
    loss: Regex,
}

static PARSERS: Lazy<[PingParser; 2]> = Lazy::new(|| {
    [
        PingParser {
            platform: Platform::Windows,
            replied: |out| out.contains("Reply from"),
            average: Regex::new(r"Average = (\d+(?:\.\d+)?)\s*ms").unwrap(),
            reply_time: Regex::new(r"time[=<](\d+(?:\.\d+)?)\s*ms").unwrap(),
            ttl: Regex::new(r"TTL=(\d+)").unwrap(),
            loss: Regex::new(r"(?s)Lost = \d+.*?\((\d+(?:\.\d+)?)% loss\)").unwrap(),
        },
        PingParser {
            platform: Platform::Posix,
            replied: |out| {
                let lower = out.to_lowercase();
                lower.contains("ttl=") || lower.contains("time=")
            },
            average: Regex::new(r"min/avg/max/(?:mdev|stddev) = [\d.]+/([\d.]+)/[\d.]+/[\d.]+")
                .unwrap(),
            reply_time: Regex::new(r"time[=<](\d+(?:\.\d+)?)\s*ms").unwrap(),
            ttl: Regex::new(r"(?i)ttl=(\d+)").unwrap(),
            loss: Regex::new(r"(\d+(?:\.\d+)?)% packet loss").unwrap(),
        },
    ]
});

fn parser_for(platform: Platform) -> &'static PingParser {
    PARSERS
        .iter()
        .find(|p| p.platform == platform)
        .unwrap_or(&PARSERS[1])
}

/// Parse ping output with the pattern set of `platform`.
///
/// Without any reply indicator the run counts as failed with 100% loss, even if
/// a summary line says otherwise. With a reply, loss comes from the summary
/// line and defaults to 0 when it is absent. Latency is the summary average,
/// falling back to the mean of the per-reply times.
pub fn parse_ping_output(output: &str, platform: Platform) -> ParsedPing {
    let parser = parser_for(platform);
    let mut parsed = ParsedPing {
        success: false,
        latency_ms: None,
        packet_loss: 100.0,
        ttl: None,
    };
    if !(parser.replied)(output) {
        return parsed;
    }
    parsed.success = true;

    parsed.latency_ms = capture_f64(&parser.average, output).or_else(|| {
        let times: Vec<f64> = parser
            .reply_time
            .captures_iter(output)
            .filter_map(|c| c.get(1)?.as_str().parse().ok())
            .collect();
        if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        }
    });

    parsed.ttl = parser
        .ttl
        .captures(output)
        .and_then(|c| c.get(1)?.as_str().parse().ok());

    parsed.packet_loss = capture_f64(&parser.loss, output).unwrap_or(0.0);
    parsed
}

fn capture_f64(re: &Regex, s: &str) -> Option<f64> {
    re.captures(s)?.get(1)?.as_str().parse().ok()
}

/// Reachability check through the platform's `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    count: u32,
    wait: Duration,
    deadline: Duration,
    platform: Platform,
}

impl PingProbe {
    pub fn new(cfg: &ProbeConfig) -> Self {
        Self {
            count: cfg.ping_count.max(1),
            wait: cfg.ping_wait,
            deadline: cfg.ping_deadline(),
            platform: Platform::current(),
        }
    }

    pub fn platform_tag(&self) -> &'static str {
        std::env::consts::OS
    }

    /// Command-line arguments for one run against `address`.
    pub fn command_args(&self, address: Ipv4Addr) -> Vec<String> {
        match self.platform {
            Platform::Windows => vec![
                "-n".into(),
                self.count.to_string(),
                "-w".into(),
                self.wait.as_millis().to_string(),
                address.to_string(),
            ],
            Platform::Posix => vec![
                "-c".into(),
                self.count.to_string(),
                "-W".into(),
                self.wait.as_secs().max(1).to_string(),
                address.to_string(),
            ],
        }
    }

    /// Ping `address` once. Spawn failures and timeouts come back as a failed result.
    pub async fn probe(&self, address: Ipv4Addr) -> PingResult {
        let platform = self.platform_tag();
        let mut cmd = Command::new("ping");
        cmd.args(self.command_args(address))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let out = match time::timeout(self.deadline, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                debug!(%address, error = %e, "ping could not be spawned");
                return PingResult::failed(address, platform, format!("ping execution error: {e}"));
            }
            Err(_) => {
                debug!(%address, "ping timed out");
                return PingResult::failed(address, platform, "ping timed out");
            }
        };

        let stdout = String::from_utf8_lossy(&out.stdout);
        let parsed = parse_ping_output(&stdout, self.platform);
        let error = if !out.status.success() && !parsed.success {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Some(if stderr.is_empty() {
                format!("ping failed with {}", out.status)
            } else {
                stderr
            })
        } else {
            None
        };
        debug!(%address, success = parsed.success, latency = ?parsed.latency_ms, "ping finished");

        PingResult {
            address,
            success: parsed.success,
            latency_ms: parsed.latency_ms,
            packet_loss: parsed.packet_loss,
            ttl: parsed.ttl,
            error,
            platform: platform.to_string(),
        }
    }

    /// Ping many addresses with at most `max_concurrent` processes alive.
    ///
    /// Results come back in input order.
    pub async fn probe_many(&self, addresses: &[Ipv4Addr], max_concurrent: usize) -> Vec<PingResult> {
        let sem = Arc::new(Semaphore::new(max_concurrent.clamp(1, 256)));
        let jobs = addresses.iter().map(|&address| {
            let sem = sem.clone();
            async move {
                match sem.acquire_owned().await {
                    Ok(_permit) => self.probe(address).await,
                    Err(_) => PingResult::failed(address, self.platform_tag(), "ping pool closed"),
                }
            }
        });
        join_all(jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "\
PING 192.168.1.10 (192.168.1.10) 56(84) bytes of data.
64 bytes from 192.168.1.10: icmp_seq=1 ttl=64 time=0.412 ms
64 bytes from 192.168.1.10: icmp_seq=2 ttl=64 time=0.388 ms

--- 192.168.1.10 ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 0.388/0.400/0.412/0.012 ms
";

    const LINUX_PARTIAL: &str = "\
PING 10.0.0.7 (10.0.0.7) 56(84) bytes of data.
64 bytes from 10.0.0.7: icmp_seq=2 ttl=63 time=3.10 ms

--- 10.0.0.7 ping statistics ---
2 packets transmitted, 1 received, 50% packet loss, time 1002ms
rtt min/avg/max/mdev = 3.100/3.100/3.100/0.000 ms
";

    const LINUX_DOWN: &str = "\
PING 10.0.0.8 (10.0.0.8) 56(84) bytes of data.

--- 10.0.0.8 ping statistics ---
2 packets transmitted, 0 received, 100% packet loss, time 1030ms
";

    const MACOS_OK: &str = "\
PING 10.1.1.1 (10.1.1.1): 56 data bytes
64 bytes from 10.1.1.1: icmp_seq=0 ttl=255 time=1.913 ms
64 bytes from 10.1.1.1: icmp_seq=1 ttl=255 time=2.087 ms

--- 10.1.1.1 ping statistics ---
2 packets transmitted, 2 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 1.913/2.000/2.087/0.087 ms
";

    const WINDOWS_OK: &str = "\
Pinging 192.168.1.20 with 32 bytes of data:
Reply from 192.168.1.20: bytes=32 time=3ms TTL=128
Reply from 192.168.1.20: bytes=32 time=5ms TTL=128

Ping statistics for 192.168.1.20:
    Packets: Sent = 2, Received = 2, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 3ms, Maximum = 5ms, Average = 4ms
";

    const WINDOWS_TIMEOUT: &str = "\
Pinging 192.168.1.21 with 32 bytes of data:
Request timed out.
Request timed out.

Ping statistics for 192.168.1.21:
    Packets: Sent = 2, Received = 0, Lost = 2 (100% loss),
";

    #[test]
    fn linux_success_uses_summary_average() {
        let p = parse_ping_output(LINUX_OK, Platform::Posix);
        assert!(p.success);
        assert_eq!(p.latency_ms, Some(0.400));
        assert_eq!(p.ttl, Some(64));
        assert_eq!(p.packet_loss, 0.0);
    }

    #[test]
    fn linux_partial_loss_read_from_summary() {
        let p = parse_ping_output(LINUX_PARTIAL, Platform::Posix);
        assert!(p.success);
        assert_eq!(p.packet_loss, 50.0);
        assert_eq!(p.ttl, Some(63));
    }

    #[test]
    fn linux_no_reply_is_failure() {
        let p = parse_ping_output(LINUX_DOWN, Platform::Posix);
        assert!(!p.success);
        assert_eq!(p.packet_loss, 100.0);
        assert_eq!(p.latency_ms, None);
    }

    #[test]
    fn macos_stddev_summary() {
        let p = parse_ping_output(MACOS_OK, Platform::Posix);
        assert!(p.success);
        assert_eq!(p.latency_ms, Some(2.0));
        assert_eq!(p.ttl, Some(255));
        assert_eq!(p.packet_loss, 0.0);
    }

    #[test]
    fn posix_reply_without_summary_assumes_no_loss() {
        let out = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=2.0 ms\n64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=4.0 ms\n";
        let p = parse_ping_output(out, Platform::Posix);
        assert!(p.success);
        assert_eq!(p.packet_loss, 0.0);
        assert_eq!(p.latency_ms, Some(3.0));
    }

    #[test]
    fn windows_success() {
        let p = parse_ping_output(WINDOWS_OK, Platform::Windows);
        assert!(p.success);
        assert_eq!(p.latency_ms, Some(4.0));
        assert_eq!(p.ttl, Some(128));
        assert_eq!(p.packet_loss, 0.0);
    }

    #[test]
    fn windows_timeout_is_failure() {
        let p = parse_ping_output(WINDOWS_TIMEOUT, Platform::Windows);
        assert!(!p.success);
        assert_eq!(p.packet_loss, 100.0);
    }

    #[test]
    fn empty_or_garbage_output() {
        for platform in [Platform::Windows, Platform::Posix] {
            let p = parse_ping_output("", platform);
            assert!(!p.success);
            assert_eq!(p.packet_loss, 100.0);
            let p = parse_ping_output("ping: unknown host\n", platform);
            assert!(!p.success);
        }
    }

    #[test]
    fn args_follow_platform_conventions() {
        let mut probe = PingProbe::new(&ProbeConfig::default());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        probe.platform = Platform::Posix;
        assert_eq!(probe.command_args(ip), ["-c", "2", "-W", "1", "10.0.0.1"]);
        probe.platform = Platform::Windows;
        assert_eq!(probe.command_args(ip), ["-n", "2", "-w", "1000", "10.0.0.1"]);
    }
}
