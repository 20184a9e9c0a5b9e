use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::types::DeviceType;

/// Request written to the miner API; the firmware answers with a JSON document.
pub const SUMMARY_COMMAND: &[u8] = br#"{"command":"summary"}"#;

/// Page keywords of the cooling controller's web UI.
pub const ANTBOX_KEYWORDS: &[&str] = &["antbox", "cooler", "矿机冷却"];

/// Page keywords of web-managed mining rigs.
pub const MINER_KEYWORDS: &[&str] = &["antminer", "whatsminer", "avalon"];

/// Data read from a CGMiner/BMMiner compatible API.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerInfo {
    pub port: u16,
    pub hashrate: Option<String>,
    pub temperature: Option<String>,
}

impl MinerInfo {
    pub fn to_info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("api".to_string(), "CGMiner/BMMiner".to_string());
        info.insert("port".to_string(), self.port.to_string());
        if let Some(h) = &self.hashrate {
            info.insert("hashrate".to_string(), h.clone());
        }
        if let Some(t) = &self.temperature {
            info.insert("temperature".to_string(), t.clone());
        }
        info
    }
}

/// Interpret a raw miner API reply.
///
/// Null terminators are stripped before parsing. A JSON object, array or
/// string counts as a miner; bare numbers, booleans, null and unparseable
/// bytes mean the service is absent.
pub fn parse_summary(raw: &[u8], port: u16) -> Option<MinerInfo> {
    let text = String::from_utf8_lossy(raw).replace('\0', "");
    let parsed: Value = serde_json::from_str(text.trim()).ok()?;
    if !(parsed.is_object() || parsed.is_array() || parsed.is_string()) {
        return None;
    }

    let mut info = MinerInfo { port, hashrate: None, temperature: None };
    let Some(summary) = parsed
        .get("SUMMARY")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
    else {
        return Some(info);
    };

    info.hashrate = if let Some(ghs) = summary.get("GHS av").and_then(Value::as_f64) {
        Some(format!("{ghs:.2} GH/s"))
    } else {
        summary
            .get("MHS av")
            .and_then(Value::as_f64)
            .map(|mhs| format!("{mhs:.2} MH/s"))
    };

    info.temperature = summary
        .get("Temperature")
        .or_else(|| summary.get("Temp"))
        .and_then(value_text)
        .map(|t| format!("{t}°C"));

    Some(info)
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Probe for the mining-rig control API on a raw TCP port.
#[derive(Debug, Clone)]
pub struct MinerProbe {
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_bytes: usize,
}

impl MinerProbe {
    pub fn new(cfg: &ProbeConfig) -> Self {
        Self {
            port: cfg.miner_port,
            connect_timeout: cfg.miner_connect_timeout,
            read_timeout: cfg.miner_read_timeout,
            max_bytes: cfg.miner_max_bytes.max(1),
        }
    }

    /// Ask `address` for a summary. `None` when nothing answers in time or the reply is not JSON.
    pub async fn probe(&self, address: Ipv4Addr) -> Option<MinerInfo> {
        let addr = SocketAddr::from((address, self.port));
        let mut stream = match time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            _ => return None,
        };
        stream.write_all(SUMMARY_COMMAND).await.ok()?;

        let raw = time::timeout(self.read_timeout, self.read_reply(&mut stream))
            .await
            .ok()?;
        let info = parse_summary(&raw, self.port);
        debug!(%address, port = self.port, found = info.is_some(), "miner api probe");
        info
    }

    /// Read until EOF, the byte cap, or the buffer holds a complete JSON document.
    async fn read_reply(&self, stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() >= self.max_bytes {
                        buf.truncate(self.max_bytes);
                        break;
                    }
                    if parse_summary(&buf, self.port).is_some() {
                        break;
                    }
                }
            }
        }
        buf
    }
}

/// Device role guessed from a web page.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMatch {
    pub device_type: DeviceType,
    pub port: u16,
    pub info: BTreeMap<String, String>,
}

/// Sort a page body into antbox, miner or unknown by keyword.
pub fn classify_page(body: &str, port: u16) -> HttpMatch {
    let lower = body.to_lowercase();
    let (device_type, key, value) = if ANTBOX_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (DeviceType::Antbox, "title", "AntBox Cooler System")
    } else if MINER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (DeviceType::Miner, "title", "Web-based Miner")
    } else {
        (DeviceType::Unknown, "status", "HTTP available")
    };
    let mut info = BTreeMap::new();
    info.insert(key.to_string(), value.to_string());
    HttpMatch { device_type, port, info }
}

/// Fetches `/` over plain HTTP and sniffs the body.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpProbe {
    pub fn new(cfg: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self { client, max_bytes: cfg.http_max_bytes.max(1) })
    }

    /// Any response at all, whatever its status, is a reachable HTTP service.
    pub async fn probe(&self, address: Ipv4Addr, port: u16) -> Option<HttpMatch> {
        let url = format!("http://{address}:{port}/");
        let mut resp = self.client.get(&url).send().await.ok()?;

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.ok()? {
            body.extend_from_slice(&chunk);
            if body.len() >= self.max_bytes {
                body.truncate(self.max_bytes);
                break;
            }
        }
        let m = classify_page(&String::from_utf8_lossy(&body), port);
        debug!(%address, port, device_type = ?m.device_type, "http probe");
        Some(m)
    }
}

/// What the two protocol probes found for one address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub miner: Option<MinerInfo>,
    pub http: Option<HttpMatch>,
}

/// Runs the miner API probe first and only falls back to HTTP when it finds nothing.
#[derive(Debug, Clone)]
pub struct Classifier {
    miner: MinerProbe,
    http: HttpProbe,
}

impl Classifier {
    pub fn new(cfg: &ProbeConfig) -> Result<Self> {
        Ok(Self { miner: MinerProbe::new(cfg), http: HttpProbe::new(cfg)? })
    }

    pub async fn classify(&self, address: Ipv4Addr, port: u16) -> Classification {
        if let Some(miner) = self.miner.probe(address).await {
            return Classification { miner: Some(miner), http: None };
        }
        Classification { miner: None, http: self.http.probe(address, port).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_ghs_field() {
        let raw = br#"{"STATUS":[{"STATUS":"S"}],"SUMMARY":[{"GHS av":13500.5,"MHS av":13500500.0,"Temperature":71.5}],"id":1}"#;
        let info = parse_summary(raw, 4028).unwrap();
        assert_eq!(info.hashrate.as_deref(), Some("13500.50 GH/s"));
        assert_eq!(info.temperature.as_deref(), Some("71.5°C"));
    }

    #[test]
    fn summary_falls_back_to_mhs_and_temp() {
        let raw = br#"{"SUMMARY":[{"MHS av":950.5,"Temp":"60"}]}"#;
        let info = parse_summary(raw, 4028).unwrap();
        assert_eq!(info.hashrate.as_deref(), Some("950.50 MH/s"));
        assert_eq!(info.temperature.as_deref(), Some("60°C"));
    }

    #[test]
    fn null_terminated_reply_parses() {
        let mut raw = br#"{"SUMMARY":[{"GHS av":12.5,"Temperature":55}]}"#.to_vec();
        raw.push(0);
        let info = parse_summary(&raw, 4028).unwrap();
        assert_eq!(info.hashrate.as_deref(), Some("12.50 GH/s"));
        assert_eq!(info.temperature.as_deref(), Some("55°C"));
    }

    #[test]
    fn json_without_summary_still_a_miner() {
        let info = parse_summary(br#"{"STATUS":[]}"#, 4028).unwrap();
        assert_eq!(info.hashrate, None);
        assert_eq!(info.to_info().get("api").map(String::as_str), Some("CGMiner/BMMiner"));
    }

    #[test]
    fn garbage_reply_is_absent_service() {
        assert!(parse_summary(b"SSH-2.0-OpenSSH_8.9\r\n", 4028).is_none());
        assert!(parse_summary(b"", 4028).is_none());
        assert!(parse_summary(br#"{"SUMMARY":[{"GHS av":1"#, 4028).is_none());
    }

    #[test]
    fn bare_scalars_are_not_a_miner() {
        let cases: [&[u8]; 5] = [b"0", b"true", b"null", b"42\r\n", b"1\0"];
        for raw in cases {
            assert!(parse_summary(raw, 4028).is_none(), "{:?}", raw);
        }
        assert!(parse_summary(br#"[{"STATUS":"S"}]"#, 4028).is_some());
    }

    #[test]
    fn page_keywords() {
        assert_eq!(classify_page("<title>AntBox Panel</title>", 80).device_type, DeviceType::Antbox);
        assert_eq!(classify_page("<h1>矿机冷却系统</h1>", 80).device_type, DeviceType::Antbox);
        assert_eq!(classify_page("<title>Antminer S19</title>", 80).device_type, DeviceType::Miner);
        assert_eq!(classify_page("WhatsMiner M30", 80).device_type, DeviceType::Miner);
        let m = classify_page("<html>router login</html>", 8080);
        assert_eq!(m.device_type, DeviceType::Unknown);
        assert_eq!(m.port, 8080);
        assert_eq!(m.info.get("status").map(String::as_str), Some("HTTP available"));
    }

    #[test]
    fn cooler_keyword_wins_over_miner_keyword() {
        let m = classify_page("Antminer cooler dashboard", 80);
        assert_eq!(m.device_type, DeviceType::Antbox);
    }
}
