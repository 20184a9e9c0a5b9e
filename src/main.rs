use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_scan_rs::config::{DEFAULT_CONCURRENCY, DEFAULT_HTTP_PORT};
use fleet_scan_rs::scanner::Scanner;
use fleet_scan_rs::server;
use fleet_scan_rs::types::{ScanMode, ScanStatus};

/// fleet-scan-rs — discover cooling controllers and mining rigs across an IPv4 range.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleet-scan-rs",
    version,
    about = "Discover cooling controllers and mining rigs across an IPv4 range.",
    long_about = None
)]
struct Cli {
    /// First address of the range (e.g., 192.168.0.1).
    #[arg(long)]
    start: Option<String>,

    /// Last address of the range, inclusive. Defaults to --start.
    #[arg(long)]
    end: Option<String>,

    /// Device family to report: all, antbox or miner.
    #[arg(long, default_value = "all")]
    mode: ScanMode,

    /// HTTP port probed for the web UI heuristics.
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Number of concurrent workers.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Write the final status as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON control API on this address instead of scanning once.
    #[arg(long)]
    serve: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_scan_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let scanner = Scanner::new().context("failed to build probes")?;

    if let Some(bind) = cli.serve.as_deref() {
        let srv = scanner.clone();
        let bind = bind.to_string();
        let handle = tokio::spawn(async move { server::spawn_server(&bind, srv).await });
        tokio::select! {
            res = handle => res??,
            _ = tokio::signal::ctrl_c() => {
                let _ = scanner.stop().await;
            }
        }
        return Ok(());
    }

    let Some(start) = cli.start.as_deref() else {
        bail!("either --start or --serve is required");
    };
    let end = cli.end.as_deref().unwrap_or(start);

    println!("fleet-scan-rs configuration:");
    println!("  range        : {} - {}", start, end);
    println!("  mode         : {}", cli.mode);
    println!("  port         : {}", cli.port);
    println!("  concurrency  : {}", cli.concurrency);

    let resp = scanner
        .start(start, end, cli.mode, cli.port, cli.concurrency)
        .await;
    if !resp.accepted {
        bail!("{}", resp.message);
    }

    let stopper = scanner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stopper.stop().await;
        }
    });

    let status = poll_until_done(&scanner).await;
    print_results_table(&status);

    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_status_json(path, &status) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON results to {}", path.display());
        }
    }
    Ok(())
}

async fn poll_until_done(scanner: &Scanner) -> ScanStatus {
    let mut last = u64::MAX;
    loop {
        let status = scanner.status().await;
        if status.state.is_terminal() {
            return status;
        }
        if status.scanned_count != last {
            last = status.scanned_count;
            println!(
                "  progress {:>3}%  scanned {}/{}  found {}",
                status.progress_percent, status.scanned_count, status.total_addresses, status.found_count
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn print_results_table(status: &ScanStatus) {
    let mut ip_w = "address".len();
    let mut info_w = "info".len();
    let rows: Vec<(String, String, String, String)> = status
        .results
        .iter()
        .map(|r| {
            let info = r
                .info
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            (
                r.address.to_string(),
                label(&r.device_type),
                label(&r.status),
                info,
            )
        })
        .collect();
    for (ip, _, _, info) in &rows {
        ip_w = ip_w.max(ip.len());
        info_w = info_w.max(info.len().min(80));
    }
    let type_w = "ping_only".len();
    let status_w = "ping_only".len();

    println!(
        "\nScan {:?}: found {} (antbox {}, miner {}, unclassified {}) of {} scanned",
        status.state,
        status.found_count,
        status.antbox_count,
        status.miner_count,
        status.unclassified_count,
        status.scanned_count
    );
    println!(
        "{:<ip_w$}  {:<type_w$}  {:<status_w$}  {:<info_w$}",
        "address", "type", "status", "info"
    );
    println!(
        "{:-<ip_w$}  {:-<type_w$}  {:-<status_w$}  {:-<info_w$}",
        "", "", "", ""
    );
    for (ip, kind, state, mut info) in rows {
        if info.len() > 80 {
            let cut = (0..=80).rev().find(|&i| info.is_char_boundary(i)).unwrap_or(0);
            info.truncate(cut);
        }
        println!(
            "{:<ip_w$}  {:<type_w$}  {:<status_w$}  {:<info_w$}",
            ip, kind, state, info
        );
    }
}

/// Wire name of a serde enum variant.
fn label<T: serde::Serialize>(v: &T) -> String {
    serde_json::to_value(v)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn write_status_json(path: &std::path::Path, status: &ScanStatus) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, status)?;
    Ok(())
}
