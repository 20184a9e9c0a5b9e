#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use fleet_scan_rs::config::ProbeConfig;
use fleet_scan_rs::scanner::Scanner;
use fleet_scan_rs::types::ScanStatus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Probe settings with short deadlines for local stubs.
pub fn fast_config(miner_port: u16) -> ProbeConfig {
    ProbeConfig {
        ping_count: 1,
        ping_wait: Duration::from_secs(1),
        ping_grace: Duration::from_secs(1),
        miner_port,
        miner_connect_timeout: Duration::from_millis(300),
        miner_read_timeout: Duration::from_millis(300),
        http_timeout: Duration::from_millis(500),
        ..ProbeConfig::default()
    }
}

/// A local TCP port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    l.local_addr().unwrap().port()
}

/// Miner API stub: answers every connection with `reply` followed by a null byte.
pub async fn spawn_miner_stub(reply: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.write_all(&[0]).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    addr
}

/// Accepts connections on every loopback address and never answers.
pub async fn spawn_silent_stub() -> SocketAddr {
    let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
        }
    });
    addr
}

/// Minimal HTTP server returning `body` for any request.
pub async fn spawn_http_stub(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    addr
}

/// Sends `head`, then `filler` bytes until the peer hangs up.
pub async fn spawn_endless_stub(head: &'static [u8], filler: u8) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                if sock.write_all(head).await.is_err() {
                    return;
                }
                let block = [filler; 8192];
                while sock.write_all(&block).await.is_ok() {}
            });
        }
    });
    addr
}

/// Poll until the job leaves `scanning`, collecting every snapshot seen.
pub async fn wait_terminal(scanner: &Scanner, max_polls: usize) -> Vec<ScanStatus> {
    let mut seen = Vec::new();
    for _ in 0..max_polls {
        let status = scanner.status().await;
        let done = status.state.is_terminal();
        seen.push(status);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("scan did not reach a terminal state after {max_polls} polls");
}
