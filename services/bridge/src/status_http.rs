//! Hand-rolled status HTTP server.
//!
//! Provides:
//! - `GET /`        — read-only HTML status page
//! - `GET /healthz` — always 200 OK (process is running)
//! - `GET /readyz`  — 200 once the store is open and both Connection
//!                    Managers have been started; does not require either
//!                    to currently be connected — a reconnect-in-progress
//!                    platform is still a "ready" process.
//!
//! No authentication. The status page is read-only.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::conn::ConnectionManager;

pub struct BridgeStatus {
    pub version: String,
    pub ready: bool,
}

pub struct StatusServer {
    local_addr: std::net::SocketAddr,
}

impl StatusServer {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub async fn start(bind: &str, status: BridgeStatus, conn_a: Arc<dyn ConnectionManager>, conn_b: Arc<dyn ConnectionManager>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        let status = Arc::new(Mutex::new(status));
        tokio::spawn(run_server(listener, status, conn_a, conn_b));
        Ok(StatusServer { local_addr })
    }
}

async fn run_server(listener: TcpListener, status: Arc<Mutex<BridgeStatus>>, conn_a: Arc<dyn ConnectionManager>, conn_b: Arc<dyn ConnectionManager>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let status = status.clone();
                let conn_a = conn_a.clone();
                let conn_b = conn_b.clone();
                tokio::spawn(handle_connection(stream, status, conn_a, conn_b));
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, status: Arc<Mutex<BridgeStatus>>, conn_a: Arc<dyn ConnectionManager>, conn_b: Arc<dyn ConnectionManager>) {
    let mut buf = vec![0u8; 4096];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };

    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        send_response(&mut stream, 400, "text/plain", "Bad Request").await;
        return;
    };
    let Some(first_line) = request.lines().next() else {
        send_response(&mut stream, 400, "text/plain", "Bad Request").await;
        return;
    };
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/healthz") => send_response(&mut stream, 200, "text/plain", "ok").await,
        ("GET", "/readyz") => {
            let ready = status.lock().await.ready;
            if ready {
                send_response(&mut stream, 200, "text/plain", "ready").await;
            } else {
                send_response(&mut stream, 503, "text/plain", "not ready").await;
            }
        }
        ("GET", "/") => {
            let guard = status.lock().await;
            let html = format!(
                "<!DOCTYPE html><html><head><title>Bridge Status</title></head>\
                 <body><h1>Bridge Status</h1>\
                 <p>Version: {}</p>\
                 <p>Readiness: {}</p>\
                 <p>Platform A: {}</p>\
                 <p>Platform B: {}</p>\
                 </body></html>",
                guard.version,
                if guard.ready { "ready" } else { "not-ready" },
                if conn_a.is_connected() { "connected" } else { "disconnected" },
                if conn_b.is_connected() { "connected" } else { "disconnected" },
            );
            send_response(&mut stream, 200, "text/html; charset=utf-8", &html).await;
        }
        _ => send_response(&mut stream, 404, "text/plain", "Not Found").await,
    }
}

async fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
}
