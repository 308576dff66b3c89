//! # Prometheus Metrics
//!
//! Renders group status in Prometheus text exposition format and serves it,
//! together with a JSON status document, from a small HTTP listener.

use std::fmt::Write;
use std::io::{Read, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::group::GroupStatus;
use crate::types::DupState;

fn help(out: &mut String, name: &str, kind: &str, text: &str) {
    let _ = writeln!(out, "# HELP {name} {text}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Escape a label value for the text exposition format.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Render group status as Prometheus text exposition format.
pub fn render_prometheus(groups: &[GroupStatus]) -> String {
    let mut out = String::with_capacity(1024);
    let names: Vec<String> = groups.iter().map(|g| escape_label(&g.name)).collect();

    // ── Per-group gauges ────────────────────────────────────────

    help(
        &mut out,
        "bandup_group_duplicated",
        "gauge",
        "Whether the group's session is duplicated (1) or single (0).",
    );
    for (g, name) in groups.iter().zip(&names) {
        let v = u8::from(g.state == DupState::Duplicated);
        let _ = writeln!(
            out,
            "bandup_group_duplicated{{group=\"{name}\",role=\"{}\"}} {v}",
            g.role
        );
    }

    help(
        &mut out,
        "bandup_group_duplicated_slaves",
        "gauge",
        "Slave interfaces currently carrying a copy of the session.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_group_duplicated_slaves{{group=\"{name}\"}} {}",
            g.duplicated.len()
        );
    }

    help(
        &mut out,
        "bandup_group_members",
        "gauge",
        "Peers registered on the master interface.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_group_members{{group=\"{name}\"}} {}",
            g.members.len()
        );
    }

    help(
        &mut out,
        "bandup_group_poller_armed",
        "gauge",
        "Whether the traffic poller is running for the group.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_group_poller_armed{{group=\"{name}\"}} {}",
            u8::from(g.poller_armed)
        );
    }

    // ── Per-group counters ──────────────────────────────────────

    help(
        &mut out,
        "bandup_duplications_total",
        "counter",
        "Successful single to duplicated transitions.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_duplications_total{{group=\"{name}\"}} {}",
            g.counters.duplications
        );
    }

    help(
        &mut out,
        "bandup_duplication_failures_total",
        "counter",
        "Duplication attempts that were unwound.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_duplication_failures_total{{group=\"{name}\"}} {}",
            g.counters.duplication_failures
        );
    }

    help(
        &mut out,
        "bandup_dedups_total",
        "counter",
        "Duplicated to single transitions.",
    );
    for (g, name) in groups.iter().zip(&names) {
        let _ = writeln!(
            out,
            "bandup_dedups_total{{group=\"{name}\"}} {}",
            g.counters.dedups
        );
    }

    // ── Aggregates ──────────────────────────────────────────────

    help(&mut out, "bandup_groups_total", "gauge", "Registered groups.");
    let _ = writeln!(out, "bandup_groups_total {}", groups.len());

    let duplicated = groups
        .iter()
        .filter(|g| g.state == DupState::Duplicated)
        .count();
    help(
        &mut out,
        "bandup_groups_duplicated",
        "gauge",
        "Groups currently duplicated.",
    );
    let _ = writeln!(out, "bandup_groups_duplicated {duplicated}");

    out
}

/// A lightweight HTTP server for Prometheus scraping.
///
/// Serves `GET /metrics` (text exposition) and `GET /status` (JSON array of
/// group status) from a shared snapshot kept current by the dispatch runtime.
pub struct MetricsServer {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl MetricsServer {
    /// Start the server. `status` is normally
    /// [`crate::runtime::DispatchRuntime::status_handle`].
    pub fn start(
        bind_addr: SocketAddr,
        status: Arc<Mutex<Vec<GroupStatus>>>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = thread::Builder::new()
            .name("bandup-metrics".into())
            .spawn(move || serve_loop(listener, status, running_clone))
            .map_err(std::io::Error::other)?;

        tracing::info!(addr = %addr, "metrics server listening");
        Ok(MetricsServer {
            running,
            handle: Some(handle),
            addr,
        })
    }

    /// The address the server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(
    listener: TcpListener,
    status: Arc<Mutex<Vec<GroupStatus>>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let snap = status.lock().unwrap_or_else(|e| e.into_inner()).clone();
                handle_connection(stream, &snap);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                tracing::debug!(error = %e, "metrics accept failed");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, groups: &[GroupStatus]) {
    // Accepted sockets inherit non-blocking mode on some platforms.
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    let (content_type, body) = if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4; charset=utf-8", render_prometheus(groups))
    } else if request.starts_with("GET /status") {
        match serde_json::to_string(groups) {
            Ok(body) => ("application/json", body),
            Err(_) => return,
        }
    } else {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let _ = stream.write_all(response.as_bytes());
        return;
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}
