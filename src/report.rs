use std::fmt::Write as _;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;

use crate::types::ScanResult;

/// What the user asked for, echoed back in both output formats.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub target: String,
    /// Set in verbose mode; printed when it differs from `target`.
    pub resolved: Option<IpAddr>,
    pub port_spec: String,
    pub timeout_secs: f64,
    pub workers: usize,
    pub started_at: String,
    pub elapsed: Duration,
}

/// JSON envelope printed with `--json`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct JsonReport {
    pub target: String,
    pub ports_scanned: String,
    pub timeout: f64,
    pub results: Vec<ScanResult>,
    pub summary: Summary,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub open_ports: usize,
    pub scan_time_seconds: f64,
}

pub fn open_results(results: &[ScanResult]) -> Vec<ScanResult> {
    results.iter().filter(|r| r.is_open()).cloned().collect()
}

/// Round to two decimal places for display.
pub fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 100.0).round() / 100.0
}

impl JsonReport {
    pub fn new(ctx: &ReportContext, results: &[ScanResult]) -> Self {
        let open = open_results(results);
        Self {
            target: ctx.target.clone(),
            ports_scanned: ctx.port_spec.clone(),
            timeout: ctx.timeout_secs,
            summary: Summary {
                open_ports: open.len(),
                scan_time_seconds: round_secs(ctx.elapsed),
            },
            results: open,
        }
    }
}

/// Human-readable report listing only open ports.
pub fn render_human(ctx: &ReportContext, results: &[ScanResult]) -> String {
    let open = open_results(results);
    let mut out = String::new();

    let _ = writeln!(out, "\nportscan-rs - scanning host: {}", ctx.target);
    if let Some(ip) = ctx.resolved.filter(|ip| ip.to_string() != ctx.target) {
        let _ = writeln!(out, "Resolved to: {ip}");
    }
    let _ = writeln!(out, "Started at {}", ctx.started_at);
    let _ = writeln!(
        out,
        "Ports: {} | Timeout: {}s | Workers: {}\n",
        ctx.port_spec, ctx.timeout_secs, ctx.workers
    );

    if open.is_empty() {
        let _ = writeln!(out, "No open ports found.");
    }
    for r in &open {
        let _ = writeln!(
            out,
            "[+] {}/tcp   {:<8} {}",
            r.port,
            r.status,
            r.service.as_deref().unwrap_or("unknown")
        );
    }

    let _ = writeln!(out, "\nScan complete in {:.2} seconds.", ctx.elapsed.as_secs_f64());
    let _ = writeln!(out, "Open ports: {}", open.len());
    out
}
