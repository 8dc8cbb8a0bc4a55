use std::io::Write;
use std::process::ExitCode;

use portscan_rs::report::{self, JsonReport, ReportContext};
use portscan_rs::types::ScanRequest;
use portscan_rs::{logging, ports, scanner, server, ScanError};

use anyhow::Result;
use clap::Parser;
use time::{format_description::well_known, OffsetDateTime};
use tokio::time::Instant;

/// portscan-rs — Fast async TCP connect port scanner.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portscan-rs",
    version,
    about = "Fast async TCP connect port scanner with service hints.",
    after_help = "Examples:\n  portscan-rs 192.168.1.10\n  portscan-rs scanme.nmap.org -p 20-1024\n  portscan-rs scanme.nmap.org -p 22,80,443 --json\n  portscan-rs example.com -p 1-65535 -w 500 -t 1.0\n\nOnly scan hosts you own or have explicit permission to test."
)]
struct Cli {
    /// Target hostname or IP address to scan.
    #[arg(required_unless_present = "serve")]
    target: Option<String>,

    /// Port specification: single (80), list (22,80,443), range (1-1024) or a mix.
    #[arg(short, long, default_value = ports::DEFAULT_PORT_SPEC)]
    ports: String,

    /// Socket connect timeout in seconds.
    #[arg(short, long, default_value_t = 0.5, allow_negative_numbers = true)]
    timeout: f64,

    /// Max concurrent TCP connect attempts.
    #[arg(short, long, default_value_t = 100, allow_negative_numbers = true)]
    workers: i64,

    /// Print results as JSON instead of a table.
    #[arg(short, long, default_value_t = false)]
    json: bool,

    /// Verbose progress output and debug logging on stderr.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Run the HTTP scan API instead of scanning from the command line.
    #[arg(long, default_value_t = false)]
    serve: bool,

    /// Address for the HTTP scan API.
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.serve {
        "info"
    } else {
        "warn"
    };
    logging::init(level);

    if cli.serve {
        println!("Scan API listening on http://{} (Ctrl+C to stop)", cli.bind);
        return match server::spawn_server(&cli.bind).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("HTTP server error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: An unexpected error occurred: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let target = cli.target.clone().unwrap_or_default();

    let ports = match ports::parse_port_spec(&cli.ports) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("\nUse -h or --help for usage information.");
            return Ok(ExitCode::FAILURE);
        }
    };
    if ports.is_empty() {
        eprintln!("Error: No valid ports to scan.");
        return Ok(ExitCode::FAILURE);
    }

    let timeout = match scanner::timeout_from_secs(cli.timeout) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let workers = match usize::try_from(cli.workers) {
        Ok(w) if w >= 1 => w,
        _ => {
            eprintln!("Error: workers must be at least 1, got {}", cli.workers);
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut resolved = None;
    if cli.verbose && !cli.json {
        match scanner::resolve_host(&target).await {
            Ok(ip) => resolved = Some(ip),
            Err(_) => return Ok(unresolvable(&target)),
        }
        println!("Starting scan of {} ports ({ports})...", ports.len());
    }

    let started_at = now_iso_like();
    let started = Instant::now();
    let request = ScanRequest {
        host: target.clone(),
        ports,
        timeout,
        max_workers: workers,
    };

    let results = tokio::select! {
        res = scanner::execute(request) => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n\nScan interrupted by user.");
            return Ok(ExitCode::from(130));
        }
    };

    let results = match results {
        Ok(r) => r,
        Err(ScanError::HostUnresolvable(_)) => return Ok(unresolvable(&target)),
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let ctx = ReportContext {
        target,
        resolved,
        port_spec: cli.ports.clone(),
        timeout_secs: cli.timeout,
        workers,
        started_at,
        elapsed: started.elapsed(),
    };

    let mut stdout = std::io::stdout().lock();
    if cli.json {
        serde_json::to_writer_pretty(&mut stdout, &JsonReport::new(&ctx, &results))?;
        writeln!(stdout)?;
    } else {
        write!(stdout, "{}", report::render_human(&ctx, &results))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn unresolvable(target: &str) -> ExitCode {
    eprintln!("Error: Cannot resolve hostname '{target}'");
    eprintln!("Please check the hostname or IP address and try again.");
    ExitCode::FAILURE
}

fn now_iso_like() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
