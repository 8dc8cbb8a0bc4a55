use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, ScanError};
use crate::ports::PortSet;
use crate::types::{ScanRequest, ScanResult};

/// Upper bound on concurrent probes regardless of what the caller asks for.
pub const MAX_WORKERS: usize = 5_000;

/// Transport used to resolve the target and probe a single `(ip, port)`.
///
/// Any `Err` from `connect` is read as "not open"; implementations do not
/// need to distinguish refusal from timeout.
pub trait Prober: Send + Sync + 'static {
    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Called once per scan, before any `connect`.
    fn resolve(&self, host: &str) -> impl Future<Output = Result<IpAddr>> + Send {
        resolve_host(host)
    }
}

/// Plain TCP connect probe. The stream is dropped as soon as it is established.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            match time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
            }
        }
    }
}

/// Convert a timeout in (fractional) seconds into a `Duration`, rejecting
/// zero, negative and non-finite values.
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ScanError::InvalidTimeout(secs.to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ScanError::InvalidTimeout(secs.to_string()))
}

/// Resolve `host` to a single address, preferring IPv4.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    let addrs: Vec<SocketAddr> = lookup_host((host, 0))
        .await
        .map_err(|_| ScanError::HostUnresolvable(host.to_string()))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(SocketAddr::ip)
        .ok_or_else(|| ScanError::HostUnresolvable(host.to_string()))
}

/// Scan `ports` on `host` with plain TCP connects.
///
/// - Resolves the host once; failure aborts with [`ScanError::HostUnresolvable`].
/// - Limits in-flight connects to `max_workers` using a `Semaphore`.
/// - Bounds every connect with `timeout`.
/// - Returns exactly one result per port, ascending by port.
pub async fn scan(
    host: &str,
    ports: &PortSet,
    timeout: Duration,
    max_workers: usize,
) -> Result<Vec<ScanResult>> {
    scan_with(Arc::new(TcpProber), host, ports, timeout, max_workers).await
}

/// Run a scan described by a [`ScanRequest`].
pub async fn execute(request: ScanRequest) -> Result<Vec<ScanResult>> {
    scan(
        &request.host,
        &request.ports,
        request.timeout,
        request.max_workers,
    )
    .await
}

/// Same as [`scan`] but with a caller-supplied transport.
pub async fn scan_with<P: Prober>(
    prober: Arc<P>,
    host: &str,
    ports: &PortSet,
    timeout: Duration,
    max_workers: usize,
) -> Result<Vec<ScanResult>> {
    if timeout.is_zero() {
        return Err(ScanError::InvalidTimeout(format!("{timeout:?}")));
    }

    let ip = prober.resolve(host).await?;
    debug!(%host, %ip, "resolved target");

    if ports.is_empty() {
        return Ok(Vec::new());
    }

    let workers = max_workers.clamp(1, MAX_WORKERS);
    info!(%host, %ports, workers, ?timeout, "starting scan");
    let started = Instant::now();

    let sem = Arc::new(Semaphore::new(workers));
    let mut set = JoinSet::new();

    for port in ports.iter() {
        // Only fails if the semaphore is closed; unscheduled ports are backfilled below.
        let Ok(permit) = sem.clone().acquire_owned().await else {
            break;
        };
        let prober = Arc::clone(&prober);
        set.spawn(async move {
            let _permit = permit; // keep permit until task completes
            let addr = SocketAddr::new(ip, port);
            probe(prober.as_ref(), addr, timeout).await
        });
    }

    let mut results = Vec::with_capacity(ports.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "probe task failed"),
        }
    }

    if results.len() < ports.len() {
        let seen: HashSet<u16> = results.iter().map(|r| r.port).collect();
        results.extend(
            ports
                .iter()
                .filter(|p| !seen.contains(p))
                .map(ScanResult::closed),
        );
    }

    results.sort_unstable_by_key(|r| r.port);

    info!(
        %host,
        open = results.iter().filter(|r| r.is_open()).count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan finished"
    );
    Ok(results)
}

async fn probe<P: Prober>(prober: &P, addr: SocketAddr, timeout: Duration) -> ScanResult {
    match prober.connect(addr, timeout).await {
        Ok(()) => {
            trace!(port = addr.port(), "open");
            ScanResult::open(addr.port())
        }
        Err(e) => {
            trace!(port = addr.port(), error = %e, "closed");
            ScanResult::closed(addr.port())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortStatus;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_millis(200);

    /// Reports ports in `open` as open; everything else fails with `err`.
    struct StubProber {
        open: BTreeSet<u16>,
        err: io::ErrorKind,
    }

    impl StubProber {
        fn new(open: &[u16], err: io::ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                open: open.iter().copied().collect(),
                err,
            })
        }
    }

    impl Prober for StubProber {
        fn connect(
            &self,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                // Later ports finish first so completion order differs from port order.
                time::sleep(Duration::from_micros(u64::from(1000 - addr.port() % 1000))).await;
                if self.open.contains(&addr.port()) {
                    Ok(())
                } else {
                    Err(io::Error::from(self.err))
                }
            }
        }
    }

    /// Counts how many connects are in flight at once.
    #[derive(Default)]
    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Prober for CountingProber {
        fn connect(
            &self,
            _addr: SocketAddr,
            _timeout: Duration,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        }
    }

    /// Panics on one port to simulate an unexpected internal failure.
    struct PanickingProber {
        bad: u16,
    }

    impl Prober for PanickingProber {
        fn connect(
            &self,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                if addr.port() == self.bad {
                    panic!("probe blew up");
                }
                Ok(())
            }
        }
    }

    fn set(ports: &[u16]) -> PortSet {
        ports.iter().copied().collect()
    }

    #[tokio::test]
    async fn open_ports_get_service_names() {
        let prober = StubProber::new(&[22, 443], io::ErrorKind::ConnectionRefused);
        let results = scan_with(prober, "127.0.0.1", &set(&[22, 80, 443]), TIMEOUT, 10)
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                ScanResult::open(22),
                ScanResult::closed(80),
                ScanResult::open(443),
            ]
        );
        assert_eq!(results[0].service.as_deref(), Some("ssh"));
    }

    #[tokio::test]
    async fn every_failure_mode_reads_as_closed() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut,
            io::ErrorKind::AddrNotAvailable,
            io::ErrorKind::Other,
        ] {
            let prober = StubProber::new(&[], kind);
            let results = scan_with(prober, "127.0.0.1", &set(&[80]), TIMEOUT, 1)
                .await
                .unwrap();
            assert_eq!(results, vec![ScanResult::closed(80)], "{kind:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_result_per_port_sorted() {
        let ports: PortSet = (900..=1100).collect();
        let prober = StubProber::new(&[1000, 1080, 950], io::ErrorKind::TimedOut);
        let results = scan_with(prober, "127.0.0.1", &ports, TIMEOUT, 16)
            .await
            .unwrap();
        assert_eq!(results.len(), ports.len());
        assert!(results.windows(2).all(|w| w[0].port < w[1].port));
        let open: Vec<u16> = results.iter().filter(|r| r.is_open()).map(|r| r.port).collect();
        assert_eq!(open, vec![950, 1000, 1080]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn respects_worker_budget() {
        let prober = Arc::new(CountingProber::default());
        let ports: PortSet = (1..=60).collect();
        let results = scan_with(prober.clone(), "127.0.0.1", &ports, TIMEOUT, 4)
            .await
            .unwrap();
        assert_eq!(results.len(), 60);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!((1..=4).contains(&peak), "peak in flight was {peak}");
    }

    #[tokio::test]
    async fn zero_workers_still_scans_sequentially() {
        let prober = Arc::new(CountingProber::default());
        let results = scan_with(prober.clone(), "127.0.0.1", &set(&[1, 2, 3]), TIMEOUT, 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_probe_becomes_closed() {
        let prober = Arc::new(PanickingProber { bad: 80 });
        let results = scan_with(prober, "127.0.0.1", &set(&[22, 80, 443]), TIMEOUT, 3)
            .await
            .unwrap();
        let statuses: Vec<(u16, PortStatus)> = results.iter().map(|r| (r.port, r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (22, PortStatus::Open),
                (80, PortStatus::Closed),
                (443, PortStatus::Open),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_scans_are_identical() {
        let prober = StubProber::new(&[21, 25], io::ErrorKind::ConnectionRefused);
        let ports: PortSet = (20..=30).collect();
        let first = scan_with(prober.clone(), "127.0.0.1", &ports, TIMEOUT, 3)
            .await
            .unwrap();
        let second = scan_with(prober, "127.0.0.1", &ports, TIMEOUT, 3)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_port_set_returns_nothing() {
        let prober = Arc::new(CountingProber::default());
        let results = scan_with(prober.clone(), "127.0.0.1", &PortSet::new(), TIMEOUT, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(prober.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolvable_host_fails_before_probing() {
        let prober = Arc::new(CountingProber::default());
        let err = scan_with(
            prober.clone(),
            "this-host-does-not-exist-12345.invalid",
            &set(&[80]),
            TIMEOUT,
            10,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ScanError::HostUnresolvable("this-host-does-not-exist-12345.invalid".into())
        );
        assert_eq!(prober.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let prober = Arc::new(CountingProber::default());
        let err = scan_with(prober, "127.0.0.1", &set(&[80]), Duration::ZERO, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidTimeout(_)));
    }

    #[test]
    fn timeout_from_secs_validates() {
        assert_eq!(timeout_from_secs(0.5).unwrap(), Duration::from_millis(500));
        assert!(timeout_from_secs(0.0).is_err());
        assert!(timeout_from_secs(-1.0).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
        assert!(timeout_from_secs(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn resolve_prefers_literal_address() {
        let ip = resolve_host("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
    }

    /// Resolves one fixed name offline and connects to the addresses it is given.
    struct FixedHostProber {
        seen: std::sync::Mutex<Vec<SocketAddr>>,
    }

    impl Prober for FixedHostProber {
        fn connect(
            &self,
            addr: SocketAddr,
            _timeout: Duration,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                if let Ok(mut seen) = self.seen.lock() {
                    seen.push(addr);
                }
                Ok(())
            }
        }

        fn resolve(&self, host: &str) -> impl Future<Output = Result<IpAddr>> + Send {
            let host = host.to_string();
            async move {
                if host == "scanner.test" {
                    Ok(IpAddr::from([10, 0, 0, 7]))
                } else {
                    Err(ScanError::HostUnresolvable(host))
                }
            }
        }
    }

    #[tokio::test]
    async fn probes_use_the_resolved_address() {
        let prober = Arc::new(FixedHostProber {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let results = scan_with(prober.clone(), "scanner.test", &set(&[22, 80]), TIMEOUT, 2)
            .await
            .unwrap();
        assert_eq!(results, vec![ScanResult::open(22), ScanResult::open(80)]);

        let mut seen = prober.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                SocketAddr::from(([10, 0, 0, 7], 22)),
                SocketAddr::from(([10, 0, 0, 7], 80)),
            ]
        );

        let err = scan_with(prober, "other.test", &set(&[22]), TIMEOUT, 2)
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::HostUnresolvable("other.test".into()));
    }
}
