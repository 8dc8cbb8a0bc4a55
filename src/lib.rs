//! Library crate for portscan-rs exposing reusable modules.
pub mod error;
pub mod logging;
pub mod ports;
pub mod report;
pub mod scanner;
pub mod server;
pub mod services;
pub mod types;

pub use error::{PortSpecIssue, ScanError};
pub use ports::{parse_port_spec, PortSet};
pub use scanner::{scan, scan_with, Prober, TcpProber};
pub use types::{PortStatus, ScanRequest, ScanResult};
