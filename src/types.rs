use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::PortSet;
use crate::services;

/// Outcome of a single probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Closed,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Open => f.pad("open"),
            PortStatus::Closed => f.pad("closed"),
        }
    }
}

/// One result per requested port.
///
/// `service` is only set for open ports that appear in the service table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub port: u16,
    pub status: PortStatus,
    pub service: Option<String>,
}

impl ScanResult {
    pub fn open(port: u16) -> Self {
        Self {
            port,
            status: PortStatus::Open,
            service: services::lookup(port).map(str::to_string),
        }
    }

    pub fn closed(port: u16) -> Self {
        Self {
            port,
            status: PortStatus::Closed,
            service: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PortStatus::Open
    }
}

/// Everything a single scan needs; consumed by [`crate::scanner::execute`].
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub host: String,
    pub ports: PortSet,
    pub timeout: Duration,
    pub max_workers: usize,
}
