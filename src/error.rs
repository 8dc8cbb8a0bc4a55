use std::fmt;

use thiserror::Error;

/// Why a single port-spec token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpecIssue {
    /// Not an integer, or one side of a range is missing.
    Malformed,
    /// Parsed, but outside 1..=65535.
    OutOfRange,
    /// Range whose start is greater than its end.
    Inverted,
}

impl fmt::Display for PortSpecIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpecIssue::Malformed => write!(f, "not a port number or range"),
            PortSpecIssue::OutOfRange => write!(f, "ports must be 1-65535"),
            PortSpecIssue::Inverted => write!(f, "range start must not exceed its end"),
        }
    }
}

/// Errors surfaced by the parser and the scan engine.
///
/// Per-port connection failures are never represented here; they become
/// closed results instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("invalid port specification '{token}': {reason}")]
    InvalidPortSpec { token: String, reason: PortSpecIssue },

    #[error("cannot resolve hostname '{0}'")]
    HostUnresolvable(String),

    #[error("invalid timeout {0}: must be a positive number of seconds")]
    InvalidTimeout(String),
}

impl ScanError {
    pub(crate) fn port_spec(token: &str, reason: PortSpecIssue) -> Self {
        Self::InvalidPortSpec {
            token: token.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
