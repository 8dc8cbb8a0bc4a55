use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{PortSpecIssue, Result, ScanError};

/// Port specification used when the caller does not supply one.
pub const DEFAULT_PORT_SPEC: &str = "1-1024";

/// An ordered, duplicate-free set of TCP ports in 1..=65535.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSet(BTreeSet<u16>);

impl PortSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    /// Ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

/// Port 0 is silently dropped so the set never holds an unscannable port.
impl FromIterator<u16> for PortSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().filter(|&p| p != 0).collect())
    }
}

impl FromStr for PortSet {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        parse_port_spec(s)
    }
}

/// Renders the set back into a compact spec, collapsing consecutive runs into ranges.
impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut runs: Vec<(u16, u16)> = Vec::new();
        for p in self.iter() {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == p => *end = p,
                _ => runs.push((p, p)),
            }
        }
        let parts: Vec<String> = runs
            .into_iter()
            .map(|(a, b)| if a == b { a.to_string() } else { format!("{a}-{b}") })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Parse a comma-separated port specification into a [`PortSet`].
///
/// Supported tokens:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - whitespace around tokens and around the `-` is ignored
/// - empty tokens (and an empty spec) contribute nothing
///
/// Any other token fails with [`ScanError::InvalidPortSpec`] naming it.
pub fn parse_port_spec(spec: &str) -> Result<PortSet> {
    let mut set = BTreeSet::new();

    for raw in spec.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }

        // Range `start-end`
        if let Some((a, b)) = token.split_once('-') {
            let start = parse_port(a.trim(), token)?;
            let end = parse_port(b.trim(), token)?;
            if start > end {
                return Err(ScanError::port_spec(token, PortSpecIssue::Inverted));
            }
            set.extend(start..=end);
            continue;
        }

        set.insert(parse_port(token, token)?);
    }

    Ok(PortSet(set))
}

fn parse_port(s: &str, token: &str) -> Result<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ScanError::port_spec(token, PortSpecIssue::Malformed));
    }
    // All digits: anything that does not fit is simply too large.
    match s.parse::<u32>() {
        Ok(v) if (1..=65535).contains(&v) => Ok(v as u16),
        _ => Err(ScanError::port_spec(token, PortSpecIssue::OutOfRange)),
    }
}
