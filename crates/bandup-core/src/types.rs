//! Primitive value types shared across the controller.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Peer Address ───────────────────────────────────────────────────────────

/// 48-bit MAC address of a peer on one band.
///
/// Parsed from `aa:bb:cc:dd:ee:ff` (either case, `:` or `-` separators) and
/// always displayed in lower-case colon form, which is also the membership
/// file line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr([u8; 6]);

impl PeerAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        PeerAddr(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

/// Error returned when a string is not a valid MAC address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer address: {0:?}")]
pub struct ParsePeerAddrError(pub String);

impl FromStr for PeerAddr {
    type Err = ParsePeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut octets = [0u8; 6];
        let mut parts = trimmed.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParsePeerAddrError(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParsePeerAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParsePeerAddrError(s.to_string()));
        }
        Ok(PeerAddr(octets))
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = ParsePeerAddrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

// ─── Role ───────────────────────────────────────────────────────────────────

/// Role the local device plays on the master band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Client of a remote AP: duplication waits for high traffic.
    #[default]
    Station,
    /// Access point: a connecting peer is duplicated immediately.
    #[serde(alias = "ap")]
    AccessPoint,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Station => "station",
            Role::AccessPoint => "ap",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Sensitivity ────────────────────────────────────────────────────────────

/// Coarse traffic-poller sensitivity knob.
///
/// | Level  | Poll interval | EWMA alpha |
/// |--------|---------------|------------|
/// | Low    | 2000 ms       | 0.1        |
/// | Medium | 1000 ms       | 0.3        |
/// | High   | 500 ms        | 0.5        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SensitivityLevel {
    pub fn poll_interval(&self) -> Duration {
        match self {
            SensitivityLevel::Low => Duration::from_millis(2000),
            SensitivityLevel::Medium => Duration::from_millis(1000),
            SensitivityLevel::High => Duration::from_millis(500),
        }
    }

    pub fn poll_alpha(&self) -> f64 {
        match self {
            SensitivityLevel::Low => 0.1,
            SensitivityLevel::Medium => 0.3,
            SensitivityLevel::High => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityLevel::Low => "low",
            SensitivityLevel::Medium => "medium",
            SensitivityLevel::High => "high",
        }
    }
}

impl fmt::Display for SensitivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Duplication State ──────────────────────────────────────────────────────

/// Whether a group's session is carried by the master band alone or
/// replicated onto at least one slave band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DupState {
    #[default]
    Single,
    Duplicated,
}

impl DupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DupState::Single => "single",
            DupState::Duplicated => "duplicated",
        }
    }
}

impl fmt::Display for DupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel number on the target band, when the peer advertised one.
pub type ChannelHint = Option<u8>;
