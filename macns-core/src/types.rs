//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// An IP address together with its network prefix length (`192.168.1.11/24`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Create a new `Cidr` with validation
    ///
    /// # Errors
    /// Returns error if the prefix is longer than the address family allows
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = Self::max_prefix(addr);
        if prefix > max {
            return Err(Error::AddrParse {
                input: format!("{addr}/{prefix}"),
                reason: format!("prefix length must be at most {max}"),
            });
        }
        Ok(Self { addr, prefix })
    }

    // Callers guarantee the prefix fits the address family
    pub(crate) const fn from_parts(addr: IpAddr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// Host route for a single address (`/32` or `/128`)
    #[must_use]
    pub const fn host(addr: IpAddr) -> Self {
        Self {
            addr,
            prefix: Self::max_prefix(addr),
        }
    }

    const fn max_prefix(addr: IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// The address part
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse_err = |reason: &str| Error::AddrParse {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| parse_err("expected <address>/<prefix>"))?;
        let addr: IpAddr = addr.parse().map_err(|_| parse_err("invalid IP address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| parse_err("invalid prefix length"))?;

        Self::new(addr, prefix).map_err(|_| parse_err("prefix length out of range"))
    }
}

impl TryFrom<String> for Cidr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.to_string()
    }
}

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create from raw octets
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> Result<Self> {
        let parse_err = || Error::MacParse {
            input: s.to_string(),
        };

        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.split(sep);

        for octet in &mut octets {
            let part = parts.next().ok_or_else(parse_err)?;
            if part.len() != 2 {
                return Err(parse_err());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| parse_err())?;
        }

        if parts.next().is_some() {
            return Err(parse_err());
        }

        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Optional latency/jitter/loss impairment for the isolated link
///
/// The all-zero profile means "no shaping": no queueing discipline is installed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapingProfile {
    /// Added one-way delay
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    /// Delay variation
    #[serde(with = "duration_millis")]
    pub jitter: Duration,
    /// Packet loss in percent (fractional)
    pub loss: f32,
}

impl ShapingProfile {
    /// Create a profile from millisecond values and a loss percentage
    #[must_use]
    pub const fn from_millis(latency_ms: u64, jitter_ms: u64, loss: f32) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            jitter: Duration::from_millis(jitter_ms),
            loss,
        }
    }

    /// True when every field is zero and no qdisc should be installed
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.latency.is_zero() && self.jitter.is_zero() && self.loss == 0.0
    }
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Termination {
    /// Exited on its own with this code
    Exited(i32),
    /// Terminated by this signal without our intervention
    Signaled(i32),
    /// Killed by us after this interrupt signal was received
    Killed(i32),
}

/// Result of running the user command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Process id the child had
    pub pid: i32,
    /// How it ended
    pub termination: Termination,
}

impl ExitInfo {
    /// Shell-style exit code (`128 + signal` for signal deaths)
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.termination {
            Termination::Exited(code) => code,
            Termination::Signaled(sig) | Termination::Killed(sig) => 128 + sig,
        }
    }

    /// Whether the child exited 0 on its own
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.termination, Termination::Exited(0))
    }

    /// Whether we killed the child after an interrupt
    #[must_use]
    pub const fn was_killed(&self) -> bool {
        matches!(self.termination, Termination::Killed(_))
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.termination {
            Termination::Exited(code) => write!(f, "pid {} exited with code {code}", self.pid),
            Termination::Signaled(sig) => {
                write!(f, "pid {} terminated by signal {sig}", self.pid)
            }
            Termination::Killed(sig) => {
                write!(f, "pid {} killed after signal {sig}", self.pid)
            }
        }
    }
}

// Durations travel as integer milliseconds, the unit the CLI accepts
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_cidr_parse() {
        let cidr: Cidr = "192.168.1.11/24".parse().unwrap();
        assert_eq!(cidr.addr(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 11)));
        assert_eq!(cidr.prefix(), 24);
        assert_eq!(cidr.to_string(), "192.168.1.11/24");
    }

    #[test]
    fn test_cidr_rejects_bad_input() {
        assert!("192.168.1.11".parse::<Cidr>().is_err());
        assert!("192.168.1.11/33".parse::<Cidr>().is_err());
        assert!("not-an-ip/24".parse::<Cidr>().is_err());
        assert!("10.0.0.1/abc".parse::<Cidr>().is_err());
        assert!("fd00::1/64".parse::<Cidr>().is_ok());
    }

    #[test]
    fn test_cidr_host() {
        let host = Cidr::host(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(host.to_string(), "10.0.0.1/32");
    }

    #[test]
    fn test_mac_parse() {
        let mac: MacAddress = "02:42:AC:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(mac.to_string(), "02:42:ac:11:00:02");

        let dashed: MacAddress = "02-42-ac-11-00-02".parse().unwrap();
        assert_eq!(mac, dashed);
    }

    #[test]
    fn test_mac_rejects_bad_input() {
        assert!("02:42:ac:11:00".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:02:03".parse::<MacAddress>().is_err());
        assert!("zz:42:ac:11:00:02".parse::<MacAddress>().is_err());
        assert!("2:42:ac:11:00:02".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_shaping_profile_none() {
        assert!(ShapingProfile::default().is_none());
        assert!(!ShapingProfile::from_millis(50, 0, 0.0).is_none());
        assert!(!ShapingProfile::from_millis(0, 0, 0.5).is_none());
    }

    #[test]
    fn test_exit_codes() {
        let exited = ExitInfo {
            pid: 10,
            termination: Termination::Exited(3),
        };
        let killed = ExitInfo {
            pid: 10,
            termination: Termination::Killed(2),
        };

        assert_eq!(exited.exit_code(), 3);
        assert!(!exited.success());
        assert_eq!(killed.exit_code(), 130);
        assert!(killed.was_killed());
    }
}
