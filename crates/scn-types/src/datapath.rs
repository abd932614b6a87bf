//! Switch datapath identifiers and port endpoints.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OpenFlow datapath id of a switch.
///
/// Displayed in the dash-separated form used by switch management tools
/// (`00-00-00-00-00-01`); parses either that form or a plain decimal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dpid(pub u64);

impl Dpid {
    pub const fn new(value: u64) -> Self {
        Dpid(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        // The upper two bytes are implementation-defined and usually zero.
        if bytes[0] != 0 || bytes[1] != 0 {
            write!(f, "{:02x}{:02x}|", bytes[0], bytes[1])?;
        }
        write!(
            f,
            "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
            bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
        )
    }
}

impl FromStr for Dpid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidDpid(s.to_string());

        if !s.contains('-') {
            return s.parse::<u64>().map(Dpid).map_err(|_| invalid());
        }

        let (prefix, body) = match s.split_once('|') {
            Some((p, b)) => (u64::from_str_radix(p, 16).map_err(|_| invalid())?, b),
            None => (0, s),
        };
        let hex: String = body.split('-').collect();
        if hex.len() != 12 {
            return Err(invalid());
        }
        let low = u64::from_str_radix(&hex, 16).map_err(|_| invalid())?;
        Ok(Dpid((prefix << 48) | low))
    }
}

impl From<u64> for Dpid {
    fn from(value: u64) -> Self {
        Dpid(value)
    }
}

/// Switch port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNo(pub u16);

impl PortNo {
    /// Highest number usable for a physical port; values above are reserved.
    pub const MAX: PortNo = PortNo(0xff00);

    pub const fn new(value: u16) -> Self {
        PortNo(value)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_physical(&self) -> bool {
        self.0 != 0 && self.0 <= Self::MAX.0
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PortNo {
    fn from(value: u16) -> Self {
        PortNo(value)
    }
}

/// A (switch, port) endpoint: one end of a link or a host attachment point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub dpid: Dpid,
    pub port: PortNo,
}

impl PortRef {
    pub fn new(dpid: impl Into<Dpid>, port: impl Into<PortNo>) -> Self {
        Self {
            dpid: dpid.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dpid.0, self.port)
    }
}

impl FromStr for PortRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidPortRef(s.to_string());
        let (dpid, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let dpid: Dpid = dpid.parse().map_err(|_| invalid())?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(PortRef::new(dpid, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dpid_display() {
        assert_eq!(Dpid(1).to_string(), "00-00-00-00-00-01");
        assert_eq!(Dpid(0x0001_0000_0000_00ff).to_string(), "0001|00-00-00-00-00-ff");
    }

    #[test]
    fn test_dpid_parse() {
        assert_eq!("42".parse::<Dpid>().unwrap(), Dpid(42));
        assert_eq!("00-00-00-00-01-00".parse::<Dpid>().unwrap(), Dpid(0x100));
        assert_eq!(
            "0001|00-00-00-00-00-ff".parse::<Dpid>().unwrap(),
            Dpid(0x0001_0000_0000_00ff)
        );
        assert!("00-00-01".parse::<Dpid>().is_err());
        assert!("switch".parse::<Dpid>().is_err());
    }

    #[test]
    fn test_port_ref_parse() {
        let port: PortRef = "3:12".parse().unwrap();
        assert_eq!(port, PortRef::new(3, 12));
        assert_eq!(port.to_string(), "3:12");
        assert!("3".parse::<PortRef>().is_err());
    }

    #[test]
    fn test_physical_port() {
        assert!(PortNo(1).is_physical());
        assert!(!PortNo(0).is_physical());
        assert!(!PortNo(0xfffd).is_physical());
    }
}
