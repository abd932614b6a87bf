//! Bandwidth units.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit in which a telemetry source reports link throughput.
///
/// The routing engine works in bytes per second throughout; link figures are
/// normalised with [`StatUnit::to_bytes_per_sec`] before they are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatUnit {
    #[default]
    Bit,
    Byte,
}

impl StatUnit {
    pub fn to_bytes_per_sec(&self, value: f64) -> f64 {
        match self {
            StatUnit::Bit => value / 8.0,
            StatUnit::Byte => value,
        }
    }

    pub fn from_bytes_per_sec(&self, value: f64) -> f64 {
        match self {
            StatUnit::Bit => value * 8.0,
            StatUnit::Byte => value,
        }
    }
}

impl fmt::Display for StatUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatUnit::Bit => write!(f, "bit"),
            StatUnit::Byte => write!(f, "byte"),
        }
    }
}

impl FromStr for StatUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bit" | "bits" => Ok(StatUnit::Bit),
            "byte" | "bytes" => Ok(StatUnit::Byte),
            _ => Err(ParseError::InvalidStatUnit(s.to_string())),
        }
    }
}

/// Formats a bytes-per-second figure with a decimal unit prefix.
///
/// ```
/// use scn_types::HumanRate;
///
/// assert_eq!(HumanRate(2_500.0).to_string(), "2.500 KB/s");
/// assert_eq!(HumanRate(12.0).to_string(), "12.000 B/s");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumanRate(pub f64);

impl fmt::Display for HumanRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bw = self.0;
        if bw > 1e3 && bw < 1e6 {
            write!(f, "{:.3} KB/s", bw / 1e3)
        } else if bw > 1e6 && bw < 1e9 {
            write!(f, "{:.3} MB/s", bw / 1e6)
        } else {
            write!(f, "{:.3} B/s", bw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bit_conversion() {
        assert_eq!(StatUnit::Bit.to_bytes_per_sec(800.0), 100.0);
        assert_eq!(StatUnit::Byte.to_bytes_per_sec(800.0), 800.0);
        assert_eq!(StatUnit::Bit.from_bytes_per_sec(100.0), 800.0);
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!("bit".parse::<StatUnit>().unwrap(), StatUnit::Bit);
        assert_eq!("Bytes".parse::<StatUnit>().unwrap(), StatUnit::Byte);
        assert!("octet".parse::<StatUnit>().is_err());
    }

    #[test]
    fn test_human_rate() {
        assert_eq!(HumanRate(3_000_000.0).to_string(), "3.000 MB/s");
        assert_eq!(HumanRate(5e9).to_string(), "5000000000.000 B/s");
    }
}
