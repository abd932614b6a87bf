//! Route cookie.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU16;

/// Identity of a route, stamped on every flow entry the route installs.
///
/// Valid cookies are `1..=65535`; zero is reserved for entries the routing
/// engine does not own, so it is unrepresentable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Cookie(NonZeroU16);

impl Cookie {
    pub const MIN: Cookie = Cookie(NonZeroU16::MIN);
    pub const MAX: Cookie = Cookie(NonZeroU16::MAX);

    /// Number of distinct cookies.
    pub const SPACE: usize = u16::MAX as usize;

    /// Creates a cookie, returning `None` for zero.
    pub const fn new(value: u16) -> Option<Self> {
        match NonZeroU16::new(value) {
            Some(v) => Some(Cookie(v)),
            None => None,
        }
    }

    pub const fn get(&self) -> u16 {
        self.0.get()
    }

    /// Returns the following cookie, wrapping from 65535 back to 1.
    pub fn next_wrapping(&self) -> Cookie {
        match self.0.checked_add(1) {
            Some(v) => Cookie(v),
            None => Cookie::MIN,
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for Cookie {
    type Error = ParseError;

    /// Converts a raw flow-entry cookie. Values outside `1..=65535` belong to
    /// other applications and are rejected.
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .ok()
            .and_then(Cookie::new)
            .ok_or(ParseError::InvalidCookie(value))
    }
}

impl From<Cookie> for u64 {
    fn from(cookie: Cookie) -> u64 {
        u64::from(cookie.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_zero_is_rejected() {
        assert!(Cookie::new(0).is_none());
        assert!(Cookie::try_from(0u64).is_err());
        assert!(Cookie::try_from(65536u64).is_err());
    }

    #[test]
    fn test_next_wraps_past_zero() {
        assert_eq!(Cookie::MAX.next_wrapping(), Cookie::MIN);
        assert_eq!(Cookie::MIN.next_wrapping().get(), 2);
    }

    #[test]
    fn test_raw_roundtrip() {
        let cookie = Cookie::try_from(513u64).unwrap();
        assert_eq!(u64::from(cookie), 513);
        assert_eq!(cookie.to_string(), "513");
    }
}
