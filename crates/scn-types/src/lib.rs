//! Common types for the SCN routing controller.
//!
//! This crate provides the value types shared by the device model, the
//! orchestration layer and the routing engine:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Dpid`], [`PortNo`], [`PortRef`]: switch datapath ids and port endpoints
//! - [`Cookie`]: the non-zero 16-bit route identity shared with the switches
//! - [`StatUnit`], [`HumanRate`]: telemetry units and bandwidth formatting

mod bandwidth;
mod cookie;
mod datapath;
mod mac;

pub use bandwidth::{HumanRate, StatUnit};
pub use cookie::Cookie;
pub use datapath::{Dpid, PortNo, PortRef};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid datapath id: {0}")]
    InvalidDpid(String),

    #[error("invalid port reference: {0} (expected <dpid>:<port>)")]
    InvalidPortRef(String),

    #[error("invalid cookie: {0} (must be 1-65535)")]
    InvalidCookie(u64),

    #[error("invalid stat unit: {0}")]
    InvalidStatUnit(String),
}
