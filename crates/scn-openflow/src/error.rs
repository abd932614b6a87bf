//! Device error types.
//!
//! Switches answer a rejected flow modification with an error type/code
//! pair. The ones the controller distinguishes are modelled by
//! [`FlowStatus`]; everything else collapses into [`FlowStatus::Failure`].

use scn_types::Dpid;
use std::fmt;
use thiserror::Error;

/// Outcome of a flow-table modification as reported by a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    Success,
    Failure,
    TableFull,
    BadMatch,
    BadAction,
    Overlap,
    Permission,
}

impl FlowStatus {
    pub fn is_success(&self) -> bool {
        *self == FlowStatus::Success
    }

    pub fn into_result(self) -> FlowResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(FlowError::Status { status: self })
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStatus::Success => "OK",
            FlowStatus::Failure => "FLOW_MOD_FAILED",
            FlowStatus::TableFull => "ALL_TABLES_FULL",
            FlowStatus::BadMatch => "BAD_MATCH",
            FlowStatus::BadAction => "BAD_ACTION",
            FlowStatus::Overlap => "OVERLAP",
            FlowStatus::Permission => "EPERM",
        };
        write!(f, "{}", s)
    }
}

/// Error type for flow-table operations.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// The switch rejected the modification.
    #[error("flow modification rejected: {status}")]
    Status { status: FlowStatus },

    /// No connection to the addressed switch.
    #[error("switch {dpid} is not connected")]
    SwitchNotConnected { dpid: Dpid },

    /// The entry cannot be expressed on the device.
    #[error("invalid flow entry: {message}")]
    InvalidEntry { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FlowError {
    pub fn rejected(status: FlowStatus) -> Self {
        FlowError::Status { status }
    }

    pub fn not_connected(dpid: Dpid) -> Self {
        FlowError::SwitchNotConnected { dpid }
    }

    pub fn invalid_entry(message: impl Into<String>) -> Self {
        FlowError::InvalidEntry {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FlowError::Internal {
            message: message.into(),
        }
    }

    /// Returns the device status if the switch itself rejected the request.
    pub fn status(&self) -> Option<FlowStatus> {
        match self {
            FlowError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for flow-table operations.
pub type FlowResult<T> = Result<T, FlowError>;
