//! Flow-table model and switch-fleet interface.
//!
//! The routing engine never speaks a wire protocol itself. It describes the
//! forwarding state it wants in terms of [`FlowEntry`] values and hands them
//! to an implementation of [`api::FlowTableApi`], which owns the connection
//! to the switches.
//!
//! - [`types`]: matches, actions, entries and flow statistics
//! - [`error`]: device-side status codes and error type
//! - [`api`]: the fleet interface and an in-memory implementation

pub mod api;
pub mod error;
pub mod types;

pub use api::{FlowOp, FlowTableApi, MemoryFlowTable};
pub use error::{FlowError, FlowResult, FlowStatus};
pub use types::{
    FlowAction, FlowEntry, FlowMatch, FlowStats, FlowStatsReply, ETH_TYPE_ARP, ETH_TYPE_IPV4,
    OFP_DEFAULT_PRIORITY,
};
