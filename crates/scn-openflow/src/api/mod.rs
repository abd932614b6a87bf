//! Switch-fleet interface.
//!
//! - [`FlowTableApi`]: what the routing engine needs from the fleet
//! - [`MemoryFlowTable`]: an in-memory fleet for simulation and tests

mod memory;

pub use memory::{FlowOp, MemoryFlowTable};

use crate::error::FlowResult;
use crate::types::{FlowEntry, FlowStatsReply};
use async_trait::async_trait;
use scn_types::Dpid;

/// Flow-table programming on the switch fleet.
///
/// Calls complete once the switch has accepted or rejected the request;
/// a rejection is returned as an error and is never retried here.
#[async_trait]
pub trait FlowTableApi: Send + Sync {
    /// Installs `entry` on switch `dpid`, replacing an entry in the same slot.
    async fn install_entry(&self, dpid: Dpid, entry: &FlowEntry) -> FlowResult<()>;

    /// Removes the entry whose match and priority equal `entry`'s.
    ///
    /// Removing an entry that is not present succeeds.
    async fn remove_entry_strict(&self, dpid: Dpid, entry: &FlowEntry) -> FlowResult<()>;

    /// Reads the counters of every entry on switch `dpid`.
    async fn flow_stats(&self, dpid: Dpid) -> FlowResult<FlowStatsReply>;
}
