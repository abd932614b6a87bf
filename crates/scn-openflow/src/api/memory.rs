//! In-memory switch fleet.

use super::FlowTableApi;
use crate::error::{FlowError, FlowResult, FlowStatus};
use crate::types::{FlowEntry, FlowStats, FlowStatsReply};
use async_trait::async_trait;
use log::debug;
use scn_types::Dpid;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A flow-table modification as seen by the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOp {
    Install { dpid: Dpid, entry: FlowEntry },
    Remove { dpid: Dpid, entry: FlowEntry },
}

impl FlowOp {
    pub fn dpid(&self) -> Dpid {
        match self {
            FlowOp::Install { dpid, .. } | FlowOp::Remove { dpid, .. } => *dpid,
        }
    }

    pub fn is_install(&self) -> bool {
        matches!(self, FlowOp::Install { .. })
    }
}

#[derive(Debug, Default)]
struct FleetState {
    tables: BTreeMap<Dpid, Vec<FlowEntry>>,
    ops: Vec<FlowOp>,
    failing: BTreeSet<Dpid>,
    counters: BTreeMap<(Dpid, u64), FlowStats>,
}

/// Flow tables for a simulated fleet.
///
/// Every accepted modification is appended to an operation log so callers
/// can assert exactly which switches were touched. Installs on switches
/// registered with [`MemoryFlowTable::fail_installs_on`] are rejected with
/// [`FlowStatus::TableFull`]. Counters reported by
/// [`FlowTableApi::flow_stats`] are whatever [`MemoryFlowTable::set_counters`]
/// last stored, zero otherwise.
#[derive(Debug, Default)]
pub struct MemoryFlowTable {
    state: Mutex<FleetState>,
}

impl MemoryFlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        // Tables are never left half-written, so poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the entries currently installed on `dpid`.
    pub fn entries(&self, dpid: Dpid) -> Vec<FlowEntry> {
        self.lock().tables.get(&dpid).cloned().unwrap_or_default()
    }

    /// Returns the entries on `dpid` carrying `cookie`.
    pub fn entries_with_cookie(&self, dpid: Dpid, cookie: u64) -> Vec<FlowEntry> {
        self.entries(dpid)
            .into_iter()
            .filter(|e| e.cookie == cookie)
            .collect()
    }

    /// Returns every switch currently holding an entry with `cookie`.
    pub fn switches_with_cookie(&self, cookie: u64) -> BTreeSet<Dpid> {
        self.lock()
            .tables
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.cookie == cookie))
            .map(|(dpid, _)| *dpid)
            .collect()
    }

    /// Total number of installed entries across the fleet.
    pub fn entry_count(&self) -> usize {
        self.lock().tables.values().map(Vec::len).sum()
    }

    /// Returns the operation log.
    pub fn operations(&self) -> Vec<FlowOp> {
        self.lock().ops.clone()
    }

    /// Clears the operation log, leaving the tables untouched.
    pub fn clear_operations(&self) {
        self.lock().ops.clear();
    }

    /// Makes every later install on `dpid` fail.
    pub fn fail_installs_on(&self, dpid: Dpid) {
        self.lock().failing.insert(dpid);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Sets the counters reported for the entries on `dpid` carrying
    /// `stats.cookie`.
    pub fn set_counters(&self, dpid: Dpid, stats: FlowStats) {
        self.lock().counters.insert((dpid, stats.cookie), stats);
    }
}

#[async_trait]
impl FlowTableApi for MemoryFlowTable {
    async fn install_entry(&self, dpid: Dpid, entry: &FlowEntry) -> FlowResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failing.contains(&dpid) {
            return Err(FlowError::rejected(FlowStatus::TableFull));
        }

        let table = state.tables.entry(dpid).or_default();
        table.retain(|e| !e.same_slot(entry));
        table.push(entry.clone());
        state.ops.push(FlowOp::Install {
            dpid,
            entry: entry.clone(),
        });
        debug!("MemoryFlowTable: installed on {}: {}", dpid, entry);
        Ok(())
    }

    async fn remove_entry_strict(&self, dpid: Dpid, entry: &FlowEntry) -> FlowResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let emptied = match state.tables.get_mut(&dpid) {
            Some(table) => {
                table.retain(|e| !e.same_slot(entry));
                table.is_empty()
            }
            None => false,
        };
        if emptied {
            state.tables.remove(&dpid);
        }
        state.ops.push(FlowOp::Remove {
            dpid,
            entry: entry.clone(),
        });
        debug!("MemoryFlowTable: removed from {}: {}", dpid, entry);
        Ok(())
    }

    async fn flow_stats(&self, dpid: Dpid) -> FlowResult<FlowStatsReply> {
        let state = self.lock();
        let cookies: BTreeSet<u64> = state
            .tables
            .get(&dpid)
            .map(|table| table.iter().map(|e| e.cookie).collect())
            .unwrap_or_default();
        let stats = cookies
            .into_iter()
            .map(|cookie| {
                state
                    .counters
                    .get(&(dpid, cookie))
                    .copied()
                    .unwrap_or_else(|| FlowStats::new(cookie, 0, 0, 0))
            })
            .collect();
        Ok(FlowStatsReply { dpid, stats })
    }
}
