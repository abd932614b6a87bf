//! Per-switch flow entries for a via.

use super::types::{Endpoints, PathDescriptor};
use crate::config::RouteStoreConfig;
use crate::topology::LinkKey;
use scn_openflow::{FlowAction, FlowEntry};
use scn_types::{Dpid, PortNo};
use std::collections::BTreeMap;

/// Builds one entry per switch on `via` plus the egress switch.
///
/// Transit entries match the port the flow enters the switch through and
/// output on the next link. The egress entry rewrites the destination MAC
/// and outputs on the access port. A local via yields only the egress entry.
pub fn build_entries(
    descriptor: &PathDescriptor,
    endpoints: &Endpoints,
    via: &[LinkKey],
    config: &RouteStoreConfig,
) -> BTreeMap<Dpid, FlowEntry> {
    let base = descriptor.to_match();
    let entry = |in_port: Option<PortNo>, actions: Vec<FlowAction>| {
        FlowEntry::new(base.clone().with_in_port(in_port), actions)
            .with_priority(config.flow_priority)
            .with_timeouts(config.idle_timeout, config.hard_timeout)
    };
    let egress_actions = vec![
        FlowAction::SetDlDst(endpoints.dst_mac),
        FlowAction::Output(endpoints.dst.port),
    ];

    let mut entries = BTreeMap::new();

    if let [hop] = via {
        if hop.is_local() {
            entries.insert(hop.src.dpid, entry(Some(hop.src.port), egress_actions));
            return entries;
        }
    }

    let mut in_port = endpoints.in_port;
    for link in via {
        entries.insert(link.src.dpid, entry(in_port, vec![FlowAction::Output(link.src.port)]));
        in_port = Some(link.dst.port);
    }
    entries.insert(endpoints.dst.dpid, entry(in_port, egress_actions));

    entries
}
