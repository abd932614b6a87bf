use super::LinkGraph;
use crate::topology::{Link, LinkKey};
use scn_types::Dpid;
use std::collections::BTreeMap;

/// Cost of a link carrying `reserved` promised and `measured` observed
/// bytes/s.
pub fn edge_cost(reserved: f64, measured: f64) -> f64 {
    reserved.max(measured).max(0.0)
}

/// Builds a [`LinkGraph`] from a link snapshot.
///
/// ```ignore
/// let graph = GraphBuilder::new(&links)
///     .switches(&switches)
///     .reservations(&reserved)
///     .force(config.force_route)
///     .build();
/// ```
pub struct GraphBuilder<'a> {
    links: &'a [Link],
    switches: &'a [Dpid],
    reservations: Option<&'a BTreeMap<LinkKey, f64>>,
    usage: Option<&'a BTreeMap<LinkKey, f64>>,
    force: bool,
    headroom: Option<f64>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(links: &'a [Link]) -> Self {
        Self {
            links,
            switches: &[],
            reservations: None,
            usage: None,
            force: false,
            headroom: None,
        }
    }

    /// Switches to include as nodes even when isolated.
    pub fn switches(mut self, switches: &'a [Dpid]) -> Self {
        self.switches = switches;
        self
    }

    /// Sum of reserved bytes/s per link.
    pub fn reservations(mut self, reservations: &'a BTreeMap<LinkKey, f64>) -> Self {
        self.reservations = Some(reservations);
        self
    }

    /// Measured bytes/s per link, replacing the links' own telemetry where
    /// present.
    pub fn usage(mut self, usage: &'a BTreeMap<LinkKey, f64>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Hop-count routing: every edge costs 1.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Drops links that cannot carry `bandwidth` more bytes/s, counting both
    /// measured traffic and reservations against capacity.
    pub fn require_headroom(mut self, bandwidth: f64) -> Self {
        self.headroom = Some(bandwidth);
        self
    }

    fn reserved(&self, key: &LinkKey) -> f64 {
        self.reservations
            .and_then(|r| r.get(key))
            .copied()
            .unwrap_or(0.0)
    }

    fn measured(&self, link: &Link) -> f64 {
        self.usage
            .and_then(|u| u.get(&link.key()))
            .copied()
            .unwrap_or_else(|| link.used_bytes())
    }

    pub fn build(self) -> LinkGraph {
        let mut graph = LinkGraph::new();
        for dpid in self.switches {
            graph.add_node(*dpid);
        }

        for link in self.links {
            let key = link.key();
            if key.is_local() {
                continue;
            }
            let reserved = self.reserved(&key);
            let measured = self.measured(link);

            if let Some(required) = self.headroom {
                let capacity = link.capacity_bytes();
                let free = (capacity - measured).min(capacity - reserved);
                if free < required {
                    continue;
                }
            }

            let cost = if self.force {
                1.0
            } else {
                edge_cost(reserved, measured)
            };
            graph.insert_edge(key, cost);
        }

        graph
    }
}
