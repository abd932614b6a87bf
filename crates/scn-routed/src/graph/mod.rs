//! Bandwidth-weighted link graph and path search.
//!
//! [`GraphBuilder`] turns the live link set, the reservations attributed to
//! each link and the measured usage into a [`LinkGraph`]. Edge cost is the
//! larger of what is promised and what is observed on the link, so searches
//! avoid links that are either busy or committed.

mod builder;
mod dijkstra;

pub use builder::{edge_cost, GraphBuilder};

use crate::topology::LinkKey;
use scn_types::{Dpid, PortNo, PortRef};
use std::collections::BTreeMap;

/// Directed edge between two switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub link: LinkKey,
    pub cost: f64,
}

/// Adjacency map `switch -> {neighbour -> edge}`.
///
/// When two switches are connected by several links only the cheapest one is
/// kept, ties going to the lowest source port.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    adjacency: BTreeMap<Dpid, BTreeMap<Dpid, Edge>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a switch even if it has no outgoing links.
    pub fn add_node(&mut self, dpid: Dpid) {
        self.adjacency.entry(dpid).or_default();
    }

    pub fn insert_edge(&mut self, link: LinkKey, cost: f64) {
        self.add_node(link.dst.dpid);
        let neighbours = self.adjacency.entry(link.src.dpid).or_default();
        let candidate = Edge { link, cost };

        match neighbours.get_mut(&link.dst.dpid) {
            Some(existing) => {
                let better = cost
                    .total_cmp(&existing.cost)
                    .then(link.src.port.cmp(&existing.link.src.port))
                    .is_lt();
                if better {
                    *existing = candidate;
                }
            }
            None => {
                neighbours.insert(link.dst.dpid, candidate);
            }
        }
    }

    pub fn contains(&self, dpid: Dpid) -> bool {
        self.adjacency.contains_key(&dpid)
    }

    pub fn edge(&self, src: Dpid, dst: Dpid) -> Option<&Edge> {
        self.adjacency.get(&src).and_then(|n| n.get(&dst))
    }

    /// Cost of a specific link, if it is the one kept between its switches.
    pub fn link_cost(&self, key: &LinkKey) -> Option<f64> {
        self.edge(key.src.dpid, key.dst.dpid)
            .filter(|e| e.link == *key)
            .map(|e| e.cost)
    }

    pub fn neighbours(&self, dpid: Dpid) -> impl Iterator<Item = &Edge> {
        self.adjacency.get(&dpid).into_iter().flat_map(|n| n.values())
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum()
    }

    /// Sum of edge costs along a via.
    pub fn path_cost(&self, via: &[LinkKey]) -> Option<f64> {
        via.iter().map(|key| self.link_cost(key)).sum()
    }
}

/// Synthetic one-hop via binding two access ports of the same switch.
pub fn local_via(dpid: Dpid, in_port: PortNo, out_port: PortNo) -> LinkKey {
    LinkKey::new(PortRef::new(dpid, in_port), PortRef::new(dpid, out_port))
}
