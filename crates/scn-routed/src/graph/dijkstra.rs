use super::LinkGraph;
use crate::topology::LinkKey;
use scn_types::Dpid;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

#[derive(Debug, Clone, Copy)]
struct State {
    cost: f64,
    node: Dpid,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

impl Ord for State {
    // Reversed for a min-heap; equal costs pop the lowest dpid first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl LinkGraph {
    /// Cheapest via from `src` to `dst`.
    ///
    /// Returns an empty via when `dst` cannot be reached, when either switch
    /// is missing from the graph, or when `src == dst`. Among equal-cost
    /// paths the one whose nodes settle first (lowest dpid) wins.
    pub fn shortest_path(&self, src: Dpid, dst: Dpid) -> Vec<LinkKey> {
        if src == dst || !self.contains(src) || !self.contains(dst) {
            return Vec::new();
        }

        let mut dist: BTreeMap<Dpid, f64> = BTreeMap::new();
        let mut previous: BTreeMap<Dpid, LinkKey> = BTreeMap::new();
        let mut heap = BinaryHeap::new();

        dist.insert(src, 0.0);
        heap.push(State { cost: 0.0, node: src });

        while let Some(State { cost, node }) = heap.pop() {
            if node == dst {
                return Self::unwind(&previous, src, dst);
            }
            if dist.get(&node).is_some_and(|d| cost > *d) {
                continue;
            }

            for edge in self.neighbours(node) {
                let next = edge.link.dst.dpid;
                let candidate = cost + edge.cost;
                let improves = dist.get(&next).map_or(true, |d| candidate < *d);
                if improves {
                    dist.insert(next, candidate);
                    previous.insert(next, edge.link);
                    heap.push(State {
                        cost: candidate,
                        node: next,
                    });
                }
            }
        }

        Vec::new()
    }

    fn unwind(previous: &BTreeMap<Dpid, LinkKey>, src: Dpid, dst: Dpid) -> Vec<LinkKey> {
        let mut via = Vec::new();
        let mut current = dst;
        while current != src {
            match previous.get(&current) {
                Some(link) => {
                    via.push(*link);
                    current = link.src.dpid;
                }
                None => return Vec::new(),
            }
        }
        via.reverse();
        via
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scn_types::PortRef;

    fn key(a: u64, b: u64) -> LinkKey {
        LinkKey::new(PortRef::new(a, b as u16), PortRef::new(b, a as u16))
    }

    fn graph(edges: &[(u64, u64, f64)]) -> LinkGraph {
        let mut graph = LinkGraph::new();
        for (a, b, cost) in edges {
            graph.insert_edge(key(*a, *b), *cost);
        }
        graph
    }

    #[test]
    fn test_cheapest_path() {
        let g = graph(&[(1, 2, 10.0), (2, 3, 10.0), (1, 3, 50.0)]);
        assert_eq!(g.shortest_path(Dpid(1), Dpid(3)), vec![key(1, 2), key(2, 3)]);
    }

    #[test]
    fn test_unreachable_is_empty() {
        let mut g = graph(&[(1, 2, 1.0)]);
        g.add_node(Dpid(3));
        assert!(g.shortest_path(Dpid(1), Dpid(3)).is_empty());
        assert!(g.shortest_path(Dpid(2), Dpid(1)).is_empty());
        assert!(g.shortest_path(Dpid(1), Dpid(42)).is_empty());
    }

    #[test]
    fn test_same_switch_is_empty() {
        let g = graph(&[(1, 2, 1.0)]);
        assert!(g.shortest_path(Dpid(1), Dpid(1)).is_empty());
    }

    #[test]
    fn test_tie_prefers_lowest_dpid() {
        // 1 -> 3 -> 4 and 1 -> 2 -> 4 both cost 2.
        let g = graph(&[(1, 3, 1.0), (3, 4, 1.0), (1, 2, 1.0), (2, 4, 1.0)]);
        assert_eq!(g.shortest_path(Dpid(1), Dpid(4)), vec![key(1, 2), key(2, 4)]);
    }

    #[test]
    fn test_zero_cost_edges() {
        let g = graph(&[(1, 2, 0.0), (2, 3, 0.0), (1, 3, 0.0)]);
        assert_eq!(g.shortest_path(Dpid(1), Dpid(3)), vec![key(1, 3)]);
    }

    #[test]
    fn test_repeatable() {
        let g = graph(&[(1, 2, 5.0), (1, 3, 5.0), (2, 4, 5.0), (3, 4, 5.0), (4, 5, 1.0)]);
        let first = g.shortest_path(Dpid(1), Dpid(5));
        for _ in 0..10 {
            assert_eq!(g.shortest_path(Dpid(1), Dpid(5)), first);
        }
    }
}
