//! Reservation and nuisance checks over a cycle's working loads.

use super::loads::LinkLoads;
use crate::flow_bw::FlowBwSnapshot;
use crate::route::{Route, RouteStore};
use crate::topology::LinkKey;
use log::debug;
use std::collections::BTreeMap;

/// Returns the first link of `route` that cannot give it its reservation.
///
/// A route already carrying at least its reservation is respected. Otherwise
/// each link is charged with the traffic of other routes (measured usage
/// minus this route's own flow) or their reservations, whichever is larger,
/// and must leave the reservation free. Links missing from the loads count
/// as failing.
pub fn violating_link(
    route: &Route,
    flow: f64,
    loads: &LinkLoads,
    reserved_by_others: &BTreeMap<LinkKey, f64>,
) -> Option<LinkKey> {
    let required = route.reservation();
    if required <= 0.0 || flow >= required {
        return None;
    }

    for key in route.fabric_links() {
        let Some(load) = loads.get(key) else {
            debug!("Balancing: {} has no telemetry for {}", route.cookie, key);
            return Some(*key);
        };
        let others = (load.used - flow)
            .max(0.0)
            .max(reserved_by_others.get(key).copied().unwrap_or(0.0));
        let headroom = (load.capacity - others).max(0.0);
        if headroom < required {
            debug!(
                "Balancing: {} short on {}: headroom {:.2} < reserved {:.2}",
                route.cookie, key, headroom, required
            );
            return Some(*key);
        }
    }
    None
}

/// Whether moving `route` onto `candidate` would push another reserved
/// route below its reservation.
///
/// For every reserved route `r` sharing a candidate link, the link's
/// capacity minus the traffic not belonging to `r`, after adding the moved
/// flow, must still cover `r`'s reservation. Routes without a flow sample are
/// not judged.
pub fn is_nuisance(
    store: &RouteStore,
    route: &Route,
    candidate: &[LinkKey],
    loads: &LinkLoads,
    flows: &FlowBwSnapshot,
) -> bool {
    let moved = flows.bandwidth(route.cookie).unwrap_or(0.0);

    for key in candidate.iter().filter(|k| !k.is_local()) {
        let Some(load) = loads.get(key) else {
            continue;
        };
        let added = if route.traverses(key) { 0.0 } else { moved };

        for cookie in store.cookies_on(key) {
            if cookie == route.cookie {
                continue;
            }
            let Some(other) = store.route(cookie) else {
                continue;
            };
            let reserved = other.reservation();
            if reserved <= 0.0 {
                continue;
            }
            let Some(other_flow) = flows.bandwidth(cookie) else {
                continue;
            };

            let left = load.capacity - (load.used - other_flow + added);
            if left < reserved {
                debug!(
                    "Balancing: moving {} onto {} would leave {} with {:.2} < {:.2}",
                    route.cookie, key, cookie, left, reserved
                );
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteStoreConfig;
    use crate::route::{PathDescriptor, RouteRequest, RoutingCondition};
    use crate::topology::{Host, StaticTopology, Topology};
    use pretty_assertions::assert_eq;
    use scn_openflow::MemoryFlowTable;
    use scn_types::{Cookie, MacAddress, PortRef, StatUnit};
    use std::sync::Arc;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    fn ab() -> LinkKey {
        LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1))
    }

    async fn store_with_routes(reservations: &[f64]) -> (Arc<StaticTopology>, RouteStore) {
        let topo = Arc::new(StaticTopology::new());
        topo.add_duplex_link(PortRef::new(1, 2), PortRef::new(2, 1), 100.0, StatUnit::Byte);
        let mut store = RouteStore::new(
            RouteStoreConfig::default(),
            topo.clone(),
            Arc::new(MemoryFlowTable::new()),
        );
        for (i, bw) in reservations.iter().enumerate() {
            let src = mac(10 + i as u8);
            let dst = mac(20 + i as u8);
            topo.add_host(Host::new(src, None, PortRef::new(1, 10 + i as u16)));
            topo.add_host(Host::new(dst, None, PortRef::new(2, 10 + i as u16)));
            let request = RouteRequest::new(PathDescriptor::mac(Some(src), dst))
                .with_condition(RoutingCondition::reserved(*bw));
            let candidate = store.create_route(&request).unwrap();
            store.add_route(candidate).await.unwrap();
        }
        (topo, store)
    }

    fn cookie(v: u16) -> Cookie {
        Cookie::new(v).unwrap()
    }

    #[tokio::test]
    async fn test_overbooked_link_is_flagged() {
        let (topo, store) = store_with_routes(&[60.0, 50.0]).await;
        let loads = LinkLoads::from_links(&topo.all_links());

        let second = store.route(cookie(2)).unwrap();
        let others = store.reservations_excluding(Some(second.cookie));
        assert_eq!(violating_link(second, 0.0, &loads, &others), Some(ab()));
    }

    #[tokio::test]
    async fn test_route_meeting_its_reservation_passes() {
        let (topo, store) = store_with_routes(&[60.0]).await;
        topo.set_link_usage(&ab(), 90.0);
        let loads = LinkLoads::from_links(&topo.all_links());
        let route = store.route(cookie(1)).unwrap();
        let others = store.reservations_excluding(Some(route.cookie));

        // 90 used of which 50 is ours: 60 free for us.
        assert_eq!(violating_link(route, 50.0, &loads, &others), None);
        // Only 20 is ours: 30 free, short of 60.
        assert_eq!(violating_link(route, 20.0, &loads, &others), Some(ab()));
        assert_eq!(violating_link(route, 60.0, &loads, &others), None);
    }

    #[tokio::test]
    async fn test_missing_link_counts_as_violation() {
        let (_topo, store) = store_with_routes(&[10.0]).await;
        let route = store.route(cookie(1)).unwrap();
        let none = LinkLoads::default();
        assert_eq!(violating_link(route, 0.0, &none, &BTreeMap::new()), Some(ab()));
    }

    #[tokio::test]
    async fn test_nuisance() {
        let (topo, store) = store_with_routes(&[40.0]).await;
        topo.set_link_usage(&ab(), 50.0);
        let loads = LinkLoads::from_links(&topo.all_links());

        // A best-effort route elsewhere that would move onto 1->2.
        let mut mover = store.route(cookie(1)).unwrap().clone();
        mover.cookie = cookie(9);
        mover.condition = None;
        mover.via = Vec::new();

        let flows: FlowBwSnapshot = [(cookie(1), 40.0), (cookie(9), 5.0)].into_iter().collect();
        assert!(!is_nuisance(&store, &mover, &[ab()], &loads, &flows));

        let flows: FlowBwSnapshot = [(cookie(1), 40.0), (cookie(9), 60.0)].into_iter().collect();
        assert!(is_nuisance(&store, &mover, &[ab()], &loads, &flows));

        // Reserved routes with no sample are not judged.
        let flows: FlowBwSnapshot = [(cookie(9), 60.0)].into_iter().collect();
        assert!(!is_nuisance(&store, &mover, &[ab()], &loads, &flows));
    }
}
