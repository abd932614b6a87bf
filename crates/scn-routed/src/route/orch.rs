//! RouteOrch: queued route work driven by the daemon.
//!
//! Path requests, link changes and host arrivals are queued per key and
//! applied to the shared [`RouteStore`] on the next `do_task`. Link events are
//! handled first so that path requests plan over the freshest topology.

use super::store::RouteStore;
use super::types::{PathDescriptor, RouteRequest};
use crate::topology::{Host, LinkEvent, LinkKey};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use scn_orch_common::{Consumer, KeyOpValue, Operation, Orch};
use scn_types::MacAddress;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A queued path request.
#[derive(Debug, Clone, PartialEq)]
pub enum PathTask {
    Unidirectional(RouteRequest),
    Bidirectional(RouteRequest),
}

impl PathTask {
    pub fn request(&self) -> &RouteRequest {
        match self {
            PathTask::Unidirectional(r) | PathTask::Bidirectional(r) => r,
        }
    }
}

pub struct RouteOrch {
    store: Arc<Mutex<RouteStore>>,
    paths: Consumer<PathDescriptor, PathTask>,
    links: Consumer<LinkKey, ()>,
    hosts: Consumer<MacAddress, Host>,
}

impl RouteOrch {
    pub fn new(store: Arc<Mutex<RouteStore>>) -> Self {
        Self {
            store,
            paths: Consumer::new("PATHS"),
            links: Consumer::new("LINKS"),
            hosts: Consumer::new("HOSTS"),
        }
    }

    pub fn store(&self) -> &Arc<Mutex<RouteStore>> {
        &self.store
    }

    pub fn enqueue_path(&mut self, task: PathTask) {
        let key = task.request().descriptor;
        self.paths.add_to_sync([KeyOpValue::set(key, task)]);
    }

    pub fn enqueue_path_removal(&mut self, descriptor: PathDescriptor) {
        self.paths.add_to_sync([KeyOpValue::del(descriptor)]);
    }

    pub fn enqueue_link_event(&mut self, event: LinkEvent) {
        let entry = match event {
            LinkEvent::Added(key) => KeyOpValue::set(key, ()),
            LinkEvent::Removed(key) => KeyOpValue::del(key),
        };
        self.links.add_to_sync([entry]);
    }

    pub fn enqueue_host(&mut self, host: Host) {
        self.hosts.add_to_sync([KeyOpValue::set(host.mac, host)]);
    }

    pub fn enqueue_host_removal(&mut self, mac: MacAddress) {
        self.hosts.add_to_sync([KeyOpValue::del(mac)]);
    }

    async fn process_links(&mut self, store: &mut RouteStore) {
        for task in self.links.drain() {
            match task.op {
                Operation::Set => store.handle_link_added(&task.key),
                Operation::Del => {
                    let recovery = store.handle_link_removed(&task.key).await;
                    if !recovery.deleted.is_empty() {
                        warn!(
                            "RouteOrch: {} route(s) lost with link {}: {:?}",
                            recovery.deleted.len(),
                            task.key,
                            recovery.deleted
                        );
                    }
                }
            }
        }
    }

    async fn process_hosts(&mut self, store: &mut RouteStore) {
        for task in self.hosts.drain() {
            match (task.op, task.value) {
                (Operation::Set, Some(host)) => {
                    store.create_mesh(&host).await;
                }
                (Operation::Del, _) => {
                    let removed = store.remove_mesh(&task.key).await;
                    debug!("RouteOrch: host {} left, {} mesh route(s) removed", task.key, removed.len());
                }
                (Operation::Set, None) => warn!("RouteOrch: host {} queued without a value", task.key),
            }
        }
    }

    async fn process_paths(&mut self, store: &mut RouteStore) {
        for task in self.paths.drain() {
            match (task.op, task.value) {
                (Operation::Set, Some(PathTask::Unidirectional(request))) => {
                    let result = match store.create_route(&request) {
                        Ok(candidate) => store.add_route(candidate).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(route) => info!("RouteOrch: path {} served by {}", task.key, route.cookie),
                        Err(e) => error!("RouteOrch: failed to serve path {}: {}", task.key, e),
                    }
                }
                (Operation::Set, Some(PathTask::Bidirectional(request))) => {
                    match store.create_bi_route(&request).await {
                        Ok((fwd, rev)) => info!(
                            "RouteOrch: path {} served by {} and {}",
                            task.key, fwd.cookie, rev.cookie
                        ),
                        Err(e) => error!("RouteOrch: failed to serve path {}: {}", task.key, e),
                    }
                }
                (Operation::Del, _) => {
                    store.del_path(&task.key).await;
                }
                (Operation::Set, None) => warn!("RouteOrch: path {} queued without a value", task.key),
            }
        }
    }
}

#[async_trait]
impl Orch for RouteOrch {
    fn name(&self) -> &str {
        "RouteOrch"
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn do_task(&mut self) {
        let store = self.store.clone();
        let mut store = store.lock().await;

        self.process_links(&mut store).await;
        self.process_hosts(&mut store).await;
        self.process_paths(&mut store).await;
    }

    fn has_pending_tasks(&self) -> bool {
        self.links.has_pending() || self.hosts.has_pending() || self.paths.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut dump = self.links.dump();
        dump.extend(self.hosts.dump());
        dump.extend(self.paths.dump());
        dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteStoreConfig;
    use crate::topology::StaticTopology;
    use pretty_assertions::assert_eq;
    use scn_openflow::MemoryFlowTable;
    use scn_types::{PortRef, StatUnit};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    fn setup() -> (Arc<StaticTopology>, Arc<MemoryFlowTable>, RouteOrch) {
        let topo = Arc::new(StaticTopology::new());
        topo.add_duplex_link(PortRef::new(1, 2), PortRef::new(2, 1), 1000.0, StatUnit::Byte);
        topo.add_host(Host::new(mac(1), None, PortRef::new(1, 10)));
        topo.add_host(Host::new(mac(2), None, PortRef::new(2, 10)));

        let fleet = Arc::new(MemoryFlowTable::new());
        let store = RouteStore::new(RouteStoreConfig::default(), topo.clone(), fleet.clone());
        (topo, fleet, RouteOrch::new(Arc::new(Mutex::new(store))))
    }

    #[tokio::test]
    async fn test_path_request_and_removal() {
        let (_topo, fleet, mut orch) = setup();
        let descriptor = PathDescriptor::mac(Some(mac(1)), mac(2));

        orch.enqueue_path(PathTask::Bidirectional(RouteRequest::new(descriptor)));
        assert!(orch.has_pending_tasks());
        assert_eq!(orch.dump_pending_tasks().len(), 1);

        orch.do_task().await;
        assert!(!orch.has_pending_tasks());
        assert_eq!(orch.store().lock().await.len(), 2);
        assert_eq!(fleet.entry_count(), 4);

        orch.enqueue_path_removal(descriptor);
        orch.do_task().await;
        assert!(orch.store().lock().await.is_empty());
        assert_eq!(fleet.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_request_then_removal_collapses() {
        let (_topo, fleet, mut orch) = setup();
        let descriptor = PathDescriptor::mac(Some(mac(1)), mac(2));

        orch.enqueue_path(PathTask::Unidirectional(RouteRequest::new(descriptor)));
        orch.enqueue_path_removal(descriptor);
        orch.do_task().await;

        assert!(orch.store().lock().await.is_empty());
        assert_eq!(fleet.operations(), vec![]);
    }

    #[tokio::test]
    async fn test_host_mesh_and_link_events() {
        let (topo, _fleet, mut orch) = setup();

        orch.enqueue_host(Host::new(mac(2), None, PortRef::new(2, 10)));
        orch.do_task().await;
        assert_eq!(orch.store().lock().await.len(), 2);

        let key = LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1));
        topo.remove_link(&key);
        orch.enqueue_link_event(LinkEvent::Removed(key));
        orch.do_task().await;

        // Switch 1 has no other way to reach the host.
        assert_eq!(orch.store().lock().await.len(), 1);

        orch.enqueue_host_removal(mac(2));
        orch.do_task().await;
        assert!(orch.store().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_link_added_requests_optimization() {
        let (_topo, _fleet, mut orch) = setup();
        let trigger = orch.store().lock().await.trigger();

        orch.enqueue_link_event(LinkEvent::Added(LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1))));
        orch.do_task().await;
        assert!(trigger.take());
    }
}
