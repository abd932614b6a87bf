//! Authoritative route table.
//!
//! The store plans routes over the current link graph, programs the fleet,
//! and tracks which cookies traverse which link. All mutation goes through
//! `&mut self`; the daemon wraps the store in a single mutex.

use super::cookie::CookieAllocator;
use super::entries::build_entries;
use super::error::{Direction, Result, RouteError};
use super::events::{OptimizeTrigger, RouteEvent};
use super::slots::{Claim, Release, SlotTable};
use super::types::{
    reservation_of, Endpoints, PathDescriptor, Route, RouteCandidate, RouteRequest,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::RouteStoreConfig;
use crate::graph::{local_via, GraphBuilder, LinkGraph};
use crate::topology::{Host, Link, LinkKey, Topology};
use log::{debug, error, info, warn};
use scn_openflow::{FlowEntry, FlowResult, FlowTableApi};
use scn_orch_common::MembershipMap;
use scn_types::{Cookie, Dpid, MacAddress};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome of re-planning the routes of a removed link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRecovery {
    pub rerouted: Vec<Cookie>,
    pub deleted: Vec<Cookie>,
}

pub struct RouteStore {
    config: RouteStoreConfig,
    topology: Arc<dyn Topology>,
    flow_table: Arc<dyn FlowTableApi>,
    routes: BTreeMap<Cookie, Route>,
    cookies: CookieAllocator,
    link_cookies: MembershipMap<LinkKey, Cookie>,
    slots: SlotTable,
    /// Routes whose entries may be displaced while a lost link is handled.
    replanning: BTreeSet<Cookie>,
    events: broadcast::Sender<RouteEvent>,
    trigger: Arc<OptimizeTrigger>,
}

impl RouteStore {
    pub fn new(
        config: RouteStoreConfig,
        topology: Arc<dyn Topology>,
        flow_table: Arc<dyn FlowTableApi>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            topology,
            flow_table,
            routes: BTreeMap::new(),
            cookies: CookieAllocator::new(),
            link_cookies: MembershipMap::new(),
            slots: SlotTable::new(),
            replanning: BTreeSet::new(),
            events,
            trigger: Arc::new(OptimizeTrigger::new()),
        }
    }

    pub fn config(&self) -> &RouteStoreConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.events.subscribe()
    }

    pub fn trigger(&self) -> Arc<OptimizeTrigger> {
        self.trigger.clone()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn route(&self, cookie: Cookie) -> Option<&Route> {
        self.routes.get(&cookie)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Cookies of every route carrying `descriptor`.
    pub fn routes_for(&self, descriptor: &PathDescriptor) -> Vec<Cookie> {
        self.routes
            .values()
            .filter(|r| r.descriptor == *descriptor)
            .map(|r| r.cookie)
            .collect()
    }

    /// Cookies currently attributed to `link`.
    pub fn cookies_on(&self, link: &LinkKey) -> Vec<Cookie> {
        self.link_cookies
            .members(link)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sum of reserved bytes/s per link.
    pub fn reservations(&self) -> BTreeMap<LinkKey, f64> {
        self.reservations_excluding(None)
    }

    /// Like [`reservations`](Self::reservations) but ignoring one route.
    pub fn reservations_excluding(&self, excluded: Option<Cookie>) -> BTreeMap<LinkKey, f64> {
        let mut reserved = BTreeMap::new();
        for (link, cookies) in self.link_cookies.iter() {
            let total: f64 = cookies
                .iter()
                .filter(|c| Some(**c) != excluded)
                .filter_map(|c| self.routes.get(c))
                .map(Route::reservation)
                .sum();
            if total > 0.0 {
                reserved.insert(*link, total);
            }
        }
        reserved
    }

    /// Graph over the current topology, weighted by reservations and the
    /// links' own telemetry.
    pub fn link_graph(&self) -> LinkGraph {
        let links = self.topology.all_links();
        let switches = self.topology.switches();
        let reserved = self.reservations();
        GraphBuilder::new(&links)
            .switches(&switches)
            .reservations(&reserved)
            .force(self.config.force_route)
            .build()
    }

    /// Resolves the ingress switch and egress port of a request.
    pub fn resolve(&self, request: &RouteRequest) -> Result<Endpoints> {
        let unresolved = |end| RouteError::UnresolvedEndpoint {
            descriptor: request.descriptor.to_string(),
            end,
        };

        let (src_dpid, in_port) = match request.src_dpid {
            Some(dpid) => (dpid, request.in_port),
            None => {
                let host = self.source_host(&request.descriptor).ok_or_else(|| unresolved("source"))?;
                (host.attach.dpid, Some(host.attach.port))
            }
        };

        let (dst, dst_mac) = match request.egress {
            Some(port) => {
                let mac = request
                    .dst_mac
                    .or_else(|| self.destination_mac(&request.descriptor))
                    .ok_or_else(|| unresolved("destination"))?;
                (port, mac)
            }
            None => {
                let host = self
                    .destination_host(&request.descriptor)
                    .ok_or_else(|| unresolved("destination"))?;
                (host.attach, request.dst_mac.unwrap_or(host.mac))
            }
        };

        if !self.topology.has_switch(src_dpid) {
            return Err(unresolved("source"));
        }
        if !self.topology.has_switch(dst.dpid) {
            return Err(unresolved("destination"));
        }

        Ok(Endpoints {
            src_dpid,
            in_port,
            dst,
            dst_mac,
        })
    }

    fn source_host(&self, descriptor: &PathDescriptor) -> Option<Host> {
        match descriptor {
            PathDescriptor::Mac(p) => p.src.and_then(|mac| self.topology.host_by_mac(&mac)),
            PathDescriptor::Ip(p) => self.topology.host_by_ip(&p.src),
        }
    }

    fn destination_host(&self, descriptor: &PathDescriptor) -> Option<Host> {
        match descriptor {
            PathDescriptor::Mac(p) => self.topology.host_by_mac(&p.dst),
            PathDescriptor::Ip(p) => self.topology.host_by_ip(&p.dst),
        }
    }

    fn destination_mac(&self, descriptor: &PathDescriptor) -> Option<MacAddress> {
        match descriptor {
            PathDescriptor::Mac(p) => Some(p.dst),
            PathDescriptor::Ip(p) => self.topology.host_by_ip(&p.dst).map(|h| h.mac),
        }
    }

    fn validate_via(&self, via: &[LinkKey], endpoints: &Endpoints) -> Result<()> {
        let invalid = |msg: String| Err(RouteError::InvalidRequest(msg));

        let (first, last) = match (via.first(), via.last()) {
            (Some(first), Some(last)) => (first, last),
            _ if endpoints.is_local() => return Ok(()),
            _ => return invalid("empty via between different switches".to_string()),
        };
        if first.src.dpid != endpoints.src_dpid {
            return invalid(format!("via starts at {}, not {}", first.src.dpid, endpoints.src_dpid));
        }
        if last.dst.dpid != endpoints.dst.dpid {
            return invalid(format!("via ends at {}, not {}", last.dst.dpid, endpoints.dst.dpid));
        }

        let mut seen = BTreeSet::new();
        for (i, link) in via.iter().enumerate() {
            if link.is_local() {
                if via.len() != 1 {
                    return invalid(format!("local hop {} inside a longer via", link));
                }
                continue;
            }
            if self.topology.link(link).is_none() {
                return invalid(format!("link {} does not exist", link));
            }
            if i > 0 && via[i - 1].dst.dpid != link.src.dpid {
                return invalid(format!("via is not contiguous at {}", link));
            }
            if !seen.insert(link.src.dpid) {
                return invalid(format!("via visits {} twice", link.src.dpid));
            }
        }
        if seen.contains(&last.dst.dpid) {
            return invalid(format!("via visits {} twice", last.dst.dpid));
        }
        Ok(())
    }

    fn compute_via(&self, request: &RouteRequest, endpoints: &Endpoints, graph: &LinkGraph) -> Result<Vec<LinkKey>> {
        if let Some(via) = &request.via {
            self.validate_via(via, endpoints)?;
            return Ok(via.clone());
        }

        if endpoints.is_local() {
            return Ok(match endpoints.in_port {
                Some(in_port) => vec![local_via(endpoints.src_dpid, in_port, endpoints.dst.port)],
                None => Vec::new(),
            });
        }

        let via = graph.shortest_path(endpoints.src_dpid, endpoints.dst.dpid);
        if via.is_empty() {
            return Err(RouteError::Unreachable {
                src: endpoints.src_dpid,
                dst: endpoints.dst.dpid,
            });
        }
        Ok(via)
    }

    /// Plans a route over the current graph without touching the fleet.
    pub fn create_route(&self, request: &RouteRequest) -> Result<RouteCandidate> {
        let graph = self.link_graph();
        self.create_route_with(request, &graph)
    }

    /// Plans a route over a caller-supplied graph.
    pub fn create_route_with(&self, request: &RouteRequest, graph: &LinkGraph) -> Result<RouteCandidate> {
        let endpoints = self.resolve(request)?;
        let via = self.compute_via(request, &endpoints, graph).inspect_err(|e| {
            warn!("RouteStore: cannot plan {}: {}", request.descriptor, e);
        })?;
        let entries = build_entries(&request.descriptor, &endpoints, &via, &self.config);

        debug!(
            "RouteStore: planned {} over {} link(s), {} entries",
            request.descriptor,
            via.len(),
            entries.len()
        );

        Ok(RouteCandidate {
            cookie: request.cookie,
            descriptor: request.descriptor,
            condition: request.condition,
            via,
            entries,
            endpoints,
        })
    }

    /// Plans and installs both directions of a flow, or neither.
    pub async fn create_bi_route(&mut self, request: &RouteRequest) -> Result<(Route, Route)> {
        let mirror = request.mirror().ok_or_else(|| {
            RouteError::InvalidRequest(format!("{} has no reverse direction", request.descriptor))
        })?;

        let forward = self.create_route(request)?;
        let reverse = self
            .create_route(&mirror)
            .map_err(|e| RouteError::partial(Direction::Reverse, e))?;

        let previous = forward.cookie.and_then(|c| self.routes.get(&c).cloned());
        let forward = self.add_route(forward).await?;
        let reverse = match self.add_route(reverse).await {
            Ok(route) => route,
            Err(e) => {
                self.restore(forward.cookie, previous).await;
                return Err(RouteError::partial(Direction::Reverse, e));
            }
        };

        self.pair(forward.cookie, reverse.cookie);
        let forward = self.routes.get(&forward.cookie).cloned().unwrap_or(forward);
        let reverse = self.routes.get(&reverse.cookie).cloned().unwrap_or(reverse);

        info!(
            "RouteStore: bidirectional route {} <-> {} installed",
            forward.cookie, reverse.cookie
        );
        Ok((forward, reverse))
    }

    /// Puts `cookie` back the way it was before a failed bidirectional
    /// commit: the previous route if it existed, nothing otherwise.
    async fn restore(&mut self, cookie: Cookie, previous: Option<Route>) {
        let outcome = match previous {
            Some(route) => self.add_route(RouteCandidate::from(route)).await.map(|_| ()),
            None => self.del_route(cookie).await.map(|_| ()),
        };
        if let Err(e) = outcome {
            error!("RouteStore: rollback of {} failed: {}", cookie, e);
        }
    }

    fn pair(&mut self, a: Cookie, b: Cookie) {
        if let Some(route) = self.routes.get_mut(&a) {
            route.paired = Some(b);
        }
        if let Some(route) = self.routes.get_mut(&b) {
            route.paired = Some(a);
        }
    }

    /// Commits a candidate: a diffed update when its cookie is live,
    /// otherwise a new route under a freshly allocated cookie.
    pub async fn add_route(&mut self, candidate: RouteCandidate) -> Result<Route> {
        match candidate.cookie.filter(|c| self.routes.contains_key(c)) {
            Some(cookie) => self.update_route(cookie, candidate).await,
            None => self.install_route(candidate).await,
        }
    }

    fn stamp(entries: BTreeMap<Dpid, FlowEntry>, cookie: Cookie) -> BTreeMap<Dpid, FlowEntry> {
        entries
            .into_iter()
            .map(|(dpid, entry)| (dpid, entry.with_cookie(u64::from(cookie))))
            .collect()
    }

    async fn install_route(&mut self, candidate: RouteCandidate) -> Result<Route> {
        let cookie = match self.cookies.allocate() {
            Ok(cookie) => cookie,
            Err(e) => {
                error!("RouteStore: {}", e);
                audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, "RouteStore", "allocate_cookie")
                    .with_object_type("route")
                    .with_error(e.to_string()));
                return Err(e);
            }
        };

        let entries = Self::stamp(candidate.entries, cookie);
        let mut claimed: Vec<(Dpid, &FlowEntry)> = Vec::with_capacity(entries.len());
        for (dpid, entry) in &entries {
            if let Err(e) = self.claim_entry(cookie, *dpid, entry).await {
                error!("RouteStore: install of {} on {} failed: {}", cookie, dpid, e);
                self.release_entries(cookie, &claimed).await;
                self.cookies.release(cookie);
                audit_log!(AuditRecord::new(AuditCategory::FlowTableOperation, "RouteStore", "add_route")
                    .with_object_id(cookie.to_string())
                    .with_object_type("route")
                    .with_error(e.to_string()));
                return Err(e);
            }
            claimed.push((*dpid, entry));
        }

        let route = Route {
            cookie,
            descriptor: candidate.descriptor,
            condition: candidate.condition,
            via: candidate.via,
            entries,
            paired: None,
            endpoints: candidate.endpoints,
        };

        for link in route.fabric_links() {
            self.link_cookies.attribute(*link, cookie);
        }
        self.check_headroom(&route);
        self.routes.insert(cookie, route.clone());

        info!("RouteStore: installed {}", route);
        audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, "RouteStore", "add_route")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(cookie.to_string())
            .with_object_type("route")
            .with_details(serde_json::json!({
                "descriptor": route.descriptor.to_string(),
                "switches": route.entries.len(),
                "reservation": route.reservation(),
            })));
        let _ = self.events.send(RouteEvent::Installed(route.clone()));

        Ok(route)
    }

    async fn update_route(&mut self, cookie: Cookie, candidate: RouteCandidate) -> Result<Route> {
        let Some(old) = self.routes.get(&cookie).cloned() else {
            return Err(RouteError::RouteNotFound(cookie));
        };
        let entries = Self::stamp(candidate.entries, cookie);

        let stale: Vec<(Dpid, &FlowEntry)> = old
            .entries
            .iter()
            .filter(|(dpid, entry)| entries.get(*dpid) != Some(*entry))
            .map(|(dpid, entry)| (*dpid, entry))
            .collect();
        let fresh: Vec<(Dpid, &FlowEntry)> = entries
            .iter()
            .filter(|(dpid, entry)| {
                old.entries.get(*dpid) != Some(*entry) || !self.slots.is_holder(**dpid, entry, cookie)
            })
            .map(|(dpid, entry)| (*dpid, entry))
            .collect();

        let (removed_count, installed_count) = (stale.len(), fresh.len());
        debug!(
            "RouteStore: updating {}: {} stale, {} fresh, {} kept",
            cookie,
            removed_count,
            installed_count,
            entries.len() - installed_count
        );

        let mut removed = Vec::with_capacity(stale.len());
        for (dpid, entry) in &stale {
            if let Err(e) = self.release_entry(cookie, *dpid, entry).await {
                error!("RouteStore: removal of {} on {} failed: {}", cookie, dpid, e);
                self.reclaim_entries(cookie, &removed).await;
                return Err(self.update_failed(cookie, RouteError::install(*dpid, e)));
            }
            removed.push((*dpid, *entry));
        }

        let mut installed = Vec::with_capacity(fresh.len());
        for (dpid, entry) in &fresh {
            if let Err(e) = self.claim_entry(cookie, *dpid, entry).await {
                error!("RouteStore: install of {} on {} failed: {}", cookie, dpid, e);
                self.release_entries(cookie, &installed).await;
                self.reclaim_entries(cookie, &removed).await;
                return Err(self.update_failed(cookie, e));
            }
            installed.push((*dpid, *entry));
        }

        for link in old.fabric_links() {
            if let Err(e) = self.link_cookies.release(link, &cookie) {
                debug!("RouteStore: {} was not attributed to {}: {}", cookie, link, e);
            }
        }

        let new = Route {
            cookie,
            descriptor: candidate.descriptor,
            condition: candidate.condition,
            via: candidate.via,
            entries,
            paired: old.paired,
            endpoints: candidate.endpoints,
        };
        for link in new.fabric_links() {
            self.link_cookies.attribute(*link, cookie);
        }

        if reservation_of(old.condition.as_ref()) != new.reservation() {
            info!("RouteStore: reservation of {} changed, requesting optimization", cookie);
            self.trigger.request();
        }
        self.check_headroom(&new);
        self.routes.insert(cookie, new.clone());

        info!("RouteStore: updated {}", new);
        audit_log!(AuditRecord::new(AuditCategory::ResourceModify, "RouteStore", "update_route")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(cookie.to_string())
            .with_object_type("route")
            .with_details(serde_json::json!({
                "removed": removed_count,
                "installed": installed_count,
            })));
        let _ = self.events.send(RouteEvent::Changed {
            old,
            new: new.clone(),
        });

        Ok(new)
    }

    fn update_failed(&self, cookie: Cookie, e: RouteError) -> RouteError {
        audit_log!(AuditRecord::new(AuditCategory::FlowTableOperation, "RouteStore", "update_route")
            .with_object_id(cookie.to_string())
            .with_object_type("route")
            .with_error(e.to_string()));
        e
    }

    /// Takes the slot of `entry` on `dpid` for `cookie`. The switch is only
    /// programmed when no identical entry is installed there already.
    async fn claim_entry(&mut self, cookie: Cookie, dpid: Dpid, entry: &FlowEntry) -> Result<()> {
        match self.slots.check(dpid, entry, cookie) {
            Claim::Install => self
                .flow_table
                .install_entry(dpid, entry)
                .await
                .map_err(|e| RouteError::install(dpid, e))?,
            Claim::Join => debug!("RouteStore: {} shares its entry on {}", cookie, dpid),
            Claim::Conflict(holder) => {
                let displaceable = self
                    .slots
                    .holders(dpid, entry)
                    .iter()
                    .all(|c| *c == cookie || self.replanning.contains(c));
                if !displaceable {
                    return Err(RouteError::SlotConflict { dpid, holder });
                }
                self.flow_table
                    .install_entry(dpid, entry)
                    .await
                    .map_err(|e| RouteError::install(dpid, e))?;
                let evicted = self.slots.evict(dpid, entry);
                debug!("RouteStore: {} takes its entry on {} over from {:?}", cookie, dpid, evicted);
            }
        }
        self.slots.hold(dpid, entry, cookie);
        Ok(())
    }

    /// Gives up `cookie`'s hold on a slot. The entry leaves the switch with
    /// its last holder.
    async fn release_entry(&mut self, cookie: Cookie, dpid: Dpid, entry: &FlowEntry) -> FlowResult<()> {
        match self.slots.release(dpid, entry, cookie) {
            Release::Remove => self.flow_table.remove_entry_strict(dpid, entry).await,
            Release::Restamp(shared) => {
                debug!("RouteStore: entry on {} passes from {} to cookie {}", dpid, cookie, shared.cookie);
                self.flow_table.install_entry(dpid, &shared).await
            }
            Release::Keep => Ok(()),
        }
    }

    async fn reclaim_entries(&mut self, cookie: Cookie, entries: &[(Dpid, &FlowEntry)]) {
        for (dpid, entry) in entries {
            if let Err(e) = self.claim_entry(cookie, *dpid, entry).await {
                error!("RouteStore: restore on {} failed: {}", dpid, e);
            }
        }
    }

    async fn release_entries(&mut self, cookie: Cookie, entries: &[(Dpid, &FlowEntry)]) {
        for (dpid, entry) in entries {
            if let Err(e) = self.release_entry(cookie, *dpid, entry).await {
                error!("RouteStore: rollback on {} failed: {}", dpid, e);
            }
        }
    }

    /// Requests an optimization pass when `route` sits on a link without
    /// room for its reservation.
    fn check_headroom(&self, route: &Route) {
        if self.lacks_headroom(route) {
            info!("RouteStore: {} placed below its reservation, requesting optimization", route.cookie);
            self.trigger.request();
        }
    }

    fn lacks_headroom(&self, route: &Route) -> bool {
        let required = route.reservation();
        if required <= 0.0 {
            return false;
        }
        let reserved = self.reservations_excluding(Some(route.cookie));
        route.fabric_links().any(|key| match self.topology.link(key) {
            Some(link) => {
                let capacity = link.capacity_bytes();
                let taken = link.used_bytes().max(reserved.get(key).copied().unwrap_or(0.0));
                capacity - taken < required
            }
            None => false,
        })
    }

    /// Removes a route from the fleet and the table.
    ///
    /// Entries the fleet refuses to remove are logged and left behind; the
    /// route itself is always dropped.
    pub async fn del_route(&mut self, cookie: Cookie) -> Result<Route> {
        let route = self.routes.remove(&cookie).ok_or(RouteError::RouteNotFound(cookie))?;

        for (dpid, entry) in &route.entries {
            if let Err(e) = self.release_entry(cookie, *dpid, entry).await {
                error!("RouteStore: removal of {} on {} failed: {}", cookie, dpid, e);
            }
        }
        for link in route.fabric_links() {
            if let Err(e) = self.link_cookies.release(link, &cookie) {
                debug!("RouteStore: {} was not attributed to {}: {}", cookie, link, e);
            }
        }
        self.cookies.release(cookie);

        if let Some(partner) = route.paired.and_then(|c| self.routes.get_mut(&c)) {
            partner.paired = None;
        }

        info!("RouteStore: deleted {}", route);
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "RouteStore", "del_route")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(cookie.to_string())
            .with_object_type("route"));
        let _ = self.events.send(RouteEvent::Deleted(route.clone()));

        Ok(route)
    }

    /// Deletes every route carrying `descriptor` together with its pair.
    pub async fn del_path(&mut self, descriptor: &PathDescriptor) -> Vec<Route> {
        let mut targets = BTreeSet::new();
        for route in self.routes.values().filter(|r| r.descriptor == *descriptor) {
            targets.insert(route.cookie);
            if let Some(paired) = route.paired {
                targets.insert(paired);
            }
        }

        let mut deleted = Vec::with_capacity(targets.len());
        for cookie in targets {
            if let Ok(route) = self.del_route(cookie).await {
                deleted.push(route);
            }
        }
        if deleted.is_empty() {
            debug!("RouteStore: no route for {}", descriptor);
        }
        deleted
    }

    /// Re-plans every route that traversed `key`, keeping cookies.
    ///
    /// Routes that cannot be re-planned are deleted. While re-planning, a
    /// route may take over an entry held only by routes still waiting for
    /// their turn; those routes no longer hold it when they move.
    pub async fn handle_link_removed(&mut self, key: &LinkKey) -> LinkRecovery {
        let affected = self.cookies_on(key);
        let mut recovery = LinkRecovery::default();
        if affected.is_empty() {
            return recovery;
        }
        info!("RouteStore: link {} removed, re-planning {} route(s)", key, affected.len());

        let links: Vec<_> = self
            .topology
            .all_links()
            .into_iter()
            .filter(|l| l.key() != *key)
            .collect();
        let switches = self.topology.switches();

        self.replanning = affected.iter().copied().collect();
        for cookie in affected {
            self.replanning.remove(&cookie);
            match self.replan(cookie, &links, &switches).await {
                Ok(()) => recovery.rerouted.push(cookie),
                Err(e) => self.drop_unplannable(cookie, key, e, &mut recovery).await,
            }
        }
        self.replanning.clear();

        self.link_cookies.remove_key(key);
        recovery
    }

    async fn replan(&mut self, cookie: Cookie, links: &[Link], switches: &[Dpid]) -> Result<()> {
        let Some(route) = self.routes.get(&cookie) else {
            return Err(RouteError::RouteNotFound(cookie));
        };
        let request = route.replan_request();

        let reserved = self.reservations_excluding(Some(cookie));
        let graph = GraphBuilder::new(links)
            .switches(switches)
            .reservations(&reserved)
            .force(self.config.force_route)
            .build();

        let candidate = self.create_route_with(&request, &graph)?;
        self.add_route(candidate).await.map(|_| ())
    }

    async fn drop_unplannable(&mut self, cookie: Cookie, key: &LinkKey, e: RouteError, recovery: &mut LinkRecovery) {
        warn!("RouteStore: cannot re-plan {} after losing {}: {}", cookie, key, e);
        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "RouteStore", "replan_route")
            .with_object_id(cookie.to_string())
            .with_object_type("route")
            .with_error(e.to_string()));
        if self.del_route(cookie).await.is_ok() {
            recovery.deleted.push(cookie);
        }
    }

    /// New capacity: let the optimizer use it on its next pass.
    pub fn handle_link_added(&self, key: &LinkKey) {
        debug!("RouteStore: link {} added, requesting optimization", key);
        self.trigger.request();
    }

    /// Installs a route towards `host` from every switch of the fleet,
    /// updating the ones that already exist.
    ///
    /// Switches without a path are skipped.
    pub async fn create_mesh(&mut self, host: &Host) -> Vec<Cookie> {
        let descriptor = PathDescriptor::mac(None, host.mac);
        let existing: BTreeMap<Dpid, Cookie> = self
            .routes
            .values()
            .filter(|r| r.descriptor == descriptor)
            .map(|r| (r.endpoints.src_dpid, r.cookie))
            .collect();

        let mut cookies = Vec::new();
        for dpid in self.topology.switches() {
            let mut request = RouteRequest::new(descriptor)
                .from_switch(dpid)
                .to_port(host.attach, Some(host.mac));
            if let Some(cookie) = existing.get(&dpid) {
                request = request.with_cookie(*cookie);
            }

            let result = match self.create_route(&request) {
                Ok(candidate) => self.add_route(candidate).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(route) => cookies.push(route.cookie),
                Err(e) => debug!("RouteStore: no mesh route from {} to {}: {}", dpid, host.mac, e),
            }
        }

        info!(
            "RouteStore: mesh towards {} at {} covers {} switch(es)",
            host.mac,
            host.attach,
            cookies.len()
        );
        cookies
    }

    /// Removes the mesh towards a host that left.
    pub async fn remove_mesh(&mut self, mac: &MacAddress) -> Vec<Route> {
        self.del_path(&PathDescriptor::mac(None, *mac)).await
    }

    /// Routes holding the slot `entry` sits in on `dpid`.
    pub fn slot_holders(&self, dpid: Dpid, entry: &FlowEntry) -> Vec<Cookie> {
        self.slots.holders(dpid, entry)
    }

    /// Every installed entry, grouped by cookie.
    pub fn dump_entries(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for route in self.routes.values() {
            lines.push(route.to_string());
            for (dpid, entry) in &route.entries {
                lines.push(format!("  {} {}", dpid, entry));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::types::RoutingCondition;
    use crate::topology::{Link, StaticTopology};
    use pretty_assertions::assert_eq;
    use scn_openflow::{FlowOp, MemoryFlowTable};
    use scn_types::{PortNo, PortRef, StatUnit};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    /// 1 -- 2 -- 3 line with a host on each end.
    fn line() -> (Arc<StaticTopology>, Arc<MemoryFlowTable>, RouteStore) {
        let topo = Arc::new(StaticTopology::new());
        topo.add_duplex_link(PortRef::new(1, 2), PortRef::new(2, 1), 1000.0, StatUnit::Byte);
        topo.add_duplex_link(PortRef::new(2, 2), PortRef::new(3, 1), 1000.0, StatUnit::Byte);
        topo.add_host(Host::new(mac(1), None, PortRef::new(1, 10)));
        topo.add_host(Host::new(mac(3), None, PortRef::new(3, 10)));

        let fleet = Arc::new(MemoryFlowTable::new());
        let store = RouteStore::new(RouteStoreConfig::default(), topo.clone(), fleet.clone());
        (topo, fleet, store)
    }

    fn request() -> RouteRequest {
        RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(3)))
    }

    #[tokio::test]
    async fn test_create_route_does_not_commit() {
        let (_topo, fleet, store) = line();
        let candidate = store.create_route(&request()).unwrap();

        assert_eq!(candidate.cookie, None);
        assert_eq!(candidate.via.len(), 2);
        assert_eq!(candidate.entries.len(), 3);
        assert!(store.is_empty());
        assert_eq!(fleet.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_add_route_installs_and_attributes() {
        let (_topo, fleet, mut store) = line();
        let candidate = store.create_route(&request()).unwrap();
        let route = store.add_route(candidate).await.unwrap();

        assert_eq!(route.cookie.get(), 1);
        assert_eq!(fleet.entry_count(), 3);
        assert_eq!(
            fleet.switches_with_cookie(1).into_iter().collect::<Vec<_>>(),
            vec![Dpid(1), Dpid(2), Dpid(3)]
        );
        for link in &route.via {
            assert_eq!(store.cookies_on(link), vec![route.cookie]);
        }
    }

    #[tokio::test]
    async fn test_unreachable_consumes_nothing() {
        let (topo, fleet, store) = line();
        topo.add_host(Host::new(mac(9), None, PortRef::new(9, 1)));

        let err = store
            .create_route(&RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(9))))
            .unwrap_err();
        assert!(matches!(err, RouteError::Unreachable { .. }));
        assert_eq!(fleet.operations(), vec![]);
    }

    #[tokio::test]
    async fn test_unknown_host_is_unresolved() {
        let (_topo, _fleet, store) = line();
        let err = store
            .create_route(&RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(42))))
            .unwrap_err();
        assert!(matches!(err, RouteError::UnresolvedEndpoint { end: "destination", .. }));
    }

    #[tokio::test]
    async fn test_local_route() {
        let (topo, fleet, mut store) = line();
        topo.add_host(Host::new(mac(4), None, PortRef::new(1, 11)));

        let candidate = store
            .create_route(&RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(4))))
            .unwrap();
        assert_eq!(candidate.via, vec![local_via(Dpid(1), PortNo(10), PortNo(11))]);

        let route = store.add_route(candidate).await.unwrap();
        assert_eq!(fleet.entries(Dpid(1)).len(), 1);
        assert_eq!(route.fabric_links().count(), 0);
    }

    #[tokio::test]
    async fn test_explicit_via_validated() {
        let (_topo, _fleet, store) = line();
        let bogus = vec![LinkKey::new(PortRef::new(1, 5), PortRef::new(3, 5))];
        let err = store.create_route(&request().with_via(bogus)).unwrap_err();
        assert!(matches!(err, RouteError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_install_failure_rolls_back() {
        let (_topo, fleet, mut store) = line();
        fleet.fail_installs_on(Dpid(3));

        let candidate = store.create_route(&request()).unwrap();
        let err = store.add_route(candidate).await.unwrap_err();

        assert!(matches!(err, RouteError::Install { dpid: Dpid(3), .. }));
        assert!(store.is_empty());
        assert_eq!(fleet.entry_count(), 0);

        fleet.clear_failures();
        let candidate = store.create_route(&request()).unwrap();
        let route = store.add_route(candidate).await.unwrap();
        assert_eq!(route.cookie.get(), 2);
    }

    #[tokio::test]
    async fn test_update_keeps_identical_entries() {
        let (_topo, fleet, mut store) = line();
        let route = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();
        fleet.clear_operations();

        let same = store
            .create_route(&request().with_cookie(route.cookie))
            .unwrap();
        let updated = store.add_route(same).await.unwrap();

        assert_eq!(updated.cookie, route.cookie);
        assert_eq!(fleet.operations(), vec![]);
    }

    #[tokio::test]
    async fn test_reservation_change_requests_optimization() {
        let (_topo, _fleet, mut store) = line();
        let route = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();
        assert!(!store.trigger().is_requested());

        let reserved = request()
            .with_cookie(route.cookie)
            .with_condition(RoutingCondition::reserved(100.0));
        store.add_route(store.create_route(&reserved).unwrap()).await.unwrap();

        assert!(store.trigger().take());
        assert_eq!(store.reservations().values().copied().collect::<Vec<_>>(), vec![100.0, 100.0]);
    }

    #[tokio::test]
    async fn test_reservation_never_lowers_link_cost() {
        let (topo, _fleet, mut store) = line();
        topo.set_link_usage(&LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1)), 300.0);
        let before = store.link_graph();

        let reserved = request().with_condition(RoutingCondition::reserved(200.0));
        let route = store.add_route(store.create_route(&reserved).unwrap()).await.unwrap();
        let after = store.link_graph();

        for link in topo.all_links() {
            let key = link.key();
            assert!(after.link_cost(&key).unwrap() >= before.link_cost(&key).unwrap());
        }
        for key in &route.via {
            assert!(after.link_cost(key).unwrap() >= 200.0);
        }
    }

    #[tokio::test]
    async fn test_del_route_releases_everything() {
        let (_topo, fleet, mut store) = line();
        let mut events = store.subscribe();
        let route = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();

        let deleted = store.del_route(route.cookie).await.unwrap();
        assert_eq!(deleted.cookie, route.cookie);
        assert_eq!(fleet.entry_count(), 0);
        assert!(store.cookies_on(&route.via[0]).is_empty());
        assert!(matches!(store.del_route(route.cookie).await, Err(RouteError::RouteNotFound(_))));

        assert!(matches!(events.recv().await.unwrap(), RouteEvent::Installed(_)));
        assert!(matches!(events.recv().await.unwrap(), RouteEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn test_bi_route_pairs_and_del_path() {
        let (_topo, fleet, mut store) = line();
        let (fwd, rev) = store.create_bi_route(&request()).await.unwrap();

        assert_eq!(store.route(fwd.cookie).and_then(|r| r.paired), Some(rev.cookie));
        assert_eq!(store.route(rev.cookie).and_then(|r| r.paired), Some(fwd.cookie));
        assert_eq!(rev.descriptor, PathDescriptor::mac(Some(mac(3)), mac(1)));
        assert_eq!(fleet.entry_count(), 6);

        let deleted = store.del_path(&fwd.descriptor).await;
        assert_eq!(deleted.len(), 2);
        assert!(store.is_empty());
        assert_eq!(fleet.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_bi_route_reverse_install_failure() {
        // 1 -> 2 directly, 2 -> 1 only through 4.
        let topo = Arc::new(StaticTopology::new());
        topo.add_link(Link::new(PortRef::new(1, 2), PortRef::new(2, 1), 1000.0, StatUnit::Byte));
        topo.add_link(Link::new(PortRef::new(2, 3), PortRef::new(4, 1), 1000.0, StatUnit::Byte));
        topo.add_link(Link::new(PortRef::new(4, 2), PortRef::new(1, 3), 1000.0, StatUnit::Byte));
        topo.add_host(Host::new(mac(1), None, PortRef::new(1, 10)));
        topo.add_host(Host::new(mac(2), None, PortRef::new(2, 10)));
        let fleet = Arc::new(MemoryFlowTable::new());
        let mut store = RouteStore::new(RouteStoreConfig::default(), topo, fleet.clone());
        fleet.fail_installs_on(Dpid(4));

        let request = RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(2)));
        let err = store.create_bi_route(&request).await.unwrap_err();

        assert!(matches!(
            err,
            RouteError::PartialBiRoute {
                direction: Direction::Reverse,
                ..
            }
        ));
        assert!(store.is_empty());
        assert_eq!(fleet.entry_count(), 0);
        assert!(!store.trigger().is_requested());
    }

    #[tokio::test]
    async fn test_mesh_bootstrap() {
        let (topo, fleet, mut store) = line();
        let host = Host::new(mac(3), None, PortRef::new(3, 10));

        let cookies = store.create_mesh(&host).await;
        assert_eq!(cookies.len(), topo.switches().len());

        let local = fleet.entries(Dpid(3));
        assert!(local.iter().any(|e| e.matches.in_port.is_none() && e.output_port() == Some(PortNo(10))));
        assert_eq!(fleet.entry_count(), 5);

        let again = store.create_mesh(&host).await;
        assert_eq!(again, cookies);

        let removed = store.remove_mesh(&host.mac).await;
        assert_eq!(removed.len(), 3);
        assert_eq!(fleet.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_mesh_delete_keeps_shared_entries() {
        let (_topo, fleet, mut store) = line();
        let host = Host::new(mac(3), None, PortRef::new(3, 10));
        let cookies = store.create_mesh(&host).await;
        assert_eq!(cookies.len(), 3);
        // The routes from switches 1 and 2 share their egress entry.
        assert_eq!(fleet.entry_count(), 5);

        let first = store.route(cookies[0]).cloned().unwrap();
        assert_eq!(store.slot_holders(Dpid(3), &first.entries[&Dpid(3)]), vec![cookies[0], cookies[1]]);

        store.del_route(cookies[0]).await.unwrap();
        let egress = fleet.entries(Dpid(3));
        assert!(egress
            .iter()
            .any(|e| e.matches.in_port == Some(PortNo(1)) && e.cookie == u64::from(cookies[1])));
        assert_eq!(fleet.entry_count(), 3);

        store.del_route(cookies[1]).await.unwrap();
        assert_eq!(fleet.entries(Dpid(3)).len(), 1);
        assert_eq!(fleet.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_request_shares_entries() {
        let (_topo, fleet, mut store) = line();
        let first = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();
        let second = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();
        assert_ne!(first.cookie, second.cookie);
        assert_eq!(fleet.entry_count(), 3);

        store.del_route(first.cookie).await.unwrap();
        assert_eq!(
            fleet.switches_with_cookie(u64::from(second.cookie)),
            BTreeSet::from([Dpid(1), Dpid(2), Dpid(3)])
        );
        assert_eq!(fleet.entry_count(), 3);

        store.del_route(second.cookie).await.unwrap();
        assert_eq!(fleet.entry_count(), 0);
    }

    /// 1 -> 2 directly and through 3, hosts on 1:10, 1:11 and 2:10.
    fn triangle() -> (Arc<MemoryFlowTable>, RouteStore) {
        let topo = Arc::new(StaticTopology::new());
        topo.add_duplex_link(PortRef::new(1, 2), PortRef::new(2, 1), 1000.0, StatUnit::Byte);
        topo.add_duplex_link(PortRef::new(1, 3), PortRef::new(3, 1), 1000.0, StatUnit::Byte);
        topo.add_duplex_link(PortRef::new(3, 2), PortRef::new(2, 3), 1000.0, StatUnit::Byte);
        topo.add_host(Host::new(mac(1), None, PortRef::new(1, 10)));
        topo.add_host(Host::new(mac(5), None, PortRef::new(1, 11)));
        topo.add_host(Host::new(mac(2), None, PortRef::new(2, 10)));
        let fleet = Arc::new(MemoryFlowTable::new());
        let store = RouteStore::new(RouteStoreConfig::default(), topo, fleet.clone());
        (fleet, store)
    }

    #[tokio::test]
    async fn test_replan_without_headroom_requests_optimization() {
        let (_fleet, mut store) = triangle();
        let direct = LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1));
        let detour = vec![
            LinkKey::new(PortRef::new(1, 3), PortRef::new(3, 1)),
            LinkKey::new(PortRef::new(3, 2), PortRef::new(2, 3)),
        ];

        let other = RouteRequest::new(PathDescriptor::mac(Some(mac(5)), mac(2)))
            .with_via(detour.clone())
            .with_condition(RoutingCondition::reserved(600.0));
        store.add_route(store.create_route(&other).unwrap()).await.unwrap();
        let moved = RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(2)))
            .with_via(vec![direct])
            .with_condition(RoutingCondition::reserved(600.0));
        let moved = store.add_route(store.create_route(&moved).unwrap()).await.unwrap();
        assert!(!store.trigger().is_requested());

        let recovery = store.handle_link_removed(&direct).await;
        assert_eq!(recovery.rerouted, vec![moved.cookie]);
        assert_eq!(store.route(moved.cookie).map(|r| r.via.clone()), Some(detour));
        assert!(store.trigger().take());
    }

    #[tokio::test]
    async fn test_bi_route_failure_keeps_existing_forward() {
        // 1 -> 2 directly, 2 -> 1 only through 4.
        let topo = Arc::new(StaticTopology::new());
        topo.add_link(Link::new(PortRef::new(1, 2), PortRef::new(2, 1), 1000.0, StatUnit::Byte));
        topo.add_link(Link::new(PortRef::new(2, 3), PortRef::new(4, 1), 1000.0, StatUnit::Byte));
        topo.add_link(Link::new(PortRef::new(4, 2), PortRef::new(1, 3), 1000.0, StatUnit::Byte));
        topo.add_host(Host::new(mac(1), None, PortRef::new(1, 10)));
        topo.add_host(Host::new(mac(2), None, PortRef::new(2, 10)));
        let fleet = Arc::new(MemoryFlowTable::new());
        let mut store = RouteStore::new(RouteStoreConfig::default(), topo, fleet.clone());

        let request = RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(2)));
        let forward = store.add_route(store.create_route(&request).unwrap()).await.unwrap();
        fleet.fail_installs_on(Dpid(4));

        let err = store
            .create_bi_route(&request.clone().with_cookie(forward.cookie))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::PartialBiRoute { .. }));

        assert_eq!(store.route(forward.cookie), Some(&forward));
        assert_eq!(store.len(), 1);
        assert_eq!(
            fleet.switches_with_cookie(u64::from(forward.cookie)),
            BTreeSet::from([Dpid(1), Dpid(2)])
        );
        assert_eq!(fleet.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_del_route_removes_every_entry() {
        let (_topo, fleet, mut store) = line();
        let route = store.add_route(store.create_route(&request()).unwrap()).await.unwrap();
        fleet.clear_operations();

        store.del_route(route.cookie).await.unwrap();
        let removes = fleet
            .operations()
            .into_iter()
            .filter(|op| matches!(op, FlowOp::Remove { .. }))
            .count();
        assert_eq!(removes, 3);
    }
}
