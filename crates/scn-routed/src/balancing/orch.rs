//! BalancingOrch: the periodic traffic-engineering cycle.
//!
//! A cycle checks every reserved route against the measured link usage,
//! re-routes the ones that cannot get their reservation, moves best-effort
//! flows off busy paths, and reports the routes still short of their
//! reservation. Cycles never overlap: one that starts while another is still
//! running is skipped.

use super::check::{is_nuisance, violating_link};
use super::loads::LinkLoads;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::BalancingConfig;
use crate::flow_bw::{FlowBwAggregator, FlowBwSnapshot};
use crate::graph::GraphBuilder;
use crate::route::{OptimizeTrigger, Route, RouteStore};
use crate::topology::LinkKey;
use async_trait::async_trait;
use log::{debug, info, warn};
use scn_orch_common::Orch;
use scn_types::Cookie;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Receives the routes a cycle could not bring back within their
/// reservation.
pub trait BalancingCallbacks: Send + Sync {
    fn push_optimize_failure(&self, cookies: &[Cookie]);
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Reserved routes short of their reservation at the start of the cycle.
    pub violations: Vec<Cookie>,
    /// Violating routes moved onto a path with enough headroom.
    pub rerouted: Vec<Cookie>,
    /// Routes moved by the best-effort optimizer.
    pub optimized: Vec<Cookie>,
    /// Routes still violating at the end of the cycle.
    pub unresolved: Vec<Cookie>,
    pub optimizer_ran: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancingOrchStats {
    pub cycles: u64,
    pub skipped: u64,
    pub violations: u64,
    pub rerouted: u64,
    pub optimized: u64,
    pub failures_reported: u64,
}

struct HandlingGuard<'a>(&'a AtomicBool);

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BalancingOrch {
    config: BalancingConfig,
    store: Arc<Mutex<RouteStore>>,
    flows: Arc<RwLock<FlowBwAggregator>>,
    trigger: Arc<OptimizeTrigger>,
    callbacks: Option<Arc<dyn BalancingCallbacks>>,
    stats: BalancingOrchStats,
    running: AtomicBool,
    handling: AtomicBool,
    cycle_due: AtomicBool,
}

impl BalancingOrch {
    pub fn new(
        config: BalancingConfig,
        store: Arc<Mutex<RouteStore>>,
        flows: Arc<RwLock<FlowBwAggregator>>,
        trigger: Arc<OptimizeTrigger>,
    ) -> Self {
        Self {
            config,
            store,
            flows,
            trigger,
            callbacks: None,
            stats: BalancingOrchStats::default(),
            running: AtomicBool::new(true),
            handling: AtomicBool::new(false),
            cycle_due: AtomicBool::new(false),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn BalancingCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn config(&self) -> &BalancingConfig {
        &self.config
    }

    pub fn stats(&self) -> &BalancingOrchStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resumes cycles. Returns false if they were already running.
    pub fn start(&self) -> bool {
        let changed = !self.running.swap(true, Ordering::SeqCst);
        if changed {
            info!("BalancingOrch: started");
        }
        changed
    }

    /// Suspends cycles. Returns false if they were already stopped.
    pub fn stop(&self) -> bool {
        let changed = self.running.swap(false, Ordering::SeqCst);
        if changed {
            info!("BalancingOrch: stopped");
        }
        changed
    }

    /// Marks the periodic tick as elapsed.
    pub fn mark_cycle_due(&self) {
        self.cycle_due.store(true, Ordering::SeqCst);
    }

    /// Runs one cycle. Returns `None` if a cycle is already running.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        if self.handling.swap(true, Ordering::SeqCst) {
            debug!("BalancingOrch: previous cycle still running, skipping");
            return None;
        }
        let _handling = HandlingGuard(&self.handling);
        let started = Instant::now();
        info!("BalancingOrch: cycle started");

        let requested = self.trigger.take();
        let flows = self.flows.read().await.snapshot();
        let mut store = self.store.lock().await;
        let mut loads = LinkLoads::from_links(&store.topology().all_links());
        let mut report = CycleReport::default();

        let reserved: Vec<Cookie> = store
            .routes()
            .filter(|r| r.reservation() > 0.0 && !r.is_fixed())
            .map(|r| r.cookie)
            .collect();
        report.violations = self.check_reservations(&store, &reserved, &flows, &loads);
        debug!(
            "BalancingOrch: {} of {} reserved route(s) violating ({:.3}s)",
            report.violations.len(),
            reserved.len(),
            started.elapsed().as_secs_f64()
        );

        for cookie in &report.violations {
            if self.reroute_min_bw(&mut store, *cookie, &flows, &mut loads).await {
                report.rerouted.push(*cookie);
            }
        }

        if !report.violations.is_empty() || self.config.always_optimize || requested {
            report.optimized = self.optimize_flows(&mut store, &flows, &mut loads).await;
            report.optimizer_ran = true;
            debug!("BalancingOrch: optimizer finished ({:.3}s)", started.elapsed().as_secs_f64());
        }

        report.unresolved = self.check_reservations(&store, &report.violations, &flows, &loads);
        drop(store);

        if !report.unresolved.is_empty() && !self.trigger.is_requested() {
            self.report_failure(&report.unresolved);
        }

        info!(
            "BalancingOrch: cycle finished in {:.3}s: {} violating, {} rerouted, {} optimized, {} unresolved",
            started.elapsed().as_secs_f64(),
            report.violations.len(),
            report.rerouted.len(),
            report.optimized.len(),
            report.unresolved.len()
        );
        Some(report)
    }

    fn check_reservations(
        &self,
        store: &RouteStore,
        cookies: &[Cookie],
        flows: &FlowBwSnapshot,
        loads: &LinkLoads,
    ) -> Vec<Cookie> {
        cookies
            .iter()
            .copied()
            .filter(|cookie| {
                let Some(route) = store.route(*cookie) else {
                    return false;
                };
                let others = store.reservations_excluding(Some(*cookie));
                let flow = flows.bandwidth(*cookie).unwrap_or(0.0);
                violating_link(route, flow, loads, &others).is_some()
            })
            .collect()
    }

    fn search(&self, store: &RouteStore, route: &Route, loads: &LinkLoads, headroom: Option<f64>) -> Vec<LinkKey> {
        let links = store.topology().all_links();
        let switches = store.topology().switches();
        let reserved = store.reservations_excluding(Some(route.cookie));
        let usage = loads.used_map();

        let mut builder = GraphBuilder::new(&links)
            .switches(&switches)
            .reservations(&reserved)
            .usage(&usage);
        if let Some(bandwidth) = headroom {
            builder = builder.require_headroom(bandwidth);
        }
        builder
            .build()
            .shortest_path(route.endpoints.src_dpid, route.endpoints.dst.dpid)
    }

    /// Moves a violating route onto a path with room for its reservation.
    async fn reroute_min_bw(
        &self,
        store: &mut RouteStore,
        cookie: Cookie,
        flows: &FlowBwSnapshot,
        loads: &mut LinkLoads,
    ) -> bool {
        let Some(route) = store.route(cookie).cloned() else {
            return false;
        };
        if route.endpoints.is_local() {
            return false;
        }

        let via = self.search(store, &route, loads, Some(route.reservation()));
        if via.is_empty() {
            warn!(
                "BalancingOrch: no path with {:.2} B/s free for {}",
                route.reservation(),
                cookie
            );
            return false;
        }
        if via == route.via {
            debug!("BalancingOrch: {} already on the only suitable path", cookie);
            return false;
        }
        if is_nuisance(store, &route, &via, loads, flows) {
            debug!("BalancingOrch: re-routing {} would hurt another reservation", cookie);
            return false;
        }

        self.apply(store, &route, via, flows, loads).await
    }

    /// Moves best-effort flows, largest first, to less loaded paths.
    async fn optimize_flows(
        &self,
        store: &mut RouteStore,
        flows: &FlowBwSnapshot,
        loads: &mut LinkLoads,
    ) -> Vec<Cookie> {
        let mut moved = Vec::new();

        for (cookie, bw) in flows.by_bandwidth_desc() {
            if bw < self.config.min_significant_bw {
                continue;
            }
            let Some(route) = store.route(cookie).cloned() else {
                debug!("BalancingOrch: no route for flow {}", cookie);
                continue;
            };
            if route.is_fixed() || route.fabric_links().next().is_none() {
                continue;
            }

            let via = self.search(store, &route, loads, None);
            if via.is_empty() || via == route.via {
                continue;
            }

            let route_bw = loads.mean_used(route.fabric_links());
            let via_bw = loads.mean_used(&via);
            if route_bw <= via_bw {
                continue;
            }

            let new_peak = (route_bw - bw).max(via_bw + bw);
            let gain = route_bw - new_peak;
            if gain <= self.config.min_gain_ratio * route_bw {
                continue;
            }
            debug!(
                "BalancingOrch: {} ({:.2} B/s): route {:.2}, candidate {:.2}, gain {:.2}",
                cookie, bw, route_bw, via_bw, gain
            );

            if is_nuisance(store, &route, &via, loads, flows) {
                debug!("BalancingOrch: moving {} would hurt a reservation", cookie);
                continue;
            }
            if self.apply(store, &route, via, flows, loads).await {
                moved.push(cookie);
            }
        }
        moved
    }

    async fn apply(
        &self,
        store: &mut RouteStore,
        route: &Route,
        via: Vec<LinkKey>,
        flows: &FlowBwSnapshot,
        loads: &mut LinkLoads,
    ) -> bool {
        let request = route.replan_request().with_via(via);
        let result = match store.create_route(&request) {
            Ok(candidate) => store.add_route(candidate).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(updated) => {
                let bw = flows.bandwidth(route.cookie).unwrap_or(0.0);
                loads.shift(route.fabric_links(), updated.fabric_links(), bw);
                info!("BalancingOrch: moved {}", updated);
                true
            }
            Err(e) => {
                warn!("BalancingOrch: failed to move {}: {}", route.cookie, e);
                false
            }
        }
    }

    fn report_failure(&self, cookies: &[Cookie]) {
        warn!("BalancingOrch: reservation not respected for {:?}", cookies);

        audit_log!(AuditRecord::new(AuditCategory::TrafficEngineering, "BalancingOrch", "optimize_failure")
            .with_outcome(AuditOutcome::Failure)
            .with_object_type("route")
            .with_details(serde_json::json!({
                "cookies": cookies.iter().map(|c| c.get()).collect::<Vec<_>>(),
            }))
            .with_error("reservation not respected"));

        if let Some(callbacks) = &self.callbacks {
            callbacks.push_optimize_failure(cookies);
        }
    }
}

#[async_trait]
impl Orch for BalancingOrch {
    fn name(&self) -> &str {
        "BalancingOrch"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn do_task(&mut self) {
        self.cycle_due.store(false, Ordering::SeqCst);

        match self.run_cycle().await {
            Some(report) => {
                self.stats.cycles += 1;
                self.stats.violations += report.violations.len() as u64;
                self.stats.rerouted += report.rerouted.len() as u64;
                self.stats.optimized += report.optimized.len() as u64;
                if !report.unresolved.is_empty() {
                    self.stats.failures_reported += 1;
                }
            }
            None => self.stats.skipped += 1,
        }
    }

    fn has_pending_tasks(&self) -> bool {
        self.is_running()
            && ((self.config.automatic_mode && self.cycle_due.load(Ordering::SeqCst))
                || self.trigger.is_requested())
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut dump = Vec::new();
        if self.cycle_due.load(Ordering::SeqCst) {
            dump.push("BALANCING: cycle due".to_string());
        }
        if self.trigger.is_requested() {
            dump.push("BALANCING: optimization requested".to_string());
        }
        dump
    }
}
