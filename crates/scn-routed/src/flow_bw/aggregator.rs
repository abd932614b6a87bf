use super::segment::ScnFlow;
use crate::config::FlowBwConfig;
use crate::route::{Route, RouteEvent};
use log::{debug, trace};
use scn_openflow::FlowStats;
use scn_types::{Cookie, Dpid};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Per-route rates frozen at one instant, in bytes/s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowBwSnapshot {
    flows: BTreeMap<Cookie, f64>,
}

impl FlowBwSnapshot {
    pub fn bandwidth(&self, cookie: Cookie) -> Option<f64> {
        self.flows.get(&cookie).copied()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Flows from the fastest to the slowest; equal rates by cookie.
    pub fn by_bandwidth_desc(&self) -> Vec<(Cookie, f64)> {
        let mut flows: Vec<_> = self.flows.iter().map(|(c, bw)| (*c, *bw)).collect();
        flows.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        flows
    }
}

impl FromIterator<(Cookie, f64)> for FlowBwSnapshot {
    fn from_iter<I: IntoIterator<Item = (Cookie, f64)>>(iter: I) -> Self {
        Self {
            flows: iter.into_iter().collect(),
        }
    }
}

/// Turns raw per-switch counters into per-route rates.
#[derive(Debug, Default)]
pub struct FlowBwAggregator {
    config: FlowBwConfig,
    flows: BTreeMap<Cookie, ScnFlow>,
}

impl FlowBwAggregator {
    pub fn new(config: FlowBwConfig) -> Self {
        Self {
            config,
            flows: BTreeMap::new(),
        }
    }

    /// Folds in one statistics reply from `dpid`.
    ///
    /// Entries with a cookie outside the route range belong to other
    /// applications and are skipped. Returns the number of samples used.
    pub fn ingest(&mut self, dpid: Dpid, stats: &[FlowStats]) -> usize {
        let mut used = 0;
        for stat in stats {
            let Ok(cookie) = Cookie::try_from(stat.cookie) else {
                trace!("FlowBw: ignoring foreign cookie {:#x} on {}", stat.cookie, dpid);
                continue;
            };

            let flow = self.flows.entry(cookie).or_insert_with(|| ScnFlow::new(cookie));
            flow.update(dpid, stat);
            used += 1;

            if flow.bw > self.config.report_threshold {
                debug!("FlowBw: {}", flow);
            }
        }
        used
    }

    /// Keeps segments in line with route changes.
    pub fn on_route_event(&mut self, event: &RouteEvent) {
        match event {
            RouteEvent::Installed(_) => {}
            RouteEvent::Changed { old, new } => {
                let Some(flow) = self.flows.get_mut(&new.cookie) else {
                    return;
                };
                let gone: BTreeSet<Dpid> = old.switches().filter(|d| !new.entries.contains_key(d)).collect();
                if !gone.is_empty() {
                    debug!("FlowBw: {} left {:?}", new.cookie, gone);
                    flow.retain_switches(|dpid| !gone.contains(&dpid));
                }
            }
            RouteEvent::Deleted(route) => {
                if self.flows.remove(&route.cookie).is_some() {
                    debug!("FlowBw: dropped flow {}", route.cookie);
                }
            }
        }
    }

    /// Realigns every flow with the live routes, for when route events
    /// were missed: flows without a route are dropped and segments on
    /// switches a route no longer crosses are forgotten.
    pub fn resync<'a>(&mut self, routes: impl IntoIterator<Item = &'a Route>) {
        let live: BTreeMap<Cookie, BTreeSet<Dpid>> =
            routes.into_iter().map(|r| (r.cookie, r.switches().collect())).collect();
        let before = self.flows.len();
        self.flows.retain(|cookie, flow| match live.get(cookie) {
            Some(switches) => {
                flow.retain_switches(|dpid| switches.contains(&dpid));
                true
            }
            None => false,
        });
        debug!("FlowBw: resynced, {} stale flow(s) dropped", before - self.flows.len());
    }

    /// Forgets every segment measured on a switch that went away.
    pub fn drop_switch(&mut self, dpid: Dpid) {
        for flow in self.flows.values_mut() {
            flow.retain_switches(|d| d != dpid);
        }
    }

    pub fn flow(&self, cookie: Cookie) -> Option<&ScnFlow> {
        self.flows.get(&cookie)
    }

    pub fn bandwidth(&self, cookie: Cookie) -> Option<f64> {
        self.flows.get(&cookie).map(|f| f.bw)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn snapshot(&self) -> FlowBwSnapshot {
        self.flows.iter().map(|(c, f)| (*c, f.bw)).collect()
    }
}

impl fmt::Display for FlowBwAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flow in self.flows.values() {
            writeln!(f, "{}", flow)?;
        }
        Ok(())
    }
}
