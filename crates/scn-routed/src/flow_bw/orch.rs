//! FlowBwOrch: feeds switch statistics into the shared aggregator.
//!
//! Route events are applied before any queued statistics, and the orch
//! reports pending work while events wait, so a route change reaches the
//! aggregator in the same daemon pass, ahead of the balancing cycle.

use super::aggregator::FlowBwAggregator;
use crate::route::{RouteEvent, RouteStore};
use async_trait::async_trait;
use log::{debug, warn};
use scn_openflow::FlowStats;
use scn_orch_common::{Consumer, KeyOpValue, Operation, Orch};
use scn_types::Dpid;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{Mutex, RwLock};

pub struct FlowBwOrch {
    stats: Consumer<Dpid, Vec<FlowStats>>,
    events: broadcast::Receiver<RouteEvent>,
    aggregator: Arc<RwLock<FlowBwAggregator>>,
    routes: Option<Arc<Mutex<RouteStore>>>,
}

impl FlowBwOrch {
    pub fn new(aggregator: Arc<RwLock<FlowBwAggregator>>, events: broadcast::Receiver<RouteEvent>) -> Self {
        Self {
            stats: Consumer::new("FLOW_STATS"),
            events,
            aggregator,
            routes: None,
        }
    }

    /// Route store to resync from when route events were missed.
    pub fn with_route_store(mut self, store: Arc<Mutex<RouteStore>>) -> Self {
        self.routes = Some(store);
        self
    }

    pub fn aggregator(&self) -> &Arc<RwLock<FlowBwAggregator>> {
        &self.aggregator
    }

    /// Queues a statistics reply. A newer reply from the same switch replaces
    /// one still waiting.
    pub fn enqueue_stats(&mut self, dpid: Dpid, stats: Vec<FlowStats>) {
        self.stats.add_to_sync([KeyOpValue::set(dpid, stats)]);
    }

    pub fn enqueue_switch_down(&mut self, dpid: Dpid) {
        self.stats.add_to_sync([KeyOpValue::del(dpid)]);
    }

    /// Drains queued route events, flagging whether some were lost.
    fn drain_events(&mut self) -> (Vec<RouteEvent>, bool) {
        let mut events = Vec::new();
        let mut lagged = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("FlowBwOrch: missed {} route event(s)", missed);
                    lagged = true;
                }
            }
        }
        (events, lagged)
    }

    async fn pump_events(&mut self) {
        let (events, lagged) = self.drain_events();
        if events.is_empty() && !lagged {
            return;
        }

        let mut aggregator = self.aggregator.write().await;
        for event in &events {
            aggregator.on_route_event(event);
        }
        if !lagged {
            return;
        }
        drop(aggregator);

        let Some(store) = &self.routes else {
            warn!("FlowBwOrch: no route store to resync from");
            return;
        };
        let routes: Vec<_> = store.lock().await.routes().cloned().collect();
        self.aggregator.write().await.resync(&routes);
    }
}

#[async_trait]
impl Orch for FlowBwOrch {
    fn name(&self) -> &str {
        "FlowBwOrch"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn do_task(&mut self) {
        self.pump_events().await;

        let aggregator = self.aggregator.clone();
        let mut aggregator = aggregator.write().await;

        for task in self.stats.drain() {
            match (task.op, task.value) {
                (Operation::Set, Some(stats)) => {
                    let used = aggregator.ingest(task.key, &stats);
                    debug!("FlowBwOrch: {} of {} sample(s) from {} used", used, stats.len(), task.key);
                }
                (Operation::Del, _) => aggregator.drop_switch(task.key),
                (Operation::Set, None) => warn!("FlowBwOrch: stats from {} queued without a value", task.key),
            }
        }
    }

    fn has_pending_tasks(&self) -> bool {
        self.stats.has_pending() || !self.events.is_empty()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.stats.dump()
    }
}
