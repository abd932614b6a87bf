//! RoutingDaemon implementation.
//!
//! The daemon owns the shared routing state and the three orchs working on
//! it, and runs the event loop that feeds them:
//! - commands from collaborators (path requests, link and host events,
//!   statistics replies) arriving over a [`DaemonHandle`]
//! - the balancing period
//! - the statistics poll period
//! - "optimize now" requests
//!
//! After every event the orchs with pending work run in priority order.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::balancing::{BalancingCallbacks, BalancingOrch};
use crate::config::RoutingConfig;
use crate::flow_bw::{FlowBwAggregator, FlowBwOrch};
use crate::route::{OptimizeTrigger, PathDescriptor, PathTask, RouteOrch, RouteStore};
use crate::topology::{Host, LinkEvent, Topology};
use log::{debug, info, warn};
use scn_openflow::{FlowStatsReply, FlowTableApi};
use scn_orch_common::Orch;
use scn_types::{Dpid, MacAddress};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Work handed to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonCommand {
    Path(PathTask),
    RemovePath(PathDescriptor),
    Stats(FlowStatsReply),
    SwitchDown(Dpid),
    Link(LinkEvent),
    HostUp(Host),
    HostDown(MacAddress),
    StartBalancing,
    StopBalancing,
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DaemonError {
    #[error("routing daemon is not running")]
    Closed,
}

/// Cloneable handle used by collaborators to reach a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    sender: mpsc::Sender<DaemonCommand>,
    trigger: Arc<OptimizeTrigger>,
}

impl DaemonHandle {
    pub async fn send(&self, command: DaemonCommand) -> Result<(), DaemonError> {
        self.sender.send(command).await.map_err(|_| DaemonError::Closed)
    }

    pub async fn request_path(&self, task: PathTask) -> Result<(), DaemonError> {
        self.send(DaemonCommand::Path(task)).await
    }

    pub async fn remove_path(&self, descriptor: PathDescriptor) -> Result<(), DaemonError> {
        self.send(DaemonCommand::RemovePath(descriptor)).await
    }

    pub async fn report_stats(&self, reply: FlowStatsReply) -> Result<(), DaemonError> {
        self.send(DaemonCommand::Stats(reply)).await
    }

    pub async fn link_event(&self, event: LinkEvent) -> Result<(), DaemonError> {
        self.send(DaemonCommand::Link(event)).await
    }

    pub async fn host_up(&self, host: Host) -> Result<(), DaemonError> {
        self.send(DaemonCommand::HostUp(host)).await
    }

    pub async fn host_down(&self, mac: MacAddress) -> Result<(), DaemonError> {
        self.send(DaemonCommand::HostDown(mac)).await
    }

    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        self.send(DaemonCommand::Shutdown).await
    }

    /// Forces a balancing cycle without waiting for the next period.
    pub fn optimize_now(&self) {
        self.trigger.request();
    }
}

enum LoopEvent {
    Command(Option<DaemonCommand>),
    BalancingTick,
    StatsTick,
    OptimizeRequested,
}

pub struct RoutingDaemon {
    config: RoutingConfig,
    topology: Arc<dyn Topology>,
    flow_table: Arc<dyn FlowTableApi>,
    store: Arc<Mutex<RouteStore>>,
    flows: Arc<RwLock<FlowBwAggregator>>,
    trigger: Arc<OptimizeTrigger>,
    route_orch: RouteOrch,
    flow_bw_orch: FlowBwOrch,
    balancing_orch: BalancingOrch,
    commands: mpsc::Receiver<DaemonCommand>,
    sender: mpsc::Sender<DaemonCommand>,
    running: bool,
}

impl RoutingDaemon {
    pub fn new(config: RoutingConfig, topology: Arc<dyn Topology>, flow_table: Arc<dyn FlowTableApi>) -> Self {
        let store = RouteStore::new(config.route.clone(), topology.clone(), flow_table.clone());
        let events = store.subscribe();
        let trigger = store.trigger();
        let store = Arc::new(Mutex::new(store));
        let flows = Arc::new(RwLock::new(FlowBwAggregator::new(config.flow_bw.clone())));

        let route_orch = RouteOrch::new(store.clone());
        let flow_bw_orch = FlowBwOrch::new(flows.clone(), events).with_route_store(store.clone());
        let balancing_orch = BalancingOrch::new(config.balancing.clone(), store.clone(), flows.clone(), trigger.clone());
        let orchs: [&dyn Orch; 3] = [&route_orch, &flow_bw_orch, &balancing_orch];
        for orch in orchs {
            Self::announce(orch);
        }

        let (sender, commands) = mpsc::channel(config.daemon.command_capacity.max(1));
        Self {
            config,
            topology,
            flow_table,
            store,
            flows,
            trigger,
            route_orch,
            flow_bw_orch,
            balancing_orch,
            commands,
            sender,
            running: false,
        }
    }

    fn announce(orch: &dyn Orch) {
        info!("Registering {} with priority {}", orch.name(), orch.priority());
        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "RoutingDaemon",
            format!("register_orch: {}", orch.name()),
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(orch.name())
        .with_object_type("orch_module")
        .with_details(serde_json::json!({
            "priority": orch.priority(),
        })));
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            sender: self.sender.clone(),
            trigger: self.trigger.clone(),
        }
    }

    pub fn store(&self) -> Arc<Mutex<RouteStore>> {
        self.store.clone()
    }

    pub fn flows(&self) -> Arc<RwLock<FlowBwAggregator>> {
        self.flows.clone()
    }

    pub fn balancing(&self) -> &BalancingOrch {
        &self.balancing_orch
    }

    pub fn set_balancing_callbacks(&mut self, callbacks: Arc<dyn BalancingCallbacks>) {
        self.balancing_orch.set_callbacks(callbacks);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Runs the event loop until a shutdown command arrives.
    pub async fn run(&mut self) {
        info!("Starting RoutingDaemon event loop");
        self.running = true;

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "RoutingDaemon", "event_loop_started")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "balancing_period_secs": self.config.balancing.period_secs,
                "stats_poll_interval_secs": self.config.daemon.stats_poll_interval_secs,
                "automatic_mode": self.config.balancing.automatic_mode,
            })));

        let balancing_period = self.config.balancing.period();
        let mut balancing = interval_at(Instant::now() + balancing_period, balancing_period);
        balancing.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let poll_period = self.config.daemon.stats_poll_interval();
        let mut polling = interval_at(Instant::now() + poll_period, poll_period);
        polling.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let trigger = self.trigger.clone();

        while self.running {
            let event = tokio::select! {
                command = self.commands.recv() => LoopEvent::Command(command),
                _ = balancing.tick() => LoopEvent::BalancingTick,
                _ = polling.tick() => LoopEvent::StatsTick,
                _ = trigger.notified() => LoopEvent::OptimizeRequested,
            };

            match event {
                LoopEvent::Command(Some(command)) => self.handle_command(command),
                LoopEvent::Command(None) => self.stop(),
                LoopEvent::BalancingTick => self.balancing_orch.mark_cycle_due(),
                LoopEvent::StatsTick => self.poll_stats().await,
                LoopEvent::OptimizeRequested => debug!("RoutingDaemon: optimization requested"),
            }

            self.process_orchs().await;
        }

        info!("RoutingDaemon event loop stopped");
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "RoutingDaemon", "event_loop_stopped")
            .with_outcome(AuditOutcome::Success));
    }

    /// Stops the event loop after the current iteration.
    pub fn stop(&mut self) {
        info!("Stopping RoutingDaemon");
        audit_log!(AuditRecord::new(AuditCategory::AdminAction, "RoutingDaemon", "stop_requested")
            .with_outcome(AuditOutcome::Success));
        self.running = false;
    }

    fn handle_command(&mut self, command: DaemonCommand) {
        match command {
            DaemonCommand::Path(task) => self.route_orch.enqueue_path(task),
            DaemonCommand::RemovePath(descriptor) => self.route_orch.enqueue_path_removal(descriptor),
            DaemonCommand::Stats(reply) => self.flow_bw_orch.enqueue_stats(reply.dpid, reply.stats),
            DaemonCommand::SwitchDown(dpid) => self.flow_bw_orch.enqueue_switch_down(dpid),
            DaemonCommand::Link(event) => self.route_orch.enqueue_link_event(event),
            DaemonCommand::HostUp(host) => self.route_orch.enqueue_host(host),
            DaemonCommand::HostDown(mac) => self.route_orch.enqueue_host_removal(mac),
            DaemonCommand::StartBalancing => {
                if self.balancing_orch.start() {
                    audit_log!(AuditRecord::new(AuditCategory::AdminAction, "RoutingDaemon", "balancing_started")
                        .with_outcome(AuditOutcome::Success));
                }
            }
            DaemonCommand::StopBalancing => {
                if self.balancing_orch.stop() {
                    audit_log!(AuditRecord::new(AuditCategory::AdminAction, "RoutingDaemon", "balancing_stopped")
                        .with_outcome(AuditOutcome::Success));
                }
            }
            DaemonCommand::Shutdown => self.stop(),
        }
    }

    /// Asks every switch for its flow counters and queues the replies.
    async fn poll_stats(&mut self) {
        for dpid in self.topology.switches() {
            match self.flow_table.flow_stats(dpid).await {
                Ok(reply) => self.flow_bw_orch.enqueue_stats(reply.dpid, reply.stats),
                Err(e) => warn!("RoutingDaemon: statistics from {} unavailable: {}", dpid, e),
            }
        }
    }

    fn orchs_mut(&mut self) -> [&mut dyn Orch; 3] {
        let mut orchs: [&mut dyn Orch; 3] = [
            &mut self.route_orch,
            &mut self.flow_bw_orch,
            &mut self.balancing_orch,
        ];
        orchs.sort_by_key(|o| o.priority());
        orchs
    }

    /// Runs every orch with pending work, in priority order.
    pub async fn process_orchs(&mut self) {
        for orch in self.orchs_mut() {
            if orch.has_pending_tasks() {
                debug!("Processing tasks for {}", orch.name());
                orch.do_task().await;
            }
        }
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("RoutingDaemon running: {}", self.running));

        let orchs: [&dyn Orch; 3] = [&self.route_orch, &self.flow_bw_orch, &self.balancing_orch];
        for orch in orchs {
            lines.push(format!(
                "  [{:3}] {} - {} pending",
                orch.priority(),
                orch.name(),
                orch.dump_pending_tasks().len()
            ));
        }
        lines
    }
}
