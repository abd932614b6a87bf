//! SCN routing daemon - route lifecycle and traffic engineering.
//!
//! The routing engine of an SDN controller for OpenFlow fleets. It computes
//! bandwidth-aware paths over the discovered switch topology, installs them
//! as cookie-tagged flow entries, keeps them alive across link failures and
//! periodically re-balances traffic so that bandwidth reservations are
//! honoured.
//!
//! # Architecture
//!
//! ```text
//! [Topology] ──┐                         ┌──> [FlowTableApi] ──> [switches]
//!              ├──> [RoutingDaemon] ─────┤
//! [DaemonHandle]┘      │                 └──> RouteEvent ──> [FlowBwOrch]
//!                      ↓
//!       RouteOrch (0) / FlowBwOrch (10) / BalancingOrch (20)
//! ```
//!
//! # Key Components
//!
//! - [`route::RouteStore`]: route planning, cookie allocation, diff-based
//!   programming and link-failure recovery
//! - [`graph`]: bandwidth-weighted link graph and shortest-path search
//! - [`flow_bw`]: per-route bandwidth from flow counters
//! - [`balancing`]: reservation checks and rebalancing
//! - [`daemon::RoutingDaemon`]: event loop and orch coordination

pub mod audit;
pub mod balancing;
pub mod config;
pub mod daemon;
pub mod flow_bw;
pub mod graph;
pub mod route;
pub mod topology;

pub use config::RoutingConfig;
pub use daemon::{DaemonCommand, DaemonHandle, RoutingDaemon};
pub use route::{PathDescriptor, Route, RouteError, RouteRequest, RouteStore, RoutingCondition};
pub use topology::{Host, Link, LinkEvent, LinkKey, StaticTopology, Topology};
