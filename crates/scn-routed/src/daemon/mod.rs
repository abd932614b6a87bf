//! Daemon orchestration.

mod routing_daemon;

pub use routing_daemon::{DaemonCommand, DaemonError, DaemonHandle, RoutingDaemon};
