//! Per-route bandwidth measured from flow-entry counters.
//!
//! Every switch a route crosses reports byte counters for the route's entry
//! (matched by cookie). Each report yields a per-switch rate; the route's
//! rate is the mean over its switches.

mod aggregator;
mod orch;
mod segment;

pub use aggregator::{FlowBwAggregator, FlowBwSnapshot};
pub use orch::FlowBwOrch;
pub use segment::{ScnFlow, SegmentBw};
