//! Common orchestration abstractions for the SCN controller.
//!
//! This crate provides the building blocks the routing daemon is assembled
//! from:
//!
//! - [`Orch`]: base trait for a unit of work driven by the daemon loop
//! - [`Consumer`]: a per-key deduplicating task queue
//! - [`MembershipMap`]: key to member-set map that never creates entries
//!   implicitly
//!
//! # Architecture
//!
//! 1. Collaborators (topology discovery, statistics polling, path requests)
//!    push work into an Orch's consumers
//! 2. The daemon loop calls `do_task()` on every Orch with pending work, in
//!    priority order
//! 3. Orchs translate the work into route store calls and flow-table updates
//!
//! # Example
//!
//! ```ignore
//! use scn_orch_common::{Consumer, Operation, Orch};
//!
//! struct HostOrch {
//!     hosts: Consumer<MacAddress, Host>,
//! }
//!
//! #[async_trait]
//! impl Orch for HostOrch {
//!     fn name(&self) -> &str { "HostOrch" }
//!
//!     async fn do_task(&mut self) {
//!         for task in self.hosts.drain() {
//!             match task.op {
//!                 Operation::Set => { /* learned */ }
//!                 Operation::Del => { /* gone */ }
//!             }
//!         }
//!     }
//! }
//! ```

mod consumer;
mod membership;
mod orch;

pub use consumer::{Consumer, KeyOpValue, Operation};
pub use membership::{MembershipError, MembershipMap};
pub use orch::Orch;
