//! Traffic engineering over the installed routes.
//!
//! Each cycle works on a snapshot of the measured link usage and route
//! rates, then:
//!
//! 1. flags reserved routes whose links cannot give them their reservation,
//! 2. tries to move each flagged route onto a path with enough headroom,
//! 3. moves best-effort flows (largest first) onto less loaded paths when
//!    the peak utilisation drops by a meaningful margin,
//! 4. re-checks the flagged routes and reports those still short.
//!
//! No move is made that would leave another reserved route short.

mod check;
mod loads;
mod orch;

pub use check::{is_nuisance, violating_link};
pub use loads::{LinkLoad, LinkLoads};
pub use orch::{BalancingCallbacks, BalancingOrch, BalancingOrchStats, CycleReport};
