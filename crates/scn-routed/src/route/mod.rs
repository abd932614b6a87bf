//! Route store: planning, committing and tearing down routes.
//!
//! A route is planned with [`RouteStore::create_route`], which resolves the
//! endpoints and a via but touches nothing, and committed with
//! [`RouteStore::add_route`], which allocates a cookie (or diffs against the
//! live route holding the candidate's cookie) and programs the fleet.
//! Every commit and deletion is published as a [`RouteEvent`].

mod cookie;
mod entries;
mod error;
mod events;
mod orch;
mod slots;
mod store;
mod types;

pub use cookie::CookieAllocator;
pub use entries::build_entries;
pub use error::{Direction, Result, RouteError};
pub use events::{OptimizeTrigger, RouteEvent};
pub use orch::{PathTask, RouteOrch};
pub use slots::{Claim, Release, SlotTable};
pub use store::{LinkRecovery, RouteStore};
pub use types::{
    reservation_of, Endpoints, IpPath, MacPath, PathDescriptor, Route, RouteCandidate,
    RouteRequest, RoutingCondition,
};
