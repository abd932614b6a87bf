use scn_openflow::FlowError;
use scn_types::{Cookie, Dpid};
use std::fmt;
use thiserror::Error;

/// Leg of a bidirectional route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Error type for route store operations.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no path from {src} to {dst}")]
    Unreachable { src: Dpid, dst: Dpid },

    #[error("cannot resolve {end} of {descriptor}")]
    UnresolvedEndpoint {
        descriptor: String,
        end: &'static str,
    },

    #[error("invalid route request: {0}")]
    InvalidRequest(String),

    #[error("all {} cookies are in use", Cookie::SPACE)]
    CookieExhausted,

    #[error("no route with cookie {0}")]
    RouteNotFound(Cookie),

    #[error("{direction} leg of bidirectional route failed: {source}")]
    PartialBiRoute {
        direction: Direction,
        source: Box<RouteError>,
    },

    #[error("flow entry on {dpid} is held by {holder} with different actions")]
    SlotConflict { dpid: Dpid, holder: Cookie },

    #[error("switch {dpid} rejected flow entry: {source}")]
    Install { dpid: Dpid, source: FlowError },
}

impl RouteError {
    pub fn install(dpid: Dpid, source: FlowError) -> Self {
        RouteError::Install { dpid, source }
    }

    pub fn partial(direction: Direction, source: RouteError) -> Self {
        RouteError::PartialBiRoute {
            direction,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouteError>;
