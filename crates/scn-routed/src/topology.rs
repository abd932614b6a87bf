//! Topology collaborator interface.
//!
//! Link and host discovery live outside the routing engine. The engine reads
//! the current view through [`Topology`] and is told about link changes with
//! [`LinkEvent`]s. [`StaticTopology`] is an in-memory implementation used by
//! the daemon's simulation mode and by tests; it can be loaded from YAML:
//!
//! ```yaml
//! switches: [1, 2, 3]
//! links:
//!   - a: "1:1"
//!     b: "2:1"
//!     capacity: 1000000
//!     unit: byte
//! hosts:
//!   - mac: "00:00:00:00:00:01"
//!     ip: 10.0.0.1
//!     attach: "1:10"
//! ```

use scn_types::{Dpid, MacAddress, ParseError, PortRef, StatUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Identity of a directed link: traffic leaves `src` and arrives at `dst`.
///
/// A key whose two ends sit on the same switch is a local hop binding two
/// access ports; it never appears in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub src: PortRef,
    pub dst: PortRef,
}

impl LinkKey {
    pub fn new(src: PortRef, dst: PortRef) -> Self {
        Self { src, dst }
    }

    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }

    pub fn is_local(&self) -> bool {
        self.src.dpid == self.dst.dpid
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// A directed inter-switch link with its live telemetry.
///
/// `used_bw` and `max_bw` are expressed in `stat_unit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub src: PortRef,
    pub dst: PortRef,
    pub used_bw: f64,
    pub max_bw: f64,
    pub stat_unit: StatUnit,
}

impl Link {
    pub fn new(src: PortRef, dst: PortRef, max_bw: f64, stat_unit: StatUnit) -> Self {
        Self {
            src,
            dst,
            used_bw: 0.0,
            max_bw,
            stat_unit,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.src, self.dst)
    }

    /// Measured throughput in bytes/s.
    pub fn used_bytes(&self) -> f64 {
        self.stat_unit.to_bytes_per_sec(self.used_bw)
    }

    /// Theoretical capacity in bytes/s.
    pub fn capacity_bytes(&self) -> f64 {
        self.stat_unit.to_bytes_per_sec(self.max_bw)
    }
}

/// An end host and the switch port it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub mac: MacAddress,
    pub ip: Option<Ipv4Addr>,
    pub attach: PortRef,
}

impl Host {
    pub fn new(mac: MacAddress, ip: Option<Ipv4Addr>, attach: PortRef) -> Self {
        Self { mac, ip, attach }
    }
}

/// Link change notification from the discovery collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Added(LinkKey),
    Removed(LinkKey),
}

impl LinkEvent {
    pub fn key(&self) -> LinkKey {
        match self {
            LinkEvent::Added(key) | LinkEvent::Removed(key) => *key,
        }
    }
}

/// Read access to the discovered network.
pub trait Topology: Send + Sync {
    fn all_links(&self) -> Vec<Link>;

    fn link(&self, key: &LinkKey) -> Option<Link>;

    /// Returns a link from `src` to `dst`, preferring the lowest source port
    /// when the switches are connected more than once.
    fn link_between(&self, src: Dpid, dst: Dpid) -> Option<Link>;

    fn switches(&self) -> Vec<Dpid>;

    fn has_switch(&self, dpid: Dpid) -> bool;

    fn host_by_mac(&self, mac: &MacAddress) -> Option<Host>;

    fn host_by_ip(&self, ip: &Ipv4Addr) -> Option<Host>;
}

/// Error type for loading a static topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse topology: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid topology: {0}")]
    Invalid(#[from] ParseError),
}

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    switches: Vec<Dpid>,
    #[serde(default)]
    links: Vec<LinkDef>,
    #[serde(default)]
    hosts: Vec<HostDef>,
}

#[derive(Debug, Deserialize)]
struct LinkDef {
    a: String,
    b: String,
    capacity: f64,
    #[serde(default)]
    used: f64,
    #[serde(default)]
    unit: StatUnit,
    /// Only create the a->b direction.
    #[serde(default)]
    directed: bool,
}

#[derive(Debug, Deserialize)]
struct HostDef {
    mac: MacAddress,
    ip: Option<Ipv4Addr>,
    attach: String,
}

#[derive(Debug, Default)]
struct TopologyState {
    switches: BTreeSet<Dpid>,
    links: BTreeMap<LinkKey, Link>,
    hosts: BTreeMap<MacAddress, Host>,
}

/// In-memory topology.
#[derive(Debug, Default)]
pub struct StaticTopology {
    state: RwLock<TopologyState>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, TopologyError> {
        let file: TopologyFile = serde_yaml::from_str(text)?;
        let topology = Self::new();

        for dpid in file.switches {
            topology.add_switch(dpid);
        }
        for def in file.links {
            let a: PortRef = def.a.parse()?;
            let b: PortRef = def.b.parse()?;
            let mut forward = Link::new(a, b, def.capacity, def.unit);
            forward.used_bw = def.used;
            if !def.directed {
                let mut backward = Link::new(b, a, def.capacity, def.unit);
                backward.used_bw = def.used;
                topology.add_link(backward);
            }
            topology.add_link(forward);
        }
        for def in file.hosts {
            let attach: PortRef = def.attach.parse()?;
            topology.add_host(Host::new(def.mac, def.ip, attach));
        }

        Ok(topology)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    fn read(&self) -> RwLockReadGuard<'_, TopologyState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopologyState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_switch(&self, dpid: Dpid) {
        self.write().switches.insert(dpid);
    }

    /// Adds or replaces a directed link; both end switches are registered.
    pub fn add_link(&self, link: Link) {
        let mut state = self.write();
        state.switches.insert(link.src.dpid);
        state.switches.insert(link.dst.dpid);
        state.links.insert(link.key(), link);
    }

    /// Adds both directions between `a` and `b` with the same capacity.
    pub fn add_duplex_link(&self, a: PortRef, b: PortRef, max_bw: f64, unit: StatUnit) {
        self.add_link(Link::new(a, b, max_bw, unit));
        self.add_link(Link::new(b, a, max_bw, unit));
    }

    pub fn remove_link(&self, key: &LinkKey) -> Option<Link> {
        self.write().links.remove(key)
    }

    /// Updates the measured usage of a link, in the link's own unit.
    ///
    /// Returns false if the link is unknown.
    pub fn set_link_usage(&self, key: &LinkKey, used_bw: f64) -> bool {
        match self.write().links.get_mut(key) {
            Some(link) => {
                link.used_bw = used_bw;
                true
            }
            None => false,
        }
    }

    pub fn add_host(&self, host: Host) {
        let mut state = self.write();
        state.switches.insert(host.attach.dpid);
        state.hosts.insert(host.mac, host);
    }

    pub fn remove_host(&self, mac: &MacAddress) -> Option<Host> {
        self.write().hosts.remove(mac)
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.read().hosts.values().cloned().collect()
    }
}

impl Topology for StaticTopology {
    fn all_links(&self) -> Vec<Link> {
        self.read().links.values().cloned().collect()
    }

    fn link(&self, key: &LinkKey) -> Option<Link> {
        self.read().links.get(key).cloned()
    }

    fn link_between(&self, src: Dpid, dst: Dpid) -> Option<Link> {
        // Keys are ordered by source port, so the first match has the lowest.
        self.read()
            .links
            .values()
            .find(|l| l.src.dpid == src && l.dst.dpid == dst)
            .cloned()
    }

    fn switches(&self) -> Vec<Dpid> {
        self.read().switches.iter().copied().collect()
    }

    fn has_switch(&self, dpid: Dpid) -> bool {
        self.read().switches.contains(&dpid)
    }

    fn host_by_mac(&self, mac: &MacAddress) -> Option<Host> {
        self.read().hosts.get(mac).cloned()
    }

    fn host_by_ip(&self, ip: &Ipv4Addr) -> Option<Host> {
        self.read()
            .hosts
            .values()
            .find(|h| h.ip.as_ref() == Some(ip))
            .cloned()
    }
}
