//! Flow-table entry model.

use scn_types::{Dpid, MacAddress, PortNo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Priority given to entries when the caller does not choose one.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;

/// Packet match. `None` fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowMatch {
    pub in_port: Option<PortNo>,
    pub dl_src: Option<MacAddress>,
    pub dl_dst: Option<MacAddress>,
    pub dl_vlan: Option<u16>,
    pub dl_type: Option<u16>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl FlowMatch {
    pub fn with_in_port(mut self, port: Option<PortNo>) -> Self {
        self.in_port = port;
        self
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(v) = self.in_port {
            fields.push(format!("in_port={}", v));
        }
        if let Some(v) = self.dl_src {
            fields.push(format!("dl_src={}", v));
        }
        if let Some(v) = self.dl_dst {
            fields.push(format!("dl_dst={}", v));
        }
        if let Some(v) = self.dl_vlan {
            fields.push(format!("dl_vlan={}", v));
        }
        if let Some(v) = self.dl_type {
            fields.push(format!("dl_type=0x{:04x}", v));
        }
        if let Some(v) = self.nw_src {
            fields.push(format!("nw_src={}", v));
        }
        if let Some(v) = self.nw_dst {
            fields.push(format!("nw_dst={}", v));
        }
        if let Some(v) = self.nw_proto {
            fields.push(format!("nw_proto={}", v));
        }
        if let Some(v) = self.nw_tos {
            fields.push(format!("nw_tos={}", v));
        }
        if let Some(v) = self.tp_src {
            fields.push(format!("tp_src={}", v));
        }
        if let Some(v) = self.tp_dst {
            fields.push(format!("tp_dst={}", v));
        }
        if fields.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", fields.join(","))
        }
    }
}

/// Forwarding action, applied in list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowAction {
    Output(PortNo),
    SetDlDst(MacAddress),
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowAction::Output(port) => write!(f, "output:{}", port),
            FlowAction::SetDlDst(mac) => write!(f, "mod_dl_dst:{}", mac),
        }
    }
}

/// A flow-table entry as installed on one switch.
///
/// Two entries address the same table slot when match and priority are
/// equal; that is what a strict removal keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEntry {
    pub cookie: u64,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub matches: FlowMatch,
    pub actions: Vec<FlowAction>,
}

impl FlowEntry {
    pub fn new(matches: FlowMatch, actions: Vec<FlowAction>) -> Self {
        Self {
            cookie: 0,
            priority: OFP_DEFAULT_PRIORITY,
            idle_timeout: 0,
            hard_timeout: 0,
            matches,
            actions,
        }
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeouts(mut self, idle: u16, hard: u16) -> Self {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    /// Returns true if `other` occupies the same table slot.
    pub fn same_slot(&self, other: &FlowEntry) -> bool {
        self.priority == other.priority && self.matches == other.matches
    }

    /// Returns true if the entries differ at most in their cookie.
    pub fn same_behaviour(&self, other: &FlowEntry) -> bool {
        self.same_slot(other)
            && self.actions == other.actions
            && self.idle_timeout == other.idle_timeout
            && self.hard_timeout == other.hard_timeout
    }

    /// Port the entry forwards to, if it has an output action.
    pub fn output_port(&self) -> Option<PortNo> {
        self.actions.iter().find_map(|a| match a {
            FlowAction::Output(port) => Some(*port),
            _ => None,
        })
    }
}

impl fmt::Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions: Vec<String> = self.actions.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "cookie={} priority={} {} actions={}",
            self.cookie,
            self.priority,
            self.matches,
            actions.join(",")
        )
    }
}

/// Per-entry counters from a flow statistics reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    /// Seconds since the entry was installed.
    pub duration_sec: u64,
}

impl FlowStats {
    pub fn new(cookie: u64, packet_count: u64, byte_count: u64, duration_sec: u64) -> Self {
        Self {
            cookie,
            packet_count,
            byte_count,
            duration_sec,
        }
    }
}

/// All entry counters a single switch reported in one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatsReply {
    pub dpid: Dpid,
    pub stats: Vec<FlowStats>,
}
