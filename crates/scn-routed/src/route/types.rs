//! Route identity and state.

use crate::topology::LinkKey;
use scn_openflow::{FlowEntry, FlowMatch, ETH_TYPE_IPV4};
use scn_types::{Cookie, Dpid, MacAddress, PortNo, PortRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Layer-2 flow identity.
///
/// A missing source matches traffic from any sender; mesh routes use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacPath {
    pub src: Option<MacAddress>,
    pub dst: MacAddress,
    pub vlan: Option<u16>,
}

/// IPv4 flow identity, optionally narrowed by protocol, ToS and ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpPath {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    #[serde(default)]
    pub protocol: Option<u8>,
    #[serde(default)]
    pub tos: Option<u8>,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default)]
    pub dst_port: Option<u16>,
}

impl IpPath {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            src,
            dst,
            protocol: None,
            tos: None,
            src_port: None,
            dst_port: None,
        }
    }

    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = Some(tos);
        self
    }

    pub fn with_ports(mut self, protocol: u8, src_port: u16, dst_port: u16) -> Self {
        self.protocol = Some(protocol);
        self.src_port = Some(src_port);
        self.dst_port = Some(dst_port);
        self
    }
}

/// Immutable identity of the traffic a route carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PathDescriptor {
    Mac(MacPath),
    Ip(IpPath),
}

impl PathDescriptor {
    pub fn mac(src: Option<MacAddress>, dst: MacAddress) -> Self {
        PathDescriptor::Mac(MacPath {
            src,
            dst,
            vlan: None,
        })
    }

    pub fn ip(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        PathDescriptor::Ip(IpPath::new(src, dst))
    }

    /// The opposite direction of the same flow, or `None` when the source is
    /// a wildcard.
    pub fn reverse(&self) -> Option<PathDescriptor> {
        match self {
            PathDescriptor::Mac(p) => p.src.map(|src| {
                PathDescriptor::Mac(MacPath {
                    src: Some(p.dst),
                    dst: src,
                    vlan: p.vlan,
                })
            }),
            PathDescriptor::Ip(p) => Some(PathDescriptor::Ip(IpPath {
                src: p.dst,
                dst: p.src,
                protocol: p.protocol,
                tos: p.tos,
                src_port: p.dst_port,
                dst_port: p.src_port,
            })),
        }
    }

    pub fn is_opposite(&self, other: &PathDescriptor) -> bool {
        self.reverse().as_ref() == Some(other)
    }

    /// Match shared by every entry of a route, without the ingress port.
    pub fn to_match(&self) -> FlowMatch {
        match self {
            PathDescriptor::Mac(p) => FlowMatch {
                dl_src: p.src,
                dl_dst: Some(p.dst),
                dl_vlan: p.vlan,
                ..Default::default()
            },
            PathDescriptor::Ip(p) => FlowMatch {
                dl_type: Some(ETH_TYPE_IPV4),
                nw_src: Some(p.src),
                nw_dst: Some(p.dst),
                nw_proto: p.protocol,
                nw_tos: p.tos,
                tp_src: p.src_port,
                tp_dst: p.dst_port,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for PathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathDescriptor::Mac(p) => {
                match p.src {
                    Some(src) => write!(f, "{} -> {}", src, p.dst)?,
                    None => write!(f, "* -> {}", p.dst)?,
                }
                if let Some(vlan) = p.vlan {
                    write!(f, " vlan {}", vlan)?;
                }
                Ok(())
            }
            PathDescriptor::Ip(p) => {
                write!(f, "{}", p.src)?;
                if let Some(port) = p.src_port {
                    write!(f, ":{}", port)?;
                }
                write!(f, " -> {}", p.dst)?;
                if let Some(port) = p.dst_port {
                    write!(f, ":{}", port)?;
                }
                if let Some(tos) = p.tos {
                    write!(f, " tos {}", tos)?;
                }
                Ok(())
            }
        }
    }
}

/// Constraints attached to a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingCondition {
    /// Reserved throughput in bytes/s.
    #[serde(default)]
    pub bandwidth: Option<f64>,
    /// Never moved by the optimizer.
    #[serde(default)]
    pub fixed: bool,
}

impl RoutingCondition {
    pub fn reserved(bandwidth: f64) -> Self {
        Self {
            bandwidth: Some(bandwidth),
            fixed: false,
        }
    }

    pub fn pinned() -> Self {
        Self {
            bandwidth: None,
            fixed: true,
        }
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// Condition for the reverse leg of a bidirectional route.
    pub fn mirror(&self) -> Self {
        Self {
            bandwidth: None,
            fixed: self.fixed,
        }
    }
}

/// Reserved bytes/s of an optional condition.
pub fn reservation_of(condition: Option<&RoutingCondition>) -> f64 {
    condition.and_then(|c| c.bandwidth).unwrap_or(0.0)
}

/// Request for a route, handed to `RouteStore::create_route`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub descriptor: PathDescriptor,
    pub condition: Option<RoutingCondition>,
    /// Links to use instead of searching.
    pub via: Option<Vec<LinkKey>>,
    /// Ingress switch, when not the switch the source host sits on.
    pub src_dpid: Option<Dpid>,
    pub in_port: Option<PortNo>,
    /// Egress port, when the destination is a gateway rather than a host.
    pub egress: Option<PortRef>,
    pub dst_mac: Option<MacAddress>,
    /// Cookie of the route this request updates.
    pub cookie: Option<Cookie>,
}

impl RouteRequest {
    pub fn new(descriptor: PathDescriptor) -> Self {
        Self {
            descriptor,
            condition: None,
            via: None,
            src_dpid: None,
            in_port: None,
            egress: None,
            dst_mac: None,
            cookie: None,
        }
    }

    pub fn with_condition(mut self, condition: RoutingCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_via(mut self, via: Vec<LinkKey>) -> Self {
        self.via = Some(via);
        self
    }

    /// Enter the fleet at `dpid` from any port.
    pub fn from_switch(mut self, dpid: Dpid) -> Self {
        self.src_dpid = Some(dpid);
        self.in_port = None;
        self
    }

    /// Enter the fleet through `port`.
    pub fn from_port(mut self, port: PortRef) -> Self {
        self.src_dpid = Some(port.dpid);
        self.in_port = Some(port.port);
        self
    }

    /// Leave the fleet through `port`, rewriting the destination MAC to
    /// `dst_mac` if given.
    pub fn to_port(mut self, port: PortRef, dst_mac: Option<MacAddress>) -> Self {
        self.egress = Some(port);
        self.dst_mac = dst_mac;
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn reservation(&self) -> f64 {
        reservation_of(self.condition.as_ref())
    }

    /// Request for the opposite direction.
    ///
    /// Explicit endpoints swap sides and an explicit via is walked backwards.
    /// Returns `None` when the descriptor has no reverse.
    pub fn mirror(&self) -> Option<RouteRequest> {
        let descriptor = self.descriptor.reverse()?;
        let mut mirror = RouteRequest::new(descriptor);
        mirror.condition = self.condition.map(|c| c.mirror());
        mirror.via = self
            .via
            .as_ref()
            .map(|via| via.iter().rev().map(LinkKey::reversed).collect());

        if let Some(gateway) = self.egress {
            mirror = mirror.from_port(gateway);
        }
        if let (Some(dpid), Some(port)) = (self.src_dpid, self.in_port) {
            let src_mac = match self.descriptor {
                PathDescriptor::Mac(p) => p.src,
                PathDescriptor::Ip(_) => None,
            };
            mirror = mirror.to_port(PortRef::new(dpid, port), src_mac);
        }
        Some(mirror)
    }
}

/// Resolved ends of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub src_dpid: Dpid,
    /// Access port at the ingress switch; `None` matches any port.
    pub in_port: Option<PortNo>,
    pub dst: PortRef,
    pub dst_mac: MacAddress,
}

impl Endpoints {
    pub fn is_local(&self) -> bool {
        self.src_dpid == self.dst.dpid
    }
}

/// A planned route that has not been committed.
///
/// Entries carry no cookie until `RouteStore::add_route` stamps them.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    pub cookie: Option<Cookie>,
    pub descriptor: PathDescriptor,
    pub condition: Option<RoutingCondition>,
    pub via: Vec<LinkKey>,
    pub entries: BTreeMap<Dpid, FlowEntry>,
    pub endpoints: Endpoints,
}

impl RouteCandidate {
    pub fn reservation(&self) -> f64 {
        reservation_of(self.condition.as_ref())
    }
}

/// Re-commits a route exactly as it stands.
impl From<Route> for RouteCandidate {
    fn from(route: Route) -> Self {
        Self {
            cookie: Some(route.cookie),
            descriptor: route.descriptor,
            condition: route.condition,
            via: route.via,
            entries: route.entries,
            endpoints: route.endpoints,
        }
    }
}

/// A committed route.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub cookie: Cookie,
    pub descriptor: PathDescriptor,
    pub condition: Option<RoutingCondition>,
    /// Links from the ingress switch to the egress switch.
    pub via: Vec<LinkKey>,
    /// One entry per switch on the via plus the egress switch.
    pub entries: BTreeMap<Dpid, FlowEntry>,
    /// Cookie of the reverse leg of a bidirectional route.
    pub paired: Option<Cookie>,
    pub endpoints: Endpoints,
}

impl Route {
    pub fn reservation(&self) -> f64 {
        reservation_of(self.condition.as_ref())
    }

    pub fn is_fixed(&self) -> bool {
        self.condition.is_some_and(|c| c.fixed)
    }

    pub fn switches(&self) -> impl Iterator<Item = Dpid> + '_ {
        self.entries.keys().copied()
    }

    /// Links of the via that exist in the topology.
    pub fn fabric_links(&self) -> impl Iterator<Item = &LinkKey> + '_ {
        self.via.iter().filter(|l| !l.is_local())
    }

    pub fn traverses(&self, key: &LinkKey) -> bool {
        self.via.contains(key)
    }

    /// Request that re-plans this route from the same endpoints under the
    /// same cookie.
    pub fn replan_request(&self) -> RouteRequest {
        let mut request = RouteRequest::new(self.descriptor);
        request.condition = self.condition;
        request.src_dpid = Some(self.endpoints.src_dpid);
        request.in_port = self.endpoints.in_port;
        request
            .with_cookie(self.cookie)
            .to_port(self.endpoints.dst, Some(self.endpoints.dst_mac))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} via [", self.cookie, self.descriptor)?;
        for (i, link) in self.via.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", link)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_descriptor_reverse() {
        let ip = PathDescriptor::Ip(
            IpPath::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)).with_ports(6, 1000, 80),
        );
        let rev = ip.reverse().unwrap();
        match rev {
            PathDescriptor::Ip(p) => {
                assert_eq!(p.src, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(p.src_port, Some(80));
                assert_eq!(p.dst_port, Some(1000));
            }
            PathDescriptor::Mac(_) => panic!("kind changed"),
        }
        assert!(ip.is_opposite(&rev));
        assert_eq!(rev.reverse(), Some(ip));

        assert!(PathDescriptor::mac(None, mac(1)).reverse().is_none());
    }

    #[test]
    fn test_descriptor_match() {
        let m = PathDescriptor::Ip(
            IpPath::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)).with_tos(32),
        )
        .to_match();
        assert_eq!(m.dl_type, Some(ETH_TYPE_IPV4));
        assert_eq!(m.nw_tos, Some(32));
        assert_eq!(m.in_port, None);

        let m = PathDescriptor::mac(Some(mac(1)), mac(2)).to_match();
        assert_eq!(m.dl_src, Some(mac(1)));
        assert_eq!(m.dl_dst, Some(mac(2)));
        assert_eq!(m.dl_type, None);
    }

    #[test]
    fn test_descriptor_serde() {
        let d = PathDescriptor::ip(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let json = serde_json::to_value(d).unwrap();
        assert_eq!(json["kind"], "ip");
        let back: PathDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_mirror_request() {
        let via = vec![
            LinkKey::new(PortRef::new(1, 2), PortRef::new(2, 1)),
            LinkKey::new(PortRef::new(2, 2), PortRef::new(3, 1)),
        ];
        let request = RouteRequest::new(PathDescriptor::mac(Some(mac(1)), mac(3)))
            .with_condition(RoutingCondition::reserved(500.0).with_fixed(true))
            .with_via(via)
            .to_port(PortRef::new(3, 9), Some(mac(3)));

        let mirror = request.mirror().unwrap();
        assert_eq!(mirror.descriptor, PathDescriptor::mac(Some(mac(3)), mac(1)));
        assert_eq!(mirror.condition, Some(RoutingCondition::pinned()));
        assert_eq!(mirror.src_dpid, Some(Dpid(3)));
        assert_eq!(mirror.in_port, Some(PortNo(9)));
        assert_eq!(mirror.egress, None);
        assert_eq!(
            mirror.via.unwrap(),
            vec![
                LinkKey::new(PortRef::new(3, 1), PortRef::new(2, 2)),
                LinkKey::new(PortRef::new(2, 1), PortRef::new(1, 2)),
            ]
        );
    }

    #[test]
    fn test_condition_helpers() {
        assert_eq!(reservation_of(None), 0.0);
        assert_eq!(reservation_of(Some(&RoutingCondition::reserved(12.0))), 12.0);
        assert!(RoutingCondition::pinned().fixed);
    }
}
