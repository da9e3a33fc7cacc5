//! The BFS fallback routing algorithm (spec §4.7), grounded in
//! `hncp_routing_run`'s BFS loop
//! (`examples/original_source/src/hncp_routing.c`): breadth-first over the
//! bidirectional neighbor graph, inheriting next-hop/interface from each
//! node's BFS predecessor, installing one default route per non-mapped
//! external delegation and one internal route per assigned prefix.
//!
//! Simplification from the original (noted in `DESIGN.md`): next-hop
//! discovery at the root uses the neighbor's own advertised
//! [`crate::node::NodeTlv::RouterAddress`] record rather than a
//! separately tracked per-neighbor "last seen address" — this crate's
//! [`crate::iface::Interface`] does not model per-neighbor link state, only
//! one `last_seen_address`/`last_seen_address4` per interface.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::iface::{InterfaceFlags, InterfaceRegistry, Route};
use crate::node::FloodView;
use crate::prefix::{Prefix, IPV4_IN_IPV6_PREFIX};
use crate::rid::RouterId;

#[derive(Debug, Clone, Default)]
struct BfsState {
    next_hop: Option<Ipv6Addr>,
    next_hop4: Option<Ipv4Addr>,
    ifname: Option<String>,
    hopcount: u32,
}

fn is_v4_mapped(addr: Ipv6Addr) -> bool {
    IPV4_IN_IPV6_PREFIX.contains(&Prefix::new(u128::from(addr), 128))
}

fn to_ipv4(addr: Ipv6Addr) -> Ipv4Addr {
    let octets = addr.octets();
    Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15])
}

fn link_ifname(ifaces: &InterfaceRegistry, link_id: u32) -> Option<String> {
    ifaces
        .iter()
        .find(|i| i.link_id.map_or(false, |l| l.bits == link_id))
        .map(|i| i.ifname.clone())
}

fn has_ipv4_address(ifaces: &InterfaceRegistry, ifname: &str) -> bool {
    ifaces
        .get(ifname)
        .map_or(false, |i| i.last_seen_address4.is_some())
}

/// Runs the BFS fallback once, installing the resulting route set through a
/// single [`crate::iface::RouteTransaction`].
pub fn run(flood: &impl FloodView, ifaces: &mut InterfaceRegistry) {
    let self_rid = flood.self_rid();
    let mut state: HashMap<RouterId, BfsState> = HashMap::new();
    let mut visited: HashSet<RouterId> = HashSet::new();
    let mut queue: VecDeque<RouterId> = VecDeque::new();

    state.insert(self_rid, BfsState::default());
    visited.insert(self_rid);
    queue.push_back(self_rid);

    let mut txn = ifaces.update_routes();
    let mut have_v4_uplink = false;

    while let Some(c_rid) = queue.pop_front() {
        let c_state = state.get(&c_rid).cloned().unwrap_or_default();
        let is_root = c_rid == self_rid;
        let Some(c_node) = flood.node_by_rid(c_rid) else {
            continue;
        };

        for (neighbor_rid, local_link_id, neighbor_link_id) in c_node.neighbors() {
            if neighbor_rid == self_rid || visited.contains(&neighbor_rid) {
                continue;
            }
            let Some(n_node) = flood.node_by_rid(neighbor_rid) else {
                continue;
            };
            let bidirectional = n_node
                .neighbors()
                .any(|(r, l, nl)| r == c_rid && l == neighbor_link_id && nl == local_link_id);
            if !bidirectional {
                continue;
            }

            let (next_hop, next_hop4, ifname) = if is_root {
                let ifname = link_ifname(ifaces, local_link_id);
                let addr = n_node.router_address(neighbor_link_id);
                let next_hop = addr.filter(|a| !is_v4_mapped(*a));
                let next_hop4 = addr.filter(|a| is_v4_mapped(*a)).map(|a| to_ipv4(a));
                (next_hop, next_hop4, ifname)
            } else {
                (c_state.next_hop, c_state.next_hop4, c_state.ifname.clone())
            };

            if next_hop.is_none() || ifname.is_none() {
                continue;
            }

            visited.insert(neighbor_rid);
            state.insert(
                neighbor_rid,
                BfsState {
                    next_hop,
                    next_hop4,
                    ifname,
                    hopcount: c_state.hopcount + 1,
                },
            );
            queue.push_back(neighbor_rid);
        }

        if is_root {
            continue;
        }

        for dp in c_node.external_delegated_prefixes() {
            if dp.prefix.is_ipv4() {
                if let (Some(hop4), Some(ifname)) = (c_state.next_hop4, &c_state.ifname) {
                    if !have_v4_uplink && has_ipv4_address(ifaces, ifname) {
                        txn.add_route(Route {
                            prefix: dp.prefix,
                            next_hop: None,
                            next_hop4: Some(hop4),
                            ifname: ifname.clone(),
                            metric: c_state.hopcount,
                        });
                        have_v4_uplink = true;
                    }
                }
            } else if let (Some(hop), Some(ifname)) = (c_state.next_hop, &c_state.ifname) {
                txn.add_route(Route {
                    prefix: dp.prefix,
                    next_hop: Some(hop),
                    next_hop4: None,
                    ifname: ifname.clone(),
                    metric: c_state.hopcount,
                });
            }
        }

        for (link_id, prefix, _priority, _flags) in c_node.assigned_prefixes() {
            // Skip routes for prefixes on the link we're already directly
            // connected to through (the one-hop, non-adhoc shared-link case).
            let on_connected_link = c_state.hopcount == 1
                && c_state.ifname.as_deref() == link_ifname(ifaces, link_id).as_deref()
                && c_state.ifname.as_deref().map_or(false, |name| {
                    ifaces
                        .get(name)
                        .map_or(false, |i| !i.flags.contains(InterfaceFlags::ADHOC))
                });
            if on_connected_link {
                continue;
            }

            let metric = (c_state.hopcount << 8) | link_id;
            if prefix.is_ipv4() {
                if let (Some(hop4), Some(ifname)) = (c_state.next_hop4, &c_state.ifname) {
                    if has_ipv4_address(ifaces, ifname) {
                        txn.add_route(Route {
                            prefix,
                            next_hop: None,
                            next_hop4: Some(hop4),
                            ifname: ifname.clone(),
                            metric,
                        });
                    }
                }
            } else if let (Some(hop), Some(ifname)) = (c_state.next_hop, &c_state.ifname) {
                txn.add_route(Route {
                    prefix,
                    next_hop: Some(hop),
                    next_hop4: None,
                    ifname: ifname.clone(),
                    metric,
                });
            }
        }
    }

    txn.commit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeTlv, TestFloodView};

    #[test]
    fn installs_internal_route_through_two_hop_neighbor() {
        let mut ifaces = InterfaceRegistry::new();
        let iface = ifaces.ifup("eth0", Some("h0".into()));
        iface.link_id = Some(crate::iface::LinkId { bits: 1, mask_bits: 8 });

        let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
        flood.add_node(RouterId::new(2), false);
        {
            let me = flood.node_mut(RouterId::new(1)).unwrap();
            me.tlvs.push(NodeTlv::Neighbor {
                neighbor_rid: RouterId::new(2),
                local_link_id: 1,
                neighbor_link_id: 7,
            });
        }
        {
            let peer = flood.node_mut(RouterId::new(2)).unwrap();
            peer.tlvs.push(NodeTlv::Neighbor {
                neighbor_rid: RouterId::new(1),
                local_link_id: 7,
                neighbor_link_id: 1,
            });
            peer.tlvs.push(NodeTlv::RouterAddress {
                link_id: 7,
                address: "2001:db8::2".parse().unwrap(),
            });
            peer.tlvs.push(NodeTlv::AssignedPrefix {
                link_id: 99,
                prefix: Prefix::pton("2001:db8:f::/64").unwrap(),
                priority: 2,
                flags: 0,
            });
        }

        run(&flood, &mut ifaces);

        let routes = ifaces.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].prefix, Prefix::pton("2001:db8:f::/64").unwrap());
        assert_eq!(routes[0].ifname, "eth0");
        assert_eq!(routes[0].next_hop, Some("2001:db8::2".parse().unwrap()));
    }

    #[test]
    fn unreachable_neighbor_without_bidirectional_link_is_skipped() {
        let mut ifaces = InterfaceRegistry::new();
        ifaces.ifup("eth0", Some("h0".into()));
        let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
        flood.add_node(RouterId::new(2), false);
        {
            let me = flood.node_mut(RouterId::new(1)).unwrap();
            me.tlvs.push(NodeTlv::Neighbor {
                neighbor_rid: RouterId::new(2),
                local_link_id: 1,
                neighbor_link_id: 7,
            });
        }
        // Node 2 never advertises the reverse adjacency.
        run(&flood, &mut ifaces);
        assert!(ifaces.routes().is_empty());
    }
}
