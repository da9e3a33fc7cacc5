//! Routing protocol election (spec §4.7): elects the one backend routing
//! protocol that every router currently in the flood unanimously advertises
//! supporting, breaking ties by summed preference.
//!
//! Grounded in `hncp_routing_run`'s election loop
//! (`examples/original_source/src/hncp_routing.c`): the `>=` comparison
//! below is copied verbatim rather than tightened to `>`, so an exact
//! preference tie is won by the larger protocol id. This is a deliberate
//! preservation, not an oversight (see `DESIGN.md`).

use std::collections::HashSet;

use crate::node::FloodView;

/// Protocol id reserved for "no backend elected, run the BFS fallback".
pub const ROUTING_NONE: u8 = 0;

/// The outcome of one election pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Election {
    /// The elected protocol id, or [`ROUTING_NONE`] for the BFS fallback.
    pub protocol: u8,
    /// The winning protocol's summed preference across every supporting
    /// router. Meaningless when `protocol == ROUTING_NONE`.
    pub preference: u64,
}

/// Runs one election pass over every node currently visible through
/// `flood`. `max_protocol` is the exclusive upper bound on protocol ids
/// (`MAX` in spec terms); ids `1..max_protocol` are real backends, `0` is
/// reserved for the fallback.
pub fn elect(flood: &impl FloodView, max_protocol: u8) -> Election {
    let max_protocol = max_protocol.max(1);
    let mut supported = vec![0u64; max_protocol as usize];
    let mut preference = vec![0u64; max_protocol as usize];
    let mut router_count = 0u64;

    for node in flood.nodes() {
        let mut seen = HashSet::new();
        let mut has_routing = false;
        for (protocol, pref) in node.routing_protocols() {
            has_routing = true;
            if (protocol as usize) < supported.len() && seen.insert(protocol) {
                supported[protocol as usize] += 1;
                preference[protocol as usize] += pref as u64;
            }
        }
        if has_routing {
            router_count += 1;
        }
    }

    let mut current_proto = ROUTING_NONE;
    let mut current_pref = 0u64;
    for i in 1..max_protocol {
        if supported[i as usize] == router_count && preference[i as usize] >= current_pref {
            current_proto = i;
            current_pref = preference[i as usize];
        }
    }

    Election {
        protocol: current_proto,
        preference: current_pref,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeTlv, TestFloodView};
    use crate::rid::RouterId;

    fn view_with_protocol(rids: &[u64], protocol: u8, preference: u8) -> TestFloodView {
        let mut view = TestFloodView::new(RouterId::new(rids[0]), vec![]);
        for &r in rids {
            if r != rids[0] {
                view.add_node(RouterId::new(r), false);
            }
            view.node_mut(RouterId::new(r))
                .unwrap()
                .tlvs
                .push(NodeTlv::RoutingProtocol { protocol, preference });
        }
        view
    }

    #[test]
    fn unanimous_support_elects_the_protocol() {
        let view = view_with_protocol(&[1, 2, 3], 2, 10);
        let result = elect(&view, 8);
        assert_eq!(result.protocol, 2);
        assert_eq!(result.preference, 30);
    }

    #[test]
    fn non_unanimous_support_falls_back() {
        let mut view = TestFloodView::new(RouterId::new(1), vec![]);
        view.node_mut(RouterId::new(1))
            .unwrap()
            .tlvs
            .push(NodeTlv::RoutingProtocol { protocol: 2, preference: 10 });
        view.add_node(RouterId::new(2), false);
        view.node_mut(RouterId::new(2))
            .unwrap()
            .tlvs
            .push(NodeTlv::RoutingProtocol { protocol: 5, preference: 10 });
        // Node 2 is a participating router, but not for protocol 2.
        let result = elect(&view, 8);
        assert_eq!(result.protocol, ROUTING_NONE);
    }

    #[test]
    fn tie_in_preference_favors_larger_protocol_id() {
        let mut view = TestFloodView::new(RouterId::new(1), vec![]);
        view.node_mut(RouterId::new(1)).unwrap().tlvs.extend([
            NodeTlv::RoutingProtocol { protocol: 2, preference: 10 },
            NodeTlv::RoutingProtocol { protocol: 3, preference: 10 },
        ]);
        let result = elect(&view, 8);
        assert_eq!(result.protocol, 3);
    }
}
