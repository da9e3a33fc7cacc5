//! The read-only node/TLV view over the flooded database.
//!
//! The Trickle flooding layer that actually maintains this database is out
//! of scope; [`FloodView`] is the seam it would be injected through. Unlike
//! the raw byte format in [`crate::tlv`] (kept only for the one TLV kind we
//! ourselves originate), everything a node publishes arrives here already
//! decoded into [`NodeTlv`] — exactly what a real flooding layer implies by
//! "this spec consumes its node/TLV view".

use std::net::Ipv6Addr;

use crate::prefix::Prefix;
use crate::rid::RouterId;
use crate::time::Time;

/// A delegated-prefix record nested inside an [`NodeTlv::ExternalConnection`]
/// TLV.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegatedPrefixRecord {
    /// The delegated prefix itself.
    pub prefix: Prefix,
    /// Absolute expiry; the record is stale once `now >= valid_until`.
    pub valid_until: Time,
    /// Absolute preferred-lifetime expiry, `<= valid_until`.
    pub preferred_until: Time,
    /// Opaque DHCPv6 options to forward to PD clients under this prefix.
    pub dhcp_opts: Vec<u8>,
}

/// A semantically decoded TLV as exposed by the flooding layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTlv {
    /// Routing-protocol support advertisement.
    RoutingProtocol {
        /// Advertised protocol id.
        protocol: u8,
        /// Advertiser's preference, `0..256`.
        preference: u8,
    },
    /// A bidirectional neighbor adjacency.
    Neighbor {
        /// The RID of the neighboring router.
        neighbor_rid: RouterId,
        /// This node's link id for the adjacency.
        local_link_id: u32,
        /// The neighbor's link id for the adjacency.
        neighbor_link_id: u32,
    },
    /// An address this node can be reached at on a given link.
    RouterAddress {
        /// Link id the address belongs to.
        link_id: u32,
        /// The address itself (v6, possibly IPv4-mapped).
        address: Ipv6Addr,
    },
    /// A prefix this node claims on a given link.
    AssignedPrefix {
        /// Link id the assignment applies to.
        link_id: u32,
        /// The assigned prefix.
        prefix: Prefix,
        /// Advertiser's priority for this assignment.
        priority: u8,
        /// Opaque assignment flags (e.g. authoritative bit).
        flags: u8,
    },
    /// An uplink connection, carrying the delegated prefixes received there.
    ExternalConnection {
        /// Delegated prefixes received on this uplink.
        delegated: Vec<DelegatedPrefixRecord>,
    },
    /// Any TLV kind this crate doesn't interpret, preserved verbatim.
    Other(crate::tlv::Tlv),
}

/// A node in the flooded topology: either this router (`is_self`) or a peer.
#[derive(Debug, Clone)]
pub struct Node {
    /// This node's router identifier.
    pub rid: RouterId,
    /// True iff this is the local router's own node.
    pub is_self: bool,
    /// All TLVs this node currently publishes.
    pub tlvs: Vec<NodeTlv>,
}

impl Node {
    /// Creates an empty node.
    pub fn new(rid: RouterId, is_self: bool) -> Node {
        Node {
            rid,
            is_self,
            tlvs: Vec::new(),
        }
    }

    /// Iterates this node's routing-protocol support records.
    pub fn routing_protocols(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.tlvs.iter().filter_map(|t| match t {
            NodeTlv::RoutingProtocol { protocol, preference } => Some((*protocol, *preference)),
            _ => None,
        })
    }

    /// Iterates this node's neighbor adjacencies.
    pub fn neighbors(&self) -> impl Iterator<Item = (RouterId, u32, u32)> + '_ {
        self.tlvs.iter().filter_map(|t| match t {
            NodeTlv::Neighbor {
                neighbor_rid,
                local_link_id,
                neighbor_link_id,
            } => Some((*neighbor_rid, *local_link_id, *neighbor_link_id)),
            _ => None,
        })
    }

    /// Finds this node's router-address record for `link_id`, if any.
    pub fn router_address(&self, link_id: u32) -> Option<Ipv6Addr> {
        self.tlvs.iter().find_map(|t| match t {
            NodeTlv::RouterAddress { link_id: l, address } if *l == link_id => Some(*address),
            _ => None,
        })
    }

    /// Iterates this node's assigned-prefix records.
    pub fn assigned_prefixes(&self) -> impl Iterator<Item = (u32, Prefix, u8, u8)> + '_ {
        self.tlvs.iter().filter_map(|t| match t {
            NodeTlv::AssignedPrefix {
                link_id,
                prefix,
                priority,
                flags,
            } => Some((*link_id, *prefix, *priority, *flags)),
            _ => None,
        })
    }

    /// Iterates the delegated prefixes received on this node's uplinks.
    pub fn external_delegated_prefixes(&self) -> impl Iterator<Item = &DelegatedPrefixRecord> {
        self.tlvs.iter().flat_map(|t| match t {
            NodeTlv::ExternalConnection { delegated } => delegated.iter(),
            _ => [].iter(),
        })
    }
}

/// The read-only seam the routing and PA-core algorithms are driven through.
/// A real implementation backs this with the flooding layer's live database;
/// tests back it with [`TestFloodView`].
pub trait FloodView {
    /// This router's own RID.
    fn self_rid(&self) -> RouterId;

    /// All nodes currently known, self included.
    fn nodes(&self) -> Box<dyn Iterator<Item = &Node> + '_>;

    /// Looks up a node by its RID.
    fn node_by_rid(&self, rid: RouterId) -> Option<&Node>;

    /// This router's own node. Panics if absent — a `FloodView` missing its
    /// own node is a bug in whatever populates it, not a runtime condition.
    fn self_node(&self) -> &Node {
        self.node_by_rid(self.self_rid())
            .expect("FloodView must always contain the local node")
    }
}

/// An in-memory [`FloodView`] for tests, constructed directly from a vector
/// of nodes rather than a live flooding session — the stand-in for "a trace
/// of flooding events" driving the algorithms under test.
#[derive(Debug, Clone, Default)]
pub struct TestFloodView {
    self_rid: RouterId,
    nodes: Vec<Node>,
}

impl TestFloodView {
    /// Creates a view whose local node is `self_rid` (created empty if not
    /// already present in `nodes`).
    pub fn new(self_rid: RouterId, mut nodes: Vec<Node>) -> TestFloodView {
        if !nodes.iter().any(|n| n.rid == self_rid) {
            nodes.push(Node::new(self_rid, true));
        }
        TestFloodView { self_rid, nodes }
    }

    /// Mutable access to a node, for building up test fixtures incrementally.
    pub fn node_mut(&mut self, rid: RouterId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.rid == rid)
    }

    /// Adds a node, returning a mutable reference to it.
    pub fn add_node(&mut self, rid: RouterId, is_self: bool) -> &mut Node {
        self.nodes.push(Node::new(rid, is_self));
        self.nodes.last_mut().unwrap()
    }
}

impl FloodView for TestFloodView {
    fn self_rid(&self) -> RouterId {
        self.self_rid
    }

    fn nodes(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        Box::new(self.nodes.iter())
    }

    fn node_by_rid(&self, rid: RouterId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.rid == rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flood_view_always_has_self_node() {
        let view = TestFloodView::new(RouterId::new(1), vec![]);
        assert!(view.node_by_rid(RouterId::new(1)).is_some());
        assert_eq!(view.self_node().rid, RouterId::new(1));
    }

    #[test]
    fn neighbor_and_routing_protocol_accessors() {
        let mut view = TestFloodView::new(RouterId::new(1), vec![]);
        {
            let n = view.node_mut(RouterId::new(1)).unwrap();
            n.tlvs.push(NodeTlv::RoutingProtocol {
                protocol: 2,
                preference: 10,
            });
            n.tlvs.push(NodeTlv::Neighbor {
                neighbor_rid: RouterId::new(2),
                local_link_id: 1,
                neighbor_link_id: 1,
            });
        }
        let n = view.self_node();
        assert_eq!(n.routing_protocols().collect::<Vec<_>>(), vec![(2, 10)]);
        assert_eq!(
            n.neighbors().collect::<Vec<_>>(),
            vec![(RouterId::new(2), 1, 1)]
        );
    }
}
