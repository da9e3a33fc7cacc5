//! The process-wide interface registry (spec §5 "Shared resources" — the
//! one global, touched only from the event-loop thread) and the
//! `update_routes -> add_route* -> commit_routes` transaction.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;

use crate::prefix::Prefix;

bitflags! {
    /// Per-interface behavior flags, set via IPC `mode`/`disable_pa`/
    /// `ula_default_router` fields.
    #[derive(Default)]
    pub struct InterfaceFlags: u32 {
        /// This interface is an uplink to an external network.
        const EXTERNAL = 0b0000_0001;
        /// Ad-hoc mode: no DHCP server, no PA participation beyond relay.
        const ADHOC = 0b0000_0010;
        /// Guest network isolation.
        const GUEST = 0b0000_0100;
        /// Hybrid: both managed and externally-addressed hosts allowed.
        const HYBRID = 0b0000_1000;
        /// Leaf: never used as a transit link for routing.
        const LEAF = 0b0001_0000;
        /// Prefix assignment disabled on this link.
        const DISABLE_PA = 0b0010_0000;
        /// Advertise a ULA default route on this link.
        const ULA_DEFAULT_ROUTER = 0b0100_0000;
    }
}

/// A link identifier: a user-assigned value plus the width of its mask,
/// parsed from IPC's `"<hex>/<mask_bits>"` form (mask defaults to 8 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId {
    /// The link-id bits.
    pub bits: u32,
    /// Width of `bits` that is significant.
    pub mask_bits: u8,
}

impl LinkId {
    /// Parses `"<hex>/<mask_bits>"`, or bare `"<hex>"` (mask defaults to 8).
    pub fn parse(s: &str) -> Option<LinkId> {
        let (hex, mask) = match s.split_once('/') {
            Some((h, m)) => (h, m.parse::<u8>().ok()?),
            None => (s, 8),
        };
        let bits = u32::from_str_radix(hex, 16).ok()?;
        Some(LinkId { bits, mask_bits: mask })
    }
}

/// A single uplink's accumulated DHCP state: the delegated prefixes it has
/// received and any opaque passthrough DHCPv6 options.
#[derive(Debug, Clone, Default)]
pub struct UplinkState {
    /// Delegated prefixes currently received on this uplink.
    pub delegated_prefixes: Vec<Prefix>,
    /// Raw DHCPv6 options to forward to downstream PD clients.
    pub passthru: Vec<u8>,
    /// Configured local IPv4 uplink source address, if any.
    pub ipv4_source: Option<Ipv4Addr>,
    /// IPv4 DNS servers advertised on this uplink, at most 4.
    pub dns: Vec<Ipv4Addr>,
}

/// A local network interface under this daemon's management.
#[derive(Debug, Clone)]
pub struct Interface {
    /// The kernel interface name.
    pub ifname: String,
    /// External handle supplied at `ifup` time; absent implies external mode.
    pub handle: Option<String>,
    /// Behavior flags.
    pub flags: InterfaceFlags,
    /// Requested IPv6 assignment length (`ip6assign`).
    pub ip6_plen: Option<u8>,
    /// Requested IPv4 assignment length (`ip4assign`).
    pub ip4_plen: Option<u8>,
    /// This interface's link id.
    pub link_id: Option<LinkId>,
    /// Uplink DHCP/delegation state, present only on `external` interfaces.
    pub uplink: Option<UplinkState>,
    /// Current last-seen address reachable on this interface, if known
    /// (used as BFS next-hop when this interface is a directly connected
    /// link).
    pub last_seen_address: Option<Ipv6Addr>,
    /// Current last-seen IPv4 address reachable on this interface.
    pub last_seen_address4: Option<Ipv4Addr>,
}

impl Interface {
    /// Creates a freshly `ifup`'d interface with no flags set.
    pub fn new(ifname: impl Into<String>, handle: Option<String>) -> Interface {
        Interface {
            ifname: ifname.into(),
            handle,
            flags: InterfaceFlags::empty(),
            ip6_plen: None,
            ip4_plen: None,
            link_id: None,
            uplink: None,
            last_seen_address: None,
            last_seen_address4: None,
        }
    }

    /// True iff this interface has no external handle (IPC "external mode").
    pub fn is_external_mode(&self) -> bool {
        self.handle.is_none()
    }
}

/// An installed route, the unit the BFS and election logic mutate through a
/// [`RouteTransaction`].
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Destination prefix.
    pub prefix: Prefix,
    /// IPv6 next hop, if any.
    pub next_hop: Option<Ipv6Addr>,
    /// IPv4 next hop, for default routes reachable over an IPv4-mapped
    /// uplink.
    pub next_hop4: Option<Ipv4Addr>,
    /// Outgoing interface name.
    pub ifname: String,
    /// Route metric (hopcount-derived).
    pub metric: u32,
}

/// Owns every [`Interface`] and the currently installed route set.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: HashMap<String, Interface>,
    routes: Vec<Route>,
}

impl InterfaceRegistry {
    /// Creates an empty registry.
    pub fn new() -> InterfaceRegistry {
        InterfaceRegistry::default()
    }

    /// Creates (or replaces) an interface, IPC `ifup`.
    pub fn ifup(&mut self, ifname: &str, handle: Option<String>) -> &mut Interface {
        self.interfaces
            .insert(ifname.to_string(), Interface::new(ifname, handle));
        self.interfaces.get_mut(ifname).unwrap()
    }

    /// Removes an interface, IPC `ifdown`.
    pub fn ifdown(&mut self, ifname: &str) -> Option<Interface> {
        self.interfaces.remove(ifname)
    }

    /// Borrows an interface.
    pub fn get(&self, ifname: &str) -> Option<&Interface> {
        self.interfaces.get(ifname)
    }

    /// Mutably borrows an interface.
    pub fn get_mut(&mut self, ifname: &str) -> Option<&mut Interface> {
        self.interfaces.get_mut(ifname)
    }

    /// Iterates all interfaces.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    /// The currently installed route set.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Opens a route-update transaction. Routes added through it only take
    /// effect on [`RouteTransaction::commit`]; dropping the transaction
    /// without committing discards everything added to it, leaving the
    /// previously installed routes untouched — the Rust-idiomatic rendering
    /// of "uncommitted routes from the previous run are discarded".
    pub fn update_routes(&mut self) -> RouteTransaction<'_> {
        RouteTransaction {
            registry: self,
            pending: Vec::new(),
            committed: false,
        }
    }
}

/// A single `update_routes -> add_route* -> commit_routes` transaction.
pub struct RouteTransaction<'a> {
    registry: &'a mut InterfaceRegistry,
    pending: Vec<Route>,
    committed: bool,
}

impl<'a> RouteTransaction<'a> {
    /// Queues a route for installation.
    pub fn add_route(&mut self, route: Route) {
        self.pending.push(route);
    }

    /// Replaces the registry's installed route set with everything queued
    /// so far.
    pub fn commit(mut self) {
        self.registry.routes = std::mem::take(&mut self.pending);
        self.committed = true;
    }
}

impl<'a> Drop for RouteTransaction<'a> {
    fn drop(&mut self) {
        if !self.committed {
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_transaction_discards_pending_routes() {
        let mut registry = InterfaceRegistry::new();
        {
            let mut txn = registry.update_routes();
            txn.add_route(Route {
                prefix: Prefix::pton("2001:db8::/32").unwrap(),
                next_hop: None,
                next_hop4: None,
                ifname: "eth0".into(),
                metric: 1,
            });
            // txn dropped here without commit()
        }
        assert!(registry.routes().is_empty());
    }

    #[test]
    fn committed_transaction_replaces_routes() {
        let mut registry = InterfaceRegistry::new();
        let mut txn = registry.update_routes();
        txn.add_route(Route {
            prefix: Prefix::pton("2001:db8::/32").unwrap(),
            next_hop: None,
            next_hop4: None,
            ifname: "eth0".into(),
            metric: 1,
        });
        txn.commit();
        assert_eq!(registry.routes().len(), 1);
    }

    #[test]
    fn link_id_parse() {
        let l = LinkId::parse("2a/16").unwrap();
        assert_eq!(l.bits, 0x2a);
        assert_eq!(l.mask_bits, 16);
        let default_mask = LinkId::parse("ff").unwrap();
        assert_eq!(default_mask.mask_bits, 8);
    }
}
