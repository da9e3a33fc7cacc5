//! End-to-end scenarios spanning more than one module, plus the invariants
//! from spec §8 that only make sense once PA, routing, and IPC are wired
//! together. Per-module mechanics (prefix arithmetic, TLV round-trips, single
//! state-machine transitions) already have focused unit tests next to their
//! implementations; these tests exercise the seams between modules.

use homenetd::iface::{InterfaceFlags, InterfaceRegistry};
use homenetd::ipc::{self, IpcRequest};
use homenetd::node::{NodeTlv, TestFloodView};
use homenetd::pa::{CpState, Dp, PaCore, PaCoreConfig, PaStore};
use homenetd::prefix::Prefix;
use homenetd::rid::RouterId;
use homenetd::routing::{elect, RoutingBackend, RoutingEngine, ROUTING_NONE};
use homenetd::time::Time;

/// S4 — two nodes unanimously support protocol 2 (summed preference 20) and
/// protocol 3 (summed preference 10); only protocol 2 is unanimous, so it
/// wins on support even though both are. When only one of two nodes backs
/// protocol 3, protocol 3 is excluded for lack of unanimity and protocol 2
/// wins by default.
#[test]
fn s4_routing_election_picks_unanimous_highest_preference() {
    let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
    flood.add_node(RouterId::new(2), false);
    for rid in [1, 2] {
        let node = flood.node_mut(RouterId::new(rid)).unwrap();
        node.tlvs.push(NodeTlv::RoutingProtocol { protocol: 2, preference: 10 });
        node.tlvs.push(NodeTlv::RoutingProtocol { protocol: 3, preference: 5 });
    }
    let result = elect(&flood, 8);
    assert_eq!(result.protocol, 2);
    assert_eq!(result.preference, 20);

    // Node 2 withdraws support for protocol 3; protocol 2 remains the only
    // unanimous candidate.
    let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
    flood.add_node(RouterId::new(2), false);
    flood
        .node_mut(RouterId::new(1))
        .unwrap()
        .tlvs
        .push(NodeTlv::RoutingProtocol { protocol: 3, preference: 5 });
    for rid in [1, 2] {
        flood
            .node_mut(RouterId::new(rid))
            .unwrap()
            .tlvs
            .push(NodeTlv::RoutingProtocol { protocol: 2, preference: 10 });
    }
    let result = elect(&flood, 8);
    assert_eq!(result.protocol, 2);
}

/// A [`RoutingEngine`] with no backend script configured always runs BFS,
/// whatever election decides — invariant 5's "no null next-hop/ifname route"
/// only has teeth once this is exercised end to end through the engine
/// rather than calling `bfs::run` directly.
#[test]
fn routing_engine_with_no_backend_always_falls_back_to_bfs() {
    let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
    flood.add_node(RouterId::new(2), false);
    {
        let me = flood.node_mut(RouterId::new(1)).unwrap();
        me.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(2), local_link_id: 1, neighbor_link_id: 7 });
    }
    {
        let peer = flood.node_mut(RouterId::new(2)).unwrap();
        peer.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(1), local_link_id: 7, neighbor_link_id: 1 });
        peer.tlvs.push(NodeTlv::RouterAddress { link_id: 7, address: "2001:db8::2".parse().unwrap() });
        peer.tlvs.push(NodeTlv::AssignedPrefix {
            link_id: 99,
            prefix: Prefix::pton("2001:db8:f::/64").unwrap(),
            priority: 2,
            flags: 0,
        });
    }

    let mut ifaces = InterfaceRegistry::new();
    let iface = ifaces.ifup("eth0", Some("h0".into()));
    iface.link_id = Some(homenetd::iface::LinkId { bits: 1, mask_bits: 8 });

    let mut engine = RoutingEngine::new(RoutingBackend::new(None::<std::path::PathBuf>), 8);
    engine.run(&flood, &mut ifaces);

    assert_eq!(engine.active(), ROUTING_NONE);
    let routes = ifaces.routes();
    assert_eq!(routes.len(), 1);
    // Invariant 5: no route with a null next-hop or null ifname.
    for route in routes {
        assert!(route.next_hop.is_some() || route.next_hop4.is_some());
        assert!(!route.ifname.is_empty());
    }
}

/// S5 — A-B-C chain, A is self. B advertises an AP at hopcount 1, C (reached
/// only through B) advertises one at hopcount 2; both routes' next hop is
/// B's address on A's link to B, since hop count only affects the metric,
/// not which next-hop is inherited along the BFS tree.
#[test]
fn s5_bfs_three_node_chain_installs_routes_at_increasing_hopcount() {
    let mut ifaces = InterfaceRegistry::new();
    let iface = ifaces.ifup("eth0", Some("h0".into()));
    iface.link_id = Some(homenetd::iface::LinkId { bits: 1, mask_bits: 8 });

    let mut flood = TestFloodView::new(RouterId::new(1), vec![]);
    flood.add_node(RouterId::new(2), false);
    flood.add_node(RouterId::new(3), false);

    let b_address: std::net::Ipv6Addr = "2001:db8::2".parse().unwrap();
    {
        let a = flood.node_mut(RouterId::new(1)).unwrap();
        a.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(2), local_link_id: 1, neighbor_link_id: 7 });
    }
    {
        let b = flood.node_mut(RouterId::new(2)).unwrap();
        b.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(1), local_link_id: 7, neighbor_link_id: 1 });
        b.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(3), local_link_id: 8, neighbor_link_id: 9 });
        b.tlvs.push(NodeTlv::RouterAddress { link_id: 7, address: b_address });
        b.tlvs.push(NodeTlv::AssignedPrefix {
            link_id: 50,
            prefix: Prefix::pton("2001:db8:1::/64").unwrap(),
            priority: 2,
            flags: 0,
        });
    }
    {
        let c = flood.node_mut(RouterId::new(3)).unwrap();
        c.tlvs.push(NodeTlv::Neighbor { neighbor_rid: RouterId::new(2), local_link_id: 9, neighbor_link_id: 8 });
        c.tlvs.push(NodeTlv::AssignedPrefix {
            link_id: 60,
            prefix: Prefix::pton("2001:db8:2::/64").unwrap(),
            priority: 2,
            flags: 0,
        });
    }

    homenetd::routing::bfs::run(&flood, &mut ifaces);

    let routes = ifaces.routes();
    let to_b = routes.iter().find(|r| r.prefix == Prefix::pton("2001:db8:1::/64").unwrap()).unwrap();
    let to_c = routes.iter().find(|r| r.prefix == Prefix::pton("2001:db8:2::/64").unwrap()).unwrap();

    assert_eq!(to_b.next_hop, Some(b_address));
    assert_eq!(to_b.ifname, "eth0");
    assert_eq!(to_b.metric >> 8, 1);

    assert_eq!(to_c.next_hop, Some(b_address));
    assert_eq!(to_c.ifname, "eth0");
    assert_eq!(to_c.metric >> 8, 2);
}

/// PA core assigns disjoint CPs to two different DPs on the same link, and
/// every CP's prefix remains inside its DP (invariants 1 and 2) through
/// several ticks of convergence.
#[test]
fn invariant_1_and_2_hold_across_pa_core_convergence() {
    let mut store = PaStore::new(RouterId::new(1));
    let mut ifaces = InterfaceRegistry::new();
    let iface = ifaces.ifup("eth0", Some("h0".into()));
    iface.ip6_plen = Some(64);
    let flood = TestFloodView::new(RouterId::new(1), vec![]);

    let dp_a = store.create_dp(Dp::new(
        Prefix::pton("2001:db8:a::/48").unwrap(),
        Time(10_000_000),
        Time(9_000_000),
        None,
        true,
    ));
    let dp_b = store.create_dp(Dp::new(
        Prefix::pton("2001:db8:b::/48").unwrap(),
        Time(10_000_000),
        Time(9_000_000),
        None,
        true,
    ));

    let mut core = PaCore::new(PaCoreConfig { flooding_delay_ms: 1_000, priority: 2 });
    for tick in 0..5 {
        core.run(&mut store, &ifaces, &flood, Time(tick * 3_000));
    }

    let applied: Vec<_> = store
        .cps()
        .filter(|(_, cp)| cp.state == CpState::Applied)
        .map(|(_, cp)| cp.clone())
        .collect();
    assert_eq!(applied.len(), 2);

    // Invariant 1: disjoint prefixes among APPLIED CPs on the same link.
    assert!(!applied[0].prefix.contains(&applied[1].prefix) && !applied[1].prefix.contains(&applied[0].prefix));

    // Invariant 2: every CP's prefix is contained in its DP.
    for cp in &applied {
        let dp = if cp.dp == dp_a { store.dp(dp_a) } else { store.dp(dp_b) }.unwrap();
        assert!(dp.prefix.contains(&cp.prefix));
    }
}

/// An `ifup` followed by `enable_ipv6_uplink` creates a DP; the next PA core
/// pass assigns it a CP on the managed link, and `dump` reports both the
/// interface and the delegated prefix consistently with the PA core state.
#[test]
fn ipc_ifup_and_uplink_feed_pa_core_and_show_up_in_dump() {
    let mut ifaces = InterfaceRegistry::new();
    let mut store = PaStore::new(RouterId::new(7));

    ipc::dispatch(
        &mut ifaces,
        &mut store,
        ROUTING_NONE,
        Time::ZERO,
        IpcRequest::Ifup {
            ifname: "lan0".into(),
            handle: Some("h0".into()),
            mode: None,
            prefix: None,
            link_id: None,
            iface_id: None,
            ip6assign: Some("64".into()),
            ip4assign: None,
            disable_pa: None,
            ula_default_router: None,
            ping_interval: None,
            trickle_k: None,
            dnsname: None,
        },
    );
    ipc::dispatch(
        &mut ifaces,
        &mut store,
        ROUTING_NONE,
        Time::ZERO,
        IpcRequest::Ifup {
            ifname: "wan0".into(),
            handle: None,
            mode: None,
            prefix: None,
            link_id: None,
            iface_id: None,
            ip6assign: None,
            ip4assign: None,
            disable_pa: None,
            ula_default_router: None,
            ping_interval: None,
            trickle_k: None,
            dnsname: None,
        },
    );
    let reply = ipc::dispatch(
        &mut ifaces,
        &mut store,
        ROUTING_NONE,
        Time::ZERO,
        IpcRequest::EnableIpv6Uplink {
            ifname: "wan0".into(),
            prefix: Some(vec![ipc::DelegatedPrefixDto {
                prefix: "2001:db8::/56".into(),
                valid_lifetime_ms: 10_000_000,
                preferred_lifetime_ms: 9_000_000,
            }]),
            passthru: None,
        },
    );
    assert!(reply.is_empty());
    assert!(ifaces.get("wan0").unwrap().flags.contains(InterfaceFlags::EXTERNAL));

    let flood = TestFloodView::new(RouterId::new(7), vec![]);
    let mut core = PaCore::new(PaCoreConfig { flooding_delay_ms: 1_000, priority: 2 });
    for tick in 0..3 {
        core.run(&mut store, &ifaces, &flood, Time(tick * 3_000));
    }

    let cp = store.cps_on_link("lan0").next().expect("pa core should have assigned lan0 a CP");
    assert!(Prefix::pton("2001:db8::/56").unwrap().contains(&cp.1.prefix));

    let dump = ipc::dispatch(&mut ifaces, &mut store, ROUTING_NONE, Time::ZERO, IpcRequest::Dump);
    let value: serde_json::Value = serde_json::from_slice(&dump).unwrap();
    let ifnames: Vec<&str> = value["interfaces"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["ifname"].as_str().unwrap())
        .collect();
    assert!(ifnames.contains(&"lan0"));
    assert!(ifnames.contains(&"wan0"));
    assert_eq!(value["delegated_prefixes"][0]["prefix"], "2001:db8::/56");

    // disable_ipv6_uplink withdraws the DP; PA core's next pass tears the CP
    // down along with it.
    let reply = ipc::dispatch(
        &mut ifaces,
        &mut store,
        ROUTING_NONE,
        Time::ZERO,
        IpcRequest::DisableIpv6Uplink { ifname: "wan0".into() },
    );
    assert!(reply.is_empty());
    store.gc();
    assert_eq!(store.dps().count(), 0);
}
