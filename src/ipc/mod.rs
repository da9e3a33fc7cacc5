//! The external control IPC server (spec §4.8/§6): an `AF_UNIX SOCK_DGRAM`
//! socket at a configured path, speaking length-prefixed `serde_json`
//! datagrams. `dump` replies with a snapshot of daemon state; every other
//! command mutates [`InterfaceRegistry`]/[`PaStore`] and replies with an
//! empty datagram.
//!
//! Per the propagation policy (spec §7): a malformed datagram is logged and
//! dropped, never replied to; an unknown `ifname` is logged at `error` and
//! the command is otherwise a no-op (still replied to, empty). Only the
//! initial `bind` is fatal — see [`serve`]'s caller in `src/bin/homenetd.rs`.

use std::cell::RefCell;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::net::UnixDatagram;
use tracing::{error, info, warn};

use crate::config::PaConfig;
use crate::error::{Error, Result};
use crate::iface::{InterfaceFlags, InterfaceRegistry, LinkId};
use crate::pa::{Dp, PaStore};
use crate::prefix::Prefix;
use crate::time::Time;

/// One delegated prefix carried in an `enable_ipv6_uplink` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedPrefixDto {
    /// Textual prefix, parsed with [`Prefix::pton`].
    pub prefix: String,
    /// Valid lifetime, milliseconds from now.
    pub valid_lifetime_ms: u64,
    /// Preferred lifetime, milliseconds from now.
    pub preferred_lifetime_ms: u64,
}

/// A parsed IPC command. `command` dispatches the variant (spec §4.8's
/// table); fields not meaningful to a given command are simply absent from
/// the wire object and default to `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Returns a full snapshot of interfaces, PA state, and the active
    /// routing protocol.
    Dump,
    /// Brings an interface under management, or updates its settings if
    /// already managed.
    Ifup {
        ifname: String,
        handle: Option<String>,
        mode: Option<String>,
        /// Statically assigned prefixes; accepted but not yet fed into the
        /// PA state machine (PA negotiates assignments on its own).
        prefix: Option<Vec<String>>,
        link_id: Option<String>,
        /// `"<addr_or_prefix> [filter_prefix]"` entries for the (out of
        /// scope) flooding layer's interface address filter.
        iface_id: Option<Vec<String>>,
        ip6assign: Option<String>,
        ip4assign: Option<String>,
        disable_pa: Option<bool>,
        ula_default_router: Option<bool>,
        /// Flooding-layer tunables; accepted and logged, not acted on here
        /// since Trickle flooding itself is out of scope.
        ping_interval: Option<u32>,
        trickle_k: Option<u32>,
        dnsname: Option<String>,
    },
    /// Removes an interface from management.
    Ifdown { ifname: String },
    /// Marks an interface as an active IPv4 uplink.
    EnableIpv4Uplink {
        ifname: String,
        ipv4source: Option<String>,
        dns: Option<Vec<String>>,
    },
    /// Clears an interface's IPv4 uplink state.
    DisableIpv4Uplink { ifname: String },
    /// Replaces an interface's delegated IPv6 prefix set.
    EnableIpv6Uplink {
        ifname: String,
        prefix: Option<Vec<DelegatedPrefixDto>>,
        passthru: Option<String>,
    },
    /// Withdraws every DP this interface's uplink delegated.
    DisableIpv6Uplink { ifname: String },
}

/// Prepends a 4-byte big-endian length header — the "length-prefixed
/// structured blob" framing spec §6 describes on top of the otherwise
/// message-oriented `SOCK_DGRAM` transport.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Strips and validates the length header, returning the inner payload.
pub fn unframe(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 4 {
        return Err(Error::Protocol("ipc datagram shorter than its length header".into()));
    }
    let (header, rest) = buf.split_at(4);
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len != rest.len() {
        return Err(Error::Protocol(format!(
            "ipc length header {} does not match payload of {} bytes",
            len,
            rest.len()
        )));
    }
    Ok(rest)
}

/// A snapshot of one interface, for `dump`.
#[derive(Debug, Serialize)]
struct InterfaceSnapshot {
    ifname: String,
    external: bool,
    flags: u32,
    ip6_plen: Option<u8>,
    ip4_plen: Option<u8>,
}

/// A snapshot of one delegated prefix, for `dump`.
#[derive(Debug, Serialize)]
struct DpSnapshot {
    prefix: String,
    local: bool,
    owner: Option<u64>,
}

/// The full `dump` reply payload.
#[derive(Debug, Serialize)]
struct DumpState {
    active_routing_protocol: u8,
    interfaces: Vec<InterfaceSnapshot>,
    delegated_prefixes: Vec<DpSnapshot>,
}

#[allow(clippy::too_many_arguments)]
fn apply_ifup(
    ifaces: &mut InterfaceRegistry,
    ifname: &str,
    handle: Option<String>,
    mode: Option<&str>,
    link_id: Option<&str>,
    ip6assign: Option<&str>,
    ip4assign: Option<&str>,
    disable_pa: Option<bool>,
    ula_default_router: Option<bool>,
    flooding_tunables: (Option<u32>, Option<u32>, Option<&str>),
) {
    let (ping_interval, trickle_k, dnsname) = flooding_tunables;
    if ping_interval.is_some() || trickle_k.is_some() || dnsname.is_some() {
        tracing::debug!(
            ifname,
            ?ping_interval,
            ?trickle_k,
            ?dnsname,
            "flooding-layer tunables accepted but not yet consumed"
        );
    }
    let iface = ifaces.ifup(ifname, handle);
    if let Some(mode) = mode {
        for word in mode.split(',') {
            match word.trim() {
                "" => {}
                "guest" => iface.flags.insert(InterfaceFlags::GUEST),
                "hybrid" => iface.flags.insert(InterfaceFlags::HYBRID),
                "leaf" => iface.flags.insert(InterfaceFlags::LEAF),
                "adhoc" => iface.flags.insert(InterfaceFlags::ADHOC),
                "external" => iface.flags.insert(InterfaceFlags::EXTERNAL),
                other => warn!(mode = other, "unknown ifup mode word, ignoring"),
            }
        }
    }
    if disable_pa.unwrap_or(false) {
        iface.flags.insert(InterfaceFlags::DISABLE_PA);
    }
    if ula_default_router.unwrap_or(false) {
        iface.flags.insert(InterfaceFlags::ULA_DEFAULT_ROUTER);
    }
    if let Some(s) = link_id {
        match LinkId::parse(s) {
            Some(id) => iface.link_id = Some(id),
            None => warn!(link_id = s, "unparsable link_id, ignoring"),
        }
    }
    if let Some(s) = ip6assign {
        match s.parse() {
            Ok(v) => iface.ip6_plen = Some(v),
            Err(_) => warn!(ip6assign = s, "unparsable ip6assign, ignoring"),
        }
    }
    if let Some(s) = ip4assign {
        match s.parse() {
            Ok(v) => iface.ip4_plen = Some(v),
            Err(_) => warn!(ip4assign = s, "unparsable ip4assign, ignoring"),
        }
    }
}

fn apply_enable_ipv4_uplink(
    ifaces: &mut InterfaceRegistry,
    ifname: &str,
    ipv4source: Option<&str>,
    dns: Option<&[String]>,
) {
    let Some(iface) = ifaces.get_mut(ifname) else {
        error!(ifname, "enable_ipv4_uplink on unknown interface");
        return;
    };
    iface.flags.insert(InterfaceFlags::EXTERNAL);
    let uplink = iface.uplink.get_or_insert_with(Default::default);
    if let Some(s) = ipv4source {
        match s.parse::<Ipv4Addr>() {
            Ok(addr) => uplink.ipv4_source = Some(addr),
            Err(_) => warn!(ipv4source = s, "unparsable ipv4source, ignoring"),
        }
    }
    if let Some(entries) = dns {
        uplink.dns = entries
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(dns = %s, "unparsable dns entry, ignoring");
                    None
                }
            })
            .collect();
    }
}

fn apply_disable_ipv4_uplink(ifaces: &mut InterfaceRegistry, ifname: &str) {
    let Some(iface) = ifaces.get_mut(ifname) else {
        error!(ifname, "disable_ipv4_uplink on unknown interface");
        return;
    };
    if let Some(uplink) = &mut iface.uplink {
        uplink.ipv4_source = None;
        uplink.dns.clear();
    }
}

fn apply_enable_ipv6_uplink(
    ifaces: &mut InterfaceRegistry,
    store: &mut PaStore,
    ifname: &str,
    prefixes: &[DelegatedPrefixDto],
    passthru: Option<&str>,
    now: Time,
) {
    let Some(iface) = ifaces.get_mut(ifname) else {
        error!(ifname, "enable_ipv6_uplink on unknown interface");
        return;
    };
    iface.flags.insert(InterfaceFlags::EXTERNAL);
    let uplink = iface.uplink.get_or_insert_with(Default::default);
    let previous = std::mem::take(&mut uplink.delegated_prefixes);
    if let Some(hex) = passthru {
        match hex_decode(hex) {
            Some(bytes) => uplink.passthru = bytes,
            None => warn!(ifname, "unparsable passthru hex blob, ignoring"),
        }
    }

    let mut next = Vec::with_capacity(prefixes.len());
    for dto in prefixes {
        match Prefix::pton(&dto.prefix) {
            Some(prefix) => next.push((prefix, dto.valid_lifetime_ms, dto.preferred_lifetime_ms)),
            None => warn!(prefix = %dto.prefix, "unparsable delegated prefix, ignoring"),
        }
    }

    let stale: Vec<_> = store
        .dps()
        .filter(|(_, dp)| {
            dp.owner.is_none() && !dp.local && previous.contains(&dp.prefix)
                && !next.iter().any(|(p, _, _)| *p == dp.prefix)
        })
        .map(|(id, _)| id)
        .collect();
    for id in stale {
        store.delete_dp(id);
    }

    for (prefix, valid_ms, preferred_ms) in &next {
        if !previous.contains(prefix) {
            store.create_dp(Dp::new(
                *prefix,
                now.plus_ms(*valid_ms),
                now.plus_ms(*preferred_ms),
                None,
                false,
            ));
        }
    }

    uplink.delegated_prefixes = next.into_iter().map(|(p, _, _)| p).collect();
}

fn apply_disable_ipv6_uplink(ifaces: &mut InterfaceRegistry, store: &mut PaStore, ifname: &str) {
    let Some(iface) = ifaces.get_mut(ifname) else {
        error!(ifname, "disable_ipv6_uplink on unknown interface");
        return;
    };
    let withdrawn = match &mut iface.uplink {
        Some(uplink) => std::mem::take(&mut uplink.delegated_prefixes),
        None => return,
    };
    let stale: Vec<_> = store
        .dps()
        .filter(|(_, dp)| dp.owner.is_none() && !dp.local && withdrawn.contains(&dp.prefix))
        .map(|(id, _)| id)
        .collect();
    for id in stale {
        store.delete_dp(id);
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn dump(ifaces: &InterfaceRegistry, store: &PaStore, active_routing_protocol: u8) -> Vec<u8> {
    let state = DumpState {
        active_routing_protocol,
        interfaces: ifaces
            .iter()
            .map(|i| InterfaceSnapshot {
                ifname: i.ifname.clone(),
                external: i.flags.contains(InterfaceFlags::EXTERNAL),
                flags: i.flags.bits(),
                ip6_plen: i.ip6_plen,
                ip4_plen: i.ip4_plen,
            })
            .collect(),
        delegated_prefixes: store
            .dps()
            .map(|(_, dp)| DpSnapshot {
                prefix: dp.prefix.ntop(true),
                local: dp.local,
                owner: dp.owner.map(|r| r.0),
            })
            .collect(),
    };
    serde_json::to_vec(&state).unwrap_or_default()
}

/// Applies one parsed request, returning the reply payload (non-empty only
/// for [`IpcRequest::Dump`]).
pub fn dispatch(
    ifaces: &mut InterfaceRegistry,
    store: &mut PaStore,
    active_routing_protocol: u8,
    now: Time,
    request: IpcRequest,
) -> Vec<u8> {
    match request {
        IpcRequest::Dump => dump(ifaces, store, active_routing_protocol),
        IpcRequest::Ifup {
            ifname,
            handle,
            mode,
            prefix,
            link_id,
            iface_id,
            ip6assign,
            ip4assign,
            disable_pa,
            ula_default_router,
            ping_interval,
            trickle_k,
            dnsname,
        } => {
            if prefix.is_some() || iface_id.is_some() {
                warn!(
                    ifname,
                    "ifup prefix/iface_id fields are accepted but not yet wired into PA"
                );
            }
            apply_ifup(
                ifaces,
                &ifname,
                handle,
                mode.as_deref(),
                link_id.as_deref(),
                ip6assign.as_deref(),
                ip4assign.as_deref(),
                disable_pa,
                ula_default_router,
                (ping_interval, trickle_k, dnsname.as_deref()),
            );
            Vec::new()
        }
        IpcRequest::Ifdown { ifname } => {
            if ifaces.ifdown(&ifname).is_none() {
                error!(ifname, "ifdown on unknown interface");
            }
            Vec::new()
        }
        IpcRequest::EnableIpv4Uplink { ifname, ipv4source, dns } => {
            apply_enable_ipv4_uplink(ifaces, &ifname, ipv4source.as_deref(), dns.as_deref());
            Vec::new()
        }
        IpcRequest::DisableIpv4Uplink { ifname } => {
            apply_disable_ipv4_uplink(ifaces, &ifname);
            Vec::new()
        }
        IpcRequest::EnableIpv6Uplink { ifname, prefix, passthru } => {
            apply_enable_ipv6_uplink(
                ifaces,
                store,
                &ifname,
                &prefix.unwrap_or_default(),
                passthru.as_deref(),
                now,
            );
            Vec::new()
        }
        IpcRequest::DisableIpv6Uplink { ifname } => {
            apply_disable_ipv6_uplink(ifaces, store, &ifname);
            Vec::new()
        }
    }
}

/// Parses, dispatches, and frames the reply for one raw datagram. Returns
/// `None` if the datagram is malformed — per spec §7, such requests are
/// logged and silently dropped, not replied to.
fn handle_datagram(
    raw: &[u8],
    ifaces: &mut InterfaceRegistry,
    store: &mut PaStore,
    active_routing_protocol: u8,
    now: Time,
) -> Option<Vec<u8>> {
    let payload = match unframe(raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "malformed ipc datagram, dropping");
            return None;
        }
    };
    let request: IpcRequest = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "unparsable ipc request, dropping");
            return None;
        }
    };
    Some(frame(&dispatch(ifaces, store, active_routing_protocol, now, request)))
}

/// Runs the IPC server until cancelled or a fatal socket error occurs.
///
/// Binds `socket_path` (removing a stale socket file left by a previous
/// run), then drains each readiness notification in a non-blocking loop
/// until `WouldBlock` — the edge-triggered idiom spec §7 calls for, adapted
/// to `tokio`'s readiness-based API rather than raw `epoll`. Failing to
/// bind is the one fatal IPC error (spec §6 exit code 3); everything after
/// that point is logged and absorbed.
pub async fn serve(
    socket_path: PathBuf,
    ifaces: Rc<RefCell<InterfaceRegistry>>,
    store: Rc<RefCell<PaStore>>,
    active_routing_protocol: Rc<RefCell<u8>>,
    _pa_config: Rc<PaConfig>,
    now: impl Fn() -> Time,
) -> Result<()> {
    let _ = std::fs::remove_file(&socket_path);
    let socket = UnixDatagram::bind(&socket_path)?;
    info!(?socket_path, "ipc server listening");

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        socket.readable().await?;
        loop {
            match socket.try_recv_from(&mut buf) {
                Ok((n, peer)) => {
                    let reply = handle_datagram(
                        &buf[..n],
                        &mut ifaces.borrow_mut(),
                        &mut store.borrow_mut(),
                        *active_routing_protocol.borrow(),
                        now(),
                    );
                    if let (Some(reply), Some(path)) = (reply, peer.as_pathname()) {
                        if let Err(e) = socket.send_to(&reply, path).await {
                            warn!(error = %e, "failed to reply to ipc client");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "ipc recv_from failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rid::RouterId;

    fn req(json: &str) -> IpcRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn frame_round_trips() {
        let payload = b"hello";
        let framed = frame(payload);
        assert_eq!(unframe(&framed).unwrap(), payload);
    }

    #[test]
    fn unframe_rejects_mismatched_length() {
        let mut framed = frame(b"hello");
        framed[3] = 99;
        assert!(unframe(&framed).is_err());
    }

    #[test]
    fn ifup_sets_mode_flags_and_link_id() {
        let mut ifaces = InterfaceRegistry::new();
        let mut store = PaStore::new(RouterId::new(1));
        let request = req(
            r#"{"command":"ifup","ifname":"eth0","mode":"guest,leaf","link_id":"2a/16"}"#,
        );
        dispatch(&mut ifaces, &mut store, 0, Time::ZERO, request);
        let iface = ifaces.get("eth0").unwrap();
        assert!(iface.flags.contains(InterfaceFlags::GUEST));
        assert!(iface.flags.contains(InterfaceFlags::LEAF));
        assert_eq!(iface.link_id.unwrap().bits, 0x2a);
    }

    #[test]
    fn ifdown_on_unknown_interface_is_a_logged_no_op() {
        let mut ifaces = InterfaceRegistry::new();
        let mut store = PaStore::new(RouterId::new(1));
        let request = req(r#"{"command":"ifdown","ifname":"ghost"}"#);
        let reply = dispatch(&mut ifaces, &mut store, 0, Time::ZERO, request);
        assert!(reply.is_empty());
    }

    #[test]
    fn enable_ipv6_uplink_creates_a_dp_and_disable_withdraws_it() {
        let mut ifaces = InterfaceRegistry::new();
        ifaces.ifup("wan0", None);
        let mut store = PaStore::new(RouterId::new(1));

        let request = req(
            r#"{"command":"enable_ipv6_uplink","ifname":"wan0","prefix":[
                {"prefix":"2001:db8::/56","valid_lifetime_ms":1000,"preferred_lifetime_ms":500}
            ]}"#,
        );
        dispatch(&mut ifaces, &mut store, 0, Time::ZERO, request);
        assert_eq!(store.dps().count(), 1);
        let (_, dp) = store.dps().next().unwrap();
        assert!(!dp.local);
        assert!(dp.owner.is_none());

        let request = req(r#"{"command":"disable_ipv6_uplink","ifname":"wan0"}"#);
        dispatch(&mut ifaces, &mut store, 0, Time::ZERO, request);
        store.gc();
        assert_eq!(store.dps().count(), 0);
    }

    #[test]
    fn dump_reports_interfaces_and_dps() {
        let mut ifaces = InterfaceRegistry::new();
        ifaces.ifup("eth0", Some("h0".into()));
        let mut store = PaStore::new(RouterId::new(1));
        store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time::ZERO.plus_ms(1000),
            Time::ZERO.plus_ms(500),
            None,
            true,
        ));
        let reply = dispatch(&mut ifaces, &mut store, 3, Time::ZERO, req(r#"{"command":"dump"}"#));
        let value: serde_json::Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value["active_routing_protocol"], 3);
        assert_eq!(value["interfaces"][0]["ifname"], "eth0");
        assert_eq!(value["delegated_prefixes"][0]["local"], true);
    }
}
