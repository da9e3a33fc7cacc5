//! PA core: the per-`(DP, link)` prefix-assignment state machine (spec
//! §4.4). Reacts to DP/AP/CP changes by proposing, adopting, or
//! withdrawing CPs, and advances each CP through
//! `None -> Proposed -> Advertised -> Applied` once nothing has contested
//! it for `2 * flooding_delay`.

use crate::iface::{InterfaceFlags, InterfaceRegistry};
use crate::node::FloodView;
use crate::pa::arena::Id;
use crate::pa::model::{Ap, Cp, CpState, Dp, PaStore};
use crate::rid::RouterId;
use crate::time::Time;

/// PA core tunables.
#[derive(Debug, Clone, Copy)]
pub struct PaCoreConfig {
    /// Upper bound on flood convergence; also the apply-delay unit.
    pub flooding_delay_ms: u64,
    /// Priority this router proposes/advertises with.
    pub priority: u8,
}

/// Drives the PA core state machine.
pub struct PaCore {
    config: PaCoreConfig,
}

fn eligible_link(flags: InterfaceFlags) -> bool {
    !flags.contains(InterfaceFlags::EXTERNAL) && !flags.contains(InterfaceFlags::DISABLE_PA)
}

fn link_plen(ifaces: &InterfaceRegistry, link: &str, dp: &Dp) -> Option<u8> {
    let iface = ifaces.get(link)?;
    if dp.prefix.is_ipv4() {
        iface.ip4_plen
    } else {
        iface.ip6_plen
    }
}

impl PaCore {
    /// Creates a PA core driver.
    pub fn new(config: PaCoreConfig) -> PaCore {
        PaCore { config }
    }

    /// Runs one pass: ensures every `(DP, link)` pair has a CP, resolves
    /// conflicts against remote APs, and advances apply delays.
    pub fn run(
        &mut self,
        store: &mut PaStore,
        ifaces: &InterfaceRegistry,
        _flood: &impl FloodView,
        now: Time,
    ) {
        let links: Vec<String> = ifaces
            .iter()
            .filter(|i| eligible_link(i.flags))
            .map(|i| i.ifname.clone())
            .collect();
        let dps: Vec<(Id<Dp>, Dp)> = store.dps().map(|(id, dp)| (id, dp.clone())).collect();

        for (dp_id, dp) in &dps {
            for link in &links {
                self.ensure_cp(store, ifaces, *dp_id, dp, link, now);
            }
        }

        self.resolve_conflicts(store, now);
        self.advance_apply_delays(store, now);
    }

    fn ensure_cp(
        &mut self,
        store: &mut PaStore,
        ifaces: &InterfaceRegistry,
        dp_id: Id<Dp>,
        dp: &Dp,
        link: &str,
        now: Time,
    ) {
        let existing = store
            .cps_on_link(link)
            .find(|(_, cp)| cp.dp == dp_id)
            .map(|(id, _)| id);
        let cp_id = match existing {
            Some(id) => id,
            None => {
                let self_rid = store.self_rid();
                store.create_cp(Cp::new(dp_id, link, self_rid, self.config.priority))
            }
        };

        let state = store.cp(cp_id).map(|c| c.state);
        if state != Some(CpState::None) {
            return;
        }

        // Step 1: adopt a higher-RID AP that already claims a sub-prefix.
        let self_rid = store.self_rid();
        let adoption = store
            .aps_on_link(link)
            .filter(|(_, ap)| ap.dp == dp_id && ap.rid > self_rid && dp.prefix.contains(&ap.prefix))
            .max_by_key(|(_, ap)| ap.rid)
            .map(|(_, ap)| (ap.prefix, ap.rid));

        if let Some((prefix, rid)) = adoption {
            if let Some(cp) = store.cp_mut(cp_id) {
                cp.prefix = prefix;
                cp.rid = rid;
                cp.authoritative = false;
            }
            store.transition_cp(cp_id, CpState::Advertised);
            if let Some(cp) = store.cp_mut(cp_id) {
                cp.apply_timer.arm(now.plus_ms(2 * self.config.flooding_delay_ms));
            }
            return;
        }

        // Step 2: search for a free sub-prefix of the configured length.
        let Some(plen) = link_plen(ifaces, link, dp) else {
            return;
        };
        let Some(prefix) = self.find_free_subprefix(store, dp_id, dp, link, plen) else {
            // Exhaustion: no CP is created; the next change notification
            // re-triggers the search (spec §7 "Prefix-allocation exhaustion").
            return;
        };

        if let Some(cp) = store.cp_mut(cp_id) {
            cp.prefix = prefix;
            cp.rid = self_rid;
            cp.authoritative = true;
        }
        store.transition_cp(cp_id, CpState::Proposed);
    }

    fn find_free_subprefix(
        &self,
        store: &PaStore,
        dp_id: Id<Dp>,
        dp: &Dp,
        link: &str,
        plen: u8,
    ) -> Option<crate::prefix::Prefix> {
        let anchor = dp.prefix.prandom_subprefix(link.as_bytes(), 0, plen)?;
        if !store.prefix_occupied(dp_id, &anchor) {
            return Some(anchor);
        }
        let protected = dp.prefix.plen;
        let counter_len = plen.saturating_sub(protected);
        if counter_len == 0 || counter_len > 32 {
            return None;
        }
        let limit = 1u64 << counter_len;
        let mut candidate = anchor;
        for _ in 0..limit {
            let (next, wrapped) = candidate.increment(protected)?;
            if wrapped {
                return None;
            }
            if !store.prefix_occupied(dp_id, &next) {
                return Some(next);
            }
            candidate = next;
        }
        None
    }

    fn resolve_conflicts(&mut self, store: &mut PaStore, now: Time) {
        let self_rid = store.self_rid();
        let conflicts: Vec<(Id<Cp>, ConflictAction)> = store
            .cps()
            .filter(|(_, cp)| cp.state != CpState::None && cp.rid == self_rid)
            .filter_map(|(cp_id, cp)| {
                let overlapping: Vec<&Ap> = store
                    .aps_on_link(&cp.link)
                    .filter(|(_, ap)| ap.rid != self_rid && ap.dp == cp.dp)
                    .filter(|(_, ap)| ap.prefix.contains(&cp.prefix) || cp.prefix.contains(&ap.prefix))
                    .map(|(_, ap)| ap)
                    .collect();
                let remote = overlapping.into_iter().max_by_key(|ap| (ap.rid, ap.priority))?;
                if remote.rid > self_rid && remote.priority >= cp.priority {
                    Some((cp_id, ConflictAction::Adopt(remote.prefix, remote.rid)))
                } else if remote.priority > cp.priority {
                    Some((cp_id, ConflictAction::Reselect))
                } else {
                    None
                }
            })
            .collect();

        for (cp_id, action) in conflicts {
            match action {
                ConflictAction::Adopt(prefix, rid) => {
                    if let Some(cp) = store.cp_mut(cp_id) {
                        cp.prefix = prefix;
                        cp.rid = rid;
                        cp.authoritative = false;
                    }
                    store.transition_cp(cp_id, CpState::Advertised);
                    if let Some(cp) = store.cp_mut(cp_id) {
                        cp.apply_timer.arm(now.plus_ms(2 * self.config.flooding_delay_ms));
                    }
                }
                ConflictAction::Reselect => {
                    store.withdraw_cp(cp_id);
                }
            }
        }
    }

    fn advance_apply_delays(&mut self, store: &mut PaStore, now: Time) {
        let ready: Vec<Id<Cp>> = store
            .cps()
            .filter(|(_, cp)| cp.state == CpState::Proposed)
            .map(|(id, _)| id)
            .collect();
        for id in ready {
            store.transition_cp(id, CpState::Advertised);
            if let Some(cp) = store.cp_mut(id) {
                cp.apply_timer
                    .arm(now.plus_ms(2 * self.config.flooding_delay_ms));
            }
        }

        let to_apply: Vec<Id<Cp>> = store
            .cps()
            .filter(|(_, cp)| {
                cp.state == CpState::Advertised && cp.apply_timer.is_due(now)
            })
            .map(|(id, _)| id)
            .collect();
        for id in to_apply {
            store.transition_cp(id, CpState::Applied);
        }
    }
}

enum ConflictAction {
    Adopt(crate::prefix::Prefix, RouterId),
    Reselect,
}
