//! PA PD (spec §4.6): hands out committed sub-prefixes to downstream
//! prefix-delegation clients (each identified by an opaque lease id) out of
//! the live DP set, batching each lease's `update_cb` to avoid notifying a
//! client once per DP change.

use std::collections::HashMap;

use crate::config::PaPdConfig;
use crate::pa::arena::Id;
use crate::pa::model::{Cpd, Dp, PaStore};
use crate::prefix::Prefix;
use crate::time::{Time, Timer};

/// Computes the prefix length PA PD will try to hand out for a lease against
/// a given DP: never shorter (numerically smaller) than the ratio floor or
/// `pd_min_len`, never longer than the client's stated `max_len`. `None` if
/// the floor already exceeds `max_len` — this DP can't serve the lease at
/// all, rather than silently exceeding what the client asked for.
fn effective_len(dp_plen: u8, preferred_len: Option<u8>, max_len: u8, config: &PaPdConfig) -> Option<u8> {
    let floor = dp_plen
        .saturating_add(config.pd_min_ratio_exp)
        .max(config.pd_min_len);
    if floor > max_len {
        return None;
    }
    let requested = preferred_len.map_or(floor, |p| p.max(floor));
    Some(requested.min(max_len))
}

/// One downstream client's outstanding request.
#[derive(Debug)]
struct Lease {
    preferred_len: Option<u8>,
    max_len: u8,
    cpds: Vec<Id<Cpd>>,
    just_created: bool,
    update_timer: Timer,
}

impl Lease {
    fn new(preferred_len: Option<u8>, max_len: u8) -> Lease {
        Lease {
            preferred_len,
            max_len,
            cpds: Vec::new(),
            just_created: true,
            update_timer: Timer::new(),
        }
    }
}

/// Drives prefix delegation for every active lease.
#[derive(Default)]
pub struct PaPd {
    leases: HashMap<String, Lease>,
}

impl PaPd {
    /// Creates a driver with no active leases.
    pub fn new() -> PaPd {
        PaPd::default()
    }

    /// Registers or updates a client's request. Re-requesting with new
    /// parameters does not disturb already-granted CPDs; they are only
    /// resized on the next [`PaPd::run`] if they no longer fit.
    pub fn request(&mut self, lease_id: impl Into<String>, preferred_len: Option<u8>, max_len: u8) {
        let lease_id = lease_id.into();
        self.leases
            .entry(lease_id)
            .and_modify(|l| {
                l.preferred_len = preferred_len;
                l.max_len = max_len;
            })
            .or_insert_with(|| Lease::new(preferred_len, max_len));
    }

    /// Releases a lease, withdrawing every CPD it held.
    pub fn release(&mut self, store: &mut PaStore, lease_id: &str) {
        if let Some(lease) = self.leases.remove(lease_id) {
            for id in lease.cpds {
                store.remove_cpd(id);
            }
        }
    }

    /// The prefixes currently granted to a lease.
    pub fn granted(&self, store: &PaStore, lease_id: &str) -> Vec<Prefix> {
        match self.leases.get(lease_id) {
            Some(lease) => lease
                .cpds
                .iter()
                .filter_map(|id| store.cpd(*id))
                .map(|cpd| cpd.prefix)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Runs one pass: grants missing CPDs, drops stale ones, and fires any
    /// lease whose batching window has elapsed. Returns the ids of leases
    /// that should be notified this tick.
    pub fn run(&mut self, store: &mut PaStore, config: &PaPdConfig, now: Time) -> Vec<String> {
        let dps: Vec<(Id<Dp>, Dp)> = store.dps().map(|(id, dp)| (id, dp.clone())).collect();
        let mut due = Vec::new();

        for (lease_id, lease) in self.leases.iter_mut() {
            lease.cpds.retain(|id| store.cpd(*id).is_some());

            let mut changed = false;
            for (dp_id, dp) in &dps {
                if lease.cpds.iter().any(|id| store.cpd(*id).map_or(false, |c| c.dp == *dp_id)) {
                    continue;
                }
                let plen = match effective_len(dp.prefix.plen, lease.preferred_len, lease.max_len, config) {
                    Some(plen) => plen,
                    None => continue,
                };
                if plen <= dp.prefix.plen || plen > 128 {
                    continue;
                }
                if let Some(prefix) =
                    find_free_subprefix(store, *dp_id, dp, lease_id.as_bytes(), plen)
                {
                    let cpd_id = store.create_cpd(Cpd::new(lease_id.clone(), *dp_id, prefix));
                    lease.cpds.push(cpd_id);
                    changed = true;
                }
            }

            if changed || lease.just_created {
                lease.update_timer.arm_no_later_than(now.plus_ms(config.update_batch_ms));
                lease.just_created = false;
            }

            if lease.update_timer.is_due(now) {
                lease.update_timer.cancel();
                due.push(lease_id.clone());
            }
        }

        due
    }
}

fn find_free_subprefix(
    store: &PaStore,
    dp_id: Id<Dp>,
    dp: &Dp,
    seed: &[u8],
    plen: u8,
) -> Option<Prefix> {
    let anchor = dp.prefix.prandom_subprefix(seed, 0, plen)?;
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
