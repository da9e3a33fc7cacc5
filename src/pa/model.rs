//! The PA data model (spec §3/§4.3): delegated/assigned/committed prefixes
//! and PD leases, with FIFO subscriber notification and deferred deletion.

use bitflags::bitflags;

use crate::pa::arena::{Arena, Id};
use crate::prefix::Prefix;
use crate::rid::RouterId;
use crate::time::{Time, Timer};

bitflags! {
    /// What changed about an entity in a given [`PaEvent`].
    #[derive(Default)]
    pub struct ChangeFlags: u32 {
        /// The entity was just created.
        const CREATED = 0b0000_0001;
        /// The entity is marked for deletion; it will be gone after the
        /// next [`PaStore::gc`].
        const TODELETE = 0b0000_0010;
        /// `valid_until`/`preferred_until` changed.
        const LIFETIMES = 0b0000_0100;
        /// The opaque DHCP option blob changed.
        const DHCP = 0b0000_1000;
        /// The owning interface/link changed.
        const IFACE = 0b0001_0000;
        /// The owning RID changed, as reported by the flooding layer.
        const FLOOD_RID = 0b0010_0000;
        /// The flooding layer's convergence delay estimate changed.
        const FLOOD_DELAY = 0b0100_0000;
    }
}

/// Which entity kind a [`PaEvent`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Delegated prefixes.
    Dps,
    /// Assigned prefixes.
    Aps,
    /// Committed prefixes.
    Cps,
    /// PD-reserved committed prefixes.
    Cpds,
    /// Flooding-layer-wide state (RID, convergence delay).
    Flood,
    /// The local IPv4 element specifically.
    Ipv4,
}

/// One change notification, delivered to every subscriber in FIFO order.
#[derive(Debug, Clone, Copy)]
pub struct PaEvent {
    /// Which entity kind changed.
    pub category: EventCategory,
    /// What changed about it.
    pub change: ChangeFlags,
}

/// A delegated prefix: learned from an uplink, or generated locally.
#[derive(Debug, Clone)]
pub struct Dp {
    /// The delegated prefix.
    pub prefix: Prefix,
    /// Absolute valid-lifetime expiry.
    pub valid_until: Time,
    /// Absolute preferred-lifetime expiry, `<= valid_until`.
    pub preferred_until: Time,
    /// Opaque DHCP option blob carried with this delegation.
    pub dhcp: Vec<u8>,
    /// Owning RID, for externally learned DPs.
    pub owner: Option<RouterId>,
    /// True for locally generated DPs (ULA, IPv4 fallback, PD lease source).
    pub local: bool,
    to_delete: bool,
}

/// An assigned prefix: a `(prefix, link)` binding some router claims.
#[derive(Debug, Clone)]
pub struct Ap {
    /// The DP this assignment is carved from.
    pub dp: Id<Dp>,
    /// The local interface this assignment applies to.
    pub link: String,
    /// The assigned prefix.
    pub prefix: Prefix,
    /// Advertising router's RID.
    pub rid: RouterId,
    /// Whether this AP is authoritative on its link.
    pub authoritative: bool,
    /// Advertiser's priority.
    pub priority: u8,
    to_delete: bool,
}

/// A committed prefix's lifecycle state (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpState {
    /// No prefix chosen yet.
    None,
    /// Proposed locally, not yet advertised.
    Proposed,
    /// Advertised to the network, not yet safe to apply.
    Advertised,
    /// Applied: in active use on the link.
    Applied,
}

/// This router's locally applied AP for a given `(DP, link)`.
#[derive(Debug, Clone)]
pub struct Cp {
    /// The DP this CP is carved from.
    pub dp: Id<Dp>,
    /// The local interface this CP applies to.
    pub link: String,
    /// The committed prefix.
    pub prefix: Prefix,
    /// Current lifecycle state.
    pub state: CpState,
    /// True if this router authored the prefix (vs. adopting a remote AP).
    pub authoritative: bool,
    /// Priority used in conflict resolution.
    pub priority: u8,
    /// RID this CP is attributed to (self, unless adopted from a remote AP).
    pub rid: RouterId,
    /// Bumped on every change that should invalidate an in-flight apply
    /// delay; the apply timer only fires if the generation is unchanged
    /// since it was armed.
    pub generation: u64,
    /// Timer governing the `ADVERTISED -> APPLIED` transition.
    pub apply_timer: Timer,
    to_delete: bool,
}

/// A CP reserved out of a DP for a downstream PD client.
#[derive(Debug, Clone)]
pub struct Cpd {
    /// The lease this CPD was reserved for.
    pub lease_id: String,
    /// The DP this CPD is carved from.
    pub dp: Id<Dp>,
    /// The reserved prefix.
    pub prefix: Prefix,
    /// Whether this CPD has completed its apply delay.
    pub applied: bool,
    to_delete: bool,
}

/// Handle returned by [`PaStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// The authoritative in-memory PA state: DPs, APs, CPs, CPDs, and this
/// router's own RID as derived from flood state.
pub struct PaStore {
    self_rid: RouterId,
    dps: Arena<Dp>,
    aps: Arena<Ap>,
    cps: Arena<Cp>,
    cpds: Arena<Cpd>,
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(&PaEvent)>)>,
    next_sub_id: u64,
}

impl PaStore {
    /// Creates an empty store for a router with the given RID.
    pub fn new(self_rid: RouterId) -> PaStore {
        PaStore {
            self_rid,
            dps: Arena::new(),
            aps: Arena::new(),
            cps: Arena::new(),
            cpds: Arena::new(),
            subscribers: Vec::new(),
            next_sub_id: 0,
        }
    }

    /// This router's own RID.
    pub fn self_rid(&self) -> RouterId {
        self.self_rid
    }

    /// Registers a subscriber. Subscribers observe events in the order they
    /// subscribed and cannot mutate the store from their callback — they
    /// only ever see `&PaEvent`, never `&mut PaStore` — so any reaction
    /// must schedule itself for the next tick instead, per spec §5.
    pub fn subscribe(&mut self, callback: Box<dyn FnMut(&PaEvent)>) -> SubscriptionId {
        let id = SubscriptionId(self.next_sub_id);
        self.next_sub_id += 1;
        self.subscribers.push((id, callback));
        id
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    fn publish(&mut self, category: EventCategory, change: ChangeFlags) {
        let event = PaEvent { category, change };
        for (_, callback) in self.subscribers.iter_mut() {
            callback(&event);
        }
    }

    // -- DPs ----------------------------------------------------------

    /// Inserts a new DP and notifies subscribers.
    pub fn create_dp(&mut self, dp: Dp) -> Id<Dp> {
        let id = self.dps.insert(dp);
        self.publish(EventCategory::Dps, ChangeFlags::CREATED);
        id
    }

    /// Borrows a DP.
    pub fn dp(&self, id: Id<Dp>) -> Option<&Dp> {
        self.dps.get(id)
    }

    /// Mutably borrows a DP.
    pub fn dp_mut(&mut self, id: Id<Dp>) -> Option<&mut Dp> {
        self.dps.get_mut(id)
    }

    /// Iterates all live DPs.
    pub fn dps(&self) -> impl Iterator<Item = (Id<Dp>, &Dp)> {
        self.dps.iter()
    }

    /// Updates a DP's lifetimes and notifies subscribers.
    pub fn refresh_dp_lifetimes(&mut self, id: Id<Dp>, valid_until: Time, preferred_until: Time) {
        if let Some(dp) = self.dps.get_mut(id) {
            dp.valid_until = valid_until;
            dp.preferred_until = preferred_until;
        }
        self.publish(EventCategory::Dps, ChangeFlags::LIFETIMES);
    }

    /// Marks a DP and everything that depends on it (`Ap`/`Cp`/`Cpd`) for
    /// deletion and notifies subscribers; actual removal happens on the
    /// next [`PaStore::gc`].
    pub fn delete_dp(&mut self, id: Id<Dp>) {
        if let Some(dp) = self.dps.get_mut(id) {
            dp.to_delete = true;
        } else {
            return;
        }

        let mut any_ap = false;
        for (_, ap) in self.aps.iter_mut() {
            if ap.dp == id {
                ap.to_delete = true;
                any_ap = true;
            }
        }
        let mut any_cp = false;
        for (_, cp) in self.cps.iter_mut() {
            if cp.dp == id {
                cp.to_delete = true;
                any_cp = true;
            }
        }
        let mut any_cpd = false;
        for (_, cpd) in self.cpds.iter_mut() {
            if cpd.dp == id {
                cpd.to_delete = true;
                any_cpd = true;
            }
        }

        if any_ap {
            self.publish(EventCategory::Aps, ChangeFlags::TODELETE);
        }
        if any_cp {
            self.publish(EventCategory::Cps, ChangeFlags::TODELETE);
        }
        if any_cpd {
            self.publish(EventCategory::Cpds, ChangeFlags::TODELETE);
        }
        self.publish(EventCategory::Dps, ChangeFlags::TODELETE);
    }

    /// Deletes every DP whose `valid_until` has passed, cascading to
    /// dependents exactly as [`PaStore::delete_dp`] does.
    pub fn expire_stale_dps(&mut self, now: Time) {
        let expired: Vec<Id<Dp>> = self
            .dps
            .iter()
            .filter(|(_, dp)| dp.valid_until <= now)
            .map(|(id, _)| id)
            .collect();
        for id in expired {
            self.delete_dp(id);
        }
    }

    // -- APs ----------------------------------------------------------

    /// Inserts a new AP and notifies subscribers.
    pub fn create_ap(&mut self, ap: Ap) -> Id<Ap> {
        let id = self.aps.insert(ap);
        self.publish(EventCategory::Aps, ChangeFlags::CREATED);
        id
    }

    /// Borrows an AP.
    pub fn ap(&self, id: Id<Ap>) -> Option<&Ap> {
        self.aps.get(id)
    }

    /// Iterates all live APs.
    pub fn aps(&self) -> impl Iterator<Item = (Id<Ap>, &Ap)> {
        self.aps.iter()
    }

    /// Iterates live APs on a given link.
    pub fn aps_on_link<'a>(&'a self, link: &'a str) -> impl Iterator<Item = (Id<Ap>, &'a Ap)> {
        self.aps.iter().filter(move |(_, ap)| ap.link == link)
    }

    /// Marks an AP for deletion.
    pub fn remove_ap(&mut self, id: Id<Ap>) {
        if let Some(ap) = self.aps.get_mut(id) {
            ap.to_delete = true;
            self.publish(EventCategory::Aps, ChangeFlags::TODELETE);
        }
    }

    // -- CPs ----------------------------------------------------------

    /// Inserts a new CP and notifies subscribers.
    pub fn create_cp(&mut self, cp: Cp) -> Id<Cp> {
        let id = self.cps.insert(cp);
        self.publish(EventCategory::Cps, ChangeFlags::CREATED);
        id
    }

    /// Borrows a CP.
    pub fn cp(&self, id: Id<Cp>) -> Option<&Cp> {
        self.cps.get(id)
    }

    /// Mutably borrows a CP.
    pub fn cp_mut(&mut self, id: Id<Cp>) -> Option<&mut Cp> {
        self.cps.get_mut(id)
    }

    /// Iterates all live CPs.
    pub fn cps(&self) -> impl Iterator<Item = (Id<Cp>, &Cp)> {
        self.cps.iter()
    }

    /// Iterates live CPs on a given link.
    pub fn cps_on_link<'a>(&'a self, link: &'a str) -> impl Iterator<Item = (Id<Cp>, &'a Cp)> {
        self.cps.iter().filter(move |(_, cp)| cp.link == link)
    }

    /// Advances a CP's state and bumps its generation, invalidating any
    /// in-flight apply delay.
    pub fn transition_cp(&mut self, id: Id<Cp>, new_state: CpState) {
        if let Some(cp) = self.cps.get_mut(id) {
            cp.state = new_state;
            cp.generation += 1;
        }
        self.publish(EventCategory::Cps, ChangeFlags::LIFETIMES);
    }

    /// Marks a CP for deletion (withdrawal).
    pub fn withdraw_cp(&mut self, id: Id<Cp>) {
        if let Some(cp) = self.cps.get_mut(id) {
            cp.to_delete = true;
            self.publish(EventCategory::Cps, ChangeFlags::TODELETE);
        }
    }

    // -- CPDs ---------------------------------------------------------

    /// Inserts a new CPD and notifies subscribers.
    pub fn create_cpd(&mut self, cpd: Cpd) -> Id<Cpd> {
        let id = self.cpds.insert(cpd);
        self.publish(EventCategory::Cpds, ChangeFlags::CREATED);
        id
    }

    /// Borrows a CPD.
    pub fn cpd(&self, id: Id<Cpd>) -> Option<&Cpd> {
        self.cpds.get(id)
    }

    /// Mutably borrows a CPD.
    pub fn cpd_mut(&mut self, id: Id<Cpd>) -> Option<&mut Cpd> {
        self.cpds.get_mut(id)
    }

    /// Iterates all live CPDs belonging to a lease.
    pub fn cpds_for_lease<'a>(
        &'a self,
        lease_id: &'a str,
    ) -> impl Iterator<Item = (Id<Cpd>, &'a Cpd)> {
        self.cpds.iter().filter(move |(_, c)| c.lease_id == lease_id)
    }

    /// Marks a CPD for deletion.
    pub fn remove_cpd(&mut self, id: Id<Cpd>) {
        if let Some(cpd) = self.cpds.get_mut(id) {
            cpd.to_delete = true;
            self.publish(EventCategory::Cpds, ChangeFlags::TODELETE);
        }
    }

    /// True iff `candidate` overlaps any AP, live CP, or CPD already carved
    /// out of `dp` — the collision check the selection search in PA core
    /// and PA PD both run before proposing a sub-prefix.
    pub fn prefix_occupied(&self, dp: Id<Dp>, candidate: &Prefix) -> bool {
        let overlaps = |a: &Prefix, b: &Prefix| a.contains(b) || b.contains(a);
        self.aps.iter().any(|(_, ap)| ap.dp == dp && overlaps(&ap.prefix, candidate))
            || self
                .cps
                .iter()
                .any(|(_, cp)| cp.dp == dp && cp.state != CpState::None && overlaps(&cp.prefix, candidate))
            || self.cpds.iter().any(|(_, cpd)| cpd.dp == dp && overlaps(&cpd.prefix, candidate))
    }

    /// Purges every entity marked for deletion. Always called after a
    /// tick's subscribers have all observed the `TODELETE` events — never
    /// inline with `delete_dp`/`withdraw_cp`/etc. — so a subscriber reacting
    /// to deletion can still read the doomed entity's last known fields.
    pub fn gc(&mut self) {
        let dead: Vec<_> = self.aps.iter().filter(|(_, a)| a.to_delete).map(|(id, _)| id).collect();
        for id in dead {
            self.aps.remove(id);
        }
        let dead: Vec<_> = self.cps.iter().filter(|(_, c)| c.to_delete).map(|(id, _)| id).collect();
        for id in dead {
            self.cps.remove(id);
        }
        let dead: Vec<_> = self.cpds.iter().filter(|(_, c)| c.to_delete).map(|(id, _)| id).collect();
        for id in dead {
            self.cpds.remove(id);
        }
        let dead: Vec<_> = self.dps.iter().filter(|(_, d)| d.to_delete).map(|(id, _)| id).collect();
        for id in dead {
            self.dps.remove(id);
        }
    }
}

impl Dp {
    /// Builds a DP. `to_delete` always starts false.
    pub fn new(
        prefix: Prefix,
        valid_until: Time,
        preferred_until: Time,
        owner: Option<RouterId>,
        local: bool,
    ) -> Dp {
        Dp {
            prefix,
            valid_until,
            preferred_until,
            dhcp: Vec::new(),
            owner,
            local,
            to_delete: false,
        }
    }
}

impl Ap {
    /// Builds an AP. `to_delete` always starts false.
    pub fn new(
        dp: Id<Dp>,
        link: impl Into<String>,
        prefix: Prefix,
        rid: RouterId,
        authoritative: bool,
        priority: u8,
    ) -> Ap {
        Ap {
            dp,
            link: link.into(),
            prefix,
            rid,
            authoritative,
            priority,
            to_delete: false,
        }
    }
}

impl Cp {
    /// Builds a CP in state `None`. `to_delete` always starts false.
    pub fn new(dp: Id<Dp>, link: impl Into<String>, rid: RouterId, priority: u8) -> Cp {
        Cp {
            dp,
            link: link.into(),
            prefix: Prefix::new(0, 0),
            state: CpState::None,
            authoritative: true,
            priority,
            rid,
            generation: 0,
            apply_timer: Timer::new(),
            to_delete: false,
        }
    }
}

impl Cpd {
    /// Builds a CPD. `to_delete` always starts false.
    pub fn new(lease_id: impl Into<String>, dp: Id<Dp>, prefix: Prefix) -> Cpd {
        Cpd {
            lease_id: lease_id.into(),
            dp,
            prefix,
            applied: false,
            to_delete: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn rid(n: u64) -> RouterId {
        RouterId::new(n)
    }

    #[test]
    fn deleting_dp_cascades_to_dependents_and_defers_removal() {
        let mut store = PaStore::new(rid(1));
        let dp_id = store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time(1000),
            Time(500),
            None,
            true,
        ));
        let ap_id = store.create_ap(Ap::new(
            dp_id,
            "eth0",
            Prefix::pton("2001:db8:1::/48").unwrap(),
            rid(1),
            true,
            2,
        ));
        let cp_id = store.create_cp(Cp::new(dp_id, "eth0", rid(1), 2));

        store.delete_dp(dp_id);
        // Still present until gc() runs.
        assert!(store.ap(ap_id).is_some());
        assert!(store.cp(cp_id).is_some());

        store.gc();
        assert!(store.ap(ap_id).is_none());
        assert!(store.cp(cp_id).is_none());
        assert!(store.dp(dp_id).is_none());
    }

    #[test]
    fn subscribers_observe_in_fifo_order_and_cannot_mutate() {
        let mut store = PaStore::new(rid(1));
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        store.subscribe(Box::new(move |_event| o1.borrow_mut().push(1)));
        let o2 = order.clone();
        store.subscribe(Box::new(move |_event| o2.borrow_mut().push(2)));

        store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time(1000),
            Time(500),
            None,
            true,
        ));

        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn expire_stale_dps_removes_past_valid_until() {
        let mut store = PaStore::new(rid(1));
        let dp_id = store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time(100),
            Time(50),
            None,
            true,
        ));
        store.expire_stale_dps(Time(100));
        store.gc();
        assert!(store.dp(dp_id).is_none());
    }
}
