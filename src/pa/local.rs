//! PA local (spec §4.5): generates the local ULA and IPv4-fallback DPs when
//! this router holds the highest RID among routers with routing intent.
//!
//! Two independent [`LocalElement`]s are driven identically; the original's
//! `pa_local_init` zeroed the ULA element's `timeout`/`create_start` twice
//! instead of initializing the IPv4 element's copies (see `DESIGN.md`,
//! Open Question (a)) — both elements are initialized independently here.

use bitflags::bitflags;
use tracing::debug;

use crate::config::PaConfig;
use crate::node::FloodView;
use crate::pa::arena::Id;
use crate::pa::model::{Dp, PaStore};
use crate::prefix::Prefix;
use crate::store::Store;
use crate::time::Time;

bitflags! {
    /// What a call to [`LocalElement::status`] permits.
    pub struct LocalStatus: u8 {
        /// The existing LDP (if any) may keep being refreshed.
        const CAN_KEEP = 0b01;
        /// A new LDP may be created if none exists.
        const CAN_CREATE = 0b10;
    }
}

/// Which prefix family a [`LocalElement`] generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// The ULA element, generating a `/48` inside `fc00::/7`.
    Ula,
    /// The IPv4-fallback element.
    Ipv4,
}

fn matches_filter(kind: ElementKind, prefix: &Prefix) -> bool {
    match kind {
        ElementKind::Ula => prefix.is_ula(),
        ElementKind::Ipv4 => prefix.is_ipv4(),
    }
}

fn disabled_by_config(kind: ElementKind, config: &PaConfig, store: &PaStore) -> bool {
    match kind {
        ElementKind::Ula => {
            if !config.use_ula {
                return true;
            }
            config.no_ula_if_glb_ipv6
                && store
                    .dps()
                    .any(|(_, dp)| !dp.local && dp.prefix.is_global())
        }
        ElementKind::Ipv4 => {
            if !config.use_ipv4 {
                return true;
            }
            config.no_ipv4_if_glb_ipv4
                && store
                    .dps()
                    .any(|(_, dp)| !dp.local && dp.prefix.is_ipv4())
        }
    }
}

/// One of the two local-generation elements (ULA or IPv4).
#[derive(Debug)]
pub struct LocalElement {
    kind: ElementKind,
    ldp: Option<Id<Dp>>,
    create_start: Time,
    timeout: Time,
}

impl LocalElement {
    /// Creates an element with nothing scheduled. Each element owns its own
    /// independent `create_start`/`timeout` pair.
    pub fn new(kind: ElementKind) -> LocalElement {
        LocalElement {
            kind,
            ldp: None,
            create_start: Time::ZERO,
            timeout: Time::ZERO,
        }
    }

    /// `get_status`: computes `{CAN_KEEP, CAN_CREATE}` for this element.
    pub fn status(&self, store: &PaStore, config: &PaConfig) -> LocalStatus {
        if disabled_by_config(self.kind, config, store) {
            return LocalStatus::empty();
        }

        let self_rid = store.self_rid();
        let blocked = store.dps().any(|(_, dp)| {
            matches_filter(self.kind, &dp.prefix)
                && ((dp.local && dp.owner.is_some())
                    || dp.owner.map_or(false, |r| r > self_rid))
        });
        if blocked {
            return LocalStatus::empty();
        }

        let mut status = LocalStatus::CAN_KEEP;
        let max_other_rid = store
            .aps()
            .map(|(_, ap)| ap.rid)
            .chain(store.dps().filter_map(|(_, dp)| dp.owner))
            .max();
        if max_other_rid.map_or(true, |rid| self_rid >= rid) {
            status |= LocalStatus::CAN_CREATE;
        }
        status
    }

    /// `create`: generates this element's prefix. ULA prefers the
    /// persisted store, then a random `/48`, then a configured fixed
    /// prefix; IPv4 returns the configured fallback.
    fn create(&self, config: &PaConfig, persisted: &mut Store) -> Option<Prefix> {
        match self.kind {
            ElementKind::Ula => {
                if let Some(p) = persisted.ula_prefix() {
                    return Some(p);
                }
                if let Some(p) = crate::prefix::IPV6_ULA_PREFIX.random_subprefix(config.ula_plen) {
                    let _ = persisted.set_ula_prefix(p);
                    return Some(p);
                }
                config.ula_fixed_prefix.as_deref().and_then(Prefix::pton)
            }
            ElementKind::Ipv4 => Prefix::pton(&config.ipv4_fallback_prefix),
        }
    }

    fn update(&mut self, store: &mut PaStore, config: &PaConfig, now: Time) -> Time {
        let valid_until = now.plus_ms(config.valid_lifetime_ms);
        let preferred_until = now.plus_ms(config.preferred_lifetime_ms);
        if let Some(id) = self.ldp {
            store.refresh_dp_lifetimes(id, valid_until, preferred_until);
        }
        self.timeout = valid_until.minus_ms(config.update_delay_ms);
        self.timeout
    }

    /// `pa_local_algo`'s per-element body. Returns the element's next
    /// requested wakeup, if any.
    fn run(
        &mut self,
        store: &mut PaStore,
        config: &PaConfig,
        persisted: &mut Store,
        now: Time,
    ) -> Option<Time> {
        let status = self.status(store, config);

        if status.is_empty() {
            if let Some(id) = self.ldp.take() {
                store.delete_dp(id);
            }
            self.timeout = Time::ZERO;
            self.create_start = Time::ZERO;
            return None;
        }

        if let Some(id) = self.ldp {
            if !status.contains(LocalStatus::CAN_KEEP) {
                store.delete_dp(id);
                self.ldp = None;
                self.timeout = Time::ZERO;
                return None;
            }
            if self.timeout != Time::ZERO && self.timeout <= now {
                return Some(self.update(store, config, now));
            }
            return Some(self.timeout);
        }

        if status.contains(LocalStatus::CAN_CREATE) {
            if self.create_start == Time::ZERO {
                self.create_start = now;
                self.timeout = now.plus_ms(2 * config.flooding_delay_ms);
                return Some(self.timeout);
            }
            if self.timeout <= now {
                let prefix = match self.create(config, persisted) {
                    Some(p) => p,
                    None => {
                        debug!(kind = ?self.kind, "local element could not generate a prefix");
                        return None;
                    }
                };
                let id = store.create_dp(Dp::new(prefix, now, now, None, true));
                self.ldp = Some(id);
                return Some(self.update(store, config, now));
            }
            return Some(self.timeout);
        }

        self.timeout = Time::ZERO;
        None
    }
}

/// Drives both the ULA and IPv4 elements.
pub struct PaLocal {
    ula: LocalElement,
    ipv4: LocalElement,
    last_run: Option<Time>,
}

impl PaLocal {
    /// Creates a driver with both elements freshly initialized.
    pub fn new() -> PaLocal {
        PaLocal {
            ula: LocalElement::new(ElementKind::Ula),
            ipv4: LocalElement::new(ElementKind::Ipv4),
            last_run: None,
        }
    }

    /// Runs both elements, honoring the "never sooner than 5ms after the
    /// previous run" scheduling floor. Returns the earliest requested
    /// wakeup.
    pub fn run(
        &mut self,
        store: &mut PaStore,
        _flood: &impl FloodView,
        config: &PaConfig,
        persisted: &mut Store,
        now: Time,
    ) -> Option<Time> {
        if let Some(last) = self.last_run {
            let floor = last.plus_ms(5);
            if now < floor {
                return Some(floor);
            }
        }
        self.last_run = Some(now);

        let a = self.ula.run(store, config, persisted, now);
        let b = self.ipv4.run(store, config, persisted, now);
        crate::time::earliest(a, b)
    }
}

impl Default for PaLocal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TestFloodView;
    use crate::rid::RouterId;

    fn test_config() -> PaConfig {
        PaConfig {
            flooding_delay_ms: 2_000,
            ..PaConfig::default()
        }
    }

    #[test]
    fn s6_ula_activates_when_highest_rid_and_withdraws_on_global_dp() {
        let mut store = PaStore::new(RouterId::new(100));
        let flood = TestFloodView::new(RouterId::new(100), vec![]);
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let mut persisted = Store::open(dir.path().join("state.json"));
        let mut pa_local = PaLocal::new();

        // First run: no DP yet, highest RID in the flood -> start debounce.
        pa_local.run(&mut store, &flood, &config, &mut persisted, Time(0));
        assert_eq!(store.dps().count(), 0);

        let after = Time(2 * config.flooding_delay_ms + 5);
        pa_local.run(&mut store, &flood, &config, &mut persisted, after);

        let ula_dp = store
            .dps()
            .find(|(_, dp)| dp.local && dp.prefix.is_ula())
            .map(|(_, dp)| dp.clone())
            .expect("expected exactly one local ULA DP");
        assert_eq!(ula_dp.prefix.plen, 48);
        assert!(crate::prefix::IPV6_ULA_PREFIX.contains(&ula_dp.prefix));
        assert!(ula_dp.valid_until.saturating_sub(after) > 0);

        // A peer floods a global IPv6 DP; the local ULA should withdraw.
        store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time(10_000_000),
            Time(9_000_000),
            Some(RouterId::new(50)),
            false,
        ));
        store.gc();

        let next = after.plus_ms(10);
        pa_local.run(&mut store, &flood, &config, &mut persisted, next);
        store.gc();
        assert!(!store.dps().any(|(_, dp)| dp.local && dp.prefix.is_ula()));
    }

    #[test]
    fn lower_rid_router_does_not_create() {
        let mut store = PaStore::new(RouterId::new(1));
        store.create_dp(Dp::new(
            Prefix::pton("2001:db8::/32").unwrap(),
            Time(10_000_000),
            Time(9_000_000),
            Some(RouterId::new(99)),
            false,
        ));
        let flood = TestFloodView::new(RouterId::new(1), vec![]);
        let config = test_config();
        let dir = tempfile::tempdir().unwrap();
        let mut persisted = Store::open(dir.path().join("state.json"));
        let mut pa_local = PaLocal::new();

        pa_local.run(&mut store, &flood, &config, &mut persisted, Time(0));
        pa_local.run(
            &mut store,
            &flood,
            &config,
            &mut persisted,
            Time(2 * config.flooding_delay_ms + 100),
        );
        assert!(!store.dps().any(|(_, dp)| dp.local));
    }
}
