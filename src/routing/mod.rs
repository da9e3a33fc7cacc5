//! Routing: protocol election, the BFS fallback, and the external backend
//! driver (spec §4.7/§4.9).

pub mod backend;
pub mod bfs;
pub mod election;

pub use backend::RoutingBackend;
pub use election::{elect, Election, ROUTING_NONE};

use crate::iface::InterfaceRegistry;
use crate::node::FloodView;

/// Ties election and the BFS fallback together: elects a protocol each run,
/// hands off to the external backend on a change, and otherwise keeps the
/// BFS-installed route set current.
///
/// Grounded in `hncp_routing_run`: the first run always triggers the
/// enable/disable transition logic, since `active` starts at `None` (the
/// original's `HNCP_ROUTING_MAX` sentinel, distinct from every real `0..MAX`
/// value).
pub struct RoutingEngine {
    active: Option<u8>,
    backend: RoutingBackend,
    max_protocol: u8,
}

impl RoutingEngine {
    /// Creates an engine with nothing elected yet.
    pub fn new(backend: RoutingBackend, max_protocol: u8) -> RoutingEngine {
        RoutingEngine {
            active: None,
            backend,
            max_protocol,
        }
    }

    /// The currently active protocol, or [`ROUTING_NONE`] before the first
    /// run.
    pub fn active(&self) -> u8 {
        self.active.unwrap_or(ROUTING_NONE)
    }

    /// Runs one election + routing pass.
    pub fn run(&mut self, flood: &impl FloodView, ifaces: &mut InterfaceRegistry) {
        let result = elect(flood, self.max_protocol);
        let ifnames: Vec<String> = ifaces.iter().map(|i| i.ifname.clone()).collect();

        if self.active != Some(result.protocol) {
            match self.active {
                None | Some(ROUTING_NONE) => {
                    // Leaving the fallback (or starting up into a backend):
                    // nothing to disable, just let whatever BFS previously
                    // installed stand until the backend takes over.
                }
                Some(previous) => {
                    let _ = self.backend.disable(previous, &ifnames);
                }
            }
            self.active = Some(result.protocol);
            if result.protocol != ROUTING_NONE {
                let _ = self.backend.enable(result.protocol, &ifnames);
            }
        }

        if self.active() == ROUTING_NONE {
            bfs::run(flood, ifaces);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TestFloodView;
    use crate::rid::RouterId;
    use std::path::PathBuf;

    #[test]
    fn no_backend_configured_always_runs_bfs() {
        let flood = TestFloodView::new(RouterId::new(1), vec![]);
        let mut ifaces = InterfaceRegistry::new();
        let mut engine = RoutingEngine::new(RoutingBackend::new(None::<PathBuf>), 64);
        engine.run(&flood, &mut ifaces);
        assert_eq!(engine.active(), ROUTING_NONE);
    }
}
