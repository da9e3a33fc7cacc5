//! The external routing backend: a subprocess helper script invoked with
//! `enumerate`/`enable`/`disable`/`reconfigure` (spec §4.9), grounded in
//! `call_backend` in `examples/original_source/src/hncp_routing.c`. Absent a
//! configured script, every call is a no-op and the daemon runs the BFS
//! fallback exclusively.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::warn;

use crate::error::Result;

/// Drives the configured routing-backend helper script, if any.
#[derive(Debug, Clone)]
pub struct RoutingBackend {
    script: Option<PathBuf>,
}

impl RoutingBackend {
    /// Creates a backend driver. `script` is the configured
    /// `routing.backend_script`; `None` runs in pure-BFS mode.
    pub fn new(script: Option<impl Into<PathBuf>>) -> RoutingBackend {
        RoutingBackend {
            script: script.map(Into::into),
        }
    }

    /// True if a backend script is configured at all.
    pub fn is_configured(&self) -> bool {
        self.script.is_some()
    }

    /// Runs `enumerate`, parsing `"<protocol> <preference>"` lines from its
    /// stdout into the `HNCP_T_ROUTING_PROTOCOL` TLVs this router should
    /// originate. Returns an empty list if no script is configured.
    pub fn enumerate(&self, max_protocol: u8) -> Result<Vec<(u8, u8)>> {
        let Some(script) = &self.script else {
            return Ok(Vec::new());
        };
        let output = Command::new(script)
            .arg("enumerate")
            .arg("0")
            .stdout(Stdio::piped())
            .output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let mut records = Vec::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(proto), Some(pref)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(proto), Ok(pref)) = (proto.parse::<u8>(), pref.parse::<u8>()) else {
                continue;
            };
            if proto < max_protocol {
                records.push((proto, pref));
            }
        }
        Ok(records)
    }

    /// Invokes the script with `enable <protocol> <ifaces...>`.
    pub fn enable(&self, protocol: u8, ifaces: &[String]) -> Result<()> {
        self.call("enable", protocol, ifaces)
    }

    /// Invokes the script with `disable <protocol> <ifaces...>`.
    pub fn disable(&self, protocol: u8, ifaces: &[String]) -> Result<()> {
        self.call("disable", protocol, ifaces)
    }

    /// Invokes the script with `reconfigure <protocol> <ifaces...>`, used
    /// when the interface set changes while a backend is active.
    pub fn reconfigure(&self, protocol: u8, ifaces: &[String]) -> Result<()> {
        self.call("reconfigure", protocol, ifaces)
    }

    fn call(&self, action: &str, protocol: u8, ifaces: &[String]) -> Result<()> {
        let Some(script) = &self.script else {
            return Ok(());
        };
        let status = Command::new(script)
            .arg(action)
            .arg(protocol.to_string())
            .args(ifaces)
            .status()?;
        if !status.success() {
            warn!(?script, action, "routing backend script exited non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_backend_enumerates_nothing_and_ignores_calls() {
        let backend = RoutingBackend::new(None::<PathBuf>);
        assert!(!backend.is_configured());
        assert_eq!(backend.enumerate(64).unwrap(), Vec::new());
        assert!(backend.enable(3, &[]).is_ok());
        assert!(backend.disable(3, &[]).is_ok());
    }
}
