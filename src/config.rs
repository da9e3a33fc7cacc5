//! Daemon configuration: PA/PA-local/PA-PD tunables, the IPC socket path,
//! the routing backend script, and logging verbosity. Loaded from an
//! optional TOML file and overridable by CLI flags in `src/bin/homenetd.rs`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Prefix-assignment tunables (spec §4.4/§4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaConfig {
    /// Whether this router may generate a ULA prefix at all.
    pub use_ula: bool,
    /// Withdraw the local ULA once a global IPv6 DP is present.
    pub no_ula_if_glb_ipv6: bool,
    /// Whether this router may generate the IPv4 fallback prefix.
    pub use_ipv4: bool,
    /// Withdraw the local IPv4 fallback once a global IPv4 DP is present.
    pub no_ipv4_if_glb_ipv4: bool,
    /// Length of generated ULA prefixes.
    pub ula_plen: u8,
    /// A fixed ULA prefix to fall back to if random generation is disabled
    /// (parsed with [`crate::prefix::Prefix::pton`] at startup).
    pub ula_fixed_prefix: Option<String>,
    /// The IPv4 fallback prefix, IPv4-mapped form.
    pub ipv4_fallback_prefix: String,
    /// Priority this router advertises on proposed/advertised CPs.
    pub priority: u8,
    /// Upper bound on flood convergence; the debounce unit for PA state
    /// transitions.
    pub flooding_delay_ms: u64,
    /// Preferred lifetime assigned to locally generated DPs.
    pub preferred_lifetime_ms: u64,
    /// Valid lifetime assigned to locally generated DPs.
    pub valid_lifetime_ms: u64,
    /// How long before `valid_until` a DP's lifetimes are refreshed.
    pub update_delay_ms: u64,
}

impl Default for PaConfig {
    fn default() -> Self {
        PaConfig {
            use_ula: true,
            no_ula_if_glb_ipv6: true,
            use_ipv4: true,
            no_ipv4_if_glb_ipv4: false,
            ula_plen: 48,
            ula_fixed_prefix: None,
            ipv4_fallback_prefix: "10.0.0.0/8".to_string(),
            priority: 2,
            flooding_delay_ms: 2_000,
            preferred_lifetime_ms: 3_600_000,
            valid_lifetime_ms: 7_200_000,
            update_delay_ms: 300_000,
        }
    }
}

/// Prefix-delegation tunables (spec §4.6), defaults taken from the
/// original's `pa_pd.h`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaPdConfig {
    /// Never assign a PD lease a shorter prefix than this.
    pub pd_min_len: u8,
    /// Minimum ratio (as a power-of-two exponent) between a DP and the
    /// sub-prefixes handed out from it.
    pub pd_min_ratio_exp: u8,
    /// Batching window for a lease's `update_cb`.
    pub update_batch_ms: u64,
}

impl Default for PaPdConfig {
    fn default() -> Self {
        PaPdConfig {
            pd_min_len: 62,
            pd_min_ratio_exp: 3,
            update_batch_ms: 500,
        }
    }
}

/// IPC server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Path of the `AF_UNIX SOCK_DGRAM` socket to bind.
    pub socket_path: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            socket_path: "/var/run/hnetd.sock".to_string(),
        }
    }
}

/// Routing election/backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path to the external routing backend helper; `None` runs pure BFS.
    pub backend_script: Option<String>,
    /// Exclusive upper bound on routing protocol ids (`MAX` in spec §4.7).
    pub max_protocol: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            backend_script: None,
            max_protocol: 64,
        }
    }
}

/// Persistent-state configuration (spec §6 "Persistent state").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the on-disk store used to recall a previously chosen ULA
    /// prefix across restarts.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: "/var/lib/hnetd/state.json".to_string(),
        }
    }
}

/// The daemon's full configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix-assignment tunables.
    pub pa: PaConfig,
    /// Prefix-delegation tunables.
    pub pa_pd: PaPdConfig,
    /// IPC server configuration.
    pub ipc: IpcConfig,
    /// Routing election/backend configuration.
    pub routing: RoutingConfig,
    /// Persistent-state configuration.
    pub store: StoreConfig,
    /// Default `tracing` filter directive, overridable by `RUST_LOG`.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pa: PaConfig::default(),
            pa_pd: PaPdConfig::default(),
            ipc: IpcConfig::default(),
            routing: RoutingConfig::default(),
            store: StoreConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional TOML file; absent path yields
    /// all-default configuration.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        match path {
            None => Ok(Config::default()),
            Some(path) => {
                let text = fs::read_to_string(path)?;
                toml::from_str(&text)
                    .map_err(|e| Error::Parse(format!("invalid config at {:?}: {}", path, e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = Config::load(None).unwrap();
        assert!(cfg.pa.use_ula);
        assert_eq!(cfg.pa_pd.pd_min_len, 62);
        assert_eq!(cfg.ipc.socket_path, "/var/run/hnetd.sock");
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hnetd.toml");
        fs::write(&path, "[pa]\npriority = 5\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.pa.priority, 5);
        assert_eq!(cfg.pa_pd.pd_min_len, 62);
    }
}
