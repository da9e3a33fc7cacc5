//! Persistent state (spec §6): an opaque on-disk store recalling a
//! previously chosen ULA prefix across restarts, so PA-local doesn't
//! regenerate a fresh random prefix on every startup.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::prefix::Prefix;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredState {
    ula_prefix: Option<String>,
}

/// A small `serde_json`-backed file recording state that should survive
/// daemon restarts.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    state: StoredState,
}

impl Store {
    /// Opens (or lazily creates) the store at `path`. A missing or corrupt
    /// file is treated as empty state rather than an error — this is
    /// recall-as-optimization, not a durability guarantee.
    pub fn open(path: impl Into<PathBuf>) -> Store {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt state store, starting empty");
                StoredState::default()
            }),
            Err(_) => StoredState::default(),
        };
        Store { path, state }
    }

    /// The previously persisted ULA prefix, if any and if still parseable.
    pub fn ula_prefix(&self) -> Option<Prefix> {
        self.state.ula_prefix.as_deref().and_then(Prefix::pton)
    }

    /// Persists a newly chosen ULA prefix.
    pub fn set_ula_prefix(&mut self, prefix: Prefix) -> Result<()> {
        self.state.ula_prefix = Some(prefix.ntop(true));
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.state)
            .expect("StoredState serialization cannot fail");
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ula_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let prefix = Prefix::pton("fc00:1234:5678::/48").unwrap();
        {
            let mut store = Store::open(&path);
            assert!(store.ula_prefix().is_none());
            store.set_ula_prefix(prefix).unwrap();
        }
        let reopened = Store::open(&path);
        assert_eq!(
            reopened.ula_prefix().unwrap().canonical().addr,
            prefix.canonical().addr
        );
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let store = Store::open(&path);
        assert!(store.ula_prefix().is_none());
    }
}
