//! `homenetd` is the prefix-assignment and fallback-routing core of a
//! home-network control daemon: it negotiates a conflict-free address plan
//! with its peers over a flooded TLV database (the flooding itself is out
//! of scope — see [`node::FloodView`]), hands out committed prefixes to
//! local interfaces and downstream PD clients, and either drives an
//! external routing-protocol backend or falls back to BFS-computed routes.
//!
//! # Layout
//!
//! - [`prefix`] / [`tlv`] / [`rid`] / [`time`]: wire-format and value types
//!   shared across the rest of the crate.
//! - [`node`]: the read-only view over the flooded topology.
//! - [`iface`]: the local interface and route table.
//! - [`pa`]: the prefix-assignment data model, core state machine, local
//!   element generation, and prefix delegation.
//! - [`routing`]: protocol election, the external backend driver, and the
//!   BFS fallback.
//! - [`ipc`]: the control-socket server external tools talk to.
//! - [`config`] / [`store`] / [`logging`]: configuration, persisted state,
//!   and `tracing` setup.

pub mod config;
pub mod error;
pub mod iface;
pub mod ipc;
pub mod logging;
pub mod node;
pub mod pa;
pub mod prefix;
pub mod rid;
pub mod routing;
pub mod store;
pub mod time;
pub mod tlv;

pub use error::{Error, Result};
