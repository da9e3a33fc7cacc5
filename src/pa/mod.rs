//! Prefix assignment: the data model, core state machine, local-prefix
//! generation, and prefix delegation (spec §4.3–§4.6).

pub mod arena;
pub mod core;
pub mod local;
pub mod model;
pub mod pd;

pub use arena::{Arena, Id};
pub use core::{PaCore, PaCoreConfig};
pub use local::{ElementKind, LocalElement, LocalStatus, PaLocal};
pub use model::{
    Ap, ChangeFlags, Cp, CpState, Cpd, Dp, EventCategory, PaEvent, PaStore, SubscriptionId,
};
pub use pd::PaPd;
