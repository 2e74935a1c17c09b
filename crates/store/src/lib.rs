//! Fleet store: normalized entity state, generic slice reducers, per-item
//! status tracking and the dispatch loop.

#![forbid(unsafe_code)]

pub mod common;
pub mod dispatch;
pub mod slice;
pub mod state;
pub mod status;

pub use dispatch::{spawn_dispatch, Reducer, Store, StoreHandle};
pub use slice::{Command, Slice, SliceCommand, SliceStatusHandler, State};
pub use state::{EntityState, EventError, ListState};
pub use status::{
    NoStatus, StatusContext, StatusEvent, StatusHandler, StatusHook, StatusKind, StatusPhase,
    StatusRecord,
};
