//! Per-item status tracking for asynchronous operations (refresh, compose,
//! deploy, ...), indexed strictly by primary key.

use std::fmt::Debug;
use std::hash::Hash;

use fleet_core::{Action, CallId, Entity, ErrorPayload};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Value};
use smallvec::SmallVec;
use tracing::debug;

use crate::common;
use crate::state::EntityState;

/// Closed set of status operations for one entity type.
pub trait StatusKind: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every status of the entity, in declaration order.
    const ALL: &'static [Self];

    /// Verb of the initiating action (`"refresh"`).
    fn name(self) -> &'static str;

    /// Flag name in the status record (`"refreshing"`).
    fn flag(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// Status kind for slices without per-item operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoStatus {}

impl StatusKind for NoStatus {
    const ALL: &'static [Self] = &[];

    fn name(self) -> &'static str {
        match self {}
    }

    fn flag(self) -> &'static str {
        match self {}
    }
}

/// Flags of one item. Default has every status of `S` cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord<S: StatusKind> {
    flags: SmallVec<[(S, bool); 8]>,
}

impl<S: StatusKind> Default for StatusRecord<S> {
    fn default() -> Self {
        Self { flags: S::ALL.iter().map(|s| (*s, false)).collect() }
    }
}

impl<S: StatusKind> StatusRecord<S> {
    pub fn get(&self, status: S) -> bool {
        self.flags.iter().any(|(s, v)| *s == status && *v)
    }

    pub fn set(&mut self, status: S, value: bool) {
        match self.flags.iter_mut().find(|(s, _)| *s == status) {
            Some(entry) => entry.1 = value,
            None => self.flags.push((status, value)),
        }
    }

    /// Whether any operation is in flight for the item.
    pub fn any(&self) -> bool {
        self.flags.iter().any(|(_, v)| *v)
    }

    pub fn active(&self) -> impl Iterator<Item = S> + '_ {
        self.flags.iter().filter(|(_, v)| *v).map(|(s, _)| *s)
    }
}

impl<S: StatusKind> Serialize for StatusRecord<S> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut map = serializer.serialize_map(Some(self.flags.len()))?;
        for (s, v) in &self.flags {
            map.serialize_entry(s.flag(), v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPhase {
    Start,
    Success,
    Error,
}

impl StatusPhase {
    /// Matches `verb` against `<status>Start|Success|Error`.
    pub fn from_verb(verb: &str, status: &str) -> Option<Self> {
        match verb.strip_prefix(status)? {
            "Start" => Some(StatusPhase::Start),
            "Success" => Some(StatusPhase::Success),
            "Error" => Some(StatusPhase::Error),
            _ => None,
        }
    }
}

/// One start/success/error transition for a status operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent<K, S> {
    pub status: S,
    pub phase: StatusPhase,
    /// Keys of the items the operation runs against: several when
    /// `meta.item` is a list, none for a filter-driven bulk operation.
    pub keys: Vec<K>,
    pub call_id: Option<CallId>,
    pub payload: Value,
}

/// What a status hook sees of the triggering action.
#[derive(Debug, Clone, Copy)]
pub struct StatusContext<'a, K> {
    /// First of `keys`.
    pub key: Option<&'a K>,
    pub keys: &'a [K],
    pub call_id: Option<&'a CallId>,
    pub payload: &'a Value,
}

pub type StatusHook<T, S, X> =
    for<'a> fn(&mut EntityState<T, S, X>, &StatusContext<'a, <T as Entity>::Key>);

/// Reducer hooks and request shape for one status operation.
pub struct StatusHandler<T: Entity, S: StatusKind, X> {
    pub status: S,
    /// Second verb prefix driving the same status, e.g. a polled variant.
    pub alias: Option<&'static str>,
    /// Backend method of the initiating request; the status name when unset.
    pub method: Option<&'static str>,
    pub start: Option<StatusHook<T, S, X>>,
    pub success: Option<StatusHook<T, S, X>>,
    pub error: Option<StatusHook<T, S, X>>,
    pub prepare: Option<fn(&T::Key) -> Action>,
}

impl<T: Entity, S: StatusKind, X> StatusHandler<T, S, X> {
    pub const fn new(status: S) -> Self {
        Self { status, alias: None, method: None, start: None, success: None, error: None, prepare: None }
    }

    pub const fn alias(mut self, verb: &'static str) -> Self {
        self.alias = Some(verb);
        self
    }

    pub const fn method(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }

    pub const fn on_start(mut self, hook: StatusHook<T, S, X>) -> Self {
        self.start = Some(hook);
        self
    }

    pub const fn on_success(mut self, hook: StatusHook<T, S, X>) -> Self {
        self.success = Some(hook);
        self
    }

    pub const fn on_error(mut self, hook: StatusHook<T, S, X>) -> Self {
        self.error = Some(hook);
        self
    }

    pub const fn prepare(mut self, prepare: fn(&T::Key) -> Action) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// Phase of `verb` when it is a lifecycle verb of this status or its alias.
    pub fn phase_of(&self, verb: &str) -> Option<StatusPhase> {
        StatusPhase::from_verb(verb, self.status.name())
            .or_else(|| self.alias.and_then(|alias| StatusPhase::from_verb(verb, alias)))
    }

    /// The initiating request, `{params: {id}}` unless `prepare` is set.
    pub fn request(&self, key: &T::Key) -> Action {
        match self.prepare {
            Some(prepare) => prepare(key),
            None => Action::request(
                T::MODEL,
                self.status.name(),
                self.method.unwrap_or(self.status.name()),
                Action::params(json!({ "id": key })),
            ),
        }
    }
}

/// Applies one status transition to every key of the event. `track_errors`
/// also records the failure against each item in `event_errors`.
pub fn apply_status<T: Entity, S: StatusKind, X>(
    state: &mut EntityState<T, S, X>,
    handler: &StatusHandler<T, S, X>,
    event: StatusEvent<T::Key, S>,
    track_errors: bool,
) {
    let ctx = StatusContext {
        key: event.keys.first(),
        keys: &event.keys,
        call_id: event.call_id.as_ref(),
        payload: &event.payload,
    };
    match event.phase {
        StatusPhase::Start => {
            if let Some(hook) = handler.start {
                hook(state, &ctx);
            }
            if !ctx.keys.is_empty() {
                let statuses = state.statuses_mut();
                for key in ctx.keys {
                    statuses.entry(key.clone()).or_default().set(event.status, true);
                }
            }
        }
        StatusPhase::Success => {
            if let Some(hook) = handler.success {
                hook(state, &ctx);
            }
            for key in ctx.keys {
                clear_flag(state, key, event.status);
            }
        }
        StatusPhase::Error => {
            if let Some(hook) = handler.error {
                hook(state, &ctx);
            }
            let err = ErrorPayload::from(event.payload.clone());
            if track_errors {
                let event_name = Some(event.status.name());
                if ctx.keys.is_empty() {
                    common::record_event_error(state, event_name, None, Some(err.clone()));
                }
                for key in ctx.keys {
                    common::record_event_error(state, event_name, Some(key), Some(err.clone()));
                }
            }
            state.set_errors(Some(err));
            for key in ctx.keys {
                clear_flag(state, key, event.status);
            }
        }
    }
}

// A notify may have removed the record before the success/error arrives;
// never recreate it here.
fn clear_flag<T: Entity, S: StatusKind, X>(state: &mut EntityState<T, S, X>, key: &T::Key, status: S) {
    if !state.statuses().contains_key(key) {
        debug!(model = T::MODEL, key = %key, status = status.name(), "no status record to clear");
        return;
    }
    if let Some(record) = state.statuses_mut().get_mut(key) {
        record.set(status, false);
    }
}
