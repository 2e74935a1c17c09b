//! Normalized entity state.

use std::sync::atomic::{AtomicU64, Ordering};

use fleet_core::{CallId, Entity, ErrorPayload};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use crate::status::{StatusKind, StatusRecord};

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// One outstanding filtered/paginated query, keyed by call id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub loaded: bool,
    pub errors: Option<ErrorPayload>,
    pub refetching: bool,
    /// Set when the results may be out of date and the query should run again.
    pub stale: bool,
    /// Query params of the latest start, taken from `meta.item`.
    pub params: Option<Value>,
    /// Epoch millis of the first successful response.
    pub fetched_at: Option<i64>,
    /// Epoch millis of the latest re-request for an existing call id.
    pub refetched_at: Option<i64>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: true,
            loaded: false,
            errors: None,
            refetching: false,
            stale: false,
            params: None,
            fetched_at: None,
            refetched_at: None,
        }
    }
}

/// Error recorded against an event (`"fetch"`, `"deploy"`, ...) and an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventError<K> {
    pub id: Option<K>,
    pub event: Option<String>,
    pub error: Option<ErrorPayload>,
}

/// State of one slice.
///
/// Fields are private: every mutating accessor advances the revision stamp,
/// which memoized selectors use to detect a changed snapshot. Each instance
/// starts with a process-unique stamp.
#[derive(Debug, Clone)]
pub struct EntityState<T: Entity, S: StatusKind, X> {
    items: Vec<T>,
    loading: bool,
    loaded: bool,
    saving: bool,
    saved: bool,
    errors: Option<ErrorPayload>,
    statuses: FxHashMap<T::Key, StatusRecord<S>>,
    lists: FxHashMap<CallId, ListState<T>>,
    event_errors: Vec<EventError<T::Key>>,
    extra: X,
    revision: u64,
}

impl<T: Entity, S: StatusKind, X: Default> Default for EntityState<T, S, X> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            loaded: false,
            saving: false,
            saved: false,
            errors: None,
            statuses: FxHashMap::default(),
            lists: FxHashMap::default(),
            event_errors: Vec::new(),
            extra: X::default(),
            revision: next_revision(),
        }
    }
}

impl<T: Entity, S: StatusKind, X: Default> EntityState<T, S, X> {
    /// Loaded state holding `items`, as if a fetch had completed.
    pub fn with_items(items: Vec<T>) -> Self {
        let mut state = Self::default();
        state.items = items;
        state.loaded = true;
        state
    }
}

impl<T: Entity, S: StatusKind, X> EntityState<T, S, X> {
    pub fn items(&self) -> &[T] {
        &self.items
    }
    pub fn loading(&self) -> bool {
        self.loading
    }
    pub fn loaded(&self) -> bool {
        self.loaded
    }
    pub fn saving(&self) -> bool {
        self.saving
    }
    pub fn saved(&self) -> bool {
        self.saved
    }
    pub fn errors(&self) -> Option<&ErrorPayload> {
        self.errors.as_ref()
    }
    pub fn statuses(&self) -> &FxHashMap<T::Key, StatusRecord<S>> {
        &self.statuses
    }
    pub fn lists(&self) -> &FxHashMap<CallId, ListState<T>> {
        &self.lists
    }
    pub fn event_errors(&self) -> &[EventError<T::Key>] {
        &self.event_errors
    }
    pub fn extra(&self) -> &X {
        &self.extra
    }
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn find(&self, key: &T::Key) -> Option<&T> {
        self.items.iter().find(|it| it.key() == key)
    }

    pub fn position(&self, key: &T::Key) -> Option<usize> {
        self.items.iter().position(|it| it.key() == key)
    }

    pub(crate) fn touch(&mut self) {
        self.revision = next_revision();
    }

    pub fn items_mut(&mut self) -> &mut Vec<T> {
        self.touch();
        &mut self.items
    }
    pub fn statuses_mut(&mut self) -> &mut FxHashMap<T::Key, StatusRecord<S>> {
        self.touch();
        &mut self.statuses
    }
    pub fn lists_mut(&mut self) -> &mut FxHashMap<CallId, ListState<T>> {
        self.touch();
        &mut self.lists
    }
    pub fn event_errors_mut(&mut self) -> &mut Vec<EventError<T::Key>> {
        self.touch();
        &mut self.event_errors
    }
    pub fn extra_mut(&mut self) -> &mut X {
        self.touch();
        &mut self.extra
    }

    pub fn set_loading(&mut self, v: bool) {
        self.touch();
        self.loading = v;
    }
    pub fn set_loaded(&mut self, v: bool) {
        self.touch();
        self.loaded = v;
    }
    pub fn set_saving(&mut self, v: bool) {
        self.touch();
        self.saving = v;
    }
    pub fn set_saved(&mut self, v: bool) {
        self.touch();
        self.saved = v;
    }
    pub fn set_errors(&mut self, errors: Option<ErrorPayload>) {
        self.touch();
        self.errors = errors;
    }

    /// Replaces the item with the same key in place, or appends it.
    /// Returns `true` when a new key was added.
    pub fn upsert(&mut self, item: T) -> bool {
        self.touch();
        match self.position(item.key()) {
            Some(idx) => {
                self.items[idx] = item;
                false
            }
            None => {
                self.items.push(item);
                true
            }
        }
    }

    /// Removes the item with `key`, keeping the order of the rest.
    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        let idx = self.position(key)?;
        self.touch();
        Some(self.items.remove(idx))
    }
}
