//! Common reducers, generic over the entity and its primary key.
//!
//! These are the defaults behind the `Slice` reducer methods; a slice that
//! needs different behaviour overrides the trait method and may still call
//! into these.

use fleet_core::{CallId, Entity, ErrorPayload};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::state::{EntityState, EventError, ListState};
use crate::status::{StatusKind, StatusRecord};

type State<T, S, X> = EntityState<T, S, X>;

pub fn fetch_start<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    state.set_loading(true);
}

pub fn fetch_success<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, items: Vec<T>) {
    state.set_loading(false);
    state.set_loaded(true);
    *state.items_mut() = dedupe_by_key(items);
}

/// One item per key: a repeated key keeps its first position and takes the
/// last value.
pub fn dedupe_by_key<T: Entity>(items: Vec<T>) -> Vec<T> {
    let total = items.len();
    let mut seen: FxHashMap<T::Key, usize> = FxHashMap::default();
    let mut unique: Vec<T> = Vec::with_capacity(total);
    for item in items {
        match seen.get(item.key()) {
            Some(&idx) => unique[idx] = item,
            None => {
                seen.insert(item.key().clone(), unique.len());
                unique.push(item);
            }
        }
    }
    if unique.len() < total {
        debug!(model = T::MODEL, dropped = total - unique.len(), "duplicate keys in fetched page");
    }
    unique
}

/// Items are left in place: a failed refetch keeps the stale list visible.
pub fn fetch_error<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, errors: ErrorPayload) {
    state.set_errors(Some(errors));
    state.set_loading(false);
}

pub fn get_start<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    state.set_loading(true);
}

/// Upserts a single fetched item. New keys get a default status record when
/// the entity tracks statuses.
pub fn get_success<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, item: T) {
    let key = item.key().clone();
    if state.upsert(item) && !S::ALL.is_empty() {
        state.statuses_mut().insert(key, StatusRecord::default());
    }
    state.set_loading(false);
    state.set_saving(false);
}

pub fn get_error<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, errors: ErrorPayload) {
    state.set_errors(Some(errors));
    state.set_loading(false);
    state.set_saving(false);
}

/// Shared by create/update/delete starts.
pub fn save_start<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    state.set_saved(false);
    state.set_saving(true);
}

/// Shared by create/update/delete successes. Never removes items: removal
/// arrives separately as a delete notify.
pub fn save_success<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    state.set_errors(None);
    state.set_saved(true);
    state.set_saving(false);
}

pub fn save_error<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, errors: ErrorPayload) {
    state.set_errors(Some(errors));
    state.set_saving(false);
}

/// The server may announce an existing item again (races on create), so
/// this upserts rather than appends.
pub fn create_notify<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, item: T) {
    if !state.upsert(item) {
        debug!(model = T::MODEL, "create notify for existing item; replaced in place");
    }
}

pub fn update_notify<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, item: T) {
    match state.position(item.key()) {
        Some(idx) => state.items_mut()[idx] = item,
        None => debug!(model = T::MODEL, key = %item.key(), "update notify for unknown item ignored"),
    }
}

pub fn delete_notify<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, key: &T::Key) {
    if state.remove(key).is_none() {
        debug!(model = T::MODEL, key = %key, "delete notify for unknown item ignored");
    }
}

pub fn cleanup<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    state.set_errors(None);
    state.event_errors_mut().clear();
    state.set_saved(false);
    state.set_saving(false);
}

/// Records `error` for `event` against `key`, replacing an older error for
/// the same pair.
pub fn record_event_error<T: Entity, S: StatusKind, X>(
    state: &mut State<T, S, X>,
    event: Option<&str>,
    key: Option<&T::Key>,
    error: Option<ErrorPayload>,
) {
    let errors = state.event_errors_mut();
    errors.retain(|e| e.event.as_deref() != event || e.id.as_ref() != key);
    errors.push(EventError { id: key.cloned(), event: event.map(str::to_string), error });
}

/// Starts a call-id list request. A repeated start keeps the previous
/// results and marks the list as refetching; either way `params` replaces
/// the stored query params.
pub fn list_start<T: Entity, S: StatusKind, X>(
    state: &mut State<T, S, X>,
    call_id: CallId,
    params: Option<Value>,
) {
    let now = chrono::Utc::now().timestamp_millis();
    let lists = state.lists_mut();
    match lists.get_mut(&call_id) {
        Some(list) => {
            list.refetching = true;
            list.refetched_at = Some(now);
            list.params = params;
        }
        None => {
            lists.insert(call_id, ListState { params, ..ListState::default() });
        }
    }
}

/// Responses for call ids that were never started (or already removed) are
/// dropped.
pub fn list_success<T: Entity, S: StatusKind, X>(
    state: &mut State<T, S, X>,
    call_id: &CallId,
    items: Vec<T>,
) {
    if !state.lists().contains_key(call_id) {
        debug!(model = T::MODEL, call_id = %call_id, "list response for unknown call id ignored");
        return;
    }
    let now = chrono::Utc::now().timestamp_millis();
    if let Some(list) = state.lists_mut().get_mut(call_id) {
        list.items = items;
        list.loading = false;
        list.loaded = true;
        list.refetching = false;
        list.stale = false;
        list.errors = None;
        list.fetched_at.get_or_insert(now);
    }
}

pub fn list_error<T: Entity, S: StatusKind, X>(
    state: &mut State<T, S, X>,
    call_id: &CallId,
    errors: ErrorPayload,
) {
    if !state.lists().contains_key(call_id) {
        return;
    }
    if let Some(list) = state.lists_mut().get_mut(call_id) {
        list.errors = Some(errors);
        list.loading = false;
        list.refetching = false;
    }
}

pub fn remove_request<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>, call_id: &CallId) {
    if state.lists().contains_key(call_id) {
        state.lists_mut().remove(call_id);
    }
}

/// Marks every call-id list stale so its owner fetches it again.
pub fn invalidate_queries<T: Entity, S: StatusKind, X>(state: &mut State<T, S, X>) {
    if state.lists().is_empty() {
        return;
    }
    for list in state.lists_mut().values_mut() {
        list.stale = true;
    }
}
