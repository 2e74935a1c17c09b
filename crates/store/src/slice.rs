//! The slice contract: a closed command type per entity, a single `reduce`
//! entry point and the request creators the UI dispatches.

use std::fmt::Debug;

use fleet_core::{Action, CallId, DecodeError, Entity, ErrorPayload};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::common;
use crate::state::EntityState;
use crate::status::{apply_status, StatusEvent, StatusHandler, StatusKind};

/// Every state transition a slice understands. `C` carries slice-specific
/// commands (pod's `setActiveSuccess`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Command<T: Entity, S, C> {
    FetchStart,
    FetchSuccess(Vec<T>),
    FetchError(ErrorPayload),
    GetStart,
    GetSuccess(T),
    GetError(ErrorPayload),
    CreateStart,
    CreateSuccess,
    CreateError(ErrorPayload),
    CreateNotify(T),
    UpdateStart,
    UpdateSuccess,
    UpdateError(ErrorPayload),
    UpdateNotify(T),
    DeleteStart,
    DeleteSuccess,
    DeleteError(ErrorPayload),
    DeleteNotify(T::Key),
    /// Start of a call-id list; carries the query params from `meta.item`.
    ListStart(CallId, Option<Value>),
    ListSuccess(CallId, Vec<T>),
    ListError(CallId, ErrorPayload),
    RemoveRequest(CallId),
    /// Marks every call-id query stale (the connection dropped).
    InvalidateQueries,
    Cleanup,
    Status(StatusEvent<T::Key, S>),
    Custom(C),
    /// A request action on its way to the transport; no state change.
    Request(String),
}

pub type State<Sl> = EntityState<<Sl as Slice>::Item, <Sl as Slice>::Status, <Sl as Slice>::Extra>;
pub type SliceCommand<Sl> = Command<<Sl as Slice>::Item, <Sl as Slice>::Status, <Sl as Slice>::Custom>;
pub type SliceStatusHandler<Sl> =
    StatusHandler<<Sl as Slice>::Item, <Sl as Slice>::Status, <Sl as Slice>::Extra>;

/// A bundle of state shape, reducers and request creators for one entity.
///
/// Reducer methods default to the common reducers; overriding one replaces
/// the default for that command. Status handlers win over common verbs of the
/// same name (a pod's `deleteStart` is a status transition, not a save).
pub trait Slice: Sized + 'static {
    type Item: Entity;
    type Status: StatusKind;
    type Extra: Clone + Debug + Default + Send + Sync;
    type Custom: Clone + Debug + Send;

    /// Record errors per (event, item) in `event_errors`.
    const TRACKS_EVENT_ERRORS: bool = false;

    fn status_handlers() -> &'static [SliceStatusHandler<Self>] {
        &[]
    }

    fn fetch_success(state: &mut State<Self>, items: Vec<Self::Item>) {
        common::fetch_success(state, items);
    }

    fn get_success(state: &mut State<Self>, item: Self::Item) {
        common::get_success(state, item);
    }

    fn create_notify(state: &mut State<Self>, item: Self::Item) {
        common::create_notify(state, item);
    }

    fn update_notify(state: &mut State<Self>, item: Self::Item) {
        common::update_notify(state, item);
    }

    fn delete_notify(state: &mut State<Self>, key: <Self::Item as Entity>::Key) {
        common::delete_notify(state, &key);
    }

    fn invalidate_queries(state: &mut State<Self>) {
        common::invalidate_queries(state);
    }

    fn reduce_custom(state: &mut State<Self>, cmd: Self::Custom) {
        let _ = state;
        debug!(model = Self::Item::MODEL, ?cmd, "custom command without reducer");
    }

    /// Decodes slice-specific verbs. `None` means the verb is not custom.
    fn decode_custom(verb: &str, action: &Action) -> Option<Result<Self::Custom, DecodeError>> {
        let _ = (verb, action);
        None
    }

    fn reduce(state: &mut State<Self>, cmd: SliceCommand<Self>) {
        match cmd {
            Command::FetchStart => common::fetch_start(state),
            Command::FetchSuccess(items) => Self::fetch_success(state, items),
            Command::FetchError(e) => {
                track_error::<Self>(state, "fetch", &e);
                common::fetch_error(state, e);
            }
            Command::GetStart => common::get_start(state),
            Command::GetSuccess(item) => Self::get_success(state, item),
            Command::GetError(e) => {
                track_error::<Self>(state, "get", &e);
                common::get_error(state, e);
            }
            Command::CreateStart | Command::UpdateStart | Command::DeleteStart => {
                common::save_start(state)
            }
            Command::CreateSuccess | Command::UpdateSuccess | Command::DeleteSuccess => {
                common::save_success(state)
            }
            Command::CreateError(e) => {
                track_error::<Self>(state, "create", &e);
                common::save_error(state, e);
            }
            Command::UpdateError(e) => {
                track_error::<Self>(state, "update", &e);
                common::save_error(state, e);
            }
            Command::DeleteError(e) => {
                track_error::<Self>(state, "delete", &e);
                common::save_error(state, e);
            }
            Command::CreateNotify(item) => Self::create_notify(state, item),
            Command::UpdateNotify(item) => Self::update_notify(state, item),
            Command::DeleteNotify(key) => Self::delete_notify(state, key),
            Command::ListStart(call_id, params) => common::list_start(state, call_id, params),
            Command::ListSuccess(call_id, items) => common::list_success(state, &call_id, items),
            Command::ListError(call_id, e) => common::list_error(state, &call_id, e),
            Command::RemoveRequest(call_id) => common::remove_request(state, &call_id),
            Command::InvalidateQueries => Self::invalidate_queries(state),
            Command::Cleanup => common::cleanup(state),
            Command::Status(event) => match handler_for::<Self>(event.status) {
                Some(handler) => apply_status(state, handler, event, Self::TRACKS_EVENT_ERRORS),
                None => debug!(model = Self::Item::MODEL, status = event.status.name(), "no handler for status"),
            },
            Command::Custom(cmd) => Self::reduce_custom(state, cmd),
            Command::Request(verb) => trace!(model = Self::Item::MODEL, verb = %verb, "request action"),
        }
    }

    /// Turns a wire action into a command for this slice.
    fn decode(action: &Action) -> Result<SliceCommand<Self>, DecodeError> {
        let model = Self::Item::MODEL;
        let (found, verb) = action.split_type()?;
        if found != model {
            return Err(DecodeError::ModelMismatch { expected: model, found: found.to_string() });
        }

        for handler in Self::status_handlers() {
            if let Some(phase) = handler.phase_of(verb) {
                return Ok(Command::Status(StatusEvent {
                    status: handler.status,
                    phase,
                    keys: item_keys::<Self::Item>(verb, action)?,
                    call_id: action.call_id().cloned(),
                    payload: action.payload.clone(),
                }));
            }
        }

        if let Some(custom) = Self::decode_custom(verb, action) {
            return custom.map(Command::Custom);
        }

        let err = || ErrorPayload::from(action.payload.clone());
        let cmd = match (verb, action.call_id()) {
            ("fetchStart", Some(id)) => Command::ListStart(id.clone(), action.item().cloned()),
            ("fetchStart", None) => Command::FetchStart,
            ("fetchSuccess", Some(id)) => Command::ListSuccess(id.clone(), payload(model, verb, action)?),
            ("fetchSuccess", None) => Command::FetchSuccess(payload(model, verb, action)?),
            ("fetchError", Some(id)) => Command::ListError(id.clone(), err()),
            ("fetchError", None) => Command::FetchError(err()),
            ("getStart", _) => Command::GetStart,
            ("getSuccess", _) => Command::GetSuccess(payload(model, verb, action)?),
            ("getError", _) => Command::GetError(err()),
            ("createStart", _) => Command::CreateStart,
            ("createSuccess", _) => Command::CreateSuccess,
            ("createError", _) => Command::CreateError(err()),
            ("createNotify", _) => Command::CreateNotify(payload(model, verb, action)?),
            ("updateStart", _) => Command::UpdateStart,
            ("updateSuccess", _) => Command::UpdateSuccess,
            ("updateError", _) => Command::UpdateError(err()),
            ("updateNotify", _) => Command::UpdateNotify(payload(model, verb, action)?),
            ("deleteStart", _) => Command::DeleteStart,
            ("deleteSuccess", _) => Command::DeleteSuccess,
            ("deleteError", _) => Command::DeleteError(err()),
            ("deleteNotify", _) => Command::DeleteNotify(payload(model, verb, action)?),
            ("removeRequest", _) => Command::RemoveRequest(payload(model, verb, action)?),
            ("invalidateQueries", _) => Command::InvalidateQueries,
            ("cleanup", _) => Command::Cleanup,
            _ if action.meta.method.is_some() => Command::Request(verb.to_string()),
            _ => return Err(DecodeError::UnknownVerb { model, verb: verb.to_string() }),
        };
        Ok(cmd)
    }

    /// Decodes and reduces. A decode failure leaves the state untouched.
    fn apply(state: &mut State<Self>, action: &Action) -> Result<(), DecodeError> {
        let cmd = Self::decode(action)?;
        Self::reduce(state, cmd);
        Ok(())
    }

    fn fetch() -> Action {
        Action::request(Self::Item::MODEL, "fetch", "list", Value::Null)
    }

    /// Fetch into a call-id list instead of the main collection.
    fn fetch_list(call_id: CallId, params: Option<Value>) -> Action {
        let payload = params.map(Action::params).unwrap_or(Value::Null);
        Action::request(Self::Item::MODEL, "fetch", "list", payload).with_call_id(call_id)
    }

    fn get(key: &<Self::Item as Entity>::Key) -> Action {
        let mut params = serde_json::Map::new();
        params.insert(Self::Item::PK.to_string(), json!(key));
        Action::request(Self::Item::MODEL, "get", "get", Action::params(Value::Object(params)))
    }

    fn create(params: Value) -> Action {
        Action::request(Self::Item::MODEL, "create", "create", Action::params(params))
    }

    fn update(params: Value) -> Action {
        Action::request(Self::Item::MODEL, "update", "update", Action::params(params))
    }

    fn delete(key: &<Self::Item as Entity>::Key) -> Action {
        Action::request(Self::Item::MODEL, "delete", "delete", Action::params(json!({ "id": key })))
    }

    /// Initiating request for a status operation, e.g. `refresh(id)`.
    fn status_request(status: Self::Status, key: &<Self::Item as Entity>::Key) -> Action {
        match handler_for::<Self>(status) {
            Some(handler) => handler.request(key),
            None => Action::request(
                Self::Item::MODEL,
                status.name(),
                status.name(),
                Action::params(json!({ "id": key })),
            ),
        }
    }

    fn cleanup() -> Action {
        Action::event(Self::Item::MODEL, "cleanup", Value::Null)
    }

    fn remove_request(call_id: CallId) -> Action {
        Action::event(Self::Item::MODEL, "removeRequest", json!(call_id))
    }
}

fn handler_for<Sl: Slice>(status: Sl::Status) -> Option<&'static SliceStatusHandler<Sl>> {
    Sl::status_handlers().iter().find(|h| h.status == status)
}

fn track_error<Sl: Slice>(state: &mut State<Sl>, event: &str, e: &ErrorPayload) {
    if Sl::TRACKS_EVENT_ERRORS {
        common::record_event_error(state, Some(event), None, Some(e.clone()));
    }
}

/// Deserializes the action payload for `model/verb`.
pub fn payload<D: DeserializeOwned>(
    model: &'static str,
    verb: &str,
    action: &Action,
) -> Result<D, DecodeError> {
    serde_json::from_value(action.payload.clone()).map_err(|source| DecodeError::Payload {
        model,
        verb: verb.to_string(),
        source,
    })
}

/// `meta.callId` of an action that cannot be reduced without one.
pub fn required_call_id(model: &'static str, verb: &str, action: &Action) -> Result<CallId, DecodeError> {
    action.call_id().cloned().ok_or_else(|| DecodeError::MissingMeta {
        model,
        verb: verb.to_string(),
        field: "callId",
    })
}

/// Primary keys named by `meta.item`: the key of a single item, or one per
/// element when the item is a list. Entries without the key are skipped.
pub fn item_keys<T: Entity>(verb: &str, action: &Action) -> Result<Vec<T::Key>, DecodeError> {
    let raw: Vec<&Value> = match action.item() {
        Some(Value::Array(items)) => items.iter().filter_map(|item| item.get(T::PK)).collect(),
        Some(item) => item.get(T::PK).into_iter().collect(),
        None => Vec::new(),
    };
    raw.into_iter()
        .map(|v| {
            serde_json::from_value(v.clone()).map_err(|source| DecodeError::Payload {
                model: T::MODEL,
                verb: verb.to_string(),
                source,
            })
        })
        .collect()
}
