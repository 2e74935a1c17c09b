//! Pieces shared by the node slices (machines and controllers): bulk node
//! actions sent through the `action` method and the active-item handshake.

use fleet_core::{Action, CallId, DecodeError, Entity};
use fleet_store::slice::payload;
use fleet_store::{Slice, State, StatusKind, StatusRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A status that is started by a node action (`deploy`, `mark-broken`, ...).
pub trait NodeActionKind: StatusKind {
    /// Action name sent to the backend, e.g. `"mark-broken"`.
    fn action_name(self) -> &'static str;
}

/// Target of a node action: a single node or a filter over many, plus
/// action-specific extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeActionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl NodeActionParams {
    pub fn node(system_id: impl Into<String>) -> Self {
        Self { system_id: Some(system_id.into()), ..Self::default() }
    }

    pub fn filtered(filter: Value) -> Self {
        Self { filter: Some(filter), ..Self::default() }
    }

    pub fn extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// `{type: "<model>/<status>", meta: {method: "action", callId?},
/// payload: {params: {action, extra, system_id?, filter?}}}`.
pub fn node_action<K: NodeActionKind>(
    model: &str,
    kind: K,
    params: &NodeActionParams,
    call_id: Option<CallId>,
) -> Action {
    let mut body = Map::new();
    body.insert("action".into(), json!(kind.action_name()));
    body.insert("extra".into(), Value::Object(params.extra.clone()));
    if let Some(id) = &params.system_id {
        body.insert("system_id".into(), json!(id));
    }
    if let Some(filter) = &params.filter {
        body.insert("filter".into(), filter.clone());
    }
    let action = Action::request(model, kind.name(), "action", Action::params(Value::Object(body)));
    match call_id {
        Some(id) => action.with_call_id(id),
        None => action,
    }
}

/// `set_active` request; the server clears the active node when the key is
/// absent.
pub fn set_active_request(model: &str, pk: &str, key: Option<&str>) -> Action {
    let payload = match key {
        Some(k) => {
            let mut params = Map::new();
            params.insert(pk.to_string(), json!(k));
            Action::params(Value::Object(params))
        }
        None => Action::params(Value::Null),
    };
    Action::request(model, "setActive", "set_active", payload)
}

/// Key of the node carried by a `setActiveSuccess` payload (`null` clears).
pub fn active_key<T: Entity>(verb: &str, action: &Action) -> Result<Option<T::Key>, DecodeError> {
    let item: Option<T> = payload(T::MODEL, verb, action)?;
    Ok(item.map(|it| it.key().clone()))
}

/// Gives a newly seen node an all-clear status record.
pub fn seed_status<Sl: Slice>(state: &mut State<Sl>, key: <Sl::Item as Entity>::Key) {
    state.statuses_mut().entry(key).or_insert_with(StatusRecord::default);
}

/// Upserts a node announced by the server, seeding statuses for new keys.
pub fn create_node<Sl: Slice>(state: &mut State<Sl>, item: Sl::Item) {
    let key = item.key().clone();
    if state.upsert(item) {
        seed_status::<Sl>(state, key);
    }
}

/// Merges a fetched page into the collection, seeding statuses for new keys.
pub fn merge_nodes<Sl: Slice>(state: &mut State<Sl>, items: Vec<Sl::Item>) {
    state.set_loading(false);
    state.set_loaded(true);
    for item in items {
        create_node::<Sl>(state, item);
    }
}
