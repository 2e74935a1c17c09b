//! Wire action envelope.
//!
//! One shape serves both directions: request actions built by slice creators
//! (carrying `meta.model`/`meta.method` for the transport middleware) and the
//! lifecycle actions the middleware dispatches back (`...Start`, `...Success`,
//! `...Error`, `...Notify`, carrying `meta.item`/`meta.callId`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::DecodeError;

/// Opaque identifier of one outstanding list/count query or bulk action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random call id for a new request.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Backend RPC method the middleware should call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Ask the transport to bypass its response cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nocache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<bool>,
    /// Names one of several concurrent polls of the same method.
    #[serde(default, rename = "pollId", skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<String>,
    /// Poll period in milliseconds.
    #[serde(default, rename = "pollInterval", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
    #[serde(default, rename = "pollStop", skip_serializing_if = "Option::is_none")]
    pub poll_stop: Option<bool>,
    #[serde(default, rename = "callId", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    /// The item (or request params) a lifecycle action refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
}

impl ActionMeta {
    pub fn is_empty(&self) -> bool {
        *self == ActionMeta::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "ActionMeta::is_empty")]
    pub meta: ActionMeta,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl Action {
    /// Lifecycle action with no meta, e.g. `("tag", "fetchStart", Value::Null)`.
    pub fn event(model: &str, verb: &str, payload: Value) -> Self {
        Self {
            kind: format!("{}/{}", model, verb),
            meta: ActionMeta::default(),
            payload,
            error: false,
        }
    }

    /// Request action consumed by the transport middleware.
    pub fn request(model: &str, verb: &str, method: &str, payload: Value) -> Self {
        Self {
            kind: format!("{}/{}", model, verb),
            meta: ActionMeta {
                model: Some(model.to_string()),
                method: Some(method.to_string()),
                ..ActionMeta::default()
            },
            payload,
            error: false,
        }
    }

    /// Wraps request params as `{"params": ...}`.
    pub fn params(params: Value) -> Value {
        json!({ "params": params })
    }

    pub fn with_item(mut self, item: Value) -> Self {
        self.meta.item = Some(item);
        self
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.meta.call_id = Some(call_id);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.meta.nocache = Some(true);
        self
    }

    /// Splits `type` into `(model, verb)`.
    pub fn split_type(&self) -> Result<(&str, &str), DecodeError> {
        match self.kind.split_once('/') {
            Some((model, verb)) if !model.is_empty() && !verb.is_empty() && !verb.contains('/') => {
                Ok((model, verb))
            }
            _ => Err(DecodeError::MalformedType(self.kind.clone())),
        }
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.meta.call_id.as_ref()
    }

    pub fn item(&self) -> Option<&Value> {
        self.meta.item.as_ref()
    }
}
