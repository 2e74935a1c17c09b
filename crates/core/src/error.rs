//! Error payloads carried by lifecycle actions and the typed failure raised
//! when an action cannot be decoded.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages for one form field: the backend sends either a string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMessages {
    One(String),
    Many(Vec<String>),
}

impl FieldMessages {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            FieldMessages::One(s) => std::slice::from_ref(s),
            FieldMessages::Many(v) => v,
        };
        slice.iter().map(String::as_str)
    }
}

/// Error payload stored on a slice: a general message (fetch/delete banners),
/// per-field validation errors (create/update forms) or anything else the
/// backend chose to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Message(String),
    Fields(BTreeMap<String, FieldMessages>),
    Other(Value),
}

impl ErrorPayload {
    /// Messages for one form field, if this is a per-field payload.
    pub fn field(&self, name: &str) -> Option<&FieldMessages> {
        match self {
            ErrorPayload::Fields(map) => map.get(name),
            _ => None,
        }
    }
}

impl From<Value> for ErrorPayload {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => ErrorPayload::Message(s),
            other => serde_json::from_value(other.clone()).unwrap_or(ErrorPayload::Other(other)),
        }
    }
}

impl From<&str> for ErrorPayload {
    fn from(s: &str) -> Self {
        ErrorPayload::Message(s.to_string())
    }
}

impl From<String> for ErrorPayload {
    fn from(s: String) -> Self {
        ErrorPayload::Message(s)
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPayload::Message(s) => f.write_str(s),
            ErrorPayload::Fields(map) => {
                let mut first = true;
                for (field, msgs) in map {
                    for m in msgs.iter() {
                        if !first {
                            f.write_str("; ")?;
                        }
                        first = false;
                        write!(f, "{}: {}", field, m)?;
                    }
                }
                Ok(())
            }
            ErrorPayload::Other(v) => write!(f, "{}", v),
        }
    }
}

/// Failure to turn a wire action into a slice command. Reducers themselves
/// never fail; this is raised at the transport boundary only.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed action type {0:?}, expected <model>/<verb>")]
    MalformedType(String),
    #[error("unknown model {0:?}")]
    UnknownModel(String),
    #[error("action for model {found:?} routed to {expected}")]
    ModelMismatch { expected: &'static str, found: String },
    #[error("unknown action {model}/{verb}")]
    UnknownVerb { model: &'static str, verb: String },
    #[error("{model}/{verb}: missing meta.{field}")]
    MissingMeta { model: &'static str, verb: String, field: &'static str },
    #[error("{model}/{verb}: invalid payload: {source}")]
    Payload {
        model: &'static str,
        verb: String,
        #[source]
        source: serde_json::Error,
    },
}
