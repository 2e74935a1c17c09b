//! Fleet core types: the entity contract, the wire action envelope and the
//! error payloads shared by every slice.

#![forbid(unsafe_code)]

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod action;
pub mod error;

pub use action::{Action, ActionMeta, CallId};
pub use error::{DecodeError, ErrorPayload, FieldMessages};

/// A normalized domain record (machine, pod, tag, ...) held in a slice.
///
/// `MODEL` is the name used in action types (`"pod/fetchSuccess"`) and `PK`
/// is the name of the primary-key field on the wire, used to pull the key out
/// of `meta.item` for status actions.
pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Key: Clone
        + Debug
        + Display
        + Eq
        + Hash
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const MODEL: &'static str;
    const PK: &'static str;

    fn key(&self) -> &Self::Key;
}
