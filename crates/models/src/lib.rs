//! Fleet models: the concrete slices and the root state that routes wire
//! actions to them.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use fleet_core::{Action, DecodeError, Entity};
use fleet_store::{Command, Reducer, Slice, State};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

pub mod controller;
pub mod machine;
pub mod node;
pub mod pod;
pub mod tag;
pub mod token;

pub use controller::{Controller, ControllerSlice, ControllerStatus};
pub use machine::{Machine, MachineSlice, MachineStatus};
pub use node::NodeActionParams;
pub use pod::{Host, Pod, PodDeleteParams, PodSlice, PodStatus, PodType};
pub use tag::{Tag, TagSearchFilter, TagSlice};
pub use token::{Token, TokenSlice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Machine,
    Controller,
    Pod,
    Tag,
    Token,
}

impl Model {
    pub const ALL: [Model; 5] = [Model::Machine, Model::Controller, Model::Pod, Model::Tag, Model::Token];

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Machine => Machine::MODEL,
            Model::Controller => Controller::MODEL,
            Model::Pod => Pod::MODEL,
            Model::Tag => Tag::MODEL,
            Model::Token => Token::MODEL,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Model {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownModel(s.to_string()))
    }
}

/// Application state: one slice per model.
#[derive(Debug, Clone, Default)]
pub struct RootState {
    pub machine: State<MachineSlice>,
    pub controller: State<ControllerSlice>,
    pub pod: State<PodSlice>,
    pub tag: State<TagSlice>,
    pub token: State<TokenSlice>,
}

/// Dispatched by the connection layer when the websocket drops.
pub const WEBSOCKET_DISCONNECTED: &str = "status/websocketDisconnected";

impl Reducer for RootState {
    fn dispatch(&mut self, action: &Action) -> Result<(), DecodeError> {
        if action.kind == WEBSOCKET_DISCONNECTED {
            debug!("websocket disconnected, invalidating queries");
            self.invalidate_queries();
            return Ok(());
        }
        let (model, verb) = action.split_type()?;
        let model: Model = model.parse()?;
        trace!(%model, verb, "dispatch");
        match model {
            Model::Machine => MachineSlice::apply(&mut self.machine, action),
            Model::Controller => ControllerSlice::apply(&mut self.controller, action),
            Model::Pod => PodSlice::apply(&mut self.pod, action),
            Model::Tag => TagSlice::apply(&mut self.tag, action),
            Model::Token => TokenSlice::apply(&mut self.token, action),
        }
    }
}

/// Flags and counts of one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceSummary {
    pub model: Model,
    pub count: usize,
    pub loading: bool,
    pub loaded: bool,
    pub saving: bool,
    pub saved: bool,
    pub processing: usize,
    pub lists: usize,
    pub event_errors: usize,
    pub errors: Option<String>,
}

fn summarize<Sl: Slice>(model: Model, state: &State<Sl>) -> SliceSummary {
    SliceSummary {
        model,
        count: state.items().len(),
        loading: state.loading(),
        loaded: state.loaded(),
        saving: state.saving(),
        saved: state.saved(),
        processing: state.statuses().values().filter(|r| r.any()).count(),
        lists: state.lists().len(),
        event_errors: state.event_errors().len(),
        errors: state.errors().map(|e| e.to_string()),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl RootState {
    /// Marks every call-id query of every slice stale, so it is fetched again
    /// once the connection resumes.
    pub fn invalidate_queries(&mut self) {
        MachineSlice::reduce(&mut self.machine, Command::InvalidateQueries);
        ControllerSlice::reduce(&mut self.controller, Command::InvalidateQueries);
        PodSlice::reduce(&mut self.pod, Command::InvalidateQueries);
        TagSlice::reduce(&mut self.tag, Command::InvalidateQueries);
        TokenSlice::reduce(&mut self.token, Command::InvalidateQueries);
    }

    pub fn summary(&self, model: Model) -> SliceSummary {
        match model {
            Model::Machine => summarize::<MachineSlice>(model, &self.machine),
            Model::Controller => summarize::<ControllerSlice>(model, &self.controller),
            Model::Pod => summarize::<PodSlice>(model, &self.pod),
            Model::Tag => summarize::<TagSlice>(model, &self.tag),
            Model::Token => summarize::<TokenSlice>(model, &self.token),
        }
    }

    /// Items of `model` as JSON, in collection order.
    pub fn items_json(&self, model: Model) -> Vec<Value> {
        fn items<Sl: Slice>(state: &State<Sl>) -> Vec<Value> {
            state.items().iter().map(to_json).collect()
        }
        match model {
            Model::Machine => items::<MachineSlice>(&self.machine),
            Model::Controller => items::<ControllerSlice>(&self.controller),
            Model::Pod => items::<PodSlice>(&self.pod),
            Model::Tag => items::<TagSlice>(&self.tag),
            Model::Token => items::<TokenSlice>(&self.token),
        }
    }

    /// Item of `model` whose primary key renders as `key`.
    pub fn item_json(&self, model: Model, key: &str) -> Option<Value> {
        fn find<Sl: Slice>(state: &State<Sl>, key: &str) -> Option<Value> {
            state.items().iter().find(|it| it.key().to_string() == key).map(to_json)
        }
        match model {
            Model::Machine => find::<MachineSlice>(&self.machine, key),
            Model::Controller => find::<ControllerSlice>(&self.controller, key),
            Model::Pod => find::<PodSlice>(&self.pod, key),
            Model::Tag => find::<TagSlice>(&self.tag, key),
            Model::Token => find::<TokenSlice>(&self.token, key),
        }
    }

    /// Status records of `model` keyed by rendered primary key; only items
    /// with a record appear.
    pub fn statuses_json(&self, model: Model) -> Vec<(String, Value)> {
        fn statuses<Sl: Slice>(state: &State<Sl>) -> Vec<(String, Value)> {
            state
                .items()
                .iter()
                .filter_map(|it| state.statuses().get(it.key()).map(|r| (it.key().to_string(), to_json(r))))
                .collect()
        }
        match model {
            Model::Machine => statuses::<MachineSlice>(&self.machine),
            Model::Controller => statuses::<ControllerSlice>(&self.controller),
            Model::Pod => statuses::<PodSlice>(&self.pod),
            Model::Tag => statuses::<TagSlice>(&self.tag),
            Model::Token => statuses::<TokenSlice>(&self.token),
        }
    }

    pub fn event_errors_json(&self, model: Model) -> Vec<Value> {
        fn errors<Sl: Slice>(state: &State<Sl>) -> Vec<Value> {
            state.event_errors().iter().map(to_json).collect()
        }
        match model {
            Model::Machine => errors::<MachineSlice>(&self.machine),
            Model::Controller => errors::<ControllerSlice>(&self.controller),
            Model::Pod => errors::<PodSlice>(&self.pod),
            Model::Tag => errors::<TagSlice>(&self.tag),
            Model::Token => errors::<TokenSlice>(&self.token),
        }
    }
}
