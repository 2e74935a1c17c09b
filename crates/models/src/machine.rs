//! Machines: node actions tracked as per-machine statuses, bulk action
//! results and counts keyed by call id, and the active/selected machine.

use std::collections::BTreeMap;

use fleet_core::{Action, CallId, DecodeError, Entity, ErrorPayload};
use fleet_select::BaseSelectors;
use fleet_store::slice::{payload, required_call_id};
use fleet_store::{
    common, EventError, Slice, SliceStatusHandler, State, StatusContext, StatusHandler, StatusKind,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::node::{self, NodeActionKind, NodeActionParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub system_id: String,
    pub hostname: String,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub power_state: String,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub tags: Vec<u32>,
}

impl Entity for Machine {
    type Key = String;
    const MODEL: &'static str = "machine";
    const PK: &'static str = "system_id";

    fn key(&self) -> &String {
        &self.system_id
    }
}

macro_rules! machine_statuses {
    ($($variant:ident => $name:literal, $flag:literal, $action:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MachineStatus {
            $($variant,)*
        }

        impl StatusKind for MachineStatus {
            const ALL: &'static [Self] = &[$(MachineStatus::$variant,)*];

            fn name(self) -> &'static str {
                match self {
                    $(MachineStatus::$variant => $name,)*
                }
            }

            fn flag(self) -> &'static str {
                match self {
                    $(MachineStatus::$variant => $flag,)*
                }
            }
        }

        impl NodeActionKind for MachineStatus {
            fn action_name(self) -> &'static str {
                match self {
                    $(MachineStatus::$variant => $action,)*
                }
            }
        }
    };
}

machine_statuses! {
    Abort => "abort", "aborting", "abort";
    Acquire => "acquire", "acquiring", "acquire";
    CheckPower => "checkPower", "checkingPower", "check-power";
    CloneFrom => "clone", "cloning", "clone";
    Commission => "commission", "commissioning", "commission";
    Delete => "delete", "deleting", "delete";
    Deploy => "deploy", "deploying", "deploy";
    ExitRescueMode => "exitRescueMode", "exitingRescueMode", "exit-rescue-mode";
    Lock => "lock", "locking", "lock";
    MarkBroken => "markBroken", "markingBroken", "mark-broken";
    MarkFixed => "markFixed", "markingFixed", "mark-fixed";
    Off => "off", "turningOff", "off";
    On => "on", "turningOn", "on";
    OverrideFailedTesting => "overrideFailedTesting", "overridingFailedTesting", "override-failed-testing";
    Release => "release", "releasing", "release";
    RescueMode => "rescueMode", "enteringRescueMode", "rescue-mode";
    SetPool => "setPool", "settingPool", "set-pool";
    SetZone => "setZone", "settingZone", "set-zone";
    SoftOff => "softOff", "turningOffSoftly", "off";
    Tag => "tag", "tagging", "tag";
    Test => "test", "testing", "test";
    Unlock => "unlock", "unlocking", "unlock";
    Untag => "untag", "untagging", "untag";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Loading,
    Success,
    Error,
}

/// Outcome of one (possibly bulk) node action, keyed by its call id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub errors: Option<ErrorPayload>,
    pub success_count: u64,
    pub failed_system_ids: Vec<String>,
    pub failure_details: Value,
}

impl Default for ActionResult {
    fn default() -> Self {
        Self {
            status: ActionStatus::Loading,
            errors: None,
            success_count: 0,
            failed_system_ids: Vec::new(),
            failure_details: Value::Null,
        }
    }
}

/// Machines picked in the list: explicit ids and groups, or a filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedMachines {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub grouping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

/// One outstanding machine count query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountState {
    pub count: Option<u64>,
    pub loading: bool,
    pub loaded: bool,
    pub refetching: bool,
    pub stale: bool,
    pub errors: Option<ErrorPayload>,
    pub params: Option<Value>,
    pub fetched_at: Option<i64>,
    pub refetched_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct MachineExtra {
    pub active: Option<String>,
    pub selected: Option<SelectedMachines>,
    pub actions: BTreeMap<CallId, ActionResult>,
    pub counts: BTreeMap<CallId, CountState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineCommand {
    SetActiveSuccess(Option<String>),
    SetActiveError(ErrorPayload),
    SetSelected(Option<SelectedMachines>),
    CountStart { call_id: CallId, params: Option<Value> },
    CountSuccess { call_id: CallId, count: u64 },
    CountError { call_id: CallId, errors: ErrorPayload },
    /// Forgets a call id, whether it tracked a list, a count or an action.
    RemoveRequest(CallId),
}

#[derive(Deserialize)]
struct CountPayload {
    count: u64,
}

fn count_start(state: &mut State<MachineSlice>, call_id: CallId, params: Option<Value>) {
    let now = chrono::Utc::now().timestamp_millis();
    let counts = &mut state.extra_mut().counts;
    match counts.get_mut(&call_id) {
        Some(count) => {
            count.refetching = true;
            count.refetched_at = Some(now);
        }
        None => {
            counts.insert(call_id, CountState { loading: true, params, fetched_at: Some(now), ..CountState::default() });
        }
    }
}

fn action_start(state: &mut State<MachineSlice>, ctx: &StatusContext<'_, String>) {
    let Some(call_id) = ctx.call_id else { return };
    state
        .extra_mut()
        .actions
        .entry(call_id.clone())
        .and_modify(|r| r.status = ActionStatus::Loading)
        .or_default();
}

fn action_success(state: &mut State<MachineSlice>, ctx: &StatusContext<'_, String>) {
    let Some(call_id) = ctx.call_id else { return };
    if !state.extra().actions.contains_key(call_id) {
        return;
    }
    let Some(result) = state.extra_mut().actions.get_mut(call_id) else { return };
    if ctx.payload.is_null() {
        result.status = ActionStatus::Error;
        return;
    }
    result.status = ActionStatus::Success;
    if let Some(count) = ctx.payload.get("success_count").and_then(Value::as_u64) {
        result.success_count = count;
    }
    let failed: Vec<String> = ctx
        .payload
        .get("failed_system_ids")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    if !failed.is_empty() {
        result.status = ActionStatus::Error;
        result.failed_system_ids = failed;
        result.failure_details = ctx.payload.get("failure_details").cloned().unwrap_or(Value::Null);
    }
}

fn action_error(state: &mut State<MachineSlice>, ctx: &StatusContext<'_, String>) {
    let Some(call_id) = ctx.call_id else { return };
    if !state.extra().actions.contains_key(call_id) {
        return;
    }
    if let Some(result) = state.extra_mut().actions.get_mut(call_id) {
        result.status = ActionStatus::Error;
        result.errors = Some(ErrorPayload::from(ctx.payload.clone()));
    }
}

fn check_power_request(system_id: &String) -> Action {
    Action::request(
        Machine::MODEL,
        MachineStatus::CheckPower.name(),
        "check_power",
        Action::params(json!({ "system_id": system_id })),
    )
}

static HANDLERS: Lazy<Vec<SliceStatusHandler<MachineSlice>>> = Lazy::new(|| {
    MachineStatus::ALL
        .iter()
        .map(|status| {
            let handler = StatusHandler::new(*status)
                .on_start(action_start)
                .on_success(action_success)
                .on_error(action_error);
            match status {
                MachineStatus::CheckPower => handler.method("check_power").prepare(check_power_request),
                _ => handler.method("action"),
            }
        })
        .collect()
});

pub struct MachineSlice;

impl Slice for MachineSlice {
    type Item = Machine;
    type Status = MachineStatus;
    type Extra = MachineExtra;
    type Custom = MachineCommand;

    const TRACKS_EVENT_ERRORS: bool = true;

    fn status_handlers() -> &'static [SliceStatusHandler<Self>] {
        HANDLERS.as_slice()
    }

    fn fetch_success(state: &mut State<Self>, items: Vec<Machine>) {
        node::merge_nodes::<Self>(state, items);
    }

    fn create_notify(state: &mut State<Self>, item: Machine) {
        node::create_node::<Self>(state, item);
    }

    /// Also drops the machine from every call-id list. Whether it was part of
    /// a count is unknown, so every count goes stale.
    fn delete_notify(state: &mut State<Self>, key: String) {
        common::delete_notify(state, &key);
        state.statuses_mut().remove(&key);
        for list in state.lists_mut().values_mut() {
            list.items.retain(|m| m.system_id != key);
        }
        let extra = state.extra_mut();
        if let Some(selected) = extra.selected.as_mut() {
            selected.items.retain(|id| *id != key);
        }
        for count in extra.counts.values_mut() {
            count.stale = true;
        }
    }

    fn invalidate_queries(state: &mut State<Self>) {
        common::invalidate_queries(state);
        if state.extra().counts.is_empty() {
            return;
        }
        for count in state.extra_mut().counts.values_mut() {
            count.stale = true;
        }
    }

    fn reduce_custom(state: &mut State<Self>, cmd: MachineCommand) {
        match cmd {
            MachineCommand::SetActiveSuccess(key) => state.extra_mut().active = key,
            MachineCommand::SetActiveError(e) => {
                state.extra_mut().active = None;
                common::record_event_error(state, Some("setActive"), None, Some(e.clone()));
                state.set_errors(Some(e));
            }
            MachineCommand::SetSelected(selected) => state.extra_mut().selected = selected,
            MachineCommand::CountStart { call_id, params } => count_start(state, call_id, params),
            MachineCommand::CountSuccess { call_id, count } => {
                // The call may have been cleaned up before the response arrived.
                if !state.extra().counts.contains_key(&call_id) {
                    debug!(call_id = %call_id, "count response for unknown call id ignored");
                    return;
                }
                if let Some(entry) = state.extra_mut().counts.get_mut(&call_id) {
                    entry.count = Some(count);
                    entry.loading = false;
                    entry.loaded = true;
                    entry.refetching = false;
                    entry.stale = false;
                }
            }
            MachineCommand::CountError { call_id, errors } => {
                let entry = state.extra_mut().counts.entry(call_id).or_default();
                entry.errors = Some(errors.clone());
                entry.loading = false;
                entry.refetching = false;
                common::record_event_error(state, Some("count"), None, Some(errors));
            }
            MachineCommand::RemoveRequest(call_id) => {
                common::remove_request(state, &call_id);
                let extra = state.extra();
                if extra.actions.contains_key(&call_id) || extra.counts.contains_key(&call_id) {
                    let extra = state.extra_mut();
                    extra.actions.remove(&call_id);
                    extra.counts.remove(&call_id);
                }
            }
        }
    }

    fn decode_custom(verb: &str, action: &Action) -> Option<Result<MachineCommand, DecodeError>> {
        let cmd = match verb {
            "setActiveSuccess" => node::active_key::<Machine>(verb, action).map(MachineCommand::SetActiveSuccess),
            "setActiveError" => Ok(MachineCommand::SetActiveError(ErrorPayload::from(action.payload.clone()))),
            "setSelected" => payload(Machine::MODEL, verb, action).map(MachineCommand::SetSelected),
            "countStart" => required_call_id(Machine::MODEL, verb, action)
                .map(|call_id| MachineCommand::CountStart { call_id, params: action.item().cloned() }),
            "countSuccess" => required_call_id(Machine::MODEL, verb, action).and_then(|call_id| {
                payload::<CountPayload>(Machine::MODEL, verb, action)
                    .map(|p| MachineCommand::CountSuccess { call_id, count: p.count })
            }),
            "countError" => required_call_id(Machine::MODEL, verb, action).map(|call_id| MachineCommand::CountError {
                call_id,
                errors: ErrorPayload::from(action.payload.clone()),
            }),
            "removeRequest" => payload(Machine::MODEL, verb, action).map(MachineCommand::RemoveRequest),
            _ => return None,
        };
        Some(cmd)
    }

    /// Machine lists always skip the transport cache.
    fn fetch_list(call_id: CallId, params: Option<Value>) -> Action {
        let payload = params.map(Action::params).unwrap_or(Value::Null);
        Action::request(Machine::MODEL, "fetch", "list", payload).with_call_id(call_id).without_cache()
    }

    /// Machines are deleted through the `action` method, keyed by `system_id`.
    fn delete(key: &String) -> Action {
        Self::action(MachineStatus::Delete, &NodeActionParams::node(key.as_str()), None)
    }

    /// Node actions carry `{action, extra, system_id}` rather than `{id}`.
    fn status_request(status: MachineStatus, key: &String) -> Action {
        match status {
            MachineStatus::CheckPower => check_power_request(key),
            _ => Self::action(status, &NodeActionParams::node(key.as_str()), None),
        }
    }
}

impl MachineSlice {
    /// A soft power-off is an `off` action with `stop_mode: soft` in its extras.
    pub fn action(kind: MachineStatus, params: &NodeActionParams, call_id: Option<CallId>) -> Action {
        if kind == MachineStatus::SoftOff {
            let params = params.clone().extra("stop_mode", json!("soft"));
            return node::node_action(Machine::MODEL, kind, &params, call_id);
        }
        node::node_action(Machine::MODEL, kind, params, call_id)
    }

    pub fn check_power(system_id: &str) -> Action {
        check_power_request(&system_id.to_string())
    }

    /// Count of machines matching `filter` (all machines when `None`).
    pub fn count(call_id: CallId, filter: Option<Value>) -> Action {
        let payload = filter.map_or(Value::Null, |filter| Action::params(json!({ "filter": filter })));
        Action::request(Machine::MODEL, "count", "count", payload).with_call_id(call_id)
    }

    pub fn set_active(system_id: Option<&str>) -> Action {
        node::set_active_request(Machine::MODEL, Machine::PK, system_id)
    }

    pub fn set_selected(selected: Option<SelectedMachines>) -> Action {
        Action::event(Machine::MODEL, "setSelected", json!(selected))
    }

    pub fn suppress_script_results(system_id: &str, script_result_ids: &[u32]) -> Action {
        Self::script_results("suppressScriptResults", "set_script_result_suppressed", system_id, script_result_ids)
    }

    pub fn unsuppress_script_results(system_id: &str, script_result_ids: &[u32]) -> Action {
        Self::script_results("unsuppressScriptResults", "set_script_result_unsuppressed", system_id, script_result_ids)
    }

    fn script_results(verb: &str, method: &str, system_id: &str, ids: &[u32]) -> Action {
        Action::request(
            Machine::MODEL,
            verb,
            method,
            Action::params(json!({ "system_id": system_id, "script_result_ids": ids })),
        )
    }
}

pub static SELECTORS: Lazy<BaseSelectors<Machine>> = Lazy::new(|| BaseSelectors::new(|m| m.hostname.as_str()));

pub fn active(state: &State<MachineSlice>) -> Option<&Machine> {
    let id = state.extra().active.as_ref()?;
    state.find(id)
}

/// Selected machines in selection order; ids no longer present are skipped.
pub fn selected(state: &State<MachineSlice>) -> Vec<&Machine> {
    let Some(sel) = state.extra().selected.as_ref() else { return Vec::new() };
    sel.items.iter().filter_map(|id| state.find(id)).collect()
}

/// Machines that are neither active nor selected.
pub fn unselected(state: &State<MachineSlice>) -> Vec<&Machine> {
    let extra = state.extra();
    let picked = |id: &String| {
        extra.active.as_ref() == Some(id) || extra.selected.as_ref().is_some_and(|s| s.items.contains(id))
    };
    state.items().iter().filter(|m| !picked(&m.system_id)).collect()
}

pub fn processing(state: &State<MachineSlice>) -> Vec<String> {
    SELECTORS.processing(state)
}

pub fn with_status(state: &State<MachineSlice>, status: MachineStatus) -> Vec<&Machine> {
    SELECTORS.with_status(state, status)
}

/// Machines with a tag or untag action in flight.
pub fn updating_tags(state: &State<MachineSlice>) -> Vec<&Machine> {
    state
        .items()
        .iter()
        .filter(|m| {
            state
                .statuses()
                .get(&m.system_id)
                .is_some_and(|r| r.get(MachineStatus::Tag) || r.get(MachineStatus::Untag))
        })
        .collect()
}

pub fn event_errors_for<'s>(
    state: &'s State<MachineSlice>,
    ids: &[String],
    events: Option<&[Option<&str>]>,
) -> Vec<&'s EventError<String>> {
    SELECTORS.event_errors_for(state, ids, events)
}

pub fn count<'s>(state: &'s State<MachineSlice>, call_id: &CallId) -> Option<&'s CountState> {
    state.extra().counts.get(call_id)
}

pub fn action_result<'s>(state: &'s State<MachineSlice>, call_id: &CallId) -> Option<&'s ActionResult> {
    let result = state.extra().actions.get(call_id);
    if result.is_none() {
        debug!(call_id = %call_id, "no tracked machine action");
    }
    result
}
