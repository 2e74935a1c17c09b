//! Controllers: region/rack nodes with their own action set and image sync
//! checks.

use std::collections::BTreeMap;

use fleet_core::{Action, CallId, DecodeError, Entity, ErrorPayload};
use fleet_select::BaseSelectors;
use fleet_store::slice::payload;
use fleet_store::{common, Slice, SliceStatusHandler, State, StatusContext, StatusHandler, StatusKind};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::node::{self, NodeActionKind, NodeActionParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub system_id: String,
    pub hostname: String,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub node_type_display: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Entity for Controller {
    type Key = String;
    const MODEL: &'static str = "controller";
    const PK: &'static str = "system_id";

    fn key(&self) -> &String {
        &self.system_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerStatus {
    CheckImages,
    Delete,
    GetSummaryXml,
    GetSummaryYaml,
    ImportImages,
    Off,
    On,
    OverrideFailedTesting,
    SetZone,
    Test,
}

impl StatusKind for ControllerStatus {
    const ALL: &'static [Self] = &[
        ControllerStatus::CheckImages,
        ControllerStatus::Delete,
        ControllerStatus::GetSummaryXml,
        ControllerStatus::GetSummaryYaml,
        ControllerStatus::ImportImages,
        ControllerStatus::Off,
        ControllerStatus::On,
        ControllerStatus::OverrideFailedTesting,
        ControllerStatus::SetZone,
        ControllerStatus::Test,
    ];

    fn name(self) -> &'static str {
        match self {
            ControllerStatus::CheckImages => "checkImages",
            ControllerStatus::Delete => "delete",
            ControllerStatus::GetSummaryXml => "getSummaryXml",
            ControllerStatus::GetSummaryYaml => "getSummaryYaml",
            ControllerStatus::ImportImages => "importImages",
            ControllerStatus::Off => "off",
            ControllerStatus::On => "on",
            ControllerStatus::OverrideFailedTesting => "overrideFailedTesting",
            ControllerStatus::SetZone => "setZone",
            ControllerStatus::Test => "test",
        }
    }

    fn flag(self) -> &'static str {
        match self {
            ControllerStatus::CheckImages => "checkingImages",
            ControllerStatus::Delete => "deleting",
            ControllerStatus::GetSummaryXml => "gettingSummaryXml",
            ControllerStatus::GetSummaryYaml => "gettingSummaryYaml",
            ControllerStatus::ImportImages => "importingImages",
            ControllerStatus::Off => "turningOff",
            ControllerStatus::On => "turningOn",
            ControllerStatus::OverrideFailedTesting => "overridingFailedTesting",
            ControllerStatus::SetZone => "settingZone",
            ControllerStatus::Test => "testing",
        }
    }
}

impl NodeActionKind for ControllerStatus {
    fn action_name(self) -> &'static str {
        match self {
            ControllerStatus::CheckImages => "check-images",
            ControllerStatus::Delete => "delete",
            ControllerStatus::GetSummaryXml => "get-summary-xml",
            ControllerStatus::GetSummaryYaml => "get-summary-yaml",
            ControllerStatus::ImportImages => "import-images",
            ControllerStatus::Off => "off",
            ControllerStatus::On => "on",
            ControllerStatus::OverrideFailedTesting => "override-failed-testing",
            ControllerStatus::SetZone => "set-zone",
            ControllerStatus::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerExtra {
    pub active: Option<String>,
    pub selected: Vec<String>,
    /// Image sync status per controller, as last reported by a check.
    pub image_sync_statuses: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    SetActiveSuccess(Option<String>),
    SetActiveError(ErrorPayload),
    SetSelected(Vec<String>),
}

fn merge_image_sync(state: &mut State<ControllerSlice>, ctx: &StatusContext<'_, String>) {
    let Some(reported) = ctx.payload.as_object() else {
        debug!("image check result without a status map");
        return;
    };
    let statuses = &mut state.extra_mut().image_sync_statuses;
    for (system_id, status) in reported {
        statuses.insert(system_id.clone(), status.clone());
    }
}

fn check_images_request(system_id: &String) -> Action {
    ControllerSlice::check_images(std::slice::from_ref(system_id))
}

static HANDLERS: Lazy<Vec<SliceStatusHandler<ControllerSlice>>> = Lazy::new(|| {
    ControllerStatus::ALL
        .iter()
        .map(|status| match status {
            ControllerStatus::CheckImages => StatusHandler::new(*status)
                .alias("pollCheckImages")
                .method("check_images")
                .on_success(merge_image_sync)
                .prepare(check_images_request),
            _ => StatusHandler::new(*status).method("action"),
        })
        .collect()
});

pub struct ControllerSlice;

impl Slice for ControllerSlice {
    type Item = Controller;
    type Status = ControllerStatus;
    type Extra = ControllerExtra;
    type Custom = ControllerCommand;

    const TRACKS_EVENT_ERRORS: bool = true;

    fn status_handlers() -> &'static [SliceStatusHandler<Self>] {
        HANDLERS.as_slice()
    }

    fn fetch_success(state: &mut State<Self>, items: Vec<Controller>) {
        node::merge_nodes::<Self>(state, items);
    }

    fn create_notify(state: &mut State<Self>, item: Controller) {
        node::create_node::<Self>(state, item);
    }

    fn delete_notify(state: &mut State<Self>, key: String) {
        common::delete_notify(state, &key);
        state.statuses_mut().remove(&key);
        state.extra_mut().selected.retain(|id| *id != key);
    }

    fn reduce_custom(state: &mut State<Self>, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::SetActiveSuccess(key) => state.extra_mut().active = key,
            ControllerCommand::SetActiveError(e) => {
                state.extra_mut().active = None;
                common::record_event_error(state, Some("setActive"), None, Some(e.clone()));
                state.set_errors(Some(e));
            }
            ControllerCommand::SetSelected(ids) => state.extra_mut().selected = ids,
        }
    }

    fn decode_custom(verb: &str, action: &Action) -> Option<Result<ControllerCommand, DecodeError>> {
        let cmd = match verb {
            "setActiveSuccess" => {
                node::active_key::<Controller>(verb, action).map(ControllerCommand::SetActiveSuccess)
            }
            "setActiveError" => Ok(ControllerCommand::SetActiveError(ErrorPayload::from(action.payload.clone()))),
            "setSelected" => payload(Controller::MODEL, verb, action).map(ControllerCommand::SetSelected),
            _ => return None,
        };
        Some(cmd)
    }

    /// Controllers are deleted through the `action` method, keyed by `system_id`.
    fn delete(key: &String) -> Action {
        Self::action(ControllerStatus::Delete, &NodeActionParams::node(key.as_str()), None)
    }

    fn status_request(status: ControllerStatus, key: &String) -> Action {
        match status {
            ControllerStatus::CheckImages => check_images_request(key),
            _ => Self::action(status, &NodeActionParams::node(key.as_str()), None),
        }
    }
}

const CHECK_IMAGES_POLL_INTERVAL_MS: u64 = 30_000;

fn check_images_params(ids: &[String]) -> Value {
    let items: Vec<Value> = ids.iter().map(|id| json!({ "system_id": id })).collect();
    Action::params(Value::Array(items))
}

impl ControllerSlice {
    pub fn action(kind: ControllerStatus, params: &NodeActionParams, call_id: Option<CallId>) -> Action {
        node::node_action(Controller::MODEL, kind, params, call_id)
    }

    pub fn set_active(system_id: Option<&str>) -> Action {
        node::set_active_request(Controller::MODEL, Controller::PK, system_id)
    }

    pub fn set_selected(ids: &[String]) -> Action {
        Action::event(Controller::MODEL, "setSelected", json!(ids))
    }

    /// One image sync check covering `ids`.
    pub fn check_images(ids: &[String]) -> Action {
        Action::request(Controller::MODEL, "checkImages", "check_images", check_images_params(ids))
    }

    /// Repeats the image check every 30s. Several polls for different
    /// controllers can run at once, so each has its own `poll_id`.
    pub fn poll_check_images(ids: &[String], poll_id: &str) -> Action {
        let mut action =
            Action::request(Controller::MODEL, "pollCheckImages", "check_images", check_images_params(ids));
        action.meta.poll = Some(true);
        action.meta.poll_id = Some(poll_id.to_string());
        action.meta.poll_interval = Some(CHECK_IMAGES_POLL_INTERVAL_MS);
        action
    }

    pub fn poll_check_images_stop(poll_id: &str) -> Action {
        let mut action = Action::request(Controller::MODEL, "pollCheckImagesStop", "check_images", Value::Null);
        action.meta.poll_id = Some(poll_id.to_string());
        action.meta.poll_stop = Some(true);
        action
    }
}

pub static SELECTORS: Lazy<BaseSelectors<Controller>> =
    Lazy::new(|| BaseSelectors::new(|c| c.hostname.as_str()));

pub fn active(state: &State<ControllerSlice>) -> Option<&Controller> {
    let id = state.extra().active.as_ref()?;
    state.find(id)
}

pub fn image_sync_status<'s>(state: &'s State<ControllerSlice>, system_id: &str) -> Option<&'s Value> {
    state.extra().image_sync_statuses.get(system_id)
}

pub fn selected(state: &State<ControllerSlice>) -> Vec<&Controller> {
    state.extra().selected.iter().filter_map(|id| state.find(id)).collect()
}
