//! KVM hosts (pods): compose/delete/refresh statuses, the active pod, LXD
//! project discovery and host lookup across machines and controllers.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_core::{Action, DecodeError, Entity, ErrorPayload};
use fleet_select::{BaseSelectors, Memo};
use fleet_store::slice::payload;
use fleet_store::{
    common, Slice, SliceStatusHandler, State, StatusContext, StatusHandler, StatusKind, StatusRecord,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::controller::Controller;
use crate::machine::Machine;
use crate::RootState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodType {
    Virsh,
    Lxd,
    Rsd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodPowerParameters {
    #[serde(default)]
    pub power_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub pod_type: PodType,
    /// `system_id` of the machine or controller hosting the pod.
    #[serde(default)]
    pub host: Option<String>,
    /// Set when the pod is a member of an LXD cluster.
    #[serde(default)]
    pub cluster: Option<u32>,
    #[serde(default)]
    pub power_parameters: PodPowerParameters,
}

impl Entity for Pod {
    type Key = u32;
    const MODEL: &'static str = "pod";
    const PK: &'static str = "id";

    fn key(&self) -> &u32 {
        &self.id
    }
}

/// Params of a pod delete. `decompose` also removes the machines composed
/// on the pod.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PodDeleteParams {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodStatus {
    Compose,
    Delete,
    Refresh,
}

impl StatusKind for PodStatus {
    const ALL: &'static [Self] = &[PodStatus::Compose, PodStatus::Delete, PodStatus::Refresh];

    fn name(self) -> &'static str {
        match self {
            PodStatus::Compose => "compose",
            PodStatus::Delete => "delete",
            PodStatus::Refresh => "refresh",
        }
    }

    fn flag(self) -> &'static str {
        match self {
            PodStatus::Compose => "composing",
            PodStatus::Delete => "deleting",
            PodStatus::Refresh => "refreshing",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PodExtra {
    pub active: Option<u32>,
    /// LXD projects by server power address.
    pub projects: BTreeMap<String, Vec<PodProject>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PodCommand {
    SetActiveSuccess(Option<u32>),
    SetActiveError(ErrorPayload),
    GetProjectsSuccess { address: Option<String>, projects: Vec<PodProject> },
    GetProjectsError(ErrorPayload),
    /// Polling continues on error: it doubles as an authentication check.
    PollLxdServerSuccess { address: Option<String>, projects: Vec<PodProject> },
    PollLxdServerError(ErrorPayload),
    ClearProjects,
}

fn refresh_success(state: &mut State<PodSlice>, ctx: &StatusContext<'_, u32>) {
    let Ok(pod) = serde_json::from_value::<Pod>(ctx.payload.clone()) else {
        debug!("refresh success without a pod payload");
        return;
    };
    if let Some(idx) = state.position(&pod.id) {
        state.items_mut()[idx] = pod;
    }
}

static HANDLERS: [SliceStatusHandler<PodSlice>; 3] = [
    StatusHandler::new(PodStatus::Compose),
    StatusHandler::new(PodStatus::Delete),
    StatusHandler::new(PodStatus::Refresh).on_success(refresh_success),
];

pub struct PodSlice;

impl Slice for PodSlice {
    type Item = Pod;
    type Status = PodStatus;
    type Extra = PodExtra;
    type Custom = PodCommand;

    fn status_handlers() -> &'static [SliceStatusHandler<Self>] {
        &HANDLERS
    }

    /// Merges rather than replaces, and leaves the active pod alone so its
    /// already-fetched details survive a list refresh.
    fn fetch_success(state: &mut State<Self>, items: Vec<Pod>) {
        state.set_loading(false);
        state.set_loaded(true);
        let active = state.extra().active;
        for pod in items {
            match state.position(&pod.id) {
                Some(_) if active == Some(pod.id) => {}
                Some(idx) => state.items_mut()[idx] = pod,
                None => {
                    let id = pod.id;
                    state.items_mut().push(pod);
                    state.statuses_mut().entry(id).or_insert_with(StatusRecord::default);
                }
            }
        }
    }

    fn create_notify(state: &mut State<Self>, pod: Pod) {
        let id = pod.id;
        if state.upsert(pod) {
            state.statuses_mut().insert(id, StatusRecord::default());
        }
    }

    fn delete_notify(state: &mut State<Self>, id: u32) {
        common::delete_notify(state, &id);
        state.statuses_mut().remove(&id);
    }

    fn reduce_custom(state: &mut State<Self>, cmd: PodCommand) {
        match cmd {
            PodCommand::SetActiveSuccess(id) => state.extra_mut().active = id,
            PodCommand::SetActiveError(e) => {
                state.extra_mut().active = None;
                state.set_errors(Some(e));
            }
            PodCommand::GetProjectsSuccess { address, projects } => store_projects(state, address, projects),
            PodCommand::PollLxdServerSuccess { address, projects } => {
                state.set_errors(None);
                store_projects(state, address, projects);
            }
            PodCommand::GetProjectsError(e) | PodCommand::PollLxdServerError(e) => state.set_errors(Some(e)),
            PodCommand::ClearProjects => state.extra_mut().projects.clear(),
        }
    }

    fn decode_custom(verb: &str, action: &Action) -> Option<Result<PodCommand, DecodeError>> {
        let err = || ErrorPayload::from(action.payload.clone());
        let cmd = match verb {
            "setActiveSuccess" => {
                payload::<Option<Pod>>(Pod::MODEL, verb, action).map(|p| PodCommand::SetActiveSuccess(p.map(|p| p.id)))
            }
            "setActiveError" => Ok(PodCommand::SetActiveError(err())),
            "getProjectsSuccess" => payload(Pod::MODEL, verb, action)
                .map(|projects| PodCommand::GetProjectsSuccess { address: power_address(action), projects }),
            "getProjectsError" => Ok(PodCommand::GetProjectsError(err())),
            "pollLxdServerSuccess" => payload(Pod::MODEL, verb, action)
                .map(|projects| PodCommand::PollLxdServerSuccess { address: power_address(action), projects }),
            "pollLxdServerError" => Ok(PodCommand::PollLxdServerError(err())),
            "clearProjects" => Ok(PodCommand::ClearProjects),
            _ => return None,
        };
        Some(cmd)
    }
}

fn store_projects(state: &mut State<PodSlice>, address: Option<String>, projects: Vec<PodProject>) {
    match address.filter(|a| !a.is_empty()) {
        Some(address) => {
            state.extra_mut().projects.insert(address, projects);
        }
        None => debug!("project list without a power address ignored"),
    }
}

fn power_address(action: &Action) -> Option<String> {
    action.item()?.get("power_address")?.as_str().map(str::to_string)
}

impl PodSlice {
    pub fn compose(params: Value) -> Action {
        Action::request(Pod::MODEL, "compose", "compose", Action::params(params))
    }

    pub fn delete_with(params: PodDeleteParams) -> Action {
        Action::request(Pod::MODEL, "delete", "delete", Action::params(json!(params)))
    }

    pub fn refresh(id: u32) -> Action {
        Self::status_request(PodStatus::Refresh, &id)
    }

    /// `None` clears the active pod on the server.
    pub fn set_active(id: Option<u32>) -> Action {
        let params = id.map_or(Value::Null, |id| json!({ "id": id }));
        Action::request(Pod::MODEL, "setActive", "set_active", Action::params(params))
    }

    pub fn get_projects(params: Value) -> Action {
        Action::request(Pod::MODEL, "getProjects", "get_projects", Action::params(params))
    }

    pub fn poll_lxd_server(params: Value) -> Action {
        let mut params = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        params.insert("type".into(), json!(PodType::Lxd));
        let mut action =
            Action::request(Pod::MODEL, "pollLxdServer", "get_projects", Action::params(Value::Object(params)));
        action.meta.poll = Some(true);
        action
    }

    pub fn poll_lxd_server_stop() -> Action {
        let mut action = Action::request(Pod::MODEL, "pollLxdServerStop", "get_projects", Value::Null);
        action.meta.poll_stop = Some(true);
        action
    }

    pub fn clear_projects() -> Action {
        Action::event(Pod::MODEL, "clearProjects", Value::Null)
    }
}

pub static SELECTORS: Lazy<BaseSelectors<Pod>> = Lazy::new(|| BaseSelectors::new(|p| p.name.as_str()));

fn of_type(state: &State<PodSlice>, ty: PodType) -> Vec<&Pod> {
    state.items().iter().filter(|p| p.pod_type == ty).collect()
}

/// Pods of the types the product manages as KVM hosts.
pub fn kvms(state: &State<PodSlice>) -> Vec<&Pod> {
    state.items().iter().filter(|p| matches!(p.pod_type, PodType::Virsh | PodType::Lxd)).collect()
}

pub fn lxd(state: &State<PodSlice>) -> Vec<&Pod> {
    of_type(state, PodType::Lxd)
}

pub fn virsh(state: &State<PodSlice>) -> Vec<&Pod> {
    of_type(state, PodType::Virsh)
}

pub fn rsd(state: &State<PodSlice>) -> Vec<&Pod> {
    of_type(state, PodType::Rsd)
}

/// LXD pods that are not part of a cluster.
pub fn lxd_single_hosts(state: &State<PodSlice>) -> Vec<&Pod> {
    state.items().iter().filter(|p| p.pod_type == PodType::Lxd && p.cluster.is_none()).collect()
}

pub fn active(state: &State<PodSlice>) -> Option<&Pod> {
    state.find(&state.extra().active?)
}

pub fn projects(state: &State<PodSlice>) -> &BTreeMap<String, Vec<PodProject>> {
    &state.extra().projects
}

pub fn projects_by_lxd_server<'s>(state: &'s State<PodSlice>, address: &str) -> &'s [PodProject] {
    state.extra().projects.get(address).map(Vec::as_slice).unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LxdServerGroup<'a> {
    pub address: &'a str,
    pub pods: Vec<&'a Pod>,
}

/// LXD pods grouped by exact power address, in order of first appearance.
pub fn group_by_lxd_server(state: &State<PodSlice>) -> Vec<LxdServerGroup<'_>> {
    let mut groups: Vec<LxdServerGroup<'_>> = Vec::new();
    for pod in lxd(state) {
        let address = pod.power_parameters.power_address.as_str();
        match groups.iter_mut().find(|g| g.address == address) {
            Some(group) => group.pods.push(pod),
            None => groups.push(LxdServerGroup { address, pods: vec![pod] }),
        }
    }
    groups
}

pub fn get_by_lxd_server<'s>(state: &'s State<PodSlice>, address: &str) -> Vec<&'s Pod> {
    lxd(state).into_iter().filter(|p| p.power_parameters.power_address == address).collect()
}

/// The node hosting a pod.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node_type", rename_all = "lowercase")]
pub enum Host {
    Machine(Machine),
    Controller(Controller),
}

impl Host {
    pub fn system_id(&self) -> &str {
        match self {
            Host::Machine(m) => &m.system_id,
            Host::Controller(c) => &c.system_id,
        }
    }

    pub fn hostname(&self) -> &str {
        match self {
            Host::Machine(m) => &m.hostname,
            Host::Controller(c) => &c.hostname,
        }
    }
}

type HostStamp = (u64, u64, u64);

static HOST_MEMO: Lazy<Memo<u32, Option<Host>, HostStamp>> = Lazy::new(|| Memo::new("pod_host"));

fn host_stamp(root: &RootState) -> HostStamp {
    (root.pod.revision(), root.machine.revision(), root.controller.revision())
}

fn find_host(root: &RootState, system_id: &str) -> Option<Host> {
    let key = system_id.to_string();
    if let Some(machine) = root.machine.find(&key) {
        return Some(Host::Machine(machine.clone()));
    }
    root.controller.find(&key).cloned().map(Host::Controller)
}

/// Host of the pod: a machine if one matches, otherwise a controller. A
/// host missing from both collections is `None`, as is an unknown pod.
pub fn get_host(root: &RootState, pod_id: u32) -> Arc<Option<Host>> {
    HOST_MEMO.get_or_compute(host_stamp(root), pod_id, || {
        let pod = root.pod.find(&pod_id)?;
        find_host(root, pod.host.as_deref()?)
    })
}

/// Hosts of every pod, in pod order, without duplicates.
pub fn all_hosts(root: &RootState) -> Vec<Host> {
    let mut hosts: Vec<Host> = Vec::new();
    for pod in root.pod.items() {
        let Some(host) = pod.host.as_deref().and_then(|id| find_host(root, id)) else { continue };
        if !hosts.iter().any(|h| h.system_id() == host.system_id()) {
            hosts.push(host);
        }
    }
    hosts
}
