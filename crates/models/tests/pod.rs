#![forbid(unsafe_code)]

use fleet_core::Action;
use fleet_models::pod::{self, PodPowerParameters, PodProject};
use fleet_models::{Controller, Host, Machine, Pod, PodDeleteParams, PodSlice, PodStatus, PodType, RootState};
use fleet_store::{EntityState, Reducer, Slice, State};
use serde_json::{json, Value};

fn pod(id: u32, name: &str, ty: PodType) -> Pod {
    Pod {
        id,
        name: name.into(),
        pod_type: ty,
        host: None,
        cluster: None,
        power_parameters: PodPowerParameters::default(),
    }
}

fn lxd_at(id: u32, address: &str) -> Pod {
    Pod {
        power_parameters: PodPowerParameters { power_address: address.into(), project: None },
        ..pod(id, &format!("lxd-{id}"), PodType::Lxd)
    }
}

fn machine(system_id: &str) -> Machine {
    serde_json::from_value(json!({ "system_id": system_id, "hostname": format!("m-{system_id}") })).unwrap()
}

fn controller(system_id: &str) -> Controller {
    serde_json::from_value(json!({ "system_id": system_id, "hostname": format!("c-{system_id}") })).unwrap()
}

fn ev(verb: &str, payload: Value) -> Action {
    Action::event("pod", verb, payload)
}

#[test]
fn fetch_success_keeps_active_pod_and_seeds_statuses() {
    let mut root = RootState::default();
    root.dispatch(&ev("fetchSuccess", json!([pod(1, "one", PodType::Lxd), pod(2, "two", PodType::Virsh)])))
        .unwrap();
    root.dispatch(&ev("setActiveSuccess", json!(pod(1, "one-detailed", PodType::Lxd)))).unwrap();
    assert_eq!(pod::active(&root.pod).map(|p| p.id), Some(1));

    root.dispatch(&ev(
        "fetchSuccess",
        json!([pod(1, "one-summary", PodType::Lxd), pod(2, "two-new", PodType::Virsh), pod(3, "three", PodType::Rsd)]),
    ))
    .unwrap();
    let names: Vec<&str> = root.pod.items().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["one", "two-new", "three"]);
    let record = &root.pod.statuses()[&3];
    assert!(!record.any());
    assert_eq!(serde_json::to_value(record).unwrap(), json!({ "composing": false, "deleting": false, "refreshing": false }));
}

#[test]
fn set_active_error_clears_active() {
    let mut root = RootState::default();
    root.dispatch(&ev("fetchSuccess", json!([pod(1, "one", PodType::Lxd)]))).unwrap();
    root.dispatch(&ev("setActiveSuccess", json!(pod(1, "one", PodType::Lxd)))).unwrap();
    root.dispatch(&ev("setActiveError", json!("not allowed"))).unwrap();
    assert!(pod::active(&root.pod).is_none());
    assert_eq!(root.pod.errors().map(|e| e.to_string()), Some("not allowed".to_string()));

    root.dispatch(&ev("setActiveSuccess", json!(pod(1, "one", PodType::Lxd)))).unwrap();
    root.dispatch(&ev("setActiveSuccess", Value::Null)).unwrap();
    assert!(pod::active(&root.pod).is_none());
}

#[test]
fn refresh_status_lifecycle_merges_pod() {
    let mut root = RootState::default();
    root.dispatch(&ev("fetchSuccess", json!([pod(1, "a", PodType::Lxd), pod(2, "b", PodType::Lxd)]))).unwrap();

    root.dispatch(&ev("refreshStart", Value::Null).with_item(json!({ "id": 1 }))).unwrap();
    root.dispatch(&ev("refreshStart", Value::Null).with_item(json!({ "id": 2 }))).unwrap();
    assert!(pod::SELECTORS.status_of(&root.pod, &1, PodStatus::Refresh));
    assert_eq!(pod::SELECTORS.processing(&root.pod), vec![1, 2]);

    root.dispatch(&ev("refreshSuccess", json!(pod(1, "a-refreshed", PodType::Lxd))).with_item(json!({ "id": 1 })))
        .unwrap();
    assert!(!pod::SELECTORS.status_of(&root.pod, &1, PodStatus::Refresh));
    assert!(pod::SELECTORS.status_of(&root.pod, &2, PodStatus::Refresh));
    assert_eq!(root.pod.find(&1).map(|p| p.name.as_str()), Some("a-refreshed"));
}

#[test]
fn delete_status_then_notify_drops_record() {
    let mut root = RootState::default();
    root.dispatch(&ev("fetchSuccess", json!([pod(1, "a", PodType::Lxd)]))).unwrap();
    root.dispatch(&ev("deleteStart", Value::Null).with_item(json!({ "id": 1 }))).unwrap();
    assert!(pod::SELECTORS.status_of(&root.pod, &1, PodStatus::Delete));
    assert!(!root.pod.saving());

    root.dispatch(&ev("deleteNotify", json!(1))).unwrap();
    assert!(root.pod.items().is_empty());
    assert!(root.pod.statuses().get(&1).is_none());

    // The late success must not resurrect the record.
    root.dispatch(&ev("deleteSuccess", Value::Null).with_item(json!({ "id": 1 }))).unwrap();
    assert!(root.pod.statuses().get(&1).is_none());
}

#[test]
fn create_notify_seeds_statuses_once() {
    let mut state = State::<PodSlice>::default();
    PodSlice::apply(&mut state, &ev("createNotify", json!(pod(5, "new", PodType::Virsh)))).unwrap();
    PodSlice::apply(&mut state, &ev("composeStart", Value::Null).with_item(json!({ "id": 5 }))).unwrap();
    PodSlice::apply(&mut state, &ev("createNotify", json!(pod(5, "new-again", PodType::Virsh)))).unwrap();
    assert_eq!(state.items().len(), 1);
    assert!(pod::SELECTORS.status_of(&state, &5, PodStatus::Compose));
}

#[test]
fn projects_by_power_address() {
    let mut root = RootState::default();
    let item = json!({ "type": "lxd", "power_address": "172.0.0.1" });
    let projects = json!([{ "name": "default" }, { "name": "prod", "description": "production" }]);
    root.dispatch(&ev("getProjectsSuccess", projects).with_item(item.clone())).unwrap();
    assert_eq!(pod::projects_by_lxd_server(&root.pod, "172.0.0.1").len(), 2);

    root.dispatch(&ev("pollLxdServerError", json!("authenticate first"))).unwrap();
    assert!(root.pod.errors().is_some());
    root.dispatch(&ev("pollLxdServerSuccess", json!([{ "name": "only" }])).with_item(item)).unwrap();
    assert!(root.pod.errors().is_none());
    assert_eq!(
        pod::projects_by_lxd_server(&root.pod, "172.0.0.1"),
        [PodProject { name: "only".into(), description: String::new() }].as_slice()
    );

    root.dispatch(&PodSlice::clear_projects()).unwrap();
    assert!(pod::projects(&root.pod).is_empty());
}

#[test]
fn type_selectors() {
    let clustered = Pod { cluster: Some(0), ..pod(2, "cluster host", PodType::Lxd) };
    let state: State<PodSlice> = EntityState::with_items(vec![
        pod(1, "virsh host", PodType::Virsh),
        clustered,
        pod(3, "single host", PodType::Lxd),
        pod(4, "rack", PodType::Rsd),
    ]);
    let ids = |pods: Vec<&Pod>| pods.into_iter().map(|p| p.id).collect::<Vec<_>>();
    assert_eq!(ids(pod::kvms(&state)), vec![1, 2, 3]);
    assert_eq!(ids(pod::lxd(&state)), vec![2, 3]);
    assert_eq!(ids(pod::virsh(&state)), vec![1]);
    assert_eq!(ids(pod::rsd(&state)), vec![4]);
    assert_eq!(ids(pod::lxd_single_hosts(&state)), vec![3]);
}

#[test]
fn groups_lxd_pods_by_exact_address() {
    let state: State<PodSlice> = EntityState::with_items(vec![
        pod(1, "virsh", PodType::Virsh),
        lxd_at(2, "172.0.0.1"),
        lxd_at(3, "172.0.0.1"),
        lxd_at(4, "192.168.0.1:8000"),
        lxd_at(5, "192.168.0.1:9000"),
    ]);
    let groups: Vec<(String, Vec<u32>)> = pod::group_by_lxd_server(&state)
        .into_iter()
        .map(|g| (g.address.to_string(), g.pods.iter().map(|p| p.id).collect()))
        .collect();
    assert_eq!(
        groups,
        vec![
            ("172.0.0.1".to_string(), vec![2, 3]),
            ("192.168.0.1:8000".to_string(), vec![4]),
            ("192.168.0.1:9000".to_string(), vec![5]),
        ]
    );
    let on_server: Vec<u32> = pod::get_by_lxd_server(&state, "172.0.0.1").iter().map(|p| p.id).collect();
    assert_eq!(on_server, vec![2, 3]);
}

#[test]
fn host_lookup_checks_machines_then_controllers() {
    let mut root = RootState {
        pod: EntityState::with_items(vec![
            Pod { host: Some("aaaaaa".into()), ..pod(1, "p1", PodType::Lxd) },
            Pod { host: Some("bbbbbb".into()), ..pod(2, "p2", PodType::Lxd) },
            Pod { host: Some("cccccc".into()), ..pod(3, "p3", PodType::Lxd) },
            Pod { host: Some("zzzzzz".into()), ..pod(4, "p4", PodType::Lxd) },
            Pod { host: Some("aaaaaa".into()), ..pod(5, "p5", PodType::Virsh) },
        ]),
        machine: EntityState::with_items(vec![machine("cccccc"), machine("dddddd")]),
        controller: EntityState::with_items(vec![controller("aaaaaa"), controller("bbbbbb")]),
        ..RootState::default()
    };

    assert!(matches!(&*pod::get_host(&root, 3), Some(Host::Machine(m)) if m.system_id == "cccccc"));
    assert!(matches!(&*pod::get_host(&root, 1), Some(Host::Controller(c)) if c.system_id == "aaaaaa"));
    assert!(pod::get_host(&root, 4).is_none());
    assert!(pod::get_host(&root, 99).is_none());

    let hosts: Vec<String> = pod::all_hosts(&root).iter().map(|h| h.system_id().to_string()).collect();
    assert_eq!(hosts, ["aaaaaa", "bbbbbb", "cccccc"]);

    // A machine with the same system id takes precedence once it appears.
    root.dispatch(&Action::event("machine", "createNotify", json!(machine("aaaaaa")))).unwrap();
    assert!(matches!(&*pod::get_host(&root, 1), Some(Host::Machine(_))));
}

#[test]
fn request_creators() {
    assert_eq!(
        serde_json::to_value(PodSlice::refresh(7)).unwrap(),
        json!({ "type": "pod/refresh", "meta": { "model": "pod", "method": "refresh" }, "payload": { "params": { "id": 7 } } })
    );
    assert_eq!(serde_json::to_value(PodSlice::set_active(None)).unwrap()["payload"], json!({ "params": null }));
    let poll = serde_json::to_value(PodSlice::poll_lxd_server(json!({ "power_address": "10.0.0.1" }))).unwrap();
    assert_eq!(poll["meta"]["poll"], json!(true));
    assert_eq!(poll["meta"]["method"], json!("get_projects"));
    assert_eq!(poll["payload"]["params"]["type"], json!("lxd"));
    let stop = serde_json::to_value(PodSlice::poll_lxd_server_stop()).unwrap();
    assert_eq!(stop["meta"]["pollStop"], json!(true));
    assert_eq!(stop["payload"], Value::Null);
    assert_eq!(
        serde_json::to_value(PodSlice::compose(json!({ "id": 1, "cores": 2 }))).unwrap()["payload"],
        json!({ "params": { "id": 1, "cores": 2 } })
    );
}

#[test]
fn delete_can_decompose_machines() {
    let decompose = PodSlice::delete_with(PodDeleteParams { id: 4, decompose: Some(true) });
    assert_eq!(
        serde_json::to_value(&decompose).unwrap(),
        json!({
            "type": "pod/delete",
            "meta": { "model": "pod", "method": "delete" },
            "payload": { "params": { "id": 4, "decompose": true } },
        })
    );
    // Without the flag the request matches the plain delete.
    let plain = PodSlice::delete_with(PodDeleteParams { id: 4, decompose: None });
    assert_eq!(plain, PodSlice::delete(&4));

    // The request reaches the reducer as a no-op; the status verbs drive state.
    let mut root = RootState::default();
    root.dispatch(&ev("fetchSuccess", json!([pod(4, "kvm", PodType::Lxd)]))).unwrap();
    root.dispatch(&decompose).unwrap();
    assert!(root.pod.statuses()[&4].active().next().is_none());
}
