#![forbid(unsafe_code)]

use fleet_core::{Action, Entity, ErrorPayload};
use fleet_store::{
    Command, Slice, SliceStatusHandler, State, StatusContext, StatusEvent, StatusHandler,
    StatusKind, StatusPhase,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Host {
    id: u32,
    name: String,
}

impl Entity for Host {
    type Key = u32;
    const MODEL: &'static str = "host";
    const PK: &'static str = "id";
    fn key(&self) -> &u32 {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HostStatus {
    Delete,
    Refresh,
}

impl StatusKind for HostStatus {
    const ALL: &'static [Self] = &[HostStatus::Delete, HostStatus::Refresh];

    fn name(self) -> &'static str {
        match self {
            HostStatus::Delete => "delete",
            HostStatus::Refresh => "refresh",
        }
    }

    fn flag(self) -> &'static str {
        match self {
            HostStatus::Delete => "deleting",
            HostStatus::Refresh => "refreshing",
        }
    }
}

fn merge_refreshed(state: &mut State<HostSlice>, ctx: &StatusContext<'_, u32>) {
    if let Ok(host) = serde_json::from_value::<Host>(ctx.payload.clone()) {
        if let Some(idx) = state.position(&host.id) {
            state.items_mut()[idx] = host;
        }
    }
}

static HANDLERS: [SliceStatusHandler<HostSlice>; 2] = [
    StatusHandler::new(HostStatus::Delete),
    StatusHandler::new(HostStatus::Refresh).on_success(merge_refreshed),
];

struct HostSlice;

impl Slice for HostSlice {
    type Item = Host;
    type Status = HostStatus;
    type Extra = ();
    type Custom = ();

    const TRACKS_EVENT_ERRORS: bool = true;

    fn status_handlers() -> &'static [SliceStatusHandler<Self>] {
        &HANDLERS
    }
}

fn h(id: u32, name: &str) -> Host {
    Host { id, name: name.to_string() }
}

fn status(status: HostStatus, phase: StatusPhase, key: u32, payload: Value) -> Command<Host, HostStatus, ()> {
    Command::Status(StatusEvent { status, phase, keys: vec![key], call_id: None, payload })
}

#[test]
fn concurrent_statuses_on_different_items_are_independent() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a"), h(2, "b")]);
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Start, 1, Value::Null));
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Start, 2, Value::Null));
    assert!(state.statuses()[&1].get(HostStatus::Refresh));
    assert!(state.statuses()[&2].get(HostStatus::Refresh));

    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Success, 2, json!({ "id": 2, "name": "b2" })));
    assert!(state.statuses()[&1].get(HostStatus::Refresh));
    assert!(!state.statuses()[&2].get(HostStatus::Refresh));
    assert_eq!(state.find(&2), Some(&h(2, "b2")));
    assert_eq!(state.find(&1), Some(&h(1, "a")));
}

#[test]
fn status_records_are_created_lazily_with_every_flag() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a")]);
    assert!(state.statuses().is_empty());
    HostSlice::reduce(&mut state, status(HostStatus::Delete, StatusPhase::Start, 1, Value::Null));
    let record = &state.statuses()[&1];
    assert!(record.get(HostStatus::Delete));
    assert!(!record.get(HostStatus::Refresh));
    assert!(record.any());
    assert_eq!(
        serde_json::to_value(record).unwrap(),
        json!({ "deleting": true, "refreshing": false })
    );
}

#[test]
fn status_error_sets_errors_and_records_event_error() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a"), h(2, "b")]);
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Start, 1, Value::Null));
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Error, 1, json!("unreachable")));

    assert!(!state.statuses()[&1].get(HostStatus::Refresh));
    assert_eq!(state.errors(), Some(&ErrorPayload::from("unreachable")));
    let errs = state.event_errors();
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].id, Some(1));
    assert_eq!(errs[0].event.as_deref(), Some("refresh"));

    // A second failure for the same pair replaces the first.
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Error, 1, json!("still unreachable")));
    assert_eq!(state.event_errors().len(), 1);
    assert_eq!(state.event_errors()[0].error, Some(ErrorPayload::from("still unreachable")));

    HostSlice::reduce(&mut state, Command::Cleanup);
    assert!(state.event_errors().is_empty());
    assert_eq!(state.errors(), None);
}

#[test]
fn success_after_delete_notify_does_not_resurrect_record() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a")]);
    HostSlice::reduce(&mut state, status(HostStatus::Delete, StatusPhase::Start, 1, Value::Null));
    HostSlice::reduce(&mut state, Command::DeleteNotify(1));
    // The generic notify leaves the record alone; drop it the way a slice would.
    state.statuses_mut().remove(&1);
    HostSlice::reduce(&mut state, status(HostStatus::Delete, StatusPhase::Success, 1, Value::Null));
    assert!(state.statuses().get(&1).is_none());
    assert!(state.items().is_empty());
}

#[test]
fn status_verbs_take_precedence_over_common_verbs() {
    let start = Action::event("host", "deleteStart", Value::Null).with_item(json!({ "id": 5 }));
    match HostSlice::decode(&start).unwrap() {
        Command::Status(ev) => {
            assert_eq!(ev.status, HostStatus::Delete);
            assert_eq!(ev.phase, StatusPhase::Start);
            assert_eq!(ev.keys, vec![5]);
        }
        other => panic!("expected status command, got {other:?}"),
    }

    // Notify is not a status phase and still reaches the common reducer.
    let notify = Action::event("host", "deleteNotify", json!(5));
    assert_eq!(HostSlice::decode(&notify).unwrap(), Command::DeleteNotify(5));

    let mut state = State::<HostSlice>::with_items(vec![h(5, "e")]);
    HostSlice::apply(&mut state, &start).unwrap();
    assert!(!state.saving());
    assert!(state.statuses()[&5].get(HostStatus::Delete));
}

#[test]
fn status_request_shape() {
    assert_eq!(
        serde_json::to_value(HostSlice::status_request(HostStatus::Refresh, &3)).unwrap(),
        json!({
            "type": "host/refresh",
            "meta": { "model": "host", "method": "refresh" },
            "payload": { "params": { "id": 3 } },
        })
    );
}

#[test]
fn start_flag_stays_set_without_resolution() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a")]);
    HostSlice::reduce(&mut state, status(HostStatus::Refresh, StatusPhase::Start, 1, Value::Null));
    HostSlice::reduce(&mut state, Command::FetchSuccess(vec![h(1, "a")]));
    assert!(state.statuses()[&1].get(HostStatus::Refresh));
}

#[test]
fn item_list_applies_status_to_every_key() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a"), h(2, "b"), h(3, "c")]);
    let items = json!([{ "id": 1 }, { "id": 3 }]);
    let start = Action::event("host", "refreshStart", Value::Null).with_item(items.clone());
    match HostSlice::decode(&start).unwrap() {
        Command::Status(ev) => assert_eq!(ev.keys, vec![1, 3]),
        other => panic!("expected status command, got {other:?}"),
    }
    HostSlice::apply(&mut state, &start).unwrap();
    assert!(state.statuses()[&1].get(HostStatus::Refresh));
    assert!(state.statuses()[&3].get(HostStatus::Refresh));
    assert!(state.statuses().get(&2).is_none());

    let error = Action::event("host", "refreshError", json!("timeout")).with_item(items);
    HostSlice::apply(&mut state, &error).unwrap();
    assert!(!state.statuses()[&1].get(HostStatus::Refresh));
    assert!(!state.statuses()[&3].get(HostStatus::Refresh));
    let ids: Vec<Option<u32>> = state.event_errors().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Some(1), Some(3)]);
    assert!(state.event_errors().iter().all(|e| e.event.as_deref() == Some("refresh")));
}

#[test]
fn malformed_key_in_item_list_is_rejected() {
    let mut state = State::<HostSlice>::with_items(vec![h(1, "a")]);
    let start = Action::event("host", "refreshStart", Value::Null).with_item(json!([{ "id": 1 }, { "id": "x" }]));
    assert!(HostSlice::apply(&mut state, &start).is_err());
    assert!(state.statuses().is_empty());
}
