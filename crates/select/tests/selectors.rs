#![forbid(unsafe_code)]

use std::sync::Arc;

use fleet_core::{CallId, Entity, ErrorPayload};
use fleet_select::{BaseSelectors, SearchFilter};
use fleet_store::{Command, EntityState, NoStatus, Slice, State, StatusEvent, StatusKind, StatusPhase};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    id: u32,
    name: String,
    definition: Option<String>,
}

impl Entity for Label {
    type Key = u32;
    const MODEL: &'static str = "label";
    const PK: &'static str = "id";
    fn key(&self) -> &u32 {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Manual,
    Auto,
}

impl SearchFilter<Label> for Kind {
    fn matches(&self, item: &Label) -> bool {
        let manual = item.definition.as_deref().map_or(true, str::is_empty);
        match self {
            Kind::Manual => manual,
            Kind::Auto => !manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Sync,
}

impl StatusKind for Op {
    const ALL: &'static [Self] = &[Op::Sync];
    fn name(self) -> &'static str {
        "sync"
    }
    fn flag(self) -> &'static str {
        "syncing"
    }
}

struct LabelSlice;

impl Slice for LabelSlice {
    type Item = Label;
    type Status = NoStatus;
    type Extra = ();
    type Custom = ();
}

struct TrackedSlice;

impl Slice for TrackedSlice {
    type Item = Label;
    type Status = Op;
    type Extra = ();
    type Custom = ();

    fn status_handlers() -> &'static [fleet_store::SliceStatusHandler<Self>] {
        static HANDLERS: [fleet_store::SliceStatusHandler<TrackedSlice>; 1] =
            [fleet_store::StatusHandler::new(Op::Sync)];
        &HANDLERS
    }
}

fn label(id: u32, name: &str, definition: Option<&str>) -> Label {
    Label { id, name: name.to_string(), definition: definition.map(str::to_string) }
}

fn selectors() -> BaseSelectors<Label, Kind> {
    BaseSelectors::new(|l| l.name.as_str())
}

fn wardrobe() -> State<LabelSlice> {
    EntityState::with_items(vec![
        label(1, "jacket", None),
        label(2, "jeans", Some("denim")),
        label(3, "shirt", None),
    ])
}

fn ids(items: &[Label]) -> Vec<u32> {
    items.iter().map(|l| l.id).collect()
}

#[test]
fn search_applies_filter_then_term() {
    let sel = selectors();
    let state = wardrobe();
    assert_eq!(ids(&sel.search(&state, None, None)), vec![1, 2, 3]);
    assert_eq!(ids(&sel.search(&state, Some(""), None)), vec![1, 2, 3]);
    assert_eq!(ids(&sel.search(&state, Some("j"), None)), vec![1, 2]);
    assert_eq!(ids(&sel.search(&state, Some("j"), Some(Kind::Manual))), vec![1]);
    assert_eq!(ids(&sel.search(&state, None, Some(Kind::Auto))), vec![2]);
    // Case-sensitive by default.
    assert!(sel.search(&state, Some("J"), None).is_empty());
}

#[test]
fn custom_predicate_replaces_substring_match() {
    let sel = selectors().with_predicate(|l, term| l.name.starts_with(term));
    let state = wardrobe();
    assert_eq!(ids(&sel.search(&state, Some("s"), None)), vec![3]);
}

#[test]
fn same_arguments_return_cached_result() {
    let sel = selectors();
    let state = wardrobe();
    let a = sel.search(&state, Some("j"), None);
    let b = sel.search(&state, Some("j"), None);
    assert!(Arc::ptr_eq(&a, &b));
    let c = sel.search(&state, Some("sh"), None);
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(ids(&c), vec![3]);
}

#[test]
fn get_by_ids_keys_do_not_collide() {
    let sel = selectors();
    let state: State<LabelSlice> = EntityState::with_items(vec![
        label(1, "a", None),
        label(23, "b", None),
        label(12, "c", None),
        label(3, "d", None),
    ]);
    let first = sel.get_by_ids(&state, &[1, 23]);
    let second = sel.get_by_ids(&state, &[12, 3]);
    assert_eq!(ids(&first), vec![1, 23]);
    assert_eq!(ids(&second), vec![12, 3]);
    assert!(Arc::ptr_eq(&first, &sel.get_by_ids(&state, &[1, 23])));
}

#[test]
fn get_by_ids_follows_argument_order_and_skips_unknown() {
    let sel = selectors();
    let state = wardrobe();
    assert_eq!(ids(&sel.get_by_ids(&state, &[3, 99, 1])), vec![3, 1]);
    assert_eq!(sel.get_by_id(&state, &2).map(|l| l.name.as_str()), Some("jeans"));
    assert!(sel.get_by_id(&state, &99).is_none());
}

#[test]
fn state_change_invalidates_cache() {
    let sel = selectors();
    let mut state = wardrobe();
    let before = sel.search(&state, Some("j"), None);
    LabelSlice::reduce(&mut state, Command::CreateNotify(label(4, "jumper", None)));
    let after = sel.search(&state, Some("j"), None);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(ids(&after), vec![1, 2, 4]);
    assert_eq!(ids(&before), vec![1, 2]);
}

#[test]
fn flag_selectors_read_state() {
    let sel = selectors();
    let mut state = wardrobe();
    assert!(sel.loaded(&state));
    assert!(!sel.loading(&state));
    assert_eq!(sel.count(&state), 3);
    LabelSlice::reduce(&mut state, Command::UpdateStart);
    assert!(sel.saving(&state));
    LabelSlice::reduce(&mut state, Command::UpdateError(ErrorPayload::from("nope")));
    assert_eq!(sel.errors(&state), Some(&ErrorPayload::from("nope")));
    assert!(!sel.saved(&state));
}

#[test]
fn fuzzy_search_ranks_best_match_first() {
    let sel = selectors();
    let state: State<LabelSlice> = EntityState::with_items(vec![
        label(1, "nxoxdxe", None),
        label(2, "node", None),
        label(3, "gpu", None),
    ]);
    let hits = sel.fuzzy_search(&state, "node");
    assert_eq!(ids(&hits), vec![2, 1]);
    assert_eq!(ids(&sel.fuzzy_search(&state, "")), vec![1, 2, 3]);
}

#[test]
fn status_selectors() {
    let sel = selectors();
    let mut state = State::<TrackedSlice>::with_items(vec![label(1, "a", None), label(2, "b", None)]);
    TrackedSlice::reduce(
        &mut state,
        Command::Status(StatusEvent {
            status: Op::Sync,
            phase: StatusPhase::Start,
            keys: vec![2],
            call_id: None,
            payload: Value::Null,
        }),
    );
    assert_eq!(sel.processing(&state), vec![2]);
    assert!(sel.status_of(&state, &2, Op::Sync));
    assert!(!sel.status_of(&state, &1, Op::Sync));
    assert_eq!(sel.with_status(&state, Op::Sync).len(), 1);
    assert!(sel.statuses_for(&state, &1).is_none());
}

#[test]
fn list_selector_reads_call_id_state() {
    let sel = selectors();
    let mut state = wardrobe();
    let call = CallId::from("q1");
    assert!(sel.list(&state, &call).is_none());
    LabelSlice::reduce(&mut state, Command::ListStart(call.clone(), None));
    assert!(sel.list(&state, &call).is_some_and(|l| l.loading));
}
