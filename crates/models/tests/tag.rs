#![forbid(unsafe_code)]

use std::sync::Arc;

use fleet_core::{Action, CallId};
use fleet_models::tag::{self, Tag};
use fleet_models::{RootState, TagSearchFilter, TagSlice};
use fleet_store::{EntityState, Reducer, Slice, State};
use serde_json::{json, Value};

fn tag(id: u32, name: &str, definition: Option<&str>) -> Tag {
    Tag {
        id,
        name: name.into(),
        definition: definition.map(str::to_string),
        comment: String::new(),
        kernel_opts: None,
        machine_count: 0,
    }
}

fn wardrobe() -> State<TagSlice> {
    EntityState::with_items(vec![tag(1, "jacket", None), tag(2, "jeans", Some("denim")), tag(3, "shirt", None)])
}

fn ids(tags: &[Tag]) -> Vec<u32> {
    tags.iter().map(|t| t.id).collect()
}

#[test]
fn search_with_and_without_manual_filter() {
    let state = wardrobe();
    assert_eq!(ids(&tag::SELECTORS.search(&state, None, None)), vec![1, 2, 3]);
    assert_eq!(ids(&tag::SELECTORS.search(&state, Some("j"), None)), vec![1, 2]);
    assert_eq!(ids(&tag::SELECTORS.search(&state, Some("j"), Some(TagSearchFilter::Manual))), vec![1]);
    assert_eq!(ids(&tag::SELECTORS.search(&state, Some("j"), Some(TagSearchFilter::All))), vec![1, 2]);
    assert_eq!(ids(&tag::SELECTORS.search(&state, None, Some(TagSearchFilter::Auto))), vec![2]);
}

#[test]
fn search_is_memoized_per_argument() {
    let state = wardrobe();
    let a = tag::SELECTORS.search(&state, Some("j"), Some(TagSearchFilter::Manual));
    let b = tag::SELECTORS.search(&state, Some("j"), Some(TagSearchFilter::Manual));
    let c = tag::SELECTORS.search(&state, Some("j"), Some(TagSearchFilter::Auto));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(ids(&c), vec![2]);
}

#[test]
fn empty_definition_counts_as_manual() {
    let state: State<TagSlice> = EntityState::with_items(vec![tag(1, "a", Some("")), tag(2, "b", Some("//node"))]);
    assert_eq!(tag::manual(&state).len(), 1);
    assert_eq!(tag::automatic(&state)[0].id, 2);
}

#[test]
fn filter_parses_from_cli_words() {
    assert_eq!("manual".parse::<TagSearchFilter>(), Ok(TagSearchFilter::Manual));
    assert_eq!("automatic".parse::<TagSearchFilter>(), Ok(TagSearchFilter::Auto));
    assert!("sometimes".parse::<TagSearchFilter>().is_err());
}

#[test]
fn call_id_list_round_trip_through_root() {
    let mut root = RootState::default();
    let call = CallId::from("tags-page-1");
    let request = TagSlice::fetch_list(call.clone(), Some(json!({ "page_size": 2 })));
    assert_eq!(request.meta.call_id, Some(call.clone()));
    root.dispatch(&request).unwrap();
    assert!(root.tag.lists().is_empty());

    root.dispatch(&Action::event("tag", "fetchStart", Value::Null).with_call_id(call.clone())).unwrap();
    root.dispatch(
        &Action::event("tag", "fetchSuccess", json!([tag(1, "jacket", None)])).with_call_id(call.clone()),
    )
    .unwrap();
    let list = &root.tag.lists()[&call];
    assert!(list.loaded);
    assert_eq!(list.items.len(), 1);
    assert!(root.tag.items().is_empty());

    root.dispatch(&TagSlice::remove_request(call.clone())).unwrap();
    assert!(root.tag.lists().is_empty());
}
