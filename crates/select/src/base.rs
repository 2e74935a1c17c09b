//! Selector set shared by every slice.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use fleet_core::{CallId, Entity, ErrorPayload};
use fleet_store::{EntityState, EventError, ListState, StatusKind, StatusRecord};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::memo::Memo;

/// Categorical filter applied before the text predicate in `search`.
pub trait SearchFilter<T>: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    fn matches(&self, item: &T) -> bool;
}

/// Filter type for entities without categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoFilter {}

impl<T> SearchFilter<T> for NoFilter {
    fn matches(&self, _item: &T) -> bool {
        match *self {}
    }
}

type SearchKey<F> = (Option<String>, Option<F>);

pub struct BaseSelectors<T: Entity, F = NoFilter> {
    text: fn(&T) -> &str,
    predicate: Option<fn(&T, &str) -> bool>,
    by_ids: Memo<Vec<T::Key>, Vec<T>>,
    search: Memo<SearchKey<F>, Vec<T>>,
    fuzzy: Memo<String, Vec<T>>,
}

impl<T: Entity, F: SearchFilter<T>> BaseSelectors<T, F> {
    /// `text` is the searchable name of an item; the default predicate is a
    /// case-sensitive substring match on it.
    pub fn new(text: fn(&T) -> &str) -> Self {
        Self {
            text,
            predicate: None,
            by_ids: Memo::new("get_by_ids"),
            search: Memo::new("search"),
            fuzzy: Memo::new("fuzzy_search"),
        }
    }

    pub fn with_predicate(mut self, predicate: fn(&T, &str) -> bool) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn matches_term(&self, item: &T, term: &str) -> bool {
        match self.predicate {
            Some(predicate) => predicate(item, term),
            None => (self.text)(item).contains(term),
        }
    }

    pub fn text<'a>(&self, item: &'a T) -> &'a str {
        (self.text)(item)
    }

    pub fn all<'s, S: StatusKind, X>(&self, state: &'s EntityState<T, S, X>) -> &'s [T] {
        state.items()
    }

    pub fn count<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> usize {
        state.items().len()
    }

    pub fn get_by_id<'s, S: StatusKind, X>(
        &self,
        state: &'s EntityState<T, S, X>,
        key: &T::Key,
    ) -> Option<&'s T> {
        state.find(key)
    }

    /// Items in the order of `keys`; unknown keys are skipped.
    pub fn get_by_ids<S: StatusKind, X>(&self, state: &EntityState<T, S, X>, keys: &[T::Key]) -> Arc<Vec<T>> {
        self.by_ids.get_or_compute(state.revision(), keys.to_vec(), || {
            keys.iter().filter_map(|k| state.find(k).cloned()).collect()
        })
    }

    pub fn loading<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> bool {
        state.loading()
    }

    pub fn loaded<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> bool {
        state.loaded()
    }

    pub fn saving<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> bool {
        state.saving()
    }

    pub fn saved<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> bool {
        state.saved()
    }

    pub fn errors<'s, S: StatusKind, X>(&self, state: &'s EntityState<T, S, X>) -> Option<&'s ErrorPayload> {
        state.errors()
    }

    /// Applies `filter` first, then the text predicate when `term` is
    /// non-empty. With neither, returns every item. Order follows `all`.
    pub fn search<S: StatusKind, X>(
        &self,
        state: &EntityState<T, S, X>,
        term: Option<&str>,
        filter: Option<F>,
    ) -> Arc<Vec<T>> {
        let term = term.filter(|t| !t.is_empty());
        let key = (term.map(str::to_string), filter.clone());
        self.search.get_or_compute(state.revision(), key, || {
            state
                .items()
                .iter()
                .filter(|item| filter.as_ref().map_or(true, |f| f.matches(item)))
                .filter(|item| term.map_or(true, |t| self.matches_term(item, t)))
                .cloned()
                .collect()
        })
    }

    /// Ranks items by fuzzy score on their text, best first; equal scores
    /// keep collection order. An empty term returns every item.
    pub fn fuzzy_search<S: StatusKind, X>(&self, state: &EntityState<T, S, X>, term: &str) -> Arc<Vec<T>> {
        self.fuzzy.get_or_compute(state.revision(), term.to_string(), || {
            if term.is_empty() {
                return state.items().to_vec();
            }
            let matcher = SkimMatcherV2::default();
            let mut scored: Vec<(i64, &T)> = state
                .items()
                .iter()
                .filter_map(|item| matcher.fuzzy_match((self.text)(item), term).map(|s| (s, item)))
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().map(|(_, item)| item.clone()).collect()
        })
    }

    pub fn statuses_for<'s, S: StatusKind, X>(
        &self,
        state: &'s EntityState<T, S, X>,
        key: &T::Key,
    ) -> Option<&'s StatusRecord<S>> {
        state.statuses().get(key)
    }

    pub fn status_of<S: StatusKind, X>(&self, state: &EntityState<T, S, X>, key: &T::Key, status: S) -> bool {
        state.statuses().get(key).is_some_and(|r| r.get(status))
    }

    /// Keys with any operation in flight, in collection order.
    pub fn processing<S: StatusKind, X>(&self, state: &EntityState<T, S, X>) -> Vec<T::Key> {
        state
            .items()
            .iter()
            .map(|item| item.key())
            .filter(|k| state.statuses().get(*k).is_some_and(StatusRecord::any))
            .cloned()
            .collect()
    }

    pub fn with_status<'s, S: StatusKind, X>(&self, state: &'s EntityState<T, S, X>, status: S) -> Vec<&'s T> {
        state
            .items()
            .iter()
            .filter(|item| state.statuses().get(item.key()).is_some_and(|r| r.get(status)))
            .collect()
    }

    pub fn list<'s, S: StatusKind, X>(
        &self,
        state: &'s EntityState<T, S, X>,
        call_id: &CallId,
    ) -> Option<&'s ListState<T>> {
        state.lists().get(call_id)
    }

    /// Event errors recorded against any of `keys`. With `events`, only errors
    /// whose event is listed match; a `None` entry matches errors recorded
    /// without an event.
    pub fn event_errors_for<'s, S: StatusKind, X>(
        &self,
        state: &'s EntityState<T, S, X>,
        keys: &[T::Key],
        events: Option<&[Option<&str>]>,
    ) -> Vec<&'s EventError<T::Key>> {
        state
            .event_errors()
            .iter()
            .filter(|e| e.id.as_ref().is_some_and(|id| keys.contains(id)))
            .filter(|e| events.map_or(true, |names| names.contains(&e.event.as_deref())))
            .collect()
    }

    pub fn memo_stats(&self) -> [(&'static str, crate::memo::MemoStats); 3] {
        [
            (self.by_ids.name(), self.by_ids.stats()),
            (self.search.name(), self.search.stats()),
            (self.fuzzy.name(), self.fuzzy.stats()),
        ]
    }
}

impl<T: Entity, F> Debug for BaseSelectors<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseSelectors").field("model", &T::MODEL).finish_non_exhaustive()
    }
}
