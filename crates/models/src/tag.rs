//! Tags: manual tags carry no definition; automatic tags are applied by the
//! server from an XPath definition.

use std::fmt;
use std::str::FromStr;

use fleet_core::Entity;
use fleet_select::{BaseSelectors, SearchFilter};
use fleet_store::{NoStatus, Slice, State};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub kernel_opts: Option<String>,
    #[serde(default)]
    pub machine_count: u32,
}

impl Tag {
    pub fn is_manual(&self) -> bool {
        self.definition.as_deref().map_or(true, str::is_empty)
    }
}

impl Entity for Tag {
    type Key = u32;
    const MODEL: &'static str = "tag";
    const PK: &'static str = "id";

    fn key(&self) -> &u32 {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagSearchFilter {
    #[default]
    All,
    Manual,
    Auto,
}

impl SearchFilter<Tag> for TagSearchFilter {
    fn matches(&self, item: &Tag) -> bool {
        match self {
            TagSearchFilter::All => true,
            TagSearchFilter::Manual => item.is_manual(),
            TagSearchFilter::Auto => !item.is_manual(),
        }
    }
}

impl FromStr for TagSearchFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TagSearchFilter::All),
            "manual" => Ok(TagSearchFilter::Manual),
            "auto" | "automatic" => Ok(TagSearchFilter::Auto),
            other => Err(format!("unknown tag filter '{other}' (expected all, manual or auto)")),
        }
    }
}

impl fmt::Display for TagSearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TagSearchFilter::All => "all",
            TagSearchFilter::Manual => "manual",
            TagSearchFilter::Auto => "auto",
        })
    }
}

pub struct TagSlice;

impl Slice for TagSlice {
    type Item = Tag;
    type Status = NoStatus;
    type Extra = ();
    type Custom = ();
}

pub static SELECTORS: Lazy<BaseSelectors<Tag, TagSearchFilter>> = Lazy::new(|| BaseSelectors::new(|t| t.name.as_str()));

pub fn manual(state: &State<TagSlice>) -> Vec<&Tag> {
    state.items().iter().filter(|t| t.is_manual()).collect()
}

pub fn automatic(state: &State<TagSlice>) -> Vec<&Tag> {
    state.items().iter().filter(|t| !t.is_manual()).collect()
}
