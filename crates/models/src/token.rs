//! API tokens: plain CRUD with the common reducers.

use fleet_core::Entity;
use fleet_select::BaseSelectors;
use fleet_store::{NoStatus, Slice};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenConsumer {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: u32,
    #[serde(rename = "key", default)]
    pub token_key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub consumer: TokenConsumer,
}

impl Entity for Token {
    type Key = u32;
    const MODEL: &'static str = "token";
    const PK: &'static str = "id";

    fn key(&self) -> &u32 {
        &self.id
    }
}

pub struct TokenSlice;

impl Slice for TokenSlice {
    type Item = Token;
    type Status = NoStatus;
    type Extra = ();
    type Custom = ();
}

pub static SELECTORS: Lazy<BaseSelectors<Token>> = Lazy::new(|| BaseSelectors::new(|t| t.consumer.name.as_str()));
