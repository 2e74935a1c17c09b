//! Fleet selectors: pure reads over slice state, memoized per argument and
//! invalidated by the state's revision stamp.

#![forbid(unsafe_code)]

pub mod base;
pub mod memo;

pub use base::{BaseSelectors, NoFilter, SearchFilter};
pub use memo::{Memo, MemoStats, DEFAULT_MEMO_CAP};
