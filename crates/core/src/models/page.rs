//! Paginated list envelope returned by the read API

use super::de::deserialize_count;
use serde::{Deserialize, Serialize};

/// `{ "results": [...], "count": N }`
///
/// `count` is the server-side total, which may exceed `results.len()` when the
/// page size is smaller than the working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}
