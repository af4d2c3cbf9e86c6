//! Allow-list / deny-list policy for normalized series keys.

use std::collections::HashSet;

use crate::storage::model::TOTAL_CPU_KEY;

/// Decides which normalized labels are kept as series.
///
/// The deny-list is checked first and always wins. An empty allow-list
/// allows everything. `"Total CPU"` is exempt from the allow-list but not
/// from the deny-list.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    selected: HashSet<String>,
    excluded: HashSet<String>,
}

impl SelectionFilter {
    pub fn new<S, E>(selected: S, excluded: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            selected: selected.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `key` may be stored as a series.
    pub fn accepts(&self, key: &str) -> bool {
        if self.excluded.contains(key) {
            return false;
        }
        key == TOTAL_CPU_KEY || self.selected.is_empty() || self.selected.contains(key)
    }
}
