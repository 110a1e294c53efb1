//! Enumeration axes and the configuration triple they produce.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named compound filter, e.g. `q=(And.Hidden.N._.CarType.N.)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterExpression {
    /// Short name used in configuration labels
    pub name: String,

    /// Query parameter sent upstream verbatim
    pub expression: String,
}

impl FilterExpression {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// One independent pagination stream: (filter, sort order, page size).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub filter: FilterExpression,
    pub sort_order: String,
    pub page_size: usize,
}

impl Configuration {
    pub fn new(filter: FilterExpression, sort_order: impl Into<String>, page_size: usize) -> Self {
        Self {
            filter,
            sort_order: sort_order.into(),
            page_size,
        }
    }

    /// Label used in logs and crawl statistics.
    pub fn label(&self) -> String {
        format!("{}_{}_{}", self.filter.name, self.sort_order, self.page_size)
    }

    /// Range selector for one page: `sr=|<sort>|<offset>|<limit>`.
    pub fn range_selector(&self, page: usize) -> String {
        format!(
            "sr=|{}|{}|{}",
            self.sort_order,
            page * self.page_size,
            self.page_size
        )
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
