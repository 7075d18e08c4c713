//! Capabilities a backend advertises to clients.

use crate::aggregate::Aggregate;
use crate::column::ColumnType;
use crate::config::FilterOp;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a [`VirtualServerHandler`](crate::handler::VirtualServerHandler)
/// supports. The default advertises nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub group_by: bool,
    pub split_by: bool,
    pub sort: bool,
    pub expressions: bool,
    pub on_update: bool,
    /// Filter operator names per column type.
    pub filter_ops: IndexMap<ColumnType, Vec<String>>,
    /// Aggregate names per column type.
    pub aggregates: IndexMap<ColumnType, Vec<String>>,
}

impl Features {
    /// Every operation, aggregate and operator the embedded engine knows.
    pub fn all() -> Self {
        Features {
            group_by: true,
            split_by: true,
            sort: true,
            expressions: true,
            on_update: false,
            filter_ops: ColumnType::ALL
                .iter()
                .map(|t| (*t, FilterOp::for_type(*t).iter().map(|op| op.name().to_string()).collect()))
                .collect(),
            aggregates: ColumnType::ALL
                .iter()
                .map(|t| (*t, Aggregate::for_type(*t).iter().map(|a| a.name().to_string()).collect()))
                .collect(),
        }
    }

    pub fn supports_aggregate(&self, column_type: ColumnType, name: &str) -> bool {
        self.aggregates
            .get(&column_type)
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }

    pub fn supports_filter(&self, column_type: ColumnType, op: FilterOp) -> bool {
        self.filter_ops
            .get(&column_type)
            .map(|names| names.iter().any(|n| n == op.name()))
            .unwrap_or(false)
    }
}
