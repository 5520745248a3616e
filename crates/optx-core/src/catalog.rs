//! # Catalog Interface
//!
//! The catalog provides base-table statistics to the `TableScan` derivation rule:
//! a row count and per-column statistics keyed by column name. A scan renames
//! the columns it reads to its own output symbols.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is minimal and lives behind a trait object (`dyn Catalog`)
//! so that different metadata backends can plug in. The `InMemoryCatalog` is a
//! HashMap-based implementation populated programmatically; the HTTP service
//! builds one per request from the table statistics in the request body.
//!
//! A table the catalog does not know is not an error: the scan's statistics are
//! simply unknown.

use crate::estimate::Estimate;
use crate::expr::TableRef;
use crate::stats::SymbolStatsEstimate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics of a base table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatistics {
    pub row_count: Estimate,
    /// Per-column statistics keyed by column name.
    #[serde(default)]
    pub columns: HashMap<String, SymbolStatsEstimate>,
}

impl TableStatistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count: Estimate::of(row_count),
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>, stats: SymbolStatsEstimate) -> Self {
        self.columns.insert(column.into(), stats);
        self
    }

    /// Statistics of `column`, unknown when the column is not tracked.
    pub fn column(&self, column: &str) -> SymbolStatsEstimate {
        self.columns.get(column).cloned().unwrap_or_default()
    }
}

/// Catalog provides table statistics.
pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<TableStatistics>;
}

/// In-memory catalog for testing and for the HTTP service.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    /// Table-level statistics keyed by "schema.table".
    pub table_stats: HashMap<String, TableStatistics>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, stats: TableStatistics) {
        self.table_stats.insert(table.to_string(), stats);
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<TableStatistics> {
        self.table_stats.get(&table.to_string()).cloned()
    }
}
