//! # Catalog Interface
//!
//! The catalog is an external collaborator: rules consult it through
//! [`OptContext`](crate::rule::OptContext) to test operator-specific applicability
//! (for example, whether a projection already needs every column of a table). The
//! trait is deliberately narrow and object-safe so any metadata backend can sit
//! behind `dyn Catalog`.
//!
//! [`InMemoryCatalog`] is a `HashMap`-backed implementation for tests and for the
//! HTTP service, which populates it from the request.

use crate::expr::{ColumnRef, TableRef};
use std::collections::HashMap;

pub trait Catalog: Send + Sync {
    /// Column definitions, or `None` if the table is unknown.
    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnRef>>;

    fn has_table(&self, table: &TableRef) -> bool {
        self.get_table_columns(table).is_some()
    }
}

/// In-memory catalog keyed by `schema.table`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub table_columns: HashMap<String, Vec<ColumnRef>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, columns: Vec<ColumnRef>) {
        self.table_columns.insert(table.to_string(), columns);
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnRef>> {
        self.table_columns.get(&table.to_string()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut catalog = InMemoryCatalog::new();
        let t = TableRef::new("tpch", "nation");
        catalog.add_table(&t, vec![ColumnRef::qualified("nation", "n_nationkey")]);
        assert!(catalog.has_table(&t));
        assert_eq!(catalog.get_table_columns(&t).map(|c| c.len()), Some(1));
        assert!(!catalog.has_table(&TableRef::new("tpch", "region")));
    }
}
