//! Decoded result rows.

use std::sync::Arc;

use crate::protocol::FieldDescription;
use crate::types::PgValue;

/// Column descriptions shared between a statement's rows without cloning.
pub type SharedColumns = Arc<Vec<FieldDescription>>;

/// One decoded row: column metadata in RowDescription order plus the
/// decoded values. Owned by the caller once returned.
///
/// Column names need not be unique; positional access always works, and
/// name access returns the first match.
#[derive(Debug, Clone)]
pub struct Row {
    columns: SharedColumns,
    values: Vec<PgValue>,
}

impl Row {
    pub(crate) fn new(columns: SharedColumns, values: Vec<PgValue>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column descriptions in wire order.
    pub fn columns(&self) -> &[FieldDescription] {
        &self.columns
    }

    /// Column names in wire order.
    pub fn keys(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Value by position.
    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    /// Value of the first column with this name.
    pub fn get_by_name(&self, name: &str) -> Option<&PgValue> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
    }

    /// Consume the row, yielding the decoded values in column order.
    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }
}
