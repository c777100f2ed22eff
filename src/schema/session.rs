use crate::error::{NlqError, Result};
use crate::schema::SchemaDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A table together with the schema fetched for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSelection {
    pub table: String,
    pub schema: SchemaDescriptor,
    pub selected_at: DateTime<Utc>,
}

impl TableSelection {
    pub fn new(table: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            table: table.into(),
            schema,
            selected_at: Utc::now(),
        }
    }
}

/// Per-user session state.
///
/// The table and its schema live in one `Option`, so a session either has
/// both or neither.
#[derive(Debug, Clone, Default)]
pub struct Session {
    selection: Option<TableSelection>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(selection: TableSelection) -> Self {
        Self {
            selection: Some(selection),
        }
    }

    pub fn selection(&self) -> Option<&TableSelection> {
        self.selection.as_ref()
    }

    /// The current selection, or `NoTableSelected`.
    pub fn require_selection(&self) -> Result<&TableSelection> {
        self.selection.as_ref().ok_or(NlqError::NoTableSelected)
    }

    pub fn selected_table(&self) -> Option<&str> {
        self.selection.as_ref().map(|s| s.table.as_str())
    }

    pub fn schema(&self) -> Option<&SchemaDescriptor> {
        self.selection.as_ref().map(|s| &s.schema)
    }

    pub fn is_ready(&self) -> bool {
        self.selection.is_some()
    }

    pub(crate) fn replace_selection(&mut self, selection: TableSelection) -> &TableSelection {
        self.selection.insert(selection)
    }
}
