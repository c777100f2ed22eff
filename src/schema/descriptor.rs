//! Column metadata for a single table.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Column name to column type, in the order the database reported them.
///
/// Immutable once built; the session that fetched it owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnDef>,
}

impl SchemaDescriptor {
    /// Later duplicates of a column name are dropped.
    pub fn new<I, N, T>(columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let mut out: Vec<ColumnDef> = Vec::new();
        for (name, column_type) in columns {
            let name = name.into();
            if out.iter().any(|c| c.name == name) {
                continue;
            }
            out.push(ColumnDef {
                name,
                column_type: column_type.into(),
            });
        }
        Self { columns: out }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_type(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type.as_str())
    }

    /// Render as `{"<table>": {"row_data": {"<col>": {"type": "<type>"}}}}`,
    /// the layout the prompts are written against.
    pub fn to_prompt_json(&self, table_name: &str) -> String {
        let mut row_data = Map::new();
        for column in &self.columns {
            row_data.insert(column.name.clone(), json!({ "type": column.column_type }));
        }
        let mut doc = Map::new();
        doc.insert(table_name.to_string(), json!({ "row_data": Value::Object(row_data) }));
        let doc = Value::Object(doc);
        // Serializing a Value cannot fail.
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_order_and_drops_duplicates() {
        let schema = SchemaDescriptor::new([("id", "Int"), ("total", "Float"), ("id", "String")]);
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.columns()[0].name, "id");
        assert_eq!(schema.column_type("id"), Some("Int"));
        assert_eq!(schema.column_type("total"), Some("Float"));
        assert_eq!(schema.column_type("missing"), None);
    }

    #[test]
    fn test_prompt_json_layout() {
        let schema = SchemaDescriptor::new([("id", "Int")]);
        let rendered = schema.to_prompt_json("orders");
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["orders"]["row_data"]["id"]["type"], "Int");
    }

    #[test]
    fn test_prompt_json_keeps_column_order() {
        let schema = SchemaDescriptor::new([("zeta", "Int"), ("alpha", "Float"), ("mid", "String")]);
        let rendered = schema.to_prompt_json("orders");
        let zeta = rendered.find("\"zeta\"").unwrap();
        let alpha = rendered.find("\"alpha\"").unwrap();
        let mid = rendered.find("\"mid\"").unwrap();
        assert!(zeta < alpha && alpha < mid, "{}", rendered);
    }
}
