use log::warn;
use serde_json::Value;

use crate::error::DataQuestionError;

/// The query a user runs against their own database to export the schema in
/// the shape the paste flow expects.
pub const SCHEMA_EXTRACTION_QUERY: &str = "SELECT
    jsonb_agg(
        jsonb_build_object(
            'table_name', table_name,
            'column_name', column_name,
            'data_type', data_type,
            'is_nullable', is_nullable
        )
    ) AS schema_info
FROM
    information_schema.columns
WHERE
    table_schema = 'public';
";

// The shape produced by the information_schema.columns export the user pastes in.
pub const REQUIRED_ROW_FIELDS: [&str; 4] =
    ["table_name", "column_name", "data_type", "is_nullable"];

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    // "YES"/"NO" text, verbatim from information_schema
    pub is_nullable: String,
}

/// Parse user-pasted schema JSON into rows. Callers match on the result rather
/// than catching anything.
pub fn parse_schema_rows(raw: &str) -> Result<Vec<SchemaRow>, DataQuestionError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| DataQuestionError::MalformedInput("Invalid JSON".into()))?;
    rows_from_value(&value)
}

/// Shape-check an already-parsed JSON value. Shared by the paste flow and the
/// settings store write validation.
pub fn rows_from_value(value: &Value) -> Result<Vec<SchemaRow>, DataQuestionError> {
    let arr = value
        .as_array()
        .ok_or_else(|| DataQuestionError::MalformedInput("JSON must be an array".into()))?;

    let mut rows = Vec::with_capacity(arr.len());
    for entry in arr {
        let obj = entry.as_object().ok_or_else(|| {
            DataQuestionError::MalformedInput("JSON array entries must be objects".into())
        })?;
        for field in REQUIRED_ROW_FIELDS {
            if !obj.get(field).map_or(false, |v| v.is_string()) {
                return Err(DataQuestionError::MalformedInput(format!(
                    "JSON objects must have string keys: table_name, column_name, data_type, is_nullable (bad or missing: {})",
                    field
                )));
            }
        }
        rows.push(SchemaRow {
            table_name: obj["table_name"].as_str().unwrap_or_default().to_string(),
            column_name: obj["column_name"].as_str().unwrap_or_default().to_string(),
            data_type: obj["data_type"].as_str().unwrap_or_default().to_string(),
            is_nullable: obj["is_nullable"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

/// Schema-as-text: one pseudo-DDL string per table, derived on demand and never
/// persisted. Tables keep first-appearance order so prompts are stable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaText {
    tables: Vec<(String, String)>,
}

impl SchemaText {
    pub fn from_rows(rows: &[SchemaRow]) -> SchemaText {
        let mut tables: Vec<(String, String)> = Vec::new();
        for row in rows {
            let idx = match tables.iter().position(|(name, _)| name == &row.table_name) {
                Some(idx) => idx,
                None => {
                    tables.push((
                        row.table_name.clone(),
                        format!("CREATE TABLE {} (\n", row.table_name),
                    ));
                    tables.len() - 1
                }
            };
            let nullable = if row.is_nullable == "YES" {
                " NULL"
            } else {
                " NOT NULL"
            };
            tables[idx]
                .1
                .push_str(&format!("{} {}{},\n", row.column_name, row.data_type, nullable));
        }
        for (_, ddl) in tables.iter_mut() {
            ddl.push_str(");\n");
        }
        SchemaText { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.tables.iter().map(|(_, ddl)| ddl.clone()).collect()
    }

    pub fn get(&self, table: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, ddl)| ddl.as_str())
    }

    /// Keep only the named tables, in schema order. Names the model invented are
    /// dropped; we log them so the mismatch is at least observable.
    pub fn filter(&self, selected: &[String]) -> SchemaText {
        for name in selected {
            if self.get(name).is_none() {
                warn!("model selected unknown table '{}', dropping it", name);
            }
        }
        SchemaText {
            tables: self
                .tables
                .iter()
                .filter(|(name, _)| selected.iter().any(|s| s == name))
                .cloned()
                .collect(),
        }
    }
}

/// Parse the model's comma-separated table list: trim, drop empties, "none"
/// means no relevant tables.
pub fn parse_table_list(output: &str) -> Vec<String> {
    if output.trim().eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    output
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, column: &str, data_type: &str, nullable: &str) -> SchemaRow {
        SchemaRow {
            table_name: table.into(),
            column_name: column.into(),
            data_type: data_type.into(),
            is_nullable: nullable.into(),
        }
    }

    #[test]
    fn renders_one_create_table_per_table() {
        let rows = vec![row("users", "id", "int", "NO")];
        let schema = SchemaText::from_rows(&rows);
        assert_eq!(
            schema.get("users"),
            Some("CREATE TABLE users (\nid int NOT NULL,\n);\n")
        );
    }

    #[test]
    fn groups_rows_in_first_appearance_order() {
        let rows = vec![
            row("users", "id", "int", "NO"),
            row("orders", "id", "int", "NO"),
            row("users", "email", "text", "YES"),
        ];
        let schema = SchemaText::from_rows(&rows);
        assert_eq!(schema.table_names(), vec!["users", "orders"]);
        assert_eq!(
            schema.get("users"),
            Some("CREATE TABLE users (\nid int NOT NULL,\nemail text NULL,\n);\n")
        );
    }

    #[test]
    fn filter_keeps_exactly_the_selected_tables() {
        let rows = vec![row("users", "id", "int", "NO")];
        let schema = SchemaText::from_rows(&rows);
        let filtered = schema.filter(&["users".to_string()]);
        assert_eq!(filtered.table_names(), vec!["users"]);
    }

    #[test]
    fn filter_drops_tables_the_model_invented() {
        let rows = vec![
            row("users", "id", "int", "NO"),
            row("orders", "id", "int", "NO"),
        ];
        let schema = SchemaText::from_rows(&rows);
        let selected = parse_table_list("users, orders, ghost_table");
        let filtered = schema.filter(&selected);
        assert_eq!(filtered.table_names(), vec!["users", "orders"]);
    }

    #[test]
    fn table_list_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_table_list(" users , orders ,, "),
            vec!["users", "orders"]
        );
        assert!(parse_table_list("none").is_empty());
        assert!(parse_table_list(" None ").is_empty());
    }

    #[test]
    fn rejects_rows_missing_a_required_field() {
        let raw = r#"[{"table_name": "users", "column_name": "id", "data_type": "int"}]"#;
        match parse_schema_rows(raw) {
            Err(DataQuestionError::MalformedInput(msg)) => {
                assert!(msg.contains("is_nullable"))
            }
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_array_json() {
        assert!(matches!(
            parse_schema_rows(r#"{"table_name": "users"}"#),
            Err(DataQuestionError::MalformedInput(_))
        ));
        assert!(matches!(
            parse_schema_rows("not json"),
            Err(DataQuestionError::MalformedInput(_))
        ));
    }

    #[test]
    fn parses_well_formed_rows() {
        let raw = r#"[
            {"table_name": "users", "column_name": "id", "data_type": "int", "is_nullable": "NO"},
            {"table_name": "users", "column_name": "emailVerified", "data_type": "boolean", "is_nullable": "YES"}
        ]"#;
        let rows = parse_schema_rows(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].column_name, "emailVerified");
    }
}
