//! Table implementation.
//!
//! A Table is a named collection of typed columns with a schema and an
//! identity policy: either an explicit index column whose values are unique,
//! or an implicit, monotonically increasing row id.
//!
//! # Examples
//!
//! ```
//! use pivotview::{ColumnType, ColumnValue, Schema, Table, TableOptions};
//! use std::collections::HashMap;
//!
//! let schema = Schema::new(vec![
//!     ("id".to_string(), ColumnType::Integer),
//!     ("name".to_string(), ColumnType::String),
//! ])
//! .unwrap();
//!
//! let options = TableOptions { index: Some("id".to_string()) };
//! let mut table = Table::new("users".to_string(), schema, options).unwrap();
//!
//! let mut row = HashMap::new();
//! row.insert("id".to_string(), ColumnValue::Integer(1));
//! row.insert("name".to_string(), ColumnValue::String("Alice".to_string()));
//! table.update(vec![row]).unwrap();
//!
//! assert_eq!(table.len(), 1);
//! assert_eq!(table.get_value(0, "name").and_then(|v| v.as_str()), Some("Alice"));
//! ```

use crate::column::{parse_date, parse_datetime, Column, ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A single row keyed by column name. Columns missing from an update row
/// are left untouched.
pub type Row = HashMap<String, ColumnValue>;

/// Ordered column name to type mapping.
///
/// ```
/// use pivotview::{ColumnType, Schema};
///
/// let schema = Schema::new(vec![
///     ("Region".to_string(), ColumnType::String),
///     ("Sales".to_string(), ColumnType::Float),
/// ])
/// .unwrap();
///
/// assert_eq!(schema.len(), 2);
/// assert_eq!(schema.column_index("Sales"), Some(1));
/// assert!(Schema::new(vec![
///     ("a".to_string(), ColumnType::Integer),
///     ("a".to_string(), ColumnType::Float),
/// ])
/// .is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Creates a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Self> {
        for (i, (name, _)) in columns.iter().enumerate() {
            if columns[..i].iter().any(|(other, _)| other == name) {
                return Err(EngineError::SchemaMismatch(format!(
                    "Duplicate column name '{}'",
                    name
                )));
            }
        }
        Ok(Schema { columns })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, t)| (name.as_str(), *t))
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, column_type) in &self.columns {
            map.serialize_entry(name, column_type)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = IndexMap::<String, ColumnType>::deserialize(deserializer)?;
        Ok(Schema {
            columns: map.into_iter().collect(),
        })
    }
}

/// Construction options for a [`Table`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Column whose values identify rows. Updates with a matching value
    /// overwrite the existing row instead of appending.
    #[serde(default)]
    pub index: Option<String>,
}

/// Raw data accepted when creating or updating a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableData {
    /// An empty table with an explicit schema.
    Schema(Schema),
    /// JSON records (`[{"a": 1}, ..]`) or columns (`{"a": [1, ..]}`).
    Json(String),
    /// CSV text with a header row.
    Csv(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    Records(Vec<IndexMap<String, JsonValue>>),
    Columns(IndexMap<String, Vec<JsonValue>>),
}

impl JsonInput {
    fn parse(json: &str) -> Result<JsonInput> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::SchemaMismatch(format!("JSON parse error: {}", e)))
    }

    /// Column names in first-seen order with every non-missing value.
    fn columns(&self) -> IndexMap<&str, Vec<&JsonValue>> {
        let mut columns: IndexMap<&str, Vec<&JsonValue>> = IndexMap::new();
        match self {
            JsonInput::Columns(input) => {
                for (name, values) in input {
                    columns.insert(name.as_str(), values.iter().collect());
                }
            }
            JsonInput::Records(records) => {
                for record in records {
                    for (name, value) in record {
                        columns.entry(name.as_str()).or_default().push(value);
                    }
                }
            }
        }
        columns
    }

    fn infer_schema(&self) -> Result<Schema> {
        Schema::new(
            self.columns()
                .into_iter()
                .map(|(name, values)| Ok((name.to_string(), infer_json_type(name, &values)?)))
                .collect::<Result<Vec<_>>>()?,
        )
    }
}

/// Columnar row store.
pub struct Table {
    name: String,
    schema: Schema,
    columns: Vec<Column>,
    index: Option<usize>,
    key_to_row: HashMap<ColumnValue, usize>,
    row_ids: Vec<i64>,
    next_row_id: i64,
    generation: u64,
}

impl Table {
    pub fn new(name: String, schema: Schema, options: TableOptions) -> Result<Self> {
        let index = match &options.index {
            Some(column) => Some(schema.column_index(column).ok_or_else(|| {
                EngineError::SchemaMismatch(format!("Index column '{}' is not in the schema", column))
            })?),
            None => None,
        };

        let columns = schema
            .iter()
            .map(|(name, column_type)| Column::new(name.to_string(), column_type))
            .collect();

        Ok(Table {
            name,
            schema,
            columns,
            index,
            key_to_row: HashMap::new(),
            row_ids: Vec::new(),
            next_row_id: 0,
            generation: 0,
        })
    }

    /// Creates a table from raw data, inferring the schema unless one is
    /// given explicitly.
    pub fn from_data(name: String, data: &TableData, options: TableOptions) -> Result<Self> {
        match data {
            TableData::Schema(schema) => Table::new(name, schema.clone(), options),
            TableData::Json(json) => {
                let input = JsonInput::parse(json)?;
                let schema = input.infer_schema()?;
                let mut table = Table::new(name, schema, options)?;
                let rows = table.rows_from_json(input)?;
                table.update(rows)?;
                Ok(table)
            }
            TableData::Csv(csv) => {
                let (header, records) = split_csv(csv)?;
                let types: Vec<ColumnType> = (0..header.len())
                    .map(|i| infer_csv_type(records.iter().map(|r| r.get(i).map(String::as_str))))
                    .collect();
                let schema = Schema::new(header.iter().cloned().zip(types).collect())?;
                let mut table = Table::new(name, schema, options)?;
                let rows = table.rows_from_csv(&header, &records)?;
                table.update(rows)?;
                Ok(table)
            }
        }
    }

    /// Create a table from a JSON string with an inferred schema.
    ///
    /// ```
    /// use pivotview::Table;
    ///
    /// let json = r#"[{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}]"#;
    /// let table = Table::from_json("users", json).unwrap();
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.schema().column_names(), vec!["id", "name"]);
    /// ```
    pub fn from_json(name: &str, json: &str) -> Result<Self> {
        Table::from_data(name.to_string(), &TableData::Json(json.to_string()), TableOptions::default())
    }

    /// Create a table from CSV text with a header row.
    pub fn from_csv(name: &str, csv: &str) -> Result<Self> {
        Table::from_data(name.to_string(), &TableData::Csv(csv.to_string()), TableOptions::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index_column(&self) -> Option<&str> {
        self.index.map(|i| self.columns[i].name())
    }

    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Incremented by every successful mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.column_index(name).map(|i| &self.columns[i])
    }

    pub(crate) fn column_at(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn get_value(&self, row: usize, column: &str) -> Option<&ColumnValue> {
        self.column(column).and_then(|c| c.get(row))
    }

    pub fn get_row(&self, row: usize) -> Option<Row> {
        if row >= self.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name().to_string(), c.get(row).cloned().unwrap_or(ColumnValue::Null)))
                .collect(),
        )
    }

    /// Stable identity of a row: its index value, or its implicit row id.
    pub fn row_key(&self, row: usize) -> ColumnValue {
        match self.index {
            Some(i) => self.columns[i].get(row).cloned().unwrap_or(ColumnValue::Null),
            None => self
                .row_ids
                .get(row)
                .map(|id| ColumnValue::Integer(*id))
                .unwrap_or(ColumnValue::Null),
        }
    }

    /// Upserts rows. The whole batch is validated before any row is applied.
    pub fn update(&mut self, rows: Vec<Row>) -> Result<()> {
        let mut validated = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells: Vec<Option<ColumnValue>> = vec![None; self.columns.len()];
            for (name, value) in row {
                let idx = self.schema.column_index(&name).ok_or_else(|| {
                    EngineError::SchemaMismatch(format!(
                        "Unknown column '{}' for table '{}'",
                        name, self.name
                    ))
                })?;
                cells[idx] = Some(self.columns[idx].validate_value(value)?);
            }
            if let Some(index) = self.index {
                if matches!(cells[index], None | Some(ColumnValue::Null)) {
                    return Err(EngineError::SchemaMismatch(format!(
                        "Row is missing a value for index column '{}'",
                        self.columns[index].name()
                    )));
                }
            }
            validated.push(cells);
        }

        if validated.is_empty() {
            return Ok(());
        }
        for cells in validated {
            self.apply_row(cells)?;
        }
        self.generation += 1;
        Ok(())
    }

    fn apply_row(&mut self, cells: Vec<Option<ColumnValue>>) -> Result<()> {
        let key = self.index.and_then(|i| cells[i].clone());
        let existing = key.as_ref().and_then(|k| self.key_to_row.get(k).copied());

        match existing {
            Some(row) => {
                for (column, cell) in self.columns.iter_mut().zip(cells) {
                    if let Some(value) = cell {
                        column.set(row, value)?;
                    }
                }
            }
            None => {
                let row = self.len();
                for (column, cell) in self.columns.iter_mut().zip(cells) {
                    column.push(cell.unwrap_or(ColumnValue::Null))?;
                }
                if let Some(key) = key {
                    self.key_to_row.insert(key, row);
                }
                self.row_ids.push(self.next_row_id);
                self.next_row_id += 1;
            }
        }
        Ok(())
    }

    /// Upserts raw data against the existing schema.
    pub fn update_data(&mut self, data: &TableData) -> Result<()> {
        let rows = match data {
            TableData::Schema(_) => {
                return Err(EngineError::SchemaMismatch(
                    "Cannot update a table with a schema".to_string(),
                ))
            }
            TableData::Json(json) => self.rows_from_json(JsonInput::parse(json)?)?,
            TableData::Csv(csv) => {
                let (header, records) = split_csv(csv)?;
                self.rows_from_csv(&header, &records)?
            }
        };
        self.update(rows)
    }

    /// Removes rows by index value (or implicit row id for tables without
    /// an index). Unmatched keys are ignored. Returns the number removed.
    pub fn remove(&mut self, keys: &[ColumnValue]) -> Result<usize> {
        let mut keep = vec![true; self.len()];
        let mut removed = 0;

        for key in keys {
            let row = match self.index {
                Some(i) => match self.columns[i]
                    .validate_value(key.clone())
                    .or_else(|_| ColumnValue::from_json(&key.to_json(), self.columns[i].column_type()))
                {
                    Ok(key) => self.key_to_row.get(&key).copied(),
                    Err(_) => None,
                },
                None => key
                    .as_i64()
                    .and_then(|id| self.row_ids.binary_search(&id).ok()),
            };
            if let Some(row) = row {
                if keep[row] {
                    keep[row] = false;
                    removed += 1;
                }
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        for column in &mut self.columns {
            column.retain_rows(&keep);
        }
        let mut flags = keep.iter();
        self.row_ids.retain(|_| flags.next().copied().unwrap_or(true));

        if let Some(i) = self.index {
            self.key_to_row = self.columns[i]
                .iter()
                .enumerate()
                .map(|(row, key)| (key.clone(), row))
                .collect();
        }
        self.generation += 1;
        Ok(removed)
    }

    fn json_column_type(&self, name: &str) -> Result<ColumnType> {
        self.schema.column_type(name).ok_or_else(|| {
            EngineError::SchemaMismatch(format!("Unknown column '{}' for table '{}'", name, self.name))
        })
    }

    /// Records keep only the keys they carry, so partial records leave
    /// other cells of an existing row untouched.
    fn rows_from_json(&self, input: JsonInput) -> Result<Vec<Row>> {
        match input {
            JsonInput::Records(records) => records
                .into_iter()
                .map(|record| {
                    record
                        .into_iter()
                        .map(|(name, value)| {
                            let column_type = self.json_column_type(&name)?;
                            Ok((name, ColumnValue::from_json(&value, column_type)?))
                        })
                        .collect::<Result<Row>>()
                })
                .collect(),
            JsonInput::Columns(columns) => {
                let num_rows = columns.values().map(Vec::len).max().unwrap_or(0);
                let mut rows: Vec<Row> = vec![Row::new(); num_rows];
                for (name, values) in columns {
                    let column_type = self.json_column_type(&name)?;
                    for (row, value) in rows.iter_mut().zip(values.iter()) {
                        row.insert(name.clone(), ColumnValue::from_json(value, column_type)?);
                    }
                }
                Ok(rows)
            }
        }
    }

    fn rows_from_csv(&self, header: &[String], records: &[Vec<String>]) -> Result<Vec<Row>> {
        let types = header
            .iter()
            .map(|name| {
                self.schema.column_type(name).ok_or_else(|| {
                    EngineError::SchemaMismatch(format!("Unknown column '{}' for table '{}'", name, self.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        records
            .iter()
            .map(|record| {
                header
                    .iter()
                    .zip(&types)
                    .enumerate()
                    .map(|(i, (name, column_type))| {
                        let raw = record.get(i).map(String::as_str).unwrap_or("");
                        Ok((name.clone(), parse_csv_value(raw, *column_type)?))
                    })
                    .collect::<Result<Row>>()
            })
            .collect()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("index", &self.index_column())
            .field("rows", &self.len())
            .finish()
    }
}

// ============================================================================
// Helper functions for ingest
// ============================================================================

fn looks_like_datetime(s: &str) -> bool {
    (s.contains('T') || (s.contains(' ') && s.contains(':'))) && parse_datetime(s).is_some()
}

fn looks_like_date(s: &str) -> bool {
    s.len() == 10 && s.chars().nth(4) == Some('-') && parse_date(s).is_some()
}

/// Infer a column type from every value of a JSON column.
fn infer_json_type(name: &str, values: &[&JsonValue]) -> Result<ColumnType> {
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let this = match value {
            JsonValue::Null => continue,
            JsonValue::Number(n) if n.is_i64() => ColumnType::Integer,
            JsonValue::Number(_) => ColumnType::Float,
            JsonValue::Bool(_) => ColumnType::Boolean,
            JsonValue::String(s) if looks_like_date(s) => ColumnType::Date,
            JsonValue::String(s) if looks_like_datetime(s) => ColumnType::Datetime,
            JsonValue::String(_) => ColumnType::String,
            _ => {
                return Err(EngineError::SchemaMismatch(format!(
                    "Unsupported JSON value type for column '{}'",
                    name
                )))
            }
        };
        inferred = Some(match (inferred, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Integer), ColumnType::Float) | (Some(ColumnType::Float), ColumnType::Integer) => {
                ColumnType::Float
            }
            (Some(ColumnType::Date), ColumnType::Datetime) | (Some(ColumnType::Datetime), ColumnType::Date) => {
                ColumnType::Datetime
            }
            (Some(ColumnType::String), t) | (Some(t), ColumnType::String)
                if t.is_temporal() =>
            {
                ColumnType::String
            }
            (Some(a), b) => {
                return Err(EngineError::SchemaMismatch(format!(
                    "Mixed types in column '{}': {} and {}",
                    name, a, b
                )))
            }
        });
    }
    Ok(inferred.unwrap_or(ColumnType::String))
}

/// Parse CSV text into a header and records, handling quoted fields with
/// embedded newlines and doubled quotes.
fn split_csv(csv: &str) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut rows = Vec::new();
    let mut current_row = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = csv.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current_field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => current_row.push(std::mem::take(&mut current_field)),
            '\n' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                if !(current_row.len() == 1 && current_row[0].is_empty()) {
                    rows.push(std::mem::take(&mut current_row));
                } else {
                    current_row.clear();
                }
            }
            '\r' if !in_quotes => {}
            _ => current_field.push(c),
        }
    }

    if !current_field.is_empty() || !current_row.is_empty() {
        current_row.push(current_field);
        rows.push(current_row);
    }

    let mut rows = rows.into_iter();
    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| EngineError::SchemaMismatch("CSV input has no header row".to_string()))?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    Ok((header, rows.collect()))
}

fn infer_csv_value_type(value: &str) -> Option<ColumnType> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        Some(ColumnType::Boolean)
    } else if looks_like_datetime(trimmed) {
        Some(ColumnType::Datetime)
    } else if looks_like_date(trimmed) {
        Some(ColumnType::Date)
    } else if trimmed.parse::<i64>().is_ok() {
        Some(ColumnType::Integer)
    } else if trimmed.parse::<f64>().is_ok() {
        Some(ColumnType::Float)
    } else {
        Some(ColumnType::String)
    }
}

/// Unify the types of every value in a CSV column. Conflicts fall back to
/// string, which accepts any text.
fn infer_csv_type<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for value in values.flatten() {
        let Some(this) = infer_csv_value_type(value) else {
            continue;
        };
        inferred = Some(match (inferred, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Integer), ColumnType::Float) | (Some(ColumnType::Float), ColumnType::Integer) => {
                ColumnType::Float
            }
            (Some(ColumnType::Date), ColumnType::Datetime) | (Some(ColumnType::Datetime), ColumnType::Date) => {
                ColumnType::Datetime
            }
            _ => ColumnType::String,
        });
    }
    inferred.unwrap_or(ColumnType::String)
}

/// Parse a CSV value into a ColumnValue of the expected type. Empty fields
/// are null for every type except string.
fn parse_csv_value(value: &str, column_type: ColumnType) -> Result<ColumnValue> {
    let trimmed = value.trim();
    if trimmed.is_empty() && column_type != ColumnType::String {
        return Ok(ColumnValue::Null);
    }

    let mismatch = || EngineError::SchemaMismatch(format!("Cannot parse '{}' as {}", trimmed, column_type));
    match column_type {
        ColumnType::Integer => trimmed.parse().map(ColumnValue::Integer).map_err(|_| mismatch()),
        ColumnType::Float => trimmed.parse().map(ColumnValue::Float).map_err(|_| mismatch()),
        ColumnType::Boolean => {
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(ColumnValue::Boolean(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(ColumnValue::Boolean(false))
            } else {
                Err(mismatch())
            }
        }
        ColumnType::String => Ok(ColumnValue::String(value.to_string())),
        ColumnType::Date => parse_date(trimmed).map(ColumnValue::Date).ok_or_else(mismatch),
        ColumnType::Datetime => parse_datetime(trimmed).map(ColumnValue::Datetime).ok_or_else(mismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales_table(index: Option<&str>) -> Table {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::Integer),
            ("Region".to_string(), ColumnType::String),
            ("Sales".to_string(), ColumnType::Float),
        ])
        .unwrap();
        let options = TableOptions {
            index: index.map(str::to_string),
        };
        Table::new("sales".to_string(), schema, options).unwrap()
    }

    fn row(id: i64, region: &str, sales: f64) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), ColumnValue::Integer(id));
        row.insert("Region".to_string(), ColumnValue::String(region.to_string()));
        row.insert("Sales".to_string(), ColumnValue::Float(sales));
        row
    }

    #[test]
    fn test_table_append() {
        let mut table = sales_table(None);
        table
            .update(vec![row(1, "West", 10.0), row(2, "East", 5.0)])
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get_value(1, "Region").and_then(|v| v.as_str()), Some("East"));
        assert_eq!(table.row_key(0), ColumnValue::Integer(0));
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn test_indexed_upsert_is_cell_by_cell() {
        let mut table = sales_table(Some("id"));
        table.update(vec![row(1, "West", 10.0)]).unwrap();

        let mut partial = Row::new();
        partial.insert("id".to_string(), ColumnValue::Integer(1));
        partial.insert("Sales".to_string(), ColumnValue::Float(42.0));
        table.update(vec![partial]).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get_value(0, "Sales"), Some(&ColumnValue::Float(42.0)));
        assert_eq!(table.get_value(0, "Region").and_then(|v| v.as_str()), Some("West"));
    }

    #[test]
    fn test_new_indexed_row_nulls_missing_columns() {
        let mut table = sales_table(Some("id"));
        let mut partial = Row::new();
        partial.insert("id".to_string(), ColumnValue::Integer(7));
        table.update(vec![partial]).unwrap();
        assert!(table.get_value(0, "Sales").unwrap().is_null());
    }

    #[test]
    fn test_update_rejects_unknown_column_atomically() {
        let mut table = sales_table(None);
        let mut bad = Row::new();
        bad.insert("Profit".to_string(), ColumnValue::Float(1.0));

        let err = table.update(vec![row(1, "West", 10.0), bad]).unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch(_)));
        assert_eq!(table.len(), 0);
        assert_eq!(table.generation(), 0);
    }

    #[test]
    fn test_update_rejects_type_violation() {
        let mut table = sales_table(None);
        let mut bad = Row::new();
        bad.insert("Sales".to_string(), ColumnValue::String("ten".to_string()));
        assert!(matches!(table.update(vec![bad]), Err(EngineError::SchemaMismatch(_))));
    }

    #[test]
    fn test_index_requires_value() {
        let mut table = sales_table(Some("id"));
        let mut missing = Row::new();
        missing.insert("Sales".to_string(), ColumnValue::Float(1.0));
        assert!(table.update(vec![missing]).is_err());
    }

    #[test]
    fn test_remove_by_index() {
        let mut table = sales_table(Some("id"));
        table
            .update(vec![row(1, "West", 10.0), row(2, "East", 5.0), row(3, "West", 20.0)])
            .unwrap();

        let removed = table
            .remove(&[ColumnValue::Integer(2), ColumnValue::Integer(99)])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_value(1, "Sales"), Some(&ColumnValue::Float(20.0)));

        // The key map is rebuilt, so upserts still find the moved row.
        table.update(vec![row(3, "North", 1.0)]).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_value(1, "Region").and_then(|v| v.as_str()), Some("North"));
    }

    #[test]
    fn test_remove_by_row_id() {
        let mut table = sales_table(None);
        table
            .update(vec![row(1, "West", 10.0), row(2, "East", 5.0)])
            .unwrap();
        assert_eq!(table.remove(&[ColumnValue::Integer(0)]).unwrap(), 1);
        assert_eq!(table.row_key(0), ColumnValue::Integer(1));
        assert_eq!(table.remove(&[ColumnValue::Integer(0)]).unwrap(), 0);
    }

    #[test]
    fn test_from_json_records_infers_schema() {
        let json = r#"[
            {"Region": "West", "Sales": 10, "When": "2024-01-02", "Open": true},
            {"Region": "East", "Sales": 5.5, "When": null, "Open": false}
        ]"#;
        let table = Table::from_json("t", json).unwrap();
        let types: Vec<(&str, ColumnType)> = table.schema().iter().collect();
        assert_eq!(
            types,
            vec![
                ("Region", ColumnType::String),
                ("Sales", ColumnType::Float),
                ("When", ColumnType::Date),
                ("Open", ColumnType::Boolean),
            ]
        );
        assert_eq!(table.get_value(0, "Sales"), Some(&ColumnValue::Float(10.0)));
        assert!(table.get_value(1, "When").unwrap().is_null());
    }

    #[test]
    fn test_from_json_columns() {
        let json = r#"{"x": [1, 2, 3], "y": ["a", "b", "c"]}"#;
        let table = Table::from_json("t", json).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.schema().column_type("x"), Some(ColumnType::Integer));
    }

    #[test]
    fn test_from_csv() {
        let csv = "name,score,joined\n\"Smith, J\",1.5,2020-01-01\nLee,,2021-06-30\n";
        let table = Table::from_csv("people", csv).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.schema().column_type("score"), Some(ColumnType::Float));
        assert_eq!(table.schema().column_type("joined"), Some(ColumnType::Date));
        assert_eq!(table.get_value(0, "name").and_then(|v| v.as_str()), Some("Smith, J"));
        assert!(table.get_value(1, "score").unwrap().is_null());
    }

    #[test]
    fn test_update_data_json() {
        let mut table = sales_table(Some("id"));
        table
            .update_data(&TableData::Json(r#"[{"id": 1, "Region": "West", "Sales": 3}]"#.to_string()))
            .unwrap();
        table
            .update_data(&TableData::Json(r#"[{"id": 1, "Sales": 4}]"#.to_string()))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_value(0, "Sales"), Some(&ColumnValue::Float(4.0)));
    }

    #[test]
    fn test_schema_serde_keeps_order() {
        let schema = Schema::new(vec![
            ("z".to_string(), ColumnType::Integer),
            ("a".to_string(), ColumnType::Datetime),
        ])
        .unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"{"z":"integer","a":"datetime"}"#);
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
