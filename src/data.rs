//! Column-major result slices.
//!
//! A [`DataSlice`] is the sink every backend writes a windowed read into,
//! one typed cell at a time. Both read shapes (`to_columns` and row
//! records) and the grid-facing [`DataResponse`] are rendered from it, so
//! they always agree on cell values.

use crate::column::{ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::pivot::PATH_SEPARATOR;
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::ops::{Deref, DerefMut};

/// Synthetic column holding each row's group_by path.
pub const ROW_PATH: &str = "__ROW_PATH__";
/// Synthetic column holding each row's stable identity.
pub const ROW_ID: &str = "__ID__";

/// A typed column of a result slice. `None` cells are nulls.
#[derive(Debug, Clone, PartialEq)]
pub enum DataColumn {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
    Date(Vec<Option<i32>>),
    Datetime(Vec<Option<i64>>),
    /// One list of keys per row (`__ROW_PATH__`, `__ID__`).
    Path(Vec<Vec<ColumnValue>>),
}

impl DataColumn {
    pub fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => DataColumn::Integer(Vec::new()),
            ColumnType::Float => DataColumn::Float(Vec::new()),
            ColumnType::String => DataColumn::String(Vec::new()),
            ColumnType::Boolean => DataColumn::Boolean(Vec::new()),
            ColumnType::Date => DataColumn::Date(Vec::new()),
            ColumnType::Datetime => DataColumn::Datetime(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DataColumn::Integer(v) => v.len(),
            DataColumn::Float(v) => v.len(),
            DataColumn::String(v) => v.len(),
            DataColumn::Boolean(v) => v.len(),
            DataColumn::Date(v) => v.len(),
            DataColumn::Datetime(v) => v.len(),
            DataColumn::Path(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell type, `None` for path columns.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            DataColumn::Integer(_) => Some(ColumnType::Integer),
            DataColumn::Float(_) => Some(ColumnType::Float),
            DataColumn::String(_) => Some(ColumnType::String),
            DataColumn::Boolean(_) => Some(ColumnType::Boolean),
            DataColumn::Date(_) => Some(ColumnType::Date),
            DataColumn::Datetime(_) => Some(ColumnType::Datetime),
            DataColumn::Path(_) => None,
        }
    }

    /// Value at `row`. Rows past the end and path columns read as null.
    pub fn get(&self, row: usize) -> ColumnValue {
        fn at<T: Clone>(v: &[Option<T>], row: usize) -> Option<T> {
            v.get(row).cloned().flatten()
        }
        let value = match self {
            DataColumn::Integer(v) => at(v, row).map(ColumnValue::Integer),
            DataColumn::Float(v) => at(v, row).map(ColumnValue::Float),
            DataColumn::String(v) => at(v, row).map(ColumnValue::String),
            DataColumn::Boolean(v) => at(v, row).map(ColumnValue::Boolean),
            DataColumn::Date(v) => at(v, row).map(ColumnValue::Date),
            DataColumn::Datetime(v) => at(v, row).map(ColumnValue::Datetime),
            DataColumn::Path(_) => None,
        };
        value.unwrap_or(ColumnValue::Null)
    }

    /// JSON rendering of one cell.
    pub fn cell_json(&self, row: usize) -> JsonValue {
        match self {
            DataColumn::Path(v) => JsonValue::Array(
                v.get(row)
                    .map(|keys| keys.iter().map(ColumnValue::to_json).collect())
                    .unwrap_or_default(),
            ),
            _ => self.get(row).to_json(),
        }
    }
}

impl Serialize for DataColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for row in 0..self.len() {
            seq.serialize_element(&self.cell_json(row))?;
        }
        seq.end()
    }
}

fn place<T>(cells: &mut Vec<Option<T>>, row: usize, value: Option<T>) {
    if row < cells.len() {
        cells[row] = value;
    } else {
        cells.resize_with(row, || None);
        cells.push(value);
    }
}

/// Values that can be written into a [`DataColumn`] of their type.
pub trait SetDataColumn {
    /// Writes this value at `row`. Fails if the column holds another type.
    fn write_to(self, column: &mut DataColumn, row: usize) -> Result<()>;

    /// An empty column for this value type.
    fn new_column() -> DataColumn;

    fn into_value(self) -> ColumnValue;
}

macro_rules! set_data_column {
    ($t:ty, $variant:ident, $inner:ident => $get:expr, $wrap:expr) => {
        impl SetDataColumn for $t {
            fn write_to(self, column: &mut DataColumn, row: usize) -> Result<()> {
                let $inner = self;
                match column {
                    DataColumn::$variant(cells) => {
                        place(cells, row, $get);
                        Ok(())
                    }
                    other => Err(EngineError::SchemaMismatch(format!(
                        "Cannot write {} value into {} column",
                        ColumnType::$variant,
                        other.column_type().map(|t| t.name()).unwrap_or("path")
                    ))),
                }
            }

            fn new_column() -> DataColumn {
                DataColumn::$variant(Vec::new())
            }

            fn into_value(self) -> ColumnValue {
                let $inner = self;
                $get.map($wrap).unwrap_or(ColumnValue::Null)
            }
        }
    };
}

/// A date cell, in days since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateCell(pub Option<i32>);

/// A datetime cell, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatetimeCell(pub Option<i64>);

set_data_column!(Option<i64>, Integer, v => v, ColumnValue::Integer);
set_data_column!(Option<f64>, Float, v => v, ColumnValue::Float);
set_data_column!(Option<String>, String, v => v, ColumnValue::String);
set_data_column!(Option<bool>, Boolean, v => v, ColumnValue::Boolean);
set_data_column!(DateCell, Date, v => v.0, ColumnValue::Date);
set_data_column!(DatetimeCell, Datetime, v => v.0, ColumnValue::Datetime);

/// A rectangular, column-major slice of a view.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DataSlice(IndexMap<String, DataColumn>);

impl Deref for DataSlice {
    type Target = IndexMap<String, DataColumn>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DataSlice {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl DataSlice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` at (`name`, `row`), creating the column on first use.
    ///
    /// A value tagged with a `group_by_index` is a row-path key instead: it
    /// is appended to that row's `__ROW_PATH__` entry.
    pub fn set_col<T: SetDataColumn>(
        &mut self,
        name: &str,
        group_by_index: Option<usize>,
        row: usize,
        value: T,
    ) -> Result<()> {
        if group_by_index.is_some() {
            self.push_path(ROW_PATH, row, value.into_value())
        } else {
            let column = self
                .0
                .entry(name.to_string())
                .or_insert_with(T::new_column);
            value.write_to(column, row)
        }
    }

    /// Dynamic counterpart of [`set_col`](Self::set_col): dispatches to the
    /// typed setter for `column_type`.
    pub fn set_value(
        &mut self,
        name: &str,
        group_by_index: Option<usize>,
        row: usize,
        column_type: ColumnType,
        value: ColumnValue,
    ) -> Result<()> {
        let mismatch = |value: &ColumnValue| {
            EngineError::SchemaMismatch(format!(
                "Value {} does not fit {} column '{}'",
                value, column_type, name
            ))
        };
        match (column_type, value) {
            (ColumnType::Integer, ColumnValue::Integer(v)) => self.set_col(name, group_by_index, row, Some(v)),
            (ColumnType::Integer, ColumnValue::Null) => self.set_col(name, group_by_index, row, None::<i64>),
            (ColumnType::Float, ColumnValue::Float(v)) => self.set_col(name, group_by_index, row, Some(v)),
            (ColumnType::Float, ColumnValue::Integer(v)) => {
                self.set_col(name, group_by_index, row, Some(v as f64))
            }
            (ColumnType::Float, ColumnValue::Null) => self.set_col(name, group_by_index, row, None::<f64>),
            (ColumnType::String, ColumnValue::String(v)) => self.set_col(name, group_by_index, row, Some(v)),
            (ColumnType::String, ColumnValue::Null) => self.set_col(name, group_by_index, row, None::<String>),
            (ColumnType::Boolean, ColumnValue::Boolean(v)) => self.set_col(name, group_by_index, row, Some(v)),
            (ColumnType::Boolean, ColumnValue::Null) => self.set_col(name, group_by_index, row, None::<bool>),
            (ColumnType::Date, ColumnValue::Date(v)) => self.set_col(name, group_by_index, row, DateCell(Some(v))),
            (ColumnType::Date, ColumnValue::Null) => self.set_col(name, group_by_index, row, DateCell(None)),
            (ColumnType::Datetime, ColumnValue::Datetime(v)) => {
                self.set_col(name, group_by_index, row, DatetimeCell(Some(v)))
            }
            (ColumnType::Datetime, ColumnValue::Null) => {
                self.set_col(name, group_by_index, row, DatetimeCell(None))
            }
            (_, other) => Err(mismatch(&other)),
        }
    }

    /// Sets a row's `__ID__` entry.
    pub fn set_id(&mut self, row: usize, key: Vec<ColumnValue>) -> Result<()> {
        self.set_keys(ROW_ID, row, key)
    }

    /// Sets a row's whole `__ROW_PATH__` entry.
    pub fn set_row_path(&mut self, row: usize, path: Vec<ColumnValue>) -> Result<()> {
        self.set_keys(ROW_PATH, row, path)
    }

    fn set_keys(&mut self, name: &str, row: usize, keys: Vec<ColumnValue>) -> Result<()> {
        let column = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| DataColumn::Path(Vec::new()));
        let DataColumn::Path(rows) = column else {
            return Err(EngineError::SchemaMismatch(format!("{} column has unexpected type", name)));
        };
        if rows.len() <= row {
            rows.resize_with(row + 1, Vec::new);
        }
        rows[row] = keys;
        Ok(())
    }

    fn push_path(&mut self, name: &str, row: usize, key: ColumnValue) -> Result<()> {
        let column = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| DataColumn::Path(Vec::new()));
        let DataColumn::Path(rows) = column else {
            return Err(EngineError::SchemaMismatch(format!("{} column has unexpected type", name)));
        };
        if rows.len() <= row {
            rows.resize_with(row + 1, Vec::new);
        }
        rows[row].push(key);
        Ok(())
    }

    /// Row count: the longest column.
    pub fn num_rows(&self) -> usize {
        self.0.values().map(DataColumn::len).max().unwrap_or(0)
    }

    /// Data columns, skipping the synthetic path columns.
    pub fn data_columns(&self) -> impl Iterator<Item = (&String, &DataColumn)> {
        self.0.iter().filter(|(name, _)| name.as_str() != ROW_PATH && name.as_str() != ROW_ID)
    }

    /// Column-major JSON: `{column_path: [cell, ..]}`, every column padded
    /// to the slice's row count.
    pub fn to_columns(&self) -> IndexMap<String, JsonValue> {
        let num_rows = self.num_rows();
        self.0
            .iter()
            .map(|(name, column)| {
                let cells = (0..num_rows).map(|row| column.cell_json(row)).collect();
                (name.clone(), JsonValue::Array(cells))
            })
            .collect()
    }

    /// Row records: `[{column_path: cell, ..}, ..]`.
    pub fn to_rows(&self) -> Vec<IndexMap<String, JsonValue>> {
        (0..self.num_rows())
            .map(|row| {
                self.0
                    .iter()
                    .map(|(name, column)| (name.clone(), column.cell_json(row)))
                    .collect()
            })
            .collect()
    }

    pub fn to_columns_string(&self) -> Result<String> {
        serde_json::to_string(&self.to_columns()).map_err(|e| EngineError::BackendError(e.to_string()))
    }

    pub fn to_rows_string(&self) -> Result<String> {
        serde_json::to_string(&self.to_rows()).map_err(|e| EngineError::BackendError(e.to_string()))
    }

    /// Renders the grid-facing response. `num_rows`/`num_columns` are the
    /// full view size; headers and cells cover this slice only.
    pub fn to_data_response(
        &self,
        num_rows: usize,
        num_columns: usize,
        num_row_headers: usize,
        num_column_headers: usize,
    ) -> DataResponse {
        let rows = self.num_rows();
        let paths: Vec<&[ColumnValue]> = (0..rows)
            .map(|row| match self.0.get(ROW_PATH) {
                Some(DataColumn::Path(p)) => p.get(row).map(Vec::as_slice).unwrap_or(&[]),
                _ => &[],
            })
            .collect();

        let row_headers = paths
            .iter()
            .map(|path| path.iter().map(ColumnValue::to_json).collect())
            .collect();

        let mut column_headers = Vec::new();
        let mut data = Vec::new();
        let mut metadata = Vec::new();
        for (name, column) in self.data_columns() {
            column_headers.push(name.split(PATH_SEPARATOR).map(str::to_string).collect());
            data.push((0..rows).map(|row| column.cell_json(row)).collect());
            metadata.push(paths.iter().map(|path| JsonValue::from(path.len())).collect());
        }

        DataResponse {
            num_row_headers,
            num_column_headers,
            num_rows,
            num_columns,
            row_headers,
            column_headers,
            data,
            metadata,
        }
    }
}

/// Windowed read in the shape the grid renderer consumes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct DataResponse {
    pub num_row_headers: usize,
    pub num_column_headers: usize,
    pub num_rows: usize,
    pub num_columns: usize,
    pub row_headers: Vec<Vec<JsonValue>>,
    pub column_headers: Vec<Vec<String>>,
    pub data: Vec<Vec<JsonValue>>,
    pub metadata: Vec<Vec<JsonValue>>,
}
