/// PivotView View Implementation
///
/// A view binds one table to one validated config. It holds no copy of the
/// table: every read takes the table's read lock, materializes the filtered
/// and sorted (or pivoted) result if the table changed since the last read,
/// and slices the requested window out of it.

use crate::column::ColumnValue;
use crate::config::{ColumnRef, ViewConfig, ViewPlan};
use crate::data::{DataColumn, DataResponse, DataSlice, ROW_ID, ROW_PATH};
use crate::error::{EngineError, Result};
use crate::handle::TableHandle;
use crate::pivot::{self, compare_for_sort, PivotResult};
use crate::table::{Schema, Table};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

static NULL: ColumnValue = ColumnValue::Null;

/// A rectangular window over a view. Bounds are half-open; a missing start
/// means 0 and a missing end means "to the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewWindow {
    pub start_row: Option<usize>,
    pub end_row: Option<usize>,
    pub start_col: Option<usize>,
    pub end_col: Option<usize>,
    /// Include the `__ID__` column.
    pub id: bool,
}

impl ViewWindow {
    pub fn rows(start: usize, end: usize) -> Self {
        ViewWindow {
            start_row: Some(start),
            end_row: Some(end),
            ..Default::default()
        }
    }

    pub fn with_columns(mut self, start: usize, end: usize) -> Self {
        self.start_col = Some(start);
        self.end_col = Some(end);
        self
    }

    pub fn with_id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Rejects inverted bounds, then clamps to the view's size.
    pub fn clamp(&self, num_rows: usize, num_columns: usize) -> Result<(Range<usize>, Range<usize>)> {
        Ok((
            clamp_axis("row", self.start_row, self.end_row, num_rows)?,
            clamp_axis("column", self.start_col, self.end_col, num_columns)?,
        ))
    }
}

fn clamp_axis(axis: &str, start: Option<usize>, end: Option<usize>, len: usize) -> Result<Range<usize>> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(EngineError::InvalidViewport(format!(
                "start_{} {} is after end_{} {}",
                axis, s, axis, e
            )));
        }
    }
    let end = end.unwrap_or(len).min(len);
    let start = start.unwrap_or(0).min(end);
    Ok(start..end)
}

/// Sizes of a view and of its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDimensions {
    pub num_table_rows: usize,
    pub num_table_columns: usize,
    pub num_view_rows: usize,
    pub num_view_columns: usize,
}

/// Cell access across base columns and materialized expressions.
pub(crate) struct Frame<'a> {
    table: &'a Table,
    expressions: &'a [Vec<ColumnValue>],
}

impl<'a> Frame<'a> {
    pub fn new(table: &'a Table, expressions: &'a [Vec<ColumnValue>]) -> Self {
        Frame { table, expressions }
    }

    pub fn value(&self, column: ColumnRef, row: usize) -> &'a ColumnValue {
        let cell = match column {
            ColumnRef::Base(index) => self.table.column_at(index).get(row),
            ColumnRef::Expression(index) => self.expressions.get(index).and_then(|e| e.get(row)),
        };
        cell.unwrap_or(&NULL)
    }
}

enum Materialized {
    Flat {
        rows: Vec<usize>,
        expressions: Vec<Vec<ColumnValue>>,
    },
    Pivot(PivotResult),
}

impl Materialized {
    fn num_rows(&self) -> usize {
        match self {
            Materialized::Flat { rows, .. } => rows.len(),
            Materialized::Pivot(result) => result.rows.len(),
        }
    }
}

/// A query bound to a table.
///
/// # Example
///
/// ```
/// use pivotview::{ColumnType, Schema, Table, TableHandle, TableOptions, ViewConfig, ViewWindow};
///
/// let schema = Schema::new(vec![
///     ("Region".to_string(), ColumnType::String),
///     ("Sales".to_string(), ColumnType::Float),
/// ]).unwrap();
/// let table = TableHandle::new(Table::new("sales".to_string(), schema, TableOptions::default()).unwrap());
/// table.update_data(&pivotview::TableData::Json(
///     r#"[{"Region": "West", "Sales": 10}, {"Region": "East", "Sales": 5}]"#.to_string(),
/// )).unwrap();
///
/// let config: ViewConfig = serde_json::from_str(r#"{"group_by": ["Region"]}"#).unwrap();
/// let view = table.view(config).unwrap();
/// assert_eq!(view.num_rows().unwrap(), 3);
/// let columns = view.to_columns(&ViewWindow::default()).unwrap();
/// assert_eq!(columns["Sales"], serde_json::json!([15.0, 10.0, 5.0]));
/// ```
pub struct View {
    table: TableHandle,
    plan: ViewPlan,
    alive: AtomicBool,
    cache: Mutex<Option<(u64, Arc<Materialized>)>>,
}

impl View {
    pub(crate) fn new(table: TableHandle, plan: ViewPlan) -> Self {
        debug!(
            "Created view on '{}' (group_by={:?}, split_by={:?})",
            table.name(),
            plan.config.group_by,
            plan.config.split_by
        );
        View {
            table,
            plan,
            alive: AtomicBool::new(true),
            cache: Mutex::new(None),
        }
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(AtomicOrdering::Acquire) && self.table.is_alive()
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(EngineError::ViewInvalidated)
        }
    }

    /// Runs `f` over the current materialization under the table's read
    /// lock, failing if the view or table was deleted meanwhile.
    fn read<T>(&self, f: impl FnOnce(&Table, &Materialized) -> Result<T>) -> Result<T> {
        self.check_alive()?;
        let out = self.table.read(|table| {
            let materialized = self.materialize(table);
            f(table, &materialized)
        })?;
        self.check_alive()?;
        Ok(out)
    }

    fn materialize(&self, table: &Table) -> Arc<Materialized> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((generation, materialized)) = cache.as_ref() {
            if *generation == table.generation() {
                return Arc::clone(materialized);
            }
        }
        let materialized = Arc::new(self.compute(table));
        *cache = Some((table.generation(), Arc::clone(&materialized)));
        materialized
    }

    fn compute(&self, table: &Table) -> Materialized {
        let expressions: Vec<Vec<ColumnValue>> = self
            .plan
            .expressions
            .iter()
            .map(|e| (0..table.len()).map(|row| e.eval(table, row)).collect())
            .collect();

        let frame = Frame::new(table, &expressions);
        let mut rows: Vec<usize> = (0..table.len())
            .filter(|&row| {
                self.plan
                    .filter
                    .iter()
                    .all(|f| f.matches(frame.value(f.source, row)))
            })
            .collect();

        if self.plan.is_pivoted() {
            let result = pivot::build(&self.plan, &frame, &rows);
            debug!(
                "Pivoted '{}': {} of {} rows into {} x {}",
                table.name(),
                rows.len(),
                table.len(),
                result.rows.len(),
                result.column_headers.len()
            );
            return Materialized::Pivot(result);
        }

        let terms: Vec<_> = self
            .plan
            .sort
            .iter()
            .filter(|s| !s.dir.is_none() && !s.dir.is_col())
            .collect();
        if !terms.is_empty() {
            // Stable: equal keys keep table order.
            rows.sort_by(|a, b| {
                terms
                    .iter()
                    .map(|s| {
                        compare_for_sort(frame.value(s.column.source, *a), frame.value(s.column.source, *b), s.dir)
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        Materialized::Flat { rows, expressions }
    }

    fn num_columns_of(&self, materialized: &Materialized) -> usize {
        match materialized {
            Materialized::Flat { .. } => self.plan.columns.len(),
            Materialized::Pivot(result) => result.column_headers.len(),
        }
    }

    pub fn get_config(&self) -> Result<ViewConfig> {
        self.check_alive()?;
        Ok(self.plan.config.clone())
    }

    /// Output column names and types; aggregated types when pivoted.
    pub fn schema(&self) -> Result<Schema> {
        self.check_alive()?;
        let pivoted = self.plan.is_pivoted();
        Schema::new(
            self.plan
                .columns
                .iter()
                .map(|c| {
                    let column_type = if pivoted { c.output_type() } else { c.input_type };
                    (c.name.clone(), column_type)
                })
                .collect(),
        )
    }

    pub fn expression_schema(&self) -> Result<Schema> {
        self.check_alive()?;
        self.plan.expression_schema()
    }

    /// Rows after filtering and pivoting. A pivoted view counts every tree
    /// node, the grand total included.
    pub fn num_rows(&self) -> Result<usize> {
        self.read(|_, m| Ok(m.num_rows()))
    }

    pub fn num_columns(&self) -> Result<usize> {
        self.read(|_, m| Ok(self.num_columns_of(m)))
    }

    pub fn dimensions(&self) -> Result<ViewDimensions> {
        self.read(|table, m| {
            Ok(ViewDimensions {
                num_table_rows: table.len(),
                num_table_columns: table.schema().len(),
                num_view_rows: m.num_rows(),
                num_view_columns: self.num_columns_of(m),
            })
        })
    }

    /// Output column identifiers within the window's column range.
    pub fn column_paths(&self, window: &ViewWindow) -> Result<Vec<String>> {
        self.read(|_, m| {
            let (_, cols) = window.clamp(m.num_rows(), self.num_columns_of(m))?;
            Ok(match m {
                Materialized::Flat { .. } => self.plan.columns[cols].iter().map(|c| c.name.clone()).collect(),
                Materialized::Pivot(result) => cols.map(|i| result.column_path(i)).collect(),
            })
        })
    }

    /// Reads the window into a column-major slice. Pivoted slices always
    /// carry `__ROW_PATH__`; `__ID__` is added when the window asks for it.
    pub fn get_data(&self, window: &ViewWindow) -> Result<DataSlice> {
        self.read(|table, m| self.slice_of(table, m, window))
    }

    fn slice_of(&self, table: &Table, m: &Materialized, window: &ViewWindow) -> Result<DataSlice> {
        let (rows, cols) = window.clamp(m.num_rows(), self.num_columns_of(m))?;
        let mut slice = DataSlice::new();
        match m {
            Materialized::Flat {
                rows: order,
                expressions,
            } => {
                let frame = Frame::new(table, expressions);
                let columns = &self.plan.columns[cols];
                if window.id {
                    slice.insert(ROW_ID.to_string(), DataColumn::Path(Vec::new()));
                }
                for column in columns {
                    slice.insert(column.name.clone(), DataColumn::new(column.input_type));
                }
                for (out, &row) in order[rows].iter().enumerate() {
                    if window.id {
                        slice.set_id(out, vec![table.row_key(row)])?;
                    }
                    for column in columns {
                        let value = frame.value(column.source, row).clone();
                        slice.set_value(&column.name, None, out, column.input_type, value)?;
                    }
                }
            }
            Materialized::Pivot(result) => {
                slice.insert(ROW_PATH.to_string(), DataColumn::Path(Vec::new()));
                if window.id {
                    slice.insert(ROW_ID.to_string(), DataColumn::Path(Vec::new()));
                }
                let paths: Vec<String> = cols.clone().map(|i| result.column_path(i)).collect();
                for (path, i) in paths.iter().zip(cols.clone()) {
                    slice.insert(path.clone(), DataColumn::new(result.column_types[i]));
                }
                for (out, row) in result.rows[rows].iter().enumerate() {
                    slice.set_row_path(out, row.path.clone())?;
                    if window.id {
                        slice.set_id(out, row.path.clone())?;
                    }
                    for (path, i) in paths.iter().zip(cols.clone()) {
                        slice.set_value(path, None, out, result.column_types[i], row.values[i].clone())?;
                    }
                }
            }
        }
        Ok(slice)
    }

    pub fn to_columns(&self, window: &ViewWindow) -> Result<IndexMap<String, JsonValue>> {
        Ok(self.get_data(window)?.to_columns())
    }

    pub fn to_json(&self, window: &ViewWindow) -> Result<Vec<IndexMap<String, JsonValue>>> {
        Ok(self.get_data(window)?.to_rows())
    }

    pub fn to_columns_string(&self, window: &ViewWindow) -> Result<String> {
        self.get_data(window)?.to_columns_string()
    }

    pub fn to_json_string(&self, window: &ViewWindow) -> Result<String> {
        self.get_data(window)?.to_rows_string()
    }

    /// The window in the grid renderer's response shape.
    pub fn to_data_response(&self, window: &ViewWindow) -> Result<DataResponse> {
        self.read(|table, m| {
            let slice = self.slice_of(table, m, window)?;
            Ok(slice.to_data_response(
                m.num_rows(),
                self.num_columns_of(m),
                self.plan.group_by.len(),
                self.plan.split_by.len() + 1,
            ))
        })
    }

    /// Releases the cached result. Later calls fail with
    /// `ViewInvalidated`; deleting again is a no-op.
    pub fn delete(&self) -> Result<()> {
        if self.alive.swap(false, AtomicOrdering::AcqRel) {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            *cache = None;
            debug!("Deleted view on '{}'", self.table.name());
        }
        Ok(())
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("table", &self.table.name())
            .field("config", &self.plan.config)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;
    use crate::table::{Row, TableOptions};
    use serde_json::json;

    fn sales() -> TableHandle {
        let schema = Schema::new(vec![
            ("Region".to_string(), ColumnType::String),
            ("Sales".to_string(), ColumnType::Float),
        ])
        .unwrap();
        let handle = TableHandle::new(Table::new("sales".to_string(), schema, TableOptions::default()).unwrap());
        handle.update(vec![row("West", 10.0), row("East", 5.0), row("West", 20.0)]).unwrap();
        handle
    }

    fn row(region: &str, sales: f64) -> Row {
        let mut row = Row::new();
        row.insert("Region".to_string(), ColumnValue::String(region.to_string()));
        row.insert("Sales".to_string(), ColumnValue::Float(sales));
        row
    }

    fn view(table: &TableHandle, config: &str) -> View {
        table.view(serde_json::from_str(config).unwrap()).unwrap()
    }

    fn all() -> ViewWindow {
        ViewWindow::default()
    }

    #[test]
    fn test_window_clamping() {
        let w = ViewWindow::rows(2, 100).with_columns(1, 1);
        assert_eq!(w.clamp(10, 3).unwrap(), (2..10, 1..1));
        assert_eq!(ViewWindow::rows(50, 60).clamp(10, 3).unwrap().0, 10..10);
        assert_eq!(all().clamp(4, 2).unwrap(), (0..4, 0..2));
        assert!(matches!(
            ViewWindow::rows(5, 2).clamp(10, 3),
            Err(EngineError::InvalidViewport(_))
        ));
        assert!(matches!(
            all().with_columns(2, 1).clamp(10, 3),
            Err(EngineError::InvalidViewport(_))
        ));
    }

    #[test]
    fn test_flat_read_and_window() {
        let table = sales();
        let v = view(&table, "{}");
        assert_eq!(v.num_rows().unwrap(), 3);
        assert_eq!(v.num_columns().unwrap(), 2);
        let columns = v.to_columns(&ViewWindow::rows(1, 3).with_columns(1, 2)).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns["Sales"], json!([5.0, 20.0]));
    }

    #[test]
    fn test_flat_id_column() {
        let table = sales();
        let v = view(&table, r#"{"sort": [["Sales", "desc"]]}"#);
        let columns = v.to_columns(&all().with_id()).unwrap();
        assert_eq!(columns["__ID__"], json!([[2], [0], [1]]));
        assert!(!v.to_columns(&all()).unwrap().contains_key("__ID__"));
    }

    #[test]
    fn test_sort_is_stable() {
        let table = sales();
        table.update(vec![row("North", 10.0)]).unwrap();
        let v = view(&table, r#"{"sort": [["Sales", "asc"]]}"#);
        let columns = v.to_columns(&all()).unwrap();
        assert_eq!(columns["Region"], json!(["East", "West", "North", "West"]));
    }

    #[test]
    fn test_filter_conjunction() {
        let table = sales();
        let v = view(&table, r#"{"filter": [["Region", "==", "West"], ["Sales", ">", 15]]}"#);
        assert_eq!(v.to_columns(&all()).unwrap()["Sales"], json!([20.0]));

        let v = view(&table, r#"{"filter": [["Region", "==", "North"]]}"#);
        assert_eq!(v.num_rows().unwrap(), 0);
        assert_eq!(v.to_columns(&all()).unwrap()["Sales"], json!([]));
    }

    #[test]
    fn test_pivot_read() {
        let table = sales();
        let v = view(&table, r#"{"group_by": ["Region"], "aggregates": {"Sales": "sum"}}"#);
        let columns = v.to_columns(&all().with_id()).unwrap();
        assert_eq!(columns["__ROW_PATH__"], json!([[], ["West"], ["East"]]));
        assert_eq!(columns["__ID__"], json!([[], ["West"], ["East"]]));
        assert_eq!(columns["Sales"], json!([35.0, 30.0, 5.0]));
        assert_eq!(columns["Region"], json!([3, 2, 1]));

        let schema = v.schema().unwrap();
        assert_eq!(schema.column_type("Region"), Some(ColumnType::Integer));
    }

    #[test]
    fn test_split_by_read() {
        let table = sales();
        let v = view(&table, r#"{"split_by": ["Region"], "columns": ["Sales"]}"#);
        assert_eq!(v.column_paths(&all()).unwrap(), vec!["West|Sales", "East|Sales"]);
        let rows = v.to_json(&all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["West|Sales"], json!(30.0));
        assert_eq!(rows[0]["__ROW_PATH__"], json!([]));
    }

    #[test]
    fn test_expression_columns() {
        let table = sales();
        let v = view(
            &table,
            r#"{"columns": ["Sales", "big"], "expressions": {"big": "\"Sales\" > 8"}, "group_by": ["big"]}"#,
        );
        let columns = v.to_columns(&all()).unwrap();
        assert_eq!(columns["__ROW_PATH__"], json!([[], [true], [false]]));
        assert_eq!(columns["Sales"], json!([35.0, 30.0, 5.0]));
        assert_eq!(v.expression_schema().unwrap().column_type("big"), Some(ColumnType::Boolean));
    }

    #[test]
    fn test_reads_see_updates() {
        let table = sales();
        let v = view(&table, r#"{"group_by": ["Region"]}"#);
        assert_eq!(v.num_rows().unwrap(), 3);
        table.update(vec![row("North", 1.0)]).unwrap();
        assert_eq!(v.num_rows().unwrap(), 4);
        assert_eq!(v.to_columns(&ViewWindow::rows(0, 1)).unwrap()["Sales"], json!([36.0]));
    }

    #[test]
    fn test_data_response() {
        let table = sales();
        let v = view(&table, r#"{"group_by": ["Region"], "columns": ["Sales"]}"#);
        let response = v.to_data_response(&ViewWindow::rows(1, 3)).unwrap();
        assert_eq!(response.num_rows, 3);
        assert_eq!(response.num_columns, 1);
        assert_eq!(response.num_row_headers, 1);
        assert_eq!(response.row_headers, vec![vec![json!("West")], vec![json!("East")]]);
        assert_eq!(response.column_headers, vec![vec!["Sales".to_string()]]);
        assert_eq!(response.data, vec![vec![json!(30.0), json!(5.0)]]);
        assert_eq!(response.metadata, vec![vec![json!(1), json!(1)]]);
    }

    #[test]
    fn test_data_response_sizes_match_data_under_writes() {
        let table = sales();
        let v = view(&table, r#"{"columns": ["Sales"]}"#);
        std::thread::scope(|scope| {
            let writer = table.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    writer.update(vec![row("North", 1.0)]).unwrap();
                }
            });
            for _ in 0..200 {
                let response = v.to_data_response(&ViewWindow::default()).unwrap();
                assert_eq!(response.num_rows, response.data[0].len());
            }
        });
    }

    #[test]
    fn test_delete() {
        let table = sales();
        let v = view(&table, "{}");
        v.delete().unwrap();
        v.delete().unwrap();
        assert!(matches!(v.num_rows(), Err(EngineError::ViewInvalidated)));
        assert!(matches!(v.get_config(), Err(EngineError::ViewInvalidated)));

        let v = view(&table, "{}");
        table.delete().unwrap();
        assert!(matches!(v.to_json(&all()), Err(EngineError::ViewInvalidated)));
        assert!(matches!(v.schema(), Err(EngineError::ViewInvalidated)));
    }

    #[test]
    fn test_invalid_viewport() {
        let table = sales();
        let v = view(&table, "{}");
        assert!(matches!(
            v.to_columns(&ViewWindow::rows(2, 1)),
            Err(EngineError::InvalidViewport(_))
        ));
    }
}
