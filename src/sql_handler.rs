//! A [`VirtualServerHandler`] over a SQL database.
//!
//! The handler owns one connection behind an async mutex, so statements run
//! one at a time in the order they were issued. Query text comes from
//! [`SqlModel`]; this module only runs it and decodes the results.

use crate::column::{ColumnType, ColumnValue};
use crate::config::ViewConfig;
use crate::data::DataSlice;
use crate::error::{EngineError, Result, SourceSpan};
use crate::features::Features;
use crate::handler::VirtualServerHandler;
use crate::sql_model::{grouping_depth, parse_row_path_column, split_column_path, SqlModel, GROUPING_ID};
use crate::table::Schema;
use crate::view::ViewWindow;
use async_trait::async_trait;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

/// Rows returned by a statement, cells as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    /// Database type name of each column.
    pub dtypes: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn first_cell(&self) -> Option<&JsonValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// One database connection. Implementations wrap a client library; the
/// handler never issues two statements on it concurrently.
#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str) -> Result<QueryResult>;
}

/// Database flavour: type names and the table listing statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    DuckDb,
    ClickHouse,
}

impl SqlDialect {
    pub fn hosted_tables_query(self) -> &'static str {
        match self {
            SqlDialect::DuckDb => "SHOW ALL TABLES",
            SqlDialect::ClickHouse => "SHOW TABLES",
        }
    }

    /// Maps a database type name onto a column type.
    pub fn column_type(self, type_name: &str) -> Result<ColumnType> {
        let unknown = || EngineError::UnknownType(type_name.to_string());
        match self {
            SqlDialect::DuckDb => {
                let upper = type_name.trim().to_uppercase();
                let base = upper.split('(').next().unwrap_or_default();
                match base {
                    "VARCHAR" | "TEXT" => Ok(ColumnType::String),
                    "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" | "HUGEINT" | "UBIGINT" => Ok(ColumnType::Float),
                    "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "UINTEGER" | "USMALLINT" | "UTINYINT" => {
                        Ok(ColumnType::Integer)
                    }
                    "DATE" => Ok(ColumnType::Date),
                    "BOOLEAN" => Ok(ColumnType::Boolean),
                    "TIMESTAMP" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => Ok(ColumnType::Datetime),
                    _ => Err(unknown()),
                }
            }
            SqlDialect::ClickHouse => {
                let mut name = type_name.trim();
                loop {
                    let inner = name
                        .strip_prefix("Nullable(")
                        .or_else(|| name.strip_prefix("LowCardinality("))
                        .and_then(|rest| rest.strip_suffix(')'));
                    match inner {
                        Some(inner) => name = inner,
                        None => break,
                    }
                }
                let base = name.split('(').next().unwrap_or_default();
                match base {
                    "Array" | "String" | "FixedString" | "Enum8" | "Enum16" | "UUID" => Ok(ColumnType::String),
                    "Int8" | "Int16" | "Int32" | "UInt8" | "UInt16" | "UInt32" => Ok(ColumnType::Integer),
                    "Int64" | "UInt64" | "Int128" | "UInt128" | "Float32" | "Float64" | "Decimal" => {
                        Ok(ColumnType::Float)
                    }
                    "DateTime" | "DateTime64" => Ok(ColumnType::Datetime),
                    "Date" | "Date32" => Ok(ColumnType::Date),
                    "Bool" => Ok(ColumnType::Boolean),
                    _ => Err(unknown()),
                }
            }
        }
    }

    /// What a ROLLUP/PIVOT backend can do.
    pub fn features(self) -> Features {
        let mut features = Features::all();
        features.split_by = self == SqlDialect::DuckDb;
        features.on_update = false;
        features
    }
}

/// Serves tables that live in a SQL database. Views are materialized as
/// tables named after the view id.
pub struct SqlHandler<C> {
    connection: Mutex<C>,
    model: SqlModel,
    dialect: SqlDialect,
}

impl<C: SqlConnection> SqlHandler<C> {
    pub fn new(connection: C, model: SqlModel, dialect: SqlDialect) -> Self {
        SqlHandler {
            connection: Mutex::new(connection),
            model,
            dialect,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn run(&self, sql: &str) -> Result<QueryResult> {
        let mut connection = self.connection.lock().await;
        debug!("SQL: {}", sql);
        connection.query(sql).await
    }

    async fn count(&self, sql: &str) -> Result<usize> {
        let result = self.run(sql).await?;
        result
            .first_cell()
            .and_then(json_to_u64)
            .map(|n| n as usize)
            .ok_or_else(|| EngineError::BackendError(format!("'{}' returned no count", sql)))
    }

    /// `DESCRIBE` output as (name, type name) pairs.
    async fn describe(&self, sql: &str) -> Result<Vec<(String, String)>> {
        let result = self.run(sql).await?;
        let name = result
            .column_index("column_name")
            .or_else(|| result.column_index("name"))
            .ok_or_else(|| EngineError::BackendError("DESCRIBE returned no name column".to_string()))?;
        let dtype = result
            .column_index("column_type")
            .or_else(|| result.column_index("type"))
            .ok_or_else(|| EngineError::BackendError("DESCRIBE returned no type column".to_string()))?;
        result
            .rows
            .iter()
            .map(|row| match (row.get(name), row.get(dtype)) {
                (Some(JsonValue::String(n)), Some(JsonValue::String(t))) => Ok((n.clone(), t.clone())),
                _ => Err(EngineError::BackendError("malformed DESCRIBE row".to_string())),
            })
            .collect()
    }

    async fn schema_of(&self, sql: &str) -> Result<Schema> {
        let columns = self
            .describe(sql)
            .await?
            .into_iter()
            .map(|(name, dtype)| Ok((name, self.dialect.column_type(&dtype)?)))
            .collect::<Result<Vec<_>>>()?;
        Schema::new(columns)
    }
}

/// Output name of a view column: `PIVOT` joins the split key and the
/// column alias with `_`.
fn display_name(name: &str, config: &ViewConfig) -> String {
    if config.split_by.is_empty() {
        return name.to_string();
    }
    split_column_path(name).unwrap_or_else(|| name.to_string())
}

fn json_to_u64(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Decodes one cell. Some drivers return strings for every type and some
/// return numbers for string columns, so both directions are coerced.
fn decode_cell(value: &JsonValue, column_type: ColumnType) -> Result<ColumnValue> {
    match (column_type, value) {
        (ColumnType::String, JsonValue::Number(_)) | (ColumnType::String, JsonValue::Bool(_)) => {
            Ok(ColumnValue::String(value.to_string()))
        }
        (ColumnType::Boolean, JsonValue::Number(n)) => Ok(ColumnValue::Boolean(n.as_i64().unwrap_or(0) != 0)),
        (ColumnType::Boolean, JsonValue::String(s)) => Ok(ColumnValue::Boolean(s == "true" || s == "1")),
        _ => ColumnValue::from_json(value, column_type),
    }
}

#[async_trait]
impl<C: SqlConnection> VirtualServerHandler for SqlHandler<C> {
    async fn get_hosted_tables(&self) -> Result<Vec<String>> {
        let result = self.run(self.dialect.hosted_tables_query()).await?;
        let name = result.column_index("name").unwrap_or(0);
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get(name).and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn table_schema(&self, table_id: &str) -> Result<Schema> {
        self.schema_of(&self.model.table_schema(table_id)).await
    }

    async fn table_size(&self, table_id: &str) -> Result<usize> {
        self.count(&self.model.table_size(table_id)).await
    }

    async fn table_make_view(&self, table_id: &str, view_id: &str, config: &ViewConfig) -> Result<()> {
        let schema = self.table_schema(table_id).await?;
        let sql = self.model.table_make_view(table_id, view_id, config, &schema)?;
        self.run(&sql).await.map(|_| ())
    }

    async fn view_delete(&self, view_id: &str) -> Result<()> {
        self.run(&self.model.view_delete(view_id)).await.map(|_| ())
    }

    async fn view_get_data(&self, view_id: &str, config: &ViewConfig, window: &ViewWindow) -> Result<DataSlice> {
        let view_schema = self.schema_of(&self.model.view_schema(view_id)).await?;
        let sql = self.model.view_get_data(view_id, config, window, &view_schema)?;
        let result = self.run(&sql).await?;

        let group_by_len = config.group_by.len();
        let grouping = result.column_index(GROUPING_ID);
        let types = result
            .dtypes
            .iter()
            .map(|t| self.dialect.column_type(t))
            .collect::<Result<Vec<_>>>()?;

        let mut slice = DataSlice::new();
        for (row_index, row) in result.rows.iter().enumerate() {
            let depth = match grouping.and_then(|g| row.get(g)).and_then(json_to_u64) {
                Some(grouping_id) => grouping_depth(group_by_len, grouping_id),
                None => group_by_len,
            };
            if group_by_len > 0 {
                slice.set_row_path(row_index, Vec::new())?;
            }
            for (col_index, name) in result.columns.iter().enumerate() {
                if name == GROUPING_ID {
                    continue;
                }
                let column_type = types.get(col_index).copied().unwrap_or(ColumnType::String);
                let cell = row.get(col_index).unwrap_or(&JsonValue::Null);
                match parse_row_path_column(name) {
                    Some(index) if index < depth => {
                        let value = decode_cell(cell, column_type)?;
                        slice.set_value(name, Some(index), row_index, column_type, value)?;
                    }
                    Some(_) => {}
                    None if name.starts_with("__") => {}
                    None => {
                        let value = decode_cell(cell, column_type)?;
                        slice.set_value(&display_name(name, config), None, row_index, column_type, value)?;
                    }
                }
            }
        }
        Ok(slice)
    }

    async fn view_size(&self, view_id: &str) -> Result<usize> {
        self.count(&self.model.view_size(view_id)).await
    }

    async fn view_schema(&self, view_id: &str, config: &ViewConfig) -> Result<Schema> {
        let columns = self
            .describe(&self.model.view_schema(view_id))
            .await?
            .into_iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .map(|(name, dtype)| Ok((display_name(&name, config), self.dialect.column_type(&dtype)?)))
            .collect::<Result<Vec<_>>>()?;
        Schema::new(columns)
    }

    async fn view_expression_schema(&self, view_id: &str, config: &ViewConfig) -> Result<Schema> {
        let schema = self.view_schema(view_id, config).await?;
        let types: IndexMap<&str, ColumnType> = schema.iter().collect();
        Schema::new(
            config
                .expressions
                .keys()
                .filter_map(|name| types.get(name.as_str()).map(|t| (name.clone(), *t)))
                .collect(),
        )
    }

    async fn table_validate_expression(&self, table_id: &str, expression: &str) -> Result<ColumnType> {
        let columns = self
            .describe(&self.model.table_validate_expression(table_id, expression))
            .await
            .map_err(|e| match e {
                EngineError::BackendError(message) => {
                    EngineError::expression(message, SourceSpan::new(0, expression.len()))
                }
                other => other,
            })?;
        match columns.first() {
            Some((_, dtype)) => self.dialect.column_type(dtype),
            None => Err(EngineError::expression(
                format!("'{}' produced no column", expression),
                SourceSpan::new(0, expression.len()),
            )),
        }
    }

    async fn get_features(&self) -> Result<Features> {
        Ok(self.dialect.features())
    }

    async fn table_delete(&self, table_id: &str) -> Result<()> {
        self.run(&format!("DROP TABLE IF EXISTS {}", table_id)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Answers by statement prefix and records everything it ran.
    #[derive(Clone, Default)]
    struct MockConnection {
        log: Arc<std::sync::Mutex<Vec<String>>>,
        busy: Arc<AtomicBool>,
        data: QueryResult,
    }

    fn describe(columns: &[(&str, &str)]) -> QueryResult {
        QueryResult {
            columns: vec!["column_name".to_string(), "column_type".to_string()],
            dtypes: vec!["VARCHAR".to_string(), "VARCHAR".to_string()],
            rows: columns.iter().map(|(n, t)| vec![json!(n), json!(t)]).collect(),
        }
    }

    #[async_trait]
    impl SqlConnection for MockConnection {
        async fn query(&mut self, sql: &str) -> Result<QueryResult> {
            assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping statements");
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(sql.to_string());
            let result = if sql.starts_with("SHOW ALL TABLES") {
                QueryResult {
                    columns: vec!["database".to_string(), "name".to_string()],
                    dtypes: vec!["VARCHAR".to_string(), "VARCHAR".to_string()],
                    rows: vec![vec![json!("memory"), json!("sales")]],
                }
            } else if sql.starts_with("SELECT COUNT(*)") {
                QueryResult {
                    columns: vec!["count_star()".to_string()],
                    dtypes: vec!["BIGINT".to_string()],
                    rows: vec![vec![json!(3)]],
                }
            } else if sql == "DESCRIBE sales" {
                describe(&[("Region", "VARCHAR"), ("Sales", "DOUBLE")])
            } else if sql.starts_with("DESCRIBE (SELECT") {
                if sql.contains("bogus") {
                    return self.fail();
                }
                describe(&[("expr", "DOUBLE")])
            } else if sql.starts_with("DESCRIBE") {
                describe(&[
                    ("Sales", "DOUBLE"),
                    ("__ROW_PATH_0__", "VARCHAR"),
                    ("__GROUPING_ID__", "BIGINT"),
                ])
            } else if sql.starts_with("SELECT") {
                self.data.clone()
            } else {
                QueryResult::default()
            };
            self.busy.store(false, Ordering::SeqCst);
            Ok(result)
        }
    }

    impl MockConnection {
        fn fail(&self) -> Result<QueryResult> {
            self.busy.store(false, Ordering::SeqCst);
            Err(EngineError::BackendError("Binder Error: bogus".to_string()))
        }
    }

    fn handler(data: QueryResult) -> (SqlHandler<MockConnection>, Arc<std::sync::Mutex<Vec<String>>>) {
        let connection = MockConnection { data, ..Default::default() };
        let log = connection.log.clone();
        (SqlHandler::new(connection, SqlModel::default(), SqlDialect::DuckDb), log)
    }

    #[test]
    fn test_duckdb_types() {
        let d = SqlDialect::DuckDb;
        assert_eq!(d.column_type("VARCHAR").unwrap(), ColumnType::String);
        assert_eq!(d.column_type("DECIMAL(18,3)").unwrap(), ColumnType::Float);
        assert_eq!(d.column_type("HUGEINT").unwrap(), ColumnType::Float);
        assert_eq!(d.column_type("BIGINT").unwrap(), ColumnType::Integer);
        assert_eq!(d.column_type("DATE").unwrap(), ColumnType::Date);
        assert_eq!(d.column_type("TIMESTAMP").unwrap(), ColumnType::Datetime);
        assert!(matches!(d.column_type("BLOB"), Err(EngineError::UnknownType(_))));
    }

    #[test]
    fn test_clickhouse_types() {
        let c = SqlDialect::ClickHouse;
        assert_eq!(c.column_type("Nullable(Int32)").unwrap(), ColumnType::Integer);
        assert_eq!(c.column_type("LowCardinality(Nullable(String))").unwrap(), ColumnType::String);
        assert_eq!(c.column_type("Int64").unwrap(), ColumnType::Float);
        assert_eq!(c.column_type("Array(String)").unwrap(), ColumnType::String);
        assert_eq!(c.column_type("DateTime64(3)").unwrap(), ColumnType::Datetime);
        assert_eq!(c.column_type("Bool").unwrap(), ColumnType::Boolean);
        assert!(matches!(c.column_type("Map(String, String)"), Err(EngineError::UnknownType(_))));
    }

    #[tokio::test]
    async fn test_table_calls() {
        let (handler, log) = handler(QueryResult::default());
        assert_eq!(handler.get_hosted_tables().await.unwrap(), vec!["sales"]);
        assert_eq!(handler.table_size("sales").await.unwrap(), 3);
        let schema = handler.table_schema("sales").await.unwrap();
        assert_eq!(schema.column_type("Sales"), Some(ColumnType::Float));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["SHOW ALL TABLES", "SELECT COUNT(*) FROM sales", "DESCRIBE sales"]
        );
    }

    #[tokio::test]
    async fn test_make_view_and_schema() {
        let (handler, log) = handler(QueryResult::default());
        let config: ViewConfig = serde_json::from_str(r#"{"group_by": ["Region"], "columns": ["Sales"]}"#).unwrap();
        handler.table_make_view("sales", "v1", &config).await.unwrap();
        assert!(log.lock().unwrap()[1].starts_with("CREATE TABLE v1 AS (SELECT sum(\"Sales\")"));

        let schema = handler.view_schema("v1", &config).await.unwrap();
        assert_eq!(schema.column_names(), vec!["Sales"]);
        handler.view_delete("v1").await.unwrap();
        assert_eq!(log.lock().unwrap().last().unwrap(), "DROP TABLE IF EXISTS v1");
    }

    #[tokio::test]
    async fn test_view_get_data_rollup() {
        let data = QueryResult {
            columns: vec![
                "__GROUPING_ID__".to_string(),
                "__ROW_PATH_0__".to_string(),
                "Sales".to_string(),
            ],
            dtypes: vec!["BIGINT".to_string(), "VARCHAR".to_string(), "DOUBLE".to_string()],
            rows: vec![
                vec![json!(1), JsonValue::Null, json!(35.0)],
                vec![json!(0), json!("West"), json!(30.0)],
                vec![json!(0), json!("East"), json!(5)],
            ],
        };
        let (handler, _) = handler(data);
        let config: ViewConfig = serde_json::from_str(r#"{"group_by": ["Region"], "columns": ["Sales"]}"#).unwrap();
        let slice = handler.view_get_data("v1", &config, &ViewWindow::default()).await.unwrap();
        let columns = slice.to_columns();
        assert_eq!(columns["__ROW_PATH__"], json!([[], ["West"], ["East"]]));
        assert_eq!(columns["Sales"], json!([35.0, 30.0, 5.0]));
        assert!(!columns.contains_key("__GROUPING_ID__"));
    }

    #[tokio::test]
    async fn test_split_by_keeps_underscored_names() {
        let data = QueryResult {
            columns: vec!["West_unit~uprice".to_string(), "North_East_unit~uprice".to_string()],
            dtypes: vec!["DOUBLE".to_string(), "DOUBLE".to_string()],
            rows: vec![vec![json!(2.5), json!(4.0)]],
        };
        let (handler, log) = handler(data);
        let config: ViewConfig =
            serde_json::from_str(r#"{"split_by": ["Region"], "columns": ["unit_price"]}"#).unwrap();
        let slice = handler.view_get_data("v1", &config, &ViewWindow::default()).await.unwrap();
        let columns = slice.to_columns();
        assert_eq!(columns["West|unit_price"], json!([2.5]));
        assert_eq!(columns["North_East|unit_price"], json!([4.0]));

        handler.table_make_view("sales", "v2", &config).await.unwrap();
        assert!(log.lock().unwrap().last().unwrap().contains("AS \"unit~uprice\""));
    }

    #[tokio::test]
    async fn test_validate_expression() {
        let (handler, _) = handler(QueryResult::default());
        assert_eq!(
            handler.table_validate_expression("sales", "\"Sales\" * 2").await.unwrap(),
            ColumnType::Float
        );
        assert!(matches!(
            handler.table_validate_expression("sales", "bogus").await,
            Err(EngineError::ExpressionError { .. })
        ));
    }

    #[tokio::test]
    async fn test_statements_never_overlap() {
        let (handler, log) = handler(QueryResult::default());
        let handler = Arc::new(handler);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.table_size("sales").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 3);
        }
        assert_eq!(log.lock().unwrap().len(), 8);
    }
}
