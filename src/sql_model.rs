//! SQL text generation for SQL-backed handlers.
//!
//! [`SqlModel`] is stateless: it turns handler calls into query strings and
//! never executes anything. Views become tables built with
//! `CREATE TABLE <view> AS (...)`; pivots use `GROUP BY ROLLUP` with a
//! `GROUPING_ID` column so every result row knows its tree depth, and
//! split_by uses `PIVOT`.

use crate::aggregate::Aggregate;
use crate::config::{Filter, FilterOp, FilterTerm, Scalar, Sort, SortDir, ViewConfig};
use crate::error::{EngineError, Result};
use crate::table::Schema;
use crate::view::ViewWindow;
use serde::{Deserialize, Serialize};

/// Column carrying the `GROUPING_ID` bitmask of each rollup row.
pub const GROUPING_ID: &str = "__GROUPING_ID__";

/// Knobs for dialects that spell things differently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlModelOptions {
    /// Entity created for a view, `TABLE` unless set (e.g. `TEMP TABLE`).
    pub create_entity: Option<String>,
    /// Grouping function, `GROUPING_ID` unless set.
    pub grouping_fn: Option<String>,
}

/// Name of the `i`th row-path column of a grouped view.
pub fn row_path_column(index: usize) -> String {
    format!("__ROW_PATH_{}__", index)
}

/// Parses a row-path column name back into its group_by index.
pub fn parse_row_path_column(name: &str) -> Option<usize> {
    name.strip_prefix("__ROW_PATH_")?.strip_suffix("__")?.parse().ok()
}

/// Escapes `_` out of a data column alias so the `<key>_<alias>` names
/// `PIVOT` produces split at their last `_`.
pub fn split_alias(name: &str) -> String {
    name.replace('~', "~t").replace('_', "~u")
}

/// Column path of a pivoted column, `<key>|<column>`, or `None` when the
/// name did not come out of `PIVOT`.
pub fn split_column_path(name: &str) -> Option<String> {
    let (key, alias) = name.rsplit_once('_')?;
    Some(format!("{}|{}", key, alias.replace("~u", "_").replace("~t", "~")))
}

/// Tree depth of a rollup row: every set bit is a group_by level that was
/// rolled away.
pub fn grouping_depth(group_by_len: usize, grouping_id: u64) -> usize {
    group_by_len.saturating_sub(grouping_id.count_ones() as usize)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, Default)]
pub struct SqlModel {
    options: SqlModelOptions,
}

impl SqlModel {
    pub fn new(options: SqlModelOptions) -> Self {
        SqlModel { options }
    }

    pub fn options(&self) -> &SqlModelOptions {
        &self.options
    }

    fn grouping_fn(&self) -> &str {
        self.options.grouping_fn.as_deref().unwrap_or("GROUPING_ID")
    }

    pub fn table_schema(&self, table_id: &str) -> String {
        format!("DESCRIBE {}", table_id)
    }

    pub fn table_size(&self, table_id: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", table_id)
    }

    pub fn view_schema(&self, view_id: &str) -> String {
        format!("DESCRIBE {}", view_id)
    }

    pub fn view_size(&self, view_id: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", view_id)
    }

    pub fn table_validate_expression(&self, table_id: &str, expression: &str) -> String {
        format!("DESCRIBE (SELECT {} FROM {})", expression, table_id)
    }

    pub fn view_delete(&self, view_id: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", view_id)
    }

    /// `CREATE TABLE <view_id> AS (...)` for `config` over `table_id`.
    ///
    /// `schema` is the source table's schema; it picks default aggregates
    /// (sum for numbers, count otherwise). Expressions are SQL text.
    pub fn table_make_view(&self, table_id: &str, view_id: &str, config: &ViewConfig, schema: &Schema) -> Result<String> {
        Compiler { config, schema, model: self }.build(table_id, view_id)
    }

    /// Windowed `SELECT` over a view created by
    /// [`table_make_view`](Self::table_make_view). `view_schema` is the
    /// view's own schema, whose data columns are sliced by the window.
    pub fn view_get_data(
        &self,
        view_id: &str,
        config: &ViewConfig,
        window: &ViewWindow,
        view_schema: &Schema,
    ) -> Result<String> {
        let start_row = window.start_row.unwrap_or(0);
        let limit = match window.end_row {
            Some(end) if end < start_row => {
                return Err(EngineError::InvalidViewport(format!(
                    "start_row {} is after end_row {}",
                    start_row, end
                )))
            }
            Some(end) => format!(" LIMIT {} OFFSET {}", end - start_row, start_row),
            None if start_row > 0 => format!(" OFFSET {}", start_row),
            None => String::new(),
        };

        let start_col = window.start_col.unwrap_or(0);
        let take = match window.end_col {
            Some(end) if end < start_col => {
                return Err(EngineError::InvalidViewport(format!(
                    "start_col {} is after end_col {}",
                    start_col, end
                )))
            }
            Some(end) => end - start_col,
            None => usize::MAX,
        };

        let mut columns = Vec::new();
        if !config.group_by.is_empty() {
            if config.split_by.is_empty() {
                columns.push(quote_ident(GROUPING_ID));
            }
            columns.extend((0..config.group_by.len()).map(|i| quote_ident(&row_path_column(i))));
        }
        columns.extend(
            view_schema
                .iter()
                .map(|(name, _)| name)
                .filter(|name| !name.starts_with("__"))
                .skip(start_col)
                .take(take)
                .map(quote_ident),
        );

        Ok(format!("SELECT {} FROM {}{}", columns.join(", "), view_id, limit))
    }

    /// SQL for one aggregate call. Unknown names pass through as function
    /// names so dialect-specific aggregates still work.
    fn aggregate_call(name: &str, expr: &str) -> String {
        match Aggregate::from_name(name) {
            Some(Aggregate::SumAbs) => format!("sum(abs({}))", expr),
            Some(Aggregate::DistinctCount) => format!("count(DISTINCT {})", expr),
            Some(Aggregate::Unique) => format!(
                "CASE WHEN count(DISTINCT {e}) = 1 THEN any_value({e}) END",
                e = expr
            ),
            Some(Aggregate::StringAgg) => format!("string_agg({}, ', ')", expr),
            Some(aggregate) => format!("{}({})", aggregate.name().replace(' ', "_"), expr),
            None => format!("{}({})", name, expr),
        }
    }

    fn filter_op(op: FilterOp) -> &'static str {
        match op {
            FilterOp::Eq => "=",
            FilterOp::Like => "LIKE",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
            other => other.name(),
        }
    }

    fn scalar(scalar: &Scalar) -> Option<String> {
        match scalar {
            Scalar::Null => None,
            Scalar::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Scalar::Integer(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::String(s) => Some(quote_literal(s)),
        }
    }

    fn filter_term(term: &FilterTerm) -> Option<String> {
        match term {
            FilterTerm::Scalar(scalar) => Self::scalar(scalar),
            FilterTerm::List(scalars) => {
                let values: Vec<String> = scalars.iter().filter_map(Self::scalar).collect();
                if values.is_empty() {
                    None
                } else {
                    Some(format!("({})", values.join(", ")))
                }
            }
        }
    }

    fn direction(dir: SortDir) -> &'static str {
        if dir.is_desc() {
            "DESC"
        } else {
            "ASC"
        }
    }
}

struct Compiler<'a> {
    config: &'a ViewConfig,
    schema: &'a Schema,
    model: &'a SqlModel,
}

impl<'a> Compiler<'a> {
    /// Source expression for a column: its SQL expression or quoted name.
    fn column(&self, name: &str) -> String {
        match self.config.expressions.get(name) {
            Some(expr) => format!("({})", expr),
            None => quote_ident(name),
        }
    }

    fn groups(&self, levels: usize) -> String {
        self.config.group_by[..levels]
            .iter()
            .map(|c| self.column(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn aggregate(&self, name: &str) -> String {
        let agg = match self.config.aggregates.get(name) {
            Some(agg) => agg.clone(),
            None => {
                let default = match self.schema.column_type(name) {
                    Some(column_type) => Aggregate::default_for(column_type),
                    None => Aggregate::AnyValue,
                };
                default.name().to_string()
            }
        };
        SqlModel::aggregate_call(&agg, &self.column(name))
    }

    fn sort_key(&self, sort: &Sort, grouped: bool) -> String {
        let Sort(name, dir) = sort;
        let value = if grouped { self.aggregate(name) } else { self.column(name) };
        if dir.is_abs() {
            format!("abs({})", value)
        } else {
            value
        }
    }

    fn output_columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.columns.iter().flatten().cloned().collect();
        if names.is_empty() {
            names = self.schema.column_names().into_iter().map(str::to_string).collect();
        }
        names
    }

    /// Data column select list. Under split_by the aliases are escaped
    /// because `PIVOT` joins split keys and aliases with `_`.
    fn select_clauses(&self, grouped: bool) -> Vec<String> {
        let split = !self.config.split_by.is_empty();
        self.output_columns()
            .iter()
            .map(|name| {
                let alias = if split { split_alias(name) } else { name.clone() };
                let value = if grouped { self.aggregate(name) } else { self.column(name) };
                format!("{} AS {}", value, quote_ident(&alias))
            })
            .collect()
    }

    fn where_clause(&self) -> Option<String> {
        let clauses: Vec<String> = self
            .config
            .filter
            .iter()
            .filter_map(|Filter(name, op, term)| {
                let column = self.column(name);
                match op {
                    FilterOp::IsNull | FilterOp::IsNotNull => {
                        Some(format!("{} {}", column, SqlModel::filter_op(*op)))
                    }
                    _ => SqlModel::filter_term(term)
                        .map(|term| format!("{} {} {}", column, SqlModel::filter_op(*op), term)),
                }
            })
            .collect();
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    fn build(&self, table_id: &str, view_id: &str) -> Result<String> {
        let config = self.config;
        let group_by = &config.group_by;
        let split_by = &config.split_by;
        let grouping_fn = self.model.grouping_fn();
        let sorts: Vec<&Sort> = config
            .sort
            .iter()
            .filter(|Sort(_, dir)| !dir.is_none() && !dir.is_col())
            .collect();

        for name in group_by.iter().chain(split_by).chain(config.sort.iter().map(|s| &s.0)) {
            if !self.schema.contains(name) && !config.expressions.contains_key(name) {
                return Err(EngineError::UnknownColumn(name.clone()));
            }
        }

        let mut query = if split_by.is_empty() {
            let mut select = if group_by.is_empty() {
                self.select_clauses(false)
            } else {
                self.select_clauses(true)
            };
            if !group_by.is_empty() {
                for (i, name) in group_by.iter().enumerate() {
                    select.push(format!("{} AS {}", self.column(name), row_path_column(i)));
                }
                select.push(format!("{}({}) AS {}", grouping_fn, self.groups(group_by.len()), GROUPING_ID));
            }
            format!("SELECT {} FROM {}", select.join(", "), table_id)
        } else {
            format!("SELECT * FROM {}", table_id)
        };

        if let Some(clause) = self.where_clause() {
            query = format!("{} WHERE {}", query, clause);
        }

        let mut order_by = Vec::new();
        let mut windows = Vec::new();

        if !split_by.is_empty() {
            // Several split keys pivot on one `|`-joined key, so a `_`
            // inside a key value never reads as a path separator.
            let pivot_on = match split_by.as_slice() {
                [key] => self.column(key),
                keys => keys
                    .iter()
                    .map(|c| format!("coalesce(CAST({} AS VARCHAR), 'NULL')", self.column(c)))
                    .collect::<Vec<_>>()
                    .join(" || '|' || "),
            };
            let using = self.select_clauses(true).join(", ");
            if group_by.is_empty() {
                query = format!("SELECT * FROM (PIVOT ({}) ON {} USING {})", query, pivot_on, using);
            } else {
                let groups = self.groups(group_by.len());
                let aliases = group_by
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{} AS {}", self.column(c), row_path_column(i)))
                    .collect::<Vec<_>>()
                    .join(", ");
                query = format!(
                    "SELECT * EXCLUDE ({}), {} FROM (PIVOT ({}) ON {} USING {} GROUP BY {})",
                    groups, aliases, query, pivot_on, using, groups
                );
                order_by.extend((0..group_by.len()).map(|i| format!("{} ASC", row_path_column(i))));
            }
        } else if !group_by.is_empty() {
            query = format!("{} GROUP BY ROLLUP({})", query, self.groups(group_by.len()));

            // Parents before children, then each level ordered within its
            // parent through a window over that parent's partition.
            for level in 0..group_by.len() {
                order_by.push(format!("{}({}) DESC", grouping_fn, self.groups(level + 1)));
                for sort in &sorts {
                    let key = self.sort_key(sort, true);
                    if level + 1 == group_by.len() {
                        order_by.push(format!("{} {}", key, SqlModel::direction(sort.1)));
                    } else {
                        order_by.push(format!(
                            "first({}) OVER __WINDOW_{}__ {}",
                            key,
                            level,
                            SqlModel::direction(sort.1)
                        ));
                    }
                }
                order_by.push(format!("{} ASC", row_path_column(level)));
            }

            if !sorts.is_empty() && group_by.len() > 1 {
                for level in 0..group_by.len() - 1 {
                    let partition = (0..=level).map(row_path_column).collect::<Vec<_>>().join(", ");
                    windows.push(format!(
                        "__WINDOW_{}__ AS (PARTITION BY {}({}), {} ORDER BY {}({}) DESC)",
                        level,
                        grouping_fn,
                        self.groups(level + 1),
                        partition,
                        grouping_fn,
                        self.groups(group_by.len())
                    ));
                }
            }
        } else {
            for sort in &sorts {
                order_by.push(format!("{} {}", self.sort_key(sort, false), SqlModel::direction(sort.1)));
            }
        }

        if !windows.is_empty() {
            query = format!("{} WINDOW {}", query, windows.join(", "));
        }
        if !order_by.is_empty() {
            query = format!("{} ORDER BY {}", query, order_by.join(", "));
        }

        let entity = self.model.options.create_entity.as_deref().unwrap_or("TABLE");
        Ok(format!("CREATE {} {} AS ({})", entity, view_id, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    fn schema() -> Schema {
        Schema::new(vec![
            ("Region".to_string(), ColumnType::String),
            ("State".to_string(), ColumnType::String),
            ("Sales".to_string(), ColumnType::Float),
        ])
        .unwrap()
    }

    fn config(json: &str) -> ViewConfig {
        serde_json::from_str(json).unwrap()
    }

    fn make_view(json: &str) -> String {
        SqlModel::default()
            .table_make_view("sales", "v1", &config(json), &schema())
            .unwrap()
    }

    #[test]
    fn test_simple_statements() {
        let model = SqlModel::default();
        assert_eq!(model.table_schema("t"), "DESCRIBE t");
        assert_eq!(model.table_size("t"), "SELECT COUNT(*) FROM t");
        assert_eq!(model.view_delete("v"), "DROP TABLE IF EXISTS v");
        assert_eq!(
            model.table_validate_expression("t", "\"a\" + 1"),
            "DESCRIBE (SELECT \"a\" + 1 FROM t)"
        );
    }

    #[test]
    fn test_flat_view() {
        let sql = make_view(r#"{"columns": ["Region", "Sales"], "sort": [["Sales", "desc abs"]]}"#);
        assert_eq!(
            sql,
            "CREATE TABLE v1 AS (SELECT \"Region\" AS \"Region\", \"Sales\" AS \"Sales\" FROM sales \
             ORDER BY abs(\"Sales\") DESC)"
        );
    }

    #[test]
    fn test_filters() {
        let sql = make_view(
            r#"{"filter": [["Region", "==", "O'Hare"], ["Sales", ">", 8], ["State", "in", ["CA", "OR"]],
                           ["Sales", "is not null"], ["State", "==", null]]}"#,
        );
        assert!(sql.contains(
            "WHERE \"Region\" = 'O''Hare' AND \"Sales\" > 8 AND \"State\" IN ('CA', 'OR') AND \"Sales\" IS NOT NULL)"
        ));
    }

    #[test]
    fn test_grouped_view() {
        let sql = make_view(r#"{"group_by": ["Region", "State"], "columns": ["Sales"], "sort": [["Sales", "desc"]]}"#);
        assert!(sql.contains("sum(\"Sales\") AS \"Sales\""));
        assert!(sql.contains("\"Region\" AS __ROW_PATH_0__"));
        assert!(sql.contains("GROUPING_ID(\"Region\", \"State\") AS __GROUPING_ID__"));
        assert!(sql.contains("GROUP BY ROLLUP(\"Region\", \"State\")"));
        assert!(sql.contains("first(sum(\"Sales\")) OVER __WINDOW_0__ DESC"));
        assert!(sql.contains(
            "WINDOW __WINDOW_0__ AS (PARTITION BY GROUPING_ID(\"Region\"), __ROW_PATH_0__ ORDER BY GROUPING_ID(\"Region\", \"State\") DESC)"
        ));
        assert!(sql.ends_with("sum(\"Sales\") DESC, __ROW_PATH_1__ ASC)"));
    }

    #[test]
    fn test_default_aggregates_follow_type() {
        let sql = make_view(r#"{"group_by": ["Region"], "columns": ["State", "Sales"]}"#);
        assert!(sql.contains("count(\"State\") AS \"State\""));
        assert!(sql.contains("sum(\"Sales\") AS \"Sales\""));

        let sql = make_view(r#"{"group_by": ["Region"], "columns": ["Sales"], "aggregates": {"Sales": "distinct count"}}"#);
        assert!(sql.contains("count(DISTINCT \"Sales\") AS \"Sales\""));
    }

    #[test]
    fn test_split_by_view() {
        let sql = make_view(r#"{"group_by": ["Region"], "split_by": ["State"], "columns": ["Sales"]}"#);
        assert!(sql.contains("PIVOT (SELECT * FROM sales) ON \"State\" USING sum(\"Sales\") AS \"Sales\""));
        assert!(sql.contains("SELECT * EXCLUDE (\"Region\"), \"Region\" AS __ROW_PATH_0__"));

        let sql = make_view(r#"{"split_by": ["State"], "columns": ["Sales"]}"#);
        assert!(sql.contains("SELECT * FROM (PIVOT (SELECT * FROM sales) ON \"State\""));

        let sql = make_view(r#"{"split_by": ["Region", "State"], "columns": ["Sales"]}"#);
        assert!(sql.contains(
            "ON coalesce(CAST(\"Region\" AS VARCHAR), 'NULL') || '|' || coalesce(CAST(\"State\" AS VARCHAR), 'NULL')"
        ));
    }

    #[test]
    fn test_split_column_names() {
        assert_eq!(split_alias("unit_price"), "unit~uprice");
        assert_eq!(split_column_path("West_unit~uprice").unwrap(), "West|unit_price");
        assert_eq!(split_column_path("North_East_unit~uprice").unwrap(), "North_East|unit_price");
        assert_eq!(split_column_path(&format!("k_{}", split_alias("a~_b~u"))).unwrap(), "k|a~_b~u");
        assert_eq!(split_column_path("Sales"), None);
    }

    #[test]
    fn test_expressions_and_options() {
        let model = SqlModel::new(SqlModelOptions {
            create_entity: Some("TEMP TABLE".to_string()),
            grouping_fn: Some("GROUPING".to_string()),
        });
        let cfg = config(r#"{"group_by": ["double"], "columns": ["Sales"], "expressions": {"double": "\"Sales\" * 2"}}"#);
        let sql = model.table_make_view("sales", "v", &cfg, &schema()).unwrap();
        assert!(sql.starts_with("CREATE TEMP TABLE v AS ("));
        assert!(sql.contains("(\"Sales\" * 2) AS __ROW_PATH_0__"));
        assert!(sql.contains("GROUPING((\"Sales\" * 2)) AS __GROUPING_ID__"));

        let cfg = config(r#"{"group_by": ["missing"]}"#);
        assert!(matches!(
            model.table_make_view("sales", "v", &cfg, &schema()),
            Err(EngineError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_view_get_data() {
        let model = SqlModel::default();
        let view_schema = Schema::new(vec![
            ("Sales".to_string(), ColumnType::Float),
            ("Profit".to_string(), ColumnType::Float),
            ("__ROW_PATH_0__".to_string(), ColumnType::String),
            ("__GROUPING_ID__".to_string(), ColumnType::Integer),
        ])
        .unwrap();
        let cfg = config(r#"{"group_by": ["Region"]}"#);
        let sql = model
            .view_get_data("v1", &cfg, &ViewWindow::rows(10, 20).with_columns(1, 2), &view_schema)
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"__GROUPING_ID__\", \"__ROW_PATH_0__\", \"Profit\" FROM v1 LIMIT 10 OFFSET 10"
        );

        let sql = model
            .view_get_data("v1", &ViewConfig::default(), &ViewWindow::default(), &view_schema)
            .unwrap();
        assert_eq!(sql, "SELECT \"Sales\", \"Profit\" FROM v1");

        assert!(matches!(
            model.view_get_data("v1", &cfg, &ViewWindow::rows(5, 1), &view_schema),
            Err(EngineError::InvalidViewport(_))
        ));
    }

    #[test]
    fn test_grouping_depth() {
        assert_eq!(grouping_depth(2, 0b11), 0);
        assert_eq!(grouping_depth(2, 0b01), 1);
        assert_eq!(grouping_depth(2, 0), 2);
        assert_eq!(parse_row_path_column("__ROW_PATH_3__"), Some(3));
        assert_eq!(parse_row_path_column("Sales"), None);
    }
}
