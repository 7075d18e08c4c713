//! View configuration: the immutable query description a View is built from.
//!
//! [`ViewConfig`] is the wire/JSON shape. [`ViewPlan`] is the validated
//! form, with every column name resolved against the table schema and the
//! declared expressions, every filter term coerced to its column's type and
//! every aggregate checked against its column's type.

use crate::aggregate::Aggregate;
use crate::column::{parse_date, parse_datetime, ColumnType, ColumnValue};
use crate::error::{EngineError, Result};
use crate::expr::Expression;
use crate::table::Schema;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort direction of a sort term. "col" variants order split_by column
/// groups, "abs" variants compare absolute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
    #[serde(rename = "col asc")]
    ColAsc,
    #[serde(rename = "col desc")]
    ColDesc,
    #[serde(rename = "asc abs")]
    AscAbs,
    #[serde(rename = "desc abs")]
    DescAbs,
    #[serde(rename = "col asc abs")]
    ColAscAbs,
    #[serde(rename = "col desc abs")]
    ColDescAbs,
}

impl SortDir {
    pub fn is_none(self) -> bool {
        self == SortDir::None
    }

    pub fn is_col(self) -> bool {
        matches!(
            self,
            SortDir::ColAsc | SortDir::ColDesc | SortDir::ColAscAbs | SortDir::ColDescAbs
        )
    }

    pub fn is_abs(self) -> bool {
        matches!(
            self,
            SortDir::AscAbs | SortDir::DescAbs | SortDir::ColAscAbs | SortDir::ColDescAbs
        )
    }

    pub fn is_desc(self) -> bool {
        matches!(
            self,
            SortDir::Desc | SortDir::ColDesc | SortDir::DescAbs | SortDir::ColDescAbs
        )
    }

    /// Next direction when a column header is clicked. `None` means the
    /// term is dropped.
    ///
    /// ```
    /// use pivotview::SortDir;
    ///
    /// assert_eq!(SortDir::Desc.cycle(false), Some(SortDir::Asc));
    /// assert_eq!(SortDir::Asc.cycle(false), None);
    /// assert_eq!(SortDir::Asc.cycle(true), Some(SortDir::ColDesc));
    /// ```
    pub fn cycle(self, has_split_by: bool) -> Option<SortDir> {
        match (self, has_split_by) {
            (SortDir::None, _) => Some(SortDir::Desc),
            (SortDir::Desc, _) => Some(SortDir::Asc),
            (SortDir::DescAbs, _) => Some(SortDir::AscAbs),
            (SortDir::Asc, true) => Some(SortDir::ColDesc),
            (SortDir::AscAbs, true) => Some(SortDir::ColDescAbs),
            (SortDir::ColDesc, true) => Some(SortDir::ColAsc),
            (SortDir::ColDescAbs, true) => Some(SortDir::ColAscAbs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SortDir::None => "none",
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
            SortDir::ColAsc => "col asc",
            SortDir::ColDesc => "col desc",
            SortDir::AscAbs => "asc abs",
            SortDir::DescAbs => "desc abs",
            SortDir::ColAscAbs => "col asc abs",
            SortDir::ColDescAbs => "col desc abs",
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `[column, direction]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort(pub String, pub SortDir);

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "LIKE", alias = "like")]
    Like,
    #[serde(rename = "IS DISTINCT FROM", alias = "is distinct from")]
    IsDistinctFrom,
    #[serde(rename = "IS NOT DISTINCT FROM", alias = "is not distinct from")]
    IsNotDistinctFrom,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "is null")]
    IsNull,
    #[serde(rename = "is not null")]
    IsNotNull,
}

impl FilterOp {
    pub const ALL: [FilterOp; 13] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Gt,
        FilterOp::Lt,
        FilterOp::Ge,
        FilterOp::Le,
        FilterOp::Like,
        FilterOp::IsDistinctFrom,
        FilterOp::IsNotDistinctFrom,
        FilterOp::In,
        FilterOp::NotIn,
        FilterOp::IsNull,
        FilterOp::IsNotNull,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::IsDistinctFrom => "IS DISTINCT FROM",
            FilterOp::IsNotDistinctFrom => "IS NOT DISTINCT FROM",
            FilterOp::In => "in",
            FilterOp::NotIn => "not in",
            FilterOp::IsNull => "is null",
            FilterOp::IsNotNull => "is not null",
        }
    }

    /// Operators valid for columns of `column_type`.
    pub fn for_type(column_type: ColumnType) -> Vec<FilterOp> {
        FilterOp::ALL
            .iter()
            .copied()
            .filter(|op| *op != FilterOp::Like || column_type == ColumnType::String)
            .collect()
    }

    fn takes_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    fn takes_term(self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }
}

/// A filter literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::Null
    }
}

/// Right-hand side of a filter: one scalar, or a list for `in`/`not in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterTerm {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl Default for FilterTerm {
    fn default() -> Self {
        FilterTerm::Scalar(Scalar::Null)
    }
}

/// `[column, op, term]`; the term may be omitted for `is null` and
/// `is not null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FilterRepr")]
pub struct Filter(pub String, pub FilterOp, pub FilterTerm);

#[derive(Deserialize)]
#[serde(untagged)]
enum FilterRepr {
    Full(String, FilterOp, FilterTerm),
    Short(String, FilterOp),
}

impl From<FilterRepr> for Filter {
    fn from(repr: FilterRepr) -> Self {
        match repr {
            FilterRepr::Full(column, op, term) => Filter(column, op, term),
            FilterRepr::Short(column, op) => Filter(column, op, FilterTerm::default()),
        }
    }
}

/// Query description for a View.
///
/// ```
/// use pivotview::ViewConfig;
///
/// let config: ViewConfig = serde_json::from_str(r#"{
///     "group_by": ["Region"],
///     "sort": [["Sales", "desc"]],
///     "filter": [["Sales", ">", 8]],
///     "aggregates": {"Sales": "sum"}
/// }"#).unwrap();
/// assert_eq!(config.group_by, vec!["Region".to_string()]);
/// assert!(config.columns.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Output columns. `None` entries are skip markers; an empty list
    /// selects every base column.
    pub columns: Vec<Option<String>>,
    pub group_by: Vec<String>,
    pub split_by: Vec<String>,
    pub sort: Vec<Sort>,
    pub filter: Vec<Filter>,
    pub aggregates: IndexMap<String, String>,
    pub expressions: IndexMap<String, String>,
}

impl ViewConfig {
    pub fn is_pivoted(&self) -> bool {
        !self.group_by.is_empty() || !self.split_by.is_empty()
    }

    /// Sort list after a header click on `column`. With `append` the other
    /// terms are kept; otherwise the clicked column becomes the only term.
    pub fn rotate_sort(&self, column: &str, abs: bool, append: bool) -> Vec<Sort> {
        let has_split_by = !self.split_by.is_empty();
        let initial = if abs { SortDir::DescAbs } else { SortDir::Desc };
        let existing = self.sort.iter().find(|Sort(name, _)| name == column);

        if !append {
            return match existing {
                Some(Sort(_, dir)) => dir.cycle(has_split_by).map(|d| Sort(column.to_string(), d)).into_iter().collect(),
                None => vec![Sort(column.to_string(), initial)],
            };
        }

        let mut sort: Vec<Sort> = self
            .sort
            .iter()
            .filter_map(|term| {
                if term.0 == column {
                    term.1.cycle(has_split_by).map(|d| Sort(column.to_string(), d))
                } else {
                    Some(term.clone())
                }
            })
            .collect();
        if existing.is_none() {
            sort.push(Sort(column.to_string(), initial));
        }
        sort
    }
}

// ============================================================================
// Validated plan
// ============================================================================

/// A column reachable by a view: a base table column or a declared
/// expression, by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ColumnRef {
    Base(usize),
    Expression(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct PlanColumn {
    pub name: String,
    pub source: ColumnRef,
    pub input_type: ColumnType,
    pub aggregate: Aggregate,
}

impl PlanColumn {
    /// Type of the column as reported by a pivoted view.
    pub fn output_type(&self) -> ColumnType {
        self.aggregate.output_type(self.input_type)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlanSort {
    pub column: PlanColumn,
    pub dir: SortDir,
}

#[derive(Debug, Clone)]
pub(crate) enum FilterValue {
    None,
    One(ColumnValue),
    Many(Vec<ColumnValue>),
}

#[derive(Debug, Clone)]
pub(crate) struct PlanFilter {
    pub source: ColumnRef,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl PlanFilter {
    /// Comparison operators treat a null cell as a non-match.
    pub fn matches(&self, cell: &ColumnValue) -> bool {
        match (&self.value, self.op) {
            (_, FilterOp::IsNull) => cell.is_null(),
            (_, FilterOp::IsNotNull) => !cell.is_null(),
            (FilterValue::One(term), FilterOp::IsDistinctFrom) => cell.total_cmp(term).is_ne(),
            (FilterValue::One(term), FilterOp::IsNotDistinctFrom) => cell.total_cmp(term).is_eq(),
            _ if cell.is_null() => false,
            (FilterValue::Many(terms), FilterOp::In) => terms.iter().any(|t| cell.total_cmp(t).is_eq()),
            (FilterValue::Many(terms), FilterOp::NotIn) => !terms.iter().any(|t| cell.total_cmp(t).is_eq()),
            (FilterValue::One(term), FilterOp::Like) => match (cell.as_str(), term.as_str()) {
                (Some(s), Some(pattern)) => like(s, pattern),
                _ => false,
            },
            (FilterValue::One(term), op) => {
                let ordering = cell.total_cmp(term);
                match op {
                    FilterOp::Eq => ordering.is_eq(),
                    FilterOp::Ne => ordering.is_ne(),
                    FilterOp::Gt => ordering.is_gt(),
                    FilterOp::Lt => ordering.is_lt(),
                    FilterOp::Ge => ordering.is_ge(),
                    FilterOp::Le => ordering.is_le(),
                    _ => false,
                }
            }
            _ => true,
        }
    }
}

/// SQL LIKE with `%` (any run) and `_` (one character), case sensitive.
fn like(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut si, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == s[si]) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}

/// A [`ViewConfig`] validated against a table schema.
#[derive(Debug, Clone)]
pub(crate) struct ViewPlan {
    pub config: ViewConfig,
    pub expressions: Vec<Expression>,
    pub columns: Vec<PlanColumn>,
    pub group_by: Vec<PlanColumn>,
    pub split_by: Vec<PlanColumn>,
    pub sort: Vec<PlanSort>,
    pub filter: Vec<PlanFilter>,
}

impl ViewPlan {
    /// Compiles expressions, resolves every name and checks aggregates and
    /// filters against column types. No view state exists until this
    /// succeeds.
    pub fn new(config: ViewConfig, schema: &Schema) -> Result<ViewPlan> {
        let mut expressions = Vec::with_capacity(config.expressions.len());
        for (name, source) in &config.expressions {
            if schema.contains(name) {
                return Err(EngineError::InvalidConfig(format!(
                    "Expression '{}' shadows a table column",
                    name
                )));
            }
            expressions.push(Expression::compile(name, source, schema)?);
        }

        let resolver = Resolver {
            schema,
            expressions: &expressions,
            aggregates: &config.aggregates,
        };

        for name in config.aggregates.keys() {
            resolver.column(name)?;
        }

        let columns: Vec<PlanColumn> = if config.columns.is_empty() {
            schema
                .column_names()
                .into_iter()
                .map(|name| resolver.column(name))
                .collect::<Result<_>>()?
        } else {
            let mut columns: Vec<PlanColumn> = Vec::new();
            for name in config.columns.iter().flatten() {
                if columns.iter().any(|c| &c.name == name) {
                    return Err(EngineError::InvalidConfig(format!(
                        "Column '{}' is listed more than once",
                        name
                    )));
                }
                columns.push(resolver.column(name)?);
            }
            columns
        };

        let group_by = config
            .group_by
            .iter()
            .map(|name| resolver.column(name))
            .collect::<Result<Vec<_>>>()?;
        let split_by = config
            .split_by
            .iter()
            .map(|name| resolver.column(name))
            .collect::<Result<Vec<_>>>()?;

        let sort = config
            .sort
            .iter()
            .map(|Sort(name, dir)| {
                Ok(PlanSort {
                    column: resolver.column(name)?,
                    dir: *dir,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = config
            .filter
            .iter()
            .filter_map(|Filter(name, op, term)| resolver.filter(name, *op, term).transpose())
            .collect::<Result<Vec<_>>>()?;

        Ok(ViewPlan {
            config,
            expressions,
            columns,
            group_by,
            split_by,
            sort,
            filter,
        })
    }

    pub fn is_pivoted(&self) -> bool {
        !self.group_by.is_empty() || !self.split_by.is_empty()
    }

    /// Output names and types of the declared expressions.
    pub fn expression_schema(&self) -> Result<Schema> {
        Schema::new(
            self.expressions
                .iter()
                .map(|e| (e.name().to_string(), e.output_type()))
                .collect(),
        )
    }
}

struct Resolver<'a> {
    schema: &'a Schema,
    expressions: &'a [Expression],
    aggregates: &'a IndexMap<String, String>,
}

impl<'a> Resolver<'a> {
    fn column(&self, name: &str) -> Result<PlanColumn> {
        let (source, input_type) = if let Some(index) = self.schema.column_index(name) {
            let column_type = self
                .schema
                .column_type(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.to_string()))?;
            (ColumnRef::Base(index), column_type)
        } else if let Some(index) = self.expressions.iter().position(|e| e.name() == name) {
            (ColumnRef::Expression(index), self.expressions[index].output_type())
        } else {
            return Err(EngineError::UnknownColumn(name.to_string()));
        };

        let aggregate = match self.aggregates.get(name) {
            Some(agg_name) => Aggregate::from_name(agg_name).ok_or_else(|| {
                EngineError::InvalidConfig(format!("Unknown aggregate '{}' for column '{}'", agg_name, name))
            })?,
            None => Aggregate::default_for(input_type),
        };
        if !aggregate.valid_for(input_type) {
            return Err(EngineError::InvalidConfig(format!(
                "Aggregate '{}' is not valid for {} column '{}'",
                aggregate, input_type, name
            )));
        }

        Ok(PlanColumn {
            name: name.to_string(),
            source,
            input_type,
            aggregate,
        })
    }

    /// `Ok(None)` for an incomplete comparison term, which is skipped.
    fn filter(&self, name: &str, op: FilterOp, term: &FilterTerm) -> Result<Option<PlanFilter>> {
        let column = self.column(name)?;
        let column_type = column.input_type;

        if op == FilterOp::Like && column_type != ColumnType::String {
            return Err(EngineError::InvalidConfig(format!(
                "LIKE is only valid for string columns, '{}' is {}",
                name, column_type
            )));
        }

        let value = if !op.takes_term() {
            FilterValue::None
        } else if op.takes_list() {
            let scalars: Vec<&Scalar> = match term {
                FilterTerm::List(list) => list.iter().collect(),
                FilterTerm::Scalar(Scalar::Null) => return Ok(None),
                FilterTerm::Scalar(scalar) => vec![scalar],
            };
            FilterValue::Many(
                scalars
                    .into_iter()
                    .map(|s| coerce_scalar(s, column_type, name))
                    .collect::<Result<_>>()?,
            )
        } else {
            let scalar = match term {
                FilterTerm::Scalar(scalar) => scalar,
                FilterTerm::List(_) => {
                    return Err(EngineError::InvalidConfig(format!(
                        "Filter '{}' on '{}' takes a single value, not a list",
                        op.name(),
                        name
                    )))
                }
            };
            match (scalar, op) {
                (Scalar::Null, FilterOp::IsDistinctFrom | FilterOp::IsNotDistinctFrom) => {
                    FilterValue::One(ColumnValue::Null)
                }
                (Scalar::Null, _) => return Ok(None),
                (scalar, _) => FilterValue::One(coerce_scalar(scalar, column_type, name)?),
            }
        };

        Ok(Some(PlanFilter {
            source: column.source,
            op,
            value,
        }))
    }
}

/// Converts a filter literal to a value comparable with a column of
/// `column_type`.
fn coerce_scalar(scalar: &Scalar, column_type: ColumnType, column: &str) -> Result<ColumnValue> {
    let mismatch = || {
        EngineError::InvalidConfig(format!(
            "Filter value {:?} does not match {} column '{}'",
            scalar, column_type, column
        ))
    };

    let value = match (scalar, column_type) {
        (Scalar::Null, _) => ColumnValue::Null,
        (Scalar::Integer(v), ColumnType::Integer) => ColumnValue::Integer(*v),
        (Scalar::Integer(v), ColumnType::Float) => ColumnValue::Float(*v as f64),
        (Scalar::Float(v), ColumnType::Integer | ColumnType::Float) => ColumnValue::Float(*v),
        (Scalar::String(s), ColumnType::Integer | ColumnType::Float) => s
            .trim()
            .parse::<f64>()
            .map(ColumnValue::Float)
            .map_err(|_| mismatch())?,
        (Scalar::String(s), ColumnType::String) => ColumnValue::String(s.clone()),
        (Scalar::Bool(b), ColumnType::Boolean) => ColumnValue::Boolean(*b),
        (Scalar::String(s), ColumnType::Boolean) => match s.to_ascii_lowercase().as_str() {
            "true" => ColumnValue::Boolean(true),
            "false" => ColumnValue::Boolean(false),
            _ => return Err(mismatch()),
        },
        (Scalar::String(s), ColumnType::Date) => parse_date(s.trim())
            .or_else(|| parse_datetime(s.trim()).map(crate::column::days_from_ms))
            .map(ColumnValue::Date)
            .ok_or_else(mismatch)?,
        (Scalar::String(s), ColumnType::Datetime) => parse_datetime(s.trim())
            .map(ColumnValue::Datetime)
            .ok_or_else(mismatch)?,
        (Scalar::Integer(ms), ColumnType::Datetime) => ColumnValue::Datetime(*ms),
        (Scalar::Float(ms), ColumnType::Datetime) => ColumnValue::Datetime(*ms as i64),
        _ => return Err(mismatch()),
    };
    Ok(value)
}
