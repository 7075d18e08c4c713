//! Column types, cell values and the typed column container.
//!
//! A Column is an array-like random-access container indexed by integer.
//! Every value stored in it either matches the column's declared
//! [`ColumnType`] or is [`ColumnValue::Null`].

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Primitive column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    Datetime,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::String,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::Datetime,
    ];

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Datetime)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
        }
    }

    pub fn from_name(name: &str) -> Option<ColumnType> {
        ColumnType::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value.
///
/// Dates are days since the Unix epoch, datetimes are milliseconds since the
/// Unix epoch (UTC).
#[derive(Debug, Clone)]
pub enum ColumnValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Date(i32),
    Datetime(i64),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            ColumnValue::Integer(_) => Some(ColumnType::Integer),
            ColumnValue::Float(_) => Some(ColumnType::Float),
            ColumnValue::String(_) => Some(ColumnType::String),
            ColumnValue::Boolean(_) => Some(ColumnType::Boolean),
            ColumnValue::Date(_) => Some(ColumnType::Date),
            ColumnValue::Datetime(_) => Some(ColumnType::Datetime),
            ColumnValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(v) => Some(*v as f64),
            ColumnValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Milliseconds since the epoch for date and datetime values.
    pub fn as_epoch_ms(&self) -> Option<i64> {
        match self {
            ColumnValue::Date(d) => Some(*d as i64 * MS_PER_DAY),
            ColumnValue::Datetime(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, numbers compared
    /// numerically, dates and datetimes compared on the same time line.
    pub fn total_cmp(&self, other: &ColumnValue) -> Ordering {
        use ColumnValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Integer(a), Integer(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Datetime(a), Datetime(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => canonical(x).total_cmp(&canonical(y)),
                _ => match (a.as_epoch_ms(), b.as_epoch_ms()) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => a.type_rank().cmp(&b.type_rank()),
                },
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ColumnValue::Null => 0,
            ColumnValue::Boolean(_) => 1,
            ColumnValue::Integer(_) | ColumnValue::Float(_) => 2,
            ColumnValue::Date(_) | ColumnValue::Datetime(_) => 3,
            ColumnValue::String(_) => 4,
        }
    }

    /// JSON rendering used by every read shape. Dates and datetimes are ISO
    /// 8601 strings, non-finite floats become null.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ColumnValue::Integer(v) => JsonValue::from(*v),
            ColumnValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ColumnValue::String(v) => JsonValue::String(v.clone()),
            ColumnValue::Boolean(v) => JsonValue::Bool(*v),
            ColumnValue::Date(d) => JsonValue::String(format_date(*d)),
            ColumnValue::Datetime(ms) => JsonValue::String(format_datetime(*ms)),
            ColumnValue::Null => JsonValue::Null,
        }
    }

    /// Converts a JSON value into a value of the given column type.
    pub fn from_json(value: &JsonValue, column_type: ColumnType) -> Result<ColumnValue> {
        let mismatch = || {
            EngineError::SchemaMismatch(format!(
                "Type mismatch: expected {}, got {}",
                column_type, value
            ))
        };

        if value.is_null() {
            return Ok(ColumnValue::Null);
        }

        match column_type {
            ColumnType::Integer => match value {
                JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => Ok(ColumnValue::Integer(i)),
                    (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(ColumnValue::Integer(f as i64))
                    }
                    _ => Err(mismatch()),
                },
                JsonValue::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(ColumnValue::Integer)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ColumnType::Float => match value {
                JsonValue::Number(n) => n.as_f64().map(ColumnValue::Float).ok_or_else(mismatch),
                JsonValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(ColumnValue::Float)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ColumnType::String => match value {
                JsonValue::String(s) => Ok(ColumnValue::String(s.clone())),
                _ => Err(mismatch()),
            },
            ColumnType::Boolean => match value {
                JsonValue::Bool(b) => Ok(ColumnValue::Boolean(*b)),
                JsonValue::String(s) if s.eq_ignore_ascii_case("true") => {
                    Ok(ColumnValue::Boolean(true))
                }
                JsonValue::String(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(ColumnValue::Boolean(false))
                }
                _ => Err(mismatch()),
            },
            ColumnType::Date => match value {
                JsonValue::String(s) => parse_date(s.trim())
                    .or_else(|| parse_datetime(s.trim()).map(days_from_ms))
                    .map(ColumnValue::Date)
                    .ok_or_else(mismatch),
                JsonValue::Number(n) => n
                    .as_f64()
                    .map(|ms| ColumnValue::Date(days_from_ms(ms as i64)))
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ColumnType::Datetime => match value {
                JsonValue::String(s) => parse_datetime(s.trim())
                    .map(ColumnValue::Datetime)
                    .ok_or_else(mismatch),
                JsonValue::Number(n) => n
                    .as_f64()
                    .map(|ms| ColumnValue::Datetime(ms as i64))
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
        }
    }
}

// Equality is reflexive for floats (NaN == NaN) so values can key hash maps
// when building pivot trees.
/// Folds `-0.0` into `0.0` and every NaN into one positive NaN, so
/// ordering agrees with equality.
fn canonical(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

impl PartialEq for ColumnValue {
    fn eq(&self, other: &Self) -> bool {
        use ColumnValue::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (String(a), String(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Datetime(a), Datetime(b)) => a == b,
            (Null, Null) => true,
            _ => false,
        }
    }
}

impl Eq for ColumnValue {}

impl Hash for ColumnValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ColumnValue::Integer(v) => v.hash(state),
            ColumnValue::Float(v) => canonical(*v).to_bits().hash(state),
            ColumnValue::String(v) => v.hash(state),
            ColumnValue::Boolean(v) => v.hash(state),
            ColumnValue::Date(v) => v.hash(state),
            ColumnValue::Datetime(v) => v.hash(state),
            ColumnValue::Null => {}
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Integer(v) => write!(f, "{}", v),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::String(v) => f.write_str(v),
            ColumnValue::Boolean(v) => write!(f, "{}", v),
            ColumnValue::Date(d) => f.write_str(&format_date(*d)),
            ColumnValue::Datetime(ms) => f.write_str(&format_datetime(*ms)),
            ColumnValue::Null => f.write_str("null"),
        }
    }
}

/// Serialized with the same JSON rendering as every read shape.
impl Serialize for ColumnValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Untyped JSON scalars map onto the closest value; strings stay strings
/// until a column type coerces them.
impl<'de> Deserialize<'de> for ColumnValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match JsonValue::deserialize(deserializer)? {
            JsonValue::Null => Ok(ColumnValue::Null),
            JsonValue::Bool(b) => Ok(ColumnValue::Boolean(b)),
            JsonValue::String(s) => Ok(ColumnValue::String(s)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(ColumnValue::Integer(i)),
                None => Ok(ColumnValue::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            other => Err(serde::de::Error::custom(format!("expected a scalar, got {}", other))),
        }
    }
}

/// A named, typed column of values.
#[derive(Clone)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    values: Vec<ColumnValue>,
}

impl Column {
    pub fn new(name: String, column_type: ColumnType) -> Self {
        Column {
            name,
            column_type,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Validate a value against this column's type. Integers written to a
    /// float column are converted.
    pub fn validate_value(&self, value: ColumnValue) -> Result<ColumnValue> {
        match (value, self.column_type) {
            (ColumnValue::Null, _) => Ok(ColumnValue::Null),
            (ColumnValue::Integer(v), ColumnType::Float) => Ok(ColumnValue::Float(v as f64)),
            (value, expected) if value.column_type() == Some(expected) => Ok(value),
            (value, expected) => Err(EngineError::SchemaMismatch(format!(
                "Type mismatch in column '{}': expected {}, got {:?}",
                self.name, expected, value
            ))),
        }
    }

    pub fn get(&self, index: usize) -> Option<&ColumnValue> {
        self.values.get(index)
    }

    /// Fast numeric access for aggregation. `None` for nulls and
    /// non-numeric values.
    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.values.get(index).and_then(|v| v.as_f64())
    }

    #[inline]
    pub fn is_null_at(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(ColumnValue::Null) | None)
    }

    pub fn set(&mut self, index: usize, value: ColumnValue) -> Result<()> {
        let value = self.validate_value(value)?;
        let len = self.values.len();
        let slot = self.values.get_mut(index).ok_or_else(|| {
            EngineError::SchemaMismatch(format!("Index {} out of range [0, {})", index, len))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn push(&mut self, value: ColumnValue) -> Result<()> {
        let value = self.validate_value(value)?;
        self.values.push(value);
        Ok(())
    }

    /// Drops every row whose `keep` flag is false.
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.values.retain(|_| flags.next().copied().unwrap_or(true));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnValue> {
        self.values.iter()
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {}, len: {} }}",
            self.name,
            self.column_type,
            self.len()
        )
    }
}

// ============================================================================
// Date helpers
// ============================================================================

pub(crate) const MS_PER_DAY: i64 = 86_400_000;

/// Convert days since Unix epoch (1970-01-01) to (year, month, day)
pub(crate) fn ymd_from_days(days: i32) -> (i32, u32, u32) {
    // Algorithm from https://howardhinnant.github.io/date_algorithms.html
    let z = days + 719468;
    let era = if z >= 0 { z / 146097 } else { (z - 146096) / 146097 };
    let doe = (z - era * 146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = (yoe as i32) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

/// Convert (year, month, day) to days since Unix epoch
pub(crate) fn days_from_ymd(year: i32, month: u32, day: u32) -> i32 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y / 400 } else { (y - 399) / 400 };
    let yoe = (y - era * 400) as u32;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    (era * 146097 + doe as i32) - 719468
}

/// Day containing the given epoch millisecond, flooring for negatives.
pub(crate) fn days_from_ms(ms: i64) -> i32 {
    ms.div_euclid(MS_PER_DAY) as i32
}

/// 0 = Monday .. 6 = Sunday
pub(crate) fn weekday_from_days(days: i32) -> i32 {
    // 1970-01-01 was a Thursday
    (days + 3).rem_euclid(7)
}

/// Format a date (days since epoch) as ISO 8601 date string (YYYY-MM-DD)
pub(crate) fn format_date(days: i32) -> String {
    let (year, month, day) = ymd_from_days(days);
    format!("{:04}-{:02}-{:02}", year, month, day)
}

/// Format a datetime (milliseconds since epoch) as ISO 8601 datetime string
pub(crate) fn format_datetime(ms: i64) -> String {
    let days = days_from_ms(ms);
    let time_ms = ms.rem_euclid(MS_PER_DAY);

    let (year, month, day) = ymd_from_days(days);
    let hour = time_ms / 3_600_000;
    let minute = (time_ms % 3_600_000) / 60_000;
    let second = (time_ms % 60_000) / 1000;
    let millisecond = time_ms % 1000;

    if millisecond > 0 {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
            year, month, day, hour, minute, second, millisecond
        )
    } else {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        )
    }
}

/// Parse an ISO 8601 date string (YYYY-MM-DD) to days since epoch
pub(crate) fn parse_date(s: &str) -> Option<i32> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 || parts[0].is_empty() {
        return None;
    }
    let year: i32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let day: u32 = parts[2].parse().ok()?;

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    Some(days_from_ymd(year, month, day))
}

/// Parse an ISO 8601 datetime string (`T` or space separated, optional
/// fraction and trailing `Z`) to milliseconds since epoch. A bare date is
/// midnight.
pub(crate) fn parse_datetime(s: &str) -> Option<i64> {
    let (date_part, time_part) = match s.find(|c| c == 'T' || c == ' ') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => return parse_date(s).map(|d| d as i64 * MS_PER_DAY),
    };

    let days = parse_date(date_part)?;

    let time_part = time_part.trim_end_matches('Z');
    let (time_str, ms) = match time_part.split_once('.') {
        Some((time_str, frac)) => {
            if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let padded = format!("{:0<3}", &frac[..frac.len().min(3)]);
            (time_str, padded.parse::<i64>().ok()?)
        }
        None => (time_part, 0),
    };

    let time_parts: Vec<&str> = time_str.split(':').collect();
    if time_parts.len() < 2 {
        return None;
    }

    let hour: i64 = time_parts[0].parse().ok()?;
    let minute: i64 = time_parts[1].parse().ok()?;
    let second: i64 = match time_parts.get(2) {
        Some(s) => s.parse().ok()?,
        None => 0,
    };

    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    Some(days as i64 * MS_PER_DAY + hour * 3_600_000 + minute * 60_000 + second * 1000 + ms)
}
