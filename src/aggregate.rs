//! Aggregate functions and their mergeable accumulators.
//!
//! Pivot leaves accumulate raw cell values; internal nodes merge their
//! children's accumulators. Every state keeps enough information to merge
//! exactly, so `avg` carries `(sum, count)` and `median` carries its values.
//! All aggregates ignore nulls.

use crate::column::{ColumnType, ColumnValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    SumAbs,
    Product,
    Count,
    Avg,
    Median,
    Min,
    Max,
    First,
    Last,
    AnyValue,
    DistinctCount,
    Unique,
    StringAgg,
}

impl Aggregate {
    pub const ALL: [Aggregate; 14] = [
        Aggregate::Sum,
        Aggregate::SumAbs,
        Aggregate::Product,
        Aggregate::Count,
        Aggregate::Avg,
        Aggregate::Median,
        Aggregate::Min,
        Aggregate::Max,
        Aggregate::First,
        Aggregate::Last,
        Aggregate::AnyValue,
        Aggregate::DistinctCount,
        Aggregate::Unique,
        Aggregate::StringAgg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::SumAbs => "sum abs",
            Aggregate::Product => "product",
            Aggregate::Count => "count",
            Aggregate::Avg => "avg",
            Aggregate::Median => "median",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::First => "first",
            Aggregate::Last => "last",
            Aggregate::AnyValue => "any_value",
            Aggregate::DistinctCount => "distinct count",
            Aggregate::Unique => "unique",
            Aggregate::StringAgg => "string_agg",
        }
    }

    /// Parses an aggregate name, accepting the `mean` and `arbitrary`
    /// aliases.
    pub fn from_name(name: &str) -> Option<Aggregate> {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "mean" => Some(Aggregate::Avg),
            "arbitrary" => Some(Aggregate::AnyValue),
            "distinct_count" => Some(Aggregate::DistinctCount),
            _ => Aggregate::ALL.iter().copied().find(|a| a.name() == name),
        }
    }

    pub fn default_for(column_type: ColumnType) -> Aggregate {
        if column_type.is_numeric() {
            Aggregate::Sum
        } else {
            Aggregate::Count
        }
    }

    pub fn is_numeric_only(self) -> bool {
        matches!(
            self,
            Aggregate::Sum | Aggregate::SumAbs | Aggregate::Product | Aggregate::Avg | Aggregate::Median
        )
    }

    pub fn valid_for(self, column_type: ColumnType) -> bool {
        !self.is_numeric_only() || column_type.is_numeric()
    }

    /// Aggregates valid for columns of `column_type`.
    pub fn for_type(column_type: ColumnType) -> Vec<Aggregate> {
        Aggregate::ALL
            .iter()
            .copied()
            .filter(|a| a.valid_for(column_type))
            .collect()
    }

    pub fn output_type(self, input: ColumnType) -> ColumnType {
        match self {
            Aggregate::Count | Aggregate::DistinctCount => ColumnType::Integer,
            Aggregate::SumAbs | Aggregate::Product | Aggregate::Avg | Aggregate::Median => ColumnType::Float,
            Aggregate::Sum if input == ColumnType::Integer => ColumnType::Integer,
            Aggregate::Sum => ColumnType::Float,
            Aggregate::StringAgg => ColumnType::String,
            _ => input,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Aggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Aggregate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Aggregate::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown aggregate '{}'", name)))
    }
}

/// Running state of one aggregate over a set of rows.
#[derive(Debug, Clone)]
pub(crate) enum AggState {
    Sum { ints: i128, floats: f64, count: usize },
    SumAbs { total: f64, count: usize },
    Product { product: f64, count: usize },
    Count(usize),
    Avg { sum: f64, count: usize },
    Median(Vec<f64>),
    Min(Option<ColumnValue>),
    Max(Option<ColumnValue>),
    First(Option<(usize, ColumnValue)>),
    Last(Option<(usize, ColumnValue)>),
    AnyValue(Option<ColumnValue>),
    DistinctCount(HashSet<ColumnValue>),
    Unique { value: Option<ColumnValue>, mixed: bool },
    StringAgg(Vec<(usize, String)>),
}

impl AggState {
    pub fn new(aggregate: Aggregate) -> AggState {
        match aggregate {
            Aggregate::Sum => AggState::Sum { ints: 0, floats: 0.0, count: 0 },
            Aggregate::SumAbs => AggState::SumAbs { total: 0.0, count: 0 },
            Aggregate::Product => AggState::Product { product: 1.0, count: 0 },
            Aggregate::Count => AggState::Count(0),
            Aggregate::Avg => AggState::Avg { sum: 0.0, count: 0 },
            Aggregate::Median => AggState::Median(Vec::new()),
            Aggregate::Min => AggState::Min(None),
            Aggregate::Max => AggState::Max(None),
            Aggregate::First => AggState::First(None),
            Aggregate::Last => AggState::Last(None),
            Aggregate::AnyValue => AggState::AnyValue(None),
            Aggregate::DistinctCount => AggState::DistinctCount(HashSet::new()),
            Aggregate::Unique => AggState::Unique { value: None, mixed: false },
            Aggregate::StringAgg => AggState::StringAgg(Vec::new()),
        }
    }

    /// Adds the value of table row `row`. Rows must be pushed in ascending
    /// order within one state.
    pub fn push(&mut self, row: usize, value: &ColumnValue) {
        if value.is_null() {
            return;
        }
        match self {
            AggState::Sum { ints, floats, count } => {
                match value {
                    ColumnValue::Integer(v) => *ints += *v as i128,
                    v => *floats += v.as_f64().unwrap_or(0.0),
                }
                *count += 1;
            }
            AggState::SumAbs { total, count } => {
                *total += value.as_f64().map(f64::abs).unwrap_or(0.0);
                *count += 1;
            }
            AggState::Product { product, count } => {
                *product *= value.as_f64().unwrap_or(1.0);
                *count += 1;
            }
            AggState::Count(count) => *count += 1,
            AggState::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
            AggState::Median(values) => values.extend(value.as_f64()),
            AggState::Min(current) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c).is_lt()) {
                    *current = Some(value.clone());
                }
            }
            AggState::Max(current) => {
                if current.as_ref().map_or(true, |c| value.total_cmp(c).is_gt()) {
                    *current = Some(value.clone());
                }
            }
            AggState::First(current) => {
                if current.is_none() {
                    *current = Some((row, value.clone()));
                }
            }
            AggState::Last(current) => *current = Some((row, value.clone())),
            AggState::AnyValue(current) => {
                if current.is_none() {
                    *current = Some(value.clone());
                }
            }
            AggState::DistinctCount(seen) => {
                seen.insert(value.clone());
            }
            AggState::Unique { value: current, mixed } => match current {
                None => *current = Some(value.clone()),
                Some(c) if *c != *value => *mixed = true,
                _ => {}
            },
            AggState::StringAgg(parts) => parts.push((row, value.to_string())),
        }
    }

    /// Folds `other` (covering a disjoint set of rows) into `self`.
    pub fn merge(&mut self, other: &AggState) {
        match (self, other) {
            (
                AggState::Sum { ints, floats, count },
                AggState::Sum { ints: i, floats: f, count: c },
            ) => {
                *ints += i;
                *floats += f;
                *count += c;
            }
            (AggState::SumAbs { total, count }, AggState::SumAbs { total: t, count: c }) => {
                *total += t;
                *count += c;
            }
            (AggState::Product { product, count }, AggState::Product { product: p, count: c }) => {
                *product *= p;
                *count += c;
            }
            (AggState::Count(count), AggState::Count(c)) => *count += c,
            (AggState::Avg { sum, count }, AggState::Avg { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (AggState::Median(values), AggState::Median(other)) => values.extend_from_slice(other),
            (AggState::Min(current), AggState::Min(Some(v))) => {
                if current.as_ref().map_or(true, |c| v.total_cmp(c).is_lt()) {
                    *current = Some(v.clone());
                }
            }
            (AggState::Max(current), AggState::Max(Some(v))) => {
                if current.as_ref().map_or(true, |c| v.total_cmp(c).is_gt()) {
                    *current = Some(v.clone());
                }
            }
            (AggState::First(current), AggState::First(Some((row, v)))) => {
                if current.as_ref().map_or(true, |(r, _)| row < r) {
                    *current = Some((*row, v.clone()));
                }
            }
            (AggState::Last(current), AggState::Last(Some((row, v)))) => {
                if current.as_ref().map_or(true, |(r, _)| row > r) {
                    *current = Some((*row, v.clone()));
                }
            }
            (AggState::AnyValue(current), AggState::AnyValue(Some(v))) => {
                if current.is_none() {
                    *current = Some(v.clone());
                }
            }
            (AggState::DistinctCount(seen), AggState::DistinctCount(other)) => {
                seen.extend(other.iter().cloned());
            }
            (
                AggState::Unique { value, mixed },
                AggState::Unique { value: other, mixed: other_mixed },
            ) => {
                *mixed |= *other_mixed;
                if let Some(v) = other {
                    match value {
                        None => *value = Some(v.clone()),
                        Some(a) if *a != *v => *mixed = true,
                        _ => {}
                    }
                }
            }
            (AggState::StringAgg(parts), AggState::StringAgg(other)) => {
                parts.extend(other.iter().cloned());
            }
            _ => {}
        }
    }

    /// Final value for a column whose cells have type `input`.
    pub fn finish(&self, input: ColumnType) -> ColumnValue {
        match self {
            AggState::Sum { count: 0, .. } => ColumnValue::Null,
            AggState::Sum { ints, floats, .. } => {
                if input == ColumnType::Integer {
                    match i64::try_from(*ints) {
                        Ok(v) => ColumnValue::Integer(v),
                        Err(_) => ColumnValue::Null,
                    }
                } else {
                    float(*floats + *ints as f64)
                }
            }
            AggState::SumAbs { count: 0, .. }
            | AggState::Product { count: 0, .. }
            | AggState::Avg { count: 0, .. } => ColumnValue::Null,
            AggState::SumAbs { total, .. } => float(*total),
            AggState::Product { product, .. } => float(*product),
            AggState::Avg { sum, count } => float(*sum / *count as f64),
            AggState::Count(count) => ColumnValue::Integer(*count as i64),
            AggState::Median(values) => median(values),
            AggState::Min(v) | AggState::Max(v) | AggState::AnyValue(v) => {
                v.clone().unwrap_or(ColumnValue::Null)
            }
            AggState::First(v) | AggState::Last(v) => {
                v.as_ref().map(|(_, v)| v.clone()).unwrap_or(ColumnValue::Null)
            }
            AggState::DistinctCount(seen) => ColumnValue::Integer(seen.len() as i64),
            AggState::Unique { value: Some(v), mixed: false } => v.clone(),
            AggState::Unique { .. } => ColumnValue::Null,
            AggState::StringAgg(parts) if parts.is_empty() => ColumnValue::Null,
            AggState::StringAgg(parts) => {
                let mut parts = parts.clone();
                parts.sort_by_key(|(row, _)| *row);
                let joined: Vec<String> = parts.into_iter().map(|(_, s)| s).collect();
                ColumnValue::String(joined.join(", "))
            }
        }
    }
}

fn float(v: f64) -> ColumnValue {
    if v.is_finite() {
        ColumnValue::Float(v)
    } else {
        ColumnValue::Null
    }
}

fn median(values: &[f64]) -> ColumnValue {
    if values.is_empty() {
        return ColumnValue::Null;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        float((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        float(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(aggregate: Aggregate, input: ColumnType, values: &[ColumnValue]) -> ColumnValue {
        let mut state = AggState::new(aggregate);
        for (row, v) in values.iter().enumerate() {
            state.push(row, v);
        }
        state.finish(input)
    }

    /// Accumulate in two halves and merge, as a pivot parent does.
    fn run_merged(aggregate: Aggregate, input: ColumnType, values: &[ColumnValue], split: usize) -> ColumnValue {
        let mut left = AggState::new(aggregate);
        let mut right = AggState::new(aggregate);
        for (row, v) in values.iter().enumerate() {
            if row < split {
                left.push(row, v);
            } else {
                right.push(row, v);
            }
        }
        let mut total = AggState::new(aggregate);
        total.merge(&right);
        total.merge(&left);
        total.finish(input)
    }

    fn floats(values: &[f64]) -> Vec<ColumnValue> {
        values.iter().map(|v| ColumnValue::Float(*v)).collect()
    }

    #[test]
    fn test_names_and_aliases() {
        for aggregate in Aggregate::ALL {
            assert_eq!(Aggregate::from_name(aggregate.name()), Some(aggregate));
        }
        assert_eq!(Aggregate::from_name("mean"), Some(Aggregate::Avg));
        assert_eq!(Aggregate::from_name("arbitrary"), Some(Aggregate::AnyValue));
        assert_eq!(Aggregate::from_name("Distinct Count"), Some(Aggregate::DistinctCount));
        assert_eq!(Aggregate::from_name("geomean"), None);

        let json = serde_json::to_string(&Aggregate::SumAbs).unwrap();
        assert_eq!(json, "\"sum abs\"");
    }

    #[test]
    fn test_type_rules() {
        assert_eq!(Aggregate::default_for(ColumnType::Float), Aggregate::Sum);
        assert_eq!(Aggregate::default_for(ColumnType::Date), Aggregate::Count);
        assert!(!Aggregate::Avg.valid_for(ColumnType::String));
        assert!(Aggregate::Max.valid_for(ColumnType::Datetime));
        assert_eq!(Aggregate::Sum.output_type(ColumnType::Integer), ColumnType::Integer);
        assert_eq!(Aggregate::Avg.output_type(ColumnType::Integer), ColumnType::Float);
        assert_eq!(Aggregate::Count.output_type(ColumnType::String), ColumnType::Integer);
        assert_eq!(Aggregate::Min.output_type(ColumnType::Date), ColumnType::Date);
    }

    #[test]
    fn test_sum_and_count_ignore_nulls() {
        let values = vec![ColumnValue::Integer(2), ColumnValue::Null, ColumnValue::Integer(5)];
        assert_eq!(run(Aggregate::Sum, ColumnType::Integer, &values), ColumnValue::Integer(7));
        assert_eq!(run(Aggregate::Count, ColumnType::Integer, &values), ColumnValue::Integer(2));
        assert_eq!(run(Aggregate::Sum, ColumnType::Integer, &[ColumnValue::Null]), ColumnValue::Null);
        assert_eq!(run(Aggregate::Count, ColumnType::Integer, &[]), ColumnValue::Integer(0));
    }

    #[test]
    fn test_avg_merges_sum_and_count() {
        // Unequal group sizes: mean of means would be (1 + 10) / 2 = 5.5.
        let values = floats(&[1.0, 10.0, 10.0, 10.0]);
        assert_eq!(run_merged(Aggregate::Avg, ColumnType::Float, &values, 1), ColumnValue::Float(7.75));
    }

    #[test]
    fn test_median_and_distinct_merge() {
        let values = floats(&[5.0, 1.0, 3.0, 3.0, 9.0, 7.0]);
        assert_eq!(run_merged(Aggregate::Median, ColumnType::Float, &values, 2), ColumnValue::Float(4.0));
        assert_eq!(
            run_merged(Aggregate::DistinctCount, ColumnType::Float, &values, 3),
            ColumnValue::Integer(5)
        );
    }

    #[test]
    fn test_order_sensitive_aggregates() {
        let values = vec![
            ColumnValue::Null,
            ColumnValue::String("b".to_string()),
            ColumnValue::String("a".to_string()),
            ColumnValue::String("c".to_string()),
        ];
        let input = ColumnType::String;
        assert_eq!(run_merged(Aggregate::First, input, &values, 2), ColumnValue::String("b".to_string()));
        assert_eq!(run_merged(Aggregate::Last, input, &values, 2), ColumnValue::String("c".to_string()));
        assert_eq!(run_merged(Aggregate::Min, input, &values, 2), ColumnValue::String("a".to_string()));
        assert_eq!(
            run_merged(Aggregate::StringAgg, input, &values, 3),
            ColumnValue::String("b, a, c".to_string())
        );
    }

    #[test]
    fn test_unique() {
        let same = vec![ColumnValue::Integer(4), ColumnValue::Null, ColumnValue::Integer(4)];
        assert_eq!(run_merged(Aggregate::Unique, ColumnType::Integer, &same, 1), ColumnValue::Integer(4));
        let mixed = vec![ColumnValue::Integer(4), ColumnValue::Integer(5)];
        assert_eq!(run_merged(Aggregate::Unique, ColumnType::Integer, &mixed, 1), ColumnValue::Null);
    }

    #[test]
    fn test_numeric_variants() {
        let values = floats(&[-2.0, 3.0]);
        assert_eq!(run(Aggregate::SumAbs, ColumnType::Float, &values), ColumnValue::Float(5.0));
        assert_eq!(run(Aggregate::Product, ColumnType::Float, &values), ColumnValue::Float(-6.0));
        assert_eq!(run(Aggregate::Sum, ColumnType::Float, &values), ColumnValue::Float(1.0));
    }
}
