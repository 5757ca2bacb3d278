//! Tabular values: data frames, series, row indexers and group-bys.
//!
//! Everything here implements [`Tabular`], the single capability the guard
//! checks for when deciding that a value is table-like. None of it knows
//! where the data came from.

mod accessor;
mod frame;
mod groupby;
mod indexer;
mod series;

use std::any::Any;
use std::cmp::Ordering;

pub use frame::{DataFrame, FrameData};
pub use series::{Series, SeriesData};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::ops;
use super::value::Value;
use crate::error::SandboxError;

/// A value that is indexable, iterable and attribute-bearing.
pub trait Tabular {
    /// Type name shown to guest code (`DataFrame`, `Series`, ...).
    fn kind(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attribute or bound method; `None` when the attribute does not exist.
    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError>;

    fn get_item(&self, key: &Value) -> Result<Value, SandboxError>;

    fn set_item(&self, _key: &Value, _value: Value) -> Result<(), SandboxError> {
        Err(SandboxError::type_error(format!(
            "'{}' object does not support item assignment",
            self.kind()
        )))
    }

    fn iter_values(&self) -> Result<Vec<Value>, SandboxError>;

    fn contains(&self, item: &Value) -> Result<bool, SandboxError>;

    fn render(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

pub fn as_series(value: &Value) -> Option<Series> {
    match value {
        Value::Table(t) => t.as_any().downcast_ref::<Series>().cloned(),
        _ => None,
    }
}

pub fn as_frame(value: &Value) -> Option<DataFrame> {
    match value {
        Value::Table(t) => t.as_any().downcast_ref::<DataFrame>().cloned(),
        _ => None,
    }
}

/// Missing value: `None` or NaN.
pub fn is_na(value: &Value) -> bool {
    match value {
        Value::None => true,
        Value::Float(f) => f.is_nan(),
        _ => false,
    }
}

pub(crate) fn no_attribute(kind: &str, name: &str) -> SandboxError {
    SandboxError::attribute_error(format!("'{kind}' object has no attribute '{name}'"))
}

/// Values of a list-like argument (list, tuple, set or series).
pub(crate) fn list_like(value: &Value, what: &str) -> Result<Vec<Value>, SandboxError> {
    match value {
        Value::List(items) | Value::Set(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => match as_series(other) {
            Some(series) => Ok(series.values()),
            None => Err(SandboxError::type_error(format!(
                "{what} requires a list-like argument, not {}",
                other.kind()
            ))),
        },
    }
}

/// Column labels given as a single string or a list of strings.
pub(crate) fn labels(value: &Value, what: &str) -> Result<Vec<String>, SandboxError> {
    match value {
        Value::Str(s) => Ok(vec![s.to_string()]),
        other => list_like(other, what)?
            .iter()
            .map(|v| v.expect_str(what).map(|s| s.to_string()))
            .collect(),
    }
}

/// Sort permutation placing missing values last whatever the direction.
pub(crate) fn sort_positions(keys: &[Value], ascending: bool) -> Result<Vec<usize>, SandboxError> {
    let (missing, present): (Vec<usize>, Vec<usize>) =
        (0..keys.len()).partition(|&i| is_na(&keys[i]));
    let present_keys: Vec<Value> = present.iter().map(|&i| keys[i].clone()).collect();
    let order = ops::sort_order(&present_keys, !ascending)?;
    Ok(order
        .into_iter()
        .map(|i| present[i])
        .chain(missing)
        .collect())
}

// ── aggregation ─────────────────────────────────────────

fn present(values: &[Value]) -> impl Iterator<Item = &Value> {
    values.iter().filter(|v| !is_na(v))
}

pub(crate) fn agg_sum(values: &[Value]) -> Result<Value, SandboxError> {
    let mut items = present(values);
    let Some(first) = items.next() else {
        return Ok(Value::Int(0));
    };
    items.try_fold(first.clone(), |acc, v| ops::binary(BinOp::Add, &acc, v))
}

pub(crate) fn agg_mean(values: &[Value]) -> Result<Value, SandboxError> {
    let count = present(values).count();
    if count == 0 {
        return Ok(Value::Float(f64::NAN));
    }
    let total = agg_sum(values)?;
    ops::binary(BinOp::Div, &total, &Value::Int(count as i64))
}

pub(crate) fn agg_median(values: &[Value]) -> Result<Value, SandboxError> {
    let mut numbers = present(values)
        .map(|v| v.expect_f64("median"))
        .collect::<Result<Vec<f64>, _>>()?;
    if numbers.is_empty() {
        return Ok(Value::Float(f64::NAN));
    }
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = numbers.len() / 2;
    Ok(Value::Float(if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    }))
}

fn agg_extreme(values: &[Value], want: Ordering) -> Result<Value, SandboxError> {
    let mut best: Option<&Value> = None;
    for v in present(values) {
        best = match best {
            None => Some(v),
            Some(b) => match ops::compare_values(v, b)? {
                Some(o) if o == want => Some(v),
                _ => Some(b),
            },
        };
    }
    Ok(best.cloned().unwrap_or(Value::Float(f64::NAN)))
}

pub(crate) fn agg_min(values: &[Value]) -> Result<Value, SandboxError> {
    agg_extreme(values, Ordering::Less)
}

pub(crate) fn agg_max(values: &[Value]) -> Result<Value, SandboxError> {
    agg_extreme(values, Ordering::Greater)
}

pub(crate) fn agg_count(values: &[Value]) -> Value {
    Value::Int(present(values).count() as i64)
}

/// Named reduction as accepted by `agg("sum")` and the group-by methods.
pub(crate) fn aggregate(name: &str, values: &[Value]) -> Result<Value, SandboxError> {
    match name {
        "sum" => agg_sum(values),
        "mean" => agg_mean(values),
        "median" => agg_median(values),
        "min" => agg_min(values),
        "max" => agg_max(values),
        "count" => Ok(agg_count(values)),
        "size" => Ok(Value::Int(values.len() as i64)),
        "first" => Ok(present(values).next().cloned().unwrap_or(Value::None)),
        "last" => Ok(present(values).last().cloned().unwrap_or(Value::None)),
        "nunique" => Ok(Value::Int(unique(values, true).len() as i64)),
        other => Err(SandboxError::attribute_error(format!(
            "'{other}' is not a valid function for aggregation"
        ))),
    }
}

pub(crate) fn unique(values: &[Value], skip_na: bool) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in values {
        if skip_na && is_na(v) {
            continue;
        }
        if !out.iter().any(|u| ops::equals(u, v)) {
            out.push(v.clone());
        }
    }
    out
}

pub(crate) fn is_numeric_column(values: &[Value]) -> bool {
    let mut any = false;
    for v in values {
        match v {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => any = true,
            Value::None => {}
            _ => return false,
        }
    }
    any || values.is_empty()
}

pub(crate) fn dtype(values: &[Value]) -> &'static str {
    let present: Vec<&Value> = present(values).collect();
    if present.is_empty() {
        return if values.is_empty() { "object" } else { "float64" };
    }
    if present.iter().all(|v| matches!(v, Value::Bool(_))) {
        "bool"
    } else if present.iter().all(|v| matches!(v, Value::Int(_))) && present.len() == values.len() {
        "int64"
    } else if present.iter().all(|v| v.is_number()) {
        "float64"
    } else if present.iter().all(|v| matches!(v, Value::DateTime(_))) {
        "datetime64[ns]"
    } else {
        "object"
    }
}

// ── operator dispatch ───────────────────────────────────

fn elementwise<F>(a: &Value, b: &Value, f: F) -> Option<Result<Value, SandboxError>>
where
    F: Fn(&Value, &Value) -> Result<Value, SandboxError>,
{
    let (left, right) = (as_series(a), as_series(b));
    let template = left.clone().or_else(|| right.clone())?;
    let n = template.len();
    let lhs = match &left {
        Some(s) => s.values(),
        None => vec![a.clone(); n],
    };
    let rhs = match &right {
        Some(s) => s.values(),
        None => match b {
            Value::List(items) if left.is_some() => items.borrow().clone(),
            _ => vec![b.clone(); n],
        },
    };
    if lhs.len() != rhs.len() {
        return Some(Err(SandboxError::value_error(
            "Can only compare identically-labeled Series objects",
        )));
    }
    let result: Result<Vec<Value>, SandboxError> =
        lhs.iter().zip(&rhs).map(|(x, y)| f(x, y)).collect();
    Some(result.map(|values| template.derive(values).into_value()))
}

/// Elementwise arithmetic when either operand is a series.
pub fn binary(op: BinOp, a: &Value, b: &Value) -> Option<Result<Value, SandboxError>> {
    if as_frame(a).is_some() || as_frame(b).is_some() {
        return Some(Err(SandboxError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.kind(),
            b.kind()
        ))));
    }
    elementwise(a, b, |x, y| {
        if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
            let (x, y) = (ops::truthy(x).unwrap_or(false), ops::truthy(y).unwrap_or(false));
            let both = if op == BinOp::BitAnd { x && y } else { x || y };
            return Ok(Value::Bool(both));
        }
        if is_na(x) || is_na(y) {
            return Ok(Value::Float(f64::NAN));
        }
        ops::binary(op, x, y)
    })
}

/// Elementwise comparison when either operand is a series.
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Option<Result<Value, SandboxError>> {
    if matches!(op, CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot) {
        return None;
    }
    if as_series(a).map(|s| s.is_index()).unwrap_or(false) && b.as_str().is_none() {
        return None;
    }
    elementwise(a, b, |x, y| {
        if is_na(x) || is_na(y) {
            return Ok(Value::Bool(op == CmpOp::NotEq));
        }
        ops::compare(op, x, y)
    })
}

pub fn unary(op: UnaryOp, value: &Value) -> Option<Result<Value, SandboxError>> {
    if op == UnaryOp::Not {
        return None;
    }
    let series = as_series(value)?;
    let result: Result<Vec<Value>, SandboxError> = series
        .values()
        .iter()
        .map(|v| match (op, v) {
            (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (_, v) if is_na(v) => Ok(v.clone()),
            (op, v) => ops::unary(op, v),
        })
        .collect();
    Some(result.map(|values| series.derive(values).into_value()))
}

/// Boolean mask positions; missing entries count as false.
pub(crate) fn mask_positions(mask: &[Value], len: usize) -> Result<Vec<usize>, SandboxError> {
    if mask.len() != len {
        return Err(SandboxError::value_error(format!(
            "Item wrong length {} instead of {len}.",
            mask.len()
        )));
    }
    let mut out = Vec::new();
    for (i, v) in mask.iter().enumerate() {
        match v {
            Value::Bool(true) => out.push(i),
            Value::Bool(false) | Value::None => {}
            Value::Float(f) if f.is_nan() => {}
            other => {
                return Err(SandboxError::type_error(format!(
                    "boolean mask must contain booleans, not {}",
                    other.kind()
                )))
            }
        }
    }
    Ok(out)
}

pub(crate) fn is_mask(value: &Value) -> bool {
    match value {
        Value::List(items) => {
            let items = items.borrow();
            !items.is_empty() && items.iter().all(|v| matches!(v, Value::Bool(_)))
        }
        other => as_series(other)
            .map(|s| {
                let values = s.values();
                !s.is_index()
                    && values
                        .iter()
                        .all(|v| matches!(v, Value::Bool(_)) || is_na(v))
            })
            .unwrap_or(false),
    }
}

fn pad_cell(text: &str, width: usize, left: bool) -> String {
    if left {
        format!("{text:<width$}")
    } else {
        format!("{text:>width$}")
    }
}

/// Plain-text grid with a header row; the first column is left-aligned.
pub(crate) fn render_grid(header: &[String], rows: &[Vec<String>]) -> String {
    let columns = header.len();
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(columns) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let line = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| pad_cell(c, widths[i], i == 0))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = vec![line(header)];
    out.extend(rows.iter().map(|r| line(r)));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<Value>) -> Value {
        Series::from_values(Some(Value::str("amount")), values).into_value()
    }

    #[test]
    fn test_aggregations_skip_missing() {
        let values = vec![Value::Int(2), Value::None, Value::Float(3.5)];
        assert_eq!(agg_sum(&values).unwrap(), Value::Float(5.5));
        assert_eq!(agg_count(&values), Value::Int(2));
        assert_eq!(agg_max(&values).unwrap(), Value::Float(3.5));
        assert_eq!(agg_mean(&values).unwrap(), Value::Float(2.75));
        assert_eq!(agg_sum(&[]).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_elementwise_comparison_builds_mask() {
        let s = series(vec![Value::Int(5), Value::Int(50), Value::None]);
        let mask = compare(CmpOp::Gt, &s, &Value::Int(10)).unwrap().unwrap();
        let mask = as_series(&mask).unwrap().values();
        assert_eq!(
            mask,
            vec![Value::Bool(false), Value::Bool(true), Value::Bool(false)]
        );
    }

    #[test]
    fn test_mask_combination_and_inversion() {
        let a = series(vec![Value::Bool(true), Value::Bool(false)]);
        let b = series(vec![Value::Bool(true), Value::Bool(true)]);
        let both = binary(BinOp::BitAnd, &a, &b).unwrap().unwrap();
        assert_eq!(
            as_series(&both).unwrap().values(),
            vec![Value::Bool(true), Value::Bool(false)]
        );
        let inverted = unary(UnaryOp::Invert, &a).unwrap().unwrap();
        assert_eq!(
            as_series(&inverted).unwrap().values(),
            vec![Value::Bool(false), Value::Bool(true)]
        );
    }

    #[test]
    fn test_scalar_arithmetic_propagates_missing() {
        let s = series(vec![Value::Int(2), Value::None]);
        let doubled = binary(BinOp::Mul, &s, &Value::Int(2)).unwrap().unwrap();
        let values = as_series(&doubled).unwrap().values();
        assert_eq!(values[0], Value::Int(4));
        assert!(is_na(&values[1]));
    }

    #[test]
    fn test_sort_positions_puts_missing_last() {
        let keys = vec![Value::Int(3), Value::None, Value::Int(1)];
        assert_eq!(sort_positions(&keys, true).unwrap(), vec![2, 0, 1]);
        assert_eq!(sort_positions(&keys, false).unwrap(), vec![0, 2, 1]);
    }

    #[test]
    fn test_mask_length_must_match() {
        let err = mask_positions(&[Value::Bool(true)], 2).unwrap_err();
        assert!(err.to_string().contains("Item wrong length"));
    }

    #[test]
    fn test_dtype_inference() {
        assert_eq!(dtype(&[Value::Int(1), Value::Int(2)]), "int64");
        assert_eq!(dtype(&[Value::Int(1), Value::Float(2.0)]), "float64");
        assert_eq!(dtype(&[Value::str("a")]), "object");
    }
}
