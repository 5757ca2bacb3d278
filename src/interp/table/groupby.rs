use std::any::Any;

use super::frame::{DataFrame, FrameData};
use super::series::{range_index, Series, SeriesData};
use super::{aggregate, is_na, is_numeric_column, sort_positions, Tabular};
use crate::error::SandboxError;
use crate::interp::eval::Interpreter;
use crate::interp::ops;
use crate::interp::value::{Args, Value};

/// `df.groupby(keys)`, optionally narrowed to some columns.
#[derive(Clone)]
pub struct GroupBy {
    frame: DataFrame,
    keys: Vec<String>,
    selection: Option<Vec<String>>,
    /// Selected with a single label, so results are series.
    single: bool,
    as_index: bool,
}

struct Group {
    key: Value,
    rows: Vec<usize>,
}

const REDUCERS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "size", "first", "last", "nunique",
];

const METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "size", "first", "last", "nunique", "agg",
    "aggregate", "get_group",
];

impl GroupBy {
    pub fn new(frame: DataFrame, keys: Vec<String>, as_index: bool) -> Self {
        GroupBy {
            frame,
            keys,
            selection: None,
            single: false,
            as_index,
        }
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    fn select(&self, columns: Vec<String>, single: bool) -> Result<Value, SandboxError> {
        {
            let data = self.frame.data();
            for column in &columns {
                if data.column_position(column).is_none() {
                    return Err(SandboxError::key_error(format!("Column not found: {column}")));
                }
            }
        }
        Ok(GroupBy {
            selection: Some(columns),
            single,
            ..self.clone()
        }
        .into_value())
    }

    /// Groups in sorted key order; rows whose key is missing are dropped.
    fn groups(&self) -> Result<Vec<Group>, SandboxError> {
        let data = self.frame.data();
        let key_columns: Vec<&[Value]> = self
            .keys
            .iter()
            .filter_map(|k| data.column(k))
            .collect();
        let mut groups: Vec<Group> = Vec::new();
        for r in 0..data.nrows() {
            let parts: Vec<Value> = key_columns.iter().map(|c| c[r].clone()).collect();
            if parts.iter().any(is_na) {
                continue;
            }
            let key = if parts.len() == 1 {
                parts.into_iter().next().unwrap_or(Value::None)
            } else {
                Value::tuple(parts)
            };
            match groups.iter_mut().find(|g| ops::equals(&g.key, &key)) {
                Some(group) => group.rows.push(r),
                None => groups.push(Group { key, rows: vec![r] }),
            }
        }
        let keys: Vec<Value> = groups.iter().map(|g| g.key.clone()).collect();
        let order = sort_positions(&keys, true)?;
        let mut slots: Vec<Option<Group>> = groups.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    fn value_columns(&self, data: &FrameData) -> Vec<String> {
        match &self.selection {
            Some(columns) => columns.clone(),
            None => data
                .columns
                .iter()
                .filter(|c| !self.keys.contains(c))
                .cloned()
                .collect(),
        }
    }

    fn shape_result(&self, groups: &[Group], columns: Vec<(String, Vec<Value>)>) -> Value {
        let index: Vec<Value> = groups.iter().map(|g| g.key.clone()).collect();
        if self.single && columns.len() == 1 {
            let (name, values) = columns.into_iter().next().unwrap_or_default();
            let series = Series::new(SeriesData {
                name: Some(Value::str(&name)),
                index,
                index_names: self.keys.clone(),
                values,
            });
            if self.as_index {
                return series.into_value();
            }
            let mut all = FrameData::index_columns(&series.data().index, &self.keys);
            all.push((name, series.values()));
            return DataFrame::new(FrameData::from_columns(all)).into_value();
        }
        let mut frame = if self.as_index {
            let mut frame = FrameData::from_columns(columns);
            frame.index = index;
            frame
        } else {
            let mut all = FrameData::index_columns(&index, &self.keys);
            all.extend(columns);
            FrameData::from_columns(all)
        };
        if self.as_index {
            frame.index_names = self.keys.clone();
        } else {
            frame.index = range_index(groups.len());
        }
        DataFrame::new(frame).into_value()
    }

    fn reduce(&self, name: &str) -> Result<Value, SandboxError> {
        let groups = self.groups()?;
        if name == "size" {
            let sizes = groups.iter().map(|g| Value::Int(g.rows.len() as i64)).collect();
            let index: Vec<Value> = groups.iter().map(|g| g.key.clone()).collect();
            if !self.as_index {
                let mut all = FrameData::index_columns(&index, &self.keys);
                all.push(("size".to_string(), sizes));
                return Ok(DataFrame::new(FrameData::from_columns(all)).into_value());
            }
            return Ok(Series::new(SeriesData {
                name: None,
                index,
                index_names: self.keys.clone(),
                values: sizes,
            })
            .into_value());
        }
        let data = self.frame.data();
        let numeric_only = matches!(name, "sum" | "mean" | "median") && !self.single;
        let mut columns = Vec::new();
        for column in self.value_columns(&data) {
            let Some(values) = data.column(&column) else {
                continue;
            };
            if numeric_only && !is_numeric_column(values) {
                continue;
            }
            let reduced = groups
                .iter()
                .map(|g| {
                    let subset: Vec<Value> = g.rows.iter().map(|&r| values[r].clone()).collect();
                    aggregate(name, &subset)
                })
                .collect::<Result<Vec<_>, _>>()?;
            columns.push((column, reduced));
        }
        drop(data);
        Ok(self.shape_result(&groups, columns))
    }

    fn agg(&self, spec: &Value) -> Result<Value, SandboxError> {
        match spec {
            Value::Str(name) => self.reduce_named(name),
            Value::List(names) => {
                let names = names.borrow().clone();
                let groups = self.groups()?;
                let data = self.frame.data();
                let target = match self.value_columns(&data).as_slice() {
                    [only] => only.clone(),
                    _ => {
                        return Err(SandboxError::type_error(
                            "a list of aggregations needs a single selected column",
                        ))
                    }
                };
                let values = data.column(&target).unwrap_or_default();
                let mut columns = Vec::new();
                for name in &names {
                    let name = name.expect_str("aggregation")?;
                    check_reducer(&name)?;
                    let reduced = groups
                        .iter()
                        .map(|g| reduce_rows(&name, values, &g.rows))
                        .collect::<Result<Vec<_>, _>>()?;
                    columns.push((name.to_string(), reduced));
                }
                drop(data);
                Ok(GroupBy {
                    single: false,
                    ..self.clone()
                }
                .shape_result(&groups, columns))
            }
            Value::Dict(per_column) => {
                let groups = self.groups()?;
                let data = self.frame.data();
                let mut columns = Vec::new();
                for (column, func) in per_column.borrow().items() {
                    let column = column.expect_str("column")?;
                    let func = func.expect_str("aggregation")?;
                    check_reducer(&func)?;
                    let values = data
                        .column(&column)
                        .ok_or_else(|| SandboxError::key_error(format!("Column not found: {column}")))?;
                    let reduced = groups
                        .iter()
                        .map(|g| reduce_rows(&func, values, &g.rows))
                        .collect::<Result<Vec<_>, _>>()?;
                    columns.push((column.to_string(), reduced));
                }
                drop(data);
                Ok(GroupBy {
                    single: false,
                    ..self.clone()
                }
                .shape_result(&groups, columns))
            }
            other => Err(SandboxError::type_error(format!(
                "aggregation must be a name, list or dict, not {}",
                other.kind()
            ))),
        }
    }

    fn reduce_named(&self, name: &str) -> Result<Value, SandboxError> {
        check_reducer(name)?;
        self.reduce(name)
    }

    fn bind(&self, name: &'static str) -> Value {
        let this = self.clone();
        Value::native(name, move |interp, args| this.call_method(interp, name, args))
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, SandboxError> {
        match name {
            "agg" | "aggregate" => {
                let [spec] = args.exact::<1>(name)?;
                self.agg(&spec)
            }
            "get_group" => {
                let [key] = args.exact::<1>(name)?;
                let groups = self.groups()?;
                let group = groups
                    .iter()
                    .find(|g| ops::equals(&g.key, &key))
                    .ok_or_else(|| SandboxError::key_error(ops::repr(&key)))?;
                Ok(DataFrame::new(self.frame.data().take(&group.rows)).into_value())
            }
            reducer => {
                args.bind(reducer, &["numeric_only"], 0)?;
                self.reduce_named(reducer)
            }
        }
    }
}

fn check_reducer(name: &str) -> Result<(), SandboxError> {
    if REDUCERS.contains(&name) {
        Ok(())
    } else {
        Err(SandboxError::attribute_error(format!(
            "'SeriesGroupBy' object has no attribute '{name}'"
        )))
    }
}

fn reduce_rows(name: &str, values: &[Value], rows: &[usize]) -> Result<Value, SandboxError> {
    if name == "size" {
        return Ok(Value::Int(rows.len() as i64));
    }
    let subset: Vec<Value> = rows.iter().map(|&r| values[r].clone()).collect();
    aggregate(name, &subset)
}

impl Tabular for GroupBy {
    fn kind(&self) -> &'static str {
        if self.single {
            "SeriesGroupBy"
        } else {
            "DataFrameGroupBy"
        }
    }

    fn len(&self) -> usize {
        self.groups().map(|g| g.len()).unwrap_or(0)
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError> {
        if let Some(method) = METHODS.iter().find(|m| **m == name) {
            return Ok(Some(self.bind(*method)));
        }
        if self.frame.data().column_position(name).is_some() {
            return self.select(vec![name.to_string()], true).map(Some);
        }
        Ok(None)
    }

    fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        match key {
            Value::Str(column) => self.select(vec![column.to_string()], true),
            Value::List(_) | Value::Tuple(_) => {
                let columns = super::labels(key, "columns")?;
                self.select(columns, false)
            }
            other => Err(SandboxError::key_error(ops::repr(other))),
        }
    }

    /// Iteration yields `(key, sub-frame)` pairs.
    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        let groups = self.groups()?;
        let data = self.frame.data();
        Ok(groups
            .into_iter()
            .map(|g| {
                let sub = DataFrame::new(data.take(&g.rows)).into_value();
                Value::tuple(vec![g.key, sub])
            })
            .collect())
    }

    fn contains(&self, item: &Value) -> Result<bool, SandboxError> {
        Ok(self.groups()?.iter().any(|g| ops::equals(&g.key, item)))
    }

    fn render(&self) -> String {
        format!("<pandas.core.groupby.generic.{} object>", self.kind())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::{as_frame, as_series};

    fn spending() -> DataFrame {
        DataFrame::new(FrameData::from_columns(vec![
            (
                "category".into(),
                vec![
                    Value::str("meals_groceries"),
                    Value::str("shelter_home"),
                    Value::str("meals_groceries"),
                    Value::None,
                ],
            ),
            (
                "amount".into(),
                vec![
                    Value::Float(80.0),
                    Value::Float(1500.0),
                    Value::Float(20.5),
                    Value::Float(9.0),
                ],
            ),
        ]))
    }

    #[test]
    fn test_selected_sum_returns_series_keyed_by_group() {
        let grouped = GroupBy::new(spending(), vec!["category".into()], true)
            .get_item(&Value::str("amount"))
            .unwrap();
        let Value::Table(table) = grouped else {
            panic!("expected group-by");
        };
        let grouped = table.as_any().downcast_ref::<GroupBy>().unwrap();
        assert_eq!(grouped.kind(), "SeriesGroupBy");
        let result = as_series(&grouped.reduce("sum").unwrap()).unwrap();
        assert_eq!(result.data().index, vec![Value::str("meals_groceries"), Value::str("shelter_home")]);
        assert_eq!(result.values(), vec![Value::Float(100.5), Value::Float(1500.0)]);
    }

    #[test]
    fn test_reset_index_shape_when_not_as_index() {
        let grouped = GroupBy {
            selection: Some(vec!["amount".into()]),
            single: true,
            ..GroupBy::new(spending(), vec!["category".into()], false)
        };
        let frame = as_frame(&grouped.reduce("sum").unwrap()).unwrap();
        assert_eq!(frame.data().columns, vec!["category", "amount"]);
    }

    #[test]
    fn test_iteration_yields_sorted_groups_without_missing_keys() {
        let grouped = GroupBy::new(spending(), vec!["category".into()], true);
        let pairs = grouped.iter_values().unwrap();
        assert_eq!(pairs.len(), 2);
        let Value::Tuple(first) = &pairs[0] else {
            panic!("expected tuple");
        };
        assert_eq!(first[0], Value::str("meals_groceries"));
        assert_eq!(as_frame(&first[1]).unwrap().len(), 2);
    }

    #[test]
    fn test_size_counts_rows() {
        let grouped = GroupBy::new(spending(), vec!["category".into()], true);
        let sizes = as_series(&grouped.reduce("size").unwrap()).unwrap();
        assert_eq!(sizes.values(), vec![Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_unknown_column_selection() {
        let grouped = GroupBy::new(spending(), vec!["category".into()], true);
        let err = grouped.get_item(&Value::str("merchant")).unwrap_err();
        assert!(err.to_string().contains("Column not found: merchant"));
    }
}
