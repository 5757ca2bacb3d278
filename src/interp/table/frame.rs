use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use super::groupby::GroupBy;
use super::indexer::Indexer;
use super::series::{range_index, Series, SeriesData};
use super::{
    aggregate, as_series, dtype, is_mask, is_na, is_numeric_column, labels, list_like,
    mask_positions, no_attribute, render_grid, sort_positions, Tabular,
};
use crate::error::SandboxError;
use crate::interp::eval::Interpreter;
use crate::interp::ops;
use crate::interp::value::{given, Args, Dict, Value};

/// Column-major storage: `data[c][r]` is row `r` of column `columns[c]`.
#[derive(Clone, Default)]
pub struct FrameData {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
    pub index: Vec<Value>,
    pub index_names: Vec<String>,
}

impl FrameData {
    /// Builds a frame from named columns; short columns are padded with `None`.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Self {
        let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        let mut frame = FrameData {
            index: range_index(rows),
            ..FrameData::default()
        };
        for (name, mut values) in columns {
            values.resize(rows, Value::None);
            frame.set_column(&name, values);
        }
        frame
    }

    /// Builds a frame from row records; columns appear in first-seen order
    /// and fields missing from a record read as `None`.
    pub fn from_records(records: &[Vec<(String, Value)>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for (key, _) in record {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let data = columns
            .iter()
            .map(|column| {
                records
                    .iter()
                    .map(|record| {
                        record
                            .iter()
                            .find(|(k, _)| k == column)
                            .map(|(_, v)| v.clone())
                            .unwrap_or(Value::None)
                    })
                    .collect()
            })
            .collect();
        FrameData {
            columns,
            data,
            index: range_index(records.len()),
            index_names: Vec::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.column_position(name).map(|i| self.data[i].as_slice())
    }

    fn require(&self, name: &str) -> Result<usize, SandboxError> {
        self.column_position(name)
            .ok_or_else(|| SandboxError::key_error(ops::str_repr(name)))
    }

    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        match self.column_position(name) {
            Some(i) => self.data[i] = values,
            None => {
                self.columns.push(name.to_string());
                self.data.push(values);
            }
        }
    }

    pub fn take(&self, rows: &[usize]) -> FrameData {
        FrameData {
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|col| rows.iter().map(|&r| col[r].clone()).collect())
                .collect(),
            index: rows.iter().map(|&r| self.index[r].clone()).collect(),
            index_names: self.index_names.clone(),
        }
    }

    pub fn select(&self, names: &[String]) -> Result<FrameData, SandboxError> {
        let mut data = Vec::with_capacity(names.len());
        for name in names {
            data.push(self.data[self.require(name)?].clone());
        }
        Ok(FrameData {
            columns: names.to_vec(),
            data,
            index: self.index.clone(),
            index_names: self.index_names.clone(),
        })
    }

    pub fn column_series(&self, position: usize) -> Series {
        Series::new(SeriesData {
            name: Some(Value::str(&self.columns[position])),
            index: self.index.clone(),
            index_names: self.index_names.clone(),
            values: self.data[position].clone(),
        })
    }

    /// Row `r` as a series labelled by column name.
    pub fn row(&self, r: usize) -> Series {
        Series::new(SeriesData {
            name: Some(self.index[r].clone()),
            index: self.columns.iter().map(Value::str).collect(),
            index_names: Vec::new(),
            values: self.data.iter().map(|col| col[r].clone()).collect(),
        })
    }

    pub fn row_dict(&self, r: usize) -> Result<Dict, SandboxError> {
        Dict::from_pairs(
            self.columns
                .iter()
                .zip(&self.data)
                .map(|(c, col)| (Value::str(c), col[r].clone()))
                .collect(),
        )
    }

    /// Index labels as columns, the way `reset_index` exposes them.
    /// Tuple labels of a multi-level index expand into one column per level.
    pub fn index_columns(index: &[Value], names: &[String]) -> Vec<(String, Vec<Value>)> {
        if names.len() > 1 {
            return names
                .iter()
                .enumerate()
                .map(|(level, name)| {
                    let values = index
                        .iter()
                        .map(|label| match label {
                            Value::Tuple(parts) => parts.get(level).cloned().unwrap_or(Value::None),
                            other => other.clone(),
                        })
                        .collect();
                    (name.clone(), values)
                })
                .collect();
        }
        let name = names.first().cloned().unwrap_or_else(|| "index".to_string());
        vec![(name, index.to_vec())]
    }
}

/// A shared handle on frame data; column assignment mutates in place.
#[derive(Clone)]
pub struct DataFrame(Rc<RefCell<FrameData>>);

const METHODS: &[&str] = &[
    "head", "tail", "sort_values", "iterrows", "to_dict", "copy", "reset_index", "get",
    "nlargest", "nsmallest", "groupby", "apply", "sum", "mean", "median", "min", "max", "count",
    "drop", "rename", "fillna", "dropna", "drop_duplicates", "keys", "items", "set_index",
    "to_string",
];

fn flag(slot: &Option<Value>, default: bool) -> Result<bool, SandboxError> {
    match given(slot.clone()) {
        Some(v) => ops::truthy(&v),
        None => Ok(default),
    }
}

impl DataFrame {
    pub fn new(data: FrameData) -> Self {
        DataFrame(Rc::new(RefCell::new(data)))
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    pub fn data(&self) -> Ref<'_, FrameData> {
        self.0.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, FrameData> {
        self.0.borrow_mut()
    }

    pub(crate) fn set_cells(&self, rows: &[usize], column: &str, value: &Value) -> Result<(), SandboxError> {
        let mut data = self.0.borrow_mut();
        let nrows = data.nrows();
        let position = match data.column_position(column) {
            Some(p) => p,
            None => {
                data.set_column(column, vec![Value::None; nrows]);
                data.columns.len() - 1
            }
        };
        let values = match as_series(value) {
            Some(s) => {
                let v = s.values();
                if v.len() == nrows {
                    rows.iter().map(|&r| v[r].clone()).collect()
                } else if v.len() == rows.len() {
                    v
                } else {
                    return Err(SandboxError::value_error(
                        "shape mismatch: value array could not be broadcast to indexing result",
                    ));
                }
            }
            None => vec![value.clone(); rows.len()],
        };
        for (&r, v) in rows.iter().zip(values) {
            data.data[position][r] = v;
        }
        Ok(())
    }

    fn bind(&self, name: &'static str) -> Value {
        let this = self.clone();
        Value::native(name, move |interp, args| this.call_method(interp, name, args))
    }

    fn derive(&self, data: FrameData) -> Value {
        DataFrame::new(data).into_value()
    }

    fn sorted_positions(
        &self,
        interp: &mut Interpreter,
        by: &[String],
        ascending: &[bool],
        key: Option<&Value>,
    ) -> Result<Vec<usize>, SandboxError> {
        let data = self.data().clone();
        let mut positions: Vec<usize> = (0..data.nrows()).collect();
        for (k, column) in by.iter().enumerate().rev() {
            let col_pos = data.require(column)?;
            let mut keys = data.data[col_pos].clone();
            if let Some(func) = key {
                let mapped = interp.call(func, Args::new(vec![data.column_series(col_pos).into_value()]))?;
                keys = list_like(&mapped, "sort key")?;
            }
            let reordered: Vec<Value> = positions.iter().map(|&p| keys[p].clone()).collect();
            let order = sort_positions(&reordered, ascending.get(k).copied().unwrap_or(true))?;
            positions = order.into_iter().map(|o| positions[o]).collect();
        }
        Ok(positions)
    }

    fn reduce(&self, name: &str) -> Result<Value, SandboxError> {
        let data = self.data();
        let mut labels = Vec::new();
        let mut values = Vec::new();
        for (column, col) in data.columns.iter().zip(&data.data) {
            let numeric_only = matches!(name, "sum" | "mean" | "median");
            if numeric_only && !is_numeric_column(col) {
                continue;
            }
            labels.push(Value::str(column));
            values.push(aggregate(name, col)?);
        }
        Ok(Series::new(SeriesData {
            name: None,
            index: labels,
            index_names: Vec::new(),
            values,
        })
        .into_value())
    }

    fn call_method(
        &self,
        interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, SandboxError> {
        match name {
            "head" | "tail" => {
                let slots = args.bind(name, &["n"], 0)?;
                let n = match given(slots[0].clone()) {
                    Some(v) => v.expect_int("n")?,
                    None => 5,
                };
                let data = self.data();
                let len = data.nrows() as i64;
                let count = if n >= 0 { n.min(len) } else { (len + n).max(0) } as usize;
                let rows: Vec<usize> = if name == "tail" {
                    (data.nrows() - count..data.nrows()).collect()
                } else {
                    (0..count).collect()
                };
                Ok(self.derive(data.take(&rows)))
            }
            "sort_values" => {
                let slots = args.bind(name, &["by", "ascending", "key"], 1)?;
                let by = labels(slots[0].as_ref().unwrap_or(&Value::None), "by")?;
                let ascending = match given(slots[1].clone()) {
                    None => vec![true; by.len()],
                    Some(Value::List(flags)) => flags
                        .borrow()
                        .iter()
                        .map(ops::truthy)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(v) => vec![ops::truthy(&v)?; by.len()],
                };
                let key = given(slots[2].clone());
                let positions = self.sorted_positions(interp, &by, &ascending, key.as_ref())?;
                Ok(self.derive(self.data().take(&positions)))
            }
            "nlargest" | "nsmallest" => {
                let slots = args.bind(name, &["n", "columns"], 2)?;
                let n = slots[0].as_ref().map_or(Ok(5), |v| v.expect_int("n"))?;
                let by = labels(slots[1].as_ref().unwrap_or(&Value::None), "columns")?;
                let ascending = vec![name == "nsmallest"; by.len()];
                let positions = self.sorted_positions(interp, &by, &ascending, None)?;
                let positions: Vec<usize> = positions.into_iter().take(n.max(0) as usize).collect();
                Ok(self.derive(self.data().take(&positions)))
            }
            "iterrows" => {
                args.exact::<0>(name)?;
                let data = self.data();
                Ok(Value::list(
                    (0..data.nrows())
                        .map(|r| Value::tuple(vec![data.index[r].clone(), data.row(r).into_value()]))
                        .collect(),
                ))
            }
            "to_dict" => {
                let slots = args.bind(name, &["orient"], 0)?;
                let orient = match given(slots[0].clone()) {
                    Some(v) => v.expect_str("orient")?.to_string(),
                    None => "dict".to_string(),
                };
                let data = self.data();
                match orient.as_str() {
                    "records" => Ok(Value::list(
                        (0..data.nrows())
                            .map(|r| data.row_dict(r).map(Value::dict))
                            .collect::<Result<Vec<_>, _>>()?,
                    )),
                    "list" => {
                        let pairs = data
                            .columns
                            .iter()
                            .zip(&data.data)
                            .map(|(c, col)| (Value::str(c), Value::list(col.clone())))
                            .collect();
                        Ok(Value::dict(Dict::from_pairs(pairs)?))
                    }
                    "dict" => {
                        let mut out = Dict::new();
                        for (c, col) in data.columns.iter().zip(&data.data) {
                            let inner = Dict::from_pairs(data.index.iter().cloned().zip(col.iter().cloned()).collect())?;
                            out.insert(Value::str(c), Value::dict(inner))?;
                        }
                        Ok(Value::dict(out))
                    }
                    "index" => {
                        let mut out = Dict::new();
                        for r in 0..data.nrows() {
                            out.insert(data.index[r].clone(), Value::dict(data.row_dict(r)?))?;
                        }
                        Ok(Value::dict(out))
                    }
                    other => Err(SandboxError::value_error(format!(
                        "orient '{other}' not understood"
                    ))),
                }
            }
            "copy" => {
                args.bind(name, &["deep"], 0)?;
                Ok(self.derive(self.data().clone()))
            }
            "reset_index" => {
                let slots = args.bind(name, &["drop"], 0)?;
                let drop = flag(&slots[0], false)?;
                let data = self.data();
                let mut columns = if drop {
                    Vec::new()
                } else {
                    FrameData::index_columns(&data.index, &data.index_names)
                };
                columns.extend(data.columns.iter().cloned().zip(data.data.iter().cloned()));
                let mut frame = FrameData::from_columns(columns);
                frame.index = range_index(data.nrows());
                Ok(self.derive(frame))
            }
            "set_index" => {
                let [column] = args.exact::<1>(name)?;
                let column = column.expect_str("keys")?;
                let mut data = self.data().clone();
                let position = data.require(&column)?;
                data.index = data.data.remove(position);
                data.columns.remove(position);
                data.index_names = vec![column.to_string()];
                Ok(self.derive(data))
            }
            "get" => {
                let slots = args.bind(name, &["key", "default"], 1)?;
                let key = slots[0].clone().unwrap_or(Value::None);
                match self.get_item(&key) {
                    Ok(v) => Ok(v),
                    Err(e) if e.class() == Some(crate::error::ErrorClass::KeyError) => {
                        Ok(slots[1].clone().unwrap_or(Value::None))
                    }
                    Err(e) => Err(e),
                }
            }
            "groupby" => {
                let slots = args.bind(name, &["by", "as_index", "sort"], 1)?;
                let keys = labels(slots[0].as_ref().unwrap_or(&Value::None), "by")?;
                for key in &keys {
                    self.data().require(key)?;
                }
                let as_index = flag(&slots[1], true)?;
                Ok(GroupBy::new(self.clone(), keys, as_index).into_value())
            }
            "apply" => {
                let slots = args.bind(name, &["func", "axis"], 1)?;
                let func = slots[0].clone().unwrap_or(Value::None);
                let by_row = match given(slots[1].clone()) {
                    Some(Value::Int(1)) => true,
                    Some(Value::Str(s)) => &*s == "columns",
                    _ => false,
                };
                let data = self.data().clone();
                if by_row {
                    let values = (0..data.nrows())
                        .map(|r| interp.call(&func, Args::new(vec![data.row(r).into_value()])))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(Series::new(SeriesData {
                        name: None,
                        index: data.index.clone(),
                        index_names: data.index_names.clone(),
                        values,
                    })
                    .into_value());
                }
                let values = (0..data.columns.len())
                    .map(|c| interp.call(&func, Args::new(vec![data.column_series(c).into_value()])))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Series::new(SeriesData {
                    name: None,
                    index: data.columns.iter().map(Value::str).collect(),
                    index_names: Vec::new(),
                    values,
                })
                .into_value())
            }
            "sum" | "mean" | "median" | "min" | "max" | "count" => {
                args.bind(name, &["axis", "numeric_only"], 0)?;
                self.reduce(name)
            }
            "drop" => {
                let slots = args.bind(name, &["labels", "axis", "index", "columns"], 0)?;
                let by_column = matches!(given(slots[1].clone()), Some(Value::Int(1)))
                    || matches!(given(slots[1].clone()), Some(Value::Str(s)) if &*s == "columns");
                let mut data = self.data().clone();
                let columns = match (given(slots[3].clone()), given(slots[0].clone())) {
                    (Some(c), _) => Some(c),
                    (None, Some(l)) if by_column => Some(l),
                    _ => None,
                };
                if let Some(columns) = columns {
                    for column in labels(&columns, "columns")? {
                        let position = data.require(&column)?;
                        data.columns.remove(position);
                        data.data.remove(position);
                    }
                }
                let rows = match (given(slots[2].clone()), given(slots[0].clone())) {
                    (Some(r), _) => Some(r),
                    (None, Some(l)) if !by_column => Some(l),
                    _ => None,
                };
                if let Some(rows) = rows {
                    let drop: Vec<Value> = match &rows {
                        Value::List(_) | Value::Tuple(_) => list_like(&rows, "index")?,
                        other => vec![other.clone()],
                    };
                    for label in &drop {
                        if !data.index.iter().any(|l| ops::equals(l, label)) {
                            return Err(SandboxError::key_error(format!(
                                "[{}] not found in axis",
                                ops::repr(label)
                            )));
                        }
                    }
                    let keep: Vec<usize> = (0..data.nrows())
                        .filter(|&r| !drop.iter().any(|l| ops::equals(l, &data.index[r])))
                        .collect();
                    data = data.take(&keep);
                }
                Ok(self.derive(data))
            }
            "rename" => {
                let slots = args.bind(name, &["columns"], 1)?;
                let Some(Value::Dict(mapping)) = slots[0].clone() else {
                    return Err(SandboxError::type_error("rename() columns must be a dict"));
                };
                let mut data = self.data().clone();
                for column in data.columns.iter_mut() {
                    if let Some(new) = mapping.borrow().get_str(column) {
                        *column = ops::to_str(&new);
                    }
                }
                Ok(self.derive(data))
            }
            "fillna" => {
                let slots = args.bind(name, &["value"], 1)?;
                let fill = slots[0].clone().unwrap_or(Value::None);
                let mut data = self.data().clone();
                for (column, col) in data.columns.iter().zip(data.data.iter_mut()) {
                    let replacement = match &fill {
                        Value::Dict(per_column) => match per_column.borrow().get_str(column) {
                            Some(v) => v,
                            None => continue,
                        },
                        scalar => scalar.clone(),
                    };
                    for v in col.iter_mut().filter(|v| is_na(v)) {
                        *v = replacement.clone();
                    }
                }
                Ok(self.derive(data))
            }
            "dropna" => {
                let slots = args.bind(name, &["subset"], 0)?;
                let data = self.data();
                let subset = match given(slots[0].clone()) {
                    Some(s) => labels(&s, "subset")?,
                    None => data.columns.clone(),
                };
                let checked = subset
                    .iter()
                    .map(|c| data.require(c))
                    .collect::<Result<Vec<_>, _>>()?;
                let keep: Vec<usize> = (0..data.nrows())
                    .filter(|&r| checked.iter().all(|&c| !is_na(&data.data[c][r])))
                    .collect();
                Ok(self.derive(data.take(&keep)))
            }
            "drop_duplicates" => {
                let slots = args.bind(name, &["subset", "keep"], 0)?;
                let data = self.data();
                let subset = match given(slots[0].clone()) {
                    Some(s) => labels(&s, "subset")?,
                    None => data.columns.clone(),
                };
                let checked = subset
                    .iter()
                    .map(|c| data.require(c))
                    .collect::<Result<Vec<_>, _>>()?;
                let keys: Vec<Value> = (0..data.nrows())
                    .map(|r| Value::tuple(checked.iter().map(|&c| data.data[c][r].clone()).collect()))
                    .collect();
                let mut keep = Vec::new();
                for (r, key) in keys.iter().enumerate() {
                    if !keep.iter().any(|&k: &usize| ops::equals(&keys[k], key)) {
                        keep.push(r);
                    }
                }
                Ok(self.derive(data.take(&keep)))
            }
            "keys" => {
                args.exact::<0>(name)?;
                self.get_attr("columns").map(|v| v.unwrap_or(Value::None))
            }
            "items" => {
                args.exact::<0>(name)?;
                let data = self.data();
                Ok(Value::list(
                    (0..data.columns.len())
                        .map(|c| {
                            Value::tuple(vec![
                                Value::str(&data.columns[c]),
                                data.column_series(c).into_value(),
                            ])
                        })
                        .collect(),
                ))
            }
            "to_string" => {
                args.bind(name, &["index"], 0)?;
                Ok(Value::str(self.render()))
            }
            other => Err(no_attribute("DataFrame", other)),
        }
    }
}

impl Tabular for DataFrame {
    fn kind(&self) -> &'static str {
        "DataFrame"
    }

    fn len(&self) -> usize {
        self.data().nrows()
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError> {
        let data = self.data();
        let value = match name {
            "empty" => Value::Bool(data.nrows() == 0 || data.columns.is_empty()),
            "columns" => Series::index_of(data.columns.iter().map(Value::str).collect()).into_value(),
            "index" => Series::index_of(data.index.clone()).into_value(),
            "shape" => Value::tuple(vec![
                Value::Int(data.nrows() as i64),
                Value::Int(data.columns.len() as i64),
            ]),
            "size" => Value::Int((data.nrows() * data.columns.len()) as i64),
            "values" => Value::list(
                (0..data.nrows())
                    .map(|r| Value::list(data.data.iter().map(|col| col[r].clone()).collect()))
                    .collect(),
            ),
            "dtypes" => Series::new(SeriesData {
                name: None,
                index: data.columns.iter().map(Value::str).collect(),
                index_names: Vec::new(),
                values: data.data.iter().map(|col| Value::str(dtype(col))).collect(),
            })
            .into_value(),
            "iloc" => Indexer::iloc_frame(self.clone()).into_value(),
            "loc" => Indexer::loc_frame(self.clone()).into_value(),
            name => {
                if let Some(method) = METHODS.iter().find(|m| **m == name) {
                    return Ok(Some(self.bind(*method)));
                }
                return Ok(data.column_position(name).map(|i| data.column_series(i).into_value()));
            }
        };
        Ok(Some(value))
    }

    fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        let data = self.data();
        if let Value::Str(column) = key {
            let position = data.require(column)?;
            return Ok(data.column_series(position).into_value());
        }
        if is_mask(key) {
            let mask = list_like(key, "mask")?;
            let rows = mask_positions(&mask, data.nrows())?;
            return Ok(self.derive(data.take(&rows)));
        }
        if let Value::Slice(a, b, c) = key {
            let rows = ops::slice_indices(data.nrows(), *a, *b, *c)?;
            return Ok(self.derive(data.take(&rows)));
        }
        if matches!(key, Value::List(_) | Value::Tuple(_)) || as_series(key).is_some() {
            let names = labels(key, "columns")?;
            return Ok(self.derive(data.select(&names)?));
        }
        Err(SandboxError::key_error(ops::repr(key)))
    }

    fn set_item(&self, key: &Value, value: Value) -> Result<(), SandboxError> {
        let Value::Str(column) = key else {
            return Err(SandboxError::type_error(format!(
                "DataFrame column labels must be str, not {}",
                key.kind()
            )));
        };
        let nrows = self.len();
        let values = match &value {
            Value::List(_) | Value::Tuple(_) => Some(list_like(&value, "column")?),
            other => as_series(other).map(|s| s.values()),
        };
        let values = match values {
            Some(values) => {
                if values.len() != nrows {
                    return Err(SandboxError::value_error(format!(
                        "Length of values ({}) does not match length of index ({nrows})",
                        values.len()
                    )));
                }
                values
            }
            None => vec![value; nrows],
        };
        self.0.borrow_mut().set_column(column, values);
        Ok(())
    }

    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        Ok(self.data().columns.iter().map(Value::str).collect())
    }

    fn contains(&self, item: &Value) -> Result<bool, SandboxError> {
        Ok(item
            .as_str()
            .is_some_and(|name| self.data().column_position(name).is_some()))
    }

    fn render(&self) -> String {
        let data = self.data();
        if data.nrows() == 0 {
            return format!(
                "Empty DataFrame\nColumns: [{}]\nIndex: []",
                data.columns.join(", ")
            );
        }
        let mut header = vec![String::new()];
        header.extend(data.columns.iter().cloned());
        let rows: Vec<Vec<String>> = (0..data.nrows())
            .map(|r| {
                let mut cells = vec![ops::to_str(&data.index[r])];
                cells.extend(data.data.iter().map(|col| ops::to_str(&col[r])));
                cells
            })
            .collect();
        render_grid(&header, &rows)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::as_frame;

    fn accounts() -> DataFrame {
        DataFrame::new(FrameData::from_records(&[
            vec![
                ("account_name".into(), Value::str("Checking")),
                ("balance_current".into(), Value::Float(1200.0)),
            ],
            vec![
                ("account_name".into(), Value::str("Savings")),
                ("balance_current".into(), Value::Float(5300.5)),
                ("balance_limit".into(), Value::Int(0)),
            ],
        ]))
    }

    // ── construction ────────────────────────────────────

    #[test]
    fn test_from_records_fills_missing_fields() {
        let frame = accounts();
        let data = frame.data();
        assert_eq!(data.columns, vec!["account_name", "balance_current", "balance_limit"]);
        assert_eq!(data.column("balance_limit").unwrap()[0], Value::None);
        assert_eq!(data.nrows(), 2);
    }

    #[test]
    fn test_empty_frame_attributes() {
        let frame = DataFrame::new(FrameData::from_records(&[]));
        assert_eq!(frame.get_attr("empty").unwrap(), Some(Value::Bool(true)));
        assert_eq!(frame.len(), 0);
        assert!(frame.render().starts_with("Empty DataFrame"));
    }

    // ── selection ───────────────────────────────────────

    #[test]
    fn test_column_and_mask_selection() {
        let frame = accounts();
        let column = frame.get_item(&Value::str("balance_current")).unwrap();
        let mask = Value::list(vec![Value::Bool(false), Value::Bool(true)]);
        let filtered = as_frame(&frame.get_item(&mask).unwrap()).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.data().index, vec![Value::Int(1)]);
        assert!(as_series(&column).is_some());
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = accounts().get_item(&Value::str("nope")).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'nope'");
    }

    #[test]
    fn test_column_list_selection() {
        let frame = accounts();
        let key = Value::list(vec![Value::str("balance_current")]);
        let narrowed = as_frame(&frame.get_item(&key).unwrap()).unwrap();
        assert_eq!(narrowed.data().columns, vec!["balance_current"]);
    }

    // ── mutation ────────────────────────────────────────

    #[test]
    fn test_column_assignment_broadcasts_scalars() {
        let frame = accounts();
        frame.set_item(&Value::str("currency"), Value::str("USD")).unwrap();
        assert_eq!(
            frame.data().column("currency").unwrap(),
            &[Value::str("USD"), Value::str("USD")]
        );
        let err = frame
            .set_item(&Value::str("x"), Value::list(vec![Value::Int(1)]))
            .unwrap_err();
        assert!(err.to_string().contains("does not match length of index"));
    }

    #[test]
    fn test_iteration_yields_column_labels() {
        let labels = accounts().iter_values().unwrap();
        assert_eq!(labels[0], Value::str("account_name"));
        assert!(accounts().contains(&Value::str("balance_limit")).unwrap());
    }

    #[test]
    fn test_index_columns_expand_tuples() {
        let index = vec![Value::tuple(vec![Value::str("a"), Value::Int(1)])];
        let columns = FrameData::index_columns(&index, &["k1".into(), "k2".into()]);
        assert_eq!(columns[1], ("k2".to_string(), vec![Value::Int(1)]));
    }
}
