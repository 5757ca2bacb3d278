use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use super::accessor::{DtAccessor, StrAccessor};
use super::frame::{DataFrame, FrameData};
use super::indexer::Indexer;
use super::{
    aggregate, dtype, is_mask, is_na, list_like, mask_positions, no_attribute, sort_positions,
    unique, Tabular,
};
use crate::error::SandboxError;
use crate::interp::builtins;
use crate::interp::eval::Interpreter;
use crate::interp::ops;
use crate::interp::value::{given, Args, Dict, Value};

/// Labels and values of a one-dimensional table.
#[derive(Clone, Debug, Default)]
pub struct SeriesData {
    pub name: Option<Value>,
    pub index: Vec<Value>,
    /// Names of the index levels, set by group-by results.
    pub index_names: Vec<String>,
    pub values: Vec<Value>,
}

/// A column, a frame row, or an `Index` of labels.
#[derive(Clone, Debug)]
pub struct Series {
    data: Rc<RefCell<SeriesData>>,
    index_like: bool,
}

pub(crate) fn range_index(len: usize) -> Vec<Value> {
    (0..len as i64).map(Value::Int).collect()
}

const METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "nunique", "tolist", "to_list", "unique",
    "abs", "round", "isin", "fillna", "dropna", "sort_values", "head", "tail", "apply", "map",
    "get", "to_dict", "keys", "items", "any", "all", "isna", "isnull", "notna", "notnull",
    "astype", "value_counts", "reset_index", "copy", "idxmax", "idxmin", "cumsum", "between",
];

impl Series {
    pub fn new(data: SeriesData) -> Self {
        Series {
            data: Rc::new(RefCell::new(data)),
            index_like: false,
        }
    }

    pub fn from_values(name: Option<Value>, values: Vec<Value>) -> Self {
        Series::new(SeriesData {
            name,
            index: range_index(values.len()),
            index_names: Vec::new(),
            values,
        })
    }

    /// An `Index` holding `labels` (what `df.columns` and `df.index` return).
    pub fn index_of(labels: Vec<Value>) -> Self {
        let mut series = Series::from_values(None, labels);
        series.index_like = true;
        series
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    pub fn is_index(&self) -> bool {
        self.index_like
    }

    pub fn data(&self) -> Ref<'_, SeriesData> {
        self.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, SeriesData> {
        self.data.borrow_mut()
    }

    pub fn values(&self) -> Vec<Value> {
        self.data.borrow().values.clone()
    }

    /// Same labels and name, new values.
    pub(crate) fn derive(&self, values: Vec<Value>) -> Series {
        let data = self.data.borrow();
        Series::new(SeriesData {
            name: data.name.clone(),
            index: data.index.clone(),
            index_names: data.index_names.clone(),
            values,
        })
    }

    pub(crate) fn take(&self, positions: &[usize]) -> Series {
        let data = self.data.borrow();
        Series::new(SeriesData {
            name: data.name.clone(),
            index: positions.iter().map(|&i| data.index[i].clone()).collect(),
            index_names: data.index_names.clone(),
            values: positions.iter().map(|&i| data.values[i].clone()).collect(),
        })
    }

    fn position(&self, label: &Value) -> Option<usize> {
        self.data
            .borrow()
            .index
            .iter()
            .position(|l| ops::equals(l, label))
    }

    fn has_integer_labels(&self) -> bool {
        self.data
            .borrow()
            .index
            .iter()
            .any(|l| matches!(l, Value::Int(_)))
    }

    fn map_values<F>(&self, mut f: F) -> Result<Value, SandboxError>
    where
        F: FnMut(&Value) -> Result<Value, SandboxError>,
    {
        let values = self
            .values()
            .iter()
            .map(|v| f(v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.derive(values).into_value())
    }

    fn bind(&self, name: &'static str) -> Value {
        let this = self.clone();
        Value::native(name, move |interp, args| this.call_method(interp, name, args))
    }

    fn head_positions(len: usize, n: i64, from_end: bool) -> Vec<usize> {
        let len_i = len as i64;
        let count = if n >= 0 { n.min(len_i) } else { (len_i + n).max(0) };
        let count = count as usize;
        if from_end {
            (len - count..len).collect()
        } else {
            (0..count).collect()
        }
    }

    fn call_method(
        &self,
        interp: &mut Interpreter,
        name: &str,
        args: Args,
    ) -> Result<Value, SandboxError> {
        let values = self.values();
        match name {
            "sum" | "mean" | "median" | "min" | "max" | "count" | "nunique" => {
                args.bind(name, &["axis", "skipna", "numeric_only"], 0)?;
                aggregate(name, &values)
            }
            "tolist" | "to_list" => {
                args.exact::<0>(name)?;
                Ok(Value::list(values))
            }
            "unique" => {
                args.exact::<0>(name)?;
                Ok(Value::list(unique(&values, false)))
            }
            "abs" => {
                args.exact::<0>(name)?;
                self.map_values(|v| if is_na(v) { Ok(v.clone()) } else { ops::abs(v) })
            }
            "round" => {
                let slots = args.bind(name, &["decimals"], 0)?;
                let decimals = match given(slots[0].clone()) {
                    Some(d) => d.expect_int("decimals")?,
                    None => 0,
                };
                self.map_values(|v| match v {
                    Value::Float(f) => Ok(Value::Float(ops::round_float(*f, decimals))),
                    other => Ok(other.clone()),
                })
            }
            "isin" => {
                let [wanted] = args.exact::<1>(name)?;
                let wanted = list_like(&wanted, "isin")?;
                self.map_values(|v| Ok(Value::Bool(wanted.iter().any(|w| ops::equals(v, w)))))
            }
            "fillna" => {
                let slots = args.bind(name, &["value"], 1)?;
                let fill = slots[0].clone().unwrap_or(Value::None);
                self.map_values(|v| Ok(if is_na(v) { fill.clone() } else { v.clone() }))
            }
            "dropna" => {
                args.exact::<0>(name)?;
                let keep: Vec<usize> = (0..values.len()).filter(|&i| !is_na(&values[i])).collect();
                Ok(self.take(&keep).into_value())
            }
            "sort_values" => {
                let slots = args.bind(name, &["ascending"], 0)?;
                let ascending = match given(slots[0].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => true,
                };
                Ok(self.take(&sort_positions(&values, ascending)?).into_value())
            }
            "head" | "tail" => {
                let slots = args.bind(name, &["n"], 0)?;
                let n = match given(slots[0].clone()) {
                    Some(v) => v.expect_int("n")?,
                    None => 5,
                };
                let positions = Self::head_positions(values.len(), n, name == "tail");
                Ok(self.take(&positions).into_value())
            }
            "apply" | "map" => {
                let slots = args.bind(name, &["func", "na_action"], 1)?;
                let func = slots[0].clone().unwrap_or(Value::None);
                if let Value::Dict(mapping) = &func {
                    let mapping = mapping.borrow();
                    return self.map_values(|v| Ok(mapping.get(v)?.unwrap_or(Value::Float(f64::NAN))));
                }
                if let Some(other) = super::as_series(&func) {
                    return self.map_values(|v| {
                        Ok(other
                            .position(v)
                            .map(|i| other.values()[i].clone())
                            .unwrap_or(Value::Float(f64::NAN)))
                    });
                }
                let skip_na = matches!(slots[1].as_ref().and_then(|v| v.as_str()), Some("ignore"));
                self.map_values(|v| {
                    if skip_na && is_na(v) {
                        return Ok(v.clone());
                    }
                    interp.call(&func, Args::new(vec![v.clone()]))
                })
            }
            "get" => {
                let slots = args.bind(name, &["key", "default"], 1)?;
                let key = slots[0].clone().unwrap_or(Value::None);
                Ok(match self.position(&key) {
                    Some(i) => values[i].clone(),
                    None => slots[1].clone().unwrap_or(Value::None),
                })
            }
            "to_dict" => {
                args.exact::<0>(name)?;
                let data = self.data.borrow();
                let pairs = data.index.iter().cloned().zip(values).collect();
                Ok(Value::dict(Dict::from_pairs(pairs)?))
            }
            "keys" => {
                args.exact::<0>(name)?;
                Ok(Series::index_of(self.data.borrow().index.clone()).into_value())
            }
            "items" => {
                args.exact::<0>(name)?;
                let data = self.data.borrow();
                Ok(Value::list(
                    data.index
                        .iter()
                        .zip(&data.values)
                        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ))
            }
            "any" | "all" => {
                args.bind(name, &["axis", "skipna"], 0)?;
                let mut flags = values.iter().filter(|v| !is_na(v)).map(ops::truthy);
                let result = if name == "any" {
                    flags.try_fold(false, |acc, f| f.map(|f| acc || f))?
                } else {
                    flags.try_fold(true, |acc, f| f.map(|f| acc && f))?
                };
                Ok(Value::Bool(result))
            }
            "isna" | "isnull" => {
                args.exact::<0>(name)?;
                self.map_values(|v| Ok(Value::Bool(is_na(v))))
            }
            "notna" | "notnull" => {
                args.exact::<0>(name)?;
                self.map_values(|v| Ok(Value::Bool(!is_na(v))))
            }
            "astype" => {
                let [target] = args.exact::<1>(name)?;
                let kind = builtins::dtype_target(&target)?;
                self.map_values(|v| {
                    if is_na(v) {
                        Ok(v.clone())
                    } else {
                        builtins::convert(kind, v)
                    }
                })
            }
            "value_counts" => {
                let slots = args.bind(name, &["normalize", "ascending"], 0)?;
                let normalize = match given(slots[0].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => false,
                };
                let labels = unique(&values, true);
                let counts: Vec<Value> = labels
                    .iter()
                    .map(|l| Value::Int(values.iter().filter(|v| ops::equals(v, l)).count() as i64))
                    .collect();
                let total = values.iter().filter(|v| !is_na(v)).count().max(1) as f64;
                let order = sort_positions(&counts, false)?;
                let counts: Vec<Value> = order
                    .iter()
                    .map(|&i| match (&counts[i], normalize) {
                        (Value::Int(c), true) => Value::Float(*c as f64 / total),
                        (c, _) => c.clone(),
                    })
                    .collect();
                let data = self.data.borrow();
                Ok(Series::new(SeriesData {
                    name: Some(Value::str(if normalize { "proportion" } else { "count" })),
                    index: order.iter().map(|&i| labels[i].clone()).collect(),
                    index_names: data.name.iter().map(ops::to_str).collect(),
                    values: counts,
                })
                .into_value())
            }
            "reset_index" => {
                let slots = args.bind(name, &["drop", "name"], 0)?;
                let drop = match given(slots[0].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => false,
                };
                if drop {
                    return Ok(Series::from_values(self.data.borrow().name.clone(), values).into_value());
                }
                let data = self.data.borrow();
                let value_name = given(slots[1].clone())
                    .or_else(|| data.name.clone())
                    .map(|n| ops::to_str(&n))
                    .unwrap_or_else(|| "0".to_string());
                let mut columns = FrameData::index_columns(&data.index, &data.index_names);
                columns.push((value_name, values));
                Ok(DataFrame::new(FrameData::from_columns(columns)).into_value())
            }
            "copy" => {
                args.bind(name, &["deep"], 0)?;
                Ok(self.derive(values).into_value())
            }
            "idxmax" | "idxmin" => {
                args.exact::<0>(name)?;
                let order = sort_positions(&values, name == "idxmin")?;
                let first = order
                    .first()
                    .filter(|&&i| !is_na(&values[i]))
                    .ok_or_else(|| {
                        SandboxError::value_error(format!("attempt to get {name} of an empty sequence"))
                    })?;
                Ok(self.data.borrow().index[*first].clone())
            }
            "cumsum" => {
                args.exact::<0>(name)?;
                let mut running: Option<Value> = None;
                self.map_values(|v| {
                    if is_na(v) {
                        return Ok(v.clone());
                    }
                    let next = match &running {
                        Some(acc) => ops::binary(crate::interp::ast::BinOp::Add, acc, v)?,
                        None => v.clone(),
                    };
                    running = Some(next.clone());
                    Ok(next)
                })
            }
            "between" => {
                let slots = args.bind(name, &["left", "right", "inclusive"], 2)?;
                let left = slots[0].clone().unwrap_or(Value::None);
                let right = slots[1].clone().unwrap_or(Value::None);
                self.map_values(|v| {
                    if is_na(v) {
                        return Ok(Value::Bool(false));
                    }
                    let low = ops::compare_values(v, &left)?;
                    let high = ops::compare_values(v, &right)?;
                    Ok(Value::Bool(
                        matches!(low, Some(o) if o.is_ge()) && matches!(high, Some(o) if o.is_le()),
                    ))
                })
            }
            other => Err(no_attribute(self.kind(), other)),
        }
    }
}

impl Tabular for Series {
    fn kind(&self) -> &'static str {
        if self.index_like {
            "Index"
        } else {
            "Series"
        }
    }

    fn len(&self) -> usize {
        self.data.borrow().values.len()
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError> {
        let value = match name {
            "empty" => Value::Bool(self.is_empty()),
            "values" | "array" => Value::list(self.values()),
            "size" => Value::Int(self.len() as i64),
            "shape" => Value::tuple(vec![Value::Int(self.len() as i64)]),
            "name" => self.data.borrow().name.clone().unwrap_or(Value::None),
            "dtype" => Value::str(dtype(&self.data.borrow().values)),
            "index" => Series::index_of(self.data.borrow().index.clone()).into_value(),
            "iloc" => Indexer::iloc_series(self.clone()).into_value(),
            "loc" => Indexer::loc_series(self.clone()).into_value(),
            "str" => StrAccessor::new(self.clone()).into_value(),
            "dt" => DtAccessor::new(self.clone())?.into_value(),
            name => {
                if let Some(method) = METHODS.iter().find(|m| **m == name) {
                    return Ok(Some(self.bind(*method)));
                }
                let label = Value::str(name);
                return Ok(self.position(&label).map(|i| self.values()[i].clone()));
            }
        };
        Ok(Some(value))
    }

    fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        let len = self.len();
        if is_mask(key) {
            let mask = list_like(key, "mask")?;
            return Ok(self.take(&mask_positions(&mask, len)?).into_value());
        }
        if let Value::Slice(a, b, c) = key {
            return Ok(self.take(&ops::slice_indices(len, *a, *b, *c)?).into_value());
        }
        if let Value::List(labels) = key {
            let positions = labels
                .borrow()
                .iter()
                .map(|l| {
                    self.position(l)
                        .ok_or_else(|| SandboxError::key_error(ops::repr(l)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(self.take(&positions).into_value());
        }
        if self.index_like {
            let i = key.expect_int("index")?;
            return Ok(self.values()[ops::normalize_index(i, len, "index")?].clone());
        }
        if let Some(i) = self.position(key) {
            return Ok(self.values()[i].clone());
        }
        if let (Some(i), false) = (key.as_int(), self.has_integer_labels()) {
            return Ok(self.values()[ops::normalize_index(i, len, "index")?].clone());
        }
        Err(SandboxError::key_error(ops::repr(key)))
    }

    fn set_item(&self, key: &Value, value: Value) -> Result<(), SandboxError> {
        if self.index_like {
            return Err(SandboxError::type_error("Index does not support mutable operations"));
        }
        match self.position(key) {
            Some(i) => self.data.borrow_mut().values[i] = value,
            None => {
                let mut data = self.data.borrow_mut();
                data.index.push(key.clone());
                data.values.push(value);
            }
        }
        Ok(())
    }

    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        Ok(self.values())
    }

    fn contains(&self, item: &Value) -> Result<bool, SandboxError> {
        let data = self.data.borrow();
        let haystack = if self.index_like {
            &data.values
        } else {
            &data.index
        };
        Ok(haystack.iter().any(|v| ops::equals(v, item)))
    }

    fn render(&self) -> String {
        let data = self.data.borrow();
        let kind = dtype(&data.values);
        if self.index_like {
            let items: Vec<String> = data.values.iter().map(ops::repr).collect();
            return format!("Index([{}], dtype='{kind}')", items.join(", "));
        }
        if data.values.is_empty() {
            return format!("Series([], dtype: {kind})");
        }
        let labels: Vec<String> = data.index.iter().map(ops::to_str).collect();
        let width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let mut lines: Vec<String> = labels
            .iter()
            .zip(&data.values)
            .map(|(l, v)| format!("{l:<width$}    {}", ops::to_str(v)))
            .collect();
        lines.push(match &data.name {
            Some(name) => format!("Name: {}, dtype: {kind}", ops::to_str(name)),
            None => format!("dtype: {kind}"),
        });
        lines.join("\n")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Series {
        Series::new(SeriesData {
            name: Some(Value::Int(3)),
            index: vec![Value::str("name"), Value::str("amount")],
            index_names: Vec::new(),
            values: vec![Value::str("Netflix"), Value::Float(15.99)],
        })
    }

    // ── lookup ──────────────────────────────────────────

    #[test]
    fn test_label_lookup_on_rows() {
        let row = row();
        assert_eq!(row.get_item(&Value::str("amount")).unwrap(), Value::Float(15.99));
        assert_eq!(row.get_attr("name").unwrap(), Some(Value::Int(3)));
        assert_eq!(row.get_attr("amount").unwrap(), Some(Value::Float(15.99)));
        let err = row.get_item(&Value::str("missing")).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'missing'");
    }

    #[test]
    fn test_positional_fallback_only_without_integer_labels() {
        assert_eq!(row().get_item(&Value::Int(0)).unwrap(), Value::str("Netflix"));

        let filtered = Series::new(SeriesData {
            name: None,
            index: vec![Value::Int(4), Value::Int(9)],
            index_names: Vec::new(),
            values: vec![Value::Int(1), Value::Int(2)],
        });
        assert_eq!(filtered.get_item(&Value::Int(9)).unwrap(), Value::Int(2));
        assert!(filtered.get_item(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_mask_and_slice_selection() {
        let s = Series::from_values(None, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let mask = Value::list(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]);
        let picked = super::super::as_series(&s.get_item(&mask).unwrap()).unwrap();
        assert_eq!(picked.values(), vec![Value::Int(1), Value::Int(3)]);
        let sliced = super::super::as_series(&s.get_item(&Value::Slice(Some(1), None, None)).unwrap())
            .unwrap();
        assert_eq!(sliced.values(), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_index_membership_checks_values() {
        let columns = Series::index_of(vec![Value::str("amount"), Value::str("date")]);
        assert!(columns.contains(&Value::str("amount")).unwrap());
        assert_eq!(columns.kind(), "Index");
        assert_eq!(columns.render(), "Index(['amount', 'date'], dtype='object')");
    }

    #[test]
    fn test_row_set_item_updates_or_appends() {
        let row = row();
        row.set_item(&Value::str("amount"), Value::Int(1)).unwrap();
        row.set_item(&Value::str("note"), Value::str("x")).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get_item(&Value::str("amount")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_render_includes_name_and_dtype() {
        let s = Series::from_values(Some(Value::str("amount")), vec![Value::Int(1), Value::Int(22)]);
        let text = s.render();
        assert!(text.contains("0    1"));
        assert!(text.ends_with("Name: amount, dtype: int64"));
    }
}
