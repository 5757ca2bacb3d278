//! `.iloc` and `.loc` row indexers.

use std::any::Any;

use super::frame::{DataFrame, FrameData};
use super::series::{Series, SeriesData};
use super::{is_mask, labels, list_like, mask_positions, Tabular};
use crate::error::SandboxError;
use crate::interp::ops;
use crate::interp::value::Value;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Position,
    Label,
}

#[derive(Clone)]
enum Target {
    Series(Series),
    Frame(DataFrame),
}

/// Positional (`iloc`) or label-based (`loc`) access to a series or frame.
#[derive(Clone)]
pub struct Indexer {
    mode: Mode,
    target: Target,
}

/// Rows picked by a row selector; `scalar` when a single row was named.
struct Rows {
    positions: Vec<usize>,
    scalar: bool,
}

impl Indexer {
    pub fn iloc_series(series: Series) -> Self {
        Indexer {
            mode: Mode::Position,
            target: Target::Series(series),
        }
    }

    pub fn loc_series(series: Series) -> Self {
        Indexer {
            mode: Mode::Label,
            target: Target::Series(series),
        }
    }

    pub fn iloc_frame(frame: DataFrame) -> Self {
        Indexer {
            mode: Mode::Position,
            target: Target::Frame(frame),
        }
    }

    pub fn loc_frame(frame: DataFrame) -> Self {
        Indexer {
            mode: Mode::Label,
            target: Target::Frame(frame),
        }
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    fn labels(&self) -> Vec<Value> {
        match &self.target {
            Target::Series(s) => s.data().index.clone(),
            Target::Frame(f) => f.data().index.clone(),
        }
    }

    fn rows(&self, key: &Value) -> Result<Rows, SandboxError> {
        let index = self.labels();
        let len = index.len();
        if is_mask(key) {
            let mask = list_like(key, "mask")?;
            return Ok(Rows {
                positions: mask_positions(&mask, len)?,
                scalar: false,
            });
        }
        match (self.mode, key) {
            (Mode::Position, Value::Slice(a, b, c)) => Ok(Rows {
                positions: ops::slice_indices(len, *a, *b, *c)?,
                scalar: false,
            }),
            (Mode::Label, Value::Slice(a, b, None)) => {
                let bound = |label: &Option<i64>, default: usize| match label {
                    None => Ok(default),
                    Some(l) => index
                        .iter()
                        .position(|v| ops::equals(v, &Value::Int(*l)))
                        .ok_or_else(|| SandboxError::key_error(l.to_string())),
                };
                let start = bound(a, 0)?;
                let stop = match b {
                    None => len,
                    Some(_) => bound(b, 0)? + 1,
                };
                Ok(Rows {
                    positions: (start..stop.max(start)).collect(),
                    scalar: false,
                })
            }
            (_, Value::Slice(..)) => Err(SandboxError::type_error(
                "label slices with a step are not supported",
            )),
            (_, Value::List(_)) | (_, Value::Table(_)) => {
                let positions = list_like(key, "row selector")?
                    .iter()
                    .map(|k| self.one_row(&index, k))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rows {
                    positions,
                    scalar: false,
                })
            }
            (_, key) => Ok(Rows {
                positions: vec![self.one_row(&index, key)?],
                scalar: true,
            }),
        }
    }

    fn one_row(&self, index: &[Value], key: &Value) -> Result<usize, SandboxError> {
        match self.mode {
            Mode::Position => {
                let i = key.as_int().ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "Cannot index by location index with a non-integer key ({})",
                        key.kind()
                    ))
                })?;
                ops::normalize_index(i, index.len(), "single positional indexer is")
                    .map_err(|_| SandboxError::index_error("single positional indexer is out-of-bounds"))
            }
            Mode::Label => index
                .iter()
                .position(|l| ops::equals(l, key))
                .ok_or_else(|| SandboxError::key_error(ops::repr(key))),
        }
    }

    /// Column positions picked by a column selector; `scalar` when one column was named.
    fn columns(&self, frame: &FrameData, key: &Value) -> Result<(Vec<usize>, bool), SandboxError> {
        let width = frame.columns.len();
        let find = |name: &Value| -> Result<usize, SandboxError> {
            match self.mode {
                Mode::Position => {
                    let i = name.expect_int("column position")?;
                    ops::normalize_index(i, width, "column")
                }
                Mode::Label => {
                    let name = name.expect_str("column label")?;
                    frame
                        .column_position(&name)
                        .ok_or_else(|| SandboxError::key_error(ops::str_repr(&name)))
                }
            }
        };
        match key {
            Value::Slice(a, b, c) => Ok((
                match (self.mode, a, b, c) {
                    (Mode::Label, None, None, None) => (0..width).collect(),
                    (Mode::Label, ..) => {
                        return Err(SandboxError::type_error(
                            "column slices in .loc must be ':'",
                        ))
                    }
                    (Mode::Position, ..) => ops::slice_indices(width, *a, *b, *c)?,
                },
                false,
            )),
            Value::List(_) | Value::Tuple(_) => Ok((
                list_like(key, "column selector")?
                    .iter()
                    .map(find)
                    .collect::<Result<Vec<_>, _>>()?,
                false,
            )),
            Value::Table(_) if self.mode == Mode::Label => {
                let names = labels(key, "column selector")?;
                Ok((
                    names
                        .iter()
                        .map(|n| find(&Value::str(n)))
                        .collect::<Result<Vec<_>, _>>()?,
                    false,
                ))
            }
            single => Ok((vec![find(single)?], true)),
        }
    }

    fn frame_get(&self, frame: &DataFrame, key: &Value) -> Result<Value, SandboxError> {
        let (row_key, col_key) = match key {
            Value::Tuple(parts) if parts.len() == 2 => (&parts[0], Some(&parts[1])),
            Value::Tuple(_) => return Err(SandboxError::index_error("Too many indexers")),
            other => (other, None),
        };
        let rows = self.rows(row_key)?;
        let data = frame.data();
        let Some(col_key) = col_key else {
            if rows.scalar {
                return Ok(data.row(rows.positions[0]).into_value());
            }
            return Ok(DataFrame::new(data.take(&rows.positions)).into_value());
        };
        let (cols, col_scalar) = self.columns(&data, col_key)?;
        match (rows.scalar, col_scalar) {
            (true, true) => Ok(data.data[cols[0]][rows.positions[0]].clone()),
            (false, true) => {
                let column = data.column_series(cols[0]);
                Ok(column.take(&rows.positions).into_value())
            }
            (true, false) => {
                let r = rows.positions[0];
                Ok(Series::new(SeriesData {
                    name: Some(data.index[r].clone()),
                    index: cols.iter().map(|&c| Value::str(&data.columns[c])).collect(),
                    index_names: Vec::new(),
                    values: cols.iter().map(|&c| data.data[c][r].clone()).collect(),
                })
                .into_value())
            }
            (false, false) => {
                let names: Vec<String> = cols.iter().map(|&c| data.columns[c].clone()).collect();
                let narrowed = data.select(&names)?.take(&rows.positions);
                Ok(DataFrame::new(narrowed).into_value())
            }
        }
    }

    fn frame_set(&self, frame: &DataFrame, key: &Value, value: Value) -> Result<(), SandboxError> {
        let Value::Tuple(parts) = key else {
            return self.frame_set_row(frame, key, value);
        };
        if parts.len() != 2 {
            return Err(SandboxError::index_error("Too many indexers"));
        }
        let rows = self.rows(&parts[0])?;
        let column = match (self.mode, &parts[1]) {
            (Mode::Label, Value::Str(name)) => name.to_string(),
            (Mode::Position, col) => {
                let data = frame.data();
                let i = ops::normalize_index(col.expect_int("column position")?, data.columns.len(), "column")?;
                data.columns[i].clone()
            }
            (_, other) => {
                return Err(SandboxError::type_error(format!(
                    "cannot assign through a {} column selector",
                    other.kind()
                )))
            }
        };
        frame.set_cells(&rows.positions, &column, &value)
    }

    /// `df.loc[label] = [...]` overwrites or appends a whole row.
    fn frame_set_row(&self, frame: &DataFrame, key: &Value, value: Value) -> Result<(), SandboxError> {
        let width = frame.data().columns.len();
        let cells = match &value {
            Value::List(_) | Value::Tuple(_) | Value::Table(_) => list_like(&value, "row")?,
            scalar => vec![scalar.clone(); width],
        };
        if cells.len() != width {
            return Err(SandboxError::value_error(
                "cannot set a row with mismatched columns",
            ));
        }
        let existing = self.rows(key).ok().filter(|r| r.scalar);
        let mut data = frame.data_mut();
        match existing {
            Some(rows) => {
                for (column, cell) in data.data.iter_mut().zip(cells) {
                    column[rows.positions[0]] = cell;
                }
            }
            None if self.mode == Mode::Label => {
                data.index.push(key.clone());
                for (column, cell) in data.data.iter_mut().zip(cells) {
                    column.push(cell);
                }
            }
            None => {
                return Err(SandboxError::index_error(
                    "iloc cannot enlarge its target object",
                ))
            }
        }
        Ok(())
    }

    fn series_set(&self, series: &Series, key: &Value, value: Value) -> Result<(), SandboxError> {
        if self.mode == Mode::Label {
            return series.set_item(key, value);
        }
        let rows = self.rows(key)?;
        let mut data = series.data_mut();
        for r in rows.positions {
            data.values[r] = value.clone();
        }
        Ok(())
    }
}

impl Tabular for Indexer {
    fn kind(&self) -> &'static str {
        match self.mode {
            Mode::Position => "_iLocIndexer",
            Mode::Label => "_LocIndexer",
        }
    }

    fn len(&self) -> usize {
        self.labels().len()
    }

    fn get_attr(&self, _name: &str) -> Result<Option<Value>, SandboxError> {
        Ok(None)
    }

    fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        match &self.target {
            Target::Frame(frame) => self.frame_get(frame, key),
            Target::Series(series) => {
                let rows = self.rows(key)?;
                if rows.scalar {
                    return Ok(series.data().values[rows.positions[0]].clone());
                }
                Ok(series.take(&rows.positions).into_value())
            }
        }
    }

    fn set_item(&self, key: &Value, value: Value) -> Result<(), SandboxError> {
        match &self.target {
            Target::Frame(frame) => self.frame_set(frame, key, value),
            Target::Series(series) => self.series_set(series, key, value),
        }
    }

    /// Iterating an indexer walks rows in order.
    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        match &self.target {
            Target::Frame(frame) => {
                let data = frame.data();
                Ok((0..data.nrows()).map(|r| data.row(r).into_value()).collect())
            }
            Target::Series(series) => Ok(series.values()),
        }
    }

    fn contains(&self, item: &Value) -> Result<bool, SandboxError> {
        Ok(self.labels().iter().any(|l| ops::equals(l, item)))
    }

    fn render(&self) -> String {
        format!("<pandas.core.indexing.{} object>", self.kind())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::{as_frame, as_series};

    fn transactions() -> DataFrame {
        DataFrame::new(FrameData::from_columns(vec![
            (
                "name".into(),
                vec![Value::str("Coffee"), Value::str("Rent"), Value::str("Salary")],
            ),
            (
                "amount".into(),
                vec![Value::Float(4.5), Value::Float(1500.0), Value::Float(-3200.0)],
            ),
        ]))
    }

    // ── iloc ────────────────────────────────────────────

    #[test]
    fn test_iloc_single_row_and_negative_position() {
        let iloc = Indexer::iloc_frame(transactions());
        let last = as_series(&iloc.get_item(&Value::Int(-1)).unwrap()).unwrap();
        assert_eq!(last.get_item(&Value::str("name")).unwrap(), Value::str("Salary"));
        let err = iloc.get_item(&Value::Int(3)).unwrap_err();
        assert!(err.to_string().contains("out-of-bounds"));
    }

    #[test]
    fn test_iloc_cell_and_slice() {
        let iloc = Indexer::iloc_frame(transactions());
        let key = Value::tuple(vec![Value::Int(1), Value::Int(1)]);
        assert_eq!(iloc.get_item(&key).unwrap(), Value::Float(1500.0));
        let head = as_frame(&iloc.get_item(&Value::Slice(None, Some(2), None)).unwrap()).unwrap();
        assert_eq!(head.len(), 2);
    }

    #[test]
    fn test_iterating_iloc_yields_rows() {
        let rows = Indexer::iloc_frame(transactions()).iter_values().unwrap();
        assert_eq!(rows.len(), 3);
        let first = as_series(&rows[0]).unwrap();
        assert_eq!(first.get_item(&Value::str("amount")).unwrap(), Value::Float(4.5));
    }

    // ── loc ─────────────────────────────────────────────

    #[test]
    fn test_loc_mask_with_column() {
        let frame = transactions();
        let mask = Value::list(vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]);
        let key = Value::tuple(vec![mask, Value::str("amount")]);
        let picked = as_series(&Indexer::loc_frame(frame).get_item(&key).unwrap()).unwrap();
        assert_eq!(picked.values(), vec![Value::Float(4.5), Value::Float(-3200.0)]);
    }

    #[test]
    fn test_loc_assignment_updates_cells() {
        let frame = transactions();
        let loc = Indexer::loc_frame(frame.clone());
        let key = Value::tuple(vec![Value::Int(0), Value::str("category")]);
        loc.set_item(&key, Value::str("coffee")).unwrap();
        let data = frame.data();
        assert_eq!(data.column("category").unwrap()[0], Value::str("coffee"));
        assert_eq!(data.column("category").unwrap()[1], Value::None);
    }

    #[test]
    fn test_loc_missing_label_is_key_error() {
        let err = Indexer::loc_frame(transactions())
            .get_item(&Value::Int(9))
            .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 9");
    }

    #[test]
    fn test_loc_label_slice_is_inclusive() {
        let loc = Indexer::loc_frame(transactions());
        let picked = as_frame(&loc.get_item(&Value::Slice(Some(0), Some(1), None)).unwrap()).unwrap();
        assert_eq!(picked.len(), 2);
    }
}
