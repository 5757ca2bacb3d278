//! Native implementations of the modules guest code may import.
//!
//! Whether a module may be imported at all is decided by the import guard;
//! `load` only answers which modules have an implementation.

use std::rc::Rc;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Utc};

use super::eval::Interpreter;
use super::format;
use super::ops;
use super::table::{as_frame, as_series, is_na, DataFrame, FrameData, Series, SeriesData};
use super::value::{given, Args, Module, RelDelta, Value};
use crate::error::{ErrorClass, SandboxError};

/// The module object for `name`, if one is implemented.
pub fn load(name: &str) -> Option<Value> {
    let attrs = match name {
        "datetime" => vec![
            ("datetime", datetime_class()),
            ("date", date_class()),
            ("timedelta", timedelta_class()),
        ],
        "math" => math(),
        "pandas" => pandas(),
        "dateutil" => vec![("relativedelta", load("dateutil.relativedelta")?)],
        "dateutil.relativedelta" => vec![("relativedelta", relativedelta_class())],
        _ => return None,
    };
    Some(module(name, attrs))
}

fn module(name: &str, attrs: Vec<(&str, Value)>) -> Value {
    Value::Module(Rc::new(Module {
        name: name.to_string(),
        attrs: attrs
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect(),
    }))
}

/// Class-level attributes such as `datetime.now` or `date.today`.
pub fn class_attr(class: &str, attr: &str) -> Option<Value> {
    let value = match (class, attr) {
        ("datetime" | "Timestamp", "now" | "today") => Value::native(attr, |_, args| {
            args.exact::<0>("now")?;
            Ok(Value::DateTime(Local::now().naive_local()))
        }),
        ("datetime", "utcnow") => Value::native("utcnow", |_, args| {
            args.exact::<0>("utcnow")?;
            Ok(Value::DateTime(Utc::now().naive_utc()))
        }),
        ("datetime", "strptime") => Value::native("strptime", |_, args| {
            let [text, fmt] = args.exact::<2>("strptime")?;
            Ok(Value::DateTime(format::strptime(
                &text.expect_str("date_string")?,
                &fmt.expect_str("format")?,
            )?))
        }),
        ("datetime", "fromisoformat") => Value::native("fromisoformat", |_, args| {
            let [text] = args.exact::<1>("fromisoformat")?;
            Ok(Value::DateTime(from_iso(&text.expect_str("date_string")?)?))
        }),
        ("datetime", "datetime") => datetime_class(),
        ("datetime", "date") => date_class(),
        ("datetime", "timedelta") => timedelta_class(),
        ("date", "today") => Value::native("today", |_, args| {
            args.exact::<0>("today")?;
            Ok(Value::Date(Local::now().date_naive()))
        }),
        ("date", "fromisoformat") => Value::native("fromisoformat", |_, args| {
            let [text] = args.exact::<1>("fromisoformat")?;
            Ok(Value::Date(from_iso(&text.expect_str("date_string")?)?.date()))
        }),
        _ => return None,
    };
    Some(value)
}

fn from_iso(text: &str) -> Result<NaiveDateTime, SandboxError> {
    format::parse_iso(text).ok_or_else(|| {
        SandboxError::value_error(format!("Invalid isoformat string: {}", ops::str_repr(text)))
    })
}

// ── datetime ────────────────────────────────────────────

/// Validated construction with Python's range messages.
pub fn build_datetime(
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
    micro: i64,
) -> Result<NaiveDateTime, SandboxError> {
    let check = |value: i64, lo: i64, hi: i64, what: &str| {
        if (lo..=hi).contains(&value) {
            Ok(())
        } else {
            Err(SandboxError::value_error(format!("{what} must be in {lo}..{hi}")))
        }
    };
    check(year, 1, 9999, "year")?;
    check(month, 1, 12, "month")?;
    check(hour, 0, 23, "hour")?;
    check(minute, 0, 59, "minute")?;
    check(second, 0, 59, "second")?;
    check(micro, 0, 999_999, "microsecond")?;
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .filter(|_| day >= 1)
        .and_then(|d| d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micro as u32))
        .ok_or_else(|| SandboxError::value_error("day is out of range for month"))
}

fn int_slot(slot: &Option<Value>, what: &str, default: i64) -> Result<i64, SandboxError> {
    match given(slot.clone()) {
        Some(v) => v.expect_int(what),
        None => Ok(default),
    }
}

pub fn datetime_class() -> Value {
    Value::class("datetime", |_, args| {
        let names = ["year", "month", "day", "hour", "minute", "second", "microsecond"];
        let slots = args.bind("datetime", &names, 3)?;
        let mut fields = [0i64; 7];
        for (i, name) in names.iter().enumerate() {
            fields[i] = int_slot(&slots[i], name, 0)?;
        }
        let [y, mo, d, h, mi, s, us] = fields;
        Ok(Value::DateTime(build_datetime(y, mo, d, h, mi, s, us)?))
    })
}

pub fn date_class() -> Value {
    Value::class("date", |_, args| {
        let slots = args.bind("date", &["year", "month", "day"], 3)?;
        let y = int_slot(&slots[0], "year", 0)?;
        let m = int_slot(&slots[1], "month", 0)?;
        let d = int_slot(&slots[2], "day", 0)?;
        Ok(Value::Date(build_datetime(y, m, d, 0, 0, 0, 0)?.date()))
    })
}

pub fn timedelta_class() -> Value {
    Value::class("timedelta", |_, args| {
        const UNITS: [(&str, f64); 7] = [
            ("days", 86_400e6),
            ("seconds", 1e6),
            ("microseconds", 1.0),
            ("milliseconds", 1e3),
            ("minutes", 60e6),
            ("hours", 3_600e6),
            ("weeks", 604_800e6),
        ];
        let names: Vec<&str> = UNITS.iter().map(|(n, _)| *n).collect();
        let slots = args.bind("timedelta", &names, 0)?;
        let mut micros = 0f64;
        for ((name, scale), slot) in UNITS.iter().zip(&slots) {
            if let Some(v) = given(slot.clone()) {
                micros += v.expect_f64(name)? * scale;
            }
        }
        if !micros.is_finite() || micros.abs() > 8.64e19 {
            return Err(SandboxError::raised(
                ErrorClass::OverflowError,
                "timedelta out of range",
            ));
        }
        Ok(Value::TimeDelta(Duration::microseconds(micros.round_ties_even() as i64)))
    })
}

fn reldelta_from_keywords(fname: &str, args: Args) -> Result<RelDelta, SandboxError> {
    if !args.positional.is_empty() {
        return Err(SandboxError::type_error(format!(
            "{fname}() takes keyword arguments only"
        )));
    }
    let slots = args.bind(fname, &["years", "months", "weeks", "days", "day"], 0)?;
    let day = match given(slots[4].clone()) {
        Some(v) => {
            let day = v.expect_int("day")?;
            if !(1..=31).contains(&day) {
                return Err(SandboxError::value_error("day must be in 1..31"));
            }
            Some(day as u32)
        }
        None => None,
    };
    Ok(RelDelta {
        years: int_slot(&slots[0], "years", 0)?,
        months: int_slot(&slots[1], "months", 0)?,
        days: int_slot(&slots[3], "days", 0)? + 7 * int_slot(&slots[2], "weeks", 0)?,
        day,
    })
}

fn as_date(value: &Value, what: &str) -> Result<NaiveDate, SandboxError> {
    match value {
        Value::DateTime(dt) => Ok(dt.date()),
        Value::Date(d) => Ok(*d),
        other => Err(SandboxError::type_error(format!(
            "{what} must be a date, not '{}'",
            other.kind()
        ))),
    }
}

/// Calendar difference `a - b` as whole months plus leftover days.
fn reldelta_between(a: NaiveDate, b: NaiveDate) -> Result<RelDelta, SandboxError> {
    use chrono::Datelike;
    let mut months =
        i64::from(a.year() - b.year()) * 12 + i64::from(a.month()) - i64::from(b.month());
    let shift = |months: i64| {
        ops::add_reldelta(
            b,
            RelDelta {
                months,
                ..RelDelta::default()
            },
        )
    };
    if months > 0 && shift(months)? > a {
        months -= 1;
    } else if months < 0 && shift(months)? < a {
        months += 1;
    }
    let days = (a - shift(months)?).num_days();
    Ok(RelDelta {
        years: months / 12,
        months: months % 12,
        days,
        day: None,
    })
}

pub fn relativedelta_class() -> Value {
    Value::class("relativedelta", |_, args| {
        if args.positional.len() == 2 {
            let [a, b] = args.exact::<2>("relativedelta")?;
            let delta = reldelta_between(as_date(&a, "dt1")?, as_date(&b, "dt2")?)?;
            return Ok(Value::RelDelta(delta));
        }
        Ok(Value::RelDelta(reldelta_from_keywords("relativedelta", args)?))
    })
}

// ── math ────────────────────────────────────────────────

fn math_fn(name: &'static str, f: fn(f64) -> Result<Value, SandboxError>) -> (&'static str, Value) {
    (
        name,
        Value::native(name, move |_, args| {
            let [x] = args.exact::<1>(name)?;
            f(x.expect_f64(name)?)
        }),
    )
}

fn domain_error() -> SandboxError {
    SandboxError::value_error("math domain error")
}

fn to_int(x: f64) -> Result<Value, SandboxError> {
    if x.is_nan() {
        return Err(SandboxError::value_error("cannot convert float NaN to integer"));
    }
    if x.is_infinite() || x.abs() >= 9.2e18 {
        return Err(SandboxError::raised(
            ErrorClass::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    Ok(Value::Int(x as i64))
}

fn math() -> Vec<(&'static str, Value)> {
    vec![
        math_fn("floor", |x| to_int(x.floor())),
        math_fn("ceil", |x| to_int(x.ceil())),
        math_fn("trunc", |x| to_int(x.trunc())),
        math_fn("sqrt", |x| {
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }),
        math_fn("fabs", |x| Ok(Value::Float(x.abs()))),
        math_fn("exp", |x| {
            let y = x.exp();
            if y.is_infinite() && x.is_finite() {
                return Err(SandboxError::raised(ErrorClass::OverflowError, "math range error"));
            }
            Ok(Value::Float(y))
        }),
        math_fn("log10", |x| {
            if x <= 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.log10()))
        }),
        math_fn("isnan", |x| Ok(Value::Bool(x.is_nan()))),
        math_fn("isinf", |x| Ok(Value::Bool(x.is_infinite()))),
        (
            "log",
            Value::native("log", |_, args| {
                let slots = args.bind("log", &["x", "base"], 1)?;
                let x = slots[0].as_ref().unwrap_or(&Value::None).expect_f64("x")?;
                if x <= 0.0 {
                    return Err(domain_error());
                }
                match given(slots[1].clone()) {
                    Some(base) => {
                        let base = base.expect_f64("base")?;
                        if base <= 0.0 || base == 1.0 {
                            return Err(domain_error());
                        }
                        Ok(Value::Float(x.ln() / base.ln()))
                    }
                    None => Ok(Value::Float(x.ln())),
                }
            }),
        ),
        (
            "isclose",
            Value::native("isclose", |_, args| {
                let slots = args.bind("isclose", &["a", "b", "rel_tol", "abs_tol"], 2)?;
                let a = slots[0].as_ref().unwrap_or(&Value::None).expect_f64("a")?;
                let b = slots[1].as_ref().unwrap_or(&Value::None).expect_f64("b")?;
                let rel = match given(slots[2].clone()) {
                    Some(v) => v.expect_f64("rel_tol")?,
                    None => 1e-9,
                };
                let abs = match given(slots[3].clone()) {
                    Some(v) => v.expect_f64("abs_tol")?,
                    None => 0.0,
                };
                let close = a == b || (a - b).abs() <= (rel * a.abs().max(b.abs())).max(abs);
                Ok(Value::Bool(close))
            }),
        ),
        ("pi", Value::Float(std::f64::consts::PI)),
        ("e", Value::Float(std::f64::consts::E)),
        ("inf", Value::Float(f64::INFINITY)),
        ("nan", Value::Float(f64::NAN)),
    ]
}

// ── pandas ──────────────────────────────────────────────

fn pandas() -> Vec<(&'static str, Value)> {
    vec![
        ("DataFrame", dataframe_class()),
        ("Series", series_class()),
        ("Timestamp", timestamp_class()),
        ("to_datetime", Value::native("to_datetime", to_datetime)),
        ("isna", Value::native("isna", |_, args| missing_mask(args, "isna", true))),
        ("isnull", Value::native("isnull", |_, args| missing_mask(args, "isnull", true))),
        ("notna", Value::native("notna", |_, args| missing_mask(args, "notna", false))),
        ("notnull", Value::native("notnull", |_, args| missing_mask(args, "notnull", false))),
        ("concat", Value::native("concat", concat)),
        (
            "DateOffset",
            Value::native("DateOffset", |_, args| {
                Ok(Value::RelDelta(reldelta_from_keywords("DateOffset", args)?))
            }),
        ),
        ("NaT", Value::None),
    ]
}

fn record_pairs(value: &Value) -> Result<Vec<(String, Value)>, SandboxError> {
    let Value::Dict(dict) = value else {
        return Err(SandboxError::type_error(format!(
            "DataFrame records must be dicts, not '{}'",
            value.kind()
        )));
    };
    dict.borrow()
        .iter()
        .map(|(k, v)| Ok((ops::to_str(k), v.clone())))
        .collect()
}

/// Builds frame storage from the accepted `DataFrame(...)` inputs: a list
/// of dicts, a dict of columns, or a list of rows with `columns`.
fn frame_from(data: Option<Value>, columns: Option<Vec<String>>) -> Result<FrameData, SandboxError> {
    let mut frame = match data {
        None => FrameData::from_columns(
            columns
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c, Vec::new()))
                .collect(),
        ),
        Some(Value::Dict(dict)) => {
            let dict = dict.borrow();
            let mut named = Vec::with_capacity(dict.len());
            for (k, v) in dict.iter() {
                let values = match v {
                    Value::List(_) | Value::Tuple(_) => ops::iterate(v)?,
                    other => match as_series(other) {
                        Some(series) => series.values(),
                        None => vec![other.clone()],
                    },
                };
                named.push((ops::to_str(k), values));
            }
            let lengths: Vec<usize> = named.iter().map(|(_, v)| v.len()).collect();
            let rows = lengths.iter().copied().max().unwrap_or(0);
            if lengths.iter().any(|&n| n != rows && n != 1) {
                return Err(SandboxError::value_error("All arrays must be of the same length"));
            }
            for (_, values) in named.iter_mut() {
                if values.len() == 1 && rows > 1 {
                    let fill = values[0].clone();
                    values.resize(rows, fill);
                }
            }
            FrameData::from_columns(named)
        }
        Some(other) => {
            if let Some(frame) = as_frame(&other) {
                frame.data().clone()
            } else {
                let rows = ops::iterate(&other)?;
                match rows.first() {
                    Some(Value::Dict(_)) => {
                        let records = rows
                            .iter()
                            .map(record_pairs)
                            .collect::<Result<Vec<_>, _>>()?;
                        FrameData::from_records(&records)
                    }
                    Some(_) => {
                        let rows = rows
                            .iter()
                            .map(ops::iterate)
                            .collect::<Result<Vec<_>, _>>()?;
                        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                        let names = columns
                            .clone()
                            .unwrap_or_else(|| (0..width).map(|i| i.to_string()).collect());
                        if names.len() != width {
                            return Err(SandboxError::value_error(format!(
                                "{} columns passed, passed data had {width} columns",
                                names.len()
                            )));
                        }
                        FrameData::from_columns(
                            names
                                .iter()
                                .enumerate()
                                .map(|(c, name)| {
                                    let values = rows
                                        .iter()
                                        .map(|row| row.get(c).cloned().unwrap_or(Value::None))
                                        .collect();
                                    (name.clone(), values)
                                })
                                .collect(),
                        )
                    }
                    None => FrameData::from_columns(Vec::new()),
                }
            }
        }
    };
    if let Some(columns) = columns {
        if frame.nrows() > 0 || !frame.columns.is_empty() {
            let missing: Vec<String> = columns
                .iter()
                .filter(|c| frame.column_position(c).is_none())
                .cloned()
                .collect();
            for name in missing {
                let rows = frame.nrows();
                frame.set_column(&name, vec![Value::None; rows]);
            }
            frame = frame.select(&columns)?;
        }
    }
    Ok(frame)
}

pub fn dataframe_class() -> Value {
    Value::class("DataFrame", |_, args| {
        let slots = args.bind("DataFrame", &["data", "columns"], 0)?;
        let columns = match given(slots[1].clone()) {
            Some(v) => Some(super::table::labels(&v, "columns")?),
            None => None,
        };
        Ok(DataFrame::new(frame_from(given(slots[0].clone()), columns)?).into_value())
    })
}

pub fn series_class() -> Value {
    Value::class("Series", |_, args| {
        let slots = args.bind("Series", &["data", "index", "name"], 0)?;
        let name = given(slots[2].clone());
        let (index, values) = match given(slots[0].clone()) {
            None => (Vec::new(), Vec::new()),
            Some(Value::Dict(dict)) => {
                let items = dict.borrow().items();
                items.into_iter().unzip()
            }
            Some(other) => {
                let values = match as_series(&other) {
                    Some(series) => series.values(),
                    None => ops::iterate(&other)?,
                };
                ((0..values.len() as i64).map(Value::Int).collect(), values)
            }
        };
        let index = match given(slots[1].clone()) {
            Some(labels) => {
                let labels = super::table::list_like(&labels, "index")?;
                if labels.len() != values.len() {
                    return Err(SandboxError::value_error(format!(
                        "Length of values ({}) does not match length of index ({})",
                        values.len(),
                        labels.len()
                    )));
                }
                labels
            }
            None => index,
        };
        Ok(Series::new(SeriesData {
            name,
            index,
            index_names: Vec::new(),
            values,
        })
        .into_value())
    })
}

fn timestamp_class() -> Value {
    Value::class("Timestamp", |_, args| {
        let [value] = args.exact::<1>("Timestamp")?;
        parse_datetime(&value, None, false)
    })
}

/// One `to_datetime` conversion; with `coerce`, failures become `None`.
fn parse_datetime(value: &Value, fmt: Option<&str>, coerce: bool) -> Result<Value, SandboxError> {
    let parsed = match value {
        Value::DateTime(_) => return Ok(value.clone()),
        Value::Date(d) => return Ok(Value::DateTime(ops::midnight(*d))),
        v if is_na(v) => return Ok(Value::None),
        Value::Str(text) => match fmt {
            Some(fmt) => format::strptime(text, fmt),
            None => format::parse_iso(text.trim()).ok_or_else(|| {
                SandboxError::value_error(format!(
                    "Unknown datetime string format, unable to parse: {text}"
                ))
            }),
        },
        other => Err(SandboxError::type_error(format!(
            "<class '{}'> is not convertible to datetime",
            other.kind()
        ))),
    };
    match parsed {
        Ok(dt) => Ok(Value::DateTime(dt)),
        Err(_) if coerce => Ok(Value::None),
        Err(e) => Err(e),
    }
}

fn to_datetime(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("to_datetime", &["arg", "format", "errors"], 1)?;
    let fmt = match given(slots[1].clone()) {
        Some(v) => Some(v.expect_str("format")?),
        None => None,
    };
    let coerce = match given(slots[2].clone()) {
        Some(v) => match &*v.expect_str("errors")? {
            "coerce" => true,
            "raise" | "ignore" => false,
            other => {
                return Err(SandboxError::value_error(format!(
                    "errors must be one of 'ignore', 'raise', or 'coerce', got '{other}'"
                )))
            }
        },
        None => false,
    };
    let arg = slots[0].clone().unwrap_or(Value::None);
    let convert = |v: &Value| parse_datetime(v, fmt.as_deref(), coerce);
    if let Some(series) = as_series(&arg) {
        let values = series.values().iter().map(convert).collect::<Result<_, _>>()?;
        return Ok(series.derive(values).into_value());
    }
    match &arg {
        Value::List(_) | Value::Tuple(_) => {
            let values = ops::iterate(&arg)?.iter().map(convert).collect::<Result<_, _>>()?;
            Ok(Series::from_values(None, values).into_value())
        }
        scalar => convert(scalar),
    }
}

fn missing_mask(args: Args, fname: &str, want_missing: bool) -> Result<Value, SandboxError> {
    let [value] = args.exact::<1>(fname)?;
    let test = |v: &Value| Value::Bool(is_na(v) == want_missing);
    if let Some(series) = as_series(&value) {
        let values = series.values().iter().map(test).collect();
        return Ok(series.derive(values).into_value());
    }
    if let Some(frame) = as_frame(&value) {
        let mut data = frame.data().clone();
        for column in data.data.iter_mut() {
            for cell in column.iter_mut() {
                *cell = test(cell);
            }
        }
        return Ok(DataFrame::new(data).into_value());
    }
    Ok(test(&value))
}

fn concat(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("concat", &["objs", "axis", "ignore_index"], 1)?;
    let objs = ops::iterate(slots[0].as_ref().unwrap_or(&Value::None))?;
    if int_slot(&slots[1], "axis", 0)? != 0 {
        return Err(SandboxError::value_error("concat only supports axis=0"));
    }
    let ignore_index = match given(slots[2].clone()) {
        Some(v) => ops::truthy(&v)?,
        None => false,
    };
    if objs.is_empty() {
        return Err(SandboxError::value_error("No objects to concatenate"));
    }
    if objs.iter().all(|o| as_series(o).is_some()) {
        let mut index = Vec::new();
        let mut values = Vec::new();
        for series in objs.iter().filter_map(as_series) {
            let data = series.data();
            index.extend(data.index.iter().cloned());
            values.extend(data.values.iter().cloned());
        }
        if ignore_index {
            index = (0..values.len() as i64).map(Value::Int).collect();
        }
        return Ok(Series::new(SeriesData {
            name: None,
            index,
            index_names: Vec::new(),
            values,
        })
        .into_value());
    }
    let frames = objs
        .iter()
        .map(|o| {
            as_frame(o).ok_or_else(|| {
                SandboxError::type_error(format!(
                    "cannot concatenate object of type '{}'; only Series and DataFrame objs are valid",
                    o.kind()
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut columns: Vec<String> = Vec::new();
    for frame in &frames {
        for c in &frame.data().columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }
    let mut data: Vec<Vec<Value>> = vec![Vec::new(); columns.len()];
    let mut index = Vec::new();
    for frame in &frames {
        let part = frame.data();
        let rows = part.nrows();
        for (c, name) in columns.iter().enumerate() {
            match part.column(name) {
                Some(values) => data[c].extend(values.iter().cloned()),
                None => data[c].extend(std::iter::repeat(Value::Float(f64::NAN)).take(rows)),
            }
        }
        index.extend(part.index.iter().cloned());
    }
    if ignore_index {
        index = (0..index.len() as i64).map(Value::Int).collect();
    }
    Ok(DataFrame::new(FrameData {
        columns,
        data,
        index,
        index_names: Vec::new(),
    })
    .into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::Dict;

    fn call(func: &Value, args: Vec<Value>) -> Result<Value, SandboxError> {
        Interpreter::detached().call(func, Args::new(args))
    }

    fn kw_call(func: &Value, keywords: Vec<(&str, Value)>) -> Result<Value, SandboxError> {
        let args = Args {
            positional: Vec::new(),
            keywords: keywords
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        Interpreter::detached().call(func, args)
    }

    fn attr(module: &str, name: &str) -> Value {
        match load(module) {
            Some(Value::Module(m)) => m.get(name).unwrap(),
            _ => panic!("module {module} not loaded"),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── loading ─────────────────────────────────────────

    #[test]
    fn test_unknown_module_has_no_implementation() {
        assert!(load("os").is_none());
        assert!(load("datetime").is_some());
    }

    #[test]
    fn test_dateutil_exposes_submodule() {
        let sub = attr("dateutil", "relativedelta");
        assert!(matches!(sub, Value::Module(m) if m.name == "dateutil.relativedelta"));
    }

    // ── datetime ────────────────────────────────────────

    #[test]
    fn test_datetime_constructor_validates_day() {
        let class = datetime_class();
        let ok = call(&class, vec![Value::Int(2024), Value::Int(2), Value::Int(29)]).unwrap();
        assert_eq!(ok, Value::DateTime(ops::midnight(date(2024, 2, 29))));
        let err = call(&class, vec![Value::Int(2023), Value::Int(2), Value::Int(29)]).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: day is out of range for month");
        let err = call(&class, vec![Value::Int(2023), Value::Int(13), Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("month must be in 1..12"));
    }

    #[test]
    fn test_strptime_class_method() {
        let strptime = class_attr("datetime", "strptime").unwrap();
        let parsed = call(&strptime, vec![Value::str("2024-03-05"), Value::str("%Y-%m-%d")]).unwrap();
        assert_eq!(parsed, Value::DateTime(ops::midnight(date(2024, 3, 5))));
        assert!(class_attr("date", "strptime").is_none());
    }

    #[test]
    fn test_timedelta_mixed_units() {
        let delta = kw_call(
            &timedelta_class(),
            vec![("days", Value::Int(1)), ("hours", Value::Float(1.5))],
        )
        .unwrap();
        assert_eq!(delta, Value::TimeDelta(Duration::minutes(24 * 60 + 90)));
    }

    #[test]
    fn test_relativedelta_keywords_and_difference() {
        let delta = kw_call(
            &relativedelta_class(),
            vec![("months", Value::Int(1)), ("weeks", Value::Int(1))],
        )
        .unwrap();
        assert_eq!(
            delta,
            Value::RelDelta(RelDelta {
                months: 1,
                days: 7,
                ..RelDelta::default()
            })
        );
        let between = call(
            &relativedelta_class(),
            vec![Value::Date(date(2024, 3, 15)), Value::Date(date(2023, 1, 20))],
        )
        .unwrap();
        assert_eq!(
            between,
            Value::RelDelta(RelDelta {
                years: 1,
                months: 1,
                days: 24,
                day: None,
            })
        );
    }

    // ── math ────────────────────────────────────────────

    #[test]
    fn test_math_functions() {
        assert_eq!(call(&attr("math", "floor"), vec![Value::Float(-1.5)]).unwrap(), Value::Int(-2));
        assert_eq!(call(&attr("math", "ceil"), vec![Value::Float(1.2)]).unwrap(), Value::Int(2));
        let err = call(&attr("math", "sqrt"), vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.to_string(), "ValueError: math domain error");
        assert_eq!(
            call(&attr("math", "log"), vec![Value::Int(8), Value::Int(2)]).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            call(&attr("math", "isclose"), vec![Value::Float(0.1 + 0.2), Value::Float(0.3)]).unwrap(),
            Value::Bool(true)
        );
    }

    // ── pandas ──────────────────────────────────────────

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::dict(
            Dict::from_pairs(
                pairs
                    .iter()
                    .map(|(k, v)| (Value::str(k), v.clone()))
                    .collect(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_dataframe_from_records_and_columns() {
        let records = Value::list(vec![
            record(&[("name", Value::str("Rent")), ("amount", Value::Int(1200))]),
            record(&[("name", Value::str("Gym"))]),
        ]);
        let df = call(&dataframe_class(), vec![records]).unwrap();
        let frame = as_frame(&df).unwrap();
        assert_eq!(frame.data().columns, vec!["name", "amount"]);
        assert_eq!(frame.data().nrows(), 2);
        assert!(frame.data().column("amount").unwrap()[1].is_none());

        let columns = record(&[
            ("a", Value::list(vec![Value::Int(1), Value::Int(2)])),
            ("b", Value::str("x")),
        ]);
        let df = call(&dataframe_class(), vec![columns]).unwrap();
        let frame = as_frame(&df).unwrap();
        assert_eq!(ops::repr(&Value::list(frame.data().column("b").unwrap().to_vec())), "['x', 'x']");
    }

    #[test]
    fn test_empty_dataframe_with_columns() {
        let df = kw_call(
            &dataframe_class(),
            vec![("columns", Value::list(vec![Value::str("a"), Value::str("b")]))],
        )
        .unwrap();
        let frame = as_frame(&df).unwrap();
        assert_eq!(frame.data().columns, vec!["a", "b"]);
        assert_eq!(frame.data().nrows(), 0);
    }

    #[test]
    fn test_to_datetime_coerce() {
        let values = Value::list(vec![Value::str("2024-01-31"), Value::str("soon")]);
        let to_dt = attr("pandas", "to_datetime");
        let err = call(&to_dt, vec![values.clone()]).unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::ValueError));
        let args = Args {
            positional: vec![values],
            keywords: vec![("errors".into(), Value::str("coerce"))],
        };
        let converted = Interpreter::detached().call(&to_dt, args).unwrap();
        let series = as_series(&converted).unwrap();
        assert_eq!(series.values()[0], Value::DateTime(ops::midnight(date(2024, 1, 31))));
        assert!(series.values()[1].is_none());
    }

    #[test]
    fn test_concat_frames_union_columns() {
        let a = call(&dataframe_class(), vec![Value::list(vec![record(&[("x", Value::Int(1))])])]).unwrap();
        let b = call(&dataframe_class(), vec![Value::list(vec![record(&[("y", Value::Int(2))])])]).unwrap();
        let args = Args {
            positional: vec![Value::list(vec![a, b])],
            keywords: vec![("ignore_index".into(), Value::Bool(true))],
        };
        let joined = Interpreter::detached().call(&attr("pandas", "concat"), args).unwrap();
        let frame = as_frame(&joined).unwrap();
        assert_eq!(frame.data().columns, vec!["x", "y"]);
        assert_eq!(frame.data().index, vec![Value::Int(0), Value::Int(1)]);
        assert!(is_na(&frame.data().column("x").unwrap()[1]));
    }

    #[test]
    fn test_isna_scalar_and_series() {
        let isna = attr("pandas", "isna");
        assert_eq!(call(&isna, vec![Value::Float(f64::NAN)]).unwrap(), Value::Bool(true));
        let series = Series::from_values(None, vec![Value::Int(1), Value::None]).into_value();
        let mask = as_series(&call(&isna, vec![series]).unwrap()).unwrap();
        assert_eq!(mask.values(), vec![Value::Bool(false), Value::Bool(true)]);
    }
}
