//! `Series.str` and `Series.dt`.

use std::any::Any;

use chrono::{Datelike, NaiveDateTime, Timelike};
use regex::RegexBuilder;

use super::series::Series;
use super::{is_na, list_like, no_attribute, Tabular};
use crate::error::SandboxError;
use crate::interp::eval::Interpreter;
use crate::interp::format;
use crate::interp::ops;
use crate::interp::value::{given, Args, Value};

/// `re.IGNORECASE`, the only regex flag honoured by `str.contains`.
const IGNORECASE: i64 = 2;

const STR_METHODS: &[&str] = &[
    "contains", "startswith", "endswith", "lower", "upper", "strip", "lstrip", "rstrip", "title",
    "len", "replace", "split",
];

const DT_METHODS: &[&str] = &["strftime", "day_name", "month_name"];

fn not_iterable(kind: &str) -> SandboxError {
    SandboxError::type_error(format!("'{kind}' object is not iterable"))
}

/// Vectorised string methods; non-string cells yield `NaN`.
#[derive(Clone)]
pub struct StrAccessor(Series);

impl StrAccessor {
    pub fn new(series: Series) -> Self {
        StrAccessor(series)
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    fn map<F>(&self, mut f: F) -> Result<Value, SandboxError>
    where
        F: FnMut(&str) -> Result<Value, SandboxError>,
    {
        let values = self
            .0
            .values()
            .iter()
            .map(|v| match v {
                Value::Str(s) => f(s),
                _ => Ok(Value::Float(f64::NAN)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.0.derive(values).into_value())
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
            "contains" => {
                let slots = args.bind(name, &["pat", "case", "flags", "na", "regex"], 1)?;
                let pat = slots[0].clone().unwrap_or(Value::None).expect_str("pat")?;
                let case = match given(slots[1].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => true,
                };
                let flags = match given(slots[2].clone()) {
                    Some(v) => v.expect_int("flags")?,
                    None => 0,
                };
                let na = given(slots[3].clone());
                let regex = match given(slots[4].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => true,
                };
                let insensitive = !case || flags & IGNORECASE != 0;
                let matcher: Box<dyn Fn(&str) -> bool> = if regex {
                    let compiled = RegexBuilder::new(&pat)
                        .case_insensitive(insensitive)
                        .build()
                        .map_err(|e| SandboxError::value_error(format!("invalid pattern: {e}")))?;
                    Box::new(move |s| compiled.is_match(s))
                } else if insensitive {
                    let needle = pat.to_lowercase();
                    Box::new(move |s| s.to_lowercase().contains(&needle))
                } else {
                    let needle = pat.to_string();
                    Box::new(move |s| s.contains(&needle))
                };
                let values = self
                    .0
                    .values()
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Value::Bool(matcher(s)),
                        _ => na.clone().unwrap_or(Value::Float(f64::NAN)),
                    })
                    .collect();
                Ok(self.0.derive(values).into_value())
            }
            "startswith" | "endswith" => {
                let slots = args.bind(name, &["pat", "na"], 1)?;
                let pat = slots[0].clone().unwrap_or(Value::None);
                let prefixes: Vec<String> = match &pat {
                    Value::Str(s) => vec![s.to_string()],
                    Value::Tuple(_) => list_like(&pat, name)?
                        .iter()
                        .map(|p| p.expect_str(name).map(|s| s.to_string()))
                        .collect::<Result<_, _>>()?,
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "expected a string or tuple, not {}",
                            other.kind()
                        )))
                    }
                };
                let na = given(slots[1].clone());
                let ends = name == "endswith";
                let values = self
                    .0
                    .values()
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Value::Bool(prefixes.iter().any(|p| {
                            if ends {
                                s.ends_with(p.as_str())
                            } else {
                                s.starts_with(p.as_str())
                            }
                        })),
                        _ => na.clone().unwrap_or(Value::Float(f64::NAN)),
                    })
                    .collect();
                Ok(self.0.derive(values).into_value())
            }
            "lower" => {
                args.exact::<0>(name)?;
                self.map(|s| Ok(Value::str(s.to_lowercase())))
            }
            "upper" => {
                args.exact::<0>(name)?;
                self.map(|s| Ok(Value::str(s.to_uppercase())))
            }
            "title" => {
                args.exact::<0>(name)?;
                self.map(|s| Ok(Value::str(ops::title_case(s))))
            }
            "strip" | "lstrip" | "rstrip" => {
                let slots = args.bind(name, &["to_strip"], 0)?;
                let chars: Option<Vec<char>> = match given(slots[0].clone()) {
                    Some(v) => Some(v.expect_str("to_strip")?.chars().collect()),
                    None => None,
                };
                let pattern = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                self.map(|s| {
                    let out = match name {
                        "lstrip" => s.trim_start_matches(pattern),
                        "rstrip" => s.trim_end_matches(pattern),
                        _ => s.trim_matches(pattern),
                    };
                    Ok(Value::str(out))
                })
            }
            "len" => {
                args.exact::<0>(name)?;
                self.map(|s| Ok(Value::Int(s.chars().count() as i64)))
            }
            "replace" => {
                let slots = args.bind(name, &["pat", "repl", "regex"], 2)?;
                let pat = slots[0].clone().unwrap_or(Value::None).expect_str("pat")?;
                let repl = slots[1].clone().unwrap_or(Value::None).expect_str("repl")?;
                let regex = match given(slots[2].clone()) {
                    Some(v) => ops::truthy(&v)?,
                    None => false,
                };
                if regex {
                    let compiled = RegexBuilder::new(&pat)
                        .build()
                        .map_err(|e| SandboxError::value_error(format!("invalid pattern: {e}")))?;
                    return self.map(|s| Ok(Value::str(compiled.replace_all(s, &*repl))));
                }
                self.map(|s| Ok(Value::str(s.replace(&*pat, &repl))))
            }
            "split" => {
                let slots = args.bind(name, &["pat"], 0)?;
                let pat = given(slots[0].clone()).map(|p| p.expect_str("pat")).transpose()?;
                self.map(|s| {
                    let parts: Vec<Value> = match &pat {
                        Some(p) => s.split(&**p).map(Value::str).collect(),
                        None => s.split_whitespace().map(Value::str).collect(),
                    };
                    Ok(Value::list(parts))
                })
            }
            other => Err(no_attribute("StringMethods", other)),
        }
    }
}

impl Tabular for StrAccessor {
    fn kind(&self) -> &'static str {
        "StringMethods"
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError> {
        Ok(STR_METHODS
            .iter()
            .find(|m| **m == name)
            .map(|m| self.bind(*m)))
    }

    /// `s.str[i]` and `s.str[a:b]` index every string.
    fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        self.map(|s| {
            let chars: Value = Value::str(s);
            match ops::get_item(&chars, key) {
                Ok(v) => Ok(v),
                Err(e) if e.is_catchable() => Ok(Value::Float(f64::NAN)),
                Err(e) => Err(e),
            }
        })
    }

    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        Err(not_iterable(self.kind()))
    }

    fn contains(&self, _item: &Value) -> Result<bool, SandboxError> {
        Err(not_iterable(self.kind()))
    }

    fn render(&self) -> String {
        "<pandas.core.strings.accessor.StringMethods object>".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Date parts of a datetime-valued series.
#[derive(Clone, Debug)]
pub struct DtAccessor(Series);

fn as_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => Some(ops::midnight(*d)),
        _ => None,
    }
}

impl DtAccessor {
    pub fn new(series: Series) -> Result<Self, SandboxError> {
        let datelike = series
            .data()
            .values
            .iter()
            .all(|v| is_na(v) || as_datetime(v).is_some());
        if !datelike {
            return Err(SandboxError::attribute_error(
                "Can only use .dt accessor with datetimelike values",
            ));
        }
        Ok(DtAccessor(series))
    }

    pub fn into_value(self) -> Value {
        Value::table(self)
    }

    fn map<F>(&self, f: F) -> Value
    where
        F: Fn(NaiveDateTime) -> Value,
    {
        let values = self
            .0
            .values()
            .iter()
            .map(|v| as_datetime(v).map_or(Value::None, &f))
            .collect();
        self.0.derive(values).into_value()
    }

    fn bind(&self, name: &'static str) -> Value {
        let this = self.clone();
        Value::native(name, move |_interp, args| this.call_method(name, args))
    }

    fn call_method(&self, name: &str, args: Args) -> Result<Value, SandboxError> {
        match name {
            "strftime" => {
                let [fmt] = args.exact::<1>(name)?;
                let fmt = fmt.expect_str("date_format")?;
                Ok(self.map(|dt| Value::str(format::strftime(&dt, &fmt))))
            }
            "day_name" => {
                args.exact::<0>(name)?;
                Ok(self.map(|dt| Value::str(format::strftime(&dt, "%A"))))
            }
            "month_name" => {
                args.exact::<0>(name)?;
                Ok(self.map(|dt| Value::str(format::strftime(&dt, "%B"))))
            }
            other => Err(no_attribute("DatetimeProperties", other)),
        }
    }
}

impl Tabular for DtAccessor {
    fn kind(&self) -> &'static str {
        "DatetimeProperties"
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn get_attr(&self, name: &str) -> Result<Option<Value>, SandboxError> {
        let int = |f: fn(&NaiveDateTime) -> u32| self.map(move |dt| Value::Int(i64::from(f(&dt))));
        let value = match name {
            "year" => self.map(|dt| Value::Int(i64::from(dt.year()))),
            "month" => int(|dt| dt.month()),
            "day" => int(|dt| dt.day()),
            "hour" => int(|dt| dt.hour()),
            "minute" => int(|dt| dt.minute()),
            "weekday" | "dayofweek" | "day_of_week" => int(|dt| dt.weekday().num_days_from_monday()),
            "date" => self.map(|dt| Value::Date(dt.date())),
            name => return Ok(DT_METHODS.iter().find(|m| **m == name).map(|m| self.bind(*m))),
        };
        Ok(Some(value))
    }

    fn get_item(&self, _key: &Value) -> Result<Value, SandboxError> {
        Err(SandboxError::type_error(
            "'DatetimeProperties' object is not subscriptable",
        ))
    }

    fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        Err(not_iterable(self.kind()))
    }

    fn contains(&self, _item: &Value) -> Result<bool, SandboxError> {
        Err(not_iterable(self.kind()))
    }

    fn render(&self) -> String {
        "<pandas.core.indexes.accessors.DatetimeProperties object>".to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::as_series;
    use chrono::NaiveDate;

    fn names() -> Series {
        Series::from_values(
            Some(Value::str("name")),
            vec![
                Value::str("Netflix Subscription"),
                Value::str("Uber Eats [pending]"),
                Value::None,
            ],
        )
    }

    fn values_of(value: Value) -> Vec<Value> {
        as_series(&value).unwrap().values()
    }

    #[test]
    fn test_contains_case_insensitive_regex() {
        let accessor = StrAccessor::new(names());
        let args = Args {
            positional: vec![Value::str("netflix|spotify")],
            keywords: vec![("case".into(), Value::Bool(false))],
        };
        let mut interp = Interpreter::detached();
        let result = values_of(accessor.call_method(&mut interp, "contains", args).unwrap());
        assert_eq!(result[0], Value::Bool(true));
        assert_eq!(result[1], Value::Bool(false));
        assert!(is_na(&result[2]));
    }

    #[test]
    fn test_contains_literal_brackets_without_regex() {
        let accessor = StrAccessor::new(names());
        let args = Args {
            positional: vec![Value::str("[pending]")],
            keywords: vec![("regex".into(), Value::Bool(false))],
        };
        let mut interp = Interpreter::detached();
        let result = values_of(accessor.call_method(&mut interp, "contains", args).unwrap());
        assert_eq!(result[1], Value::Bool(true));
    }

    #[test]
    fn test_startswith_accepts_tuple() {
        let accessor = StrAccessor::new(names());
        let prefixes = Value::tuple(vec![Value::str("Uber"), Value::str("Lyft")]);
        let mut interp = Interpreter::detached();
        let result = values_of(
            accessor
                .call_method(&mut interp, "startswith", Args::new(vec![prefixes]))
                .unwrap(),
        );
        assert_eq!(result[..2], [Value::Bool(false), Value::Bool(true)]);
    }

    #[test]
    fn test_title_and_slicing() {
        let accessor = StrAccessor::new(names());
        let sliced = values_of(accessor.get_item(&Value::Slice(None, Some(4), None)).unwrap());
        assert_eq!(sliced[0], Value::str("Netf"));
    }

    #[test]
    fn test_dt_parts() {
        let when = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        let series = Series::from_values(None, vec![Value::Date(when), Value::None]);
        let dt = DtAccessor::new(series).unwrap();
        let months = values_of(dt.get_attr("month").unwrap().unwrap());
        assert_eq!(months[0], Value::Int(3));
        assert_eq!(months[1], Value::None);
        let weekday = values_of(dt.get_attr("weekday").unwrap().unwrap());
        assert_eq!(weekday[0], Value::Int(6));
    }

    #[test]
    fn test_dt_rejects_non_dates() {
        let err = DtAccessor::new(names()).unwrap_err();
        assert!(err.to_string().contains("datetimelike"));
    }
}
