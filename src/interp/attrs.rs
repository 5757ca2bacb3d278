//! Native attribute resolution: bound methods of builtin values and the
//! properties of date/time values. No policy lives here; the attribute
//! guard decides whether a lookup may happen at all.

use std::rc::Rc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::builtins;
use super::eval::Interpreter;
use super::format;
use super::modules;
use super::ops;
use super::value::{given, set_insert, Args, Value};
use crate::error::{ErrorClass, SandboxError};

type Method = fn(&mut Interpreter, &Value, &str, Args) -> Result<Value, SandboxError>;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "title", "capitalize", "format", "find", "index", "count", "isdigit", "isalpha",
    "isspace", "zfill", "ljust", "rjust", "center", "splitlines",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "update", "pop", "setdefault", "copy", "clear",
];
const SET_METHODS: &[&str] = &["add", "discard", "remove", "update"];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DATE_METHODS: &[&str] = &["weekday", "isoweekday", "date", "strftime", "isoformat", "replace"];

fn no_attribute(value: &Value, name: &str) -> SandboxError {
    SandboxError::attribute_error(format!(
        "'{}' object has no attribute '{name}'",
        value.kind()
    ))
}

fn bind(receiver: &Value, name: &str, methods: &[&'static str], method: Method) -> Option<Value> {
    let name: &'static str = methods.iter().find(|m| **m == name)?;
    let receiver = receiver.clone();
    Some(Value::native(name, move |interp, args| {
        method(interp, &receiver, name, args)
    }))
}

/// Resolves `value.name` without any guard check.
pub fn get_attribute(value: &Value, name: &str) -> Result<Value, SandboxError> {
    let found = match value {
        Value::Table(t) => t.get_attr(name)?,
        Value::Module(m) => {
            return m.get(name).ok_or_else(|| {
                SandboxError::attribute_error(format!(
                    "module '{}' has no attribute '{name}'",
                    m.name
                ))
            })
        }
        Value::Class(c) => modules::class_attr(c.name, name),
        Value::Str(_) => bind(value, name, STR_METHODS, str_method),
        Value::List(_) => bind(value, name, LIST_METHODS, list_method),
        Value::Dict(_) => bind(value, name, DICT_METHODS, dict_method),
        Value::Set(_) => bind(value, name, SET_METHODS, set_method),
        Value::Tuple(_) => bind(value, name, TUPLE_METHODS, tuple_method),
        Value::DateTime(dt) => datetime_property(dt, name)
            .or_else(|| bind(value, name, DATE_METHODS, date_method)),
        Value::Date(d) => date_property(d, name)
            .or_else(|| bind(value, name, DATE_METHODS, date_method)),
        Value::TimeDelta(d) => {
            let (days, seconds, micros) = ops::timedelta_parts(d);
            match name {
                "days" => Some(Value::Int(days)),
                "seconds" => Some(Value::Int(seconds)),
                "microseconds" => Some(Value::Int(micros)),
                "total_seconds" => {
                    let total = d.num_microseconds().map_or(d.num_seconds() as f64, |m| m as f64 / 1e6);
                    Some(Value::native("total_seconds", move |_, args| {
                        args.exact::<0>("total_seconds")?;
                        Ok(Value::Float(total))
                    }))
                }
                _ => None,
            }
        }
        Value::RelDelta(r) => match name {
            "years" => Some(Value::Int(r.years)),
            "months" => Some(Value::Int(r.months)),
            "days" => Some(Value::Int(r.days)),
            "day" => Some(r.day.map_or(Value::None, |d| Value::Int(i64::from(d)))),
            _ => None,
        },
        Value::Exception(e) => match name {
            "args" => Some(Value::tuple(vec![Value::str(&e.message)])),
            _ => None,
        },
        Value::Printer(capture) => match name {
            "_call_print" => {
                let capture = capture.clone();
                Some(Value::native("_call_print", move |_, args| {
                    capture.print(&builtins::print_text(args)?);
                    Ok(Value::None)
                }))
            }
            _ => None,
        },
        _ => None,
    };
    found.ok_or_else(|| no_attribute(value, name))
}

// ── str ─────────────────────────────────────────────────

fn text_arg(value: &Value, what: &str) -> Result<Rc<str>, SandboxError> {
    value.expect_str(what)
}

fn pad(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let padding = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, padding),
        '>' => (padding, 0),
        _ => {
            let left = padding / 2 + (padding & width as usize & 1);
            (left, padding - left)
        }
    };
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    format!("{}{s}{}", fill_str(left), fill_str(right))
}

fn fill_char(slot: &Option<Value>) -> Result<char, SandboxError> {
    match given(slot.clone()) {
        None => Ok(' '),
        Some(v) => {
            let text = v.expect_str("fillchar")?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(SandboxError::type_error(
                    "The fill character must be exactly one character long",
                )),
            }
        }
    }
}

fn prefixes(value: &Value, fname: &str) -> Result<Vec<Rc<str>>, SandboxError> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Tuple(items) => items.iter().map(|v| text_arg(v, fname)).collect(),
        other => Err(SandboxError::type_error(format!(
            "{fname} first arg must be str or a tuple of str, not {}",
            other.kind()
        ))),
    }
}

fn str_method(_interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let s: &str = recv.as_str().unwrap_or_default();
    match name {
        "upper" => {
            args.exact::<0>(name)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            args.exact::<0>(name)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "title" => {
            args.exact::<0>(name)?;
            Ok(Value::str(ops::title_case(s)))
        }
        "capitalize" => {
            args.exact::<0>(name)?;
            let mut chars = s.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            }))
        }
        "strip" | "lstrip" | "rstrip" => {
            let slots = args.bind(name, &["chars"], 0)?;
            let chars: Option<Vec<char>> = match given(slots[0].clone()) {
                Some(v) => Some(text_arg(&v, "chars")?.chars().collect()),
                None => None,
            };
            let strip = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::str(match name {
                "lstrip" => s.trim_start_matches(strip),
                "rstrip" => s.trim_end_matches(strip),
                _ => s.trim_matches(strip),
            }))
        }
        "split" => {
            let slots = args.bind(name, &["sep", "maxsplit"], 0)?;
            let maxsplit = match given(slots[1].clone()) {
                Some(v) => v.expect_int("maxsplit")?,
                None => -1,
            };
            let parts: Vec<Value> = match given(slots[0].clone()) {
                None => {
                    let mut parts: Vec<String> = Vec::new();
                    let mut rest = s.trim_start();
                    while !rest.is_empty() {
                        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
                            parts.push(rest.to_string());
                            break;
                        }
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    parts.into_iter().map(Value::from).collect()
                }
                Some(sep) => {
                    let sep = text_arg(&sep, "sep")?;
                    if sep.is_empty() {
                        return Err(SandboxError::value_error("empty separator"));
                    }
                    if maxsplit >= 0 {
                        s.splitn(maxsplit as usize + 1, &*sep).map(Value::str).collect()
                    } else {
                        s.split(&*sep).map(Value::str).collect()
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            args.exact::<0>(name)?;
            Ok(Value::list(s.lines().map(Value::str).collect()))
        }
        "join" => {
            let [iterable] = args.exact::<1>(name)?;
            let items = ops::iterate(&iterable)?;
            let mut parts = Vec::with_capacity(items.len());
            let mut total = s.len() * items.len().saturating_sub(1);
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => {
                        total += p.len();
                        parts.push(&**p);
                    }
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.kind()
                        )))
                    }
                }
            }
            if total > ops::MAX_STRING {
                return Err(too_long());
            }
            Ok(Value::str(parts.join(s)))
        }
        "replace" => {
            let slots = args.bind(name, &["old", "new", "count"], 2)?;
            let old = text_arg(slots[0].as_ref().unwrap_or(&Value::None), "old")?;
            let new = text_arg(slots[1].as_ref().unwrap_or(&Value::None), "new")?;
            let count = match given(slots[2].clone()) {
                Some(v) => v.expect_int("count")?,
                None => -1,
            };
            let found = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*old).count()
            };
            let replacements = if count < 0 { found } else { found.min(count as usize) };
            if s.len() - replacements * old.len() + replacements * new.len() > ops::MAX_STRING {
                return Err(too_long());
            }
            let replaced = if count < 0 {
                s.replace(&*old, &new)
            } else {
                s.replacen(&*old, &new, count as usize)
            };
            Ok(Value::str(replaced))
        }
        "startswith" | "endswith" => {
            let [prefix] = args.exact::<1>(name)?;
            let options = prefixes(&prefix, name)?;
            let hit = options.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(&**p)
                } else {
                    s.ends_with(&**p)
                }
            });
            Ok(Value::Bool(hit))
        }
        "format" => Ok(Value::str(format::format_template(
            s,
            &args.positional,
            &args.keywords,
        )?)),
        "find" | "index" => {
            let [sub] = args.exact::<1>(name)?;
            let sub = text_arg(&sub, "sub")?;
            match s.find(&*sub) {
                Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                None if name == "find" => Ok(Value::Int(-1)),
                None => Err(SandboxError::value_error("substring not found")),
            }
        }
        "count" => {
            let [sub] = args.exact::<1>(name)?;
            let sub = text_arg(&sub, "sub")?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*sub).count()
            };
            Ok(Value::Int(n as i64))
        }
        "isdigit" | "isalpha" | "isspace" => {
            args.exact::<0>(name)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
        }
        "zfill" => {
            let [width] = args.exact::<1>(name)?;
            let width = width_arg(&width)?;
            let (sign, digits) = match s.strip_prefix(['+', '-']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            let padded = pad(digits, width - sign.len() as i64, '0', '>');
            Ok(Value::str(format!("{sign}{padded}")))
        }
        "ljust" | "rjust" | "center" => {
            let slots = args.bind(name, &["width", "fillchar"], 1)?;
            let width = width_arg(slots[0].as_ref().unwrap_or(&Value::None))?;
            let fill = fill_char(&slots[1])?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Ok(Value::str(pad(s, width, fill, align)))
        }
        other => Err(no_attribute(recv, other)),
    }
}

fn too_long() -> SandboxError {
    SandboxError::raised(ErrorClass::OverflowError, "string too long")
}

/// Padding width argument, at most the string cap.
fn width_arg(value: &Value) -> Result<i64, SandboxError> {
    let width = value.expect_int("width")?;
    if width > ops::MAX_STRING as i64 {
        return Err(too_long());
    }
    Ok(width)
}

// ── list / tuple / set ──────────────────────────────────

fn list_method(interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let Value::List(items) = recv else {
        return Err(no_attribute(recv, name));
    };
    match name {
        "append" => {
            let [item] = args.exact::<1>(name)?;
            let mut items = items.borrow_mut();
            if items.len() >= ops::MAX_SEQUENCE {
                return Err(SandboxError::raised(
                    ErrorClass::OverflowError,
                    "list too long",
                ));
            }
            interp.track_store(recv, &item);
            items.push(item);
            Ok(Value::None)
        }
        "extend" => {
            let [iterable] = args.exact::<1>(name)?;
            let extra = ops::iterate(&iterable)?;
            let mut items = items.borrow_mut();
            if items.len() + extra.len() > ops::MAX_SEQUENCE {
                return Err(SandboxError::raised(
                    ErrorClass::OverflowError,
                    "list too long",
                ));
            }
            if let Some(held) = extra.iter().find(|v| v.holds_references()) {
                interp.track_store(recv, held);
            }
            items.extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            let slots = args.bind(name, &["index"], 0)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(SandboxError::index_error("pop from empty list"));
            }
            let index = match given(slots[0].clone()) {
                Some(v) => v.expect_int("index")?,
                None => -1,
            };
            let i = ops::normalize_index(index, items.len(), "pop")?;
            Ok(items.remove(i))
        }
        "insert" => {
            let [index, item] = args.exact::<2>(name)?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let index = index.expect_int("index")?;
            let at = if index < 0 { (len + index).max(0) } else { index.min(len) };
            interp.track_store(recv, &item);
            items.insert(at as usize, item);
            Ok(Value::None)
        }
        "remove" => {
            let [item] = args.exact::<1>(name)?;
            let mut items = items.borrow_mut();
            let i = items
                .iter()
                .position(|v| ops::equals(v, &item))
                .ok_or_else(|| SandboxError::value_error("list.remove(x): x not in list"))?;
            items.remove(i);
            Ok(Value::None)
        }
        "index" => {
            let [item] = args.exact::<1>(name)?;
            let i = items
                .borrow()
                .iter()
                .position(|v| ops::equals(v, &item))
                .ok_or_else(|| SandboxError::value_error(format!("{} is not in list", ops::repr(&item))))?;
            Ok(Value::Int(i as i64))
        }
        "count" => {
            let [item] = args.exact::<1>(name)?;
            Ok(Value::Int(
                items.borrow().iter().filter(|v| ops::equals(v, &item)).count() as i64,
            ))
        }
        "sort" => {
            let slots = args.bind(name, &["key", "reverse"], 0)?;
            let snapshot = items.borrow().clone();
            let keys = match given(slots[0].clone()) {
                Some(key) => snapshot
                    .iter()
                    .map(|v| interp.call(&key, Args::new(vec![v.clone()])))
                    .collect::<Result<Vec<_>, _>>()?,
                None => snapshot.clone(),
            };
            let reverse = match given(slots[1].clone()) {
                Some(v) => ops::truthy(&v)?,
                None => false,
            };
            let order = ops::sort_order(&keys, reverse)?;
            *items.borrow_mut() = order.into_iter().map(|i| snapshot[i].clone()).collect();
            Ok(Value::None)
        }
        "reverse" => {
            args.exact::<0>(name)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            args.exact::<0>(name)?;
            Ok(Value::list(items.borrow().clone()))
        }
        "clear" => {
            args.exact::<0>(name)?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(no_attribute(recv, other)),
    }
}

fn tuple_method(_interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let Value::Tuple(items) = recv else {
        return Err(no_attribute(recv, name));
    };
    let [item] = args.exact::<1>(name)?;
    match name {
        "index" => items
            .iter()
            .position(|v| ops::equals(v, &item))
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| SandboxError::value_error("tuple.index(x): x not in tuple")),
        _ => Ok(Value::Int(
            items.iter().filter(|v| ops::equals(v, &item)).count() as i64,
        )),
    }
}

fn set_method(_interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let Value::Set(items) = recv else {
        return Err(no_attribute(recv, name));
    };
    let [arg] = args.exact::<1>(name)?;
    match name {
        "add" => set_insert(&mut items.borrow_mut(), arg)?,
        "update" => {
            for item in ops::iterate(&arg)? {
                set_insert(&mut items.borrow_mut(), item)?;
            }
        }
        _ => {
            let mut items = items.borrow_mut();
            match items.iter().position(|v| ops::equals(v, &arg)) {
                Some(i) => {
                    items.remove(i);
                }
                None if name == "remove" => return Err(SandboxError::key_error(ops::repr(&arg))),
                None => {}
            }
        }
    }
    Ok(Value::None)
}

// ── dict ────────────────────────────────────────────────

fn dict_method(interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let Value::Dict(dict) = recv else {
        return Err(no_attribute(recv, name));
    };
    match name {
        "get" => {
            let slots = args.bind(name, &["key", "default"], 1)?;
            let key = slots[0].clone().unwrap_or(Value::None);
            let found = dict.borrow().get(&key)?;
            Ok(found.or_else(|| slots[1].clone()).unwrap_or(Value::None))
        }
        "keys" => {
            args.exact::<0>(name)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            args.exact::<0>(name)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            args.exact::<0>(name)?;
            Ok(Value::list(
                dict.borrow()
                    .items()
                    .into_iter()
                    .map(|(k, v)| Value::tuple(vec![k, v]))
                    .collect(),
            ))
        }
        "update" => {
            let pairs = mapping_pairs(args, "update")?;
            if let Some((_, held)) = pairs.iter().find(|(_, v)| v.holds_references()) {
                interp.track_store(recv, held);
            }
            let mut dict = dict.borrow_mut();
            for (k, v) in pairs {
                dict.insert(k, v)?;
            }
            Ok(Value::None)
        }
        "pop" => {
            let slots = args.bind(name, &["key", "default"], 1)?;
            let key = slots[0].clone().unwrap_or(Value::None);
            let removed = dict.borrow_mut().remove(&key)?;
            match (removed, slots[1].clone()) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(SandboxError::key_error(ops::repr(&key))),
            }
        }
        "setdefault" => {
            let slots = args.bind(name, &["key", "default"], 1)?;
            let key = slots[0].clone().unwrap_or(Value::None);
            let existing = dict.borrow().get(&key)?;
            match existing {
                Some(v) => Ok(v),
                None => {
                    let default = slots[1].clone().unwrap_or(Value::None);
                    interp.track_store(recv, &default);
                    dict.borrow_mut().insert(key, default.clone())?;
                    Ok(default)
                }
            }
        }
        "copy" => {
            args.exact::<0>(name)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            args.exact::<0>(name)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(no_attribute(recv, other)),
    }
}

// ── date / time ─────────────────────────────────────────

fn datetime_property(dt: &NaiveDateTime, name: &str) -> Option<Value> {
    let v = match name {
        "hour" => dt.hour(),
        "minute" => dt.minute(),
        "second" => dt.second(),
        "microsecond" => dt.nanosecond() / 1_000,
        _ => return date_property(&dt.date(), name),
    };
    Some(Value::Int(i64::from(v)))
}

fn date_property(d: &NaiveDate, name: &str) -> Option<Value> {
    let v = match name {
        "year" => i64::from(d.year()),
        "month" => i64::from(d.month()),
        "day" => i64::from(d.day()),
        _ => return None,
    };
    Some(Value::Int(v))
}

fn date_method(_interp: &mut Interpreter, recv: &Value, name: &str, args: Args) -> Result<Value, SandboxError> {
    let (dt, is_date) = match recv {
        Value::DateTime(dt) => (*dt, false),
        Value::Date(d) => (ops::midnight(*d), true),
        other => return Err(no_attribute(other, name)),
    };
    match name {
        "weekday" => {
            args.exact::<0>(name)?;
            Ok(Value::Int(i64::from(dt.weekday().num_days_from_monday())))
        }
        "isoweekday" => {
            args.exact::<0>(name)?;
            Ok(Value::Int(i64::from(dt.weekday().number_from_monday())))
        }
        "date" if !is_date => {
            args.exact::<0>(name)?;
            Ok(Value::Date(dt.date()))
        }
        "strftime" => {
            let [fmt] = args.exact::<1>(name)?;
            Ok(Value::str(format::strftime(&dt, &fmt.expect_str("format")?)))
        }
        "isoformat" => {
            args.exact::<0>(name)?;
            Ok(Value::str(if is_date {
                dt.date().format("%Y-%m-%d").to_string()
            } else {
                ops::datetime_str(&dt).replacen(' ', "T", 1)
            }))
        }
        "replace" => {
            let mut fields = [
                ("year", i64::from(dt.year())),
                ("month", i64::from(dt.month())),
                ("day", i64::from(dt.day())),
                ("hour", i64::from(dt.hour())),
                ("minute", i64::from(dt.minute())),
                ("second", i64::from(dt.second())),
                ("microsecond", i64::from(dt.nanosecond() / 1_000)),
            ];
            let allowed = if is_date { 3 } else { fields.len() };
            if !args.positional.is_empty() {
                return Err(SandboxError::type_error("replace() takes keyword arguments only"));
            }
            for (key, value) in &args.keywords {
                let slot = fields[..allowed]
                    .iter_mut()
                    .find(|(n, _)| *n == key.as_str())
                    .ok_or_else(|| {
                        SandboxError::type_error(format!(
                            "replace() got an unexpected keyword argument '{key}'"
                        ))
                    })?;
                slot.1 = value.expect_int(key)?;
            }
            let [y, mo, d, h, mi, s, us] = fields.map(|(_, v)| v);
            let built = modules::build_datetime(y, mo, d, h, mi, s, us)?;
            Ok(if is_date {
                Value::Date(built.date())
            } else {
                Value::DateTime(built)
            })
        }
        other => Err(no_attribute(recv, other)),
    }
}

/// Key/value pairs of `dict(...)` and `dict.update(...)` arguments.
pub(crate) fn mapping_pairs(
    args: Args,
    fname: &str,
) -> Result<Vec<(Value, Value)>, SandboxError> {
    if args.positional.len() > 1 {
        return Err(SandboxError::type_error(format!(
            "{fname} expected at most 1 argument, got {}",
            args.positional.len()
        )));
    }
    let mut pairs = match args.positional.first() {
        Some(source) => pairs_of(source)?,
        None => Vec::new(),
    };
    pairs.extend(args.keywords.into_iter().map(|(k, v)| (Value::str(k), v)));
    Ok(pairs)
}

fn pairs_of(source: &Value) -> Result<Vec<(Value, Value)>, SandboxError> {
    if let Value::Dict(d) = source {
        return Ok(d.borrow().items());
    }
    let mut pairs = Vec::new();
    for (i, item) in ops::iterate(source)?.into_iter().enumerate() {
        let parts = ops::iterate(&item)?;
        let [k, v]: [Value; 2] = parts.try_into().map_err(|parts: Vec<Value>| {
            SandboxError::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                parts.len()
            ))
        })?;
        pairs.push((k, v));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::Dict;

    fn call(value: &Value, name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
        let method = get_attribute(value, name)?;
        let mut interp = Interpreter::detached();
        interp.call(&method, Args::new(args))
    }

    // ── str ─────────────────────────────────────────────

    #[test]
    fn test_str_split_and_case() {
        let s = Value::str("  Coffee  Shop ");
        assert_eq!(
            ops::repr(&call(&s, "split", vec![]).unwrap()),
            "['Coffee', 'Shop']"
        );
        assert_eq!(call(&s, "strip", vec![]).unwrap(), Value::str("Coffee  Shop"));
        let t = Value::str("a,b,,c");
        assert_eq!(
            ops::repr(&call(&t, "split", vec![Value::str(","), Value::Int(1)]).unwrap()),
            "['a', 'b,,c']"
        );
        assert_eq!(call(&Value::str("hello world"), "capitalize", vec![]).unwrap(), Value::str("Hello world"));
    }

    #[test]
    fn test_str_padding() {
        assert_eq!(call(&Value::str("7"), "zfill", vec![Value::Int(3)]).unwrap(), Value::str("007"));
        assert_eq!(call(&Value::str("-7"), "zfill", vec![Value::Int(4)]).unwrap(), Value::str("-007"));
        assert_eq!(
            call(&Value::str("ab"), "center", vec![Value::Int(5), Value::str("*")]).unwrap(),
            Value::str("**ab*")
        );
    }

    fn assert_overflow(result: Result<Value, SandboxError>) {
        let err = result.unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::OverflowError), "{err}");
        assert!(err.is_catchable());
    }

    #[test]
    fn test_str_padding_width_is_capped() {
        let huge = Value::Int(99_999_999_999);
        assert_overflow(call(&Value::str("x"), "zfill", vec![huge.clone()]));
        assert_overflow(call(&Value::str("x"), "ljust", vec![huge.clone()]));
        assert_overflow(call(&Value::str("x"), "center", vec![huge, Value::str("*")]));
    }

    #[test]
    fn test_join_length_checked_before_allocating() {
        let chunk = Value::str("x".repeat(ops::MAX_STRING / 2 + 1));
        let parts = Value::list(vec![chunk.clone(), chunk]);
        assert_overflow(call(&Value::str(""), "join", vec![parts]));

        let many = Value::list(vec![Value::str(""); 1_000]);
        let sep = Value::str("y".repeat(ops::MAX_STRING / 100));
        assert_overflow(call(&sep, "join", vec![many]));

        let small = Value::list(vec![Value::str("a"), Value::str("b")]);
        assert_eq!(call(&Value::str(", "), "join", vec![small]).unwrap(), Value::str("a, b"));
    }

    #[test]
    fn test_replace_length_checked_before_allocating() {
        let s = Value::str("a".repeat(1_000));
        let big = Value::str("b".repeat(ops::MAX_STRING / 100));
        assert_overflow(call(&s, "replace", vec![Value::str("a"), big.clone()]));
        assert_overflow(call(&s, "replace", vec![Value::str(""), big]));
        assert_eq!(
            call(&Value::str("aXa"), "replace", vec![Value::str("a"), Value::str("bb"), Value::Int(1)]).unwrap(),
            Value::str("bbXa")
        );
    }

    #[test]
    fn test_str_find_and_startswith_tuple() {
        let s = Value::str("Uber Eats");
        assert_eq!(call(&s, "find", vec![Value::str("Eats")]).unwrap(), Value::Int(5));
        assert_eq!(call(&s, "find", vec![Value::str("Lyft")]).unwrap(), Value::Int(-1));
        let options = Value::tuple(vec![Value::str("Lyft"), Value::str("Uber")]);
        assert_eq!(call(&s, "startswith", vec![options]).unwrap(), Value::Bool(true));
        assert!(call(&s, "index", vec![Value::str("x")]).is_err());
    }

    #[test]
    fn test_str_format() {
        let template = Value::str("{name} spent ${amount:,.2f}");
        let method = get_attribute(&template, "format").unwrap();
        let mut interp = Interpreter::detached();
        let args = Args {
            positional: vec![],
            keywords: vec![
                ("name".into(), Value::str("Ana")),
                ("amount".into(), Value::Float(1234.5)),
            ],
        };
        assert_eq!(
            interp.call(&method, args).unwrap(),
            Value::str("Ana spent $1,234.50")
        );
    }

    // ── containers ──────────────────────────────────────

    #[test]
    fn test_list_mutation() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1)]);
        call(&list, "append", vec![Value::Int(2)]).unwrap();
        call(&list, "insert", vec![Value::Int(0), Value::Int(9)]).unwrap();
        assert_eq!(ops::repr(&list), "[9, 3, 1, 2]");
        assert_eq!(call(&list, "pop", vec![]).unwrap(), Value::Int(2));
        let err = call(&list, "remove", vec![Value::Int(42)]).unwrap_err();
        assert!(err.to_string().contains("not in list"));
    }

    #[test]
    fn test_dict_methods() {
        let dict = Value::dict(Dict::from_pairs(vec![(Value::str("a"), Value::Int(1))]).unwrap());
        assert_eq!(call(&dict, "get", vec![Value::str("b"), Value::Int(0)]).unwrap(), Value::Int(0));
        assert_eq!(call(&dict, "setdefault", vec![Value::str("b"), Value::Int(5)]).unwrap(), Value::Int(5));
        assert_eq!(ops::repr(&call(&dict, "keys", vec![]).unwrap()), "['a', 'b']");
        let err = call(&dict, "pop", vec![Value::str("zz")]).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'zz'");
    }

    #[test]
    fn test_unknown_method_is_attribute_error() {
        let err = get_attribute(&Value::list(vec![]), "push").unwrap_err();
        assert_eq!(
            err.to_string(),
            "AttributeError: 'list' object has no attribute 'push'"
        );
    }

    // ── dates ───────────────────────────────────────────

    #[test]
    fn test_datetime_properties_and_methods() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        let value = Value::DateTime(dt);
        assert_eq!(get_attribute(&value, "month").unwrap(), Value::Int(2));
        assert_eq!(get_attribute(&value, "hour").unwrap(), Value::Int(13));
        assert_eq!(call(&value, "weekday", vec![]).unwrap(), Value::Int(3));
        assert_eq!(
            call(&value, "isoformat", vec![]).unwrap(),
            Value::str("2024-02-29T13:05:00")
        );
        let method = get_attribute(&value, "replace").unwrap();
        let mut interp = Interpreter::detached();
        let args = Args {
            positional: vec![],
            keywords: vec![("year".into(), Value::Int(2023))],
        };
        let err = interp.call(&method, args).unwrap_err();
        assert!(err.to_string().contains("day is out of range for month"));
    }

    #[test]
    fn test_timedelta_fields() {
        let delta = Value::TimeDelta(chrono::Duration::seconds(90_061));
        assert_eq!(get_attribute(&delta, "days").unwrap(), Value::Int(1));
        assert_eq!(get_attribute(&delta, "seconds").unwrap(), Value::Int(3661));
        assert_eq!(call(&delta, "total_seconds", vec![]).unwrap(), Value::Float(90_061.0));
    }
}
