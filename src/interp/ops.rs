//! Operator semantics: truthiness, conversion to text, comparison,
//! arithmetic, subscripting and iteration of native values.
//!
//! Guard hooks sit in front of the item and iteration helpers here; this
//! module only knows what the operation means, not whether it is allowed.

use std::cmp::Ordering;
use std::rc::Rc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::format;
use super::table;
use super::value::{Dict, RelDelta, Value};
use crate::error::SandboxError;

/// Upper bound on elements produced by repetition and `range`.
pub const MAX_SEQUENCE: usize = 1_000_000;
/// Upper bound on string length produced by concatenation or repetition.
pub const MAX_STRING: usize = 10_000_000;

// ── truthiness and text ─────────────────────────────────

pub fn truthy(value: &Value) -> Result<bool, SandboxError> {
    Ok(match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) | Value::Set(items) => !items.borrow().is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(d) => !d.borrow().is_empty(),
        Value::TimeDelta(d) => !d.is_zero(),
        Value::RelDelta(r) => *r != RelDelta::default(),
        Value::Table(t) => {
            return Err(SandboxError::value_error(format!(
                "The truth value of a {} is ambiguous. Use a.empty, a.any() or a.all().",
                t.kind()
            )))
        }
        _ => true,
    })
}

/// `str.title()`: upper-case the first letter of every alphabetic run.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let exponent = f.abs().log10().floor() as i32;
    if !(-4..16).contains(&exponent) {
        let text = format!("{f:e}");
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exp.abs());
    }
    let text = format!("{f}");
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn datetime_str(dt: &NaiveDateTime) -> String {
    let mut text = dt.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = dt.nanosecond() / 1_000;
    if micros != 0 {
        text.push_str(&format!(".{micros:06}"));
    }
    text
}

/// Splits a duration into Python's normalized (days, seconds, microseconds).
pub fn timedelta_parts(d: &Duration) -> (i64, i64, i64) {
    let total = d
        .num_microseconds()
        .unwrap_or_else(|| d.num_seconds().saturating_mul(1_000_000));
    let per_day = 86_400_000_000i64;
    let days = total.div_euclid(per_day);
    let rem = total.rem_euclid(per_day);
    (days, rem / 1_000_000, rem % 1_000_000)
}

pub fn timedelta_str(d: &Duration) -> String {
    let (days, seconds, micros) = timedelta_parts(d);
    let mut text = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        text.push_str(&format!("{days} day{plural}, "));
    }
    text.push_str(&format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    ));
    if micros != 0 {
        text.push_str(&format!(".{micros:06}"));
    }
    text
}

/// Container nesting past which `repr` and equality stop descending.
pub const MAX_DEPTH: usize = 100;

/// Containers on the current rendering path, so a self-reference prints
/// as `[...]` and over-deep nesting is elided.
#[derive(Default)]
struct Render {
    active: Vec<*const ()>,
}

impl Render {
    fn value(&mut self, value: &Value) -> String {
        match value {
            Value::List(items) => self.nested(Rc::as_ptr(items) as *const (), "[...]", |r| {
                r.sequence(&items.borrow(), "[", "]")
            }),
            Value::Tuple(items) => self.nested(Rc::as_ptr(items) as *const (), "(...)", |r| {
                r.sequence(items, "(", ")")
            }),
            Value::Set(items) => self.nested(Rc::as_ptr(items) as *const (), "{...}", |r| {
                let items = items.borrow();
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    r.sequence(&items, "{", "}")
                }
            }),
            Value::Dict(d) => self.nested(Rc::as_ptr(d) as *const (), "{...}", |r| {
                let inner: Vec<String> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", r.value(k), r.value(v)))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }),
            other => scalar_repr(other),
        }
    }

    fn nested(&mut self, id: *const (), elided: &str, render: impl FnOnce(&mut Self) -> String) -> String {
        if self.active.contains(&id) || self.active.len() >= MAX_DEPTH {
            return elided.to_string();
        }
        self.active.push(id);
        let out = render(self);
        self.active.pop();
        out
    }

    fn sequence(&mut self, items: &[Value], open: &str, close: &str) -> String {
        let inner: Vec<String> = items.iter().map(|v| self.value(v)).collect();
        if open == "(" && items.len() == 1 {
            return format!("({},)", inner[0]);
        }
        format!("{open}{}{close}", inner.join(", "))
    }
}

pub fn to_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::DateTime(dt) => datetime_str(dt),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::TimeDelta(d) => timedelta_str(d),
        Value::Exception(e) => e.message.clone(),
        Value::Table(t) => t.render(),
        other => repr(other),
    }
}

pub fn repr(value: &Value) -> String {
    Render::default().value(value)
}

fn scalar_repr(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_repr(*f),
        Value::Str(s) => str_repr(s),
        Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::Dict(_) => {
            Render::default().value(value)
        }
        Value::Slice(a, b, c) => {
            let part = |v: &Option<i64>| v.map_or("None".to_string(), |i| i.to_string());
            format!("slice({}, {}, {})", part(a), part(b), part(c))
        }
        Value::DateTime(dt) => {
            let mut fields = vec![
                dt.year().to_string(),
                dt.month().to_string(),
                dt.day().to_string(),
                dt.hour().to_string(),
                dt.minute().to_string(),
            ];
            let micros = dt.nanosecond() / 1_000;
            if dt.second() != 0 || micros != 0 {
                fields.push(dt.second().to_string());
            }
            if micros != 0 {
                fields.push(micros.to_string());
            }
            format!("datetime.datetime({})", fields.join(", "))
        }
        Value::Date(d) => format!("datetime.date({}, {}, {})", d.year(), d.month(), d.day()),
        Value::TimeDelta(d) => {
            let (days, seconds, micros) = timedelta_parts(d);
            let mut fields = Vec::new();
            if days != 0 {
                fields.push(format!("days={days}"));
            }
            if seconds != 0 {
                fields.push(format!("seconds={seconds}"));
            }
            if micros != 0 {
                fields.push(format!("microseconds={micros}"));
            }
            if fields.is_empty() {
                fields.push("0".to_string());
            }
            format!("datetime.timedelta({})", fields.join(", "))
        }
        Value::RelDelta(r) => {
            let mut fields = Vec::new();
            for (name, v) in [("years", r.years), ("months", r.months), ("days", r.days)] {
                if v != 0 {
                    fields.push(format!("{name}={v:+}"));
                }
            }
            if let Some(day) = r.day {
                fields.push(format!("day={day}"));
            }
            format!("relativedelta({})", fields.join(", "))
        }
        Value::Table(t) => t.render(),
        Value::Function(f) => format!("<function {}>", f.def.name),
        Value::Native(n) => format!("<built-in function {}>", n.name),
        Value::Class(c) => format!("<class '{}'>", c.name),
        Value::Type(t) => format!("<class '{}'>", t.name()),
        Value::Module(m) => format!("<module '{}'>", m.name),
        Value::ExceptionClass(c) => format!("<class '{}'>", c.name()),
        Value::Exception(e) => format!("{}({})", e.class.name(), str_repr(&e.message)),
        Value::Printer(_) => "<PrintCollector>".to_string(),
    }
}

// ── equality and ordering ───────────────────────────────

fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

pub fn midnight(d: NaiveDate) -> NaiveDateTime {
    d.and_time(NaiveTime::MIN)
}

pub fn equals(a: &Value, b: &Value) -> bool {
    equals_at(a, b, 0)
}

/// Containers nested deeper than `MAX_DEPTH` compare by identity.
fn equals_at(a: &Value, b: &Value, depth: usize) -> bool {
    let depth = depth + 1;
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (x, y) if x.is_number() && y.is_number() => match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::List(x), Value::List(y)) => {
            same_rc(x, y) || (depth < MAX_DEPTH && seq_equals(&x.borrow(), &y.borrow(), depth))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            same_rc(x, y) || (depth < MAX_DEPTH && seq_equals(x, y, depth))
        }
        (Value::Set(x), Value::Set(y)) => {
            if same_rc(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            depth < MAX_DEPTH
                && x.len() == y.len()
                && x.iter().all(|v| y.iter().any(|w| equals_at(v, w, depth)))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if same_rc(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            depth < MAX_DEPTH
                && x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if equals_at(v, &other, depth))
                })
        }
        (Value::DateTime(x), Value::DateTime(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::DateTime(x), Value::Date(y)) | (Value::Date(y), Value::DateTime(x)) => {
            *x == midnight(*y)
        }
        (Value::TimeDelta(x), Value::TimeDelta(y)) => x == y,
        (Value::RelDelta(x), Value::RelDelta(y)) => x == y,
        (Value::Slice(a1, b1, c1), Value::Slice(a2, b2, c2)) => a1 == a2 && b1 == b2 && c1 == c2,
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::ExceptionClass(x), Value::ExceptionClass(y)) => x == y,
        (Value::Exception(x), Value::Exception(y)) => same_rc(x, y),
        (Value::Class(x), Value::Class(y)) => same_rc(x, y),
        (Value::Function(x), Value::Function(y)) => same_rc(x, y),
        (Value::Native(x), Value::Native(y)) => same_rc(x, y),
        (Value::Module(x), Value::Module(y)) => same_rc(x, y),
        (Value::Table(x), Value::Table(y)) => same_rc(x, y),
        (Value::Printer(x), Value::Printer(y)) => same_rc(x, y),
        _ => false,
    }
}

fn seq_equals(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals_at(x, y, depth))
}

pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => same_rc(x, y) || x == y,
        (Value::List(x), Value::List(y)) => same_rc(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => same_rc(x, y),
        (Value::Dict(x), Value::Dict(y)) => same_rc(x, y),
        (Value::Set(x), Value::Set(y)) => same_rc(x, y),
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::ExceptionClass(x), Value::ExceptionClass(y)) => x == y,
        (Value::Function(_), _)
        | (Value::Native(_), _)
        | (Value::Class(_), _)
        | (Value::Module(_), _)
        | (Value::Table(_), _)
        | (Value::Exception(_), _)
        | (Value::Printer(_), _) => equals(a, b),
        _ => false,
    }
}

/// Ordering for `<`-style comparisons. `Ok(None)` means unordered (NaN).
pub fn compare_values(a: &Value, b: &Value) -> Result<Option<Ordering>, SandboxError> {
    compare_at(a, b, 0)
}

fn compare_at(a: &Value, b: &Value, depth: usize) -> Result<Option<Ordering>, SandboxError> {
    if depth >= MAX_DEPTH {
        return Err(SandboxError::runtime_error(
            "maximum recursion depth exceeded in comparison",
        ));
    }
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (x, y) if x.is_number() && y.is_number() => match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64().partial_cmp(&y.as_f64()),
        },
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::Date(y)) => Some(x.cmp(&midnight(*y))),
        (Value::Date(x), Value::DateTime(y)) => Some(midnight(*x).cmp(y)),
        (Value::TimeDelta(x), Value::TimeDelta(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_compare(&x.borrow(), &y.borrow(), depth + 1)?,
        (Value::Tuple(x), Value::Tuple(y)) => seq_compare(x, y, depth + 1)?,
        _ => {
            return Err(SandboxError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.kind(),
                b.kind()
            )))
        }
    };
    Ok(ordering)
}

fn seq_compare(a: &[Value], b: &[Value], depth: usize) -> Result<Option<Ordering>, SandboxError> {
    for (x, y) in a.iter().zip(b) {
        if !equals(x, y) {
            return compare_at(x, y, depth);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Stable sort permutation of `keys`. Descending order keeps equal keys
/// in their original order, like `sorted(..., reverse=True)`.
pub fn sort_order(keys: &[Value], descending: bool) -> Result<Vec<usize>, SandboxError> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match compare_values(&keys[a], &keys[b]) {
        Ok(Some(o)) if descending => o.reverse(),
        Ok(Some(o)) => o,
        Ok(None) => Ordering::Equal,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(order),
    }
}

/// `round(x, ndigits)` with round-half-to-even on the decimal value.
pub fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    if ndigits >= 0 {
        let digits = ndigits.min(17) as usize;
        return format!("{x:.digits$}").parse().unwrap_or(x);
    }
    let factor = 10f64.powi(ndigits.unsigned_abs().min(308) as i32);
    (x / factor).round_ties_even() * factor
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<Value, SandboxError> {
    if let Some(result) = table::compare(op, a, b) {
        return result;
    }
    let result = match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::NotEq => !equals(a, b),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => identical(a, b),
        CmpOp::IsNot => !identical(a, b),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let ordering = compare_values(a, b).map_err(|_| {
                SandboxError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    a.kind(),
                    b.kind()
                ))
            })?;
            match (ordering, op) {
                (None, _) => false,
                (Some(o), CmpOp::Lt) => o == Ordering::Less,
                (Some(o), CmpOp::LtE) => o != Ordering::Greater,
                (Some(o), CmpOp::Gt) => o == Ordering::Greater,
                (Some(o), _) => o != Ordering::Less,
            }
        }
    };
    Ok(Value::Bool(result))
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, SandboxError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(SandboxError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.kind()
            ))),
        },
        Value::List(items) | Value::Set(items) => {
            Ok(items.borrow().iter().any(|v| equals(v, item)))
        }
        Value::Tuple(items) => Ok(items.iter().any(|v| equals(v, item))),
        Value::Dict(d) => d.borrow().contains_key(item),
        Value::Table(t) => t.contains(item),
        other => Err(SandboxError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.kind()
        ))),
    }
}

// ── arithmetic ──────────────────────────────────────────

fn unsupported(op: &str, a: &Value, b: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        a.kind(),
        b.kind()
    ))
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn date_overflow() -> SandboxError {
    SandboxError::raised(crate::error::ErrorClass::OverflowError, "date value out of range")
}

pub fn add_reldelta(date: NaiveDate, delta: RelDelta) -> Result<NaiveDate, SandboxError> {
    let months = i64::from(date.year()) * 12 + i64::from(date.month0()) + delta.years * 12
        + delta.months;
    let year = i32::try_from(months.div_euclid(12)).map_err(|_| date_overflow())?;
    let month = months.rem_euclid(12) as u32 + 1;
    let day = delta
        .day
        .unwrap_or_else(|| date.day())
        .clamp(1, days_in_month(year, month));
    let base = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(date_overflow)?;
    let days = Duration::try_days(delta.days).ok_or_else(date_overflow)?;
    base.checked_add_signed(days).ok_or_else(date_overflow)
}

fn add_duration(dt: NaiveDateTime, d: Duration) -> Result<Value, SandboxError> {
    dt.checked_add_signed(d)
        .map(Value::DateTime)
        .ok_or_else(date_overflow)
}

fn date_plus_days(date: NaiveDate, d: &Duration) -> Result<Value, SandboxError> {
    let (days, _, _) = timedelta_parts(d);
    let days = Duration::try_days(days).ok_or_else(date_overflow)?;
    date.checked_add_signed(days)
        .map(Value::Date)
        .ok_or_else(date_overflow)
}

fn scale_duration(d: &Duration, factor: f64) -> Result<Value, SandboxError> {
    let (days, seconds, micros) = timedelta_parts(d);
    let total = (days as f64 * 86_400.0 + seconds as f64) * 1_000_000.0 + micros as f64;
    let scaled = (total * factor).round();
    if !scaled.is_finite() || scaled.abs() > 9.0e18 {
        return Err(date_overflow());
    }
    Ok(Value::TimeDelta(Duration::microseconds(scaled as i64)))
}

fn duration_micros(d: &Duration) -> f64 {
    let (days, seconds, micros) = timedelta_parts(d);
    (days as f64 * 86_400.0 + seconds as f64) * 1_000_000.0 + micros as f64
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, SandboxError> {
    let overflow = SandboxError::overflow;
    Ok(match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinOp::Div => {
            if b == 0 {
                return Err(SandboxError::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(SandboxError::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let q = if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q };
            Value::Int(q)
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(SandboxError::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let r = a.checked_rem(b).unwrap_or(0);
            Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(SandboxError::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                Value::Int(a.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::LShift => {
            if b < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if a == 0 {
                return Ok(Value::Int(0));
            }
            let shifted = u32::try_from(b)
                .ok()
                .and_then(|s| a.checked_shl(s))
                .filter(|r| r >> b == a)
                .ok_or_else(overflow)?;
            Value::Int(shifted)
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            Value::Int(if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            })
        }
    })
}

fn float_binary(op: BinOp, a: f64, b: f64, left: &Value, right: &Value) -> Result<Value, SandboxError> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(SandboxError::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(SandboxError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(SandboxError::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(SandboxError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(SandboxError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            a.powf(b)
        }
        _ => return Err(unsupported(op.symbol(), left, right)),
    }))
}

fn repeat<T: Clone>(items: &[T], count: i64, cap: usize) -> Result<Vec<T>, SandboxError> {
    let count = usize::try_from(count.max(0)).unwrap_or(0);
    if items.len().saturating_mul(count) > cap {
        return Err(SandboxError::raised(
            crate::error::ErrorClass::OverflowError,
            "repeated sequence is too large",
        ));
    }
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn check_len(len: usize, cap: usize) -> Result<(), SandboxError> {
    if len > cap {
        return Err(SandboxError::raised(
            crate::error::ErrorClass::OverflowError,
            "result is too large",
        ));
    }
    Ok(())
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, SandboxError> {
    if let Some(result) = table::binary(op, a, b) {
        return result;
    }

    match (op, a, b) {
        (BinOp::BitAnd, Value::Bool(x), Value::Bool(y)) => return Ok(Value::Bool(*x && *y)),
        (BinOp::BitOr, Value::Bool(x), Value::Bool(y)) => return Ok(Value::Bool(*x || *y)),
        (BinOp::BitXor, Value::Bool(x), Value::Bool(y)) => return Ok(Value::Bool(x != y)),
        _ => {}
    }

    if a.is_number() && b.is_number() {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return int_binary(op, x, y);
        }
        let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
        return float_binary(op, x, y, a, b);
    }

    let symbol = op.symbol();
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_len(x.len() + y.len(), MAX_STRING)?;
            Ok(Value::str(format!("{x}{y}")))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let chars: Vec<char> = s.chars().collect();
            let out = repeat(&chars, n.as_int().unwrap_or(0), MAX_STRING)?;
            Ok(Value::str(out.into_iter().collect::<String>()))
        }
        (BinOp::Mod, Value::Str(template), args) => {
            Ok(Value::str(format::percent_format(template, args)?))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut out = x.borrow().clone();
            out.extend(y.borrow().iter().cloned());
            check_len(out.len(), MAX_SEQUENCE)?;
            Ok(Value::list(out))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut out = x.to_vec();
            out.extend(y.iter().cloned());
            check_len(out.len(), MAX_SEQUENCE)?;
            Ok(Value::tuple(out))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let out = repeat(&items.borrow(), n.as_int().unwrap_or(0), MAX_SEQUENCE)?;
            Ok(Value::list(out))
        }
        (BinOp::Mul, Value::Tuple(items), n) | (BinOp::Mul, n, Value::Tuple(items))
            if n.as_int().is_some() =>
        {
            let out = repeat(items, n.as_int().unwrap_or(0), MAX_SEQUENCE)?;
            Ok(Value::tuple(out))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut out = x.borrow().clone();
            for (k, v) in y.borrow().iter() {
                out.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(out))
        }
        (_, Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            let in_y = |v: &Value| y.iter().any(|w| equals(v, w));
            let in_x = |v: &Value| x.iter().any(|w| equals(v, w));
            let items: Vec<Value> = match op {
                BinOp::BitOr => x.iter().chain(y.iter()).cloned().collect(),
                BinOp::BitAnd => x.iter().filter(|v| in_y(v)).cloned().collect(),
                BinOp::Sub => x.iter().filter(|v| !in_y(v)).cloned().collect(),
                BinOp::BitXor => x
                    .iter()
                    .filter(|v| !in_y(v))
                    .chain(y.iter().filter(|v| !in_x(v)))
                    .cloned()
                    .collect(),
                _ => return Err(unsupported(symbol, a, b)),
            };
            Value::set(items)
        }

        // ── dates and durations ──
        (BinOp::Add, Value::DateTime(dt), Value::TimeDelta(d))
        | (BinOp::Add, Value::TimeDelta(d), Value::DateTime(dt)) => add_duration(*dt, *d),
        (BinOp::Sub, Value::DateTime(dt), Value::TimeDelta(d)) => add_duration(*dt, -*d),
        (BinOp::Add, Value::Date(date), Value::TimeDelta(d))
        | (BinOp::Add, Value::TimeDelta(d), Value::Date(date)) => date_plus_days(*date, d),
        (BinOp::Sub, Value::Date(date), Value::TimeDelta(d)) => date_plus_days(*date, &-*d),
        (BinOp::Sub, Value::DateTime(x), Value::DateTime(y)) => {
            Ok(Value::TimeDelta(x.signed_duration_since(*y)))
        }
        (BinOp::Sub, Value::Date(x), Value::Date(y)) => {
            Ok(Value::TimeDelta(x.signed_duration_since(*y)))
        }
        (BinOp::Sub, Value::DateTime(x), Value::Date(y)) => {
            Ok(Value::TimeDelta(x.signed_duration_since(midnight(*y))))
        }
        (BinOp::Sub, Value::Date(x), Value::DateTime(y)) => {
            Ok(Value::TimeDelta(midnight(*x).signed_duration_since(*y)))
        }
        (BinOp::Add, Value::DateTime(dt), Value::RelDelta(r))
        | (BinOp::Add, Value::RelDelta(r), Value::DateTime(dt)) => {
            let date = add_reldelta(dt.date(), *r)?;
            Ok(Value::DateTime(date.and_time(dt.time())))
        }
        (BinOp::Sub, Value::DateTime(dt), Value::RelDelta(r)) => {
            let date = add_reldelta(dt.date(), r.negate())?;
            Ok(Value::DateTime(date.and_time(dt.time())))
        }
        (BinOp::Add, Value::Date(date), Value::RelDelta(r))
        | (BinOp::Add, Value::RelDelta(r), Value::Date(date)) => {
            Ok(Value::Date(add_reldelta(*date, *r)?))
        }
        (BinOp::Sub, Value::Date(date), Value::RelDelta(r)) => {
            Ok(Value::Date(add_reldelta(*date, r.negate())?))
        }
        (BinOp::Add, Value::RelDelta(x), Value::RelDelta(y)) => Ok(Value::RelDelta(RelDelta {
            years: x.years + y.years,
            months: x.months + y.months,
            days: x.days + y.days,
            day: y.day.or(x.day),
        })),
        (BinOp::Mul, Value::RelDelta(r), n) | (BinOp::Mul, n, Value::RelDelta(r))
            if n.as_int().is_some() =>
        {
            let k = n.as_int().unwrap_or(1);
            Ok(Value::RelDelta(RelDelta {
                years: r.years.checked_mul(k).ok_or_else(SandboxError::overflow)?,
                months: r.months.checked_mul(k).ok_or_else(SandboxError::overflow)?,
                days: r.days.checked_mul(k).ok_or_else(SandboxError::overflow)?,
                day: r.day,
            }))
        }
        (BinOp::Add, Value::TimeDelta(x), Value::TimeDelta(y)) => x
            .checked_add(y)
            .map(Value::TimeDelta)
            .ok_or_else(date_overflow),
        (BinOp::Sub, Value::TimeDelta(x), Value::TimeDelta(y)) => x
            .checked_sub(y)
            .map(Value::TimeDelta)
            .ok_or_else(date_overflow),
        (BinOp::Mul, Value::TimeDelta(d), n) | (BinOp::Mul, n, Value::TimeDelta(d))
            if n.is_number() =>
        {
            scale_duration(d, n.as_f64().unwrap_or(1.0))
        }
        (BinOp::Div, Value::TimeDelta(d), n) if n.is_number() => {
            let n = n.as_f64().unwrap_or(1.0);
            if n == 0.0 {
                return Err(SandboxError::zero_division("division by zero"));
            }
            scale_duration(d, 1.0 / n)
        }
        (BinOp::Div, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            let divisor = duration_micros(y);
            if divisor == 0.0 {
                return Err(SandboxError::zero_division("division by zero"));
            }
            Ok(Value::Float(duration_micros(x) / divisor))
        }
        (BinOp::FloorDiv, Value::TimeDelta(x), Value::TimeDelta(y)) => {
            let divisor = duration_micros(y);
            if divisor == 0.0 {
                return Err(SandboxError::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            Ok(Value::Int((duration_micros(x) / divisor).floor() as i64))
        }
        _ => Err(unsupported(symbol, a, b)),
    }
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, SandboxError> {
    if let Some(result) = table::unary(op, value) {
        return result;
    }
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!truthy(v)?)),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(SandboxError::overflow),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::TimeDelta(d)) => Ok(Value::TimeDelta(-*d)),
        (UnaryOp::Neg, Value::RelDelta(r)) => Ok(Value::RelDelta(r.negate())),
        (UnaryOp::Pos, v) if v.is_number() => Ok(match v {
            Value::Bool(b) => Value::Int(i64::from(*b)),
            other => other.clone(),
        }),
        (UnaryOp::Pos, Value::TimeDelta(d)) => Ok(Value::TimeDelta(*d)),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!i64::from(*b))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
                UnaryOp::Not => "not",
            };
            Err(SandboxError::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.kind()
            )))
        }
    }
}

pub fn abs(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(SandboxError::overflow),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::TimeDelta(d) => Ok(Value::TimeDelta(d.abs())),
        other => Err(SandboxError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.kind()
        ))),
    }
}

// ── subscripting ────────────────────────────────────────

pub fn normalize_index(index: i64, len: usize, what: &str) -> Result<usize, SandboxError> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(SandboxError::index_error(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

/// Python slice semantics over a sequence of `len` elements.
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, SandboxError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::value_error("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |v: Option<i64>, default: i64| match v {
        None => default,
        Some(v) => {
            let v = if v < 0 { v + len } else { v };
            v.clamp(lower, upper)
        }
    };
    let start = clamp(start, if step > 0 { lower } else { upper });
    let stop = clamp(stop, if step > 0 { upper } else { lower });
    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn index_of(key: &Value, container: &str) -> Result<i64, SandboxError> {
    key.as_int().ok_or_else(|| {
        SandboxError::type_error(format!(
            "{container} indices must be integers or slices, not {}",
            key.kind()
        ))
    })
}

pub fn get_item(container: &Value, key: &Value) -> Result<Value, SandboxError> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            match key {
                Value::Slice(a, b, c) => {
                    let picked = slice_indices(items.len(), *a, *b, *c)?;
                    Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
                }
                _ => {
                    let i = normalize_index(index_of(key, "list")?, items.len(), "list")?;
                    Ok(items[i].clone())
                }
            }
        }
        Value::Tuple(items) => match key {
            Value::Slice(a, b, c) => {
                let picked = slice_indices(items.len(), *a, *b, *c)?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            _ => {
                let i = normalize_index(index_of(key, "tuple")?, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
        },
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match key {
                Value::Slice(a, b, c) => {
                    let picked = slice_indices(chars.len(), *a, *b, *c)?;
                    Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
                }
                _ => {
                    let i = normalize_index(index_of(key, "string")?, chars.len(), "string")?;
                    Ok(Value::str(chars[i].to_string()))
                }
            }
        }
        Value::Dict(d) => d
            .borrow()
            .get(key)?
            .ok_or_else(|| SandboxError::key_error(repr(key))),
        Value::Table(t) => t.get_item(key),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not subscriptable",
            other.kind()
        ))),
    }
}

pub fn set_item(container: &Value, key: &Value, value: Value) -> Result<(), SandboxError> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(index_of(key, "list")?, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(d) => d.borrow_mut().insert(key.clone(), value),
        Value::Table(t) => t.set_item(key, value),
        other => Err(SandboxError::type_error(format!(
            "'{}' object does not support item assignment",
            other.kind()
        ))),
    }
}

pub fn is_iterable(value: &Value) -> bool {
    matches!(
        value,
        Value::List(_)
            | Value::Tuple(_)
            | Value::Set(_)
            | Value::Str(_)
            | Value::Dict(_)
            | Value::Table(_)
    )
}

pub fn iterate(value: &Value) -> Result<Vec<Value>, SandboxError> {
    match value {
        Value::List(items) | Value::Set(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(d) => Ok(d.borrow().keys()),
        Value::Table(t) => t.iter_values(),
        other => Err(SandboxError::type_error(format!(
            "'{}' object is not iterable",
            other.kind()
        ))),
    }
}

pub fn len(value: &Value) -> Result<usize, SandboxError> {
    match value {
        Value::List(items) | Value::Set(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Str(s) => Ok(s.chars().count()),
        Value::Dict(d) => Ok(d.borrow().len()),
        Value::Table(t) => Ok(t.len()),
        other => Err(SandboxError::type_error(format!(
            "object of type '{}' has no len()",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    // ── text ────────────────────────────────────────────

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123456.789), "123456.789");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("uber eats"), "Uber Eats");
        assert_eq!(title_case("o'neil's CAFE"), "O'Neil'S Cafe");
    }

    #[test]
    fn test_str_repr_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_container_repr() {
        let list = Value::list(vec![int(1), Value::str("a"), Value::None]);
        assert_eq!(repr(&list), "[1, 'a', None]");
        assert_eq!(repr(&Value::tuple(vec![int(1)])), "(1,)");
        let mut dict = Dict::new();
        dict.insert(Value::str("x"), Value::Float(1.5)).unwrap();
        assert_eq!(repr(&Value::dict(dict)), "{'x': 1.5}");
    }

    #[test]
    fn test_timedelta_str() {
        let d = Duration::try_days(3).unwrap() + Duration::try_seconds(3661).unwrap();
        assert_eq!(timedelta_str(&d), "3 days, 1:01:01");
        let d = -Duration::try_seconds(1).unwrap();
        assert_eq!(timedelta_str(&d), "-1 day, 23:59:59");
    }

    // ── arithmetic ──────────────────────────────────────

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(binary(BinOp::Div, &int(7), &int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(binary(BinOp::FloorDiv, &int(-7), &int(2)).unwrap(), int(-4));
        assert_eq!(binary(BinOp::Mod, &int(-7), &int(2)).unwrap(), int(1));
        assert_eq!(
            binary(BinOp::Mod, &Value::Float(-7.5), &int(2)).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_zero_division_is_catchable_error() {
        let err = binary(BinOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.class(), Some(crate::error::ErrorClass::ZeroDivisionError));
    }

    #[test]
    fn test_integer_overflow_raises() {
        let err = binary(BinOp::Mul, &int(i64::MAX), &int(2)).unwrap_err();
        assert_eq!(err.class(), Some(crate::error::ErrorClass::OverflowError));
        assert!(binary(BinOp::Pow, &int(2), &int(80)).is_err());
    }

    #[test]
    fn test_mixed_type_errors() {
        let err = binary(BinOp::Add, &int(1), &Value::str("a")).unwrap_err();
        assert!(err
            .to_string()
            .contains("unsupported operand type(s) for +: 'int' and 'str'"));
    }

    #[test]
    fn test_sequence_operations() {
        let joined = binary(
            BinOp::Add,
            &Value::list(vec![int(1)]),
            &Value::list(vec![int(2)]),
        )
        .unwrap();
        assert_eq!(joined, Value::list(vec![int(1), int(2)]));
        assert_eq!(
            binary(BinOp::Mul, &Value::str("ab"), &int(3)).unwrap(),
            Value::str("ababab")
        );
        assert!(binary(BinOp::Mul, &Value::list(vec![int(0)]), &int(10_000_000)).is_err());
    }

    #[test]
    fn test_date_arithmetic() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let next = binary(
            BinOp::Add,
            &Value::Date(date),
            &Value::RelDelta(RelDelta {
                months: 1,
                ..Default::default()
            }),
        )
        .unwrap();
        assert_eq!(next, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let week = Value::TimeDelta(Duration::try_days(7).unwrap());
        let later = binary(BinOp::Add, &Value::Date(date), &week).unwrap();
        assert_eq!(later, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 7).unwrap()));

        let diff = binary(BinOp::Sub, &later, &Value::Date(date)).unwrap();
        assert_eq!(diff, week);
    }

    #[test]
    fn test_reldelta_absolute_day_clamps() {
        let date = NaiveDate::from_ymd_opt(2023, 2, 10).unwrap();
        let end = add_reldelta(
            date,
            RelDelta {
                day: Some(31),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());
    }

    // ── comparison ──────────────────────────────────────

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(equals(&int(1), &Value::Float(1.0)));
        assert!(equals(&Value::Bool(true), &int(1)));
        assert!(!equals(&int(1), &Value::str("1")));
    }

    #[test]
    fn test_ordering_errors_name_types() {
        let err = compare(CmpOp::Lt, &int(1), &Value::str("a")).unwrap_err();
        assert!(err
            .to_string()
            .contains("'<' not supported between instances of 'int' and 'str'"));
    }

    #[test]
    fn test_nan_is_unordered() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(compare(CmpOp::Lt, &nan, &int(1)).unwrap(), Value::Bool(false));
        assert_eq!(compare(CmpOp::GtE, &nan, &int(1)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_sort_order_is_stable_in_both_directions() {
        let keys = vec![int(2), int(1), int(2), int(3)];
        assert_eq!(sort_order(&keys, false).unwrap(), vec![1, 0, 2, 3]);
        assert_eq!(sort_order(&keys, true).unwrap(), vec![3, 0, 2, 1]);
        assert!(sort_order(&[int(1), Value::str("a")], false).is_err());
    }

    #[test]
    fn test_round_float() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1234.0, -2), 1200.0);
        assert_eq!(round_float(3.14159, 3), 3.142);
    }

    #[test]
    fn test_membership() {
        assert!(contains(&Value::str("checking"), &Value::str("check")).unwrap());
        assert!(contains(&Value::tuple(vec![int(1), int(2)]), &int(2)).unwrap());
        assert!(contains(&int(3), &int(3)).is_err());
    }

    // ── subscripting ────────────────────────────────────

    #[test]
    fn test_slices_follow_python() {
        assert_eq!(slice_indices(5, Some(1), None, None).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(3, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_get_item_errors() {
        let list = Value::list(vec![int(1)]);
        let err = get_item(&list, &int(5)).unwrap_err();
        assert_eq!(err.class(), Some(crate::error::ErrorClass::IndexError));
        let err = get_item(&Value::dict(Dict::new()), &Value::str("k")).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'k'");
        assert!(get_item(&int(1), &int(0)).is_err());
    }

    #[test]
    fn test_negative_index() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        assert_eq!(get_item(&list, &int(-1)).unwrap(), int(3));
    }

    // ── self-reference and depth ────────────────────────

    fn self_referencing_list() -> Value {
        let list = Value::list(vec![int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        list
    }

    fn break_cycle(value: &Value) {
        match value {
            Value::List(items) => items.borrow_mut().clear(),
            Value::Dict(dict) => dict.borrow_mut().clear(),
            _ => {}
        }
    }

    #[test]
    fn test_self_referencing_list_repr() {
        let list = self_referencing_list();
        assert_eq!(repr(&list), "[1, [...]]");
        assert_eq!(to_str(&list), "[1, [...]]");
        break_cycle(&list);
    }

    #[test]
    fn test_self_referencing_dict_repr() {
        let dict = Value::dict(Dict::new());
        if let Value::Dict(d) = &dict {
            d.borrow_mut().insert(Value::str("k"), dict.clone()).unwrap();
        }
        assert_eq!(repr(&dict), "{'k': {...}}");
        break_cycle(&dict);
    }

    #[test]
    fn test_shared_element_is_not_elided() {
        let shared = Value::list(vec![int(1)]);
        let outer = Value::list(vec![shared.clone(), shared]);
        assert_eq!(repr(&outer), "[[1], [1]]");
    }

    #[test]
    fn test_deep_nesting_repr_is_elided() {
        let mut value = int(0);
        for _ in 0..100_000 {
            value = Value::list(vec![value]);
        }
        let text = repr(&value);
        assert!(text.starts_with("[[[["));
        assert!(text.contains("[...]"));
        assert_eq!(text.matches('[').count(), MAX_DEPTH + 1);
    }

    #[test]
    fn test_self_referencing_lists_compare_without_overflow() {
        let a = self_referencing_list();
        let b = self_referencing_list();
        assert!(equals(&a, &a));
        assert!(!equals(&a, &b));
        let err = compare_values(&a, &b).unwrap_err();
        assert!(err.to_string().contains("maximum recursion depth exceeded"));
        break_cycle(&a);
        break_cycle(&b);
    }

    #[test]
    fn test_deep_equal_structures() {
        let build = || {
            let mut value = int(0);
            for _ in 0..10 {
                value = Value::tuple(vec![value]);
            }
            value
        };
        assert!(equals(&build(), &build()));
    }
}
