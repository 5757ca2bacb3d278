//! The format-spec mini-language (`f"{x:,.2f}"`, `format()`,
//! `str.format`), printf-style `%` formatting and strftime.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::ops;
use super::value::Value;
use crate::error::{ErrorClass, SandboxError};

#[derive(Debug, Clone, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

/// Largest precision the host float formatter accepts.
const MAX_PRECISION: usize = u16::MAX as usize;

fn invalid_spec(spec: &str) -> SandboxError {
    SandboxError::value_error(format!("Invalid format specifier '{spec}'"))
}

fn too_big(what: &str) -> SandboxError {
    SandboxError::raised(ErrorClass::OverflowError, format!("format {what} too big"))
}

/// Parses a run of digits, rejecting values above `cap`.
fn bounded(digits: &[char], cap: usize, what: &str) -> Result<usize, SandboxError> {
    let mut n: usize = 0;
    for d in digits {
        n = n * 10 + d.to_digit(10).map_or(0, |d| d as usize);
        if n > cap {
            return Err(too_big(what));
        }
    }
    Ok(n)
}

/// Appends `text`, failing once the result would exceed the string cap.
pub fn push_capped(out: &mut String, text: &str) -> Result<(), SandboxError> {
    if out.len() + text.len() > ops::MAX_STRING {
        return Err(SandboxError::raised(
            ErrorClass::OverflowError,
            "formatted string too long",
        ));
    }
    out.push_str(text);
    Ok(())
}

fn parse_spec(text: &str) -> Result<Spec, SandboxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');

    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = Some(chars[0]);
        spec.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            spec.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'z') {
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if spec.fill.is_none() {
            spec.fill = Some('0');
        }
        if spec.align.is_none() {
            spec.align = Some('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        spec.width = bounded(&chars[start..i], ops::MAX_STRING, "width")?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            spec.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(SandboxError::value_error("Format specifier missing precision"));
        }
        spec.precision = Some(bounded(&chars[start..i], MAX_PRECISION, "precision")?);
    }
    if let Some(&c) = chars.get(i) {
        spec.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid_spec(text));
    }
    Ok(spec)
}

fn group_digits(digits: &str, sep: char) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

/// Applies grouping to the integer part of an unsigned numeric body.
fn apply_grouping(body: &str, sep: Option<char>) -> String {
    let Some(sep) = sep else {
        return body.to_string();
    };
    let split = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (int_part, rest) = body.split_at(split);
    format!("{}{rest}", group_digits(int_part, sep))
}

fn pad(sign: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let fill = spec.fill.unwrap_or(' ');
    let padding = spec.width - len;
    let fills = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{sign}{body}{}", fills(padding)),
        '^' => {
            let left = padding / 2;
            format!("{}{sign}{body}{}", fills(left), fills(padding - left))
        }
        '=' => format!("{sign}{}{body}", fills(padding)),
        _ => format!("{}{sign}{body}", fills(padding)),
    }
}

fn sign_for(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn python_exponent(text: &str) -> String {
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => text.to_string(),
    }
}

fn strip_fraction_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn general_float(x: f64, precision: usize, alternate: bool) -> String {
    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, x);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let p = p as i32;
    let text = if (-4..p).contains(&exp) {
        format!("{:.*}", (p - 1 - exp).max(0) as usize, x)
    } else {
        let (mantissa, _) = sci.split_once('e').unwrap_or((&sci, ""));
        let mantissa = if alternate {
            mantissa.to_string()
        } else {
            strip_fraction_zeros(mantissa)
        };
        return python_exponent(&format!("{mantissa}e{exp}"));
    };
    if alternate {
        text
    } else {
        strip_fraction_zeros(&text)
    }
}

fn format_float(x: f64, spec: &Spec) -> Result<String, SandboxError> {
    let negative = x.is_sign_negative() && !x.is_nan();
    let magnitude = x.abs();
    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if matches!(spec.kind, Some('F' | 'E' | 'G')) {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => {
                let text = python_exponent(&format!("{:.*e}", spec.precision.unwrap_or(6), magnitude));
                if spec.kind == Some('E') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('g' | 'G' | 'n') => {
                let text = general_float(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if spec.kind == Some('G') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(p) => general_float(magnitude, p, spec.alternate),
                None => ops::float_repr(magnitude),
            },
            Some(other) => {
                return Err(SandboxError::value_error(format!(
                    "Unknown format code '{other}' for object of type 'float'"
                )))
            }
        }
    };
    let body = apply_grouping(&body, spec.grouping);
    Ok(pad(sign_for(negative, spec), &body, spec, '>'))
}

fn format_int(i: i64, spec: &Spec) -> Result<String, SandboxError> {
    let negative = i < 0;
    let magnitude = i.unsigned_abs();
    let body = match spec.kind {
        None | Some('d' | 'n') => {
            if spec.precision.is_some() {
                return Err(SandboxError::value_error(
                    "Precision not allowed in integer format specifier",
                ));
            }
            apply_grouping(&magnitude.to_string(), spec.grouping)
        }
        Some('x') => format!("{}{magnitude:x}", if spec.alternate { "0x" } else { "" }),
        Some('X') => format!("{}{magnitude:X}", if spec.alternate { "0X" } else { "" }),
        Some('o') => format!("{}{magnitude:o}", if spec.alternate { "0o" } else { "" }),
        Some('b') => format!("{}{magnitude:b}", if spec.alternate { "0b" } else { "" }),
        Some('c') => {
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    SandboxError::raised(
                        crate::error::ErrorClass::OverflowError,
                        "%c arg not in range(0x110000)",
                    )
                })?;
            return Ok(pad("", &c.to_string(), spec, '<'));
        }
        Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => return format_float(i as f64, spec),
        Some(other) => {
            return Err(SandboxError::value_error(format!(
                "Unknown format code '{other}' for object of type 'int'"
            )))
        }
    };
    Ok(pad(sign_for(negative, spec), &body, spec, '>'))
}

fn format_text(text: &str, spec: &Spec, kind: &str) -> Result<String, SandboxError> {
    match spec.kind {
        None | Some('s') => {}
        Some(other) => {
            return Err(SandboxError::value_error(format!(
                "Unknown format code '{other}' for object of type '{kind}'"
            )))
        }
    }
    if spec.sign.is_some() {
        return Err(SandboxError::value_error(
            "Sign not allowed in string format specifier",
        ));
    }
    let text: String = match spec.precision {
        Some(p) => text.chars().take(p).collect(),
        None => text.to_string(),
    };
    Ok(pad("", &text, spec, '<'))
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> Result<String, SandboxError> {
    if spec.is_empty() {
        return Ok(ops::to_str(value));
    }
    match value {
        Value::DateTime(dt) => Ok(strftime(dt, spec)),
        Value::Date(d) => Ok(strftime(&ops::midnight(*d), spec)),
        Value::Int(i) => format_int(*i, &parse_spec(spec)?),
        Value::Bool(b) => format_int(i64::from(*b), &parse_spec(spec)?),
        Value::Float(f) => format_float(*f, &parse_spec(spec)?),
        Value::Str(s) => format_text(s, &parse_spec(spec)?, "str"),
        Value::TimeDelta(_) => format_text(&ops::to_str(value), &parse_spec(spec)?, "timedelta"),
        other => Err(SandboxError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.kind()
        ))),
    }
}

// ── str.format ──────────────────────────────────────────

fn lookup_field(
    name: &str,
    auto_index: &mut usize,
    positional: &[Value],
    keywords: &[(String, Value)],
) -> Result<Value, SandboxError> {
    let (head, mut rest) = match name.find(['[', '.']) {
        Some(i) => name.split_at(i),
        None => (name, ""),
    };
    let mut value = if head.is_empty() {
        let index = *auto_index;
        *auto_index += 1;
        positional.get(index).cloned().ok_or_else(|| {
            SandboxError::index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })?
    } else if let Ok(index) = head.parse::<usize>() {
        positional.get(index).cloned().ok_or_else(|| {
            SandboxError::index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })?
    } else {
        keywords
            .iter()
            .find(|(k, _)| k == head)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| SandboxError::key_error(ops::str_repr(head)))?
    };

    while !rest.is_empty() {
        if rest.starts_with('.') {
            return Err(SandboxError::value_error(
                "attribute lookup in format fields is not supported",
            ));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| SandboxError::value_error("Missing ']' in format string"))?;
        let key_text = &rest[1..close];
        let key = match key_text.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::str(key_text),
        };
        value = ops::get_item(&value, &key)?;
        rest = &rest[close + 1..];
    }
    Ok(value)
}

/// Applies a `!r` / `!s` conversion flag.
pub fn apply_conversion(value: Value, conversion: Option<char>) -> Result<Value, SandboxError> {
    match conversion {
        None => Ok(value),
        Some('r' | 'a') => Ok(Value::str(ops::repr(&value))),
        Some('s') => Ok(Value::str(ops::to_str(&value))),
        Some(other) => Err(SandboxError::value_error(format!(
            "Unknown conversion specifier {other}"
        ))),
    }
}

/// `template.format(*positional, **keywords)`.
pub fn format_template(
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
) -> Result<String, SandboxError> {
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(SandboxError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    field.push(c);
                }
                if depth != 0 {
                    return Err(SandboxError::value_error(
                        "Single '{' encountered in format string",
                    ));
                }
                let (name_conv, spec) = match field.find(':') {
                    Some(i) => (&field[..i], &field[i + 1..]),
                    None => (field.as_str(), ""),
                };
                let (name, conversion) = match name_conv.split_once('!') {
                    Some((name, conv)) => {
                        let mut conv_chars = conv.chars();
                        let flag = conv_chars.next();
                        if conv_chars.next().is_some() {
                            return Err(SandboxError::value_error(
                                "expected ':' after conversion specifier",
                            ));
                        }
                        (name, flag)
                    }
                    None => (name_conv, None),
                };
                let value = lookup_field(name, &mut auto_index, positional, keywords)?;
                let value = apply_conversion(value, conversion)?;
                let spec = if spec.contains('{') {
                    format_template(spec, positional, keywords)?
                } else {
                    spec.to_string()
                };
                push_capped(&mut out, &format_value(&value, &spec)?)?;
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

// ── printf-style ────────────────────────────────────────

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> Result<String, SandboxError> {
    let mapping = match args {
        Value::Dict(d) => Some(d.clone()),
        _ => None,
    };
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next = 0usize;
    let mut out = String::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    let not_enough = || SandboxError::type_error("not enough arguments for format string");

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut value = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| p + i)
                .ok_or_else(|| SandboxError::value_error("incomplete format key"))?;
            let key: String = chars[i + 1..close].iter().collect();
            let dict = mapping
                .as_ref()
                .ok_or_else(|| SandboxError::type_error("format requires a mapping"))?;
            value = Some(
                dict.borrow()
                    .get_str(&key)
                    .ok_or_else(|| SandboxError::key_error(ops::str_repr(&key)))?,
            );
            i = close + 1;
        }
        let mut spec = String::new();
        let mut left = false;
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => left = true,
                '+' | ' ' => spec.push(flag),
                '0' => {
                    if !left {
                        spec.insert(0, '0');
                    }
                }
                '#' => spec.push('#'),
                _ => break,
            }
            i += 1;
        }
        let mut width = String::new();
        while let Some(&d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(d);
            i += 1;
        }
        let mut precision = String::new();
        if chars.get(i) == Some(&'.') {
            precision.push('.');
            i += 1;
            while let Some(&d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                precision.push(d);
                i += 1;
            }
            if precision == "." {
                precision.push('0');
            }
        }
        let kind = *chars
            .get(i)
            .ok_or_else(|| SandboxError::value_error("incomplete format"))?;
        i += 1;
        if kind == '%' {
            out.push('%');
            continue;
        }
        let value = match value {
            Some(v) => v,
            None => {
                let v = values.get(next).cloned().ok_or_else(not_enough)?;
                next += 1;
                v
            }
        };

        let zero = spec.starts_with('0');
        let flags = spec.trim_start_matches('0');
        let align = if left {
            "<"
        } else if zero {
            "0"
        } else {
            ""
        };
        let text = match kind {
            's' | 'r' | 'a' => {
                let text = if kind == 's' {
                    ops::to_str(&value)
                } else {
                    ops::repr(&value)
                };
                let align = if left { "<" } else { ">" };
                format_value(&Value::str(text), &format!("{align}{width}{precision}"))?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
                    v if v.as_int().is_some() => Value::Int(v.as_int().unwrap_or(0)),
                    other => {
                        return Err(SandboxError::type_error(format!(
                            "%{kind} format: a real number is required, not {}",
                            other.kind()
                        )))
                    }
                };
                let sign = flags.replace('#', "");
                format_value(&n, &format!("{align}{sign}{width}d"))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                let n = if matches!(kind, 'x' | 'X' | 'o' | 'c') {
                    Value::Int(value.expect_int(&format!("%{kind} format"))?)
                } else {
                    Value::Float(value.expect_f64(&format!("%{kind} format"))?)
                };
                format_value(&n, &format!("{align}{flags}{width}{precision}{kind}"))?
            }
            other => {
                return Err(SandboxError::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };
        push_capped(&mut out, &text)?;
    }
    if mapping.is_none() && next < values.len() {
        return Err(SandboxError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

// ── dates ───────────────────────────────────────────────

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Python-compatible `strftime`. Unknown directives are copied through.
pub fn strftime(dt: &NaiveDateTime, fmt: &str) -> String {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let unpadded = chars.peek() == Some(&'-');
        if unpadded {
            chars.next();
        }
        let Some(directive) = chars.next() else {
            out.push('%');
            break;
        };
        let num = |n: u32, width: usize| {
            if unpadded {
                n.to_string()
            } else {
                format!("{n:0width$}")
            }
        };
        let weekday = dt.weekday().num_days_from_monday() as usize;
        let month = dt.month0() as usize;
        let hour12 = match dt.hour() % 12 {
            0 => 12,
            h => h,
        };
        match directive {
            'Y' => out.push_str(&dt.year().to_string()),
            'y' => out.push_str(&num(dt.year().rem_euclid(100) as u32, 2)),
            'm' => out.push_str(&num(dt.month(), 2)),
            'd' => out.push_str(&num(dt.day(), 2)),
            'e' => out.push_str(&format!("{:>2}", dt.day())),
            'H' => out.push_str(&num(dt.hour(), 2)),
            'I' => out.push_str(&num(hour12, 2)),
            'M' => out.push_str(&num(dt.minute(), 2)),
            'S' => out.push_str(&num(dt.second(), 2)),
            'f' => out.push_str(&format!("{:06}", dt.nanosecond() / 1_000)),
            'p' => out.push_str(if dt.hour() < 12 { "AM" } else { "PM" }),
            'A' => out.push_str(WEEKDAYS[weekday]),
            'a' => out.push_str(&WEEKDAYS[weekday][..3]),
            'B' => out.push_str(MONTHS[month]),
            'b' | 'h' => out.push_str(&MONTHS[month][..3]),
            'j' => out.push_str(&num(dt.ordinal(), 3)),
            'w' => out.push_str(&dt.weekday().num_days_from_sunday().to_string()),
            'u' => out.push_str(&dt.weekday().number_from_monday().to_string()),
            'U' => out.push_str(&num((dt.ordinal() + 6 - dt.weekday().num_days_from_sunday()) / 7, 2)),
            'W' => out.push_str(&num((dt.ordinal() + 6 - dt.weekday().num_days_from_monday()) / 7, 2)),
            'F' => out.push_str(&dt.format("%Y-%m-%d").to_string()),
            'D' => out.push_str(&dt.format("%m/%d/%y").to_string()),
            'T' => out.push_str(&dt.format("%H:%M:%S").to_string()),
            'c' => out.push_str(&dt.format("%a %b %e %H:%M:%S %Y").to_string()),
            'x' => out.push_str(&dt.format("%m/%d/%y").to_string()),
            'X' => out.push_str(&dt.format("%H:%M:%S").to_string()),
            'z' | 'Z' => {}
            '%' => out.push('%'),
            other => {
                out.push('%');
                if unpadded {
                    out.push('-');
                }
                out.push(other);
            }
        }
    }
    out
}

/// `datetime.strptime(text, fmt)`; date-only formats yield midnight.
pub fn strptime(text: &str, fmt: &str) -> Result<NaiveDateTime, SandboxError> {
    NaiveDateTime::parse_from_str(text, fmt)
        .or_else(|_| NaiveDate::parse_from_str(text, fmt).map(ops::midnight))
        .map_err(|_| {
            SandboxError::value_error(format!(
                "time data {} does not match format {}",
                ops::str_repr(text),
                ops::str_repr(fmt)
            ))
        })
}

/// ISO 8601 date or datetime, as accepted by `fromisoformat` and used for
/// date-valued record fields.
pub fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(ops::midnight(d));
    }
    let text = text.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    // ── format spec ─────────────────────────────────────

    #[test]
    fn test_currency_style_specs() {
        assert_eq!(fmt(Value::Float(1234.5), ",.2f"), "1,234.50");
        assert_eq!(fmt(Value::Float(1234.5), ",.0f"), "1,234");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(-5.0), ".2f"), "-5.00");
    }

    #[test]
    fn test_alignment_and_padding() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(42), "05"), "00042");
        assert_eq!(fmt(Value::Int(-42), "05"), "-0042");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
    }

    #[test]
    fn test_percent_and_general() {
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Float(1234.5678), ".3g"), "1.23e+03");
        assert_eq!(fmt(Value::Float(0.5), "g"), "0.5");
        assert_eq!(fmt(Value::Int(5), ".2f"), "5.00");
    }

    #[test]
    fn test_bad_specs_raise() {
        assert!(format_value(&Value::str("x"), ".2f").is_err());
        assert!(format_value(&Value::None, ">4").is_err());
        assert!(format_value(&Value::Float(1.0), "q").is_err());
    }

    #[test]
    fn test_dates_use_strftime() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(fmt(Value::Date(date), "%B %d, %Y"), "March 05, 2024");
        assert_eq!(fmt(Value::Date(date), "%b %-d"), "Mar 5");
    }

    // ── size limits ─────────────────────────────────────

    fn overflow(result: Result<String, SandboxError>) -> String {
        let err = result.unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::OverflowError), "{err}");
        assert!(err.is_catchable());
        err.to_string()
    }

    #[test]
    fn test_huge_width_is_overflow_error() {
        let message = overflow(format_value(&Value::Int(1), ">99999999999"));
        assert!(message.contains("format width too big"));
        overflow(format_value(&Value::str("x"), "099999999999999999999999"));
        assert_eq!(fmt(Value::Int(1), ">3"), "  1");
    }

    #[test]
    fn test_huge_precision_is_overflow_error() {
        let message = overflow(format_value(&Value::Float(1.0), ".999999999f"));
        assert!(message.contains("format precision too big"));
        overflow(format_value(&Value::Float(1.0), ".99999999999999999999999e"));
        assert_eq!(fmt(Value::Float(1.0), ".3f"), "1.000");
    }

    #[test]
    fn test_template_output_is_capped() {
        overflow(format_template("{:>99999999999}", &[Value::Int(1)], &[]));
        let wide = format!("{{:>{}}}", ops::MAX_STRING);
        let template = format!("{wide}{wide}");
        overflow(format_template(&template, &[Value::Int(1), Value::Int(2)], &[]));
    }

    #[test]
    fn test_percent_width_and_precision_are_capped() {
        overflow(percent_format("%99999999999d", &Value::Int(1)));
        overflow(percent_format("%.999999999f", &Value::Float(1.0)));
        let wide = format!("%{}s", ops::MAX_STRING);
        let template = format!("{wide}{wide}");
        overflow(percent_format(&template, &Value::tuple(vec![Value::Int(1), Value::Int(2)])));
    }

    // ── str.format ──────────────────────────────────────

    #[test]
    fn test_format_template_fields() {
        let out = format_template(
            "{0} owes {amount:.2f} ({0!r}) {{ok}}",
            &[Value::str("Ana")],
            &[("amount".to_string(), Value::Float(3.5))],
        )
        .unwrap();
        assert_eq!(out, "Ana owes 3.50 ('Ana') {ok}");
    }

    #[test]
    fn test_format_template_item_lookup() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(format_template("{0[1]}", &[list], &[]).unwrap(), "20");
        assert!(format_template("{0.real}", &[Value::Int(1)], &[]).is_err());
    }

    #[test]
    fn test_format_template_missing_keyword() {
        let err = format_template("{name}", &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'name'");
    }

    // ── printf ──────────────────────────────────────────

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("rent"), Value::Float(1200.0)]);
        assert_eq!(percent_format("%s: $%.2f", &args).unwrap(), "rent: $1200.00");
        assert_eq!(percent_format("%5d|%-4s|", &Value::tuple(vec![Value::Int(42), Value::str("a")])).unwrap(), "   42|a   |");
        assert_eq!(percent_format("100%%", &Value::tuple(vec![])).unwrap(), "100%");
        assert!(percent_format("%s %s", &Value::str("x")).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }

    // ── dates ───────────────────────────────────────────

    #[test]
    fn test_strptime_date_only() {
        let dt = strptime("2024-02-29", "%Y-%m-%d").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let err = strptime("29/02/2024", "%Y-%m-%d").unwrap_err();
        assert!(err.to_string().contains("does not match format"));
    }

    #[test]
    fn test_parse_iso_variants() {
        assert!(parse_iso("2024-01-05").is_some());
        assert!(parse_iso("2024-01-05T10:30:00").is_some());
        assert!(parse_iso("2024-01-05 10:30:00.123").is_some());
        assert!(parse_iso("yesterday").is_none());
    }
}
