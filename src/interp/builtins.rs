//! The builtin functions and type constructors visible to guest code.
//!
//! Only arithmetic, container and type helpers are provided: there is no
//! file, process or reflection access to install in the first place.

use std::cmp::Ordering;

use super::ast::BinOp;
use super::attrs;
use super::eval::Interpreter;
use super::format;
use super::modules;
use super::ops;
use super::value::{given, Args, Dict, TypeKind, Value};
use super::Namespace;
use crate::error::{ErrorClass, SandboxError};

const TYPES: [TypeKind; 8] = [
    TypeKind::Str,
    TypeKind::Int,
    TypeKind::Float,
    TypeKind::Bool,
    TypeKind::List,
    TypeKind::Tuple,
    TypeKind::Dict,
    TypeKind::Set,
];

/// Registers builtins, type constructors and exception classes.
pub fn install(ns: &mut Namespace) {
    ns.insert("len", Value::native("len", |_, args| {
        let [v] = args.exact::<1>("len")?;
        Ok(Value::Int(ops::len(&v)? as i64))
    }));
    ns.insert("range", Value::native("range", range));
    ns.insert("enumerate", Value::native("enumerate", enumerate));
    ns.insert("zip", Value::native("zip", zip));
    ns.insert("sorted", Value::native("sorted", sorted));
    ns.insert("reversed", Value::native("reversed", |_, args| {
        let [v] = args.exact::<1>("reversed")?;
        let mut items = ops::iterate(&v)?;
        items.reverse();
        Ok(Value::list(items))
    }));
    ns.insert("sum", Value::native("sum", sum));
    ns.insert("min", Value::native("min", |interp, args| extremum(interp, args, "min", Ordering::Less)));
    ns.insert("max", Value::native("max", |interp, args| extremum(interp, args, "max", Ordering::Greater)));
    ns.insert("abs", Value::native("abs", |_, args| {
        let [v] = args.exact::<1>("abs")?;
        ops::abs(&v)
    }));
    ns.insert("round", Value::native("round", round));
    ns.insert("pow", Value::native("pow", |_, args| {
        let [base, exp] = args.exact::<2>("pow")?;
        ops::binary(BinOp::Pow, &base, &exp)
    }));
    ns.insert("divmod", Value::native("divmod", |_, args| {
        let [a, b] = args.exact::<2>("divmod")?;
        Ok(Value::tuple(vec![
            ops::binary(BinOp::FloorDiv, &a, &b)?,
            ops::binary(BinOp::Mod, &a, &b)?,
        ]))
    }));
    ns.insert("any", Value::native("any", |_, args| {
        let [v] = args.exact::<1>("any")?;
        for item in ops::iterate(&v)? {
            if ops::truthy(&item)? {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }));
    ns.insert("all", Value::native("all", |_, args| {
        let [v] = args.exact::<1>("all")?;
        for item in ops::iterate(&v)? {
            if !ops::truthy(&item)? {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }));
    ns.insert("map", Value::native("map", map));
    ns.insert("filter", Value::native("filter", filter));
    ns.insert("isinstance", Value::native("isinstance", |_, args| {
        let [value, class] = args.exact::<2>("isinstance")?;
        Ok(Value::Bool(is_instance(&value, &class)?))
    }));
    ns.insert("callable", Value::native("callable", |_, args| {
        let [v] = args.exact::<1>("callable")?;
        Ok(Value::Bool(v.is_callable()))
    }));
    ns.insert("hasattr", Value::native("hasattr", |interp, args| {
        let [obj, name] = args.exact::<2>("hasattr")?;
        match interp.get_attr(&obj, &name.expect_str("attribute name")?) {
            Ok(_) => Ok(Value::Bool(true)),
            Err(e) if e.class() == Some(ErrorClass::AttributeError) => Ok(Value::Bool(false)),
            Err(e) => Err(e),
        }
    }));
    ns.insert("getattr", Value::native("getattr", |interp, args| {
        let slots = args.bind("getattr", &["object", "name", "default"], 2)?;
        let obj = slots[0].clone().unwrap_or(Value::None);
        let name = slots[1].clone().unwrap_or(Value::None).expect_str("attribute name")?;
        match (interp.get_attr(&obj, &name), slots[2].clone()) {
            (Err(e), Some(default)) if e.class() == Some(ErrorClass::AttributeError) => Ok(default),
            (result, _) => result,
        }
    }));
    ns.insert("repr", Value::native("repr", |_, args| {
        let [v] = args.exact::<1>("repr")?;
        Ok(Value::str(ops::repr(&v)))
    }));
    ns.insert("format", Value::native("format", |_, args| {
        let slots = args.bind("format", &["value", "format_spec"], 1)?;
        let spec = match given(slots[1].clone()) {
            Some(s) => s.expect_str("format_spec")?.to_string(),
            None => String::new(),
        };
        Ok(Value::str(format::format_value(
            slots[0].as_ref().unwrap_or(&Value::None),
            &spec,
        )?))
    }));
    ns.insert("chr", Value::native("chr", |_, args| {
        let [code] = args.exact::<1>("chr")?;
        let code = code.expect_int("chr")?;
        u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .map(|c| Value::str(c.to_string()))
            .ok_or_else(|| SandboxError::value_error("chr() arg not in range(0x110000)"))
    }));
    ns.insert("ord", Value::native("ord", |_, args| {
        let [s] = args.exact::<1>("ord")?;
        let s = s.expect_str("ord")?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
            _ => Err(SandboxError::type_error(format!(
                "ord() expected a character, but string of length {} found",
                s.chars().count()
            ))),
        }
    }));
    ns.insert("print", Value::native("print", |interp, args| {
        match interp.global("_print_") {
            Some(Value::Printer(capture)) => {
                capture.print(&print_text(args)?);
                Ok(Value::None)
            }
            _ => Err(SandboxError::name_error("name '_print_' is not defined")),
        }
    }));
    ns.insert("type", Value::Type(TypeKind::Type));
    for kind in TYPES {
        ns.insert(kind.name(), Value::Type(kind));
    }
    for class in ErrorClass::ALL {
        ns.insert(class.name(), Value::ExceptionClass(class));
    }
}

/// Text written by one `print(...)` call, honoring `sep` and `end`.
pub fn print_text(args: Args) -> Result<String, SandboxError> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (key, value) in &args.keywords {
        let slot = match key.as_str() {
            "sep" => &mut sep,
            "end" => &mut end,
            other => {
                return Err(SandboxError::type_error(format!(
                    "'{other}' is an invalid keyword argument for print()"
                )))
            }
        };
        if !value.is_none() {
            *slot = value.expect_str(key)?.to_string();
        }
    }
    let parts: Vec<String> = args.positional.iter().map(ops::to_str).collect();
    Ok(parts.join(&sep) + &end)
}

// ── sequences ───────────────────────────────────────────

fn range(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    if !args.keywords.is_empty() {
        return Err(SandboxError::type_error("range() takes no keyword arguments"));
    }
    let bounds: Vec<i64> = args
        .positional
        .iter()
        .map(|v| v.expect_int("range"))
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match bounds[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => {
            return Err(SandboxError::type_error(format!(
                "range expected at most 3 arguments, got {}",
                bounds.len()
            )))
        }
    };
    if step == 0 {
        return Err(SandboxError::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        (i128::from(stop) - i128::from(start) + i128::from(step) - 1) / i128::from(step)
    } else {
        (i128::from(start) - i128::from(stop) - i128::from(step) - 1) / -i128::from(step)
    };
    let count = span.max(0);
    if count > ops::MAX_SEQUENCE as i128 {
        return Err(SandboxError::raised(
            ErrorClass::OverflowError,
            format!("range() of {count} elements exceeds the sequence limit"),
        ));
    }
    Ok(Value::list(
        (0..count as i64).map(|i| Value::Int(start + i * step)).collect(),
    ))
}

fn enumerate(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("enumerate", &["iterable", "start"], 1)?;
    let start = match given(slots[1].clone()) {
        Some(v) => v.expect_int("start")?,
        None => 0,
    };
    let items = ops::iterate(slots[0].as_ref().unwrap_or(&Value::None))?;
    Ok(Value::list(
        items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
            .collect(),
    ))
}

fn zip(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    if !args.keywords.is_empty() {
        return Err(SandboxError::type_error("zip() takes no keyword arguments"));
    }
    let columns: Vec<Vec<Value>> = args
        .positional
        .iter()
        .map(ops::iterate)
        .collect::<Result<_, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    Ok(Value::list(
        (0..rows)
            .map(|r| Value::tuple(columns.iter().map(|c| c[r].clone()).collect()))
            .collect(),
    ))
}

fn key_values(interp: &mut Interpreter, items: &[Value], key: Option<Value>) -> Result<Vec<Value>, SandboxError> {
    match key {
        Some(key) => items
            .iter()
            .map(|v| interp.call(&key, Args::new(vec![v.clone()])))
            .collect(),
        None => Ok(items.to_vec()),
    }
}

fn sorted(interp: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("sorted", &["iterable", "key", "reverse"], 1)?;
    let items = ops::iterate(slots[0].as_ref().unwrap_or(&Value::None))?;
    let keys = key_values(interp, &items, given(slots[1].clone()))?;
    let reverse = match given(slots[2].clone()) {
        Some(v) => ops::truthy(&v)?,
        None => false,
    };
    let order = ops::sort_order(&keys, reverse)?;
    Ok(Value::list(order.into_iter().map(|i| items[i].clone()).collect()))
}

fn sum(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("sum", &["iterable", "start"], 1)?;
    let mut total = slots[1].clone().unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return Err(SandboxError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in ops::iterate(slots[0].as_ref().unwrap_or(&Value::None))? {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn extremum(interp: &mut Interpreter, args: Args, name: &str, want: Ordering) -> Result<Value, SandboxError> {
    let mut key = None;
    let mut default = None;
    for (k, v) in args.keywords {
        match k.as_str() {
            "key" => key = given(Some(v)),
            "default" => default = Some(v),
            other => {
                return Err(SandboxError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{other}'"
                )))
            }
        }
    }
    let items = match args.positional.len() {
        0 => {
            return Err(SandboxError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )))
        }
        1 => ops::iterate(&args.positional[0])?,
        _ => args.positional,
    };
    if items.is_empty() {
        return default.ok_or_else(|| {
            SandboxError::value_error(format!("{name}() arg is an empty sequence"))
        });
    }
    let keys = key_values(interp, &items, key)?;
    let mut best = 0;
    for i in 1..items.len() {
        if ops::compare_values(&keys[i], &keys[best])? == Some(want) {
            best = i;
        }
    }
    Ok(items[best].clone())
}

fn round(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let slots = args.bind("round", &["number", "ndigits"], 1)?;
    let number = slots[0].clone().unwrap_or(Value::None);
    let ndigits = given(slots[1].clone())
        .map(|v| v.expect_int("ndigits"))
        .transpose()?;
    match (&number, ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(number.expect_int("number")?)),
        (Value::Int(i), Some(n)) if n >= 0 => Ok(Value::Int(*i)),
        (Value::Int(i), Some(n)) => Ok(Value::Int(
            ops::round_float(*i as f64, n) as i64,
        )),
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(SandboxError::value_error(format!(
                    "cannot convert float {} to integer",
                    ops::float_repr(*f)
                )));
            }
            Ok(Value::Int(f.round_ties_even() as i64))
        }
        (Value::Float(f), Some(n)) => Ok(Value::Float(ops::round_float(*f, n))),
        (other, _) => Err(SandboxError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.kind()
        ))),
    }
}

fn map(interp: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let mut positional = args.positional.into_iter();
    let (Some(func), true) = (positional.next(), args.keywords.is_empty()) else {
        return Err(SandboxError::type_error("map() must have at least two arguments."));
    };
    let columns: Vec<Vec<Value>> = positional.map(|v| ops::iterate(&v)).collect::<Result<_, _>>()?;
    if columns.is_empty() {
        return Err(SandboxError::type_error("map() must have at least two arguments."));
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for r in 0..rows {
        let row = columns.iter().map(|c| c[r].clone()).collect();
        out.push(interp.call(&func, Args::new(row))?);
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [func, iterable] = args.exact::<2>("filter")?;
    let mut out = Vec::new();
    for item in ops::iterate(&iterable)? {
        let keep = if func.is_none() {
            ops::truthy(&item)?
        } else {
            ops::truthy(&interp.call(&func, Args::new(vec![item.clone()]))?)?
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn is_instance(value: &Value, class: &Value) -> Result<bool, SandboxError> {
    Ok(match class {
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(value, option)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Type(kind) => matches!(
            (kind, value),
            (TypeKind::Bool, Value::Bool(_))
                | (TypeKind::Int, Value::Int(_) | Value::Bool(_))
                | (TypeKind::Float, Value::Float(_))
                | (TypeKind::Str, Value::Str(_))
                | (TypeKind::List, Value::List(_))
                | (TypeKind::Tuple, Value::Tuple(_))
                | (TypeKind::Dict, Value::Dict(_))
                | (TypeKind::Set, Value::Set(_))
                | (
                    TypeKind::Type,
                    Value::Type(_) | Value::Class(_) | Value::ExceptionClass(_)
                )
        ),
        Value::Class(c) => {
            value.kind() == c.name
                || (c.name == "date" && matches!(value, Value::DateTime(_)))
                || (c.name == "Timestamp" && matches!(value, Value::DateTime(_)))
        }
        Value::ExceptionClass(c) => {
            matches!(value, Value::Exception(e) if c.catches(e.class))
        }
        _ => {
            return Err(SandboxError::type_error(
                "isinstance() arg 2 must be a type or tuple of types",
            ))
        }
    })
}

// ── type constructors ───────────────────────────────────

/// `type(x)` for one argument.
fn type_of(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::Type(TypeKind::Bool),
        Value::Int(_) => Value::Type(TypeKind::Int),
        Value::Float(_) => Value::Type(TypeKind::Float),
        Value::Str(_) => Value::Type(TypeKind::Str),
        Value::List(_) => Value::Type(TypeKind::List),
        Value::Tuple(_) => Value::Type(TypeKind::Tuple),
        Value::Dict(_) => Value::Type(TypeKind::Dict),
        Value::Set(_) => Value::Type(TypeKind::Set),
        Value::Type(_) | Value::Class(_) | Value::ExceptionClass(_) => Value::Type(TypeKind::Type),
        Value::Exception(e) => Value::ExceptionClass(e.class),
        Value::DateTime(_) => modules::datetime_class(),
        Value::Date(_) => modules::date_class(),
        Value::TimeDelta(_) => modules::timedelta_class(),
        Value::RelDelta(_) => modules::relativedelta_class(),
        other => {
            let kind = other.kind();
            Value::class(kind, move |_, _| {
                Err(SandboxError::type_error(format!("cannot create '{kind}' instances")))
            })
        }
    }
}

/// Calls a builtin type constructor such as `int(x)` or `dict(a=1)`.
pub fn construct(_interp: &mut Interpreter, kind: TypeKind, args: Args) -> Result<Value, SandboxError> {
    let name = kind.name();
    match kind {
        TypeKind::Dict => {
            let pairs = attrs::mapping_pairs(args, name)?;
            Ok(Value::dict(Dict::from_pairs(pairs)?))
        }
        TypeKind::Int if args.positional.len() == 2 => {
            let [text, base] = args.exact::<2>(name)?;
            parse_int(&text.expect_str("int")?, base.expect_int("base")?)
        }
        _ => {
            if !args.keywords.is_empty() {
                return Err(SandboxError::type_error(format!(
                    "{name}() takes no keyword arguments"
                )));
            }
            match args.positional.len() {
                0 => Ok(match kind {
                    TypeKind::Bool => Value::Bool(false),
                    TypeKind::Int => Value::Int(0),
                    TypeKind::Float => Value::Float(0.0),
                    TypeKind::Str => Value::str(""),
                    TypeKind::List => Value::list(Vec::new()),
                    TypeKind::Tuple => Value::tuple(Vec::new()),
                    TypeKind::Set => Value::set(Vec::new())?,
                    _ => {
                        return Err(SandboxError::type_error(
                            "type() takes 1 or 3 arguments",
                        ))
                    }
                }),
                1 => {
                    let [value] = args.exact::<1>(name)?;
                    if kind == TypeKind::Type {
                        Ok(type_of(&value))
                    } else {
                        convert(kind, &value)
                    }
                }
                n => Err(SandboxError::type_error(format!(
                    "{name}() takes at most 1 argument ({n} given)"
                ))),
            }
        }
    }
}

fn parse_int(text: &str, base: i64) -> Result<Value, SandboxError> {
    let invalid = || {
        SandboxError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            ops::str_repr(text)
        ))
    };
    let radix = u32::try_from(base)
        .ok()
        .filter(|b| (2..=36).contains(b))
        .ok_or_else(|| SandboxError::value_error("int() base must be >= 2 and <= 36, or 0"))?;
    let cleaned = text.trim().replace('_', "");
    i64::from_str_radix(&cleaned, radix)
        .map(Value::Int)
        .map_err(|_| invalid())
}

/// Converts a single value the way the builtin type constructor would.
pub fn convert(kind: TypeKind, value: &Value) -> Result<Value, SandboxError> {
    match kind {
        TypeKind::Bool => Ok(Value::Bool(ops::truthy(value)?)),
        TypeKind::Str => Ok(Value::str(ops::to_str(value))),
        TypeKind::Int => match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(f) if f.is_nan() => Err(SandboxError::value_error(
                "cannot convert float NaN to integer",
            )),
            Value::Float(f) if f.is_infinite() => Err(SandboxError::raised(
                ErrorClass::OverflowError,
                "cannot convert float infinity to integer",
            )),
            Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
            Value::Str(s) => parse_int(s, 10),
            other => Err(SandboxError::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.kind()
            ))),
        },
        TypeKind::Float => match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Int(_) | Value::Bool(_) => Ok(Value::Float(value.as_f64().unwrap_or_default())),
            Value::Str(s) => s
                .trim()
                .replace('_', "")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| {
                    SandboxError::value_error(format!(
                        "could not convert string to float: {}",
                        ops::str_repr(s)
                    ))
                }),
            other => Err(SandboxError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.kind()
            ))),
        },
        TypeKind::List => Ok(Value::list(ops::iterate(value)?)),
        TypeKind::Tuple => Ok(Value::tuple(ops::iterate(value)?)),
        TypeKind::Set => Value::set(ops::iterate(value)?),
        TypeKind::Dict => Ok(Value::dict(Dict::from_pairs(attrs::mapping_pairs(
            Args::new(vec![value.clone()]),
            "dict",
        )?)?)),
        TypeKind::Type => Ok(type_of(value)),
    }
}

/// Target of `astype(...)`: a builtin type or a dtype name.
pub fn dtype_target(target: &Value) -> Result<TypeKind, SandboxError> {
    match target {
        Value::Type(kind @ (TypeKind::Int | TypeKind::Float | TypeKind::Str | TypeKind::Bool)) => {
            Ok(*kind)
        }
        Value::Str(name) => match &**name {
            "int" | "int64" | "int32" | "Int64" => Ok(TypeKind::Int),
            "float" | "float64" | "float32" => Ok(TypeKind::Float),
            "str" | "string" | "object" => Ok(TypeKind::Str),
            "bool" | "boolean" => Ok(TypeKind::Bool),
            other => Err(SandboxError::type_error(format!(
                "data type '{other}' not understood"
            ))),
        },
        other => Err(SandboxError::type_error(format!(
            "data type '{}' not understood",
            ops::to_str(other)
        ))),
    }
}
