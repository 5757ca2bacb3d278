//! Guard hooks installed into every guest namespace.
//!
//! The interpreter calls these under their protocol names at each
//! attribute read, subscript, subscript store, iteration, in-place
//! operator and import. Each hook either returns the value the guest
//! asked for or fails with a typed error; denials are never retried.

use std::rc::Rc;

use tracing::debug;

use crate::error::{GuardDenied, GuardOp, SandboxError};
use crate::interp::ast::BinOp;
use crate::interp::value::Value;
use crate::interp::{attrs, modules, ops, Args, Interpreter, Namespace};

/// Registers all guard hooks. `allowed_modules` is the deployment's
/// import allowlist.
pub fn install(ns: &mut Namespace, allowed_modules: &[String]) {
    ns.insert("_getattr_", Value::native("_getattr_", guarded_getattr));
    ns.insert("_getitem_", Value::native("_getitem_", guarded_getitem));
    ns.insert("_write_", Value::native("_write_", guarded_write));
    ns.insert("_getiter_", Value::native("_getiter_", guarded_iter));
    ns.insert("_inplacevar_", Value::native("_inplacevar_", guarded_inplace));

    let allowed: Rc<[String]> = allowed_modules.into();
    ns.insert(
        "__import__",
        Value::native("__import__", move |_, args| {
            let [name] = args.exact::<1>("__import__")?;
            let name = name.expect_str("module name")?;
            import_module(&allowed, &name)
        }),
    );
}

fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

// ── attribute read ──────────────────────────────────────

fn guarded_getattr(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [object, name] = args.exact::<2>("_getattr_")?;
    let name = name.expect_str("attribute name")?;
    if !object.is_transparent() && is_private(&name) {
        debug!(kind = object.kind(), attribute = %name, "attribute read denied");
        return Err(GuardDenied::new(GuardOp::AttributeRead, object.kind(), name.as_ref()).into());
    }
    attrs::get_attribute(&object, &name)
}

// ── item access ─────────────────────────────────────────

fn guarded_getitem(interp: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [object, key] = args.exact::<2>("_getitem_")?;
    match &object {
        Value::Table(table) => table.get_item(&key),
        Value::Type(kind) if kind.is_generic() => Ok(object.clone()),
        callable if callable.is_callable() => {
            let produced = interp.call(callable, Args::default()).map_err(|e| {
                if e.is_catchable() {
                    SandboxError::type_error(format!(
                        "_getitem_ on {} with key {}: '{}' object is not subscriptable",
                        callable.kind(),
                        ops::repr(&key),
                        callable_name(callable)
                    ))
                } else {
                    e
                }
            })?;
            subscript(&produced, &key)
        }
        _ => subscript(&object, &key),
    }
}

fn subscript(object: &Value, key: &Value) -> Result<Value, SandboxError> {
    ops::get_item(object, key).map_err(|e| {
        e.with_context(&format!("_getitem_ on {} with key {}", object.kind(), ops::repr(key)))
    })
}

fn callable_name(value: &Value) -> String {
    match value {
        Value::Function(f) => f.def.name.clone(),
        Value::Native(n) => n.name.clone(),
        Value::Class(c) => c.name.to_string(),
        Value::Type(t) => t.name().to_string(),
        Value::ExceptionClass(c) => c.name().to_string(),
        other => other.kind().to_string(),
    }
}

fn guarded_write(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [object, key, value] = args.exact::<3>("_write_")?;
    match &object {
        Value::Table(table) => table.set_item(&key, value)?,
        _ => ops::set_item(&object, &key, value).map_err(|e| {
            e.with_context(&format!("_write_ on {} with key {}", object.kind(), ops::repr(&key)))
        })?,
    }
    Ok(Value::None)
}

// ── iteration ───────────────────────────────────────────

fn guarded_iter(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [object] = args.exact::<1>("_getiter_")?;
    match &object {
        Value::Table(table) => Ok(Value::list(table.iter_values()?)),
        iterable if ops::is_iterable(iterable) => Ok(Value::list(ops::iterate(iterable)?)),
        other => Err(SandboxError::type_error(format!(
            "_getiter_ on {kind}: '{kind}' object is not iterable",
            kind = other.kind()
        ))),
    }
}

// ── in-place operators ──────────────────────────────────

fn guarded_inplace(_: &mut Interpreter, args: Args) -> Result<Value, SandboxError> {
    let [op, current, operand] = args.exact::<3>("_inplacevar_")?;
    let token = op.expect_str("operator")?;
    let Some(binop) = BinOp::from_inplace(&token) else {
        return Err(SandboxError::value_error(format!(
            "_inplacevar_ on {} with operator '{token}': unsupported in-place operator",
            current.kind()
        )));
    };
    // Lists extend in place so aliases observe the change.
    if let (BinOp::Add, Value::List(items)) = (binop, &current) {
        if ops::is_iterable(&operand) {
            let extra = ops::iterate(&operand)?;
            let mut items = items.borrow_mut();
            if items.len() + extra.len() > ops::MAX_SEQUENCE {
                return Err(SandboxError::overflow().with_context("_inplacevar_ on list with operator '+='"));
            }
            items.extend(extra);
            drop(items);
            return Ok(current);
        }
    }
    ops::binary(binop, &current, &operand)
}

// ── import ──────────────────────────────────────────────

fn import_module(allowed: &[String], name: &str) -> Result<Value, SandboxError> {
    if !allowed.iter().any(|m| m == name) {
        debug!(module = name, "import denied");
        return Err(GuardDenied::new(GuardOp::Import, "module", name).into());
    }
    modules::load(name).ok_or_else(|| {
        SandboxError::raised(
            crate::error::ErrorClass::ImportError,
            format!("No module named '{name}'"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::{DataFrame, FrameData};
    use crate::interp::{builtins, compile, Limits};

    fn namespace(allowed: &[&str]) -> Namespace {
        let mut ns = Namespace::default();
        builtins::install(&mut ns);
        let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
        install(&mut ns, &allowed);
        ns
    }

    fn run(source: &str) -> Result<Interpreter, SandboxError> {
        run_with(namespace(&["datetime", "math"]), source)
    }

    fn run_with(ns: Namespace, source: &str) -> Result<Interpreter, SandboxError> {
        let program = compile(source)?;
        let mut interp = Interpreter::new(ns, Limits::default());
        interp.exec(&program)?;
        Ok(interp)
    }

    fn frame() -> Value {
        DataFrame::new(FrameData::from_columns(vec![
            ("amount".to_string(), vec![Value::Float(12.5), Value::Float(40.0)]),
            ("_source".to_string(), vec![Value::str("a"), Value::str("b")]),
        ]))
        .into_value()
    }

    // ── attribute read ──────────────────────────────────

    #[test]
    fn test_private_attribute_denied_on_plain_values() {
        let err = run("x = {}\ny = x._items\n").err().unwrap();
        match err {
            SandboxError::Guard(denied) => {
                assert_eq!(denied.operation, GuardOp::AttributeRead);
                assert_eq!(denied.kind, "dict");
                assert_eq!(denied.key, "_items");
            }
            other => panic!("expected guard denial, got {other:?}"),
        }
    }

    #[test]
    fn test_private_attribute_allowed_on_tabular_values() {
        let mut ns = namespace(&[]);
        ns.insert("df", frame());
        // Same name that is denied on a dict reaches the table and fails natively.
        let err = run_with(ns, "y = df._items\n").err().unwrap();
        assert!(matches!(err, SandboxError::Raised { class: crate::error::ErrorClass::AttributeError, .. }));

        let mut ns = namespace(&[]);
        ns.insert("df", frame());
        let interp = run_with(ns, "total = df._source.tolist()\n").unwrap();
        assert_eq!(
            interp.global("total"),
            Some(Value::list(vec![Value::str("a"), Value::str("b")]))
        );
    }

    #[test]
    fn test_missing_attribute_surfaces_native_error() {
        let err = run("s = 'abc'\ns.nothing\n").err().unwrap();
        assert!(err.to_string().contains("'str' object has no attribute 'nothing'"));
    }

    #[test]
    fn test_module_private_attribute_denied() {
        let err = run("import math\nmath._impl\n").err().unwrap();
        assert!(matches!(err, SandboxError::Guard(_)));
    }

    // ── item access ─────────────────────────────────────

    #[test]
    fn test_getitem_generic_type_returns_type() {
        let interp = run("t = list[int]\n").unwrap();
        assert!(matches!(interp.global("t"), Some(Value::Type(_))));
    }

    #[test]
    fn test_getitem_calls_plain_callable() {
        let mut ns = namespace(&[]);
        ns.insert(
            "rows",
            Value::native("rows", |_, _| Ok(Value::list(vec![Value::Int(7), Value::Int(8)]))),
        );
        let interp = run_with(ns, "x = rows[1]\n").unwrap();
        assert_eq!(interp.global("x"), Some(Value::Int(8)));
    }

    #[test]
    fn test_getitem_callable_needing_args_names_it() {
        let err = run("def f(a):\n    return a\nx = f[0]\n").err().unwrap();
        let text = err.to_string();
        assert!(text.contains("TypeError"));
        assert!(text.contains("'f'"));
        assert!(text.contains("_getitem_ on function with key 0"), "{text}");

        let err = run("def g(a):\n    return a\nx = g['k']\n").err().unwrap();
        assert!(err.to_string().contains("_getitem_ on function with key 'k'"));
    }

    #[test]
    fn test_getitem_adds_context() {
        let err = run("d = {'a': 1}\nd['b']\n").err().unwrap();
        let text = err.to_string();
        assert!(text.starts_with("KeyError"));
        assert!(text.contains("_getitem_ on dict"));
    }

    #[test]
    fn test_write_and_read_back() {
        let interp = run("d = {}\nd['k'] = 3\nl = [0, 0]\nl[-1] = d['k']\n").unwrap();
        assert_eq!(interp.global("l"), Some(Value::list(vec![Value::Int(0), Value::Int(3)])));
    }

    // ── iteration / in-place ────────────────────────────

    #[test]
    fn test_iterating_non_iterable_is_type_error() {
        let err = run("for x in 5:\n    pass\n").err().unwrap();
        let text = err.to_string();
        assert!(text.contains("'int' object is not iterable"));
        assert!(text.contains("_getiter_ on int"), "{text}");

        let err = run("x = [y for y in None]\n").err().unwrap();
        assert!(err.to_string().contains("_getiter_ on NoneType"));
    }

    #[test]
    fn test_inplace_list_extends_alias() {
        let interp = run("a = [1]\nb = a\na += [2, 3]\nn = len(b)\n").unwrap();
        assert_eq!(interp.global("n"), Some(Value::Int(3)));
    }

    #[test]
    fn test_inplace_arithmetic_tokens() {
        let interp = run("x = 7\nx //= 2\nx **= 2\nx <<= 1\nx ^= 3\n").unwrap();
        assert_eq!(interp.global("x"), Some(Value::Int(17)));
    }

    #[test]
    fn test_inplace_unknown_token_rejected() {
        let err = guarded_inplace(
            &mut Interpreter::detached(),
            Args::new(vec![Value::str("@="), Value::Int(1), Value::Int(2)]),
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'@='"));
        assert!(text.contains("_inplacevar_ on int"), "{text}");

        let err = guarded_inplace(
            &mut Interpreter::detached(),
            Args::new(vec![Value::str("??"), Value::list(vec![]), Value::Int(2)]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("_inplacevar_ on list with operator '??'"));
    }

    #[test]
    fn test_inplace_self_extension_freed_on_drop() {
        let interp = run("a = [1]\na += [a]\n").unwrap();
        let weak = match interp.global("a") {
            Some(Value::List(items)) => std::rc::Rc::downgrade(&items),
            other => panic!("expected list, got {other:?}"),
        };
        assert_eq!(weak.strong_count(), 2);
        drop(interp);
        assert!(weak.upgrade().is_none());
    }

    // ── import ──────────────────────────────────────────

    #[test]
    fn test_import_outside_allowlist_names_module() {
        let err = run("import os\n").err().unwrap();
        match err {
            SandboxError::Guard(denied) => {
                assert_eq!(denied.operation, GuardOp::Import);
                assert_eq!(denied.key, "os");
            }
            other => panic!("expected guard denial, got {other:?}"),
        }
    }

    #[test]
    fn test_allowed_module_imports() {
        let interp = run("from math import floor\nx = floor(2.7)\n").unwrap();
        assert_eq!(interp.global("x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_allowlisted_module_without_implementation() {
        let err = run_with(namespace(&["numpy"]), "import numpy\n").err().unwrap();
        assert!(err.to_string().contains("ImportError"));
        assert!(err.to_string().contains("numpy"));
    }
}
