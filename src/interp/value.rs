//! Runtime values of the guest language.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

use chrono::{NaiveDate, NaiveDateTime};

use super::ast::FunctionDef;
use super::eval::{Interpreter, Scope};
use super::ops;
use super::table::Tabular;
use crate::error::{ErrorClass, SandboxError};
use crate::sandbox::capture::Capture;

pub type NativeFn = dyn Fn(&mut Interpreter, Args) -> Result<Value, SandboxError>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Items>>),
    Tuple(Rc<Items>),
    Dict(Rc<RefCell<Dict>>),
    /// Insertion-ordered, elements unique under guest equality.
    Set(Rc<RefCell<Items>>),
    Slice(Option<i64>, Option<i64>, Option<i64>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    TimeDelta(chrono::Duration),
    RelDelta(RelDelta),
    Table(Rc<dyn Tabular>),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Class(Rc<NativeClass>),
    Type(TypeKind),
    Module(Rc<Module>),
    ExceptionClass(ErrorClass),
    Exception(Rc<ExceptionValue>),
    /// The print collector handed to guest code as `_print_`.
    Printer(Rc<Capture>),
}

/// Calendar-aware offset in the style of `dateutil.relativedelta`:
/// years and months move the calendar, `day` pins the day of month
/// (clamped to the month length), and `days` is added last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelDelta {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub day: Option<u32>,
}

impl RelDelta {
    pub fn negate(self) -> Self {
        RelDelta {
            years: -self.years,
            months: -self.months,
            days: -self.days,
            day: self.day,
        }
    }
}

pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub closure: Rc<Scope>,
}

pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
}

/// A host class such as `datetime` or `pandas.DataFrame`: callable to
/// construct instances, with class attributes resolved by name.
pub struct NativeClass {
    pub name: &'static str,
    pub construct: Box<NativeFn>,
}

pub struct Module {
    pub name: String,
    pub attrs: Vec<(String, Value)>,
}

impl Module {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub class: ErrorClass,
    pub message: String,
}

/// Builtin type constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Type,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Type => "type",
        }
    }

    /// Container constructors that may be subscripted directly
    /// (`list[int]`, `dict[str, float]`).
    pub fn is_generic(self) -> bool {
        matches!(
            self,
            TypeKind::List | TypeKind::Tuple | TypeKind::Dict | TypeKind::Set | TypeKind::Type
        )
    }
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(Items(items))))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Items(items)))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(items: Vec<Value>) -> Result<Value, SandboxError> {
        let mut unique = Vec::with_capacity(items.len());
        for item in items {
            set_insert(&mut unique, item)?;
        }
        Ok(Value::Set(Rc::new(RefCell::new(Items(unique)))))
    }

    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&mut Interpreter, Args) -> Result<Value, SandboxError> + 'static,
    ) -> Value {
        Value::Native(Rc::new(NativeFunction {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn class(
        name: &'static str,
        construct: impl Fn(&mut Interpreter, Args) -> Result<Value, SandboxError> + 'static,
    ) -> Value {
        Value::Class(Rc::new(NativeClass {
            name,
            construct: Box::new(construct),
        }))
    }

    pub fn table(table: impl Tabular + 'static) -> Value {
        Value::Table(Rc::new(table))
    }

    /// Type name as guest code would see it in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Slice(..) => "slice",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::TimeDelta(_) => "timedelta",
            Value::RelDelta(_) => "relativedelta",
            Value::Table(t) => t.kind(),
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Class(_) | Value::Type(_) | Value::ExceptionClass(_) => "type",
            Value::Module(_) => "module",
            Value::Exception(e) => e.class.name(),
            Value::Printer(_) => "PrintCollector",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Native(_)
                | Value::Class(_)
                | Value::Type(_)
                | Value::ExceptionClass(_)
        )
    }

    /// Value kinds whose attributes are exposed without the private-name
    /// check: tabular values, date/time values and classes, and the
    /// print collector.
    pub fn is_transparent(&self) -> bool {
        match self {
            Value::Table(_)
            | Value::DateTime(_)
            | Value::Date(_)
            | Value::TimeDelta(_)
            | Value::RelDelta(_)
            | Value::Printer(_) => true,
            Value::Class(c) => matches!(
                c.name,
                "datetime" | "date" | "timedelta" | "relativedelta"
            ),
            _ => false,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Values that own references to other heap values, and so can close
    /// a reference cycle when stored into a container.
    pub fn holds_references(&self) -> bool {
        !matches!(
            self,
            Value::None
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Slice(..)
                | Value::DateTime(_)
                | Value::Date(_)
                | Value::TimeDelta(_)
                | Value::RelDelta(_)
                | Value::Type(_)
                | Value::ExceptionClass(_)
        )
    }

    /// Weak handle on a mutable list or dict.
    pub fn downgrade_container(&self) -> Option<WeakContainer> {
        match self {
            Value::List(items) => Some(WeakContainer::Items(Rc::downgrade(items))),
            Value::Dict(dict) => Some(WeakContainer::Dict(Rc::downgrade(dict))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    pub fn expect_str(&self, what: &str) -> Result<Rc<str>, SandboxError> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => Err(SandboxError::type_error(format!(
                "{what} must be str, not {}",
                other.kind()
            ))),
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, SandboxError> {
        self.as_int().ok_or_else(|| {
            SandboxError::type_error(format!(
                "{what} must be an integer, not {}",
                self.kind()
            ))
        })
    }

    pub fn expect_f64(&self, what: &str) -> Result<f64, SandboxError> {
        self.as_f64().ok_or_else(|| {
            SandboxError::type_error(format!("{what} must be a number, not {}", self.kind()))
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&ops::repr(self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&ops::to_str(self))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        ops::equals(self, other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

// ── arguments ───────────────────────────────────────────

/// Arguments of a call into native code.
#[derive(Debug, Default, Clone)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Args {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Exactly `N` positional arguments and no keywords.
    pub fn exact<const N: usize>(self, fname: &str) -> Result<[Value; N], SandboxError> {
        if !self.keywords.is_empty() {
            return Err(SandboxError::type_error(format!(
                "{fname}() takes no keyword arguments"
            )));
        }
        let given = self.positional.len();
        <[Value; N]>::try_from(self.positional).map_err(|_| {
            SandboxError::type_error(format!(
                "{fname}() takes exactly {N} argument{} ({given} given)",
                if N == 1 { "" } else { "s" }
            ))
        })
    }

    /// Binds positional and keyword arguments to `names`; the first
    /// `required` names must be supplied.
    pub fn bind(
        self,
        fname: &str,
        names: &[&str],
        required: usize,
    ) -> Result<Vec<Option<Value>>, SandboxError> {
        if self.positional.len() > names.len() {
            return Err(SandboxError::type_error(format!(
                "{fname}() takes at most {} argument{} ({} given)",
                names.len(),
                if names.len() == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; names.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (key, value) in self.keywords {
            let Some(index) = names.iter().position(|n| *n == key) else {
                return Err(SandboxError::type_error(format!(
                    "{fname}() got an unexpected keyword argument '{key}'"
                )));
            };
            if slots[index].is_some() {
                return Err(SandboxError::type_error(format!(
                    "{fname}() got multiple values for argument '{key}'"
                )));
            }
            slots[index] = Some(value);
        }
        for (name, slot) in names.iter().zip(&slots).take(required) {
            if slot.is_none() {
                return Err(SandboxError::type_error(format!(
                    "{fname}() missing required argument '{name}'"
                )));
            }
        }
        Ok(slots)
    }
}

/// Treats an explicit `None` argument like an omitted one.
pub fn given(slot: Option<Value>) -> Option<Value> {
    slot.filter(|v| !v.is_none())
}

// ── container storage ───────────────────────────────────

/// Elements of a list, tuple or set.
///
/// Dropping releases nested containers with an explicit work list, so
/// arbitrarily deep nesting never recurses on the native stack.
#[derive(Default)]
pub struct Items(Vec<Value>);

impl Deref for Items {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Items {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl From<Vec<Value>> for Items {
    fn from(items: Vec<Value>) -> Self {
        Items(items)
    }
}

impl FromIterator<Value> for Items {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Items(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Items {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0));
    }
}

/// Drops `pending`, unpacking every container whose last reference is
/// being released onto the work list instead of recursing into it.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(cell) | Value::Set(cell) => {
                if let Ok(cell) = Rc::try_unwrap(cell) {
                    pending.append(&mut cell.into_inner().0);
                }
            }
            Value::Tuple(items) => {
                if let Ok(mut items) = Rc::try_unwrap(items) {
                    pending.append(&mut items.0);
                }
            }
            Value::Dict(cell) => {
                if let Ok(cell) = Rc::try_unwrap(cell) {
                    for (key, value) in cell.into_inner().entries.drain(..) {
                        pending.push(key);
                        pending.push(value);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Weak handle on a list or dict that had a reference-holding value
/// stored into it.
pub enum WeakContainer {
    Items(Weak<RefCell<Items>>),
    Dict(Weak<RefCell<Dict>>),
}

impl WeakContainer {
    /// Address of the shared allocation, stable while this handle lives.
    pub fn address(&self) -> usize {
        match self {
            WeakContainer::Items(weak) => weak.as_ptr() as *const () as usize,
            WeakContainer::Dict(weak) => weak.as_ptr() as *const () as usize,
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            WeakContainer::Items(weak) => weak.strong_count() > 0,
            WeakContainer::Dict(weak) => weak.strong_count() > 0,
        }
    }

    /// Empties the container if it is still alive, breaking any cycle
    /// that runs through it.
    pub fn clear(&self) {
        match self {
            WeakContainer::Items(weak) => {
                let Some(cell) = weak.upgrade() else { return };
                let taken = match cell.try_borrow_mut() {
                    Ok(mut items) => std::mem::take(&mut *items),
                    Err(_) => return,
                };
                drop(taken);
            }
            WeakContainer::Dict(weak) => {
                let Some(cell) = weak.upgrade() else { return };
                let taken = match cell.try_borrow_mut() {
                    Ok(mut dict) => std::mem::take(&mut *dict),
                    Err(_) => return,
                };
                drop(taken);
            }
        }
    }
}

pub fn check_hashable(value: &Value) -> Result<(), SandboxError> {
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        match value {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::DateTime(_)
            | Value::Date(_)
            | Value::TimeDelta(_)
            | Value::Type(_)
            | Value::ExceptionClass(_) => {}
            Value::Tuple(items) => pending.extend(items.iter()),
            other => {
                return Err(SandboxError::type_error(format!(
                    "unhashable type: '{}'",
                    other.kind()
                )))
            }
        }
    }
    Ok(())
}

pub fn set_insert(items: &mut Vec<Value>, value: Value) -> Result<(), SandboxError> {
    check_hashable(&value)?;
    if !items.iter().any(|v| ops::equals(v, &value)) {
        items.push(value);
    }
    Ok(())
}

/// Insertion-ordered mapping with guest-equality keys.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Result<Self, SandboxError> {
        let mut dict = Dict::new();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        Ok(dict)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| ops::equals(k, key))
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, SandboxError> {
        check_hashable(key)?;
        Ok(self.position(key).map(|i| self.entries[i].1.clone()))
    }

    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), SandboxError> {
        check_hashable(&key)?;
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, SandboxError> {
        check_hashable(key)?;
        Ok(self.position(key).map(|i| self.entries.remove(i).1))
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool, SandboxError> {
        check_hashable(key)?;
        Ok(self.position(key).is_some())
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let mut pending = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in self.entries.drain(..) {
            pending.push(key);
            pending.push(value);
        }
        release(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_positional_and_keywords() {
        let args = Args {
            positional: vec![Value::Int(1)],
            keywords: vec![("granularity".into(), Value::str("weekly"))],
        };
        let slots = args.bind("f", &["amount", "granularity", "title"], 1).unwrap();
        assert_eq!(slots[0], Some(Value::Int(1)));
        assert_eq!(slots[1], Some(Value::str("weekly")));
        assert!(slots[2].is_none());
    }

    #[test]
    fn test_bind_rejects_unknown_and_duplicate_keywords() {
        let args = Args {
            positional: vec![],
            keywords: vec![("user_id".into(), Value::Int(7))],
        };
        let err = args.bind("retrieve", &[], 0).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'user_id'"));

        let args = Args {
            positional: vec![Value::Int(1)],
            keywords: vec![("a".into(), Value::Int(2))],
        };
        assert!(args.bind("f", &["a"], 1).is_err());
    }

    #[test]
    fn test_bind_missing_required() {
        let err = Args::default().bind("f", &["df", "template"], 2).unwrap_err();
        assert!(err.to_string().contains("missing required argument 'df'"));
    }

    #[test]
    fn test_exact_arity() {
        let [a, b] = Args::new(vec![Value::Int(1), Value::Int(2)])
            .exact::<2>("pair")
            .unwrap();
        assert_eq!(a, Value::Int(1));
        assert_eq!(b, Value::Int(2));
        let err = Args::new(vec![Value::Int(1)]).exact::<2>("pair").unwrap_err();
        assert!(err.to_string().contains("exactly 2 arguments (1 given)"));
    }

    #[test]
    fn test_dict_keys_follow_guest_equality() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::str("one")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("uno")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).unwrap(), Some(Value::str("uno")));
    }

    #[test]
    fn test_unhashable_key_rejected() {
        let mut dict = Dict::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert!(err.to_string().contains("unhashable type: 'list'"));
    }

    #[test]
    fn test_set_deduplicates() {
        let Value::Set(items) = Value::set(vec![Value::Int(1), Value::Int(1), Value::Int(2)]).unwrap()
        else {
            panic!("expected set");
        };
        assert_eq!(items.borrow().len(), 2);
    }

    // ── teardown ────────────────────────────────────────

    #[test]
    fn test_deeply_nested_containers_drop_without_overflow() {
        let mut value = Value::None;
        for i in 0..300_000 {
            value = match i % 3 {
                0 => Value::list(vec![value]),
                1 => Value::tuple(vec![Value::Int(i), value]),
                _ => {
                    let mut dict = Dict::new();
                    dict.insert(Value::str("next"), value).unwrap();
                    Value::dict(dict)
                }
            };
        }
        drop(value);
    }

    #[test]
    fn test_shared_inner_container_survives_outer_drop() {
        let inner = Value::list(vec![Value::Int(7)]);
        let outer = Value::list(vec![inner.clone(), inner.clone()]);
        drop(outer);
        let Value::List(items) = &inner else {
            panic!("expected list");
        };
        assert_eq!(Rc::strong_count(items), 1);
        assert_eq!(items.borrow().len(), 1);
    }

    #[test]
    fn test_weak_container_clear_breaks_cycle() {
        let list = Value::list(vec![]);
        let weak = match &list {
            Value::List(items) => {
                items.borrow_mut().push(list.clone());
                Rc::downgrade(items)
            }
            _ => panic!("expected list"),
        };
        let handle = list.downgrade_container().unwrap();
        assert!(handle.is_live());
        drop(list);
        assert!(weak.upgrade().is_some());
        handle.clear();
        assert!(weak.upgrade().is_none());
        assert!(!handle.is_live());
    }

    #[test]
    fn test_only_reference_holders_are_tracked() {
        assert!(Value::list(vec![]).holds_references());
        assert!(Value::native("f", |_, _| Ok(Value::None)).holds_references());
        assert!(!Value::Int(1).holds_references());
        assert!(!Value::str("x").holds_references());
        assert!(Value::tuple(vec![]).downgrade_container().is_none());
    }
}
