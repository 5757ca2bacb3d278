//! Tree-walking evaluator.
//!
//! Every sensitive node (attribute read, subscript, subscript store,
//! iteration, in-place operator, import) is routed through a hook value
//! resolved once from the namespace under its protocol name. A missing
//! hook denies the operation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::trace;

use super::ast::{
    CmpOp, CompKind, Comprehension, Expr, ExprKind, FPart, FunctionDef, Literal, Stmt, StmtKind,
    Target,
};
use super::format;
use super::ops;
use super::value::{Args, Dict, ExceptionValue, Function, Value, WeakContainer};
use super::{builtins, Namespace, Program};
use crate::error::{ErrorClass, GuardDenied, GuardOp, SandboxError};

/// Resource bounds for one run.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_steps: u64,
    pub timeout: Duration,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_steps: 1_000_000,
            timeout: Duration::from_millis(5000),
            max_call_depth: 64,
        }
    }
}

/// Deadline is only consulted every this many steps.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// A variable scope. Function calls and comprehensions get a child of the
/// scope they were defined in.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Self> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn clear(&self) {
        // Take the map out first so values dropping here never re-enter a borrow.
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Clone, Copy)]
enum Hook {
    GetAttr,
    GetItem,
    Write,
    GetIter,
    InplaceVar,
    Import,
}

impl Hook {
    fn protocol_name(self) -> &'static str {
        match self {
            Hook::GetAttr => "_getattr_",
            Hook::GetItem => "_getitem_",
            Hook::Write => "_write_",
            Hook::GetIter => "_getiter_",
            Hook::InplaceVar => "_inplacevar_",
            Hook::Import => "__import__",
        }
    }

    fn operation(self) -> GuardOp {
        match self {
            Hook::GetAttr => GuardOp::AttributeRead,
            Hook::GetItem => GuardOp::ItemRead,
            Hook::Write => GuardOp::ItemWrite,
            Hook::GetIter => GuardOp::Iterate,
            Hook::InplaceVar => GuardOp::InplaceOp,
            Hook::Import => GuardOp::Import,
        }
    }
}

const HOOKS: [Hook; 6] = [
    Hook::GetAttr,
    Hook::GetItem,
    Hook::Write,
    Hook::GetIter,
    Hook::InplaceVar,
    Hook::Import,
];

#[derive(Debug, Clone)]
struct Frame {
    function: String,
    line: usize,
}

pub struct Interpreter {
    globals: Rc<Scope>,
    hooks: Vec<Option<Value>>,
    limits: Limits,
    steps: u64,
    started: Instant,
    depth: usize,
    stack: Vec<Frame>,
    traceback: Option<Vec<Frame>>,
    /// Exceptions being handled, innermost last; a bare `raise` re-raises the top.
    handling: Vec<SandboxError>,
    /// Scopes captured by guest closures; cleared on drop to break cycles.
    captured: Vec<Weak<Scope>>,
    /// Lists and dicts that had a reference-holding value stored into
    /// them, keyed by address; emptied on drop to break cycles.
    containers: HashMap<usize, WeakContainer>,
    /// Size at which dead `containers` entries are swept.
    sweep_at: usize,
}

const MIN_SWEEP: usize = 256;

impl Interpreter {
    pub fn new(namespace: Namespace, limits: Limits) -> Self {
        let globals = Scope::new(None);
        let hooks = HOOKS
            .iter()
            .map(|h| namespace.get(h.protocol_name()))
            .collect();
        for (name, value) in namespace.into_entries() {
            globals.set(&name, value);
        }
        Interpreter {
            globals,
            hooks,
            limits,
            steps: 0,
            started: Instant::now(),
            depth: 0,
            stack: vec![Frame {
                function: "<module>".to_string(),
                line: 0,
            }],
            traceback: None,
            handling: Vec::new(),
            captured: Vec::new(),
            containers: HashMap::new(),
            sweep_at: MIN_SWEEP,
        }
    }

    /// An interpreter with default limits and no namespace, for host-side
    /// calls into guest callables.
    pub fn detached() -> Self {
        Interpreter::new(Namespace::default(), Limits::default())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.vars.borrow().get(name).cloned()
    }

    /// Runs the module body, leaving its definitions in the global scope.
    pub fn exec(&mut self, program: &Program) -> Result<(), SandboxError> {
        self.started = Instant::now();
        let globals = self.globals.clone();
        match self.exec_block(&program.body, &globals)? {
            Flow::Normal => Ok(()),
            _ => Err(SandboxError::runtime_error("control flow escaped the module body")),
        }
    }

    /// Rendered guest stack of the last uncaught error, innermost last.
    pub fn take_traceback(&mut self) -> Option<String> {
        let frames = self.traceback.take()?;
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in frames {
            out.push_str(&format!(
                "  File \"<guest>\", line {}, in {}\n",
                frame.line, frame.function
            ));
        }
        Some(out)
    }

    fn tick(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(SandboxError::StepBudget(self.limits.max_steps));
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 && self.started.elapsed() > self.limits.timeout {
            return Err(SandboxError::Deadline(self.limits.timeout.as_millis() as u64));
        }
        Ok(())
    }

    // ── hooks ───────────────────────────────────────────

    fn hook(
        &mut self,
        hook: Hook,
        args: Vec<Value>,
        subject: &'static str,
        key: impl FnOnce() -> String,
    ) -> Result<Value, SandboxError> {
        let Some(func) = self.hooks[hook as usize].clone() else {
            return Err(GuardDenied::new(hook.operation(), subject, key()).into());
        };
        self.call(&func, Args::new(args))
    }

    pub fn get_attr(&mut self, value: &Value, name: &str) -> Result<Value, SandboxError> {
        self.hook(
            Hook::GetAttr,
            vec![value.clone(), Value::str(name)],
            value.kind(),
            || name.to_string(),
        )
    }

    pub fn get_item(&mut self, container: &Value, key: &Value) -> Result<Value, SandboxError> {
        self.hook(
            Hook::GetItem,
            vec![container.clone(), key.clone()],
            container.kind(),
            || ops::repr(key),
        )
    }

    fn set_item(&mut self, container: &Value, key: &Value, value: Value) -> Result<(), SandboxError> {
        self.track_store(container, &value);
        self.hook(
            Hook::Write,
            vec![container.clone(), key.clone(), value],
            container.kind(),
            || ops::repr(key),
        )?;
        Ok(())
    }

    /// Items of `value` as authorized by the iteration hook.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, SandboxError> {
        let items = self.hook(Hook::GetIter, vec![value.clone()], value.kind(), || {
            "__iter__".to_string()
        })?;
        ops::iterate(&items)
    }

    fn inplace(&mut self, op: &'static str, current: Value, operand: Value) -> Result<Value, SandboxError> {
        let kind = current.kind();
        self.track_store(&current, &operand);
        self.hook(
            Hook::InplaceVar,
            vec![Value::str(op), current, operand],
            kind,
            || op.to_string(),
        )
    }

    /// Remembers `container` when `stored` could close a reference cycle
    /// through it, so teardown can empty it.
    pub fn track_store(&mut self, container: &Value, stored: &Value) {
        if !stored.holds_references() {
            return;
        }
        let Some(handle) = container.downgrade_container() else {
            return;
        };
        if self.containers.len() >= self.sweep_at {
            self.containers.retain(|_, handle| handle.is_live());
            self.sweep_at = (self.containers.len() * 2).max(MIN_SWEEP);
        }
        self.containers.entry(handle.address()).or_insert(handle);
    }

    pub fn import(&mut self, module: &str) -> Result<Value, SandboxError> {
        self.hook(Hook::Import, vec![Value::str(module)], "module", || {
            module.to_string()
        })
    }

    // ── calls ───────────────────────────────────────────

    pub fn call(&mut self, func: &Value, args: Args) -> Result<Value, SandboxError> {
        match func {
            Value::Function(f) => self.call_function(f, args),
            Value::Native(n) => (n.func)(self, args),
            Value::Class(c) => (c.construct)(self, args),
            Value::Type(kind) => builtins::construct(self, *kind, args),
            Value::ExceptionClass(class) => {
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [one] => ops::to_str(one),
                    many => ops::repr(&Value::tuple(many.to_vec())),
                };
                Ok(Value::Exception(Rc::new(ExceptionValue {
                    class: *class,
                    message,
                })))
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not callable",
                other.kind()
            ))),
        }
    }

    fn bind_params(&self, f: &Function, args: Args) -> Result<Rc<Scope>, SandboxError> {
        let def = &f.def;
        let name = &def.name;
        if args.positional.len() > def.params.len() {
            return Err(SandboxError::type_error(format!(
                "{name}() takes {} positional argument{} but {} were given",
                def.params.len(),
                if def.params.len() == 1 { "" } else { "s" },
                args.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
        for (slot, value) in slots.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (key, value) in args.keywords {
            let Some(i) = def.params.iter().position(|p| p.name == key) else {
                return Err(SandboxError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            };
            if slots[i].is_some() {
                return Err(SandboxError::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            slots[i] = Some(value);
        }
        let scope = Scope::new(Some(f.closure.clone()));
        for ((param, slot), default) in def.params.iter().zip(slots).zip(&f.defaults) {
            let value = slot.or_else(|| default.clone()).ok_or_else(|| {
                SandboxError::type_error(format!(
                    "{name}() missing 1 required positional argument: '{}'",
                    param.name
                ))
            })?;
            scope.set(&param.name, value);
        }
        Ok(scope)
    }

    fn call_function(&mut self, f: &Rc<Function>, args: Args) -> Result<Value, SandboxError> {
        if self.depth >= self.limits.max_call_depth {
            return Err(SandboxError::runtime_error("maximum recursion depth exceeded"));
        }
        let scope = self.bind_params(f, args)?;
        self.depth += 1;
        self.stack.push(Frame {
            function: f.def.name.clone(),
            line: f.def.line,
        });
        let result = self.exec_block(&f.def.body, &scope);
        self.stack.pop();
        self.depth -= 1;
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Result<Value, SandboxError> {
        let defaults = def
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|d| self.eval(d, scope)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        self.captured.push(Rc::downgrade(scope));
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure: scope.clone(),
        })))
    }

    // ── statements ──────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, SandboxError> {
        for stmt in body {
            if let Some(frame) = self.stack.last_mut() {
                frame.line = stmt.line;
            }
            let flow = match self.tick().and_then(|()| self.exec_stmt(stmt, scope)) {
                Ok(flow) => flow,
                Err(e) => {
                    if self.traceback.is_none() {
                        self.traceback = Some(self.stack.clone());
                    }
                    return Err(e);
                }
            };
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, SandboxError> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, op, value, scope)?,
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, scope)?;
                let branch = if ops::truthy(&test)? { body } else { orelse };
                return self.exec_block(branch, scope);
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    let test = self.eval(test, scope)?;
                    if !ops::truthy(&test)? {
                        return self.exec_block(orelse, scope);
                    }
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => self.tick()?,
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                let mut broke = false;
                for item in self.iterate(&iterable)? {
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                if !broke {
                    return self.exec_block(orelse, scope);
                }
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, scope)?;
                scope.set(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(v) => self.eval(v, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import(names) => {
                for (module, alias) in names {
                    let loaded = self.import(module)?;
                    match alias {
                        Some(alias) => scope.set(alias, loaded),
                        None => {
                            let top = module.split('.').next().unwrap_or(module);
                            let bound = if top == module {
                                loaded
                            } else {
                                self.import(top)?
                            };
                            scope.set(top, bound);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let loaded = self.import(module)?;
                let Value::Module(m) = &loaded else {
                    return Err(SandboxError::raised(
                        ErrorClass::ImportError,
                        format!("'{module}' is not a module"),
                    ));
                };
                for (name, alias) in names {
                    let value = m.get(name).ok_or_else(|| {
                        SandboxError::raised(
                            ErrorClass::ImportError,
                            format!("cannot import name '{name}' from '{module}'"),
                        )
                    })?;
                    scope.set(alias.as_ref().unwrap_or(name), value);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::Raise(value) => {
                let Some(value) = value else {
                    return Err(self.handling.last().cloned().unwrap_or_else(|| {
                        SandboxError::runtime_error("No active exception to reraise")
                    }));
                };
                return Err(match self.eval(value, scope)? {
                    Value::Exception(e) => SandboxError::raised(e.class, e.message.clone()),
                    Value::ExceptionClass(class) => SandboxError::raised(class, ""),
                    _ => SandboxError::type_error("exceptions must derive from BaseException"),
                });
            }
            StmtKind::Assert { test, msg } => {
                let test = self.eval(test, scope)?;
                if !ops::truthy(&test)? {
                    let message = match msg {
                        Some(m) => ops::to_str(&self.eval(m, scope)?),
                        None => String::new(),
                    };
                    return Err(SandboxError::raised(ErrorClass::AssertionError, message));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[super::ast::Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Result<Flow, SandboxError> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Ok(flow) => Ok(flow),
            Err(error) if error.is_catchable() => self.handle(error, handlers, scope),
            Err(error) => Err(error),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(
        &mut self,
        error: SandboxError,
        handlers: &[super::ast::Handler],
        scope: &Rc<Scope>,
    ) -> Result<Flow, SandboxError> {
        let Some(class) = error.class() else {
            return Err(error);
        };
        for handler in handlers {
            let matched = match &handler.class {
                None => true,
                Some(expr) => {
                    let spec = self.eval(expr, scope)?;
                    exception_matches(&spec, class)?
                }
            };
            if !matched {
                continue;
            }
            trace!(class = class.name(), line = handler.line, "guest exception caught");
            self.traceback = None;
            if let Some(name) = &handler.name {
                let message = match &error {
                    SandboxError::Raised { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                scope.set(name, Value::Exception(Rc::new(ExceptionValue { class, message })));
            }
            self.handling.push(error);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            return result;
        }
        Err(error)
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                scope.set(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = self.iterate(&value)?;
                if items.len() != targets.len() {
                    return Err(SandboxError::value_error(if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container, scope)?;
                let key = self.eval(index, scope)?;
                self.set_item(&container, &key, value)
            }
        }
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: &'static str,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name, scope)?;
                let operand = self.eval(value, scope)?;
                let updated = self.inplace(op, current, operand)?;
                scope.set(name, updated);
                Ok(())
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container, scope)?;
                let key = self.eval(index, scope)?;
                let current = self.get_item(&container, &key)?;
                let operand = self.eval(value, scope)?;
                let updated = self.inplace(op, current, operand)?;
                self.set_item(&container, &key, updated)
            }
            Target::Tuple(_) => Err(SandboxError::type_error(
                "illegal expression for augmented assignment",
            )),
        }
    }

    // ── expressions ─────────────────────────────────────

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> Result<Value, SandboxError> {
        scope
            .get(name)
            .ok_or_else(|| SandboxError::name_error(format!("name '{name}' is not defined")))
    }

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, SandboxError> {
        match &expr.kind {
            ExprKind::Const(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => self.lookup(name, scope),
            ExprKind::FString(parts) => Ok(Value::str(self.fstring(parts, scope)?)),
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items, scope)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items, scope)?)),
            ExprKind::Set(items) => Value::set(self.eval_all(items, scope)?),
            ExprKind::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k, scope)?;
                    let value = self.eval(v, scope)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Attribute { value, attr } => {
                let value = self.eval(value, scope)?;
                self.get_attr(&value, attr)
            }
            ExprKind::Subscript { value, index } => {
                let value = self.eval(value, scope)?;
                let key = self.eval(index, scope)?;
                self.get_item(&value, &key)
            }
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |part: &Option<Box<Expr>>| -> Result<Option<i64>, SandboxError> {
                    let Some(e) = part else {
                        return Ok(None);
                    };
                    match self.eval(e, scope)? {
                        Value::None => Ok(None),
                        v => v.as_int().map(Some).ok_or_else(|| {
                            SandboxError::type_error(
                                "slice indices must be integers or None",
                            )
                        }),
                    }
                };
                let (a, b, c) = (bound(lower)?, bound(upper)?, bound(step)?);
                Ok(Value::Slice(a, b, c))
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let func = self.eval(func, scope)?;
                let positional = self.eval_all(args, scope)?;
                let keywords = keywords
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.eval(v, scope)?)))
                    .collect::<Result<Vec<_>, SandboxError>>()?;
                self.call(&func, Args { positional, keywords })
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                ops::unary(*op, &value)
            }
            ExprKind::Binary { left, op, right } => {
                let a = self.eval(left, scope)?;
                let b = self.eval(right, scope)?;
                ops::binary(*op, &a, &b)
            }
            ExprKind::BoolOp { and, values } => {
                let mut last = Value::None;
                for v in values {
                    last = self.eval(v, scope)?;
                    if ops::truthy(&last)? != *and {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::Compare { left, ops: chain } => {
                let mut a = self.eval(left, scope)?;
                let mut result = Value::Bool(true);
                for (i, (op, right)) in chain.iter().enumerate() {
                    let b = self.eval(right, scope)?;
                    result = self.compare(*op, &a, &b)?;
                    if i + 1 < chain.len() && !ops::truthy(&result)? {
                        return Ok(result);
                    }
                    a = b;
                }
                Ok(result)
            }
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.eval(test, scope)?;
                if ops::truthy(&test)? {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, scope),
            ExprKind::Comp {
                kind,
                elt,
                generators,
            } => {
                let inner = Scope::new(Some(scope.clone()));
                let mut out = Vec::new();
                self.comprehend(generators, &inner, &mut |this: &mut Interpreter, s: &Rc<Scope>| {
                    out.push(this.eval(elt, s)?);
                    Ok(())
                })?;
                match kind {
                    CompKind::List | CompKind::Generator => Ok(Value::list(out)),
                    CompKind::Set => Value::set(out),
                }
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let inner = Scope::new(Some(scope.clone()));
                let mut dict = Dict::new();
                self.comprehend(generators, &inner, &mut |this: &mut Interpreter, s: &Rc<Scope>| {
                    let k = this.eval(key, s)?;
                    let v = this.eval(value, s)?;
                    dict.insert(k, v)
                })?;
                Ok(Value::dict(dict))
            }
        }
    }

    fn compare(&mut self, op: CmpOp, a: &Value, b: &Value) -> Result<Value, SandboxError> {
        match op {
            CmpOp::In | CmpOp::NotIn if matches!(b, Value::Table(_)) => {
                let found = ops::contains(b, a)?;
                Ok(Value::Bool(found == (op == CmpOp::In)))
            }
            _ => ops::compare(op, a, b),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, SandboxError> {
        exprs.iter().map(|e| self.eval(e, scope)).collect()
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        scope: &Rc<Scope>,
        emit: &mut dyn FnMut(&mut Self, &Rc<Scope>) -> Result<(), SandboxError>,
    ) -> Result<(), SandboxError> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            for condition in &first.ifs {
                let keep = self.eval(condition, scope)?;
                if !ops::truthy(&keep)? {
                    continue 'items;
                }
            }
            self.comprehend(rest, scope, emit)?;
        }
        Ok(())
    }

    fn fstring(&mut self, parts: &[FPart], scope: &Rc<Scope>) -> Result<String, SandboxError> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Lit(text) => out.push_str(text),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr, scope)?;
                    let value = format::apply_conversion(value, *conversion)?;
                    let spec = self.fstring(spec, scope)?;
                    format::push_capped(&mut out, &format::format_value(&value, &spec)?)?;
                }
            }
        }
        Ok(out)
    }
}

/// `except spec:` matching for a class or a tuple of classes.
fn exception_matches(spec: &Value, class: ErrorClass) -> Result<bool, SandboxError> {
    match spec {
        Value::ExceptionClass(c) => Ok(c.catches(class)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if exception_matches(item, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(SandboxError::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        for (_, handle) in self.containers.drain() {
            handle.clear();
        }
        for scope in self.captured.drain(..) {
            if let Some(scope) = scope.upgrade() {
                scope.clear();
            }
        }
        self.globals.clear();
    }
}
