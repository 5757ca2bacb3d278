//! Restricted-compilation pass.
//!
//! Walks the parsed tree once and rejects anything that could reach
//! interpreter internals by name: identifiers starting with `_`, dunder
//! attributes, and control flow in the wrong context. Single-underscore
//! attributes are left to the attribute guard so that tabular values can
//! still expose them.

use super::ast::{Comprehension, Expr, ExprKind, FPart, FunctionDef, Stmt, StmtKind, Target};
use crate::error::SandboxError;

pub fn check(body: &[Stmt]) -> Result<(), SandboxError> {
    let mut checker = Checker {
        in_function: false,
        loop_depth: 0,
    };
    checker.block(body)
}

struct Checker {
    in_function: bool,
    loop_depth: usize,
}

fn check_name(name: &str, line: usize) -> Result<(), SandboxError> {
    if name.starts_with('_') && name != "_" {
        return Err(SandboxError::compile(
            line,
            format!("\"{name}\" is an invalid variable name because it starts with \"_\""),
        ));
    }
    Ok(())
}

fn check_attr(attr: &str, line: usize) -> Result<(), SandboxError> {
    if attr.starts_with("__") {
        return Err(SandboxError::compile(
            line,
            format!("\"{attr}\" is an invalid attribute name because it starts with \"__\""),
        ));
    }
    Ok(())
}

impl Checker {
    fn block(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn loop_body(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        self.loop_depth += 1;
        let result = self.block(body);
        self.loop_depth -= 1;
        result
    }

    fn function(&mut self, def: &FunctionDef) -> Result<(), SandboxError> {
        for param in &def.params {
            check_name(&param.name, def.line)?;
            if let Some(default) = &param.default {
                self.expr(default)?;
            }
        }
        let saved = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let result = self.block(&def.body);
        (self.in_function, self.loop_depth) = saved;
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), SandboxError> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target, line)?;
                }
                self.expr(value)
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, line)?;
                self.expr(value)
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.block(body)?;
                self.block(orelse)
            }
            StmtKind::While { test, body, orelse } => {
                self.expr(test)?;
                self.loop_body(body)?;
                self.block(orelse)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.target(target, line)?;
                self.expr(iter)?;
                self.loop_body(body)?;
                self.block(orelse)
            }
            StmtKind::FunctionDef(def) => {
                check_name(&def.name, line)?;
                self.function(def)
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    return Err(SandboxError::compile(line, "'return' outside function"));
                }
                value.as_ref().map_or(Ok(()), |v| self.expr(v))
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let word = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    return Err(SandboxError::compile(
                        line,
                        format!("'{word}' outside loop"),
                    ));
                }
                Ok(())
            }
            StmtKind::Pass => Ok(()),
            StmtKind::Import(names) => {
                for (module, alias) in names {
                    for part in module.split('.') {
                        check_name(part, line)?;
                    }
                    if let Some(alias) = alias {
                        check_name(alias, line)?;
                    }
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, names } => {
                for part in module.split('.') {
                    check_name(part, line)?;
                }
                for (name, alias) in names {
                    check_name(name, line)?;
                    if let Some(alias) = alias {
                        check_name(alias, line)?;
                    }
                }
                Ok(())
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.block(body)?;
                for handler in handlers {
                    if let Some(class) = &handler.class {
                        self.expr(class)?;
                    }
                    if let Some(name) = &handler.name {
                        check_name(name, handler.line)?;
                    }
                    self.block(&handler.body)?;
                }
                self.block(orelse)?;
                self.block(finalbody)
            }
            StmtKind::Raise(exc) => exc.as_ref().map_or(Ok(()), |e| self.expr(e)),
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                msg.as_ref().map_or(Ok(()), |m| self.expr(m))
            }
        }
    }

    fn target(&mut self, target: &Target, line: usize) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => check_name(name, line),
            Target::Tuple(items) => items.iter().try_for_each(|t| self.target(t, line)),
            Target::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension], line: usize) -> Result<(), SandboxError> {
        for generator in generators {
            self.target(&generator.target, line)?;
            self.expr(&generator.iter)?;
            for cond in &generator.ifs {
                self.expr(cond)?;
            }
        }
        Ok(())
    }

    fn fparts(&mut self, parts: &[FPart]) -> Result<(), SandboxError> {
        for part in parts {
            if let FPart::Field { expr, spec, .. } = part {
                self.expr(expr)?;
                self.fparts(spec)?;
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), SandboxError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Const(_) => Ok(()),
            ExprKind::Name(name) => check_name(name, line),
            ExprKind::FString(parts) => self.fparts(parts),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                items.iter().try_for_each(|e| self.expr(e))
            }
            ExprKind::Dict(pairs) => pairs.iter().try_for_each(|(k, v)| {
                self.expr(k)?;
                self.expr(v)
            }),
            ExprKind::Attribute { value, attr } => {
                check_attr(attr, line)?;
                self.expr(value)
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value)?;
                self.expr(index)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part)?;
                }
                Ok(())
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                for arg in args {
                    self.expr(arg)?;
                }
                for (name, value) in keywords {
                    check_name(name, line)?;
                    self.expr(value)?;
                }
                Ok(())
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            ExprKind::BoolOp { values, .. } => values.iter().try_for_each(|e| self.expr(e)),
            ExprKind::Compare { left, ops } => {
                self.expr(left)?;
                ops.iter().try_for_each(|(_, e)| self.expr(e))
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            ExprKind::Lambda(def) => self.function(def),
            ExprKind::Comp {
                elt, generators, ..
            } => {
                self.generators(generators, line)?;
                self.expr(elt)
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.generators(generators, line)?;
                self.expr(key)?;
                self.expr(value)
            }
        }
    }
}
