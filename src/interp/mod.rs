//! Restricted interpreter for guest scripts.
//!
//! `compile` parses and applies the restricted-compilation rules once;
//! `Interpreter` walks the resulting tree against a [`Namespace`] built by
//! the caller. Nothing in here knows about callers or financial data.

pub mod ast;
pub(crate) mod attrs;
pub mod builtins;
pub mod eval;
pub mod format;
mod lexer;
pub mod modules;
pub mod ops;
mod parser;
mod restrict;
pub mod table;
pub mod value;

pub use eval::{Interpreter, Limits, Scope};
pub use value::{Args, Dict, Value};

use crate::error::SandboxError;

/// A compiled guest script.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) body: Vec<ast::Stmt>,
}

impl Program {
    /// Names bound by top-level `def` statements, in order.
    pub fn functions(&self) -> Vec<&str> {
        self.body
            .iter()
            .filter_map(|s| match &s.kind {
                ast::StmtKind::FunctionDef(def) => Some(def.name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Parses `source` and applies the restricted-compilation rules.
pub fn compile(source: &str) -> Result<Program, SandboxError> {
    let body = parser::parse(source)?;
    restrict::check(&body)?;
    Ok(Program { body })
}

/// The names visible to guest code when it starts running.
#[derive(Default)]
pub struct Namespace {
    entries: Vec<(String, Value)>,
}

impl Namespace {
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_rejects_private_names() {
        let err = compile("_secret = 1\n").unwrap_err();
        assert!(matches!(err, SandboxError::Compile { line: 1, .. }));
    }

    #[test]
    fn test_program_lists_functions() {
        let program = compile("def process_input():\n    return True, {}\nx = 1\n").unwrap();
        assert_eq!(program.functions(), vec!["process_input"]);
    }

    #[test]
    fn test_namespace_insert_replaces() {
        let mut ns = Namespace::default();
        ns.insert("x", Value::Int(1));
        ns.insert("x", Value::Int(2));
        assert_eq!(ns.len(), 1);
        assert_eq!(ns.get("x"), Some(Value::Int(2)));
        assert!(ns.contains("x"));
    }
}
