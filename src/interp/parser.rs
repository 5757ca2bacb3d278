//! Recursive-descent parser for the guest language subset.
//!
//! Constructs outside the subset (classes, `with`, generators, star
//! arguments, ...) are rejected here with a compile error rather than
//! parsed and refused later.

use std::rc::Rc;

use super::ast::{
    BinOp, CmpOp, CompKind, Comprehension, Expr, ExprKind, FPart, FunctionDef, Handler, Literal,
    Param, Stmt, StmtKind, Target, UnaryOp,
};
use super::lexer::{tokenize, Tok, Token};
use crate::error::SandboxError;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Deepest nesting of brackets, unary operators, operator chains and
/// blocks the parser accepts.
pub const MAX_NESTING: usize = 100;

pub fn parse(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens, 0).file()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current nesting, counted against `MAX_NESTING`.
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Parser { tokens, pos: 0, depth }
    }

    // ── nesting ─────────────────────────────────────────

    fn descend(&mut self, what: &str) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("too many nested {what}")));
        }
        Ok(())
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> Result<T, SandboxError>,
    ) -> Result<T, SandboxError> {
        self.descend(what)?;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    // ── token helpers ───────────────────────────────────

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let index = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens
            .get(index)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SandboxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}', found {}", describe(self.peek()))))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SandboxError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}', found {}", describe(self.peek()))))
        }
    }

    fn expect_name(&mut self) -> Result<String, SandboxError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(&other)))),
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::compile(self.line(), message)
    }

    fn unexpected(&self) -> SandboxError {
        self.error(format!("invalid syntax near {}", describe(self.peek())))
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str())
                    || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~"),
            _ => false,
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.is_op(";")
    }

    // ── statements ──────────────────────────────────────

    fn file(mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        if let Tok::Name(word) = self.peek() {
            match word.as_str() {
                "if" => return Ok(vec![self.if_stmt()?]),
                "while" => return Ok(vec![self.while_stmt()?]),
                "for" => return Ok(vec![self.for_stmt()?]),
                "def" => return Ok(vec![self.def_stmt()?]),
                "try" => return Ok(vec![self.try_stmt()?]),
                "class" => return Err(self.error("class definitions are not allowed")),
                "with" => return Err(self.error("'with' blocks are not allowed")),
                "async" => return Err(self.error("async code is not allowed")),
                _ => {}
            }
        }
        if self.is_op("@") {
            return Err(self.error("decorators are not allowed"));
        }
        self.simple_statements()
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut out = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            out.push(self.small_statement()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
            }
            Tok::Eof => {}
            _ => return Err(self.unexpected()),
        }
        Ok(out)
    }

    fn small_statement(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        let word = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        let kind = match word.as_str() {
            "pass" => {
                self.advance();
                StmtKind::Pass
            }
            "break" => {
                self.advance();
                StmtKind::Break
            }
            "continue" => {
                self.advance();
                StmtKind::Continue
            }
            "return" => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            "raise" => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise(None)
                } else {
                    let exc = self.test()?;
                    if self.eat_kw("from") {
                        self.test()?;
                    }
                    StmtKind::Raise(Some(exc))
                }
            }
            "assert" => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            "import" => self.import_stmt()?,
            "from" => self.from_stmt()?,
            "global" | "nonlocal" => {
                return Err(self.error(format!("'{word}' statements are not allowed")))
            }
            "del" => return Err(self.error("'del' statements are not allowed")),
            "yield" | "await" => return Err(self.error(format!("'{word}' is not allowed"))),
            _ => self.expression_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, SandboxError> {
        let first = self.testlist()?;

        if self.is_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.testlist()?);
            }
            let value = exprs.pop().ok_or_else(|| self.unexpected())?;
            let targets = exprs
                .into_iter()
                .map(to_target)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        if let Tok::Op(op) = self.peek() {
            let op = *op;
            if BinOp::from_inplace(op).is_some() {
                self.advance();
                let target = to_target(first)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if self.eat_op(":") {
            // Annotated assignment; the annotation itself is discarded.
            self.test()?;
            let target = to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("only single target can be annotated"));
            }
            if self.eat_op("=") {
                let value = self.testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> Result<String, SandboxError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        self.advance();
        let mut names = Vec::new();
        loop {
            let module = self.dotted_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push((module, alias));
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn from_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        self.advance();
        if self.is_op(".") || self.is_op("...") {
            return Err(self.error("relative imports are not allowed"));
        }
        let module = self.dotted_name()?;
        self.expect_kw("import")?;
        if self.is_op("*") {
            return Err(self.error("'import *' is not allowed"));
        }
        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat_op(",") {
                break;
            }
            if parenthesized && self.is_op(")") {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.nested("blocks", Self::block_body)
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_statements();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    /// Parses `if` and `elif` alike; `elif` chains nest in `orelse`.
    fn if_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.is_kw("elif") {
            vec![self.nested("blocks", Self::if_stmt)?]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        self.advance();
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn target_list(&mut self) -> Result<Target, SandboxError> {
        let line = self.line();
        let first = self.bitor()?;
        if !self.is_op(",") {
            return to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") || self.is_op("=") {
                break;
            }
            items.push(self.bitor()?);
        }
        to_target(Expr {
            line,
            kind: ExprKind::Tuple(items),
        })
    }

    fn params(&mut self, closer: &str, annotations: bool) -> Result<Vec<Param>, SandboxError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.is_op(closer) {
            if self.is_op("*") || self.is_op("**") || self.is_op("/") {
                return Err(self.error("*args and **kwargs parameters are not supported"));
            }
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!("duplicate argument '{name}' in function definition")));
            }
            if annotations && self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn def_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                line,
                params,
                body,
            })),
        })
    }

    fn try_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        self.advance();
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.is_kw("except") {
            let handler_line = self.line();
            self.advance();
            let class = if self.is_op(":") {
                None
            } else {
                Some(self.test()?)
            };
            let name = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(Handler {
                line: handler_line,
                class,
                name,
                body,
            });
        }
        let orelse = if self.is_kw("else") {
            if handlers.is_empty() {
                return Err(self.error("'else' without 'except' in try statement"));
            }
            self.advance();
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    // ── expressions ─────────────────────────────────────

    fn testlist(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::Tuple(items),
        })
    }

    fn test(&mut self) -> Result<Expr, SandboxError> {
        self.nested("parentheses", Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, SandboxError> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        let line = self.line();
        let body = self.or_test()?;
        if !self.is_kw("if") {
            return Ok(body);
        }
        self.advance();
        let test = self.or_test()?;
        self.expect_kw("else")?;
        let orelse = self.test()?;
        Ok(Expr {
            line,
            kind: ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
        })
    }

    fn lambda(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        self.advance();
        let params = self.params(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        let def = FunctionDef {
            name: "<lambda>".to_string(),
            line,
            params,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
        };
        Ok(Expr {
            line,
            kind: ExprKind::Lambda(Rc::new(def)),
        })
    }

    fn or_test(&mut self) -> Result<Expr, SandboxError> {
        self.bool_chain("or", false)
    }

    fn and_test(&mut self) -> Result<Expr, SandboxError> {
        self.bool_chain("and", true)
    }

    fn bool_chain(&mut self, kw: &str, and: bool) -> Result<Expr, SandboxError> {
        let line = self.line();
        let first = if and { self.not_test()? } else { self.and_test()? };
        if !self.is_kw(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(kw) {
            values.push(if and { self.not_test()? } else { self.and_test()? });
        }
        Ok(Expr {
            line,
            kind: ExprKind::BoolOp { and, values },
        })
    }

    fn not_test(&mut self) -> Result<Expr, SandboxError> {
        if !self.is_kw("not") {
            return self.comparison();
        }
        let line = self.line();
        self.advance();
        let operand = self.nested("unary operators", Self::not_test)?;
        Ok(Expr {
            line,
            kind: ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
        })
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            if matches!(op, CmpOp::NotIn | CmpOp::IsNot) {
                self.advance();
            }
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr {
            line,
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
        })
    }

    fn binary_level(
        &mut self,
        table: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SandboxError>,
    ) -> Result<Expr, SandboxError> {
        let mut left = next(self)?;
        let mut links = 0;
        'outer: loop {
            for (symbol, op) in table {
                if self.is_op(symbol) {
                    let line = self.line();
                    self.advance();
                    links += 1;
                    self.descend("operators")?;
                    let right = next(self)?;
                    left = Expr {
                        line,
                        kind: ExprKind::Binary {
                            left: Box::new(left),
                            op: *op,
                            right: Box::new(right),
                        },
                    };
                    continue 'outer;
                }
            }
            self.depth -= links;
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::arith,
        )
    }

    fn arith(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested("unary operators", Self::factor)?;
        Ok(Expr {
            line,
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn power(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let base = self.primary()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        let exponent = self.nested("operators", Self::factor)?;
        Ok(Expr {
            line,
            kind: ExprKind::Binary {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            },
        })
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.atom()?;
        let mut links = 0;
        loop {
            let line = self.line();
            if self.is_op("(") || self.is_op("[") || self.is_op(".") {
                links += 1;
                self.descend("trailers")?;
            }
            if self.is_op("(") {
                self.advance();
                let (args, keywords) = self.call_args()?;
                expr = Expr {
                    line,
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                };
            } else if self.eat_op("[") {
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr {
                    line,
                    kind: ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr {
                    line,
                    kind: ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                };
            } else {
                self.depth -= links;
                return Ok(expr);
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SandboxError> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Expr)> = Vec::new();
        loop {
            if self.eat_op(")") {
                break;
            }
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("star arguments are not supported"));
            }
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Tok::Name(n), Tok::Op("=")) if !KEYWORDS.contains(&n.as_str()) => Some(n.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.advance();
                self.advance();
                if keywords.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                let value = self.test()?;
                keywords.push((name, value));
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.test()?;
                if self.is_kw("for") {
                    let line = arg.line;
                    let generators = self.comp_for()?;
                    args.push(Expr {
                        line,
                        kind: ExprKind::Comp {
                            kind: CompKind::Generator,
                            elt: Box::new(arg),
                            generators,
                        },
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok((args, keywords))
    }

    fn subscript_list(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let first = self.subscript_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr {
            line,
            kind: ExprKind::Tuple(items),
        })
    }

    fn subscript_item(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        let lower = if self.is_op(":") {
            None
        } else {
            let expr = self.test()?;
            if !self.is_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let bound_ends = |p: &Self| p.is_op(":") || p.is_op("]") || p.is_op(",");
        let upper = if bound_ends(self) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") {
            if self.is_op("]") || self.is_op(",") {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr {
            line,
            kind: ExprKind::Slice { lower, upper, step },
        })
    }

    fn comp_for(&mut self) -> Result<Vec<Comprehension>, SandboxError> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if self.is_kw("async") {
            return Err(self.error("async code is not allowed"));
        }
        Ok(generators)
    }

    fn sequence_rest(&mut self, first: Expr, closer: &str) -> Result<Vec<Expr>, SandboxError> {
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op(closer) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(closer)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        if self.is_op("*") {
            return Err(self.error("starred expressions are not supported"));
        }
        let kind = match self.advance() {
            Tok::Int(i) => ExprKind::Const(Literal::Int(i)),
            Tok::Float(f) => ExprKind::Const(Literal::Float(f)),
            tok @ (Tok::Str(_) | Tok::FStr(_)) => return self.strings(tok, line),
            Tok::Name(name) => match name.as_str() {
                "None" => ExprKind::Const(Literal::None),
                "True" => ExprKind::Const(Literal::Bool(true)),
                "False" => ExprKind::Const(Literal::Bool(false)),
                kw if KEYWORDS.contains(&kw) => {
                    return Err(SandboxError::compile(
                        line,
                        format!("invalid syntax near keyword '{kw}'"),
                    ))
                }
                _ => ExprKind::Name(name),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    ExprKind::Tuple(Vec::new())
                } else {
                    if self.is_kw("yield") {
                        return Err(self.error("'yield' is not allowed"));
                    }
                    let first = self.test()?;
                    if self.is_kw("for") {
                        let generators = self.comp_for()?;
                        self.expect_op(")")?;
                        ExprKind::Comp {
                            kind: CompKind::Generator,
                            elt: Box::new(first),
                            generators,
                        }
                    } else if self.is_op(",") {
                        ExprKind::Tuple(self.sequence_rest(first, ")")?)
                    } else {
                        self.expect_op(")")?;
                        return Ok(first);
                    }
                }
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    ExprKind::List(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.is_kw("for") {
                        let generators = self.comp_for()?;
                        self.expect_op("]")?;
                        ExprKind::Comp {
                            kind: CompKind::List,
                            elt: Box::new(first),
                            generators,
                        }
                    } else {
                        ExprKind::List(self.sequence_rest(first, "]")?)
                    }
                }
            }
            Tok::Op("{") => self.dict_or_set()?,
            Tok::Op("...") => return Err(SandboxError::compile(line, "ellipsis is not supported")),
            other => {
                return Err(SandboxError::compile(
                    line,
                    format!("invalid syntax near {}", describe(&other)),
                ))
            }
        };
        Ok(Expr { line, kind })
    }

    fn dict_or_set(&mut self) -> Result<ExprKind, SandboxError> {
        if self.eat_op("}") {
            return Ok(ExprKind::Dict(Vec::new()));
        }
        if self.is_op("**") {
            return Err(self.error("dict unpacking is not supported"));
        }
        let first = self.test()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.is_kw("for") {
                let generators = self.comp_for()?;
                self.expect_op("}")?;
                return Ok(ExprKind::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            let mut pairs = vec![(first, value)];
            while self.eat_op(",") {
                if self.is_op("}") {
                    break;
                }
                if self.is_op("**") {
                    return Err(self.error("dict unpacking is not supported"));
                }
                let key = self.test()?;
                self.expect_op(":")?;
                let value = self.test()?;
                pairs.push((key, value));
            }
            self.expect_op("}")?;
            return Ok(ExprKind::Dict(pairs));
        }
        if self.is_kw("for") {
            let generators = self.comp_for()?;
            self.expect_op("}")?;
            return Ok(ExprKind::Comp {
                kind: CompKind::Set,
                elt: Box::new(first),
                generators,
            });
        }
        Ok(ExprKind::Set(self.sequence_rest(first, "}")?))
    }

    /// Adjacent string literals concatenate; any f-string piece turns the
    /// whole run into an f-string.
    fn strings(&mut self, first: Tok, line: usize) -> Result<Expr, SandboxError> {
        let mut pieces = vec![first];
        while matches!(self.peek(), Tok::Str(_) | Tok::FStr(_)) {
            pieces.push(self.advance());
        }
        if pieces.iter().all(|p| matches!(p, Tok::Str(_))) {
            let text: String = pieces
                .into_iter()
                .filter_map(|p| match p {
                    Tok::Str(s) => Some(s),
                    _ => None,
                })
                .collect();
            return Ok(Expr {
                line,
                kind: ExprKind::Const(Literal::Str(text.into())),
            });
        }
        let mut parts = Vec::new();
        for piece in pieces {
            match piece {
                Tok::Str(s) => parts.push(FPart::Lit(s)),
                Tok::FStr(s) => parts.extend(parse_fstring(&s, line, self.depth)?),
                _ => {}
            }
        }
        Ok(Expr {
            line,
            kind: ExprKind::FString(parts),
        })
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{n}'"),
        Tok::Int(i) => format!("'{i}'"),
        Tok::Float(f) => format!("'{f}'"),
        Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
        Tok::Op(op) => format!("'{op}'"),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

fn to_target(expr: Expr) -> Result<Target, SandboxError> {
    let line = expr.line;
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name)),
        ExprKind::Tuple(items) | ExprKind::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(to_target)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        ExprKind::Subscript { value, index } => Ok(Target::Subscript { value, index }),
        ExprKind::Attribute { attr, .. } => Err(SandboxError::compile(
            line,
            format!("assignment to attribute '{attr}' is not allowed"),
        )),
        _ => Err(SandboxError::compile(line, "cannot assign to expression")),
    }
}

// ── f-strings ───────────────────────────────────────────

fn parse_fstring(body: &str, line: usize, depth: usize) -> Result<Vec<FPart>, SandboxError> {
    if depth >= MAX_NESTING {
        return Err(SandboxError::compile(line, "f-string: expressions nested too deeply"));
    }
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            if !literal.is_empty() {
                parts.push(FPart::Lit(std::mem::take(&mut literal)));
            }
            let (field, next) = parse_field(&chars, i + 1, line, depth)?;
            parts.extend(field);
            i = next;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(SandboxError::compile(
                line,
                "f-string: single '}' is not allowed",
            ));
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        parts.push(FPart::Lit(literal));
    }
    Ok(parts)
}

fn parse_field(
    chars: &[char],
    start: usize,
    line: usize,
    depth: usize,
) -> Result<(Vec<FPart>, usize), SandboxError> {
    let unterminated = || SandboxError::compile(line, "f-string: expecting '}'");
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            '}' => break,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
            ':' if depth == 0 => break,
            _ => {}
        }
        i += 1;
    }
    if i >= chars.len() {
        return Err(unterminated());
    }

    let mut text: String = chars[start..i].iter().collect();
    let mut parts = Vec::new();
    let mut conversion = None;
    let trimmed = text.trim_end();
    let self_documenting = trimmed.ends_with('=')
        && !["==", "!=", "<=", ">="]
            .iter()
            .any(|op| trimmed.ends_with(op));
    if self_documenting {
        parts.push(FPart::Lit(text.clone()));
        text = trimmed[..trimmed.len() - 1].to_string();
        conversion = Some('r');
    }
    let expr = parse_fstring_expr(&text, line, depth)?;

    if chars[i] == '!' {
        match chars.get(i + 1) {
            Some(&c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => {
                return Err(SandboxError::compile(
                    line,
                    "f-string: invalid conversion character",
                ))
            }
        }
        i += 2;
    }

    let mut spec = Vec::new();
    if i < chars.len() && chars[i] == ':' {
        i += 1;
        let spec_start = i;
        let mut depth = 0usize;
        while i < chars.len() {
            match chars[i] {
                '{' => depth += 1,
                '}' if depth == 0 => break,
                '}' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let spec_text: String = chars[spec_start..i.min(chars.len())].iter().collect();
        spec = parse_fstring(&spec_text, line, depth + 1)?;
        if self_documenting {
            conversion = None;
        }
    }
    if i >= chars.len() || chars[i] != '}' {
        return Err(unterminated());
    }
    parts.push(FPart::Field {
        expr: Box::new(expr),
        conversion,
        spec,
    });
    Ok((parts, i + 1))
}

fn parse_fstring_expr(text: &str, line: usize, depth: usize) -> Result<Expr, SandboxError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SandboxError::compile(
            line,
            "f-string: empty expression not allowed",
        ));
    }
    let shift = |err: SandboxError| match err {
        SandboxError::Compile { line: l, message } => SandboxError::Compile {
            line: l + line - 1,
            message: format!("f-string: {message}"),
        },
        other => other,
    };
    let mut tokens = tokenize(text).map_err(shift)?;
    for token in &mut tokens {
        token.line += line - 1;
    }
    let mut parser = Parser::new(tokens, depth);
    let expr = parser.testlist()?;
    match parser.peek() {
        Tok::Newline | Tok::Eof => Ok(expr),
        _ => Err(parser.error("f-string: invalid expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> StmtKind {
        let mut body = parse(source).unwrap();
        assert_eq!(body.len(), 1, "expected one statement in {source:?}");
        body.remove(0).kind
    }

    fn parse_err(source: &str) -> String {
        parse(source).unwrap_err().to_string()
    }

    // ── statements ──────────────────────────────────────

    #[test]
    fn test_function_definition_with_defaults() {
        let StmtKind::FunctionDef(def) = parse_one("def f(a, b=2):\n    return a + b\n") else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn test_elif_chain_nests_in_orelse() {
        let StmtKind::If { orelse, .. } =
            parse_one("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n")
        else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_tuple_unpacking_into_subscript() {
        let StmtKind::Assign { targets, .. } =
            parse_one("text, metadata['accounts'] = helper(df, 't')\n")
        else {
            panic!("expected assign");
        };
        let Target::Tuple(items) = &targets[0] else {
            panic!("expected tuple target");
        };
        assert!(matches!(items[1], Target::Subscript { .. }));
    }

    #[test]
    fn test_augmented_assignment_keeps_token() {
        let StmtKind::AugAssign { op, .. } = parse_one("total //= 2\n") else {
            panic!("expected augassign");
        };
        assert_eq!(op, "//=");
    }

    #[test]
    fn test_annotated_assignment() {
        assert!(matches!(
            parse_one("x: int = 5\n"),
            StmtKind::Assign { .. }
        ));
        assert!(matches!(parse_one("x: int\n"), StmtKind::Pass));
    }

    #[test]
    fn test_try_except_else_finally() {
        let StmtKind::Try {
            handlers,
            orelse,
            finalbody,
            ..
        } = parse_one(
            "try:\n    x = 1\nexcept (KeyError, ValueError) as e:\n    x = 2\nelse:\n    x = 3\nfinally:\n    x = 4\n",
        )
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(orelse.len(), 1);
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn test_imports() {
        let StmtKind::Import(names) = parse_one("import pandas as pd, math\n") else {
            panic!("expected import");
        };
        assert_eq!(names[0], ("pandas".to_string(), Some("pd".to_string())));
        let StmtKind::ImportFrom { module, names } =
            parse_one("from dateutil.relativedelta import relativedelta\n")
        else {
            panic!("expected from-import");
        };
        assert_eq!(module, "dateutil.relativedelta");
        assert_eq!(names[0].0, "relativedelta");
    }

    #[test]
    fn test_semicolons_split_statements() {
        assert_eq!(parse("a = 1; b = 2\n").unwrap().len(), 2);
    }

    // ── expressions ─────────────────────────────────────

    #[test]
    fn test_precedence_and_power_binding() {
        let StmtKind::Expr(expr) = parse_one("-2 ** 2\n") else {
            panic!("expected expr");
        };
        assert!(matches!(
            expr.kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_chained_comparison_with_not_in() {
        let StmtKind::Expr(expr) = parse_one("a < b not in c\n") else {
            panic!("expected expr");
        };
        let ExprKind::Compare { ops, .. } = expr.kind else {
            panic!("expected compare");
        };
        assert_eq!(ops[0].0, CmpOp::Lt);
        assert_eq!(ops[1].0, CmpOp::NotIn);
    }

    #[test]
    fn test_comprehensions() {
        let StmtKind::Expr(expr) = parse_one("[x * 2 for x in xs if x > 1]\n") else {
            panic!("expected expr");
        };
        let ExprKind::Comp { kind, generators, .. } = expr.kind else {
            panic!("expected comprehension");
        };
        assert_eq!(kind, CompKind::List);
        assert_eq!(generators[0].ifs.len(), 1);

        let StmtKind::Expr(expr) = parse_one("sum(a for a in xs)\n") else {
            panic!("expected expr");
        };
        let ExprKind::Call { args, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(
            args[0].kind,
            ExprKind::Comp {
                kind: CompKind::Generator,
                ..
            }
        ));
    }

    #[test]
    fn test_dict_and_set_displays() {
        let StmtKind::Expr(expr) = parse_one("{'a': 1, 'b': 2}\n") else {
            panic!("expected expr");
        };
        assert!(matches!(expr.kind, ExprKind::Dict(ref pairs) if pairs.len() == 2));
        let StmtKind::Expr(expr) = parse_one("{1, 2}\n") else {
            panic!("expected expr");
        };
        assert!(matches!(expr.kind, ExprKind::Set(ref items) if items.len() == 2));
    }

    #[test]
    fn test_slices() {
        let StmtKind::Expr(expr) = parse_one("xs[1:-1:2]\n") else {
            panic!("expected expr");
        };
        let ExprKind::Subscript { index, .. } = expr.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(
            index.kind,
            ExprKind::Slice {
                lower: Some(_),
                upper: Some(_),
                step: Some(_)
            }
        ));
    }

    #[test]
    fn test_keyword_arguments() {
        let StmtKind::Expr(expr) = parse_one("df.sort_values(by='date', ascending=False)\n")
        else {
            panic!("expected expr");
        };
        let ExprKind::Call { keywords, .. } = expr.kind else {
            panic!("expected call");
        };
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[1].0, "ascending");
    }

    #[test]
    fn test_fstring_fields_and_specs() {
        let StmtKind::Expr(expr) = parse_one("f\"${total:,.0f} and {name!r} {{x}}\"\n") else {
            panic!("expected expr");
        };
        let ExprKind::FString(parts) = expr.kind else {
            panic!("expected f-string");
        };
        assert!(matches!(&parts[0], FPart::Lit(s) if s == "$"));
        let FPart::Field { spec, .. } = &parts[1] else {
            panic!("expected field");
        };
        assert!(matches!(&spec[0], FPart::Lit(s) if s == ",.0f"));
        assert!(matches!(&parts[3], FPart::Field { conversion: Some('r'), .. }));
        assert!(matches!(parts.last(), Some(FPart::Lit(s)) if s == " {x}"));
    }

    #[test]
    fn test_fstring_with_subscript_quotes() {
        let StmtKind::Expr(expr) = parse_one("f'{row[\"name\"]}: {d[\"k\"]}'\n") else {
            panic!("expected expr");
        };
        assert!(matches!(expr.kind, ExprKind::FString(_)));
    }

    #[test]
    fn test_adjacent_strings_concatenate() {
        let StmtKind::Expr(expr) = parse_one("'a' 'b'\n") else {
            panic!("expected expr");
        };
        assert!(matches!(expr.kind, ExprKind::Const(Literal::Str(ref s)) if &**s == "ab"));
    }

    // ── rejected constructs ─────────────────────────────

    #[test]
    fn test_rejects_unsupported_statements() {
        assert!(parse_err("class A:\n    pass\n").contains("class"));
        assert!(parse_err("with open('f') as f:\n    pass\n").contains("with"));
        assert!(parse_err("global x\n").contains("global"));
        assert!(parse_err("del x\n").contains("del"));
        assert!(parse_err("@wrap\ndef f():\n    pass\n").contains("decorator"));
        assert!(parse_err("from os import *\n").contains("import *"));
    }

    #[test]
    fn test_rejects_star_arguments() {
        assert!(parse_err("def f(*args):\n    pass\n").contains("*args"));
        assert!(parse_err("f(*xs)\n").contains("star"));
    }

    #[test]
    fn test_rejects_attribute_assignment() {
        assert!(parse_err("obj.x = 1\n").contains("attribute"));
    }

    #[test]
    fn test_compile_error_reports_line() {
        let err = parse("x = 1\ny = (\n").unwrap_err();
        assert!(matches!(err, SandboxError::Compile { .. }));
        let err = parse("x = 1\ny = = 2\n").unwrap_err();
        assert!(matches!(err, SandboxError::Compile { line: 2, .. }));
    }

    // ── nesting limits ──────────────────────────────────

    fn nested_source(open: &str, close: &str, levels: usize) -> String {
        format!("x = {}1{}\n", open.repeat(levels), close.repeat(levels))
    }

    #[test]
    fn test_moderate_nesting_parses() {
        assert!(parse(&nested_source("(", ")", 40)).is_ok());
        assert!(parse(&nested_source("[", "]", 40)).is_ok());
        assert!(parse(&format!("x = {}1\n", "-".repeat(40))).is_ok());
        assert!(parse(&format!("x = {}\n", vec!["1"; 60].join(" + "))).is_ok());
    }

    #[test]
    fn test_deep_parentheses_are_a_compile_error() {
        for (open, close) in [("(", ")"), ("[", "]"), ("{'k': ", "}")] {
            let err = parse(&nested_source(open, close, 200_000)).unwrap_err();
            assert!(
                matches!(&err, SandboxError::Compile { message, .. } if message == "too many nested parentheses"),
                "{open}: {err}"
            );
        }
    }

    #[test]
    fn test_long_unary_and_operator_chains_are_rejected() {
        let err = parse_err(&format!("x = {}1\n", "-".repeat(50_000)));
        assert!(err.contains("too many nested unary operators"), "{err}");
        let err = parse_err(&format!("x = {}\n", vec!["1"; 100_000].join(" + ")));
        assert!(err.contains("too many nested operators"), "{err}");
        let err = parse_err(&format!("x = y{}\n", "[0]".repeat(100_000)));
        assert!(err.contains("too many nested trailers"), "{err}");
        let err = parse_err(&format!("x = not {}y\n", "not ".repeat(50_000)));
        assert!(err.contains("too many nested unary operators"), "{err}");
    }

    #[test]
    fn test_deep_blocks_and_elif_chains_are_rejected() {
        let mut source = String::new();
        for level in 0..(MAX_NESTING + 5) {
            source.push_str(&"    ".repeat(level));
            source.push_str("if x:\n");
        }
        source.push_str(&"    ".repeat(MAX_NESTING + 5));
        source.push_str("pass\n");
        assert!(parse_err(&source).contains("too many nested blocks"));

        let mut chain = String::from("if x == 0:\n    pass\n");
        for i in 1..(MAX_NESTING * 3) {
            chain.push_str(&format!("elif x == {i}:\n    pass\n"));
        }
        assert!(parse_err(&chain).contains("too many nested blocks"));
    }

    #[test]
    fn test_deep_fstring_nesting_is_rejected() {
        let source = format!("x = f'{{{}1{}}}'\n", "(".repeat(5_000), ")".repeat(5_000));
        assert!(parse_err(&source).contains("too many nested parentheses"));
    }
}
