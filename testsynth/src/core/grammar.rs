//! Recursive-descent parser that enforces the supported Python subset.
//!
//! ```text
//! file     := (funcdef)* EOF
//! funcdef  := 'def' NAME '(' [param (',' param)* [',']] ')' ['->' NAME] ':' suite
//! param    := NAME [':' NAME]
//! suite    := simple NEWLINE | NEWLINE INDENT stmt+ DEDENT
//! stmt     := simple NEWLINE | if_stmt
//! simple   := 'return' [expr] | NAME '=' expr
//! if_stmt  := 'if' expr ':' suite ['else' ':' suite]
//! expr     := arith (cmp_op arith)*
//! arith    := term (('+' | '-') term)*
//! term     := factor (('*' | '/') factor)*
//! factor   := ('-' | '+') factor | atom
//! atom     := NAME | NUMBER | 'True' | 'False' | 'None' | '(' expr ')'
//! ```
//!
//! Loops, exceptions, classes, comprehensions, `elif`, calls and every other
//! construct fail with a [`GrammarViolation`] at the first offending token, as
//! does nesting past [`MAX_NESTING_DEPTH`].

use std::collections::BTreeSet;
use std::fmt;

use crate::core::ast::{BinOp, CmpOp, Expr, FunctionDef, Module, ParamDecl, Stmt, UnaryOp};
use crate::core::lexer::{Token, TokenKind, tokenize};

const STMT_START: &[&str] = &["NAME", "'return'", "'if'"];
const ATOM_START: &[&str] = &[
    "NAME", "NUMBER", "'True'", "'False'", "'None'", "'('", "'-'", "'+'",
];
const EXPR_CONTINUATION: &[&str] = &[
    "'+'", "'-'", "'*'", "'/'", "'=='", "'!='", "'<'", "'>'", "'<='", "'>='",
];
const FLAT_ATOM: &[&str] = &["NAME", "NUMBER", "'True'", "'False'", "'None'"];

/// Deepest accepted nesting of parentheses, unary operators and `if` blocks.
pub const MAX_NESTING_DEPTH: usize = 200;

/// Source uses a construct outside the supported subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarViolation {
    pub line: u32,
    pub column: u32,
    /// Syntactic categories that would have been accepted at this position.
    pub expected: BTreeSet<String>,
    /// Description of what was found instead.
    pub found: String,
}

impl GrammarViolation {
    pub fn new<'a>(
        line: u32,
        column: u32,
        expected: impl IntoIterator<Item = &'a str>,
        found: impl Into<String>,
    ) -> Self {
        Self {
            line,
            column,
            expected: expected.into_iter().map(str::to_string).collect(),
            found: found.into(),
        }
    }
}

impl fmt::Display for GrammarViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected: Vec<&str> = self.expected.iter().map(String::as_str).collect();
        write!(
            f,
            "unsupported syntax at line {}, column {}: found {}, expected one of {}",
            self.line,
            self.column,
            self.found,
            expected.join(", ")
        )
    }
}

impl std::error::Error for GrammarViolation {}

pub type ParseResult<T> = Result<T, GrammarViolation>;

/// Tokenize and parse `code`, returning the syntax tree of its function definitions.
pub fn parse_module(code: &str) -> ParseResult<Module> {
    let tokens = tokenize(code)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof.
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn violation(&self, expected: &[&str]) -> GrammarViolation {
        let tok = self.peek();
        GrammarViolation::new(
            tok.line,
            tok.column,
            expected.iter().copied(),
            tok.kind.to_string(),
        )
    }

    /// Run `f` one nesting level deeper, failing at the current token past the limit.
    fn nested<T>(
        &mut self,
        expected: &[&str],
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            let mut err = self.violation(expected);
            err.found = format!("nesting deeper than {MAX_NESTING_DEPTH} levels");
            return Err(err);
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.at(&kind) {
            return Ok(self.advance());
        }
        Err(self.violation(&[kind.category()]))
    }

    fn expect_name(&mut self) -> ParseResult<(String, Token)> {
        if let TokenKind::Name(name) = &self.peek().kind {
            let name = name.clone();
            return Ok((name, self.advance()));
        }
        Err(self.violation(&["NAME"]))
    }

    fn module(mut self) -> ParseResult<Module> {
        let mut functions = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Def => functions.push(self.funcdef()?),
                _ => return Err(self.violation(&["'def'", "EOF"])),
            }
        }
        Ok(Module { functions })
    }

    fn funcdef(&mut self) -> ParseResult<FunctionDef> {
        let def = self.expect(TokenKind::Def)?;
        let (name, _) = self.expect_name()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if !matches!(self.peek().kind, TokenKind::Name(_)) {
                return Err(self.violation(&["NAME", "')'"]));
            }
            params.push(self.param()?);
            if !self.eat(&TokenKind::Comma) && !self.at(&TokenKind::RParen) {
                return Err(self.violation(&["','", "')'"]));
            }
        }
        self.expect(TokenKind::RParen)?;

        let returns = if self.eat(&TokenKind::Arrow) {
            Some(self.expect_name()?.0)
        } else {
            None
        };
        if !self.at(&TokenKind::Colon) {
            let expected: &[&str] = if returns.is_some() {
                &["':'"]
            } else {
                &["'->'", "':'"]
            };
            return Err(self.violation(expected));
        }
        self.advance();
        let body = self.suite()?;

        Ok(FunctionDef {
            name,
            params,
            returns,
            body,
            line: def.line,
        })
    }

    fn param(&mut self) -> ParseResult<ParamDecl> {
        let (name, _) = self.expect_name()?;
        let annotation = if self.eat(&TokenKind::Colon) {
            Some(self.expect_name()?.0)
        } else {
            None
        };
        Ok(ParamDecl { name, annotation })
    }

    fn suite(&mut self) -> ParseResult<Vec<Stmt>> {
        if !self.eat(&TokenKind::Newline) {
            if matches!(self.peek().kind, TokenKind::Name(_) | TokenKind::Return) {
                let stmt = self.simple()?;
                self.end_of_simple()?;
                return Ok(vec![stmt]);
            }
            let mut expected = vec!["NEWLINE", "NAME", "'return'"];
            expected.sort_unstable();
            return Err(self.violation(&expected));
        }
        self.expect(TokenKind::Indent)?;

        let mut body = vec![self.stmt()?];
        while !self.eat(&TokenKind::Dedent) {
            body.push(self.stmt()?);
        }
        Ok(body)
    }

    fn stmt(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::If => self.nested(&["NAME", "'return'"], Self::if_stmt),
            TokenKind::Name(_) | TokenKind::Return => {
                let stmt = self.simple()?;
                self.end_of_simple()?;
                Ok(stmt)
            }
            _ => Err(self.violation(STMT_START)),
        }
    }

    fn end_of_simple(&mut self) -> ParseResult<()> {
        if self.eat(&TokenKind::Newline) {
            return Ok(());
        }
        let mut expected = EXPR_CONTINUATION.to_vec();
        expected.push("NEWLINE");
        Err(self.violation(&expected))
    }

    fn simple(&mut self) -> ParseResult<Stmt> {
        if self.at(&TokenKind::Return) {
            let ret = self.advance();
            let value = if self.at(&TokenKind::Newline) {
                None
            } else {
                Some(self.expr()?)
            };
            return Ok(Stmt::Return {
                value,
                line: ret.line,
            });
        }

        let (target, tok) = self.expect_name()?;
        self.expect(TokenKind::Assign)?;
        let value = self.expr()?;
        Ok(Stmt::Assign {
            target,
            value,
            line: tok.line,
        })
    }

    fn if_stmt(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::If)?;
        let test = self.expr()?;
        if !self.eat(&TokenKind::Colon) {
            let mut expected = EXPR_CONTINUATION.to_vec();
            expected.push("':'");
            return Err(self.violation(&expected));
        }
        let body = self.suite()?;
        let orelse = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::Colon)?;
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            test,
            body,
            orelse,
            line: kw.line,
        })
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = cmp_op(&self.peek().kind) {
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            rest,
        })
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.atom(),
        };
        let operand = self.nested(FLAT_ATOM, |p| {
            p.advance();
            p.factor()
        })?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let expr = match &self.peek().kind {
            TokenKind::Name(name) => Expr::Name(name.clone()),
            TokenKind::Number(text) => Expr::Number(text.clone()),
            TokenKind::True => Expr::Constant("True"),
            TokenKind::False => Expr::Constant("False"),
            TokenKind::None => Expr::Constant("None"),
            TokenKind::LParen => return self.nested(FLAT_ATOM, Self::paren),
            _ => return Err(self.violation(ATOM_START)),
        };
        self.advance();
        Ok(expr)
    }

    fn paren(&mut self) -> ParseResult<Expr> {
        self.advance();
        let inner = self.expr()?;
        if !self.at(&TokenKind::RParen) {
            let mut expected = EXPR_CONTINUATION.to_vec();
            expected.push("')'");
            return Err(self.violation(&expected));
        }
        self.advance();
        Ok(Expr::Paren(Box::new(inner)))
    }
}

fn cmp_op(kind: &TokenKind) -> Option<CmpOp> {
    match kind {
        TokenKind::EqEq => Some(CmpOp::Eq),
        TokenKind::NotEq => Some(CmpOp::NotEq),
        TokenKind::Lt => Some(CmpOp::Lt),
        TokenKind::Gt => Some(CmpOp::Gt),
        TokenKind::LtEq => Some(CmpOp::LtEq),
        TokenKind::GtEq => Some(CmpOp::GtEq),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(code: &str) -> GrammarViolation {
        parse_module(code).expect_err("expected grammar violation")
    }

    #[test]
    fn parses_nested_if_else() {
        let module = parse_module(
            "def divide(a, b):\n    if b == 0:\n        return 0 - 1\n    else:\n        result = a / b\n        return result\n",
        )
        .expect("parse");
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name, "divide");
        assert_eq!(f.params.len(), 2);
        match &f.body[0] {
            Stmt::If {
                test, orelse, line, ..
            } => {
                assert_eq!(test.to_string(), "b == 0");
                assert_eq!(orelse.len(), 2);
                assert_eq!(*line, 2);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_annotations_and_inline_suites() {
        let module =
            parse_module("def f(x: int, y,) -> int:\n    if x < 0: return 0\n    return x + y\n")
                .expect("parse");
        let f = &module.functions[0];
        assert_eq!(f.params[0].annotation.as_deref(), Some("int"));
        assert_eq!(f.params[1].annotation, None);
        assert_eq!(f.returns.as_deref(), Some("int"));
        assert_eq!(f.body.len(), 2);
    }

    #[test]
    fn operator_precedence_is_preserved_in_rendering() {
        let module = parse_module("def f(a, b):\n    if (a + b) * 2 >= -b / 3:\n        return 1\n")
            .expect("parse");
        let Stmt::If { test, .. } = &module.functions[0].body[0] else {
            panic!("expected if");
        };
        assert_eq!(test.to_string(), "(a + b) * 2 >= -b / 3");
    }

    #[test]
    fn rejects_loops_at_the_keyword() {
        let err = violation("def f(xs):\n    for x in xs:\n        return x\n");
        assert_eq!((err.line, err.column), (2, 5));
        assert!(err.expected.contains("'if'"));
        assert!(err.expected.contains("'return'"));
        assert!(err.expected.contains("NAME"));
        assert!(err.found.contains("for"));
    }

    #[test]
    fn rejects_while_try_and_class() {
        assert_eq!(violation("def f(x):\n    while x:\n        x = 0\n").line, 2);
        assert_eq!(violation("def f(x):\n    try:\n        x = 0\n").line, 2);
        let err = violation("class A:\n    x = 1\n");
        assert_eq!((err.line, err.column), (1, 1));
        assert!(err.expected.contains("'def'"));
    }

    #[test]
    fn rejects_elif() {
        let err = violation(
            "def f(x):\n    if x > 0:\n        return 1\n    elif x < 0:\n        return 2\n",
        );
        assert_eq!((err.line, err.column), (4, 5));
    }

    #[test]
    fn rejects_calls_and_strings() {
        let err = violation("def f(x):\n    return g(x)\n");
        assert_eq!((err.line, err.column), (2, 13));
        assert!(err.expected.contains("NEWLINE"));

        let err = violation("def f():\n    return \"s\"\n");
        assert!(err.found.contains("unsupported character"));
    }

    #[test]
    fn rejects_top_level_statements() {
        let err = violation("x = 1\n");
        assert_eq!(err.expected.len(), 2);
    }

    #[test]
    fn requires_indented_body() {
        let err = violation("def f():\nreturn 1\n");
        assert_eq!(err.line, 2);
        assert!(err.expected.contains("INDENT"));
    }

    #[test]
    fn display_lists_position_and_expectations() {
        let err = violation("def f(xs):\n    for x in xs:\n        return x\n");
        let text = err.to_string();
        assert!(text.contains("line 2, column 5"), "{text}");
        assert!(text.contains("'if'"), "{text}");
    }

    #[test]
    fn deep_parentheses_are_a_violation_not_a_crash() {
        let depth = 10_000;
        let code = format!(
            "def f(x):\n    return {}x{}\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = violation(&code);
        assert_eq!(err.line, 2);
        assert_eq!(err.column as usize, 12 + MAX_NESTING_DEPTH);
        assert!(err.found.contains("nesting deeper than"), "{err}");
    }

    #[test]
    fn long_unary_chains_are_a_violation() {
        let code = format!("def f(x):\n    return {}x\n", "-".repeat(10_000));
        assert!(violation(&code).found.contains("nesting deeper than"));
    }

    #[test]
    fn nesting_at_the_limit_parses() {
        let depth = MAX_NESTING_DEPTH;
        let code = format!(
            "def f(x):\n    return {}x{}\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        assert_eq!(parse_module(&code).expect("parse").functions.len(), 1);
    }

    #[test]
    fn deeply_nested_ifs_are_a_violation() {
        let mut code = String::from("def f(x):\n");
        for level in 1..=MAX_NESTING_DEPTH + 1 {
            code.push_str(&" ".repeat(level * 4));
            code.push_str("if x:\n");
        }
        code.push_str(&" ".repeat((MAX_NESTING_DEPTH + 2) * 4));
        code.push_str("return x\n");
        let err = violation(&code);
        assert_eq!(err.line as usize, MAX_NESTING_DEPTH + 2);
        assert!(err.found.contains("nesting deeper than"));
    }

    #[test]
    fn empty_source_is_an_empty_module() {
        assert!(parse_module("").expect("parse").functions.is_empty());
        assert!(
            parse_module("# only comments\n\n")
                .expect("parse")
                .functions
                .is_empty()
        );
    }
}
