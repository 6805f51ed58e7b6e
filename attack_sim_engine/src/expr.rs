//! Boolean expression evaluator.
//!
//! A small recursive-descent parser and tree walker over propositional
//! formulas: `AND`, `OR`, `NOT`, parentheses, and atomic symbols matching
//! `[A-Za-z0-9_.]+`. No SAT/SMT is needed — the kernel only ever evaluates
//! expressions after every symbol has been substituted, so simplification
//! just needs to be sound and total on fully-bound input.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

/// A parsed propositional formula.
///
/// Derives `Hash`/`Eq` so a [`crate::world::Precondition`] can serve as part
/// of the discovery ledger's repeat key without any separate string
/// round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(bool),
    Symbol(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprParseError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("expected closing parenthesis")]
    UnclosedParen,
    #[error("empty expression")]
    Empty,
}

impl Expr {
    /// All free symbols appearing in the expression.
    pub fn symbols(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut HashSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Symbol(s) => {
                out.insert(s.clone());
            }
            Expr::Not(e) => e.collect_symbols(out),
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_symbols(out);
                r.collect_symbols(out);
            }
        }
    }

    /// Substitute every bound symbol with its truth value and simplify.
    ///
    /// Symbols absent from `bindings` are left as free symbols (useful for
    /// callers that want to inspect a partially-bound formula), but the
    /// kernel only ever calls this with every symbol present, after which
    /// [`Expr::as_bool`] is guaranteed to return `Some`.
    pub fn substitute(&self, bindings: &HashMap<String, bool>) -> Expr {
        match self {
            Expr::Const(b) => Expr::Const(*b),
            Expr::Symbol(s) => match bindings.get(s) {
                Some(b) => Expr::Const(*b),
                None => Expr::Symbol(s.clone()),
            },
            Expr::Not(e) => match e.substitute(bindings) {
                Expr::Const(b) => Expr::Const(!b),
                other => Expr::Not(Box::new(other)),
            },
            Expr::And(l, r) => {
                let l = l.substitute(bindings);
                let r = r.substitute(bindings);
                match (&l, &r) {
                    (Expr::Const(false), _) | (_, Expr::Const(false)) => Expr::Const(false),
                    (Expr::Const(true), other) | (other, Expr::Const(true)) => other.clone(),
                    _ => Expr::And(Box::new(l), Box::new(r)),
                }
            }
            Expr::Or(l, r) => {
                let l = l.substitute(bindings);
                let r = r.substitute(bindings);
                match (&l, &r) {
                    (Expr::Const(true), _) | (_, Expr::Const(true)) => Expr::Const(true),
                    (Expr::Const(false), other) | (other, Expr::Const(false)) => other.clone(),
                    _ => Expr::Or(Box::new(l), Box::new(r)),
                }
            }
        }
    }

    /// The expression's truth value, if it has been fully simplified down to
    /// a constant (i.e. every symbol was bound before calling
    /// [`Expr::substitute`]).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Const(b) => Some(*b),
            _ => None,
        }
    }

    /// Convenience: substitute and immediately collapse to a bool, treating
    /// any leftover free symbol as an error. The kernel always binds every
    /// symbol, so this should never fail on kernel-constructed input.
    pub fn eval(&self, bindings: &HashMap<String, bool>) -> Option<bool> {
        self.substitute(bindings).as_bool()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(b) => write!(f, "{}", b),
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Not(e) => write!(f, "NOT {}", paren_if_compound(e)),
            Expr::And(l, r) => write!(f, "{} AND {}", paren_if_compound(l), paren_if_compound(r)),
            Expr::Or(l, r) => write!(f, "{} OR {}", paren_if_compound(l), paren_if_compound(r)),
        }
    }
}

fn paren_if_compound(e: &Expr) -> String {
    match e {
        Expr::Const(_) | Expr::Symbol(_) => format!("{}", e),
        _ => format!("({})", e),
    }
}

/// Parse a propositional formula: `NOT` binds tightest, then `AND`, then `OR`.
pub fn parse(input: &str) -> Result<Expr, ExprParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprParseError::Empty);
    }
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprParseError::UnexpectedToken(parser.tokens[parser.pos].clone()));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Symbol(String),
}

fn tokenize(input: &str) -> Result<Vec<String>, ExprParseError> {
    let mut out = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' {
            out.push(c.to_string());
            i += 1;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            out.push(chars[start..i].iter().collect());
            continue;
        }
        return Err(ExprParseError::UnexpectedToken(c.to_string()));
    }
    Ok(out)
}

fn classify(tok: &str) -> Token {
    match tok {
        "(" => Token::LParen,
        ")" => Token::RParen,
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        other => Token::Symbol(other.to_string()),
    }
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|s| classify(s))
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprParseError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprParseError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprParseError::UnclosedParen),
                }
            }
            Some(Token::Symbol(s)) => Ok(Expr::Symbol(s)),
            Some(other) => Err(ExprParseError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ExprParseError::UnexpectedEnd),
        }
    }
}
