//! Condition expression language: AST and parser.
//!
//! Grammar:
//! ```text
//! Expr       ::= AndExpr ( '||' AndExpr )*
//! AndExpr    ::= Term ( '&&' Term )*
//! Term       ::= '(' Expr ')' | Comparison | Path
//! Comparison ::= Path ( '==' | '=' | '!=' ) Literal
//!              | Path 'in' '[' Literal ( ',' Literal )* ']'
//! Path       ::= Ident ( '.' Ident )*
//! Literal    ::= QuotedString | Number | 'true' | 'false' | BareWord
//! ```
//!
//! There is deliberately no negation operator: every leaf that touches an
//! unknown field evaluates to `false`, and that must hold for the whole tree.

use std::fmt;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{any, literal, take_while};
use winnow::{ModalResult, Parser};

use milestone_types::MilestoneError;

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    /// Disjunction (`||`); true when any child is true.
    Any(Vec<ConditionExpr>),
    /// Conjunction (`&&`); true when every child is true.
    All(Vec<ConditionExpr>),
    Compare {
        path: FieldPath,
        op: Operator,
        value: Literal,
    },
    In {
        path: FieldPath,
        values: Vec<Literal>,
    },
    /// Bare path: true when the referenced value is truthy.
    Truthy(FieldPath),
}

/// Dotted reference such as `rp_required` or `S1_profile.graduation_track`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Single-segment paths name a field of the evaluating node or a process flag.
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }

    /// For `node.field` paths, the node id prefix.
    pub fn node_prefix(&self) -> Option<&str> {
        if self.segments.len() > 1 {
            self.segments.first().map(String::as_str)
        } else {
            None
        }
    }

    /// The path after the node prefix (or the whole path when simple).
    pub fn field_key(&self) -> String {
        if self.is_simple() {
            self.segments[0].clone()
        } else {
            self.segments[1..].join(".")
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionExpr::Any(children) => write_joined(f, children, " || "),
            ConditionExpr::All(children) => write_joined(f, children, " && "),
            ConditionExpr::Compare { path, op, value } => {
                let op = match op {
                    Operator::Eq => "==",
                    Operator::NotEq => "!=",
                };
                write!(f, "{path} {op} {value}")
            }
            ConditionExpr::In { path, values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{path} in [{}]", rendered.join(", "))
            }
            ConditionExpr::Truthy(path) => write!(f, "{path}"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[ConditionExpr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

impl ConditionExpr {
    /// Every field path referenced anywhere in the expression, in source order.
    pub fn paths(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            ConditionExpr::Any(children) | ConditionExpr::All(children) => {
                for child in children {
                    child.collect_paths(out);
                }
            }
            ConditionExpr::Compare { path, .. }
            | ConditionExpr::In { path, .. }
            | ConditionExpr::Truthy(path) => out.push(path),
        }
    }

    /// The implicit match expression of an outcome without `when`: `outcome == "<value>"`.
    pub fn outcome_equals(value: &str) -> Self {
        ConditionExpr::Compare {
            path: FieldPath::new(vec!["outcome".to_string()]),
            op: Operator::Eq,
            value: Literal::String(value.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':')
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn ident_char<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1, is_ident_char).parse_next(input)
}

fn word_char<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1, is_word_char).parse_next(input)
}

/// Parse an identifier: [A-Za-z_][A-Za-z0-9_-]*
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

fn field_path(input: &mut &str) -> ModalResult<FieldPath> {
    let first = identifier.parse_next(input)?;
    let rest: Vec<&str> = repeat(0.., preceded('.', identifier)).parse_next(input)?;
    let mut segments = vec![first.to_string()];
    segments.extend(rest.into_iter().map(String::from));
    Ok(FieldPath { segments })
}

/// Parse a single- or double-quoted string with escape support.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let quote = alt(('"', '\'')).parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = any.parse_next(input)?;
        match c {
            c if c == quote => break,
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => s.push(other),
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

fn boolean_value(input: &mut &str) -> ModalResult<bool> {
    terminated(
        alt((literal("true").value(true), literal("false").value(false))),
        not(ident_char),
    )
    .parse_next(input)
}

fn number_value(input: &mut &str) -> ModalResult<f64> {
    let s: &str = terminated(
        (opt('-'), digit1, opt(('.', digit1))).take(),
        not(word_char),
    )
    .parse_next(input)?;
    s.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn bare_word(input: &mut &str) -> ModalResult<String> {
    take_while(1.., is_word_char)
        .map(String::from)
        .parse_next(input)
}

fn literal_value(input: &mut &str) -> ModalResult<Literal> {
    alt((
        quoted_string.map(Literal::String),
        boolean_value.map(Literal::Boolean),
        number_value.map(Literal::Number),
        bare_word.map(Literal::String),
    ))
    .parse_next(input)
}

fn literal_list(input: &mut &str) -> ModalResult<Vec<Literal>> {
    let _ = '['.parse_next(input)?;
    let values: Vec<Literal> =
        separated(1.., delimited(ws, literal_value, ws), ',').parse_next(input)?;
    let _ = ']'
        .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
        .parse_next(input)?;
    Ok(values)
}

fn operator(input: &mut &str) -> ModalResult<Operator> {
    alt((
        literal("==").value(Operator::Eq),
        literal("!=").value(Operator::NotEq),
        literal("=").value(Operator::Eq),
    ))
    .parse_next(input)
}

fn term(input: &mut &str) -> ModalResult<ConditionExpr> {
    let _ = ws.parse_next(input)?;
    if opt('(').parse_next(input)?.is_some() {
        let inner = or_expr.parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let _ = ')'
            .context(StrContext::Expected(StrContextValue::CharLiteral(')')))
            .parse_next(input)?;
        return Ok(inner);
    }

    let path = field_path
        .context(StrContext::Expected(StrContextValue::Description(
            "field path",
        )))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;

    if let Some(op) = opt(operator).parse_next(input)? {
        let _ = ws.parse_next(input)?;
        let value = literal_value
            .context(StrContext::Expected(StrContextValue::Description(
                "literal value",
            )))
            .parse_next(input)?;
        return Ok(ConditionExpr::Compare { path, op, value });
    }

    if opt(terminated(literal("in"), not(ident_char)))
        .parse_next(input)?
        .is_some()
    {
        let _ = ws.parse_next(input)?;
        let values = literal_list
            .context(StrContext::Expected(StrContextValue::Description(
                "'[' value list ']'",
            )))
            .parse_next(input)?;
        return Ok(ConditionExpr::In { path, values });
    }

    Ok(ConditionExpr::Truthy(path))
}

fn and_expr(input: &mut &str) -> ModalResult<ConditionExpr> {
    let first = term.parse_next(input)?;
    let rest: Vec<ConditionExpr> =
        repeat(0.., preceded((ws, literal("&&")), term)).parse_next(input)?;
    Ok(combine(first, rest, ConditionExpr::All))
}

fn or_expr(input: &mut &str) -> ModalResult<ConditionExpr> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<ConditionExpr> =
        repeat(0.., preceded((ws, literal("||")), and_expr)).parse_next(input)?;
    Ok(combine(first, rest, ConditionExpr::Any))
}

fn combine(
    first: ConditionExpr,
    rest: Vec<ConditionExpr>,
    wrap: fn(Vec<ConditionExpr>) -> ConditionExpr,
) -> ConditionExpr {
    if rest.is_empty() {
        first
    } else {
        let mut children = Vec::with_capacity(rest.len() + 1);
        children.push(first);
        children.extend(rest);
        wrap(children)
    }
}

fn error_at(original: &str, remaining: &str, message: String) -> MilestoneError {
    let consumed = original.len().saturating_sub(remaining.len());
    let prefix = &original[..consumed];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    let snippet: String = remaining.chars().take(40).collect();
    MilestoneError::ParseError {
        line,
        col,
        message,
        source_snippet: if snippet.is_empty() { None } else { Some(snippet) },
    }
}

/// Parse a condition string into a [`ConditionExpr`].
///
/// Empty input is rejected: a condition that says nothing cannot gate anything.
pub fn parse_condition(input: &str) -> Result<ConditionExpr, MilestoneError> {
    if input.trim().is_empty() {
        return Err(error_at(input, input, "empty condition expression".into()));
    }

    let mut remaining = input;
    match terminated(or_expr, ws).parse_next(&mut remaining) {
        Ok(expr) if remaining.is_empty() => Ok(expr),
        Ok(_) => Err(error_at(
            input,
            remaining,
            format!("unexpected trailing input '{}'", remaining.trim()),
        )),
        Err(e) => Err(error_at(input, remaining, format!("{e}"))),
    }
}
