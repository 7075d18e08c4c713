//! Expression parser, type checker and evaluator for derived columns.
//!
//! Expressions are pure functions of one row. Supported syntax:
//! - column references in double quotes: `"Sales"`
//! - literals: `12`, `1.5`, `'West'`, `true`, `false`, `null`
//! - arithmetic: `+ - * / % ^` and unary `-`
//! - comparisons: `== != < <= > >=`
//! - logic: `and`, `or`, `not`
//! - builtin functions such as `if("Sales" > 10, 'big', 'small')`,
//!   `upper("Region")` or `bucket("Order Date", 'M')`
//!
//! Every expression has one static output type. Runtime faults (division by
//! zero, overflow, sqrt of a negative number) evaluate to null.

use crate::column::{
    days_from_ms, days_from_ymd, weekday_from_days, ymd_from_days, ColumnType, ColumnValue,
    MS_PER_DAY,
};
use crate::error::{EngineError, Result, SourceSpan};
use crate::table::{Schema, Table};

/// Token types for lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Column(String),
    Ident(String),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    // Operators
    Eq,      // ==
    Ne,      // !=
    Lt,      // <
    Le,      // <=
    Gt,      // >
    Ge,      // >=
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    Caret,   // ^
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
    Eof,
}

/// Lexer over the source text. Positions are byte offsets so error spans
/// can be sliced straight out of the source.
struct Lexer {
    input: Vec<(usize, char)>,
    len: usize,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.char_indices().collect(),
            len: input.len(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.input.get(self.pos).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn read_number(&mut self, start: usize) -> Result<Token> {
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                is_float = true;
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let span = SourceSpan::new(start, self.offset());
        if is_float {
            num_str
                .parse()
                .map(Token::Float)
                .map_err(|_| EngineError::expression(format!("Invalid number '{}'", num_str), span))
        } else {
            num_str
                .parse()
                .map(Token::Int)
                .map_err(|_| EngineError::expression(format!("Integer '{}' is out of range", num_str), span))
        }
    }

    fn read_quoted(&mut self, quote: char, start: usize) -> Result<String> {
        self.advance(); // consume opening quote
        let mut s = String::new();

        while let Some(c) = self.peek() {
            if c == quote {
                self.advance(); // consume closing quote
                return Ok(s);
            } else if c == '\\' {
                self.advance();
                if let Some(escaped) = self.advance() {
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        _ => s.push(escaped),
                    }
                }
            } else {
                s.push(c);
                self.advance();
            }
        }

        let what = if quote == '"' { "column name" } else { "string" };
        Err(EngineError::expression(
            format!("Unterminated {}", what),
            SourceSpan::new(start, self.len),
        ))
    }

    fn next_token(&mut self) -> Result<(Token, SourceSpan)> {
        self.skip_whitespace();
        let start = self.offset();

        let c = match self.peek() {
            None => return Ok((Token::Eof, SourceSpan::new(start, start))),
            Some(c) => c,
        };

        let token = match c {
            '(' => { self.advance(); Token::LParen }
            ')' => { self.advance(); Token::RParen }
            ',' => { self.advance(); Token::Comma }
            '+' => { self.advance(); Token::Plus }
            '-' => { self.advance(); Token::Minus }
            '*' => { self.advance(); Token::Star }
            '/' => { self.advance(); Token::Slash }
            '%' => { self.advance(); Token::Percent }
            '^' => { self.advance(); Token::Caret }
            '=' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                }
                Token::Eq // Single = also means ==
            }
            '!' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '<' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '"' => Token::Column(self.read_quoted('"', start)?),
            '\'' => Token::String(self.read_quoted('\'', start)?),
            _ if c.is_ascii_digit() || c == '.' => self.read_number(start)?,
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident();
                // Check for keywords
                match ident.to_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "null" => Token::Null,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(ident),
                }
            }
            _ => {
                self.advance();
                return Err(EngineError::expression(
                    format!("Unexpected character '{}'", c),
                    SourceSpan::new(start, self.offset()),
                ));
            }
        };

        Ok((token, SourceSpan::new(start, self.offset())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Untyped syntax tree node.
#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    span: SourceSpan,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Column(String),
    Literal(ColumnValue),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

/// Parser for building the syntax tree
struct Parser {
    lexer: Lexer,
    current: Token,
    span: SourceSpan,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let (current, span) = lexer.next_token()?;
        Ok(Parser { lexer, current, span })
    }

    fn advance(&mut self) -> Result<()> {
        let (token, span) = self.lexer.next_token()?;
        self.current = token;
        self.span = span;
        Ok(())
    }

    fn unexpected(&self, expected: &str) -> EngineError {
        let found = match &self.current {
            Token::Eof => "end of expression".to_string(),
            token => format!("{:?}", token),
        };
        EngineError::expression(format!("Expected {}, got {}", expected, found), self.span)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<SourceSpan> {
        if self.current == expected {
            let span = self.span;
            self.advance()?;
            Ok(span)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
        let span = left.span.join(right.span);
        Node {
            kind: NodeKind::Binary(op, Box::new(left), Box::new(right)),
            span,
        }
    }

    /// Parse a full expression
    fn parse(&mut self) -> Result<Node> {
        self.parse_or()
    }

    /// Parse OR expressions (lowest precedence)
    fn parse_or(&mut self) -> Result<Node> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Node> {
        if self.current == Token::Not {
            let start = self.span;
            self.advance()?;
            let inner = self.parse_not()?;
            let span = start.join(inner.span);
            Ok(Node {
                kind: NodeKind::Not(Box::new(inner)),
                span,
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Node> {
        let left = self.parse_additive()?;
        let op = match self.current {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_additive()?;
        Ok(Self::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        if self.current == Token::Minus {
            let start = self.span;
            self.advance()?;
            let inner = self.parse_unary()?;
            let span = start.join(inner.span);
            return Ok(Node {
                kind: NodeKind::Neg(Box::new(inner)),
                span,
            });
        }
        self.parse_power()
    }

    /// `^` binds tighter than unary minus on its left and is right
    /// associative.
    fn parse_power(&mut self) -> Result<Node> {
        let base = self.parse_primary()?;
        if self.current == Token::Caret {
            self.advance()?;
            let exponent = self.parse_unary()?;
            return Ok(Self::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let span = self.span;
        let kind = match self.current.clone() {
            Token::LParen => {
                self.advance()?;
                let inner = self.parse()?;
                let end = self.expect(Token::RParen, "')'")?;
                return Ok(Node {
                    kind: inner.kind,
                    span: span.join(end),
                });
            }
            Token::Column(name) => NodeKind::Column(name),
            Token::Int(v) => NodeKind::Literal(ColumnValue::Integer(v)),
            Token::Float(v) => NodeKind::Literal(ColumnValue::Float(v)),
            Token::String(v) => NodeKind::Literal(ColumnValue::String(v)),
            Token::Bool(v) => NodeKind::Literal(ColumnValue::Boolean(v)),
            Token::Null => NodeKind::Literal(ColumnValue::Null),
            Token::Ident(name) => {
                self.advance()?;
                if self.current != Token::LParen {
                    return Err(EngineError::expression(
                        format!("Unknown identifier '{}' (quote column names with \")", name),
                        span,
                    ));
                }
                self.advance()?;
                let mut args = Vec::new();
                if self.current != Token::RParen {
                    loop {
                        args.push(self.parse()?);
                        if self.current == Token::Comma {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                }
                let end = self.expect(Token::RParen, "')' or ','")?;
                return Ok(Node {
                    kind: NodeKind::Call(name.to_lowercase(), args),
                    span: span.join(end),
                });
            }
            _ => return Err(self.unexpected("a value, column or function call")),
        };
        self.advance()?;
        Ok(Node { kind, span })
    }
}

/// Parse an expression string into a syntax tree.
fn parse_source(input: &str) -> Result<Node> {
    let mut parser = Parser::new(input)?;
    let node = parser.parse()?;

    // Ensure we consumed all input
    if parser.current != Token::Eof {
        return Err(parser.unexpected("end of expression"));
    }

    Ok(node)
}

/// Extract all column names referenced in an expression.
fn extract_columns(node: &Node, columns: &mut Vec<String>) {
    match &node.kind {
        NodeKind::Column(name) => {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        NodeKind::Literal(_) => {}
        NodeKind::Neg(inner) | NodeKind::Not(inner) => extract_columns(inner, columns),
        NodeKind::Binary(_, left, right) => {
            extract_columns(left, columns);
            extract_columns(right, columns);
        }
        NodeKind::Call(_, args) => args.iter().for_each(|arg| extract_columns(arg, columns)),
    }
}

// ============================================================================
// Type checking
// ============================================================================

/// Truncation unit of `bucket()`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BucketUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
    Width(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    If,
    Abs,
    Sqrt,
    Floor,
    Ceil,
    Round,
    Pow,
    Min,
    Max,
    Length,
    Upper,
    Lower,
    Concat,
    Contains,
    IsNull,
    Coalesce,
    ToString,
    ToInteger,
    ToFloat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Bucket(BucketUnit),
}

/// Type checked tree. `ty` is `None` only for a bare `null`.
#[derive(Debug, Clone)]
struct Typed {
    kind: TypedKind,
    ty: Option<ColumnType>,
}

#[derive(Debug, Clone)]
enum TypedKind {
    Column(usize),
    Literal(ColumnValue),
    Neg(Box<Typed>),
    Not(Box<Typed>),
    Binary(BinaryOp, Box<Typed>, Box<Typed>),
    Call(Func, Vec<Typed>),
}

fn type_name(ty: Option<ColumnType>) -> &'static str {
    ty.map(|t| t.name()).unwrap_or("null")
}

fn is_numeric(ty: Option<ColumnType>) -> bool {
    ty.map_or(true, |t| t.is_numeric())
}

/// Common type of two branches, or `None` when they are incompatible.
fn unify(a: Option<ColumnType>, b: Option<ColumnType>) -> Option<Option<ColumnType>> {
    match (a, b) {
        (None, t) | (t, None) => Some(t),
        (Some(x), Some(y)) if x == y => Some(Some(x)),
        (Some(ColumnType::Integer), Some(ColumnType::Float))
        | (Some(ColumnType::Float), Some(ColumnType::Integer)) => Some(Some(ColumnType::Float)),
        _ => None,
    }
}

fn comparable(a: Option<ColumnType>, b: Option<ColumnType>) -> bool {
    match (a, b) {
        (None, _) | (_, None) => true,
        (Some(x), Some(y)) => x == y || (x.is_numeric() && y.is_numeric()) || (x.is_temporal() && y.is_temporal()),
    }
}

struct Checker<'a> {
    schema: &'a Schema,
}

impl<'a> Checker<'a> {
    fn check(&self, node: &Node) -> Result<Typed> {
        let err = |message: String| EngineError::expression(message, node.span);
        match &node.kind {
            NodeKind::Column(name) => {
                let index = self
                    .schema
                    .column_index(name)
                    .ok_or_else(|| err(format!("Unknown column \"{}\"", name)))?;
                Ok(Typed {
                    kind: TypedKind::Column(index),
                    ty: self.schema.column_type(name),
                })
            }
            NodeKind::Literal(value) => Ok(Typed {
                kind: TypedKind::Literal(value.clone()),
                ty: value.column_type(),
            }),
            NodeKind::Neg(inner) => {
                let inner = self.check(inner)?;
                if !is_numeric(inner.ty) {
                    return Err(err(format!("Cannot negate a {} value", type_name(inner.ty))));
                }
                let ty = inner.ty;
                Ok(Typed { kind: TypedKind::Neg(Box::new(inner)), ty })
            }
            NodeKind::Not(inner) => {
                let inner = self.check(inner)?;
                if !matches!(inner.ty, None | Some(ColumnType::Boolean)) {
                    return Err(err(format!("'not' expects a boolean, got {}", type_name(inner.ty))));
                }
                Ok(Typed {
                    kind: TypedKind::Not(Box::new(inner)),
                    ty: Some(ColumnType::Boolean),
                })
            }
            NodeKind::Binary(op, left, right) => {
                let left = self.check(left)?;
                let right = self.check(right)?;
                let ty = self.binary_type(*op, left.ty, right.ty).ok_or_else(|| {
                    err(format!(
                        "Operator {:?} cannot combine {} and {}",
                        op,
                        type_name(left.ty),
                        type_name(right.ty)
                    ))
                })?;
                Ok(Typed {
                    kind: TypedKind::Binary(*op, Box::new(left), Box::new(right)),
                    ty,
                })
            }
            NodeKind::Call(name, args) => self.check_call(name, args, node.span),
        }
    }

    fn binary_type(
        &self,
        op: BinaryOp,
        left: Option<ColumnType>,
        right: Option<ColumnType>,
    ) -> Option<Option<ColumnType>> {
        match op {
            _ if op.is_comparison() => comparable(left, right).then_some(Some(ColumnType::Boolean)),
            BinaryOp::And | BinaryOp::Or => {
                let is_bool = |t: Option<ColumnType>| matches!(t, None | Some(ColumnType::Boolean));
                (is_bool(left) && is_bool(right)).then_some(Some(ColumnType::Boolean))
            }
            BinaryOp::Add if left == Some(ColumnType::String) && matches!(right, None | Some(ColumnType::String)) => {
                Some(Some(ColumnType::String))
            }
            BinaryOp::Add if right == Some(ColumnType::String) && left.is_none() => Some(Some(ColumnType::String)),
            BinaryOp::Div | BinaryOp::Pow => {
                (is_numeric(left) && is_numeric(right)).then_some(Some(ColumnType::Float))
            }
            _ => {
                if !(is_numeric(left) && is_numeric(right)) {
                    return None;
                }
                match unify(left, right) {
                    Some(None) => Some(Some(ColumnType::Float)),
                    other => other,
                }
            }
        }
    }

    fn check_call(&self, name: &str, args: &[Node], span: SourceSpan) -> Result<Typed> {
        let err = |message: String| EngineError::expression(message, span);
        let arity = |min: usize, max: usize| -> Result<()> {
            if args.len() < min || args.len() > max {
                let expected = if min == max {
                    format!("{}", min)
                } else if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("{} to {}", min, max)
                };
                return Err(err(format!(
                    "{}() takes {} argument(s), got {}",
                    name,
                    expected,
                    args.len()
                )));
            }
            Ok(())
        };

        let func = match name {
            "if" => Func::If,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            "length" => Func::Length,
            "upper" => Func::Upper,
            "lower" => Func::Lower,
            "concat" => Func::Concat,
            "contains" => Func::Contains,
            "is_null" => Func::IsNull,
            "coalesce" => Func::Coalesce,
            "string" => Func::ToString,
            "integer" => Func::ToInteger,
            "float" => Func::ToFloat,
            "year" => Func::Year,
            "month" => Func::Month,
            "day" => Func::Day,
            "hour" => Func::Hour,
            "minute" => Func::Minute,
            "bucket" => Func::Bucket(BucketUnit::Days),
            _ => return Err(err(format!("Unknown function '{}'", name))),
        };

        match func {
            Func::If => arity(3, 3)?,
            Func::Pow | Func::Contains => arity(2, 2)?,
            Func::Bucket(_) => arity(2, 2)?,
            Func::Min | Func::Max | Func::Concat | Func::Coalesce => arity(1, usize::MAX)?,
            _ => arity(1, 1)?,
        }

        let typed: Vec<Typed> = args.iter().map(|a| self.check(a)).collect::<Result<_>>()?;
        let types: Vec<Option<ColumnType>> = typed.iter().map(|t| t.ty).collect();
        let expect = |i: usize, ok: bool, what: &str| -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(EngineError::expression(
                    format!("{}() expects {}, got {}", name, what, type_name(types[i])),
                    args[i].span,
                ))
            }
        };
        let is_string = |t: Option<ColumnType>| matches!(t, None | Some(ColumnType::String));
        let is_temporal = |t: Option<ColumnType>| t.map_or(true, |t| t.is_temporal());

        let (func, ty) = match func {
            Func::If => {
                expect(0, matches!(types[0], None | Some(ColumnType::Boolean)), "a boolean condition")?;
                let ty = unify(types[1], types[2]).ok_or_else(|| {
                    err(format!(
                        "if() branches have incompatible types {} and {}",
                        type_name(types[1]),
                        type_name(types[2])
                    ))
                })?;
                (func, ty)
            }
            Func::Abs | Func::Floor | Func::Ceil | Func::Round => {
                expect(0, is_numeric(types[0]), "a number")?;
                (func, Some(types[0].unwrap_or(ColumnType::Float)))
            }
            Func::Sqrt => {
                expect(0, is_numeric(types[0]), "a number")?;
                (func, Some(ColumnType::Float))
            }
            Func::Pow => {
                expect(0, is_numeric(types[0]), "a number")?;
                expect(1, is_numeric(types[1]), "a number")?;
                (func, Some(ColumnType::Float))
            }
            Func::Min | Func::Max => {
                let mut ty = None;
                for i in 0..types.len() {
                    expect(i, is_numeric(types[i]), "numbers")?;
                    ty = unify(ty, types[i]).unwrap_or(Some(ColumnType::Float));
                }
                (func, Some(ty.unwrap_or(ColumnType::Float)))
            }
            Func::Length => {
                expect(0, is_string(types[0]), "a string")?;
                (func, Some(ColumnType::Integer))
            }
            Func::Upper | Func::Lower => {
                expect(0, is_string(types[0]), "a string")?;
                (func, Some(ColumnType::String))
            }
            Func::Concat | Func::ToString => (func, Some(ColumnType::String)),
            Func::Contains => {
                expect(0, is_string(types[0]), "a string")?;
                expect(1, is_string(types[1]), "a string")?;
                (func, Some(ColumnType::Boolean))
            }
            Func::IsNull => (func, Some(ColumnType::Boolean)),
            Func::Coalesce => {
                let mut ty = None;
                for i in 0..types.len() {
                    ty = unify(ty, types[i]).ok_or_else(|| {
                        EngineError::expression(
                            format!("coalesce() arguments have incompatible types ({})", type_name(types[i])),
                            args[i].span,
                        )
                    })?;
                }
                (func, ty)
            }
            Func::ToInteger => (func, Some(ColumnType::Integer)),
            Func::ToFloat => (func, Some(ColumnType::Float)),
            Func::Year | Func::Month | Func::Day => {
                expect(0, is_temporal(types[0]), "a date or datetime")?;
                (func, Some(ColumnType::Integer))
            }
            Func::Hour | Func::Minute => {
                expect(0, matches!(types[0], None | Some(ColumnType::Datetime)), "a datetime")?;
                (func, Some(ColumnType::Integer))
            }
            Func::Bucket(_) => self.check_bucket(&typed, args)?,
        };

        Ok(Typed {
            kind: TypedKind::Call(func, typed),
            ty,
        })
    }

    fn check_bucket(&self, typed: &[Typed], args: &[Node]) -> Result<(Func, Option<ColumnType>)> {
        let unit_err = |message: String| EngineError::expression(message, args[1].span);
        let unit = match &typed[1].kind {
            TypedKind::Literal(value) => value.clone(),
            _ => return Err(unit_err("bucket() unit must be a literal".to_string())),
        };

        match typed[0].ty {
            Some(ty @ (ColumnType::Date | ColumnType::Datetime)) => {
                let unit = match unit.as_str() {
                    Some("s") => BucketUnit::Seconds,
                    Some("m") => BucketUnit::Minutes,
                    Some("h") => BucketUnit::Hours,
                    Some("D") => BucketUnit::Days,
                    Some("W") => BucketUnit::Weeks,
                    Some("M") => BucketUnit::Months,
                    Some("Y") => BucketUnit::Years,
                    _ => {
                        return Err(unit_err(format!(
                            "Unknown bucket unit {}, expected one of 's', 'm', 'h', 'D', 'W', 'M', 'Y'",
                            unit
                        )))
                    }
                };
                if ty == ColumnType::Date
                    && matches!(unit, BucketUnit::Seconds | BucketUnit::Minutes | BucketUnit::Hours)
                {
                    return Err(unit_err("Sub-day bucket units require a datetime".to_string()));
                }
                Ok((Func::Bucket(unit), Some(ty)))
            }
            ty if is_numeric(ty) => {
                let width = unit
                    .as_f64()
                    .filter(|w| *w > 0.0 && w.is_finite())
                    .ok_or_else(|| unit_err("bucket() width must be a positive number".to_string()))?;
                let out = match (ty, &unit) {
                    (Some(ColumnType::Integer), ColumnValue::Integer(_)) => ColumnType::Integer,
                    _ => ColumnType::Float,
                };
                Ok((Func::Bucket(BucketUnit::Width(width)), Some(out)))
            }
            ty => Err(EngineError::expression(
                format!("bucket() expects a date, datetime or number, got {}", type_name(ty)),
                args[0].span,
            )),
        }
    }
}

// ============================================================================
// Compiled expressions
// ============================================================================

/// A parsed and type checked expression bound to a table schema.
#[derive(Debug, Clone)]
pub struct Expression {
    name: String,
    source: String,
    root: Typed,
    output_type: ColumnType,
    columns: Vec<String>,
}

impl Expression {
    /// Compiles `source` against `schema`. A reference to a column the
    /// schema lacks is reported as `UnknownExpression` naming `name`.
    pub fn compile(name: &str, source: &str, schema: &Schema) -> Result<Expression> {
        let node = parse_source(source)?;
        let mut columns = Vec::new();
        extract_columns(&node, &mut columns);
        if let Some(missing) = columns.iter().find(|c| !schema.contains(c)) {
            return Err(EngineError::UnknownExpression(format!(
                "{} (column \"{}\" does not exist)",
                name, missing
            )));
        }

        let root = Checker { schema }.check(&node)?;
        Ok(Expression {
            name: name.to_string(),
            source: source.to_string(),
            output_type: root.ty.unwrap_or(ColumnType::Float),
            root,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn output_type(&self) -> ColumnType {
        self.output_type
    }

    /// Base columns referenced by the expression, in first-use order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluates the expression for one row of `table`, which must have the
    /// schema the expression was compiled against.
    pub fn eval(&self, table: &Table, row: usize) -> ColumnValue {
        let value = eval(&self.root, table, row);
        match (self.output_type, value) {
            (ColumnType::Float, ColumnValue::Integer(v)) => ColumnValue::Float(v as f64),
            (_, value) => value,
        }
    }
}

/// Type checks an expression without evaluating it.
///
/// ```
/// use pivotview::{validate_expression, ColumnType, Schema};
///
/// let schema = Schema::new(vec![("Sales".to_string(), ColumnType::Float)]).unwrap();
/// assert_eq!(validate_expression(&schema, r#""Sales" * 2"#).unwrap(), ColumnType::Float);
/// assert!(validate_expression(&schema, r#""Sales" +"#).is_err());
/// ```
pub fn validate_expression(schema: &Schema, source: &str) -> Result<ColumnType> {
    let node = parse_source(source)?;
    let root = Checker { schema }.check(&node)?;
    Ok(root.ty.unwrap_or(ColumnType::Float))
}

// ============================================================================
// Evaluation
// ============================================================================

fn finite(v: f64) -> ColumnValue {
    if v.is_finite() {
        ColumnValue::Float(v)
    } else {
        ColumnValue::Null
    }
}

fn truthy(value: &ColumnValue) -> bool {
    matches!(value, ColumnValue::Boolean(true))
}

fn eval(node: &Typed, table: &Table, row: usize) -> ColumnValue {
    match &node.kind {
        TypedKind::Column(index) => table
            .column_at(*index)
            .get(row)
            .cloned()
            .unwrap_or(ColumnValue::Null),
        TypedKind::Literal(value) => value.clone(),
        TypedKind::Neg(inner) => match eval(inner, table, row) {
            ColumnValue::Integer(v) => v.checked_neg().map(ColumnValue::Integer).unwrap_or(ColumnValue::Null),
            ColumnValue::Float(v) => ColumnValue::Float(-v),
            _ => ColumnValue::Null,
        },
        TypedKind::Not(inner) => match eval(inner, table, row) {
            ColumnValue::Boolean(b) => ColumnValue::Boolean(!b),
            _ => ColumnValue::Null,
        },
        TypedKind::Binary(BinaryOp::And, left, right) => {
            ColumnValue::Boolean(truthy(&eval(left, table, row)) && truthy(&eval(right, table, row)))
        }
        TypedKind::Binary(BinaryOp::Or, left, right) => {
            ColumnValue::Boolean(truthy(&eval(left, table, row)) || truthy(&eval(right, table, row)))
        }
        TypedKind::Binary(op, left, right) => {
            let a = eval(left, table, row);
            let b = eval(right, table, row);
            if op.is_comparison() {
                return ColumnValue::Boolean(compare(*op, &a, &b));
            }
            arithmetic(*op, node.ty, a, b)
        }
        TypedKind::Call(func, args) => call(*func, node.ty, args, table, row),
    }
}

/// Null compares false with every operator.
fn compare(op: BinaryOp, a: &ColumnValue, b: &ColumnValue) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    let ordering = a.total_cmp(b);
    match op {
        BinaryOp::Eq => ordering.is_eq(),
        BinaryOp::Ne => ordering.is_ne(),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => false,
    }
}

fn arithmetic(op: BinaryOp, ty: Option<ColumnType>, a: ColumnValue, b: ColumnValue) -> ColumnValue {
    if a.is_null() || b.is_null() {
        return ColumnValue::Null;
    }

    if ty == Some(ColumnType::String) {
        return match (a, b) {
            (ColumnValue::String(mut a), ColumnValue::String(b)) => {
                a.push_str(&b);
                ColumnValue::String(a)
            }
            _ => ColumnValue::Null,
        };
    }

    if ty == Some(ColumnType::Integer) {
        let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) else {
            return ColumnValue::Null;
        };
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        return result.map(ColumnValue::Integer).unwrap_or(ColumnValue::Null);
    }

    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return ColumnValue::Null;
    };
    match op {
        BinaryOp::Add => finite(x + y),
        BinaryOp::Sub => finite(x - y),
        BinaryOp::Mul => finite(x * y),
        BinaryOp::Div if y == 0.0 => ColumnValue::Null,
        BinaryOp::Div => finite(x / y),
        BinaryOp::Rem if y == 0.0 => ColumnValue::Null,
        BinaryOp::Rem => finite(x % y),
        BinaryOp::Pow => finite(x.powf(y)),
        _ => ColumnValue::Null,
    }
}

fn call(func: Func, ty: Option<ColumnType>, args: &[Typed], table: &Table, row: usize) -> ColumnValue {
    // Short-circuiting builtins evaluate their own arguments.
    match func {
        Func::If => {
            let branch = if truthy(&eval(&args[0], table, row)) { &args[1] } else { &args[2] };
            return promote(eval(branch, table, row), ty);
        }
        Func::Coalesce => {
            return args
                .iter()
                .map(|arg| eval(arg, table, row))
                .find(|v| !v.is_null())
                .map(|v| promote(v, ty))
                .unwrap_or(ColumnValue::Null);
        }
        _ => {}
    }

    let values: Vec<ColumnValue> = args.iter().map(|arg| eval(arg, table, row)).collect();
    let first = &values[0];

    match func {
        Func::IsNull => ColumnValue::Boolean(first.is_null()),
        Func::Concat => {
            if values.iter().any(ColumnValue::is_null) {
                return ColumnValue::Null;
            }
            ColumnValue::String(values.iter().map(|v| v.to_string()).collect())
        }
        Func::ToString if first.is_null() => ColumnValue::Null,
        Func::ToString => ColumnValue::String(first.to_string()),
        _ if first.is_null() => ColumnValue::Null,
        Func::Abs => match first {
            ColumnValue::Integer(v) => v.checked_abs().map(ColumnValue::Integer).unwrap_or(ColumnValue::Null),
            v => v.as_f64().map(|x| ColumnValue::Float(x.abs())).unwrap_or(ColumnValue::Null),
        },
        Func::Sqrt => match first.as_f64() {
            Some(x) if x >= 0.0 => ColumnValue::Float(x.sqrt()),
            _ => ColumnValue::Null,
        },
        Func::Floor | Func::Ceil | Func::Round => match first {
            ColumnValue::Integer(v) => ColumnValue::Integer(*v),
            v => match v.as_f64() {
                Some(x) => ColumnValue::Float(match func {
                    Func::Floor => x.floor(),
                    Func::Ceil => x.ceil(),
                    _ => x.round(),
                }),
                None => ColumnValue::Null,
            },
        },
        Func::Pow => match (first.as_f64(), values[1].as_f64()) {
            (Some(x), Some(y)) => finite(x.powf(y)),
            _ => ColumnValue::Null,
        },
        Func::Min | Func::Max => {
            let want = if func == Func::Min {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
            values
                .iter()
                .filter(|v| !v.is_null())
                .fold(None::<&ColumnValue>, |best, v| match best {
                    Some(b) if v.total_cmp(b) != want => Some(b),
                    _ => Some(v),
                })
                .map(|v| promote(v.clone(), ty))
                .unwrap_or(ColumnValue::Null)
        }
        Func::Length => first
            .as_str()
            .map(|s| ColumnValue::Integer(s.chars().count() as i64))
            .unwrap_or(ColumnValue::Null),
        Func::Upper => first
            .as_str()
            .map(|s| ColumnValue::String(s.to_uppercase()))
            .unwrap_or(ColumnValue::Null),
        Func::Lower => first
            .as_str()
            .map(|s| ColumnValue::String(s.to_lowercase()))
            .unwrap_or(ColumnValue::Null),
        Func::Contains => match (first.as_str(), values[1].as_str()) {
            (Some(s), Some(needle)) => ColumnValue::Boolean(s.contains(needle)),
            _ => ColumnValue::Null,
        },
        Func::ToInteger => match first {
            ColumnValue::Integer(v) => ColumnValue::Integer(*v),
            ColumnValue::Float(v) if v.is_finite() && v.abs() < i64::MAX as f64 => {
                ColumnValue::Integer(v.trunc() as i64)
            }
            ColumnValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ColumnValue::Integer)
                .unwrap_or(ColumnValue::Null),
            ColumnValue::Boolean(b) => ColumnValue::Integer(*b as i64),
            ColumnValue::Date(d) => ColumnValue::Integer(*d as i64),
            ColumnValue::Datetime(ms) => ColumnValue::Integer(*ms),
            _ => ColumnValue::Null,
        },
        Func::ToFloat => match first {
            ColumnValue::String(s) => s.trim().parse::<f64>().map(finite).unwrap_or(ColumnValue::Null),
            ColumnValue::Boolean(b) => ColumnValue::Float(if *b { 1.0 } else { 0.0 }),
            ColumnValue::Date(d) => ColumnValue::Float(*d as f64),
            v => v
                .as_f64()
                .or_else(|| v.as_epoch_ms().map(|ms| ms as f64))
                .map(finite)
                .unwrap_or(ColumnValue::Null),
        },
        Func::Year | Func::Month | Func::Day => {
            let days = match first {
                ColumnValue::Date(d) => *d,
                ColumnValue::Datetime(ms) => days_from_ms(*ms),
                _ => return ColumnValue::Null,
            };
            let (y, m, d) = ymd_from_days(days);
            ColumnValue::Integer(match func {
                Func::Year => y as i64,
                Func::Month => m as i64,
                _ => d as i64,
            })
        }
        Func::Hour | Func::Minute => match first {
            ColumnValue::Datetime(ms) => {
                let in_day = ms.rem_euclid(MS_PER_DAY);
                ColumnValue::Integer(if func == Func::Hour {
                    in_day / 3_600_000
                } else {
                    in_day / 60_000 % 60
                })
            }
            _ => ColumnValue::Null,
        },
        Func::Bucket(unit) => promote(bucket(first, unit), ty),
        Func::If | Func::Coalesce => ColumnValue::Null,
    }
}

fn promote(value: ColumnValue, ty: Option<ColumnType>) -> ColumnValue {
    match (value, ty) {
        (ColumnValue::Integer(v), Some(ColumnType::Float)) => ColumnValue::Float(v as f64),
        (value, _) => value,
    }
}

/// Truncates a day number to the start of its bucket.
fn bucket_days(days: i32, unit: BucketUnit) -> i32 {
    match unit {
        BucketUnit::Weeks => days - weekday_from_days(days),
        BucketUnit::Months => {
            let (y, m, _) = ymd_from_days(days);
            days_from_ymd(y, m, 1)
        }
        BucketUnit::Years => {
            let (y, _, _) = ymd_from_days(days);
            days_from_ymd(y, 1, 1)
        }
        _ => days,
    }
}

fn bucket(value: &ColumnValue, unit: BucketUnit) -> ColumnValue {
    match (value, unit) {
        (ColumnValue::Integer(v), BucketUnit::Width(w)) if w.fract() == 0.0 && w >= 1.0 => {
            let w = w as i64;
            v.div_euclid(w)
                .checked_mul(w)
                .map(ColumnValue::Integer)
                .unwrap_or(ColumnValue::Null)
        }
        (ColumnValue::Integer(v), BucketUnit::Width(w)) => finite((*v as f64 / w).floor() * w),
        (ColumnValue::Float(v), BucketUnit::Width(w)) => finite((v / w).floor() * w),
        (ColumnValue::Date(d), unit) => ColumnValue::Date(bucket_days(*d, unit)),
        (ColumnValue::Datetime(ms), unit) => {
            let step = match unit {
                BucketUnit::Seconds => 1_000,
                BucketUnit::Minutes => 60_000,
                BucketUnit::Hours => 3_600_000,
                _ => {
                    let days = bucket_days(days_from_ms(*ms), unit);
                    return ColumnValue::Datetime(days as i64 * MS_PER_DAY);
                }
            };
            ColumnValue::Datetime(ms.div_euclid(step) * step)
        }
        _ => ColumnValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Row, TableOptions};

    fn make_table() -> Table {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::Integer),
            ("name".to_string(), ColumnType::String),
            ("score".to_string(), ColumnType::Float),
            ("active".to_string(), ColumnType::Boolean),
            ("joined".to_string(), ColumnType::Date),
            ("seen".to_string(), ColumnType::Datetime),
            ("nullable".to_string(), ColumnType::Float),
        ])
        .unwrap();
        let mut table = Table::new("t".to_string(), schema, TableOptions::default()).unwrap();
        let mut row = Row::new();
        row.insert("id".to_string(), ColumnValue::Integer(7));
        row.insert("name".to_string(), ColumnValue::String("Alice".to_string()));
        row.insert("score".to_string(), ColumnValue::Float(95.5));
        row.insert("active".to_string(), ColumnValue::Boolean(true));
        row.insert("joined".to_string(), ColumnValue::Date(days_from_ymd(2024, 3, 14)));
        row.insert(
            "seen".to_string(),
            ColumnValue::Datetime(days_from_ymd(2024, 3, 14) as i64 * MS_PER_DAY + 13 * 3_600_000 + 45 * 60_000),
        );
        table.update(vec![row]).unwrap();
        table
    }

    fn eval_str(source: &str) -> ColumnValue {
        let table = make_table();
        let expr = Expression::compile("e", source, table.schema()).unwrap();
        expr.eval(&table, 0)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval_str(r#""id" + 2 * 3"#), ColumnValue::Integer(13));
        assert_eq!(eval_str(r#"("id" + 2) * 3"#), ColumnValue::Integer(27));
        assert_eq!(eval_str(r#""id" / 2"#), ColumnValue::Float(3.5));
        assert_eq!(eval_str("-2 ^ 2"), ColumnValue::Float(-4.0));
        assert_eq!(eval_str(r#""id" % 4"#), ColumnValue::Integer(3));
    }

    #[test]
    fn test_runtime_faults_are_null() {
        assert_eq!(eval_str(r#""id" / 0"#), ColumnValue::Null);
        assert_eq!(eval_str(r#""id" % 0"#), ColumnValue::Null);
        assert_eq!(eval_str("sqrt(-1)"), ColumnValue::Null);
        assert_eq!(eval_str("9223372036854775807 + 1"), ColumnValue::Null);
        assert_eq!(eval_str(r#""nullable" * 2"#), ColumnValue::Null);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str(r#""score" > 90 and "name" == 'Alice'"#), ColumnValue::Boolean(true));
        assert_eq!(eval_str(r#"not "active" or "id" < 5"#), ColumnValue::Boolean(false));
        assert_eq!(eval_str(r#""nullable" == null"#), ColumnValue::Boolean(false));
        assert_eq!(eval_str(r#""id" == 7.0"#), ColumnValue::Boolean(true));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_str(r#"if("score" > 90, 'A', 'B')"#), ColumnValue::String("A".to_string()));
        assert_eq!(eval_str(r#"if("active", 1, 2.5)"#), ColumnValue::Float(1.0));
        assert_eq!(eval_str(r#"upper("name")"#), ColumnValue::String("ALICE".to_string()));
        assert_eq!(eval_str(r#"length("name")"#), ColumnValue::Integer(5));
        assert_eq!(eval_str(r#"concat("name", '-', "id")"#), ColumnValue::String("Alice-7".to_string()));
        assert_eq!(eval_str(r#"coalesce("nullable", "score")"#), ColumnValue::Float(95.5));
        assert_eq!(eval_str(r#"max("id", 3, 12)"#), ColumnValue::Integer(12));
        assert_eq!(eval_str(r#"floor("score")"#), ColumnValue::Float(95.0));
        assert_eq!(eval_str(r#"integer('42')"#), ColumnValue::Integer(42));
        assert_eq!(eval_str(r#"contains("name", 'lic')"#), ColumnValue::Boolean(true));
    }

    #[test]
    fn test_date_functions() {
        assert_eq!(eval_str(r#"year("joined")"#), ColumnValue::Integer(2024));
        assert_eq!(eval_str(r#"month("seen")"#), ColumnValue::Integer(3));
        assert_eq!(eval_str(r#"hour("seen")"#), ColumnValue::Integer(13));
        assert_eq!(eval_str(r#"minute("seen")"#), ColumnValue::Integer(45));
        assert_eq!(
            eval_str(r#"string("joined")"#),
            ColumnValue::String("2024-03-14".to_string())
        );
    }

    #[test]
    fn test_bucket() {
        // 2024-03-14 is a Thursday.
        assert_eq!(eval_str(r#"bucket("joined", 'M')"#), ColumnValue::Date(days_from_ymd(2024, 3, 1)));
        assert_eq!(eval_str(r#"bucket("joined", 'W')"#), ColumnValue::Date(days_from_ymd(2024, 3, 11)));
        assert_eq!(eval_str(r#"bucket("joined", 'Y')"#), ColumnValue::Date(days_from_ymd(2024, 1, 1)));
        assert_eq!(
            eval_str(r#"bucket("seen", 'h')"#),
            ColumnValue::Datetime(days_from_ymd(2024, 3, 14) as i64 * MS_PER_DAY + 13 * 3_600_000)
        );
        assert_eq!(eval_str(r#"bucket("id", 5)"#), ColumnValue::Integer(5));
        assert_eq!(eval_str(r#"bucket("score", 10)"#), ColumnValue::Float(90.0));
    }

    #[test]
    fn test_bucket_integer_by_fractional_width() {
        let table = make_table();
        assert_eq!(validate_expression(table.schema(), r#"bucket("id", 2.5)"#).unwrap(), ColumnType::Float);
        assert_eq!(eval_str(r#"bucket("id", 2.5)"#), ColumnValue::Float(5.0));
        assert_eq!(eval_str(r#"bucket("id", 0.5)"#), ColumnValue::Float(7.0));
        assert_eq!(eval_str(r#"bucket("id", 5.0)"#), ColumnValue::Float(5.0));
    }

    #[test]
    fn test_output_types() {
        let table = make_table();
        let schema = table.schema();
        assert_eq!(validate_expression(schema, r#""id" + 1"#).unwrap(), ColumnType::Integer);
        assert_eq!(validate_expression(schema, r#""id" + 1.5"#).unwrap(), ColumnType::Float);
        assert_eq!(validate_expression(schema, r#""name" + '!'"#).unwrap(), ColumnType::String);
        assert_eq!(validate_expression(schema, r#""score" > 1"#).unwrap(), ColumnType::Boolean);
        assert_eq!(validate_expression(schema, r#"bucket("seen", 'D')"#).unwrap(), ColumnType::Datetime);
        assert_eq!(validate_expression(schema, "null").unwrap(), ColumnType::Float);
    }

    #[test]
    fn test_error_spans() {
        let table = make_table();
        let schema = table.schema();

        let err = validate_expression(schema, r#""score" + 'x'"#).unwrap_err();
        assert_eq!(err.span(), Some(SourceSpan::new(0, 13)));

        let err = validate_expression(schema, r#"1 + "missing""#).unwrap_err();
        assert_eq!(err.span(), Some(SourceSpan::new(4, 13)));

        let err = validate_expression(schema, "1 +").unwrap_err();
        assert_eq!(err.kind(), "ExpressionError");
        assert_eq!(err.span(), Some(SourceSpan::new(3, 3)));

        let err = validate_expression(schema, "nope(1)").unwrap_err();
        assert_eq!(err.span(), Some(SourceSpan::new(0, 7)));

        let err = validate_expression(schema, r#"bucket("joined", 'h')"#).unwrap_err();
        assert_eq!(err.span(), Some(SourceSpan::new(17, 20)));

        assert!(validate_expression(schema, "'open").is_err());
    }

    #[test]
    fn test_compile_reports_unknown_columns_by_expression_name() {
        let table = make_table();
        let err = Expression::compile("ratio", r#""missing" / 2"#, table.schema()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownExpression(ref m) if m.starts_with("ratio")));
    }

    #[test]
    fn test_extract_columns() {
        let table = make_table();
        let expr = Expression::compile("e", r#"if("active", "score", "score" + "id")"#, table.schema()).unwrap();
        assert_eq!(expr.columns(), &["active".to_string(), "score".to_string(), "id".to_string()]);
    }
}
