//! Mount rules: conditions over a device that select extra mount arguments.
//!
//! A rule is written as `<condition>::<args>`, for example:
//!
//! ```text
//! label == "BACKUP" and fstype in ["ext4", "btrfs"]::{"args": ["-o", "ro"]}
//! ```
//!
//! The condition language is deliberately small. It knows four fields
//! (`path`, `fstype`, `label`, `uuid`), string literals, `None`, `True`,
//! `False`, list literals, the comparisons `==`, `!=`, `<`, `<=`, `>`, `>=`,
//! `in`, `not in`, and the boolean operators `and`, `or`, `not`.
//!
//! Rules are parsed once when the program starts, so a malformed rule is
//! reported before any device is touched. Evaluation errors (for example
//! `"x" in label` on a device without a label) are errors too: a rule is
//! never silently skipped.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::Deserialize;

use crate::disk::BlockDevice;
use crate::error::{Error, Result};

/// Separator between the condition and the argument mapping.
pub const RULE_SEPARATOR: &str = "::";

/// One condition/arguments pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MountRule {
    pub condition: Condition,
    pub args: Vec<String>,
}

/// Argument mapping of a rule. `args` is the only recognized key.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleArgs {
    args: Vec<String>,
}

impl FromStr for MountRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (condition, args) = split_rule(s).ok_or_else(|| Error::RuleSyntax {
            rule: s.to_string(),
            message: format!("expected '<condition>{RULE_SEPARATOR}<args>'"),
        })?;

        let condition = condition.parse::<Condition>().map_err(|e| match e {
            Error::RuleSyntax { message, .. } => Error::RuleSyntax {
                rule: s.to_string(),
                message,
            },
            other => other,
        })?;

        let args: RuleArgs = serde_json::from_str(args.trim()).map_err(|e| Error::RuleSyntax {
            rule: s.to_string(),
            message: format!("invalid args mapping: {e}"),
        })?;

        Ok(Self {
            condition,
            args: args.args,
        })
    }
}

impl fmt::Display for MountRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{RULE_SEPARATOR}{:?}", self.condition, self.args)
    }
}

/// Splits a rule at the first separator that is not inside a string literal.
fn split_rule(s: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            ':' if s[i..].starts_with(RULE_SEPARATOR) => {
                return Some((&s[..i], &s[i + RULE_SEPARATOR.len()..]));
            }
            _ => {}
        }
    }

    None
}

/// Ordered list of rules. The first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<MountRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<MountRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[MountRule] {
        &self.rules
    }

    /// Appends rules after the existing ones.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = MountRule>) {
        self.rules.extend(rules);
    }

    /// Returns the first rule whose condition holds for `device`.
    pub fn find_match(&self, device: &BlockDevice) -> Result<Option<&MountRule>> {
        for rule in &self.rules {
            if rule.condition.evaluate(device)? {
                debug!("Rule '{}' matches {}", rule, device.path);
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    /// Returns the extra mount arguments for `device`.
    ///
    /// Empty if no rule matches or no rules are configured.
    pub fn match_args(&self, device: &BlockDevice) -> Result<Vec<String>> {
        Ok(self
            .find_match(device)?
            .map(|rule| rule.args.clone())
            .unwrap_or_default())
    }
}

/// A parsed boolean expression over a device's attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// The condition as it was written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the condition against a device.
    pub fn evaluate(&self, device: &BlockDevice) -> Result<bool> {
        self.expr
            .eval(device)
            .map(|value| value.truthy())
            .map_err(|message| Error::RuleEvaluation {
                rule: self.source.clone(),
                message,
            })
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let source = s.trim().to_string();
        let syntax = |message: String| Error::RuleSyntax {
            rule: source.clone(),
            message,
        };

        let tokens = tokenize(&source).map_err(syntax)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_condition().map_err(syntax)?;

        Ok(Self { source, expr })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Device attribute a condition can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Path,
    Fstype,
    Label,
    Uuid,
}

impl Field {
    fn from_ident(name: &str) -> Option<Self> {
        match name {
            "path" => Some(Self::Path),
            "fstype" => Some(Self::Fstype),
            "label" => Some(Self::Label),
            "uuid" => Some(Self::Uuid),
            _ => None,
        }
    }

    fn value(self, device: &BlockDevice) -> Value {
        let field = match self {
            Self::Path => return Value::Str(device.path.clone()),
            Self::Fstype => &device.fstype,
            Self::Label => &device.label,
            Self::Uuid => &device.uuid,
        };
        field.clone().map(Value::Str).unwrap_or(Value::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    None,
    Bool(bool),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Field(Field),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

type EvalResult<T> = std::result::Result<T, String>;

impl Expr {
    fn eval(&self, device: &BlockDevice) -> EvalResult<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Field(field) => Ok(field.value(device)),
            Self::List(items) => items
                .iter()
                .map(|item| item.eval(device))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::List),
            Self::Not(inner) => Ok(Value::Bool(!inner.eval(device)?.truthy())),
            Self::And(lhs, rhs) => {
                let result = lhs.eval(device)?.truthy() && rhs.eval(device)?.truthy();
                Ok(Value::Bool(result))
            }
            Self::Or(lhs, rhs) => {
                let result = lhs.eval(device)?.truthy() || rhs.eval(device)?.truthy();
                Ok(Value::Bool(result))
            }
            Self::Compare(op, lhs, rhs) => {
                let lhs = lhs.eval(device)?;
                let rhs = rhs.eval(device)?;
                compare(*op, &lhs, &rhs).map(Value::Bool)
            }
        }
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    match op {
        CmpOp::Eq => Ok(lhs == rhs),
        CmpOp::Ne => Ok(lhs != rhs),
        CmpOp::In => contains(rhs, lhs),
        CmpOp::NotIn => contains(rhs, lhs).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (Value::Str(a), Value::Str(b)) = (lhs, rhs) else {
                return Err(format!(
                    "cannot order {} and {}",
                    lhs.type_name(),
                    rhs.type_name()
                ));
            };
            Ok(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                _ => a >= b,
            })
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> EvalResult<bool> {
    match (haystack, needle) {
        (Value::List(items), _) => Ok(items.contains(needle)),
        (Value::Str(s), Value::Str(sub)) => Ok(s.contains(sub.as_str())),
        (Value::Str(_), other) => Err(format!(
            "'in <string>' requires a string on the left, not {}",
            other.type_name()
        )),
        (other, _) => Err(format!("'in' is not supported on {}", other.type_name())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(CmpOp),
}

fn tokenize(input: &str) -> EvalResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Comma,
                });
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if_eq(&'=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    ('>', true) => CmpOp::Ge,
                    ('=', false) => return Err("use '==' for comparison".to_string()),
                    _ => return Err("use 'not' for negation".to_string()),
                };
                tokens.push(Token::Op(op));
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(read_string(&mut chars, c)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    ident.push(c);
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> EvalResult<String> {
    let mut value = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string literal".to_string()),
            Some(c) if c == quote => return Ok(value),
            Some('\\') => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some(c @ ('\\' | '"' | '\'')) => value.push(c),
                Some(c) => return Err(format!("unknown escape '\\{c}'")),
                None => return Err("unterminated string literal".to_string()),
            },
            Some(c) => value.push(c),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_condition(&mut self) -> EvalResult<Expr> {
        if self.tokens.is_empty() {
            return Err("empty condition".to_string());
        }
        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected {}", describe(token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos + offset), Some(Token::Ident(name)) if name == keyword)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> EvalResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!(
                "expected {}, found {}",
                describe(&expected),
                describe(&token)
            )),
            None => Err(format!("expected {}, found end of condition", describe(&expected))),
        }
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek_keyword(0, "or") {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.peek_keyword(0, "and") {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> EvalResult<Expr> {
        if self.peek_keyword(0, "not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> EvalResult<Expr> {
        let lhs = self.parse_operand()?;

        let (op, width) = match self.peek() {
            Some(Token::Op(op)) => (*op, 1),
            Some(Token::Ident(name)) if name == "in" => (CmpOp::In, 1),
            Some(Token::Ident(name)) if name == "not" && self.peek_keyword(1, "in") => {
                (CmpOp::NotIn, 2)
            }
            _ => return Ok(lhs),
        };
        self.pos += width;
        let rhs = self.parse_operand()?;

        if matches!(self.peek(), Some(Token::Op(_))) || self.peek_keyword(0, "in") {
            return Err("chained comparisons are not supported".to_string());
        }

        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_operand(&mut self) -> EvalResult<Expr> {
        match self.next() {
            None => Err("unexpected end of condition".to_string()),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LBracket) => self.parse_list(),
            Some(Token::Ident(name)) => match name.as_str() {
                "None" => Ok(Expr::Literal(Value::None)),
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                _ => Field::from_ident(&name)
                    .map(Expr::Field)
                    .ok_or_else(|| format!("unknown name '{name}'")),
            },
            Some(token) => Err(format!("unexpected {}", describe(&token))),
        }
    }

    fn parse_list(&mut self) -> EvalResult<Expr> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&Token::RBracket) {
                self.pos += 1;
                return Ok(Expr::List(items));
            }
            items.push(self.parse_operand()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => return Ok(Expr::List(items)),
                Some(token) => return Err(format!("expected ',' or ']', found {}", describe(&token))),
                None => return Err("unterminated list".to_string()),
            }
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{name}'"),
        Token::Str(s) => format!("string {s:?}"),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Op(op) => format!("'{}'", op_symbol(*op)),
    }
}

fn op_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "==",
        CmpOp::Ne => "!=",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}
