//! Formula expressions of calculated measures.
//!
//! A formula is kept as a [`Formula`] tree. Schema files carry the formula as
//! text, which [`Formula::parse`] turns into the tree:
//!
//! ```text
//! [Sales] / [Units] * 100
//! CASE WHEN Quantity > 0 THEN Revenue / Quantity ELSE NULL END
//! POW(SQRT(Moe), 2) + TOTAL(Population)
//! ```
//!
//! References are bare identifiers (`Revenue`, `lv.year`) or bracketed names
//! when they contain spaces (`[Trade Value]`).

use crate::sql_builder::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Formula {
    Literal(FormulaLiteral),
    Reference(String),
    Unary {
        func: UnaryFn,
        arg: Box<Formula>,
    },
    Binary {
        op: FormulaOp,
        left: Box<Formula>,
        right: Box<Formula>,
    },
    Case {
        branches: Vec<(Formula, Formula)>,
        otherwise: Option<Box<Formula>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaLiteral {
    Number(f64),
    Text(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Negate,
    Sqrt,
    IsNull,
    IsNotNull,
    /// Sum of the argument over the whole result
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
}

impl FormulaOp {
    fn symbol(&self) -> &'static str {
        match self {
            FormulaOp::Add => "+",
            FormulaOp::Sub => "-",
            FormulaOp::Mul => "*",
            FormulaOp::Div => "/",
            FormulaOp::Mod => "%",
            FormulaOp::Pow => "POW",
            FormulaOp::Gt => ">",
            FormulaOp::Lt => "<",
            FormulaOp::Gte => ">=",
            FormulaOp::Lte => "<=",
            FormulaOp::Eq => "==",
            FormulaOp::Neq => "!=",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => FormulaOp::Add,
            "-" => FormulaOp::Sub,
            "*" => FormulaOp::Mul,
            "/" => FormulaOp::Div,
            "%" => FormulaOp::Mod,
            ">" => FormulaOp::Gt,
            "<" => FormulaOp::Lt,
            ">=" => FormulaOp::Gte,
            "<=" => FormulaOp::Lte,
            "==" | "=" => FormulaOp::Eq,
            "!=" | "<>" => FormulaOp::Neq,
            _ => return None,
        };
        Some(op)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            FormulaOp::Gt
                | FormulaOp::Lt
                | FormulaOp::Gte
                | FormulaOp::Lte
                | FormulaOp::Eq
                | FormulaOp::Neq
        )
    }
}

impl Formula {
    pub fn parse(text: &str) -> Result<Formula, CompileError> {
        let tokens = tokenize(text)?;
        let mut parser = FormulaParser {
            source: text,
            tokens,
            pos: 0,
        };
        let formula = parser.comparison()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error_here());
        }
        Ok(formula)
    }

    /// Names referenced anywhere in the formula, in order of appearance
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Formula::Literal(_) => {}
            Formula::Reference(name) => names.push(name),
            Formula::Unary { arg, .. } => arg.collect_references(names),
            Formula::Binary { left, right, .. } => {
                left.collect_references(names);
                right.collect_references(names);
            }
            Formula::Case {
                branches,
                otherwise,
            } => {
                for (condition, result) in branches {
                    condition.collect_references(names);
                    result.collect_references(names);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.collect_references(names);
                }
            }
        }
    }
}

impl TryFrom<String> for Formula {
    type Error = CompileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Formula::parse(&value)
    }
}

impl From<Formula> for String {
    fn from(value: Formula) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Literal(FormulaLiteral::Number(value)) => write!(f, "{}", value),
            Formula::Literal(FormulaLiteral::Text(value)) => {
                write!(f, "'{}'", value.replace('\'', "''"))
            }
            Formula::Literal(FormulaLiteral::Null) => write!(f, "NULL"),
            Formula::Reference(name) => write!(f, "[{}]", name),
            Formula::Unary { func, arg } => match func {
                UnaryFn::Negate => write!(f, "-({})", arg),
                UnaryFn::Sqrt => write!(f, "SQRT({})", arg),
                UnaryFn::IsNull => write!(f, "ISNULL({})", arg),
                UnaryFn::IsNotNull => write!(f, "ISNOTNULL({})", arg),
                UnaryFn::Total => write!(f, "TOTAL({})", arg),
            },
            Formula::Binary {
                op: FormulaOp::Pow,
                left,
                right,
            } => write!(f, "POW({}, {})", left, right),
            Formula::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Formula::Case {
                branches,
                otherwise,
            } => {
                write!(f, "CASE")?;
                for (condition, result) in branches {
                    write!(f, " WHEN {} THEN {}", condition, result)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                write!(f, " END")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Word(String),
    Bracketed(String),
    Symbol(&'static str),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{}", value),
            Token::Text(value) => write!(f, "'{}'", value),
            Token::Word(value) => write!(f, "{}", value),
            Token::Bracketed(value) => write!(f, "[{}]", value),
            Token::Symbol(value) => write!(f, "{}", value),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

const SYMBOLS: [&str; 13] = [
    ">=", "<=", "==", "!=", "<>", ">", "<", "=", "+", "-", "*", "/", "%",
];

fn tokenize(text: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            pos += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            pos += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            pos += 1;
        } else if c == '\'' || c == '"' {
            // a doubled quote stands for one quote character
            let mut value = String::new();
            let mut end = pos + 1;
            loop {
                match chars.get(end) {
                    None => {
                        return Err(formula_error(text, &chars[pos..].iter().collect::<String>()));
                    }
                    Some(&ch) if ch == c && chars.get(end + 1) == Some(&c) => {
                        value.push(c);
                        end += 2;
                    }
                    Some(&ch) if ch == c => break,
                    Some(&ch) => {
                        value.push(ch);
                        end += 1;
                    }
                }
            }
            tokens.push(Token::Text(value));
            pos = end + 1;
        } else if c == '[' {
            let start = pos + 1;
            let mut end = start;
            while end < chars.len() && chars[end] != ']' {
                end += 1;
            }
            if end >= chars.len() || end == start {
                return Err(formula_error(text, &chars[pos..].iter().collect::<String>()));
            }
            tokens.push(Token::Bracketed(chars[start..end].iter().collect()));
            pos = end + 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let literal: String = chars[start..pos].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| formula_error(text, &literal))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len()
                && (chars[pos].is_alphanumeric() || chars[pos] == '_' || chars[pos] == '.')
            {
                pos += 1;
            }
            tokens.push(Token::Word(chars[start..pos].iter().collect()));
        } else {
            let rest: String = chars[pos..].iter().collect();
            let symbol = SYMBOLS
                .iter()
                .find(|symbol| rest.starts_with(**symbol))
                .ok_or_else(|| formula_error(text, &rest))?;
            tokens.push(Token::Symbol(symbol));
            pos += symbol.len();
        }
    }

    Ok(tokens)
}

fn formula_error(formula: &str, near: &str) -> CompileError {
    CompileError::FormulaParse {
        formula: formula.to_string(),
        near: near.to_string(),
    }
}

struct FormulaParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> FormulaParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error_here(&self) -> CompileError {
        let start = self.pos.min(self.tokens.len());
        let near = if start == self.tokens.len() {
            "<end of formula>".to_string()
        } else {
            self.tokens[start..]
                .iter()
                .map(Token::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        formula_error(self.source, &near)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), CompileError> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn comparison(&mut self) -> Result<Formula, CompileError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Symbol(symbol)) => FormulaOp::from_symbol(symbol),
            _ => None,
        };
        match op {
            Some(op) if op.is_comparison() => {
                self.pos += 1;
                let right = self.additive()?;
                Ok(binary(op, left, right))
            }
            _ => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Formula, CompileError> {
        let mut left = self.term()?;
        while let Some(Token::Symbol(symbol @ ("+" | "-"))) = self.peek() {
            let op = if *symbol == "+" {
                FormulaOp::Add
            } else {
                FormulaOp::Sub
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Formula, CompileError> {
        let mut left = self.unary()?;
        while let Some(Token::Symbol(symbol @ ("*" | "/" | "%"))) = self.peek() {
            let op = match *symbol {
                "*" => FormulaOp::Mul,
                "/" => FormulaOp::Div,
                _ => FormulaOp::Mod,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Formula, CompileError> {
        if self.peek() == Some(&Token::Symbol("-")) {
            self.pos += 1;
            return match self.unary()? {
                Formula::Literal(FormulaLiteral::Number(value)) => {
                    Ok(Formula::Literal(FormulaLiteral::Number(-value)))
                }
                other => Ok(Formula::Unary {
                    func: UnaryFn::Negate,
                    arg: Box::new(other),
                }),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Formula, CompileError> {
        let start = self.pos;
        match self.next() {
            Some(Token::Number(value)) => Ok(Formula::Literal(FormulaLiteral::Number(value))),
            Some(Token::Text(value)) => Ok(Formula::Literal(FormulaLiteral::Text(value))),
            Some(Token::Bracketed(name)) => Ok(Formula::Reference(name)),
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(word)) => {
                let upper = word.to_ascii_uppercase();
                let is_call = self.peek() == Some(&Token::LParen);
                match upper.as_str() {
                    "NULL" => Ok(Formula::Literal(FormulaLiteral::Null)),
                    "CASE" => self.case(),
                    "SQRT" | "ISNULL" | "ISNOTNULL" | "TOTAL" if is_call => {
                        let func = match upper.as_str() {
                            "SQRT" => UnaryFn::Sqrt,
                            "ISNULL" => UnaryFn::IsNull,
                            "ISNOTNULL" => UnaryFn::IsNotNull,
                            _ => UnaryFn::Total,
                        };
                        self.expect(Token::LParen)?;
                        let arg = self.comparison()?;
                        self.expect(Token::RParen)?;
                        Ok(Formula::Unary {
                            func,
                            arg: Box::new(arg),
                        })
                    }
                    "POW" if is_call => {
                        self.expect(Token::LParen)?;
                        let base = self.comparison()?;
                        self.expect(Token::Comma)?;
                        let exponent = self.comparison()?;
                        self.expect(Token::RParen)?;
                        Ok(binary(FormulaOp::Pow, base, exponent))
                    }
                    "WHEN" | "THEN" | "ELSE" | "END" => {
                        self.pos = start;
                        Err(self.error_here())
                    }
                    _ if is_call => {
                        self.pos = start;
                        Err(self.error_here())
                    }
                    _ => Ok(Formula::Reference(word)),
                }
            }
            _ => {
                self.pos = start;
                Err(self.error_here())
            }
        }
    }

    fn case(&mut self) -> Result<Formula, CompileError> {
        let mut branches = Vec::new();
        while self.peek_keyword("WHEN") {
            self.pos += 1;
            let condition = self.comparison()?;
            self.expect_keyword("THEN")?;
            let result = self.comparison()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.error_here());
        }
        let otherwise = if self.peek_keyword("ELSE") {
            self.pos += 1;
            Some(Box::new(self.comparison()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Formula::Case {
            branches,
            otherwise,
        })
    }
}

fn binary(op: FormulaOp, left: Formula, right: Formula) -> Formula {
    Formula::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
