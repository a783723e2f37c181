//! Row filter expressions for sum checks.
//!
//! Supports a small boolean language over column names:
//! `employed == 1 and (age >= 18 | region != "north")`. Operators are
//! `==`, `!=`, `<`, `<=`, `>`, `>=`, `and`/`&`, `or`/`|` and `not`/`~`.
//! Literals are numbers, quoted strings and `True`/`False`. A missing cell
//! compares unequal to everything, as in pandas `query`.

use crate::error::{PanelError, Result};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(?:(?P<num>-?\d+(?:\.\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<op>==|!=|<=|>=|<|>|&|\||~|\(|\)))"#,
    )
    .expect("Invalid regex: query token")
});

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Text(String),
    Op(&'static str),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.trim().is_empty() {
        let Some(caps) = TOKEN.captures(rest) else {
            return Err(PanelError::Config(format!(
                "query '{input}': unexpected input at '{}'",
                rest.trim()
            )));
        };

        let token = if let Some(m) = caps.name("num") {
            Token::Number(m.as_str().parse().map_err(|_| {
                PanelError::Config(format!("query '{input}': bad number {}", m.as_str()))
            })?)
        } else if let Some(m) = caps.name("ident") {
            match m.as_str() {
                "and" => Token::Op("&"),
                "or" => Token::Op("|"),
                "not" => Token::Op("~"),
                other => Token::Ident(other.to_string()),
            }
        } else if let Some(m) = caps.name("dq").or_else(|| caps.name("sq")) {
            Token::Text(m.as_str().to_string())
        } else {
            let op = match caps.name("op").map(|m| m.as_str()) {
                Some("==") => "==",
                Some("!=") => "!=",
                Some("<=") => "<=",
                Some(">=") => ">=",
                Some("<") => "<",
                Some(">") => ">",
                Some("&") => "&",
                Some("|") => "|",
                Some("~") => "~",
                Some("(") => "(",
                Some(")") => ")",
                _ => {
                    return Err(PanelError::Config(format!(
                        "query '{input}': unexpected input at '{}'",
                        rest.trim()
                    )));
                }
            };
            Token::Op(op)
        };

        tokens.push(token);
        rest = &rest[caps[0].len()..];
    }

    Ok(tokens)
}

/// A parsed row filter.
#[derive(Debug, Clone)]
pub struct RowQuery {
    source: String,
    expr: Expr,
    columns: Vec<String>,
}

impl RowQuery {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            source: input,
            tokens,
            pos: 0,
            columns: Vec::new(),
        };
        let expr = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(Self {
            source: input.to_string(),
            expr,
            columns: parser.columns,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Columns referenced by the query.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluate the filter. A bare condition column that is missing does not
    /// match.
    pub fn mask(&self, df: &DataFrame) -> Result<Vec<bool>> {
        for column in &self.columns {
            if df.column(column).is_err() {
                return Err(PanelError::ColumnNotFound(column.clone()));
            }
        }

        let evaluated = df
            .clone()
            .lazy()
            .select([self.expr.clone().alias("__query_mask")])
            .collect()?;
        let mask = evaluated.column("__query_mask")?;
        let mask = mask.as_materialized_series().bool().map_err(|_| {
            PanelError::Config(format!("query '{}' is not a condition", self.source))
        })?;
        Ok(mask.into_iter().map(|v| v.unwrap_or(false)).collect())
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    columns: Vec<String>,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> PanelError {
        PanelError::Config(format!("query '{}': {what}", self.source))
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut expr = self.and_expr()?;
        while self.peek_op() == Some("|") {
            self.pos += 1;
            expr = expr.or(self.and_expr()?);
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut expr = self.not_expr()?;
        while self.peek_op() == Some("&") {
            self.pos += 1;
            expr = expr.and(self.not_expr()?);
        }
        Ok(expr)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.peek_op() == Some("~") {
            self.pos += 1;
            return Ok(self.not_expr()?.not());
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.operand()?;
        let Some(op) = self.peek_op() else {
            return Ok(left);
        };
        let combine: fn(Expr, Expr) -> Expr = match op {
            "==" => |l, r| l.eq(r),
            "!=" => |l, r| l.neq(r),
            "<" => |l, r| l.lt(r),
            "<=" => |l, r| l.lt_eq(r),
            ">" => |l, r| l.gt(r),
            ">=" => |l, r| l.gt_eq(r),
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.operand()?;
        // A comparison with a missing cell is false, except `!=` which is true.
        let on_missing = op == "!=";
        Ok(combine(left, right).fill_null(lit(on_missing)))
    }

    fn operand(&mut self) -> Result<Expr> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of query"))?;
        self.pos += 1;

        match token {
            Token::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Ok(lit(n as i64)),
            Token::Number(n) => Ok(lit(n)),
            Token::Text(s) => Ok(lit(s)),
            Token::Ident(name) if name == "True" || name == "true" => Ok(lit(true)),
            Token::Ident(name) if name == "False" || name == "false" => Ok(lit(false)),
            Token::Ident(name) => {
                if !self.columns.contains(&name) {
                    self.columns.push(name.clone());
                }
                Ok(col(name))
            }
            Token::Op("(") => {
                let inner = self.or_expr()?;
                if self.peek_op() != Some(")") {
                    return Err(self.error("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::Op(op) => Err(self.error(&format!("unexpected operator '{op}'"))),
        }
    }
}
