//! Query-string filter grammar.
//!
//! ```text
//! param   := field ['__' op] '=' value          (top-level leaf, implicit AND)
//!          | ('and' | 'or' | 'not') '=' group
//! group   := '(' term (',' term)* ')'
//! term    := field ['__' op] '=' value | ('and' | 'or' | 'not') group
//! value   := bare | '"' escaped '"'            (inside groups)
//! ```
//!
//! Values stay untyped; the compiler coerces them against a `FieldSchema`.

use super::error::FilterError;
use super::types::{
    is_valid_field_name, Combinator, Condition, FilterExpression, FilterLimits, FilterNode,
    FilterOp, RawValue,
};

/// Paging and ordering parameters. They are never filter leaves.
pub const RESERVED_PARAMS: &[&str] = &[
    "limit", "offset", "cursor", "page", "per_page", "order", "order_by", "sort_by",
];

const OP_SEPARATOR: &str = "__";

pub fn is_reserved(param: &str) -> bool {
    RESERVED_PARAMS.contains(&param)
}

/// Parses query pairs (in request order) into a filter tree.
pub fn parse(pairs: &[(String, String)], limits: &FilterLimits) -> Result<FilterExpression, FilterError> {
    let mut parser = Parser { limits, leaves: 0 };
    let mut children = Vec::new();

    for (key, value) in pairs {
        if is_reserved(key) {
            continue;
        }
        let node = match Combinator::from_keyword(key) {
            Some(kind) => parser.parse_group_param(key, kind, value)?,
            None => parser.leaf(key, key, value.clone())?,
        };
        children.push(node);
    }

    Ok(FilterExpression {
        root: FilterNode::Group {
            kind: Combinator::And,
            children,
        },
    })
}

struct Parser<'l> {
    limits: &'l FilterLimits,
    leaves: usize,
}

impl Parser<'_> {
    fn parse_group_param(&mut self, param: &str, kind: Combinator, src: &str) -> Result<FilterNode, FilterError> {
        let mut cursor = GroupCursor { param, src, pos: 0 };
        let node = self.group(&mut cursor, kind, 2)?;
        cursor.skip_ws();
        if !cursor.at_end() {
            return Err(cursor.error("unexpected input after closing ')'"));
        }
        Ok(node)
    }

    fn group(&mut self, cursor: &mut GroupCursor<'_>, kind: Combinator, depth: usize) -> Result<FilterNode, FilterError> {
        if depth > self.limits.max_depth {
            return Err(FilterError::TooComplex(format!(
                "nesting deeper than {} levels",
                self.limits.max_depth
            )));
        }

        cursor.skip_ws();
        cursor.expect('(')?;
        let mut children = Vec::new();
        loop {
            cursor.skip_ws();
            children.push(self.term(cursor, depth)?);
            cursor.skip_ws();
            match cursor.next() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(cursor.error(format!("expected ',' or ')' but found '{}'", c))),
                None => return Err(cursor.error("unterminated group")),
            }
        }

        if kind == Combinator::Not && children.len() != 1 {
            return Err(cursor.error("not(...) takes exactly one term"));
        }
        Ok(FilterNode::Group { kind, children })
    }

    fn term(&mut self, cursor: &mut GroupCursor<'_>, depth: usize) -> Result<FilterNode, FilterError> {
        let word = cursor.word();
        if word.is_empty() {
            return Err(match cursor.peek() {
                Some(')') => cursor.error("empty group"),
                _ => cursor.error("expected a field or group"),
            });
        }
        cursor.skip_ws();
        match cursor.peek() {
            Some('(') => match Combinator::from_keyword(word) {
                Some(kind) => self.group(cursor, kind, depth + 1),
                None => Err(cursor.error(format!("'{}' is not a combinator", word))),
            },
            Some('=') => {
                cursor.next();
                let value = cursor.value()?;
                self.leaf(cursor.param, word, value)
            }
            _ => Err(cursor.error(format!("expected '=' after '{}'", word))),
        }
    }

    fn leaf(&mut self, param: &str, key: &str, value: String) -> Result<FilterNode, FilterError> {
        let (field, op) = split_key(param, key)?;

        self.leaves += 1;
        if self.leaves > self.limits.max_leaves {
            return Err(FilterError::TooComplex(format!(
                "more than {} conditions",
                self.limits.max_leaves
            )));
        }

        let value = if op == FilterOp::In {
            let items: Vec<String> = value.split(',').map(str::to_string).collect();
            if items.len() > self.limits.max_list_values {
                return Err(FilterError::TooComplex(format!(
                    "'{}' lists more than {} values",
                    field, self.limits.max_list_values
                )));
            }
            RawValue::List(items)
        } else {
            RawValue::Single(value)
        };

        Ok(FilterNode::Leaf(Condition {
            field: field.to_string(),
            op,
            value,
        }))
    }
}

fn split_key<'k>(param: &str, key: &'k str) -> Result<(&'k str, FilterOp), FilterError> {
    let (field, op) = match key.split_once(OP_SEPARATOR) {
        Some((field, suffix)) => {
            let op = suffix
                .parse::<FilterOp>()
                .map_err(|_| FilterError::syntax(param, format!("unknown operator '{}'", suffix)))?;
            (field, op)
        }
        None => (key, FilterOp::Eq),
    };
    if !is_valid_field_name(field) {
        return Err(FilterError::syntax(param, format!("invalid field name '{}'", field)));
    }
    Ok((field, op))
}

/// Character cursor over the value of a group parameter.
struct GroupCursor<'s> {
    param: &'s str,
    src: &'s str,
    pos: usize,
}

impl<'s> GroupCursor<'s> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.next();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}' but found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}'", expected))),
        }
    }

    /// Field key or combinator keyword: `[A-Za-z0-9_]*`.
    fn word(&mut self) -> &'s str {
        let src = self.src;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.next();
        }
        &src[start..self.pos]
    }

    fn value(&mut self) -> Result<String, FilterError> {
        if self.peek() == Some('"') {
            self.next();
            let mut out = String::new();
            loop {
                match self.next() {
                    Some('"') => return Ok(out),
                    Some('\\') => match self.next() {
                        Some(c @ ('"' | '\\')) => out.push(c),
                        _ => return Err(self.error("invalid escape in quoted value")),
                    },
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated quoted value")),
                }
            }
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                ',' | ')' => break,
                '(' | '"' | '\\' => {
                    return Err(self.error(format!("'{}' must be quoted inside a group", c)))
                }
                _ => {
                    self.next();
                }
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn error(&self, reason: impl Into<String>) -> FilterError {
        FilterError::syntax(self.param, format!("{} at position {}", reason.into(), self.pos))
    }
}

impl FilterExpression {
    /// Canonical query form: explicit operators, groups rendered with quoting
    /// where needed. Parsing the result yields an equal expression.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.terms()
            .iter()
            .map(|node| match node {
                FilterNode::Leaf(condition) => (
                    format!("{}{}{}", condition.field, OP_SEPARATOR, condition.op),
                    raw_value_text(&condition.value),
                ),
                FilterNode::Group { kind, children } => {
                    (kind.as_str().to_string(), render_children(children))
                }
            })
            .collect()
    }
}

fn render_children(children: &[FilterNode]) -> String {
    let terms: Vec<String> = children.iter().map(render_term).collect();
    format!("({})", terms.join(","))
}

fn render_term(node: &FilterNode) -> String {
    match node {
        FilterNode::Leaf(condition) => format!(
            "{}{}{}={}",
            condition.field,
            OP_SEPARATOR,
            condition.op,
            quote_if_needed(&raw_value_text(&condition.value))
        ),
        FilterNode::Group { kind, children } => {
            format!("{}{}", kind.as_str(), render_children(children))
        }
    }
}

fn raw_value_text(value: &RawValue) -> String {
    match value {
        RawValue::Single(s) => s.clone(),
        RawValue::List(items) => items.join(","),
    }
}

fn quote_if_needed(value: &str) -> String {
    if !value.contains(|c| matches!(c, ',' | '(' | ')' | '"' | '\\')) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
