//! JSON path extraction
//!
//! Path syntax:
//! - `a.b.c` walks object keys; `\.` escapes a literal dot inside a key
//! - a numeric segment indexes into an array (`items.0.name`)
//! - `*` or a non-final `#` applies the rest of the path to every element
//! - a final `#` yields the array length
//! - `#(field op literal)` selects the first matching element,
//!   `#(field op literal)#` selects all of them. `op` is one of
//!   `==` `!=` `<` `<=` `>` `>=`
//!
//! Strings are returned unquoted, `null` as the empty string and composite
//! values as compact JSON.

use std::cmp::Ordering;

use serde_json::Value;

use super::ExtractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    // longest tokens first so `<=` is not read as `<`
    const TOKENS: [(&'static str, Self); 6] = [
        ("==", Self::Eq),
        ("!=", Self::Ne),
        ("<=", Self::Le),
        (">=", Self::Ge),
        ("<", Self::Lt),
        (">", Self::Gt),
    ];

    fn accepts(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            (Self::Ne, None) => true,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Query {
    field: Vec<Segment>,
    op: CompareOp,
    literal: Value,
}

impl Query {
    fn matches(&self, element: &Value) -> bool {
        let Some(actual) = evaluate(element, &self.field) else {
            return false;
        };
        let ordering = match (&actual, &self.literal) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) if matches!(self.op, CompareOp::Eq | CompareOp::Ne) => {
                Some(if a == b { Ordering::Equal } else { Ordering::Less })
            }
            _ => None,
        };
        self.op.accepts(ordering)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Each,
    Length,
    Select { query: Query, all: bool },
}

/// Evaluates a path expression against JSON bodies
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    path: String,
    segments: Vec<Segment>,
}

impl JsonExtractor {
    pub fn new(path: &str) -> Result<Self, ExtractionError> {
        let segments = parse_path(path).map_err(|reason| ExtractionError::InvalidPath {
            path: path.to_string(),
            reason,
        })?;
        Ok(Self {
            path: path.to_string(),
            segments,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn extract(&self, body: &[u8], _content_type: &str) -> Result<String, ExtractionError> {
        let document: Value =
            serde_json::from_slice(body).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

        match evaluate(&document, &self.segments) {
            None => Err(ExtractionError::PathNotFound(self.path.clone())),
            Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(composite) => serde_json::to_string(&composite)
                .map_err(|e| ExtractionError::Internal(format!("failed to render JSON result: {e}"))),
        }
    }
}

fn evaluate(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match segment {
        Segment::Key(key) => match value {
            Value::Object(map) => map.get(key).and_then(|child| evaluate(child, rest)),
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .and_then(|child| evaluate(child, rest)),
            _ => None,
        },
        Segment::Each => match value {
            Value::Array(items) => Some(Value::Array(
                items.iter().filter_map(|item| evaluate(item, rest)).collect(),
            )),
            Value::Object(map) => Some(Value::Array(
                map.values().filter_map(|item| evaluate(item, rest)).collect(),
            )),
            _ => None,
        },
        Segment::Length => match value {
            Value::Array(items) => Some(Value::from(items.len())),
            _ => None,
        },
        Segment::Select { query, all: false } => match value {
            Value::Array(items) => items
                .iter()
                .find(|item| query.matches(item))
                .and_then(|item| evaluate(item, rest)),
            _ => None,
        },
        Segment::Select { query, all: true } => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter(|item| query.matches(item))
                    .filter_map(|item| evaluate(item, rest))
                    .collect(),
            )),
            _ => None,
        },
    }
}

fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }

    let chars: Vec<char> = path.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    loop {
        if chars.get(i) == Some(&'#') && chars.get(i + 1) == Some(&'(') {
            let (query, next) = parse_query(&chars, i + 2)?;
            let all = chars.get(next) == Some(&'#');
            segments.push(Segment::Select { query, all });
            i = if all { next + 1 } else { next };
        } else {
            let mut key = String::new();
            let mut escaped = false;
            while let Some(&c) = chars.get(i) {
                match c {
                    '\\' => {
                        let next = chars.get(i + 1).ok_or("dangling escape at end of path")?;
                        key.push(*next);
                        escaped = true;
                        i += 2;
                    }
                    '.' => break,
                    _ => {
                        key.push(c);
                        i += 1;
                    }
                }
            }
            if key.is_empty() {
                return Err("empty path segment".to_string());
            }
            segments.push(match key.as_str() {
                "*" | "#" if !escaped => Segment::Each,
                _ => Segment::Key(key),
            });
        }

        match chars.get(i) {
            None => break,
            Some('.') => {
                i += 1;
                if i == chars.len() {
                    return Err("path ends with '.'".to_string());
                }
            }
            Some(c) => return Err(format!("unexpected '{c}' after query")),
        }
    }

    // a final bare `#` counts instead of iterating
    if path.ends_with('#') && !path.ends_with("\\#") && !path.ends_with(")#") {
        if let Some(last) = segments.last_mut() {
            if matches!(last, Segment::Each) {
                *last = Segment::Length;
            }
        }
    }

    Ok(segments)
}

/// Parses the body of `#( ... )` starting just after the opening paren.
/// Returns the query and the index just past the closing paren.
fn parse_query(chars: &[char], start: usize) -> Result<(Query, usize), String> {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut i = start;

    while let Some(&c) = chars.get(i) {
        if in_string {
            match c {
                '\\' => i += 1,
                '"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                '"' => in_string = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    if chars.get(i) != Some(&')') {
        return Err("unterminated query".to_string());
    }

    let body: String = chars[start..i].iter().collect();
    Ok((parse_condition(&body)?, i + 1))
}

fn parse_condition(body: &str) -> Result<Query, String> {
    let (position, token, op) = find_operator(body).ok_or_else(|| format!("missing comparison operator in '{body}'"))?;

    let field = body[..position].trim();
    let literal = body[position + token.len()..].trim();
    if field.is_empty() {
        return Err(format!("missing field in query '{body}'"));
    }
    if literal.is_empty() {
        return Err(format!("missing value in query '{body}'"));
    }

    let literal = serde_json::from_str::<Value>(literal).unwrap_or_else(|_| Value::String(literal.to_string()));

    Ok(Query {
        field: parse_path(field)?,
        op,
        literal,
    })
}

/// First comparison operator outside of a quoted literal
fn find_operator(body: &str) -> Option<(usize, &'static str, CompareOp)> {
    let mut in_string = false;
    let mut escaped = false;
    for (position, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
            continue;
        }
        let rest = &body[position..];
        if let Some((token, op)) = CompareOp::TOKENS.iter().find(|(token, _)| rest.starts_with(token)) {
            return Some((position, *token, *op));
        }
    }
    None
}
