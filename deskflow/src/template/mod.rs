//! Jinja-style templating used for action arguments and conditions.
//!
//! Only `{{ expression }}` blocks are supported. Expressions are evaluated by a
//! sandboxed interpreter with variable lookup, comparisons, boolean logic and a
//! small set of filters (`upper`, `lower`, `title`, `strip`, `int`, `float`,
//! `bool`, `string`, `default`, `length`, `join`) and functions (`env`,
//! `shell`, `range`).

mod eval;
mod lexer;
mod parser;

pub use eval::{is_truthy, to_display, Scope};
pub use parser::Expr;

use crate::errors::RenderError;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Returns true when `s` contains a template expression marker.
pub fn has_markers(s: &str) -> bool {
    s.contains(OPEN)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + OPEN.len();
            let body_len = find_close(&rest[body_start..]).ok_or_else(|| {
                RenderError::Syntax(format!(
                    "unexpected end of template, expected '}}}}' in '{source}'"
                ))
            })?;
            let body = &rest[body_start..body_start + body_len];
            segments.push(Segment::Expr(parser::parse_expression(body)?));
            rest = &rest[body_start + body_len + CLOSE.len()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// The expression when the template is exactly one `{{ ... }}` block.
    pub fn as_single_expression(&self) -> Option<&Expr> {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    pub fn render(&self, scope: &Scope<'_>) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&to_display(&eval::evaluate(expr, scope)?)),
            }
        }
        Ok(out)
    }

    /// Like [`Template::render`], but a template made of a single expression
    /// yields that expression's value instead of its text.
    pub fn render_native(&self, scope: &Scope<'_>) -> Result<Value, RenderError> {
        match self.as_single_expression() {
            Some(expr) => eval::evaluate(expr, scope),
            None => self.render(scope).map(Value::String),
        }
    }
}

/// Byte offset of the closing `}}` in `body`, skipping quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '}' if body[i..].starts_with(CLOSE) => return Some(i),
            _ => {}
        }
    }
    None
}
