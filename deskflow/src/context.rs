use crate::errors::RenderError;
use crate::template::{self, Scope, Template};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Variable store and template evaluator for one macro run.
///
/// Lookups resolve runtime variables first, then call-time parameters, then
/// the macro's default variables.
#[derive(Debug, Clone)]
pub struct MacroContext {
    vars: Map<String, Value>,
    params: Map<String, Value>,
    runtime: Map<String, Value>,
    shell_timeout: Duration,
}

impl Default for MacroContext {
    fn default() -> Self {
        Self::new(Map::new(), Map::new())
    }
}

impl MacroContext {
    pub fn new(params: Map<String, Value>, vars: Map<String, Value>) -> Self {
        Self {
            vars,
            params,
            runtime: Map::new(),
            shell_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the upper bound for the `shell()` template function.
    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    /// All variables merged by precedence.
    pub fn variables(&self) -> Map<String, Value> {
        let mut merged = self.vars.clone();
        merged.extend(self.params.clone());
        merged.extend(self.runtime.clone());
        merged
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.runtime
            .get(name)
            .or_else(|| self.params.get(name))
            .or_else(|| self.vars.get(name))
    }

    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).cloned().unwrap_or(default)
    }

    /// Writes a runtime variable. Parameters and defaults are never modified.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.runtime.insert(name.into(), value);
    }

    /// Removes a runtime variable, exposing any parameter or default beneath it.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.runtime.remove(name)
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn runtime_vars(&self) -> &Map<String, Value> {
        &self.runtime
    }

    /// Renders a template string. Strings without `{{` are returned unchanged.
    pub fn render(&self, source: &str) -> Result<String, RenderError> {
        if !template::has_markers(source) {
            return Ok(source.to_string());
        }
        let vars = self.variables();
        let scope = Scope {
            vars: &vars,
            shell_timeout: self.shell_timeout,
        };
        Template::compile(source)?.render(&scope)
    }

    /// Renders every string inside `value`. A string that is exactly one
    /// `{{ ... }}` block becomes the expression's value, so lists and numbers
    /// keep their type. Mapping keys are left untouched.
    pub fn render_value(&self, value: &Value) -> Result<Value, RenderError> {
        match value {
            Value::String(s) => {
                if !template::has_markers(s) {
                    return Ok(value.clone());
                }
                let vars = self.variables();
                let scope = Scope {
                    vars: &vars,
                    shell_timeout: self.shell_timeout,
                };
                Template::compile(s)?.render_native(&scope)
            }
            Value::Object(map) => {
                let mut rendered = Map::new();
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item)?);
                }
                Ok(Value::Object(rendered))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    /// Evaluates a condition. Expressions without `{{` are wrapped in one.
    /// Rendering failures count as false.
    pub fn evaluate_condition(&self, condition: &str) -> bool {
        let source = if template::has_markers(condition) {
            condition.to_string()
        } else {
            format!("{{{{ {condition} }}}}")
        };

        match self.render(&source) {
            Ok(result) => {
                let normalized = result.trim().to_lowercase();
                match normalized.as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" | "none" | "" => false,
                    _ => true,
                }
            }
            Err(e) => {
                debug!("Condition '{}' evaluated to false: {}", condition, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_precedence() {
        let mut ctx = MacroContext::new(map(json!({"x": "B"})), map(json!({"x": "A"})));
        assert_eq!(ctx.get("x"), Some(&json!("B")));
        ctx.set("x", json!("C"));
        assert_eq!(ctx.get("x"), Some(&json!("C")));
        ctx.unset("x");
        assert_eq!(ctx.get("x"), Some(&json!("B")));

        let defaults_only = MacroContext::new(Map::new(), map(json!({"x": "A"})));
        assert_eq!(defaults_only.get("x"), Some(&json!("A")));
    }

    #[test]
    fn test_set_never_touches_params() {
        let mut ctx = MacroContext::new(map(json!({"p": 1})), Map::new());
        ctx.set("p", json!(2));
        assert_eq!(ctx.params()["p"], json!(1));
        assert_eq!(ctx.get("p"), Some(&json!(2)));
    }

    #[test]
    fn test_get_or_default() {
        let ctx = MacroContext::default();
        assert_eq!(ctx.get_or("missing", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn test_render_fast_path() {
        let ctx = MacroContext::default();
        assert_eq!(ctx.render("no templates here").unwrap(), "no templates here");
    }

    #[test]
    fn test_render_value_recurses() {
        let ctx = MacroContext::new(map(json!({"name": "bob", "n": 2})), Map::new());
        let rendered = ctx
            .render_value(&json!({
                "{{ name }}": "hi {{ name }}",
                "list": ["{{ n }}", "{{ n * 2 }}", 7],
                "flag": true
            }))
            .unwrap();
        assert_eq!(
            rendered,
            json!({"{{ name }}": "hi bob", "list": [2, 4, 7], "flag": true})
        );
    }

    #[test]
    fn test_conditions() {
        let ctx = MacroContext::new(map(json!({"count": 3, "word": "maybe"})), Map::new());
        assert!(ctx.evaluate_condition("count > 2"));
        assert!(!ctx.evaluate_condition("count > 5"));
        assert!(ctx.evaluate_condition("{{ count == 3 }}"));
        assert!(ctx.evaluate_condition("word"));
        assert!(!ctx.evaluate_condition("'no'"));
        assert!(!ctx.evaluate_condition("none"));
        assert!(!ctx.evaluate_condition("undefined_thing > 1"));
        assert!(!ctx.evaluate_condition("{{ broken syntax ( }}"));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = MacroContext::new(map(json!({"p": 1})), Map::new());
        original.set("shared", json!("orig"));
        let mut copy = original.clone();
        copy.set("shared", json!("copy"));
        copy.set("only_copy", json!(true));
        original.set("only_original", json!(true));

        assert_eq!(original.get("shared"), Some(&json!("orig")));
        assert_eq!(original.get("only_copy"), None);
        assert_eq!(copy.get("shared"), Some(&json!("copy")));
        assert_eq!(copy.get("only_original"), None);
    }
}
