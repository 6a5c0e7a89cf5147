//! Action-name to handler mapping.

use crate::context::MacroContext;
use crate::errors::{ActionError, ExecutionError, ExecutionErrorKind};
use crate::executor::MacroExecutor;
use crate::script::{split_list, Action};
use crate::template::to_display;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type HandlerResult = Result<Option<Value>, ActionError>;

pub type ActionHandler =
    Arc<dyn Fn(&ActionArgs, &mut MacroContext, &MacroExecutor) -> HandlerResult + Send + Sync>;

#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in action.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::actions::register_builtins(&mut registry);
        registry
    }

    /// Binds `name` to `handler`, replacing any earlier binding.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&ActionArgs, &mut MacroContext, &MacroExecutor) -> HandlerResult
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn lookup(&self, name: &str) -> Option<&ActionHandler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

static GLOBAL: OnceCell<Arc<ActionRegistry>> = OnceCell::new();

/// The process-wide registry. Built from the built-in actions on first use
/// unless [`install`] supplied one before.
pub fn global() -> Arc<ActionRegistry> {
    GLOBAL
        .get_or_init(|| Arc::new(ActionRegistry::with_builtins()))
        .clone()
}

/// Installs the process-wide registry. Fails once [`global`] has been used.
pub fn install(registry: ActionRegistry) -> Result<(), ActionRegistry> {
    GLOBAL
        .set(Arc::new(registry))
        .map_err(|rejected| Arc::try_unwrap(rejected).unwrap_or_else(|arc| (*arc).clone()))
}

/// Rendered arguments of one action with typed accessors.
///
/// Reserved keys (`then`, `else`, `actions`, `catch`, `finally`) still hold
/// raw nested action data; use [`ActionArgs::actions`] to parse them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    action: String,
    values: Map<String, Value>,
    label: Option<String>,
}

impl ActionArgs {
    pub fn new(action: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            values,
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// The action's `name` key, which the parser lifts out of the arguments.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// First present key among `keys`, for arguments with aliases.
    pub fn get_any(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn invalid(&self, key: &str, expected: &str, got: &Value) -> ActionError {
        ActionError::invalid_argument(format!(
            "{} expects '{key}' to be {expected}, got {got}",
            self.action
        ))
    }

    pub fn require(&self, key: &str) -> Result<&Value, ActionError> {
        self.get(key).ok_or_else(|| {
            ActionError::invalid_argument(format!(
                "{} requires '{key}' argument",
                self.action
            ))
        })
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.get(key).map(to_display)
    }

    pub fn str(&self, key: &str) -> Result<String, ActionError> {
        self.require(key).map(to_display)
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.opt_str(key).unwrap_or_else(|| default.to_string())
    }

    pub fn opt_i64(&self, key: &str) -> Result<Option<i64>, ActionError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.invalid(key, "an integer", value))
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ActionError> {
        Ok(self.opt_i64(key)?.unwrap_or(default))
    }

    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, ActionError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| self.invalid(key, "a number", value))
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, ActionError> {
        Ok(self.opt_f64(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ActionError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" | "" => Ok(false),
                _ => Err(self.invalid(key, "a boolean", value)),
            },
            other => Err(self.invalid(key, "a boolean", other)),
        }
    }

    /// A list argument; a string is split on commas.
    pub fn list(&self, key: &str) -> Result<Vec<Value>, ActionError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
            Some(Value::String(s)) => match split_list(s) {
                Value::Array(items) => Ok(items),
                _ => Ok(Vec::new()),
            },
            Some(other) => Err(self.invalid(key, "a list", other)),
        }
    }

    /// A mapping argument, or an empty mapping when absent.
    pub fn map(&self, key: &str) -> Result<Map<String, Value>, ActionError> {
        match self.get(key) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(self.invalid(key, "a mapping", other)),
        }
    }

    /// Parses the raw nested action list stored under `key`.
    pub fn actions(&self, key: &str) -> Result<Vec<Action>, ActionError> {
        match self.values.get(key) {
            None => Ok(Vec::new()),
            Some(raw) => Action::list_from_value(raw).map_err(|e| {
                ActionError::Execution(ExecutionError::new(ExecutionErrorKind::InvalidArgument(
                    format!("{} '{key}': {}", self.action, e.message),
                )))
            }),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> ActionArgs {
        ActionArgs::new("test", value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ActionRegistry::new();
        registry.register("echo", |_, _, _| Ok(Some(json!(1))));
        registry.register("echo", |_, _, _| Ok(Some(json!(2))));
        assert_eq!(registry.len(), 1);

        let handler = registry.lookup("echo").unwrap().clone();
        let executor = MacroExecutor::with_registry(Arc::new(registry));
        let mut ctx = MacroContext::default();
        let result = handler(&args(json!({})), &mut ctx, &executor).unwrap();
        assert_eq!(result, Some(json!(2)));
    }

    #[test]
    fn test_builtins_cover_flow_control() {
        let registry = ActionRegistry::with_builtins();
        for name in [
            "if", "repeat", "while", "for-each", "try", "break", "continue", "fail", "call",
            "return", "set-var", "delay", "log", "shell",
        ] {
            assert!(registry.contains(name), "missing built-in '{name}'");
        }
        assert!(registry.lookup("no-such-action").is_none());
    }

    #[test]
    fn test_typed_accessors() {
        let a = args(json!({
            "count": "3",
            "ratio": 0.5,
            "flag": "yes",
            "items": "a, b",
            "name": 12,
            "nothing": null
        }));
        assert_eq!(a.i64_or("count", 0).unwrap(), 3);
        assert_eq!(a.f64_or("ratio", 1.0).unwrap(), 0.5);
        assert!(a.bool_or("flag", false).unwrap());
        assert_eq!(a.list("items").unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(a.str("name").unwrap(), "12");
        assert_eq!(a.i64_or("nothing", 9).unwrap(), 9);
        assert!(a.str("missing").is_err());
        assert!(a.i64_or("items", 0).is_err());
    }

    #[test]
    fn test_actions_accessor_parses_nested_lists() {
        let a = args(json!({"actions": [{"action": "delay", "seconds": 0}]}));
        let nested = a.actions("actions").unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].action, "delay");
        assert!(a.actions("else").unwrap().is_empty());

        let bad = args(json!({"then": "not a list"}));
        assert!(bad.actions("then").is_err());
    }
}
