//! The interpreter that walks a macro's action tree.

use crate::config::EngineConfig;
use crate::context::MacroContext;
use crate::errors::{
    ActionError, ExecutionError, ExecutionErrorKind, MacroError, RenderError,
};
use crate::registry::{self, ActionArgs, ActionRegistry};
use crate::script::{Action, Script, DEFERRED_KEYS, RESERVED_KEYS};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Variable written by the `return` action.
pub const RETURN_VAR: &str = "_return";

/// Argument naming the variable that receives a handler's result.
pub const STORE_AS: &str = "store_as";

/// Runs macros against an [`ActionRegistry`].
///
/// An executor is cheap to clone. Subroutine calls run on a [`child`] whose
/// depth is one higher; `execute` refuses to start once the depth exceeds
/// [`EngineConfig::max_depth`].
///
/// [`child`]: MacroExecutor::child
#[derive(Debug, Clone)]
pub struct MacroExecutor {
    registry: Arc<ActionRegistry>,
    config: Arc<EngineConfig>,
    depth: usize,
}

impl Default for MacroExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroExecutor {
    /// An executor over the process-wide registry, configured from the environment.
    pub fn new() -> Self {
        Self::with_registry(registry::global()).with_config(EngineConfig::from_env())
    }

    pub fn with_registry(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            config: Arc::new(EngineConfig::default()),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// An executor for a nested `call`, one level deeper.
    pub fn child(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            depth: self.depth + 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Runs `script` in a fresh context and returns that context.
    ///
    /// Parameters are validated before any action runs. A `break` or
    /// `continue` that escapes every loop surfaces as [`MacroError::Break`]
    /// or [`MacroError::Continue`].
    pub fn execute(
        &self,
        script: &Script,
        params: &Map<String, Value>,
    ) -> Result<MacroContext, MacroError> {
        if self.depth > self.config.max_depth {
            return Err(ExecutionError::new(ExecutionErrorKind::RecursionLimit {
                depth: self.depth,
                max_depth: self.config.max_depth,
            })
            .into());
        }

        let validated = script.validate_params(params)?;
        let mut ctx = MacroContext::new(validated, script.vars.clone())
            .with_shell_timeout(self.config.template_shell_timeout);

        info!(
            "Macro '{}' BEGIN depth={} actions={}",
            script.name,
            self.depth,
            script.actions.len()
        );

        match self.run_actions(&script.actions, &mut ctx) {
            Ok(()) => {
                info!("Macro '{}' END", script.name);
                Ok(ctx)
            }
            Err(e) => {
                info!("Macro '{}' FAILED: {}", script.name, e);
                Err(match e {
                    ActionError::Break => MacroError::Break,
                    ActionError::Continue => MacroError::Continue,
                    ActionError::Execution(e) => MacroError::Execution(e),
                    ActionError::Other(e) => MacroError::Execution(ExecutionError::new(
                        ExecutionErrorKind::ActionFailed(format!("{e:#}")),
                    )),
                })
            }
        }
    }

    /// Runs `actions` in order inside an existing context.
    pub fn run_actions(&self, actions: &[Action], ctx: &mut MacroContext) -> Result<(), ActionError> {
        for (index, action) in actions.iter().enumerate() {
            self.execute_action(action, ctx, index)?;
        }
        Ok(())
    }

    /// Runs one action: condition, argument rendering, dispatch and `store_as`.
    pub fn execute_action(
        &self,
        action: &Action,
        ctx: &mut MacroContext,
        index: usize,
    ) -> Result<Option<Value>, ActionError> {
        let locate = |e: ExecutionError| ActionError::Execution(e.at(index, action.name.as_deref()));

        if let Some(condition) = &action.condition {
            if !ctx.evaluate_condition(condition) {
                debug!(
                    "Skipping action {} '{}' due to if expression not met: `{}`",
                    index, action.action, condition
                );
                return Ok(None);
            }
        }

        let args = render_args(action, ctx).map_err(|e| locate(e.into()))?;
        debug!("Action {} '{}' args: {:?}", index, action.action, args.values());

        let Some(handler) = self.registry.lookup(&action.action) else {
            return Err(locate(ExecutionError::new(ExecutionErrorKind::UnknownAction(
                action.action.clone(),
            ))));
        };

        info!(
            "Action {} BEGIN '{}' name='{}' depth={}",
            index,
            action.action,
            action.name.as_deref().unwrap_or(""),
            self.depth
        );

        let result = match handler(&args, ctx, self) {
            Ok(result) => result,
            Err(ActionError::Other(e)) => {
                return Err(locate(ExecutionError::new(ExecutionErrorKind::ActionFailed(
                    format!("{e:#}"),
                ))))
            }
            Err(ActionError::Execution(e)) => return Err(locate(e)),
            Err(signal) => return Err(signal),
        };

        if let (Some(value), Some(var)) = (&result, args.opt_str(STORE_AS)) {
            if !var.is_empty() {
                ctx.set(var, value.clone());
            }
        }

        info!("Action {} END '{}'", index, action.action);
        Ok(result)
    }
}

/// Renders every argument except nested action lists and deferred keys.
fn render_args(action: &Action, ctx: &MacroContext) -> Result<ActionArgs, RenderError> {
    let mut rendered = Map::new();
    for (key, value) in &action.args {
        let value = if RESERVED_KEYS.contains(&key.as_str()) || DEFERRED_KEYS.contains(&key.as_str())
        {
            value.clone()
        } else {
            ctx.render_value(value)?
        };
        rendered.insert(key.clone(), value);
    }
    Ok(ActionArgs::new(action.action.clone(), rendered).with_label(action.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_registry(log: Arc<Mutex<Vec<Value>>>) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register("record", move |args, _, _| {
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            log.lock().unwrap().push(value.clone());
            Ok(Some(value))
        });
        registry.register("explode", |_, _, _| Err(anyhow::anyhow!("boom").into()));
        registry
    }

    fn script(actions: Value) -> Script {
        Script::from_value(&json!({"name": "t", "actions": actions}), None).unwrap()
    }

    #[test]
    fn test_false_condition_skips_rendering_and_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = MacroExecutor::with_registry(Arc::new(recording_registry(log.clone())));
        let script = script(json!([
            {"action": "record", "if": "false", "value": "{{ undefined_name }}"},
            {"action": "record", "value": "ran"}
        ]));
        executor.execute(&script, &Map::new()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![json!("ran")]);
    }

    #[test]
    fn test_unknown_action_is_localized() {
        let executor = MacroExecutor::with_registry(Arc::new(ActionRegistry::new()));
        let script = script(json!([{"action": "nope", "name": "first"}]));
        let err = executor.execute(&script, &Map::new()).unwrap_err();
        let exec = err.as_execution().unwrap();
        assert_eq!(exec.kind, ExecutionErrorKind::UnknownAction("nope".into()));
        assert_eq!(exec.action_index, Some(0));
        assert_eq!(exec.to_string(), "Unknown action: nope at action 0 (first)");
    }

    #[test]
    fn test_handler_errors_are_wrapped_with_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = MacroExecutor::with_registry(Arc::new(recording_registry(log)));
        let script = script(json!([
            {"action": "record", "value": 1},
            {"action": "explode", "name": "kaboom"}
        ]));
        let err = executor.execute(&script, &Map::new()).unwrap_err();
        let exec = err.as_execution().unwrap();
        assert_eq!(exec.kind, ExecutionErrorKind::ActionFailed("boom".into()));
        assert_eq!(exec.action_index, Some(1));
        assert_eq!(exec.action_name.as_deref(), Some("kaboom"));
    }

    #[test]
    fn test_render_error_in_args_is_execution_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = MacroExecutor::with_registry(Arc::new(recording_registry(log)));
        let script = script(json!([{"action": "record", "value": "{{ missing }}"}]));
        let err = executor.execute(&script, &Map::new()).unwrap_err();
        assert!(err.to_string().starts_with("Undefined variable"));
    }

    #[test]
    fn test_store_as_and_reserved_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = MacroExecutor::with_registry(Arc::new(recording_registry(log.clone())));
        let script = script(json!([
            {"action": "record", "value": "{{ 2 * 3 }}", "store_as": "six"},
            {"action": "record", "value": "{{ six }}", "then": [{"action": "x", "text": "{{ raw }}"}]}
        ]));
        let ctx = executor.execute(&script, &Map::new()).unwrap();
        assert_eq!(ctx.get("six"), Some(&json!(6)));
        assert_eq!(*log.lock().unwrap(), vec![json!(6), json!(6)]);
    }

    #[test]
    fn test_depth_limit_checked_before_validation() {
        let executor = MacroExecutor::with_registry(Arc::new(ActionRegistry::new()))
            .with_config(EngineConfig {
                max_depth: 2,
                ..EngineConfig::default()
            })
            .with_depth(3);
        let script = Script::from_value(
            &json!({"name": "t", "parameters": ["required_one"]}),
            None,
        )
        .unwrap();
        let err = executor.execute(&script, &Map::new()).unwrap_err();
        assert!(err.as_execution().unwrap().is_recursion_limit());
        assert_eq!(executor.child().depth(), 4);
    }
}
