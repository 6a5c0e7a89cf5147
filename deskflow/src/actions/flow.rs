//! Flow-control actions: branches, loops, error handling and subroutine calls.

use crate::context::MacroContext;
use crate::errors::{ActionError, ExecutionError, ExecutionErrorKind, MacroError};
use crate::executor::{MacroExecutor, RETURN_VAR};
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use crate::script::{find_script, Action};
use crate::template::is_truthy;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};

pub fn register(registry: &mut ActionRegistry) {
    registry.register("if", if_action);
    registry.register("repeat", repeat_action);
    registry.register("while", while_action);
    registry.register("for-each", for_each_action);
    registry.register("try", try_action);
    registry.register("break", |_, _, _| Err(ActionError::Break));
    registry.register("continue", |_, _, _| Err(ActionError::Continue));
    registry.register("fail", fail_action);
    registry.register("call", call_action);
    registry.register("return", return_action);
}

enum LoopFlow {
    Next,
    Stop,
}

/// Runs one loop pass, consuming `break` and `continue`.
fn run_body(
    executor: &MacroExecutor,
    body: &[Action],
    ctx: &mut MacroContext,
) -> Result<LoopFlow, ActionError> {
    match executor.run_actions(body, ctx) {
        Ok(()) | Err(ActionError::Continue) => Ok(LoopFlow::Next),
        Err(ActionError::Break) => Ok(LoopFlow::Stop),
        Err(e) => Err(e),
    }
}

/// Evaluates an unrendered `condition` argument against the current context.
/// Strings, bare or `{{ }}`-wrapped, go through the lenient condition
/// evaluation; other values use template truthiness.
fn check_condition(value: &Value, ctx: &MacroContext) -> bool {
    match value {
        Value::String(expr) => ctx.evaluate_condition(expr),
        other => is_truthy(other),
    }
}

fn if_action(args: &ActionArgs, ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let condition = args.require("condition")?;
    let branch = if check_condition(condition, ctx) {
        "then"
    } else {
        "else"
    };
    debug!("if: taking '{}' branch", branch);
    let actions = args.actions(branch)?;
    executor.run_actions(&actions, ctx)?;
    Ok(None)
}

fn repeat_action(
    args: &ActionArgs,
    ctx: &mut MacroContext,
    executor: &MacroExecutor,
) -> HandlerResult {
    let count = args
        .opt_i64("count")?
        .ok_or_else(|| ActionError::invalid_argument("repeat requires 'count' argument"))?;
    let var = args.str_or("var", "index");
    let body = args.actions("actions")?;

    for i in 0..count.max(0) {
        ctx.set(var.as_str(), json!(i));
        if let LoopFlow::Stop = run_body(executor, &body, ctx)? {
            debug!("repeat: break at iteration {}", i);
            break;
        }
    }
    Ok(None)
}

fn while_action(
    args: &ActionArgs,
    ctx: &mut MacroContext,
    executor: &MacroExecutor,
) -> HandlerResult {
    let condition = args.require("condition")?.clone();
    let max_iterations = match args.opt_i64("max_iterations")? {
        Some(n) => usize::try_from(n).map_err(|_| {
            ActionError::invalid_argument("while 'max_iterations' must not be negative")
        })?,
        None => executor.config().max_iterations,
    };
    let body = args.actions("actions")?;

    let mut iterations = 0usize;
    while check_condition(&condition, ctx) {
        if iterations >= max_iterations {
            return Err(ExecutionError::new(ExecutionErrorKind::IterationLimit { max_iterations }).into());
        }
        iterations += 1;
        if let LoopFlow::Stop = run_body(executor, &body, ctx)? {
            break;
        }
    }
    debug!("while: finished after {} iterations", iterations);
    Ok(None)
}

fn for_each_action(
    args: &ActionArgs,
    ctx: &mut MacroContext,
    executor: &MacroExecutor,
) -> HandlerResult {
    let items = args.list("items")?;
    let var = args.str_or("var", "item");
    let index_var = args.opt_str("index");
    let body = args.actions("actions")?;

    for (i, item) in items.into_iter().enumerate() {
        ctx.set(var.as_str(), item);
        if let Some(index_var) = &index_var {
            ctx.set(index_var.as_str(), json!(i));
        }
        if let LoopFlow::Stop = run_body(executor, &body, ctx)? {
            break;
        }
    }
    Ok(None)
}

/// The message bound to `error_var`, without the action position.
fn error_message(error: &ActionError) -> String {
    match error {
        ActionError::Execution(e) => e.kind.to_string(),
        ActionError::Other(e) => format!("{e:#}"),
        signal => signal.to_string(),
    }
}

fn try_action(args: &ActionArgs, ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let body = args.actions("actions")?;
    let catch = args.actions("catch")?;
    let finally = args.actions("finally")?;
    let error_var = args.str_or("error_var", "error");

    let pending = match executor.run_actions(&body, ctx) {
        Ok(()) => None,
        Err(signal) if signal.is_loop_signal() => Some(signal),
        Err(e) => {
            let message = error_message(&e);
            info!("try: caught error: {}", message);
            ctx.set(error_var.as_str(), json!(message));
            if args.has("catch") {
                executor.run_actions(&catch, ctx).err()
            } else {
                Some(e)
            }
        }
    };

    executor.run_actions(&finally, ctx)?;

    match pending {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

fn fail_action(args: &ActionArgs, _ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let message = args.str_or("message", "Macro failed");
    Err(ExecutionError::new(ExecutionErrorKind::Failed(message)).into())
}

fn call_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let name = args.str("macro")?;
    let params = args.map("params")?;
    let directory = args
        .opt_str("directory")
        .map(PathBuf::from)
        .unwrap_or_else(|| executor.config().macros_dir.clone());

    let script = find_script(&name, &directory)
        .map_err(|e| ActionError::Other(e.into()))?
        .ok_or_else(|| ExecutionError::new(ExecutionErrorKind::MacroNotFound(name.clone())))?;

    info!("call: '{}' at depth {}", name, executor.depth() + 1);
    let child_ctx = executor.child().execute(&script, &params).map_err(|e| match e {
        MacroError::Execution(e) => ActionError::Execution(e),
        MacroError::Validation(e) => {
            ActionError::Execution(ExecutionError::new(ExecutionErrorKind::Validation(e)))
        }
        MacroError::Parse(e) => ActionError::Other(e.into()),
        MacroError::Break => stray_signal("break", &name),
        MacroError::Continue => stray_signal("continue", &name),
    })?;

    Ok(Some(child_ctx.get_or(RETURN_VAR, Value::Null)))
}

/// A `break`/`continue` that escaped every loop of a called macro stops at
/// the call boundary as an ordinary failure.
fn stray_signal(signal: &str, macro_name: &str) -> ActionError {
    ActionError::Execution(ExecutionError::new(ExecutionErrorKind::Failed(format!(
        "{signal} used outside of a loop in macro '{macro_name}'"
    ))))
}

fn return_action(args: &ActionArgs, ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    ctx.set(RETURN_VAR, value.clone());
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use serde_json::Map;
    use std::sync::Arc;

    fn executor() -> MacroExecutor {
        let mut registry = ActionRegistry::new();
        register(&mut registry);
        crate::actions::util::register(&mut registry);
        MacroExecutor::with_registry(Arc::new(registry))
    }

    fn run(actions: Value) -> Result<MacroContext, MacroError> {
        let script = Script::from_value(&json!({"name": "flow", "actions": actions}), None).unwrap();
        executor().execute(&script, &Map::new())
    }

    #[test]
    fn test_if_else_branches() {
        let ctx = run(json!([
            {"action": "set-var", "name": "n", "value": 5},
            {"action": "if", "condition": "n > 3",
             "then": [{"action": "set-var", "name": "branch", "value": "then"}],
             "else": [{"action": "set-var", "name": "branch", "value": "else"}]},
            {"action": "if", "condition": "{{ n > 10 }}",
             "then": [{"action": "set-var", "name": "big", "value": true}]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("branch"), Some(&json!("then")));
        assert_eq!(ctx.get("big"), None);
    }

    #[test]
    fn test_repeat_break_and_continue() {
        let ctx = run(json!([
            {"action": "set-var", "name": "seen", "value": []},
            {"action": "repeat", "count": 10, "var": "i", "actions": [
                {"action": "continue", "if": "i == 1"},
                {"action": "break", "if": "i == 4"},
                {"action": "set-var", "name": "seen", "value": "{{ seen + [i] }}"}
            ]},
            {"action": "set-var", "name": "after", "value": "reached"}
        ]))
        .unwrap();
        assert_eq!(ctx.get("seen"), Some(&json!([0, 2, 3])));
        assert_eq!(ctx.get("after"), Some(&json!("reached")));
    }

    #[test]
    fn test_while_counts_up() {
        let ctx = run(json!([
            {"action": "set-var", "name": "n", "value": 0},
            {"action": "while", "condition": "n < 3", "actions": [
                {"action": "set-var", "name": "n", "value": "{{ n + 1 }}"}
            ]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("n"), Some(&json!(3)));
    }

    #[test]
    fn test_while_reevaluates_wrapped_condition() {
        let ctx = run(json!([
            {"action": "set-var", "name": "n", "value": 0},
            {"action": "while", "condition": "{{ n < 3 }}", "max_iterations": 50, "actions": [
                {"action": "set-var", "name": "n", "value": "{{ n + 1 }}"}
            ]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("n"), Some(&json!(3)));
    }

    #[test]
    fn test_while_condition_on_undefined_is_false() {
        let ctx = run(json!([
            {"action": "while", "condition": "{{ pending > 0 }}", "actions": [
                {"action": "fail", "message": "body must not run"}
            ]}
        ]));
        assert!(ctx.is_ok());
    }

    #[test]
    fn test_while_ceiling() {
        let err = run(json!([
            {"action": "while", "condition": "true", "max_iterations": 5, "actions": []}
        ]))
        .unwrap_err();
        let exec = err.as_execution().unwrap();
        assert!(exec.is_iteration_limit());
        assert_eq!(
            exec.kind,
            ExecutionErrorKind::IterationLimit { max_iterations: 5 }
        );
    }

    #[test]
    fn test_for_each_with_index_over_string() {
        let ctx = run(json!([
            {"action": "set-var", "name": "out", "value": ""},
            {"action": "for-each", "items": "a, b, c", "var": "letter", "index": "i", "actions": [
                {"action": "set-var", "name": "out", "value": "{{ out ~ i ~ letter }}"}
            ]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("out"), Some(&json!("0a1b2c")));
    }

    #[test]
    fn test_try_catch_finally() {
        let ctx = run(json!([
            {"action": "try",
             "actions": [{"action": "fail", "message": "oops"}],
             "catch": [{"action": "set-var", "name": "caught", "value": "{{ error }}"}],
             "finally": [{"action": "set-var", "name": "cleaned", "value": true}]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("caught"), Some(&json!("oops")));
        assert_eq!(ctx.get("cleaned"), Some(&json!(true)));
    }

    #[test]
    fn test_try_without_catch_reraises_after_finally() {
        let err = run(json!([
            {"action": "try",
             "actions": [{"action": "fail", "message": "oops"}],
             "finally": [{"action": "set-var", "name": "cleaned", "value": true}]}
        ]))
        .unwrap_err();
        assert_eq!(
            err.as_execution().unwrap().kind,
            ExecutionErrorKind::Failed("oops".into())
        );
    }

    #[test]
    fn test_try_passes_loop_signals_through() {
        let ctx = run(json!([
            {"action": "repeat", "count": 3, "actions": [
                {"action": "try", "actions": [{"action": "break"}],
                 "catch": [{"action": "set-var", "name": "caught", "value": true}]},
                {"action": "set-var", "name": "body_ran", "value": true}
            ]}
        ]))
        .unwrap();
        assert_eq!(ctx.get("caught"), None);
        assert_eq!(ctx.get("body_ran"), None);
    }

    #[test]
    fn test_break_outside_loop_escapes_execute() {
        assert!(matches!(run(json!([{"action": "break"}])), Err(MacroError::Break)));
        assert!(matches!(
            run(json!([{"action": "continue"}])),
            Err(MacroError::Continue)
        ));
    }

    #[test]
    fn test_return_stores_convention_variable() {
        let ctx = run(json!([{"action": "return", "value": "{{ 40 + 2 }}"}])).unwrap();
        assert_eq!(ctx.get(RETURN_VAR), Some(&json!(42)));
    }

    #[test]
    fn test_call_missing_macro() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(json!([
            {"action": "call", "macro": "ghost", "directory": dir.path().to_string_lossy()}
        ]))
        .unwrap_err();
        let exec = err.as_execution().unwrap();
        assert_eq!(exec.kind, ExecutionErrorKind::MacroNotFound("ghost".into()));
        assert_eq!(exec.action_index, Some(0));
    }
}
