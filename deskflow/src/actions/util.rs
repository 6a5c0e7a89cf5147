//! Variables, delays, logging, shell commands, notifications and clipboard.

use crate::context::MacroContext;
use crate::errors::ActionError;
use crate::executor::MacroExecutor;
use crate::process::{run_command, CommandOptions};
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use anyhow::Context;
use arboard::Clipboard;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub fn register(registry: &mut ActionRegistry) {
    registry.register("set-var", set_var);
    registry.register("delay", delay);
    registry.register("log", log);
    registry.register("shell", shell);
    registry.register("notify", notify);
    registry.register("clipboard.get", clipboard_get);
    registry.register("clipboard.set", clipboard_set);
}

/// Options for external utilities, using the engine's command timeout and display.
pub(crate) fn command_options(executor: &MacroExecutor) -> CommandOptions {
    let config = executor.config();
    CommandOptions {
        display: Some(config.display.clone()),
        ..CommandOptions::with_timeout(config.command_timeout)
    }
}

/// A non-negative duration in seconds.
pub(crate) fn seconds(value: f64, key: &str) -> Result<Duration, ActionError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ActionError::invalid_argument(format!(
            "'{key}' must be a non-negative number of seconds"
        ))
    })
}

fn set_var(args: &ActionArgs, ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let name = args
        .get_any(&["var", "name"])
        .map(crate::template::to_display)
        .or_else(|| args.label().map(str::to_string))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ActionError::invalid_argument("set-var requires 'var' or 'name' argument"))?;
    let value = args.values().get("value").cloned().unwrap_or(Value::Null);
    ctx.set(name, value);
    Ok(None)
}

fn delay(args: &ActionArgs, _ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let secs = match args.opt_f64("seconds")? {
        Some(secs) => secs,
        None => args.f64_or("duration", 1.0)?,
    };
    let duration = seconds(secs, "seconds")?;
    debug!("delay: sleeping {:?}", duration);
    std::thread::sleep(duration);
    Ok(None)
}

fn log(args: &ActionArgs, _ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let message = args.str_or("message", "");
    match args.str_or("level", "info").to_lowercase().as_str() {
        "error" => error!(target: "deskflow::macro", "{}", message),
        "warn" | "warning" => warn!(target: "deskflow::macro", "{}", message),
        "debug" => debug!(target: "deskflow::macro", "{}", message),
        "info" => info!(target: "deskflow::macro", "{}", message),
        other => {
            return Err(ActionError::invalid_argument(format!(
                "log level must be one of error, warn, info, debug; got '{other}'"
            )))
        }
    }
    Ok(None)
}

fn shell(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let command = args.str("command")?;
    let timeout = match args.opt_f64("timeout")? {
        Some(secs) => seconds(secs, "timeout")?,
        None => executor.config().shell_timeout,
    };
    let options = CommandOptions {
        timeout: Some(timeout),
        input: args.opt_str("input"),
        ..command_options(executor)
    };
    let output = run_command("sh", &["-c", command.as_str()], &options)?;
    Ok(Some(json!(output)))
}

fn notify(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let message = args.str_or("message", "");
    let mut cmd: Vec<String> = Vec::new();
    if let Some(urgency) = args.opt_str("urgency") {
        cmd.extend(["--urgency".to_string(), urgency]);
    }
    if let Some(timeout) = args.opt_i64("timeout")? {
        cmd.extend(["--expire-time".to_string(), timeout.to_string()]);
    }
    if let Some(title) = args.opt_str("title").filter(|t| !t.is_empty()) {
        cmd.push(title);
    }
    cmd.push(message);

    let argv: Vec<&str> = cmd.iter().map(String::as_str).collect();
    run_command("notify-send", &argv, &command_options(executor))?;
    Ok(None)
}

fn clipboard_get(_args: &ActionArgs, _ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    let text = clipboard.get_text().context("Failed to read clipboard")?;
    Ok(Some(json!(text)))
}

fn clipboard_set(args: &ActionArgs, _ctx: &mut MacroContext, _executor: &MacroExecutor) -> HandlerResult {
    let text = args.str_or("text", "");
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .set_text(text)
        .context("Failed to copy to clipboard")?;
    Ok(None)
}
