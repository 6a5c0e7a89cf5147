//! Keyboard input through `xdotool`.

use super::xdotool;
use crate::context::MacroContext;
use crate::errors::ActionError;
use crate::executor::MacroExecutor;
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use crate::template::to_display;

pub fn register(registry: &mut ActionRegistry) {
    registry.register("keyboard.type", type_action);
    registry.register("keyboard.key", key_action);
    registry.register("keyboard.hotkey", hotkey_action);
}

/// Milliseconds between typed characters.
const DEFAULT_TYPE_DELAY_MS: i64 = 12;

/// Maps common key spellings to X keysym names. Unknown names pass through.
pub fn normalize_key(key: &str) -> &str {
    match key.to_lowercase().as_str() {
        "enter" | "return" => "Return",
        "esc" | "escape" => "Escape",
        "backspace" => "BackSpace",
        "delete" | "del" => "Delete",
        "space" => "space",
        "tab" => "Tab",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "home" => "Home",
        "end" => "End",
        "pageup" | "pgup" => "Page_Up",
        "pagedown" | "pgdn" => "Page_Down",
        "insert" | "ins" => "Insert",
        "capslock" => "Caps_Lock",
        "numlock" => "Num_Lock",
        "scrolllock" => "Scroll_Lock",
        "printscreen" | "prtsc" => "Print",
        _ => key,
    }
}

/// Builds an xdotool key chord such as `ctrl+shift+s`.
pub fn chord(key: &str, modifiers: &[String]) -> String {
    modifiers
        .iter()
        .map(String::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .chain(std::iter::once(normalize_key(key.trim())))
        .collect::<Vec<_>>()
        .join("+")
}

fn type_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let text = args.str_or("text", "");
    let delay = args.i64_or("delay", DEFAULT_TYPE_DELAY_MS)?.max(0).to_string();
    xdotool(executor, &["type", "--delay", &delay, "--", &text])?;
    Ok(None)
}

fn key_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let key = args.str("key")?;
    let modifiers: Vec<String> = args.list("modifiers")?.iter().map(to_display).collect();
    xdotool(executor, &["key", &chord(&key, &modifiers)])?;
    Ok(None)
}

fn hotkey_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let combo = args
        .get_any(&["combo", "keys"])
        .map(to_display)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ActionError::invalid_argument("keyboard.hotkey requires 'combo' argument"))?;
    xdotool(executor, &["key", combo.trim()])?;
    Ok(None)
}
