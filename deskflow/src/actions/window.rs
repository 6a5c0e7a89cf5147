//! Window management through `wmctrl` and `xdotool`.

use super::util::command_options;
use super::xdotool;
use crate::context::MacroContext;
use crate::errors::ActionError;
use crate::executor::MacroExecutor;
use crate::process::run_command;
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub fn register(registry: &mut ActionRegistry) {
    registry.register("window.list", list_action);
    registry.register("window.focus", focus_action);
    registry.register("window.move", move_action);
    registry.register("window.resize", resize_action);
    registry.register("window.minimize", minimize_action);
    registry.register("window.maximize", maximize_action);
    registry.register("window.close", close_action);
}

// id desktop pid x y width height wm_class hostname title
static WMCTRL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(0x[0-9a-fA-F]+)\s+(-?\d+)\s+(\d+)\s+(-?\d+)\s+(-?\d+)\s+(\d+)\s+(\d+)\s+(\S+)\s+(\S+)\s*(.*)$",
    )
    .expect("wmctrl line pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub window_id: String,
    pub desktop: i64,
    pub pid: i64,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub wm_class: String,
    pub hostname: String,
    pub title: String,
}

impl WindowInfo {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// The window id as the decimal number xdotool expects.
    fn xdotool_id(&self) -> Result<String, ActionError> {
        let hex = self.window_id.trim_start_matches("0x");
        u64::from_str_radix(hex, 16)
            .map(|id| id.to_string())
            .map_err(|_| anyhow!("Invalid window id {}", self.window_id).into())
    }
}

/// Parses one line of `wmctrl -lGpx`.
pub fn parse_window_line(line: &str) -> Option<WindowInfo> {
    let caps = WMCTRL_LINE.captures(line.trim_end())?;
    let int = |i: usize| caps.get(i)?.as_str().parse::<i64>().ok();
    Some(WindowInfo {
        window_id: caps.get(1)?.as_str().to_lowercase(),
        desktop: int(2)?,
        pid: int(3)?,
        x: int(4)?,
        y: int(5)?,
        width: int(6)?,
        height: int(7)?,
        wm_class: caps.get(8)?.as_str().to_string(),
        hostname: caps.get(9)?.as_str().to_string(),
        title: caps.get(10).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
    })
}

/// How a window is selected by an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowFilter {
    pub title: Option<String>,
    pub wm_class: Option<String>,
    pub window_id: Option<String>,
    pub desktop: Option<i64>,
}

impl WindowFilter {
    pub fn from_args(args: &ActionArgs) -> Result<Self, ActionError> {
        Ok(Self {
            title: args.opt_str("title").filter(|s| !s.is_empty()),
            wm_class: args
                .get_any(&["wm_class", "class"])
                .map(crate::template::to_display)
                .filter(|s| !s.is_empty()),
            window_id: args
                .get_any(&["id", "window_id"])
                .map(crate::template::to_display)
                .filter(|s| !s.is_empty()),
            desktop: args.opt_i64("desktop")?,
        })
    }

    fn is_empty(&self) -> bool {
        self.title.is_none() && self.wm_class.is_none() && self.window_id.is_none()
    }

    /// Title and class match as case-insensitive substrings; ids match exactly.
    pub fn matches(&self, window: &WindowInfo) -> bool {
        let contains = |haystack: &str, needle: &Option<String>| {
            needle
                .as_ref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        };
        self.window_id
            .as_ref()
            .map_or(true, |id| id.eq_ignore_ascii_case(&window.window_id))
            && contains(&window.title, &self.title)
            && contains(&window.wm_class, &self.wm_class)
            && self.desktop.map_or(true, |d| d == window.desktop)
    }

    fn describe(&self) -> String {
        self.window_id
            .clone()
            .or_else(|| self.title.clone())
            .or_else(|| self.wm_class.clone())
            .unwrap_or_default()
    }
}

fn wmctrl(executor: &MacroExecutor, args: &[&str]) -> Result<String, ActionError> {
    Ok(run_command("wmctrl", args, &command_options(executor))?)
}

pub fn list_windows(executor: &MacroExecutor) -> Result<Vec<WindowInfo>, ActionError> {
    let output = wmctrl(executor, &["-lGpx"])?;
    Ok(output.lines().filter_map(parse_window_line).collect())
}

/// The first window matching the action's selector.
fn find_window(args: &ActionArgs, executor: &MacroExecutor) -> Result<WindowInfo, ActionError> {
    let filter = WindowFilter::from_args(args)?;
    if filter.is_empty() {
        return Err(ActionError::invalid_argument(format!(
            "{} requires 'title', 'wm_class' or 'id'",
            args.action()
        )));
    }
    list_windows(executor)?
        .into_iter()
        .find(|w| filter.matches(w))
        .ok_or_else(|| anyhow!("Window not found: {}", filter.describe()).into())
}

fn list_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let filter = WindowFilter::from_args(args)?;
    let windows: Vec<Value> = list_windows(executor)?
        .iter()
        .filter(|w| filter.matches(w))
        .map(WindowInfo::to_value)
        .collect();
    Ok(Some(Value::Array(windows)))
}

fn focus_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    wmctrl(executor, &["-i", "-a", &window.window_id])?;
    Ok(Some(window.to_value()))
}

fn move_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    let geometry = format!("0,{},{},-1,-1", args.i64_or("x", 0)?, args.i64_or("y", 0)?);
    wmctrl(executor, &["-i", "-r", &window.window_id, "-e", &geometry])?;
    Ok(None)
}

fn resize_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    let width = args
        .opt_i64("width")?
        .ok_or_else(|| ActionError::invalid_argument("window.resize requires 'width' argument"))?;
    let height = args
        .opt_i64("height")?
        .ok_or_else(|| ActionError::invalid_argument("window.resize requires 'height' argument"))?;
    let geometry = format!("0,-1,-1,{width},{height}");
    wmctrl(executor, &["-i", "-r", &window.window_id, "-e", &geometry])?;
    Ok(None)
}

fn minimize_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    xdotool(executor, &["windowminimize", &window.xdotool_id()?])?;
    Ok(None)
}

fn maximize_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    wmctrl(
        executor,
        &["-i", "-r", &window.window_id, "-b", "add,maximized_vert,maximized_horz"],
    )?;
    Ok(None)
}

fn close_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let window = find_window(args, executor)?;
    wmctrl(executor, &["-i", "-c", &window.window_id])?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    const LINE: &str =
        "0x04000003  0 1234   10    20 1920 1080  Navigator.firefox myhost Mozilla Firefox - Docs";

    #[test]
    fn test_parse_window_line() {
        let window = parse_window_line(LINE).unwrap();
        assert_eq!(window.window_id, "0x04000003");
        assert_eq!((window.x, window.y, window.width, window.height), (10, 20, 1920, 1080));
        assert_eq!(window.wm_class, "Navigator.firefox");
        assert_eq!(window.title, "Mozilla Firefox - Docs");
        assert_eq!(window.xdotool_id().unwrap(), "67108867");
        assert!(parse_window_line("garbage").is_none());
    }

    #[test]
    fn test_filter_matching() {
        let window = parse_window_line(LINE).unwrap();
        let mut values = Map::new();
        values.insert("title".into(), json!("firefox"));
        let filter = WindowFilter::from_args(&ActionArgs::new("window.focus", values)).unwrap();
        assert!(filter.matches(&window));

        let by_id = WindowFilter {
            window_id: Some("0x04000003".into()),
            ..Default::default()
        };
        assert!(by_id.matches(&window));

        let other_desktop = WindowFilter {
            desktop: Some(2),
            ..Default::default()
        };
        assert!(!other_desktop.matches(&window));
        assert!(WindowFilter::default().is_empty());
    }
}
