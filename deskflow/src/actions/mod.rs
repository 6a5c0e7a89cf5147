//! Built-in action handlers.
//!
//! Flow control lives in [`flow`]; everything else wraps an external
//! desktop utility (`xdotool`, `wmctrl`, `scrot`, `tesseract`,
//! `notify-send`) or a library (`arboard`, `image`).

pub mod flow;
pub mod keyboard;
pub mod matching;
pub mod mouse;
pub mod ocr;
pub mod screen;
pub mod util;
pub mod window;

use crate::errors::{ActionError, CommandError};
use crate::executor::MacroExecutor;
use crate::process::run_command;
use crate::registry::{ActionArgs, ActionRegistry};
use serde_json::{json, Value};

pub fn register_builtins(registry: &mut ActionRegistry) {
    flow::register(registry);
    util::register(registry);
    mouse::register(registry);
    keyboard::register(registry);
    screen::register(registry);
    ocr::register(registry);
    window::register(registry);
}

/// Runs `xdotool` with the engine's command options.
pub(crate) fn xdotool(executor: &MacroExecutor, args: &[&str]) -> Result<String, CommandError> {
    run_command("xdotool", args, &util::command_options(executor))
}

/// A screen rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Parses `"x,y,w,h"`.
    pub fn parse(s: &str) -> Result<Self, ActionError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let invalid = || {
            ActionError::invalid_argument(format!("Invalid region format: {s}. Expected x,y,w,h"))
        };
        let [x, y, w, h] = parts.as_slice() else {
            return Err(invalid());
        };
        Ok(Self {
            x: x.parse().map_err(|_| invalid())?,
            y: y.parse().map_err(|_| invalid())?,
            width: w.parse().map_err(|_| invalid())?,
            height: h.parse().map_err(|_| invalid())?,
        })
    }

    /// Reads an optional `region` argument given as a string or a list of four integers.
    pub fn from_args(args: &ActionArgs) -> Result<Option<Self>, ActionError> {
        match args.get("region") {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Self::parse(s).map(Some),
            Some(Value::Array(items)) => {
                let invalid = || {
                    ActionError::invalid_argument(
                        "region must be a list of four integers within screen range",
                    )
                };
                let numbers: Vec<i64> = items.iter().filter_map(Value::as_i64).collect();
                let [x, y, w, h] = numbers.as_slice() else {
                    return Err(invalid());
                };
                if items.len() != 4 {
                    return Err(invalid());
                }
                Ok(Some(Self {
                    x: i32::try_from(*x).map_err(|_| invalid())?,
                    y: i32::try_from(*y).map_err(|_| invalid())?,
                    width: u32::try_from(*w).map_err(|_| invalid())?,
                    height: u32::try_from(*h).map_err(|_| invalid())?,
                }))
            }
            Some(other) => Err(ActionError::invalid_argument(format!(
                "region must be 'x,y,w,h' or a list, got {other}"
            ))),
        }
    }

    pub fn to_value(self) -> Value {
        json!([self.x, self.y, self.width, self.height])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_region_parse() {
        assert_eq!(
            Region::parse("10, 20,300,40").unwrap(),
            Region {
                x: 10,
                y: 20,
                width: 300,
                height: 40
            }
        );
        assert!(Region::parse("1,2,3").is_err());
        assert!(Region::parse("a,b,c,d").is_err());
    }

    #[test]
    fn test_region_from_args() {
        let mut values = Map::new();
        values.insert("region".into(), json!([0, 0, 100, 50]));
        let args = ActionArgs::new("screen.capture", values);
        assert_eq!(
            Region::from_args(&args).unwrap().map(Region::to_value),
            Some(json!([0, 0, 100, 50]))
        );
        assert_eq!(
            Region::from_args(&ActionArgs::new("screen.capture", Map::new())).unwrap(),
            None
        );
    }

    #[test]
    fn test_region_list_out_of_range_is_rejected() {
        let region = |value: Value| {
            let mut values = Map::new();
            values.insert("region".into(), value);
            Region::from_args(&ActionArgs::new("screen.capture", values))
        };
        assert!(region(json!([0, 0, 4_294_967_296_i64, 10])).is_err());
        assert!(region(json!([3_000_000_000_i64, 0, 10, 10])).is_err());
        assert!(region(json!([0, 0, -1, 10])).is_err());
        assert!(region(json!([0, 0, 10])).is_err());
        assert!(region(json!([0, 0, 10, "x"])).is_err());
        assert_eq!(
            region(json!([-5, 0, 10, 10])).unwrap(),
            Some(Region { x: -5, y: 0, width: 10, height: 10 })
        );
    }
}
