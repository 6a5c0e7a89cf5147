//! Pointer actions driven through `xdotool`.

use super::{screen, xdotool};
use crate::context::MacroContext;
use crate::errors::ActionError;
use crate::executor::MacroExecutor;
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use std::time::Duration;

pub fn register(registry: &mut ActionRegistry) {
    registry.register("mouse.move", move_action);
    registry.register("mouse.click", click_action);
    registry.register("mouse.click-at", click_at_action);
    registry.register("mouse.drag", drag_action);
    registry.register("mouse.scroll", scroll_action);
    registry.register("mouse.click-image", click_image_action);
}

const CLICK_DELAY_MS: u64 = 100;

pub fn button_number(button: &str) -> Result<&'static str, ActionError> {
    match button.to_lowercase().as_str() {
        "left" | "1" => Ok("1"),
        "middle" | "2" => Ok("2"),
        "right" | "3" => Ok("3"),
        other => Err(ActionError::invalid_argument(format!(
            "Unknown mouse button '{other}'"
        ))),
    }
}

/// Number of intermediate steps for an animated movement, about 60 per second.
fn animation_steps(duration: Duration) -> u32 {
    ((duration.as_secs_f64() * 60.0) as u32).max(10)
}

pub fn move_to(executor: &MacroExecutor, x: i64, y: i64) -> Result<(), ActionError> {
    xdotool(executor, &["mousemove", &x.to_string(), &y.to_string()])?;
    Ok(())
}

pub fn click(executor: &MacroExecutor, button: &str, count: i64) -> Result<(), ActionError> {
    let button = button_number(button)?;
    let count = count.max(1).to_string();
    let delay = CLICK_DELAY_MS.to_string();
    xdotool(
        executor,
        &["click", "--repeat", &count, "--delay", &delay, button],
    )?;
    Ok(())
}

fn move_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let x = args.i64_or("x", 0)?;
    let y = args.i64_or("y", 0)?;
    let duration = super::util::seconds(args.f64_or("duration", 0.0)?, "duration")?;

    if !args.bool_or("relative", false)? {
        move_to(executor, x, y)?;
        return Ok(None);
    }

    if duration.is_zero() {
        xdotool(executor, &["mousemove_relative", "--", &x.to_string(), &y.to_string()])?;
        return Ok(None);
    }

    let steps = animation_steps(duration);
    let (step_x, step_y) = (x / i64::from(steps), y / i64::from(steps));
    for _ in 0..steps {
        xdotool(
            executor,
            &["mousemove_relative", "--", &step_x.to_string(), &step_y.to_string()],
        )?;
        std::thread::sleep(duration / steps);
    }
    Ok(None)
}

fn click_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    click(executor, &args.str_or("button", "left"), args.i64_or("count", 1)?)?;
    Ok(None)
}

fn click_at_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    move_to(executor, args.i64_or("x", 0)?, args.i64_or("y", 0)?)?;
    click(executor, &args.str_or("button", "left"), args.i64_or("count", 1)?)?;
    Ok(None)
}

/// Reads the first present integer among aliased keys.
fn coordinate(args: &ActionArgs, keys: &[&str]) -> Result<i64, ActionError> {
    for key in keys {
        if let Some(value) = args.opt_i64(key)? {
            return Ok(value);
        }
    }
    Ok(0)
}

fn drag_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let x1 = coordinate(args, &["x1", "from_x"])?;
    let y1 = coordinate(args, &["y1", "from_y"])?;
    let x2 = coordinate(args, &["x2", "to_x"])?;
    let y2 = coordinate(args, &["y2", "to_y"])?;
    let button = button_number(&args.str_or("button", "left"))?;
    let duration = super::util::seconds(args.f64_or("duration", 0.5)?, "duration")?;

    move_to(executor, x1, y1)?;
    xdotool(executor, &["mousedown", button])?;

    if duration.is_zero() {
        move_to(executor, x2, y2)?;
    } else {
        let steps = animation_steps(duration);
        let dx = (x2 - x1) as f64 / f64::from(steps);
        let dy = (y2 - y1) as f64 / f64::from(steps);
        for step in 1..=steps {
            let x = x1 as f64 + dx * f64::from(step);
            let y = y1 as f64 + dy * f64::from(step);
            move_to(executor, x as i64, y as i64)?;
            std::thread::sleep(duration / steps);
        }
    }

    xdotool(executor, &["mouseup", button])?;
    Ok(None)
}

fn scroll_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let amount = args.i64_or("amount", 3)?;
    if amount == 0 {
        return Ok(None);
    }
    // Buttons 4/5 scroll up/down, 6/7 left/right.
    let button = match (args.bool_or("horizontal", false)?, amount > 0) {
        (false, true) => "5",
        (false, false) => "4",
        (true, true) => "7",
        (true, false) => "6",
    };
    let repeat = amount.unsigned_abs().to_string();
    xdotool(executor, &["click", "--repeat", &repeat, button])?;
    Ok(None)
}

fn click_image_action(
    args: &ActionArgs,
    _ctx: &mut MacroContext,
    executor: &MacroExecutor,
) -> HandlerResult {
    let search = screen::ImageSearch::from_args(args)?;
    let timeout = super::util::seconds(args.f64_or("timeout", 0.0)?, "timeout")?;
    let interval = super::util::seconds(args.f64_or("interval", 0.5)?, "interval")?;
    let found = screen::wait_for_image(executor, &search, timeout, interval)?;

    let (cx, cy) = found.center();
    let x = cx + args.i64_or("offset_x", 0)?;
    let y = cy + args.i64_or("offset_y", 0)?;
    move_to(executor, x, y)?;
    click(executor, &args.str_or("button", "left"), args.i64_or("count", 1)?)?;
    Ok(Some(found.to_value()))
}
