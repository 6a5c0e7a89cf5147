//! Screen capture and on-screen image search.

use super::matching::{self, Match, MatchMethod, DEFAULT_THRESHOLD};
use super::util::{command_options, seconds};
use super::Region;
use crate::context::MacroContext;
use crate::errors::{ActionError, CommandError};
use crate::executor::MacroExecutor;
use crate::process::{run_command, CommandOptions};
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use anyhow::{anyhow, Context};
use image::GrayImage;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

pub fn register(registry: &mut ActionRegistry) {
    registry.register("screen.capture", capture_action);
    registry.register("screen.find", find_action);
    registry.register("screen.find-all", find_all_action);
    registry.register("screen.exists", exists_action);
    registry.register("screen.wait-for", wait_for_action);
}

/// Capture tools in the order they are tried when none is requested.
pub const CAPTURE_TOOLS: &[&str] = &["scrot", "maim", "import"];

/// Command line for one capture tool, or `None` for an unknown tool.
pub fn capture_command(tool: &str, region: Option<Region>, output: &str) -> Option<Vec<String>> {
    let mut cmd: Vec<String> = match tool {
        "scrot" => {
            let mut cmd = vec!["scrot".to_string(), "--overwrite".to_string()];
            if let Some(r) = region {
                cmd.push("-a".into());
                cmd.push(format!("{},{},{},{}", r.x, r.y, r.width, r.height));
            }
            cmd
        }
        "maim" => {
            let mut cmd = vec!["maim".to_string()];
            if let Some(r) = region {
                cmd.push("-g".into());
                cmd.push(format!("{}x{}+{}+{}", r.width, r.height, r.x, r.y));
            }
            cmd
        }
        "import" => {
            let mut cmd = vec!["import".to_string(), "-window".into(), "root".into()];
            if let Some(r) = region {
                cmd.push("-crop".into());
                cmd.push(format!("{}x{}+{}+{}", r.width, r.height, r.x, r.y));
            }
            cmd
        }
        _ => return None,
    };
    cmd.push(output.to_string());
    Some(cmd)
}

fn default_capture_path() -> PathBuf {
    std::env::temp_dir().join(format!("deskflow_capture_{}.png", std::process::id()))
}

/// Captures the screen (or `region`) to `output` and returns the written path.
pub fn capture(
    executor: &MacroExecutor,
    region: Option<Region>,
    output: Option<&Path>,
    tool: Option<&str>,
) -> Result<PathBuf, ActionError> {
    let path = output.map(Path::to_path_buf).unwrap_or_else(default_capture_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let target = path.to_string_lossy().into_owned();

    let tools: Vec<&str> = match tool {
        Some(tool) => vec![tool],
        None => CAPTURE_TOOLS.to_vec(),
    };
    let options = CommandOptions {
        timeout: Some(executor.config().command_timeout),
        ..command_options(executor)
    };

    for tool in &tools {
        let cmd = capture_command(tool, region, &target).ok_or_else(|| {
            ActionError::invalid_argument(format!("Unknown capture tool: {tool}"))
        })?;
        let argv: Vec<&str> = cmd.iter().skip(1).map(String::as_str).collect();
        match run_command(&cmd[0], &argv, &options) {
            Ok(_) => return Ok(path),
            Err(CommandError::NotFound(name)) if tools.len() > 1 => {
                debug!("Capture tool '{}' not installed, trying the next one", name);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(CommandError::NotFound(CAPTURE_TOOLS.join(" / ")).into())
}

/// Captures and decodes the screen as grayscale.
fn grab(executor: &MacroExecutor, region: Option<Region>) -> Result<GrayImage, ActionError> {
    let path = capture(executor, region, None, None)?;
    let image = image::open(&path)
        .with_context(|| format!("Failed to read screenshot {}", path.display()))?
        .to_luma8();
    if let Err(e) = std::fs::remove_file(&path) {
        debug!("Could not remove screenshot {:?}: {}", path, e);
    }
    Ok(image)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Best,
    First,
    All,
}

/// Parameters of an on-screen template search.
#[derive(Debug, Clone)]
pub struct ImageSearch {
    pub template: PathBuf,
    pub threshold: f64,
    pub method: MatchMethod,
    pub region: Option<Region>,
    pub mode: MatchMode,
}

impl ImageSearch {
    pub fn from_args(args: &ActionArgs) -> Result<Self, ActionError> {
        let template = args
            .get_any(&["template", "image"])
            .map(crate::template::to_display)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ActionError::invalid_argument(format!("{} requires 'template' argument", args.action()))
            })?;
        let method = match args.opt_str("method") {
            Some(m) => m.parse().map_err(ActionError::invalid_argument)?,
            None => MatchMethod::default(),
        };
        let mode = match args.str_or("mode", "best").to_lowercase().as_str() {
            "best" => MatchMode::Best,
            "first" => MatchMode::First,
            "all" => MatchMode::All,
            other => {
                return Err(ActionError::invalid_argument(format!(
                    "mode must be best, first or all; got '{other}'"
                )))
            }
        };
        Ok(Self {
            template: PathBuf::from(template),
            threshold: args.f64_or("threshold", DEFAULT_THRESHOLD)?,
            method,
            region: Region::from_args(args)?,
            mode,
        })
    }

    fn load_template(&self) -> Result<GrayImage, ActionError> {
        let image = image::open(&self.template)
            .with_context(|| format!("Failed to load template image {}", self.template.display()))?;
        Ok(image.to_luma8())
    }

    /// Matches on an already captured screen image, in screen coordinates.
    pub fn search_in(&self, screen: &GrayImage, template: &GrayImage) -> Vec<Match> {
        let (dx, dy) = self
            .region
            .map(|r| (i64::from(r.x), i64::from(r.y)))
            .unwrap_or((0, 0));
        let found = match self.mode {
            MatchMode::All => matching::find_all(screen, template, self.method, self.threshold),
            MatchMode::Best => matching::find_best(screen, template, self.method, self.threshold)
                .into_iter()
                .collect(),
            MatchMode::First => matching::find_first(screen, template, self.method, self.threshold)
                .into_iter()
                .collect(),
        };
        found.into_iter().map(|m| m.offset(dx, dy)).collect()
    }

    /// Captures the screen once and searches it.
    pub fn run(&self, executor: &MacroExecutor) -> Result<Vec<Match>, ActionError> {
        let template = self.load_template()?;
        let screen = grab(executor, self.region)?;
        Ok(self.search_in(&screen, &template))
    }
}

/// Polls until the template appears. A zero timeout searches once.
pub fn wait_for_image(
    executor: &MacroExecutor,
    search: &ImageSearch,
    timeout: Duration,
    interval: Duration,
) -> Result<Match, ActionError> {
    let template = search.load_template()?;
    let start = Instant::now();
    loop {
        let screen = grab(executor, search.region)?;
        if let Some(found) = search.search_in(&screen, &template).into_iter().next() {
            return Ok(found);
        }
        if start.elapsed() + interval > timeout {
            return Err(anyhow!(
                "Image '{}' not found within {:.1}s",
                search.template.display(),
                timeout.as_secs_f64()
            )
            .into());
        }
        std::thread::sleep(interval);
    }
}

fn capture_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let output = args.opt_str("output").map(PathBuf::from);
    let tool = args.opt_str("tool");
    let path = capture(
        executor,
        Region::from_args(args)?,
        output.as_deref(),
        tool.as_deref(),
    )?;
    Ok(Some(json!(path.to_string_lossy())))
}

fn find_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let search = ImageSearch::from_args(args)?;
    let found = search.run(executor)?;
    if search.mode == MatchMode::All {
        return Ok(Some(Value::Array(found.iter().map(Match::to_value).collect())));
    }
    Ok(Some(found.first().map(Match::to_value).unwrap_or(Value::Null)))
}

fn find_all_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let search = ImageSearch {
        mode: MatchMode::All,
        ..ImageSearch::from_args(args)?
    };
    let found = search.run(executor)?;
    Ok(Some(Value::Array(found.iter().map(Match::to_value).collect())))
}

fn exists_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let search = ImageSearch::from_args(args)?;
    Ok(Some(json!(!search.run(executor)?.is_empty())))
}

fn wait_for_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let search = ImageSearch::from_args(args)?;
    let timeout = seconds(args.f64_or("timeout", 30.0)?, "timeout")?;
    let interval = seconds(args.f64_or("interval", 0.5)?, "interval")?;
    let found = wait_for_image(executor, &search, timeout, interval)?;
    Ok(Some(found.to_value()))
}
