use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_DEPTH: usize = 50;
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Runtime limits and external-tool settings for the macro engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deepest allowed chain of nested `call` actions.
    pub max_depth: usize,
    /// Default ceiling for `while` loops that do not set `max_iterations`.
    pub max_iterations: usize,
    /// Directory searched by `call` when no `directory` argument is given.
    pub macros_dir: PathBuf,
    pub command_timeout: Duration,
    pub shell_timeout: Duration,
    /// Upper bound for the `shell()` template function.
    pub template_shell_timeout: Duration,
    /// X display handed to X11 utilities when `DISPLAY` is unset.
    pub display: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            macros_dir: default_macros_dir(),
            command_timeout: Duration::from_secs(30),
            shell_timeout: Duration::from_secs(60),
            template_shell_timeout: Duration::from_secs(30),
            display: ":0".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `DESKFLOW_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(depth) = parse_env::<usize>("DESKFLOW_MAX_DEPTH") {
            config.max_depth = depth;
        }
        if let Some(iterations) = parse_env::<usize>("DESKFLOW_MAX_ITERATIONS") {
            config.max_iterations = iterations;
        }
        if let Ok(dir) = env::var("DESKFLOW_MACROS_DIR") {
            config.macros_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_env::<f64>("DESKFLOW_COMMAND_TIMEOUT") {
            config.command_timeout = secs_or(secs, config.command_timeout);
        }
        if let Some(secs) = parse_env::<f64>("DESKFLOW_SHELL_TIMEOUT") {
            config.shell_timeout = secs_or(secs, config.shell_timeout);
        }
        if let Ok(display) = env::var("DISPLAY") {
            config.display = display;
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value '{}' for {}", raw, key);
            None
        }
    }
}

fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// `$XDG_CONFIG_HOME/deskflow/macros`, falling back to `~/.config/deskflow/macros`.
pub fn default_macros_dir() -> PathBuf {
    let config_home = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    config_home.join("deskflow").join("macros")
}
