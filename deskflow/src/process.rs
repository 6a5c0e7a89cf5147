//! Running external utilities with a hard timeout.

use crate::errors::CommandError;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// X11 utilities that need `DISPLAY` in their environment.
const X11_COMMANDS: &[&str] = &[
    "xdotool", "scrot", "maim", "import", "wmctrl", "xclip", "xwininfo", "xprop",
];

#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub timeout: Option<Duration>,
    /// Fail on a non-zero exit status.
    pub check: bool,
    pub input: Option<String>,
    pub env: HashMap<String, String>,
    /// Injected for X11 utilities when the process has no `DISPLAY`.
    pub display: Option<String>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            check: true,
            input: None,
            env: HashMap::new(),
            display: None,
        }
    }
}

impl CommandOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

/// Runs `program` with `args` and returns its trimmed stdout.
///
/// The child is killed when the timeout elapses. Safe to call from inside a
/// tokio runtime of either flavor: the command then runs on a helper thread
/// with its own runtime.
pub fn run_command(
    program: &str,
    args: &[&str],
    options: &CommandOptions,
) -> Result<String, CommandError> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running command: {}", command_line);

    let run = || block_on_command(program, args, options, &command_line);
    if tokio::runtime::Handle::try_current().is_err() {
        return run();
    }

    std::thread::scope(|scope| {
        scope.spawn(run).join().unwrap_or_else(|_| {
            Err(CommandError::Io {
                command: command_line.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "command runner thread panicked",
                ),
            })
        })
    })
}

fn block_on_command(
    program: &str,
    args: &[&str],
    options: &CommandOptions,
    command_line: &str,
) -> Result<String, CommandError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| CommandError::Io {
            command: command_line.to_string(),
            source,
        })?;

    runtime.block_on(run_async(program, args, options, command_line))
}

async fn run_async(
    program: &str,
    args: &[&str],
    options: &CommandOptions,
    command_line: &str,
) -> Result<String, CommandError> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(if options.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if X11_COMMANDS.contains(&program) && std::env::var_os("DISPLAY").is_none() {
        if let Some(display) = &options.display {
            command.env("DISPLAY", display);
        }
    }
    command.envs(&options.env);

    let mut child = command.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            CommandError::NotFound(program.to_string())
        } else {
            CommandError::Io {
                command: command_line.to_string(),
                source,
            }
        }
    })?;

    if let Some(input) = &options.input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| CommandError::Io {
                    command: command_line.to_string(),
                    source,
                })?;
        }
    }

    let output = match options.timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::Timeout {
                command: command_line.to_string(),
                seconds: timeout.as_secs_f64(),
            })?,
        None => child.wait_with_output().await,
    }
    .map_err(|source| CommandError::Io {
        command: command_line.to_string(),
        source,
    })?;

    if options.check && !output.status.success() {
        return Err(CommandError::Failed {
            command: command_line.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Runs a command line through `sh -c`.
pub fn run_shell(command: &str, timeout: Duration) -> Result<String, CommandError> {
    run_command("sh", &["-c", command], &CommandOptions::with_timeout(timeout))
}

/// Returns true when `command` resolves on `PATH`.
pub fn command_exists(command: &str) -> bool {
    let options = CommandOptions::with_timeout(Duration::from_secs(5));
    run_command("which", &[command], &options).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_run_shell_trims_output() {
        let out = run_shell("echo '  hello  '", Duration::from_secs(5)).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_non_zero_exit_is_error_when_checked() {
        let err = run_shell("echo oops >&2; exit 3", Duration::from_secs(5)).unwrap_err();
        match err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let err = run_shell("sleep 5", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[test]
    fn test_missing_program() {
        let err = run_command(
            "deskflow-no-such-binary",
            &[],
            &CommandOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let options = CommandOptions {
            input: Some("piped text".to_string()),
            ..Default::default()
        };
        assert_eq!(run_command("cat", &[], &options).unwrap(), "piped text");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_inside_multi_thread_runtime() {
        assert_eq!(run_shell("echo hi", Duration::from_secs(5)).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_runs_inside_current_thread_runtime() {
        assert_eq!(run_shell("echo hi", Duration::from_secs(5)).unwrap(), "hi");
        let err = run_shell("sleep 5", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }
}
