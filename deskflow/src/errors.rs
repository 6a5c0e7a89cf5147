use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Raised when a macro document cannot be turned into a [`crate::Script`].
#[derive(Error, Debug, Clone)]
#[error("{message}{}", .file_path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
pub struct ParseError {
    pub message: String,
    pub file_path: Option<PathBuf>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, file_path: Option<PathBuf>) -> Self {
        Self {
            message: message.into(),
            file_path,
        }
    }
}

/// Parameter validation failures, raised before any action runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Required parameter '{name}' not provided")]
    MissingRequired { name: String },

    #[error("Parameter '{name}' must be {expected}")]
    InvalidType { name: String, expected: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Undefined variable: {0}")]
    Undefined(String),

    #[error("Template syntax error: {0}")]
    Syntax(String),

    #[error("Template evaluation error: {0}")]
    Evaluation(String),
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command '{0}' not found. Please install it.")]
    NotFound(String),

    #[error("Command '{command}' failed with code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {seconds:.1}s")]
    Timeout { command: String, seconds: f64 },

    #[error("I/O error running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionErrorKind {
    UnknownAction(String),
    ActionFailed(String),
    Failed(String),
    RecursionLimit { depth: usize, max_depth: usize },
    IterationLimit { max_iterations: usize },
    MacroNotFound(String),
    InvalidArgument(String),
    Render(RenderError),
    Validation(ValidationError),
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction(kind) => write!(f, "Unknown action: {kind}"),
            Self::ActionFailed(msg) => write!(f, "{msg}"),
            Self::Failed(msg) => write!(f, "{msg}"),
            Self::RecursionLimit { depth, max_depth } => write!(
                f,
                "Maximum macro recursion depth exceeded ({depth} > {max_depth})"
            ),
            Self::IterationLimit { max_iterations } => write!(
                f,
                "While loop exceeded maximum iterations ({max_iterations})"
            ),
            Self::MacroNotFound(name) => write!(f, "Macro not found: {name}"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::Render(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
        }
    }
}

/// A failure while running actions, localized to the action that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub action_index: Option<usize>,
    pub action_name: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind) -> Self {
        Self {
            kind,
            action_index: None,
            action_name: None,
        }
    }

    /// Attaches the position of the failing action unless one is already set.
    pub fn at(mut self, index: usize, name: Option<&str>) -> Self {
        if self.action_index.is_none() {
            self.action_index = Some(index);
            self.action_name = name.map(str::to_string);
        }
        self
    }

    pub fn is_recursion_limit(&self) -> bool {
        matches!(self.kind, ExecutionErrorKind::RecursionLimit { .. })
    }

    pub fn is_iteration_limit(&self) -> bool {
        matches!(self.kind, ExecutionErrorKind::IterationLimit { .. })
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(index) = self.action_index {
            write!(f, " at action {index}")?;
        }
        if let Some(name) = &self.action_name {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

impl From<RenderError> for ExecutionError {
    fn from(e: RenderError) -> Self {
        Self::new(ExecutionErrorKind::Render(e))
    }
}

/// What a handler hands back to the interpreter when it does not complete normally.
///
/// `Break` and `Continue` are loop-control signals, not failures; they are only
/// consumed by the loop handlers.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("break used outside of a loop")]
    Break,

    #[error("continue used outside of a loop")]
    Continue,

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    pub fn is_loop_signal(&self) -> bool {
        matches!(self, Self::Break | Self::Continue)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::new(ExecutionErrorKind::InvalidArgument(
            msg.into(),
        )))
    }
}

impl From<RenderError> for ActionError {
    fn from(e: RenderError) -> Self {
        Self::Execution(e.into())
    }
}

impl From<CommandError> for ActionError {
    fn from(e: CommandError) -> Self {
        Self::Other(e.into())
    }
}

/// Top-level error returned by [`crate::MacroExecutor::execute`].
#[derive(Error, Debug)]
pub enum MacroError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("break used outside of a loop")]
    Break,

    #[error("continue used outside of a loop")]
    Continue,
}

impl MacroError {
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }
}
