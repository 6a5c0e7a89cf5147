//! Declarative desktop-automation macros.
//!
//! A macro is a YAML document with a name, declared parameters, default
//! variables and a list of actions. [`MacroExecutor`] walks the actions,
//! evaluating `if` conditions and `{{ ... }}` templates against a layered
//! [`MacroContext`], and dispatches each one to a handler in the
//! [`ActionRegistry`]. Flow control (`if`, `repeat`, `while`, `for-each`,
//! `try`, `call`) is built from the same handler contract.
//!
//! ```no_run
//! use deskflow::{load_script, MacroExecutor};
//! use serde_json::{json, Map};
//!
//! let script = load_script("greet.yaml")?;
//! let params: Map<_, _> = json!({"user": "john"}).as_object().cloned().unwrap_or_default();
//! let ctx = MacroExecutor::new().execute(&script, &params)?;
//! println!("{:?}", ctx.get("_return"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod actions;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod process;
pub mod registry;
pub mod script;
pub mod template;
pub mod utils;

pub use config::EngineConfig;
pub use context::MacroContext;
pub use errors::{
    ActionError, CommandError, ExecutionError, ExecutionErrorKind, MacroError, ParseError,
    RenderError, ValidationError,
};
pub use executor::{MacroExecutor, RETURN_VAR};
pub use registry::{ActionArgs, ActionHandler, ActionRegistry, HandlerResult};
pub use script::{find_script, load_script, load_scripts, Action, ParamType, Parameter, Script};
pub use utils::init_logging;
