#![allow(dead_code)]

use deskflow::{ActionRegistry, EngineConfig, MacroExecutor, Script};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn script(yaml: &str) -> Script {
    Script::from_yaml_str(yaml, None).unwrap_or_else(|e| panic!("test script must parse: {e}"))
}

/// An executor over the built-in handlers with default limits.
pub fn executor() -> MacroExecutor {
    MacroExecutor::with_registry(Arc::new(ActionRegistry::with_builtins()))
}

pub fn executor_with(config: EngineConfig) -> MacroExecutor {
    executor().with_config(config)
}

pub fn write_script(dir: &Path, file_name: &str, yaml: &str) {
    std::fs::write(dir.join(file_name), yaml).expect("Failed to write test script");
}
