//! Macro documents: parsing, validation and lookup on disk.

use crate::errors::{ParseError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extensions recognized for macro files.
pub const SCRIPT_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Argument keys holding raw nested action lists. They are never rendered.
pub const RESERVED_KEYS: &[&str] = &["then", "else", "actions", "catch", "finally"];

/// Argument keys passed to handlers unrendered, so they are evaluated against
/// the context at the moment of use.
pub const DEFERRED_KEYS: &[&str] = &["condition"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    List,
}

impl ParamType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "boolean" => Some(Self::Boolean),
            "list" => Some(Self::List),
            _ => None,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Float => "a float",
            Self::Boolean => "a boolean",
            Self::List => "a list",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
        };
        write!(f, "{name}")
    }
}

/// A declared input of a macro.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParamType::String,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    /// Validates and coerces a supplied value. `None` means the caller did
    /// not pass this parameter.
    pub fn validate(&self, value: Option<&Value>) -> Result<Value, ValidationError> {
        let value = match value {
            None | Some(Value::Null) => {
                return match &self.default {
                    Some(default) => Ok(default.clone()),
                    None if self.required => Err(ValidationError::MissingRequired {
                        name: self.name.clone(),
                    }),
                    None => Ok(Value::Null),
                };
            }
            Some(value) => value,
        };

        let invalid = || ValidationError::InvalidType {
            name: self.name.clone(),
            expected: self.param_type.expected().to_string(),
        };

        match self.param_type {
            ParamType::String => Ok(Value::String(match value {
                Value::String(s) => s.clone(),
                other => crate::template::to_display(other),
            })),
            ParamType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                    .map(Value::from)
                    .ok_or_else(invalid),
                Value::Bool(b) => Ok(Value::from(i64::from(*b))),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            ParamType::Float => {
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(invalid)
            }
            ParamType::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" | "yes" | "1" | "on" => Ok(Value::Bool(true)),
                    "false" | "no" | "0" | "off" => Ok(Value::Bool(false)),
                    _ => Err(invalid()),
                },
                _ => Err(invalid()),
            },
            ParamType::List => match value {
                Value::Array(items) => Ok(Value::Array(items.clone())),
                Value::String(s) => Ok(split_list(s)),
                _ => Err(invalid()),
            },
        }
    }

    fn from_value(value: &Value, file_path: Option<&Path>) -> Result<Self, ParseError> {
        let err = |msg: String| ParseError::new(msg, file_path.map(Path::to_path_buf));
        match value {
            Value::String(name) => Ok(Self::new(name.clone())),
            Value::Object(map) => {
                let name = match map.get("name") {
                    Some(Value::String(name)) if !name.is_empty() => name.clone(),
                    _ => return Err(err("Parameter missing 'name' field".to_string())),
                };
                let param_type = match map.get("type") {
                    None | Some(Value::Null) => ParamType::String,
                    Some(Value::String(raw)) => ParamType::parse(raw).ok_or_else(|| {
                        err(format!("Parameter '{name}' has unknown type '{raw}'"))
                    })?,
                    Some(other) => {
                        return Err(err(format!(
                            "Parameter '{name}' has invalid type {other}"
                        )))
                    }
                };
                let required = match map.get("required") {
                    None | Some(Value::Null) => true,
                    Some(Value::Bool(b)) => *b,
                    Some(other) => {
                        return Err(err(format!(
                            "Parameter '{name}' has non-boolean 'required': {other}"
                        )))
                    }
                };
                Ok(Self {
                    name,
                    param_type,
                    required,
                    default: map.get("default").filter(|v| !v.is_null()).cloned(),
                    description: map
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            other => Err(err(format!(
                "Parameter entry must be a string or a mapping, got {other}"
            ))),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), json!(self.name));
        map.insert("type".into(), json!(self.param_type.to_string()));
        map.insert("required".into(), json!(self.required));
        if let Some(default) = &self.default {
            map.insert("default".into(), default.clone());
        }
        if !self.description.is_empty() {
            map.insert("description".into(), json!(self.description));
        }
        Value::Object(map)
    }
}

/// Splits a comma-separated string into a list of trimmed strings.
pub fn split_list(s: &str) -> Value {
    Value::Array(
        s.split(',')
            .map(|item| Value::String(item.trim().to_string()))
            .collect(),
    )
}

/// One step of a macro.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action: String,
    pub args: Map<String, Value>,
    pub condition: Option<String>,
    pub name: Option<String>,
}

impl Action {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: Map::new(),
            condition: None,
            name: None,
        }
    }

    pub fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    /// Builds an action from one raw entry of an `actions` list.
    pub fn from_value(
        value: &Value,
        index: usize,
        file_path: Option<&Path>,
    ) -> Result<Self, ParseError> {
        let err = |msg: String| ParseError::new(msg, file_path.map(Path::to_path_buf));
        let Value::Object(map) = value else {
            return Err(err(format!("Action at index {index} must be a dictionary")));
        };
        let mut args = map.clone();
        let action = match args.remove("action") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
            _ => return Err(err(format!("Action at index {index} missing 'action' field"))),
        };
        let condition = match args.remove("if") {
            None | Some(Value::Null) => None,
            Some(Value::String(expr)) => Some(expr),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(other) => Some(other.to_string()),
        };
        let name = match args.remove("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(label)) => Some(label),
            Some(other) => Some(other.to_string()),
        };

        for key in RESERVED_KEYS {
            if let Some(nested) = args.get(*key) {
                validate_nested(nested, key, file_path)?;
            }
        }

        Ok(Self {
            action,
            args,
            condition,
            name,
        })
    }

    /// Parses a raw nested action list, as stored under a reserved key.
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>, ParseError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Self::from_value(item, i, None))
                .collect(),
            other => Err(ParseError::new(
                format!("Expected a list of actions, got {other}"),
                None,
            )),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("action".into(), json!(self.action));
        if let Some(name) = &self.name {
            map.insert("name".into(), json!(name));
        }
        if let Some(condition) = &self.condition {
            map.insert("if".into(), json!(condition));
        }
        for (key, value) in &self.args {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Checks that a raw nested list only holds mappings with an `action` kind,
/// without converting it.
fn validate_nested(value: &Value, key: &str, file_path: Option<&Path>) -> Result<(), ParseError> {
    let err = |msg: String| ParseError::new(msg, file_path.map(Path::to_path_buf));
    let Value::Array(items) = value else {
        return Err(err(format!("'{key}' must be a list of actions")));
    };
    for (i, item) in items.iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(err(format!("Action at index {i} in '{key}' must be a dictionary")));
        };
        match map.get("action") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => {}
            _ => {
                return Err(err(format!(
                    "Action at index {i} in '{key}' missing 'action' field"
                )))
            }
        }
        for nested_key in RESERVED_KEYS {
            if let Some(nested) = map.get(*nested_key) {
                validate_nested(nested, nested_key, file_path)?;
            }
        }
    }
    Ok(())
}

/// A parsed macro.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub vars: Map<String, Value>,
    pub actions: Vec<Action>,
    pub file_path: Option<PathBuf>,
}

impl Script {
    pub fn from_value(data: &Value, file_path: Option<&Path>) -> Result<Self, ParseError> {
        let err = |msg: &str| ParseError::new(msg, file_path.map(Path::to_path_buf));
        let Value::Object(map) = data else {
            return Err(err("Macro must be a YAML dictionary"));
        };

        let name = match map.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(err("Macro missing 'name' field")),
        };

        let description = map
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let parameters = match map.get("parameters") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|entry| Parameter::from_value(entry, file_path))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(err("'parameters' must be a list")),
        };

        let vars = match map.get("vars") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(vars)) => vars.clone(),
            Some(_) => return Err(err("'vars' must be a mapping")),
        };

        let actions = match map.get("actions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(i, entry)| Action::from_value(entry, i, file_path))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(err("'actions' must be a list")),
        };

        Ok(Self {
            name,
            description,
            parameters,
            vars,
            actions,
            file_path: file_path.map(Path::to_path_buf),
        })
    }

    pub fn from_yaml_str(source: &str, file_path: Option<&Path>) -> Result<Self, ParseError> {
        let data: Value = serde_yaml::from_str(source).map_err(|e| {
            ParseError::new(format!("Invalid YAML: {e}"), file_path.map(Path::to_path_buf))
        })?;
        Self::from_value(&data, file_path)
    }

    /// Validates call-time parameters against the declared ones. Undeclared
    /// parameters are dropped.
    pub fn validate_params(
        &self,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ValidationError> {
        let mut validated = Map::new();
        for param in &self.parameters {
            let value = param.validate(params.get(&param.name))?;
            validated.insert(param.name.clone(), value);
        }
        Ok(validated)
    }

    /// Serializes the macro back to its document form.
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), json!(self.name));
        if !self.description.is_empty() {
            map.insert("description".into(), json!(self.description));
        }
        map.insert(
            "parameters".into(),
            Value::Array(self.parameters.iter().map(Parameter::to_value).collect()),
        );
        map.insert("vars".into(), Value::Object(self.vars.clone()));
        map.insert(
            "actions".into(),
            Value::Array(self.actions.iter().map(Action::to_value).collect()),
        );
        Value::Object(map)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.to_document())
    }
}

/// Loads one macro file. Errors are surfaced to the caller.
pub fn load_script(path: impl AsRef<Path>) -> Result<Script, ParseError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| {
        ParseError::new(
            format!("Failed to read macro file: {e}"),
            Some(path.to_path_buf()),
        )
    })?;
    Script::from_yaml_str(&source, Some(path))
}

fn is_script_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

/// Loads every macro in `directory`, indexed by declared name. Files that
/// fail to parse are skipped; a later file with the same name replaces an
/// earlier one.
pub fn load_scripts(directory: impl AsRef<Path>) -> HashMap<String, Script> {
    let directory = directory.as_ref();
    let mut scripts = HashMap::new();

    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Macro directory {:?} not readable: {}", directory, e);
            return scripts;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !is_script_file(&path) {
            continue;
        }
        match load_script(&path) {
            Ok(script) => {
                if let Some(previous) = scripts.insert(script.name.clone(), script) {
                    warn!(
                        "Duplicate macro name '{}'; {:?} replaced by a later file",
                        previous.name, previous.file_path
                    );
                }
            }
            Err(e) => warn!("Skipping invalid macro file: {}", e),
        }
    }

    scripts
}

/// Finds a macro by declared name, trying `<name>.yaml` / `<name>.yml`
/// before scanning the whole directory.
///
/// A `<name>.yaml` file that fails to parse is an error, not a miss.
pub fn find_script(name: &str, directory: impl AsRef<Path>) -> Result<Option<Script>, ParseError> {
    let directory = directory.as_ref();
    for ext in SCRIPT_EXTENSIONS {
        let path = directory.join(format!("{name}.{ext}"));
        if path.is_file() {
            let script = load_script(&path)?;
            if script.name == name {
                return Ok(Some(script));
            }
            debug!("{:?} declares '{}', not '{}'", path, script.name, name);
        }
    }
    Ok(load_scripts(directory).remove(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_parameter() {
        let param = Parameter::from_value(&json!("user"), None).unwrap();
        assert_eq!(param.name, "user");
        assert_eq!(param.param_type, ParamType::String);
        assert!(param.required);
        assert_eq!(param.default, None);
    }

    #[test]
    fn test_parameter_missing_name() {
        let err = Parameter::from_value(&json!({"type": "integer"}), None).unwrap_err();
        assert!(err.message.contains("missing 'name'"));
    }

    #[test]
    fn test_unknown_parameter_type() {
        let err = Parameter::from_value(&json!({"name": "x", "type": "date"}), None).unwrap_err();
        assert!(err.message.contains("unknown type 'date'"));
    }

    #[test]
    fn test_validate_missing_values() {
        let required = Parameter::new("a");
        assert_eq!(
            required.validate(None),
            Err(ValidationError::MissingRequired { name: "a".into() })
        );

        let optional = Parameter {
            required: false,
            ..Parameter::new("b")
        };
        assert_eq!(optional.validate(None), Ok(Value::Null));

        let defaulted = Parameter {
            default: Some(json!(5)),
            ..Parameter::new("c")
        };
        assert_eq!(defaulted.validate(None), Ok(json!(5)));
    }

    #[test]
    fn test_validate_coercions() {
        let int = Parameter {
            param_type: ParamType::Integer,
            ..Parameter::new("n")
        };
        assert_eq!(int.validate(Some(&json!("42"))), Ok(json!(42)));
        let err = int.validate(Some(&json!("abc"))).unwrap_err();
        assert_eq!(err.to_string(), "Parameter 'n' must be an integer");

        let float = Parameter {
            param_type: ParamType::Float,
            ..Parameter::new("f")
        };
        assert_eq!(float.validate(Some(&json!("1.5"))), Ok(json!(1.5)));
        assert!(float.validate(Some(&json!("x"))).is_err());

        let flag = Parameter {
            param_type: ParamType::Boolean,
            ..Parameter::new("flag")
        };
        assert_eq!(flag.validate(Some(&json!("Yes"))), Ok(json!(true)));
        assert_eq!(flag.validate(Some(&json!("off"))), Ok(json!(false)));
        let err = flag.validate(Some(&json!("maybe"))).unwrap_err();
        assert!(err.to_string().contains("'flag'"));
        assert!(err.to_string().contains("boolean"));

        let list = Parameter {
            param_type: ParamType::List,
            ..Parameter::new("items")
        };
        assert_eq!(list.validate(Some(&json!("a, b ,c"))), Ok(json!(["a", "b", "c"])));
        assert_eq!(list.validate(Some(&json!([1, 2]))), Ok(json!([1, 2])));
        assert!(list.validate(Some(&json!(3))).is_err());

        let text = Parameter::new("s");
        assert_eq!(text.validate(Some(&json!(12))), Ok(json!("12")));
    }

    #[test]
    fn test_action_extracts_condition_and_name() {
        let action = Action::from_value(
            &json!({"action": "delay", "if": "x > 1", "name": "wait", "seconds": 2}),
            0,
            None,
        )
        .unwrap();
        assert_eq!(action.action, "delay");
        assert_eq!(action.condition.as_deref(), Some("x > 1"));
        assert_eq!(action.name.as_deref(), Some("wait"));
        assert_eq!(action.args.len(), 1);
        assert_eq!(action.args["seconds"], json!(2));
    }

    #[test]
    fn test_action_missing_kind() {
        let err = Action::from_value(&json!({"seconds": 2}), 3, None).unwrap_err();
        assert_eq!(err.message, "Action at index 3 missing 'action' field");

        let err = Action::from_value(&json!("delay"), 1, None).unwrap_err();
        assert!(err.message.contains("must be a dictionary"));
    }

    #[test]
    fn test_nested_actions_are_checked_but_kept_raw() {
        let ok = Action::from_value(
            &json!({"action": "if", "condition": "true", "then": [{"action": "delay"}]}),
            0,
            None,
        )
        .unwrap();
        assert!(ok.args["then"].is_array());

        let err = Action::from_value(
            &json!({"action": "repeat", "count": 2, "actions": [{"seconds": 1}]}),
            0,
            None,
        )
        .unwrap_err();
        assert!(err.message.contains("in 'actions' missing 'action'"));
    }

    #[test]
    fn test_script_missing_name_carries_path() {
        let path = PathBuf::from("/tmp/broken.yaml");
        let err = Script::from_value(&json!({"actions": []}), Some(&path)).unwrap_err();
        assert_eq!(err.file_path.as_deref(), Some(path.as_path()));
        assert_eq!(err.to_string(), "Macro missing 'name' field in /tmp/broken.yaml");
    }

    #[test]
    fn test_validate_params_drops_undeclared() {
        let script = Script::from_value(
            &json!({"name": "m", "parameters": ["user"]}),
            None,
        )
        .unwrap();
        let mut params = Map::new();
        params.insert("user".into(), json!("john"));
        params.insert("extra".into(), json!(1));
        let validated = script.validate_params(&params).unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated["user"], json!("john"));
    }
}
