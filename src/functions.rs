//! Local functions the model may ask to run.
//!
//! A [`Function`] pairs a JSON-schema description, offered to the model as a
//! tool, with the code that runs when the model calls it.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::observability::{FUNCTION_CALLS, FUNCTION_DURATION, FUNCTION_ERRORS};
use crate::types::ToolParam;

/// Marker that opens every function-call annotation in the output.
///
/// Any response text containing it is a multi-step exchange and never cached.
pub const FUNCTION_CALL_MARKER: &str = "@FunctionCall";

/// A function the model can call.
#[async_trait::async_trait]
pub trait Function: Send + Sync {
    /// The name the model uses to call this function.
    fn name(&self) -> &str;

    /// The tool description sent with completion requests.
    fn tool(&self) -> ToolParam;

    /// Run the function with already-parsed arguments and return its output.
    async fn call(&self, arguments: &Map<String, Value>) -> Result<String>;
}

/// The set of functions offered to the model.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<Arc<dyn Function>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the functions that ship with shellgpt.
    pub fn builtin() -> Self {
        Self::new().with_function(ExecuteShellCommand::new())
    }

    /// Add a function, replacing any function of the same name.
    pub fn with_function(mut self, function: impl Function + 'static) -> Self {
        self.register(Arc::new(function));
        self
    }

    /// Add a function, replacing any function of the same name.
    pub fn register(&mut self, function: Arc<dyn Function>) {
        self.functions.retain(|f| f.name() != function.name());
        self.functions.push(function);
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Function>> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Tool descriptions for every registered function, in registration order.
    pub fn tools(&self) -> Vec<ToolParam> {
        self.functions.iter().map(|f| f.tool()).collect()
    }

    /// True if no functions are registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Run `name` with `arguments`.
    pub async fn call(&self, name: &str, arguments: &Map<String, Value>) -> Result<String> {
        let Some(function) = self.get(name) else {
            FUNCTION_ERRORS.click();
            return Err(Error::function(name, "the model called an unknown function"));
        };
        FUNCTION_CALLS.click();
        let start = Instant::now();
        tracing::info!(function = name, "executing function call");
        let result = function.call(arguments).await;
        FUNCTION_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            FUNCTION_ERRORS.click();
            tracing::warn!(function = name, error = %err, "function call failed");
        }
        result
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.functions.iter().map(|func| func.name()))
            .finish()
    }
}

/// Parse the raw argument text of a function call into a JSON object.
///
/// Empty text means no arguments. Anything else must be a JSON object.
pub fn parse_arguments(name: &str, arguments: &str) -> Result<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::function(
            name,
            format!("arguments must be a JSON object, got {other}"),
        )),
        Err(err) => Err(Error::function(
            name,
            format!("invalid JSON arguments {arguments:?}: {err}"),
        )),
    }
}

/// The line shown to the user when the model calls a function.
///
/// Renders as ``> @FunctionCall `name(key="value")` `` followed by a blank line.
pub fn format_annotation(name: &str, arguments: &Map<String, Value>) -> String {
    let joined = arguments
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}=\"{s}\""),
            other => format!("{key}=\"{other}\""),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("> {FUNCTION_CALL_MARKER} `{name}({joined})` \n\n")
}

/////////////////////////////////////// ExecuteShellCommand ///////////////////////////////////////

/// Runs a shell command on the local machine and reports its exit status and output.
#[derive(Debug, Clone)]
pub struct ExecuteShellCommand {
    shell: String,
}

impl ExecuteShellCommand {
    /// Use `$SHELL`, falling back to `/bin/sh`.
    pub fn new() -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Self { shell }
    }

    /// Use a specific shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ExecuteShellCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Function for ExecuteShellCommand {
    fn name(&self) -> &str {
        "execute_shell_command"
    }

    fn tool(&self) -> ToolParam {
        ToolParam::function(
            self.name(),
            json!({
                "type": "object",
                "properties": {
                    "shell_command": {
                        "type": "string",
                        "description": "Shell command to execute."
                    }
                },
                "required": ["shell_command"]
            }),
        )
        .with_description(
            "Executes a shell command and returns the output (result). \
             Use it when the user asks about the local machine or its files.",
        )
    }

    async fn call(&self, arguments: &Map<String, Value>) -> Result<String> {
        let Some(command) = arguments.get("shell_command").and_then(Value::as_str) else {
            return Err(Error::function(
                self.name(),
                "missing string argument \"shell_command\"",
            ));
        };
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                Error::function(self.name(), format!("could not spawn {}: {err}", self.shell))
            })?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let code = output.status.code().unwrap_or(-1);
        Ok(format!("Exit code: {code}, Output:\n{}", text.trim_end()))
    }
}
