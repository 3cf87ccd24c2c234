use serde::{Deserialize, Serialize};

/// Kind of tool offered to the model. Only functions exist today.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// A callable function described by a JSON schema.
    #[default]
    Function,
}

/// Description of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function.
    pub name: String,

    /// What the function does, in words the model will read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// [JSON schema](https://json-schema.org/draft/2020-12) of the arguments.
    pub parameters: serde_json::Value,
}

/// A tool offered to the model in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    /// Always `function`.
    #[serde(rename = "type", default)]
    pub r#type: ToolType,

    /// The function being offered.
    pub function: FunctionDefinition,
}

impl ToolParam {
    /// Create a new function tool with the given argument schema.
    pub fn function(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            r#type: ToolType::Function,
            function: FunctionDefinition {
                name: name.into(),
                description: None,
                parameters,
            },
        }
    }

    /// Add a description to the tool.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.function.description = Some(description.into());
        self
    }

    /// The name the model uses to call this tool.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn tool_param_complete() {
        let tool = ToolParam::function(
            "execute_shell_command",
            json!({
                "type": "object",
                "properties": {
                    "shell_command": {"type": "string"}
                },
                "required": ["shell_command"]
            }),
        )
        .with_description("Run a shell command");

        assert_eq!(tool.name(), "execute_shell_command");
        assert_eq!(
            to_value(&tool).unwrap(),
            json!({
                "type": "function",
                "function": {
                    "name": "execute_shell_command",
                    "description": "Run a shell command",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "shell_command": {"type": "string"}
                        },
                        "required": ["shell_command"]
                    }
                }
            })
        );
    }
}
