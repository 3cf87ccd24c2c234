use serde::{Deserialize, Serialize};

/// A function invocation requested by the model.
///
/// `arguments` is the raw JSON text the model produced; it is only parsed when
/// the call is executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to run.
    pub name: String,

    /// JSON-encoded arguments.
    pub arguments: String,
}

impl FunctionCall {
    /// Create a new `FunctionCall`.
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A fragment of a function call as it arrives in a streamed delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    /// Name fragment; usually sent whole in the first delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Arguments fragment, to be concatenated in arrival order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_serialization() {
        let call = FunctionCall::new("execute_shell_command", r#"{"shell_command":"ls"}"#);
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "name": "execute_shell_command",
                "arguments": "{\"shell_command\":\"ls\"}"
            })
        );
    }

    #[test]
    fn delta_fields_are_optional() {
        let delta: FunctionCallDelta = serde_json::from_str(r#"{"arguments":"{\"a"}"#).unwrap();
        assert_eq!(delta.name, None);
        assert_eq!(delta.arguments.as_deref(), Some("{\"a"));
    }
}
