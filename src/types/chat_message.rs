use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{FunctionCall, MessageRole};

/// One entry of a conversation, as sent to the API and persisted in chat sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: MessageRole,

    /// The message text. The API sends `null` for pure function-call turns; that
    /// becomes the empty string here.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,

    /// Function name, set on `function` role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Set on assistant messages that requested a function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    /// Create a new `ChatMessage` with the given role and content.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an assistant message recording a function call and no text.
    pub fn assistant_function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Self::new(MessageRole::Assistant, "")
        }
    }

    /// Create a message carrying the result of running `name`.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(MessageRole::Function, content)
        }
    }
}

impl From<&str> for ChatMessage {
    fn from(content: &str) -> Self {
        Self::user(content)
    }
}

impl From<String> for ChatMessage {
    fn from(content: String) -> Self {
        Self::user(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_message_omits_optional_fields() {
        let message = ChatMessage::user("hello");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "user", "content": "hello"})
        );
    }

    #[test]
    fn function_call_message() {
        let message = ChatMessage::assistant_function_call(FunctionCall::new("f", "{}"));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "role": "assistant",
                "content": "",
                "function_call": {"name": "f", "arguments": "{}"}
            })
        );
    }

    #[test]
    fn function_result_message() {
        let message = ChatMessage::function_result("f", "42");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "function", "content": "42", "name": "f"})
        );
    }

    #[test]
    fn null_content_deserializes_to_empty() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":null}"#).unwrap();
        assert_eq!(message.content, "");
        let message: ChatMessage = serde_json::from_str(r#"{"role":"assistant"}"#).unwrap();
        assert_eq!(message.content, "");
    }
}
