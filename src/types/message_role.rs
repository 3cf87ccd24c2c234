use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The author of a chat message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions that frame the conversation.
    System,

    /// Text written by the person at the terminal.
    User,

    /// Text produced by the model.
    Assistant,

    /// The output of a function the model asked to run.
    Function,

    /// The output of a tool call, as newer APIs name it.
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Function => write!(f, "function"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Error returned when parsing an invalid message role string.
#[derive(Debug)]
pub struct MessageRoleParseError {
    /// The invalid string value that could not be parsed.
    pub invalid_value: String,
}

impl fmt::Display for MessageRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown message role: {}", self.invalid_value)
    }
}

impl std::error::Error for MessageRoleParseError {}

impl FromStr for MessageRole {
    type Err = MessageRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "function" => Ok(MessageRole::Function),
            "tool" => Ok(MessageRole::Tool),
            _ => Err(MessageRoleParseError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
        let role: MessageRole = serde_json::from_str(r#""function""#).unwrap();
        assert_eq!(role, MessageRole::Function);
    }

    #[test]
    fn from_str() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        let err = "moderator".parse::<MessageRole>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown message role: moderator");
    }
}
