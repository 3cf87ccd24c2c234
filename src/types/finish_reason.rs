use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reasons why the model stopped generating a choice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model reached a natural stopping point
    Stop,

    /// The response reached the maximum token limit
    Length,

    /// The model wants one or more tools to run
    ToolCalls,

    /// The model wants a function to run (legacy functions API)
    FunctionCall,

    /// Content was omitted by a content filter
    ContentFilter,

    /// A reason this crate does not know about
    #[serde(other)]
    Other,
}

impl FinishReason {
    /// True when the model stopped to have a function executed.
    pub fn is_function_call(&self) -> bool {
        matches!(self, FinishReason::ToolCalls | FinishReason::FunctionCall)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::FunctionCall => write!(f, "function_call"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Other => write!(f, "other"),
        }
    }
}

/// Error returned when parsing an invalid finish reason string.
#[derive(Debug)]
pub struct FinishReasonParseError {
    /// The invalid string value that could not be parsed.
    pub invalid_value: String,
}

impl fmt::Display for FinishReasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown finish reason: {}", self.invalid_value)
    }
}

impl std::error::Error for FinishReasonParseError {}

impl FromStr for FinishReason {
    type Err = FinishReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(FinishReason::Stop),
            "length" => Ok(FinishReason::Length),
            "tool_calls" => Ok(FinishReason::ToolCalls),
            "function_call" => Ok(FinishReason::FunctionCall),
            "content_filter" => Ok(FinishReason::ContentFilter),
            _ => Err(FinishReasonParseError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialization() {
        let reason: FinishReason = serde_json::from_str(r#""tool_calls""#).unwrap();
        assert_eq!(reason, FinishReason::ToolCalls);
        assert!(reason.is_function_call());

        let reason: FinishReason = serde_json::from_str(r#""stop""#).unwrap();
        assert!(!reason.is_function_call());
    }

    #[test]
    fn unknown_reason_is_tolerated() {
        let reason: FinishReason = serde_json::from_str(r#""something_new""#).unwrap();
        assert_eq!(reason, FinishReason::Other);
        assert!("something_new".parse::<FinishReason>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(FinishReason::FunctionCall.to_string(), "function_call");
        assert_eq!(FinishReason::ContentFilter.to_string(), "content_filter");
    }
}
