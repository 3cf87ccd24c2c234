use serde::{Deserialize, Serialize};

use crate::types::{FinishReason, FunctionCallDelta, MessageRole};

/// One server-sent event of a streamed chat completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier, shared by all chunks of one response.
    #[serde(default)]
    pub id: Option<String>,

    /// Model that produced the chunk.
    #[serde(default)]
    pub model: Option<String>,

    /// Per-choice deltas. Only the first choice is used.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// A chunk carrying a single content fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(content.into()),
                    ..ChunkDelta::default()
                },
                ..ChunkChoice::default()
            }],
            ..Self::default()
        }
    }

    /// A chunk that only reports why generation stopped.
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            choices: vec![ChunkChoice {
                finish_reason: Some(reason),
                ..ChunkChoice::default()
            }],
            ..Self::default()
        }
    }

    /// A chunk carrying a tool-call fragment at `index`.
    pub fn tool_call(
        index: u32,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index,
                        id: None,
                        r#type: None,
                        function: Some(FunctionCallDelta {
                            name: name.map(String::from),
                            arguments: arguments.map(String::from),
                        }),
                    }]),
                    ..ChunkDelta::default()
                },
                ..ChunkChoice::default()
            }],
            ..Self::default()
        }
    }

    /// The first choice, if the server sent one.
    pub fn first_choice(&self) -> Option<&ChunkChoice> {
        self.choices.first()
    }
}

/// A streamed delta for one choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Position of the choice in the response.
    #[serde(default)]
    pub index: u32,

    /// The incremental content.
    #[serde(default)]
    pub delta: ChunkDelta,

    /// Set on the last chunk of the choice.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// The incremental payload of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, sent once at the start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,

    /// A text fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool-call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,

    /// Legacy function-call fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDelta>,
}

/// A fragment of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Which tool call this fragment belongs to.
    #[serde(default)]
    pub index: u32,

    /// Call identifier, sent once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Always `function` when present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Name and argument fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_content_chunk() {
        let json = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]
        }"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(json).unwrap();
        let choice = chunk.first_choice().unwrap();
        assert_eq!(choice.delta.content.as_deref(), Some("Hel"));
        assert_eq!(choice.finish_reason, None);
    }

    #[test]
    fn deserialize_tool_call_chunk() {
        let json = r#"{
            "choices": [{
                "index": 0,
                "delta": {
                    "content": null,
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "execute_shell_command", "arguments": ""}
                    }]
                }
            }]
        }"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(json).unwrap();
        let calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("execute_shell_command")
        );
        assert_eq!(chunk.choices[0].delta.content, None);
    }

    #[test]
    fn finish_chunk() {
        let json = r#"{"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk, ChatCompletionChunk::finish(FinishReason::ToolCalls));
    }
}
