use serde::{Deserialize, Serialize};

use crate::types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FinishReason, FunctionCall, FunctionCallDelta,
    ToolCallDelta,
};

/// A complete (non-streamed) chat completion response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Completion identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// Model that produced the response.
    #[serde(default)]
    pub model: Option<String>,

    /// The generated choices.
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

/// One generated choice of a complete response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Position of the choice in the response.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ResponseMessage,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// The assistant message of a complete response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// The generated text.
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Legacy function call requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

/// A whole tool call from a complete response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier.
    #[serde(default)]
    pub id: Option<String>,

    /// The function to run.
    pub function: FunctionCall,
}

impl ChatCompletion {
    /// Express this response as the single chunk a stream would have produced.
    pub fn into_chunk(self) -> ChatCompletionChunk {
        let choices = self
            .choices
            .into_iter()
            .take(1)
            .map(|choice| {
                let tool_calls = choice.message.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .enumerate()
                        .map(|(index, call)| ToolCallDelta {
                            index: index as u32,
                            id: call.id,
                            r#type: Some("function".to_string()),
                            function: Some(FunctionCallDelta {
                                name: Some(call.function.name),
                                arguments: Some(call.function.arguments),
                            }),
                        })
                        .collect()
                });
                ChunkChoice {
                    index: choice.index,
                    delta: ChunkDelta {
                        role: None,
                        content: choice.message.content,
                        tool_calls,
                        function_call: choice.message.function_call.map(|call| {
                            FunctionCallDelta {
                                name: Some(call.name),
                                arguments: Some(call.arguments),
                            }
                        }),
                    },
                    finish_reason: choice.finish_reason,
                }
            })
            .collect();
        ChatCompletionChunk {
            id: self.id,
            model: self.model,
            choices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_response_becomes_one_chunk() {
        let json = r#"{
            "id": "chatcmpl-9",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }]
        }"#;
        let completion: ChatCompletion = serde_json::from_str(json).unwrap();
        let chunk = completion.into_chunk();
        let choice = chunk.first_choice().unwrap();
        assert_eq!(choice.delta.content.as_deref(), Some("hello"));
        assert_eq!(choice.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn tool_calls_keep_their_order() {
        let json = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "f", "arguments": "{}"}},
                        {"id": "b", "type": "function", "function": {"name": "g", "arguments": "{}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let completion: ChatCompletion = serde_json::from_str(json).unwrap();
        let chunk = completion.into_chunk();
        let calls = chunk.choices[0].delta.tool_calls.clone().unwrap();
        assert_eq!(calls[0].index, 0);
        assert_eq!(calls[1].index, 1);
        assert_eq!(calls[1].function.as_ref().unwrap().name.as_deref(), Some("g"));
    }
}
