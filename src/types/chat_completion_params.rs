use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ToolParam};

/// Request body for `POST chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionParams {
    /// Model identifier.
    pub model: String,

    /// The conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature in `[0, 2]`.
    pub temperature: f32,

    /// Nucleus sampling mass in `[0, 1]`.
    pub top_p: f32,

    /// Whether the server should answer with server-sent events.
    #[serde(default)]
    pub stream: bool,

    /// Functions the model may call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolParam>>,
}

impl ChatCompletionParams {
    /// Create streaming parameters with the API's default sampling.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            top_p: 1.0,
            stream: true,
            tools: None,
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top-p.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Offer tools to the model. An empty list is sent as no tools at all.
    pub fn with_tools(mut self, tools: Option<Vec<ToolParam>>) -> Self {
        self.tools = tools.filter(|t| !t.is_empty());
        self
    }

    /// Set whether to stream.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialization_without_tools() {
        let params = ChatCompletionParams::new("gpt-4o", vec![ChatMessage::user("hi")])
            .with_temperature(0.5)
            .with_tools(Some(vec![]));
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.5,
                "top_p": 1.0,
                "stream": true
            })
        );
    }
}
