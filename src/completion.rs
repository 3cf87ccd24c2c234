//! The completion engine: turns one logical request into a stream of text.
//!
//! A request may take several round trips to the model. When the model stops
//! to have a function run, the engine records the call, runs the function,
//! appends its result to the conversation, and asks again. The caller sees a
//! single stream of text spanning all rounds.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, Stream, StreamExt};

use crate::client::{ChunkStream, Transport};
use crate::error::{Error, Result};
use crate::functions::{FunctionRegistry, format_annotation, parse_arguments};
use crate::observability::COMPLETION_ROUNDS;
use crate::types::{
    ChatCompletionChunk, ChatCompletionParams, ChatMessage, FunctionCall, FunctionCallDelta,
    ToolParam,
};

/// A boxed stream of response text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// How an answer came about, filled in by the engine while its stream runs.
#[derive(Debug, Default)]
pub struct Trace {
    function_calls: AtomicUsize,
}

impl Trace {
    pub fn record_function_call(&self) {
        self.function_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Functions run so far for this answer.
    pub fn function_calls(&self) -> usize {
        self.function_calls.load(Ordering::Relaxed)
    }
}

/// Everything that determines a model answer, plus whether it may be cached.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// The conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Functions offered to the model; `None` disables function calling.
    pub functions: Option<Vec<ToolParam>>,
    /// Whether a response cache may answer or record this request.
    pub caching: bool,
    /// Shared with whoever issued the request; not part of the answer.
    pub trace: Arc<Trace>,
}

impl CompletionRequest {
    /// A request with default sampling, no functions, and caching enabled.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            top_p: 1.0,
            messages,
            functions: None,
            caching: true,
            trace: Arc::new(Trace::default()),
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

    /// Offer functions to the model.
    pub fn with_functions(mut self, functions: Option<Vec<ToolParam>>) -> Self {
        self.functions = functions;
        self
    }

    /// Allow or forbid caching.
    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }
}

/// Produces the text of a model answer.
#[async_trait::async_trait]
pub trait Completer: Send + Sync {
    /// Start answering `request`. The stream is finite and cannot be restarted.
    async fn complete(&self, request: CompletionRequest) -> Result<TextStream>;
}

#[async_trait::async_trait]
impl<C: Completer + ?Sized> Completer for Arc<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<TextStream> {
        self.as_ref().complete(request).await
    }
}

/// Knobs for [`CompletionEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Ask the server for server-sent events instead of one response.
    pub stream: bool,
    /// Echo each function's output into the response text.
    pub show_function_output: bool,
    /// How many function rounds one request may take before failing.
    pub max_function_rounds: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stream: true,
            show_function_output: false,
            max_function_rounds: 8,
        }
    }
}

/// A [`Completer`] that talks to a [`Transport`] and resolves function calls.
pub struct CompletionEngine {
    transport: Arc<dyn Transport>,
    functions: Arc<FunctionRegistry>,
    options: EngineOptions,
}

impl CompletionEngine {
    /// Create an engine over `transport` able to run `functions`.
    pub fn new(transport: Arc<dyn Transport>, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            transport,
            functions,
            options: EngineOptions::default(),
        }
    }

    /// Replace the engine options.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// The current options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

#[async_trait::async_trait]
impl Completer for CompletionEngine {
    async fn complete(&self, request: CompletionRequest) -> Result<TextStream> {
        let mut turn = Turn {
            transport: Arc::clone(&self.transport),
            functions: Arc::clone(&self.functions),
            options: self.options.clone(),
            model: request.model,
            temperature: request.temperature,
            top_p: request.top_p,
            tools: request.functions,
            messages: request.messages,
            upstream: None,
            pending: VecDeque::new(),
            calls: BTreeMap::new(),
            function_rounds: 0,
            trace: request.trace,
            failure: None,
            finished: false,
        };
        turn.open().await?;
        Ok(Box::pin(stream::unfold(turn, |mut turn| async move {
            turn.next_item().await.map(|item| (item, turn))
        })))
    }
}

/////////////////////////////////////////////// Turn ///////////////////////////////////////////////

/// State of one logical request across however many rounds it takes.
struct Turn {
    transport: Arc<dyn Transport>,
    functions: Arc<FunctionRegistry>,
    options: EngineOptions,
    model: String,
    temperature: f32,
    top_p: f32,
    tools: Option<Vec<ToolParam>>,
    messages: Vec<ChatMessage>,
    upstream: Option<ChunkStream>,
    pending: VecDeque<String>,
    // Keyed by tool-call index so fragments of parallel calls stay apart.
    calls: BTreeMap<u32, FunctionCall>,
    function_rounds: usize,
    trace: Arc<Trace>,
    failure: Option<Error>,
    finished: bool,
}

impl Turn {
    fn params(&self) -> ChatCompletionParams {
        ChatCompletionParams::new(self.model.clone(), self.messages.clone())
            .with_temperature(self.temperature)
            .with_top_p(self.top_p)
            .with_tools(self.tools.clone())
            .with_stream(self.options.stream)
    }

    async fn open(&mut self) -> Result<()> {
        COMPLETION_ROUNDS.click();
        tracing::debug!(
            model = %self.model,
            messages = self.messages.len(),
            round = self.function_rounds,
            "requesting completion"
        );
        self.upstream = Some(self.transport.chat(self.params()).await?);
        Ok(())
    }

    fn fail(&mut self, err: Error) {
        self.upstream = None;
        self.finished = true;
        self.failure = Some(err);
    }

    async fn next_item(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(text) = self.pending.pop_front() {
                return Some(Ok(text));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }
            let Some(upstream) = self.upstream.as_mut() else {
                if let Err(err) = self.open().await {
                    self.fail(err);
                }
                continue;
            };
            let next = upstream.next().await;
            match next {
                Some(Ok(chunk)) => {
                    if let Err(err) = self.absorb(chunk).await {
                        self.fail(err);
                    }
                }
                Some(Err(err)) => self.fail(err),
                None => {
                    self.upstream = None;
                    if self.calls.is_empty() {
                        self.finished = true;
                    } else if let Err(err) = self.run_calls().await {
                        self.fail(err);
                    }
                }
            }
        }
    }

    async fn absorb(&mut self, chunk: ChatCompletionChunk) -> Result<()> {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };
        let delta = choice.delta;
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.pending.push_back(content);
        }
        if let Some(fragment) = delta.function_call {
            self.accumulate(0, fragment);
        }
        for call in delta.tool_calls.unwrap_or_default() {
            if let Some(fragment) = call.function {
                self.accumulate(call.index, fragment);
            }
        }
        if choice.finish_reason.is_some_and(|r| r.is_function_call()) {
            self.upstream = None;
            self.run_calls().await?;
        }
        Ok(())
    }

    fn accumulate(&mut self, index: u32, fragment: FunctionCallDelta) {
        let call = self.calls.entry(index).or_default();
        if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
            call.name = name;
        }
        if let Some(arguments) = fragment.arguments {
            call.arguments.push_str(&arguments);
        }
    }

    async fn run_calls(&mut self) -> Result<()> {
        let calls = std::mem::take(&mut self.calls);
        if calls.is_empty() {
            self.finished = true;
            return Ok(());
        }
        self.function_rounds += 1;
        if self.function_rounds > self.options.max_function_rounds {
            let name = calls
                .values()
                .next()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            return Err(Error::function(
                name,
                format!(
                    "the model kept calling functions after {} rounds",
                    self.options.max_function_rounds
                ),
            ));
        }
        for call in calls.into_values() {
            self.messages
                .push(ChatMessage::assistant_function_call(call.clone()));
            let arguments = parse_arguments(&call.name, &call.arguments)?;
            self.pending.push_back("\n".to_string());
            self.pending
                .push_back(format_annotation(&call.name, &arguments));
            let output = self.functions.call(&call.name, &arguments).await?;
            self.trace.record_function_call();
            if self.options.show_function_output {
                self.pending.push_back(format!("```text\n{output}\n```\n"));
            }
            self.messages
                .push(ChatMessage::function_result(call.name, output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Function;
    use crate::types::{FinishReason, MessageRole};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays one scripted chunk list per request and records every request.
    struct ScriptedTransport {
        rounds: Mutex<VecDeque<Vec<ChatCompletionChunk>>>,
        requests: Mutex<Vec<ChatCompletionParams>>,
    }

    impl ScriptedTransport {
        fn new(rounds: Vec<Vec<ChatCompletionChunk>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatCompletionParams> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn chat(&self, params: ChatCompletionParams) -> Result<ChunkStream> {
            self.requests.lock().unwrap().push(params);
            let chunks = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::bad_request("no scripted round left", None))?;
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Function for Echo {
        fn name(&self) -> &str {
            "f"
        }

        fn tool(&self) -> ToolParam {
            ToolParam::function("f", json!({"type": "object"}))
        }

        async fn call(&self, arguments: &Map<String, Value>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("x was {}", arguments["x"].as_str().unwrap_or("?")))
        }
    }

    async fn collect(stream: TextStream) -> Result<String> {
        let parts: Vec<Result<String>> = stream.collect().await;
        parts.into_iter().collect::<Result<Vec<_>>>().map(|p| p.concat())
    }

    fn tool_call_round() -> Vec<ChatCompletionChunk> {
        vec![
            ChatCompletionChunk::tool_call(0, Some("f"), Some("{\"x\": ")),
            ChatCompletionChunk::tool_call(0, None, Some("\"1\"}")),
            ChatCompletionChunk::finish(FinishReason::ToolCalls),
        ]
    }

    #[tokio::test]
    async fn plain_text_is_streamed_through() {
        let transport = ScriptedTransport::new(vec![vec![
            ChatCompletionChunk::text("Hello"),
            ChatCompletionChunk::text(", world"),
            ChatCompletionChunk::finish(FinishReason::Stop),
        ]]);
        let engine = CompletionEngine::new(transport.clone(), Arc::new(FunctionRegistry::new()));
        let stream = engine
            .complete(CompletionRequest::new("gpt-4o", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(collect(stream).await.unwrap(), "Hello, world");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn function_call_round_trip() {
        let transport = ScriptedTransport::new(vec![
            tool_call_round(),
            vec![
                ChatCompletionChunk::text("done"),
                ChatCompletionChunk::finish(FinishReason::Stop),
            ],
        ]);
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut registry = FunctionRegistry::new();
        registry.register(echo.clone());
        let engine = CompletionEngine::new(transport.clone(), Arc::new(registry));

        let request = CompletionRequest::new("gpt-4o", vec![ChatMessage::user("run f")])
            .with_functions(Some(vec![echo.tool()]));
        let trace = Arc::clone(&request.trace);
        let text = collect(engine.complete(request).await.unwrap())
            .await
            .unwrap();

        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(trace.function_calls(), 1);
        assert_eq!(text, "\n> @FunctionCall `f(x=\"1\")` \n\ndone");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let continuation = &requests[1].messages;
        assert_eq!(continuation.len(), 3);
        assert_eq!(
            continuation[1],
            ChatMessage::assistant_function_call(FunctionCall::new("f", "{\"x\": \"1\"}"))
        );
        assert_eq!(continuation[2].role, MessageRole::Function);
        assert_eq!(continuation[2].name.as_deref(), Some("f"));
        assert_eq!(continuation[2].content, "x was 1");
        assert!(requests[1].tools.is_some());
    }

    #[tokio::test]
    async fn function_output_is_shown_when_enabled() {
        let transport = ScriptedTransport::new(vec![
            tool_call_round(),
            vec![ChatCompletionChunk::finish(FinishReason::Stop)],
        ]);
        let registry = FunctionRegistry::new().with_function(Echo {
            calls: AtomicUsize::new(0),
        });
        let engine = CompletionEngine::new(transport, Arc::new(registry)).with_options(
            EngineOptions {
                show_function_output: true,
                ..EngineOptions::default()
            },
        );
        let text = collect(
            engine
                .complete(CompletionRequest::new("m", vec![ChatMessage::user("q")]))
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert!(text.ends_with("```text\nx was 1\n```\n"));
    }

    #[tokio::test]
    async fn malformed_arguments_fail() {
        let transport = ScriptedTransport::new(vec![vec![
            ChatCompletionChunk::tool_call(0, Some("f"), Some("{\"x\": ")),
            ChatCompletionChunk::finish(FinishReason::ToolCalls),
        ]]);
        let registry = FunctionRegistry::new().with_function(Echo {
            calls: AtomicUsize::new(0),
        });
        let engine = CompletionEngine::new(transport.clone(), Arc::new(registry));
        let stream = engine
            .complete(CompletionRequest::new("m", vec![ChatMessage::user("q")]))
            .await
            .unwrap();
        let err = collect(stream).await.unwrap_err();
        assert!(err.is_function());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn function_rounds_are_bounded() {
        let transport = ScriptedTransport::new(vec![tool_call_round(); 4]);
        let registry = FunctionRegistry::new().with_function(Echo {
            calls: AtomicUsize::new(0),
        });
        let engine = CompletionEngine::new(transport.clone(), Arc::new(registry)).with_options(
            EngineOptions {
                max_function_rounds: 2,
                ..EngineOptions::default()
            },
        );
        let stream = engine
            .complete(CompletionRequest::new("m", vec![ChatMessage::user("q")]))
            .await
            .unwrap();
        let err = collect(stream).await.unwrap_err();
        assert!(err.is_function());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn upstream_error_on_first_request_is_returned() {
        let transport = ScriptedTransport::new(vec![]);
        let engine = CompletionEngine::new(transport, Arc::new(FunctionRegistry::new()));
        let result = engine
            .complete(CompletionRequest::new("m", vec![ChatMessage::user("q")]))
            .await;
        assert!(result.is_err());
    }
}
