//! End-to-end tests of the application context against a scripted transport.
//! No test touches the network.

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use futures::{StreamExt, stream};
    use shellgpt::chat::TEMP_CHAT_ID;
    use shellgpt::render::{Interrupt, PlainTextRenderer, Renderer};
    use shellgpt::role::{DEFAULT_ROLE, SHELL_ROLE};
    use shellgpt::{
        App, ChatCompletionChunk, ChatCompletionParams, ChatMessage, ChunkStream, Config,
        FinishReason, MessageRole, ResponseCache, Result, Stores, Transport, TurnOptions,
    };

    /// Replays one scripted answer per request and records every request.
    struct RecordingTransport {
        answers: Mutex<VecDeque<Vec<ChatCompletionChunk>>>,
        requests: Mutex<Vec<ChatCompletionParams>>,
    }

    impl RecordingTransport {
        fn new(answers: Vec<Vec<ChatCompletionChunk>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatCompletionParams> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn chat(&self, params: ChatCompletionParams) -> Result<ChunkStream> {
            self.requests.lock().unwrap().push(params);
            let chunks = self.answers.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    /// Sends one chunk, then stays silent until dropped, as a stalled server would.
    struct StallingTransport {
        dropped: Arc<Mutex<bool>>,
    }

    struct DropFlag(Arc<Mutex<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            *self.0.lock().unwrap() = true;
        }
    }

    #[async_trait::async_trait]
    impl Transport for StallingTransport {
        async fn chat(&self, _: ChatCompletionParams) -> Result<ChunkStream> {
            let guard = DropFlag(Arc::clone(&self.dropped));
            let first = stream::iter(vec![Ok(ChatCompletionChunk::text("partial"))]);
            let stalled = stream::pending().map(move |chunk| {
                let _ = &guard;
                chunk
            });
            Ok(Box::pin(first.chain(stalled)))
        }
    }

    /// Raises the interrupt as soon as any text is shown.
    struct InterruptingRenderer {
        interrupt: Arc<Interrupt>,
    }

    impl Renderer for InterruptingRenderer {
        fn print_text(&mut self, text: &str) {
            if !text.is_empty() {
                self.interrupt.trigger();
            }
        }

        fn finish_response(&mut self) {}

        fn interrupt(&self) -> Option<Arc<Interrupt>> {
            Some(Arc::clone(&self.interrupt))
        }
    }

    fn text(parts: &[&str]) -> Vec<ChatCompletionChunk> {
        let mut chunks: Vec<ChatCompletionChunk> =
            parts.iter().map(|p| ChatCompletionChunk::text(*p)).collect();
        chunks.push(ChatCompletionChunk::finish(FinishReason::Stop));
        chunks
    }

    fn app(dir: &tempfile::TempDir, transport: Arc<dyn Transport>) -> App {
        let root = dir.path().to_string_lossy().into_owned();
        let config = Config {
            cache_path: format!("{root}/cache"),
            chat_cache_path: format!("{root}/chat_cache"),
            role_storage_path: format!("{root}/roles"),
            shell_name: "bash".to_string(),
            os_name: "Linux".to_string(),
            ..Config::default()
        };
        let stores = Stores::open(&config).unwrap();
        App::new(config, stores, transport).unwrap()
    }

    fn options(caching: bool) -> TurnOptions {
        TurnOptions {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            caching,
            functions: true,
            markdown: false,
            live: true,
        }
    }

    fn quiet() -> PlainTextRenderer {
        PlainTextRenderer::with_writer(Box::new(std::io::sink()))
    }

    #[tokio::test]
    async fn chat_session_carries_history_into_the_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["ok"]), text(&["4"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let options = options(false);
        let role = app
            .open_chat("demo", app.stores().roles.get(DEFAULT_ROLE).unwrap())
            .unwrap();

        let first = app
            .handle("my number is 2", &role, Some("demo"), &options, &mut quiet())
            .await
            .unwrap();
        assert_eq!(first.text, "ok");
        let second = app
            .handle("my number + 2?", &role, Some("demo"), &options, &mut quiet())
            .await
            .unwrap();
        assert_eq!(second.text, "4");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].messages,
            vec![
                role.system_message(),
                ChatMessage::user("my number is 2"),
                ChatMessage::assistant("ok"),
                ChatMessage::user("my number + 2?"),
            ]
        );
        let stored = app.stores().chats.read("demo").unwrap();
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[4], ChatMessage::assistant("4"));
    }

    #[tokio::test]
    async fn identical_prompt_is_answered_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["Par", "is"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let role = app.stores().roles.get(DEFAULT_ROLE).unwrap();
        let options = options(true);

        let first = app
            .handle("capital of France?", &role, None, &options, &mut quiet())
            .await
            .unwrap();
        let second = app
            .handle("capital of France?", &role, None, &options, &mut quiet())
            .await
            .unwrap();
        assert_eq!(first.text, "Paris");
        assert_eq!(second.text, first.text);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn different_temperature_misses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["a"]), text(&["b"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let role = app.stores().roles.get(DEFAULT_ROLE).unwrap();
        let cold = options(true);
        let warm = TurnOptions {
            temperature: 0.9,
            ..options(true)
        };
        app.handle("hi", &role, None, &cold, &mut quiet())
            .await
            .unwrap();
        let second = app
            .handle("hi", &role, None, &warm, &mut quiet())
            .await
            .unwrap();
        assert_eq!(second.text, "b");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn incompatible_role_fails_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["ok"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let roles = &app.stores().roles;
        let shell = roles.get(SHELL_ROLE).unwrap();
        let role = app.open_chat("demo", shell.clone()).unwrap();
        app.handle("list files", &role, Some("demo"), &options(false), &mut quiet())
            .await
            .unwrap();

        let code = roles.get(shellgpt::role::CODE_ROLE).unwrap();
        let err = app.open_chat("demo", code).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(transport.requests().len(), 1);

        let adopted = app
            .open_chat("demo", roles.get(DEFAULT_ROLE).unwrap())
            .unwrap();
        assert_eq!(adopted, shell);
    }

    #[tokio::test]
    async fn shell_answers_are_unfenced_and_offer_no_functions() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["``", "`bash\nls", " -la\n`", "``"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let shell = app.stores().roles.get(SHELL_ROLE).unwrap();
        let rendered = app
            .handle("list files", &shell, None, &options(false), &mut quiet())
            .await
            .unwrap();
        assert_eq!(rendered.text, "ls -la");
        assert_eq!(transport.requests()[0].tools, None);
    }

    #[tokio::test]
    async fn temporary_chat_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![text(&["ok"])]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let role = app.stores().roles.get(DEFAULT_ROLE).unwrap();
        app.stores()
            .chats
            .append_and_persist(
                TEMP_CHAT_ID,
                &[role.system_message(), ChatMessage::user("stale")],
            )
            .unwrap();

        let role = app.open_chat(TEMP_CHAT_ID, role).unwrap();
        assert!(app.stores().chats.read(TEMP_CHAT_ID).unwrap().is_empty());
        app.handle("fresh", &role, Some(TEMP_CHAT_ID), &options(false), &mut quiet())
            .await
            .unwrap();
        assert_eq!(
            transport.requests()[0].messages,
            vec![role.system_message(), ChatMessage::user("fresh")]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn function_call_feeds_its_result_back() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![
            vec![
                ChatCompletionChunk::tool_call(0, Some("execute_shell_command"), None),
                ChatCompletionChunk::tool_call(0, None, Some("{\"shell_command\":")),
                ChatCompletionChunk::tool_call(0, None, Some(" \"echo hi\"}")),
                ChatCompletionChunk::finish(FinishReason::ToolCalls),
            ],
            text(&["It printed hi."]),
        ]);
        let app = app(&dir, Arc::clone(&transport) as Arc<dyn Transport>);
        let role = app.stores().roles.get(DEFAULT_ROLE).unwrap();
        let rendered = app
            .handle("run echo hi", &role, None, &options(true), &mut quiet())
            .await
            .unwrap();
        assert_eq!(
            rendered.text,
            "\n> @FunctionCall `execute_shell_command(shell_command=\"echo hi\")` \n\nIt printed hi."
        );

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tools.is_some());
        let continuation = &requests[1].messages;
        assert_eq!(continuation.len(), 4);
        assert_eq!(continuation[2].role, MessageRole::Assistant);
        assert_eq!(
            continuation[2].function_call.as_ref().unwrap().name,
            "execute_shell_command"
        );
        assert_eq!(continuation[3].role, MessageRole::Function);
        assert_eq!(continuation[3].content, "Exit code: 0, Output:\nhi");

        // Answers that called a function are not cached, so asking again asks the model.
        let again = app
            .handle("run echo hi", &role, None, &options(true), &mut quiet())
            .await;
        assert!(again.is_ok());
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn interrupt_abandons_a_stalled_answer() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = Arc::new(Mutex::new(false));
        let transport = Arc::new(StallingTransport {
            dropped: Arc::clone(&dropped),
        });
        let app = app(&dir, transport);
        let role = app
            .open_chat("demo", app.stores().roles.get(DEFAULT_ROLE).unwrap())
            .unwrap();
        let mut renderer = InterruptingRenderer {
            interrupt: app.interrupt(),
        };

        let rendered = app
            .handle("tell me a story", &role, Some("demo"), &options(true), &mut renderer)
            .await
            .unwrap();
        assert!(rendered.interrupted);
        assert_eq!(rendered.text, "partial");
        assert!(*dropped.lock().unwrap());
        assert!(app.stores().chats.read("demo").unwrap().is_empty());
        let cache = ResponseCache::new(&app.config().cache_dir(), 100).unwrap();
        assert!(cache.is_empty().unwrap());
    }
}
