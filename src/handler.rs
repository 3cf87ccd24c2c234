//! The application context.
//!
//! [`App`] is built once per run from a [`Config`] and a [`Transport`], and
//! owns every component a prompt passes through: the role and session stores,
//! the response cache, and the completion engine.

use std::io::Write;
use std::sync::Arc;

use crate::cache::{CachingCompleter, ResponseCache};
use crate::chat::{ChatStore, TEMP_CHAT_ID};
use crate::client::Transport;
use crate::completion::{Completer, CompletionEngine, CompletionRequest};
use crate::config::{Args, Config};
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::render::{
    FenceStripper, Interrupt, MarkdownRenderer, PlainTextRenderer, Rendered, Renderer, render,
    write_history,
};
use crate::role::{DefaultRole, Role, RoleStore};
use crate::types::ChatMessage;

/// Per-invocation knobs for a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOptions {
    /// Model to ask.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling.
    pub top_p: f32,
    /// Read and write the response cache.
    pub caching: bool,
    /// Offer functions to the model, where the role allows it.
    pub functions: bool,
    /// Render markdown roles as markdown.
    pub markdown: bool,
    /// Show text as it streams in.
    pub live: bool,
}

impl TurnOptions {
    /// Combine the configuration with the command line.
    pub fn new(config: &Config, args: &Args) -> Result<Self> {
        Ok(Self {
            model: args
                .model
                .clone()
                .unwrap_or_else(|| config.default_model.clone()),
            temperature: args.temperature()?,
            top_p: args.top_p()?,
            caching: !args.no_cache,
            functions: config.use_functions && !args.no_functions,
            markdown: config.prettify_markdown && !args.no_md,
            live: !config.disable_streaming,
        })
    }
}

///////////////////////////////////////////// Stores /////////////////////////////////////////////

/// The on-disk state that management commands work on.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Chat sessions.
    pub chats: ChatStore,
    /// Roles.
    pub roles: RoleStore,
}

impl Stores {
    /// Open the stores named by `config`, materializing the built-in roles.
    pub fn open(config: &Config) -> Result<Self> {
        let chats = ChatStore::new(&config.chat_dir(), config.chat_token_limit)?;
        let roles = RoleStore::new(&config.role_dir(), &config.shell_name, &config.os_name)?;
        roles.ensure_defaults()?;
        Ok(Self { chats, roles })
    }

    /// Print chat ids, least recently used first.
    pub fn list_chats(&self, out: &mut dyn Write) -> Result<()> {
        for id in self.chats.list_sessions()? {
            writeln!(out, "{id}").map_err(|err| Error::io("failed to write", err))?;
        }
        Ok(())
    }

    /// Print the messages of a chat session.
    pub fn show_chat(&self, chat_id: &str, out: &mut dyn Write, use_color: bool) -> Result<()> {
        let messages = self.chats.read(chat_id)?;
        write_history(out, &messages, use_color).map_err(|err| Error::io("failed to write", err))
    }

    /// Print the role files.
    pub fn list_roles(&self, out: &mut dyn Write) -> Result<()> {
        for path in self.roles.list()? {
            writeln!(out, "{}", path.as_str()).map_err(|err| Error::io("failed to write", err))?;
        }
        Ok(())
    }

    /// Print a role's instructions.
    pub fn show_role(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let role = self.roles.get(name)?;
        writeln!(out, "{role}").map_err(|err| Error::io("failed to write", err))
    }

    /// Store a new role.
    pub fn create_role(&self, name: &str, expecting: &str, body: &str) -> Result<Role> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::validation(
                "role instructions are empty",
                Some("--create-role".to_string()),
            ));
        }
        let role = Role::new(name, body, expecting);
        self.roles.create(&role, false)?;
        Ok(role)
    }

    /// Pick a role from the command line.
    pub fn resolve_role(&self, args: &Args) -> Result<Role> {
        crate::role::resolve(
            &self.roles,
            args.shell,
            args.code,
            args.describe_shell,
            args.role.as_deref(),
        )
    }

    /// Prepare `chat_id` for use with `requested` and return the role to use.
    ///
    /// The ephemeral chat id is emptied first. An existing session rejects a
    /// role other than the one that started it.
    pub fn open_chat(&self, chat_id: &str, requested: Role) -> Result<Role> {
        if chat_id == TEMP_CHAT_ID {
            self.chats.invalidate(chat_id)?;
        }
        self.chats.resolve_role(chat_id, requested, &self.roles)
    }
}

/////////////////////////////////////////////// App ///////////////////////////////////////////////

/// Everything needed to answer prompts.
pub struct App {
    config: Config,
    stores: Stores,
    functions: Arc<FunctionRegistry>,
    completer: Arc<dyn Completer>,
    interrupt: Arc<Interrupt>,
}

impl App {
    /// Wire the components together over `transport`.
    pub fn new(config: Config, stores: Stores, transport: Arc<dyn Transport>) -> Result<Self> {
        let functions = Arc::new(FunctionRegistry::builtin());
        let engine = CompletionEngine::new(transport, Arc::clone(&functions))
            .with_options(config.engine_options());
        let cache = Arc::new(ResponseCache::new(&config.cache_dir(), config.cache_length)?);
        let completer: Arc<dyn Completer> = Arc::new(CachingCompleter::new(engine, cache));
        Ok(Self {
            config,
            stores,
            functions,
            completer,
            interrupt: Arc::new(Interrupt::default()),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The stores.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The signal that, once raised, abandons the answer in flight.
    pub fn interrupt(&self) -> Arc<Interrupt> {
        Arc::clone(&self.interrupt)
    }

    /// The role for describing shell commands.
    pub fn describe_role(&self) -> Result<Role> {
        self.stores.roles.get(DefaultRole::DescribeShell.name())
    }

    /// See [`Stores::open_chat`].
    pub fn open_chat(&self, chat_id: &str, requested: Role) -> Result<Role> {
        self.stores.open_chat(chat_id, requested)
    }

    /// A renderer suited to `role`.
    pub fn renderer(&self, role: &Role, options: &TurnOptions) -> Box<dyn Renderer> {
        if options.markdown && role.wants_markdown() {
            Box::new(MarkdownRenderer::new().with_interrupt(self.interrupt()))
        } else {
            Box::new(
                PlainTextRenderer::new()
                    .with_color(&self.config.default_color)
                    .with_interrupt(self.interrupt()),
            )
        }
    }

    /// Ask the model `prompt` in `role` and render the answer.
    ///
    /// With a `chat_id` the session's history is sent first and the exchange is
    /// appended to it afterwards. Call [`App::open_chat`] before the first turn
    /// of a session. An interrupted answer is not recorded.
    pub async fn handle(
        &self,
        prompt: &str,
        role: &Role,
        chat_id: Option<&str>,
        options: &TurnOptions,
        renderer: &mut dyn Renderer,
    ) -> Result<Rendered> {
        self.interrupt.reset();
        let history = match chat_id {
            Some(id) => self.stores.chats.history(id)?,
            None => Vec::new(),
        };
        let opening = history.is_empty().then(|| role.system_message());
        let user = ChatMessage::user(prompt);
        let mut messages = history;
        messages.extend(opening.clone());
        messages.push(user.clone());

        let functions = (options.functions && role.allows_functions() && !self.functions.is_empty())
            .then(|| self.functions.tools());
        let request = CompletionRequest::new(&options.model, messages)
            .with_temperature(options.temperature)
            .with_top_p(options.top_p)
            .with_functions(functions)
            .with_caching(options.caching);
        tracing::debug!(role = %role.name, chat = ?chat_id, model = %options.model, "handling prompt");

        let stream = tokio::select! {
            biased;
            () = self.interrupt.raised() => {
                renderer.print_interrupted();
                return Ok(Rendered {
                    text: String::new(),
                    interrupted: true,
                });
            }
            stream = self.completer.complete(request) => stream?,
        };
        let filter = role.is_shell().then(FenceStripper::new);
        let rendered = render(stream, renderer, filter, options.live).await?;

        match chat_id {
            Some(id) if !rendered.interrupted => {
                let mut exchange: Vec<ChatMessage> = opening.into_iter().collect();
                exchange.push(user);
                exchange.push(ChatMessage::assistant(rendered.text.clone()));
                self.stores.chats.append_and_persist(id, &exchange)?;
            }
            _ => {}
        }
        Ok(rendered)
    }
}

///////////////////////////////////////// shell interaction /////////////////////////////////////////

/// The answer to the prompt offered after a generated shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAction {
    /// Run the command.
    Execute,
    /// Explain the command.
    Describe,
    /// Do nothing.
    Abort,
}

/// The prompt shown after a generated shell command.
pub const SHELL_ACTION_PROMPT: &str = "[E]xecute, [D]escribe, [A]bort";

/// Interpret an answer to [`SHELL_ACTION_PROMPT`].
///
/// An empty answer picks the default. Unknown answers yield `None`.
pub fn parse_shell_action(input: &str, default_execute: bool) -> Option<ShellAction> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" if default_execute => Some(ShellAction::Execute),
        "" => Some(ShellAction::Abort),
        "e" | "y" => Some(ShellAction::Execute),
        "d" => Some(ShellAction::Describe),
        "a" => Some(ShellAction::Abort),
        _ => None,
    }
}

/// Run `command` through `shell`, inheriting the terminal. Returns the exit code.
pub async fn run_command(shell: &str, command: &str) -> Result<i32> {
    let flag = if shell.eq_ignore_ascii_case("cmd.exe") || shell.eq_ignore_ascii_case("cmd") {
        "/C"
    } else if shell.to_ascii_lowercase().starts_with("powershell") {
        "-Command"
    } else {
        "-c"
    };
    tracing::info!(shell, command, "executing generated command");
    let status = tokio::process::Command::new(shell)
        .arg(flag)
        .arg(command)
        .status()
        .await
        .map_err(|err| Error::io(format!("failed to run {shell}"), err))?;
    Ok(status.code().unwrap_or(1))
}
