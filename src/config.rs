//! Configuration and command-line arguments.
//!
//! [`Config`] is resolved once at startup from, in order of precedence,
//! environment variables, a YAML file, and built-in defaults. [`Args`] holds the
//! command line.

use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};
use utf8path::Path;

use crate::completion::EngineOptions;
use crate::error::{Error, Result};

/// Environment variable naming an alternate configuration file.
pub const CONFIG_PATH_VARIABLE: &str = "SGPT_CONFIG";

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CACHE_LENGTH: usize = 100;
const DEFAULT_CHAT_TOKEN_LIMIT: usize = 4096;
const DEFAULT_MAX_FUNCTION_ROUNDS: usize = 8;

/// Resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bearer token for the API. Read from the file or environment, never written.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Root of the chat-completions API.
    pub api_base_url: String,
    /// Model used when `--model` is not given.
    pub default_model: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Directory of cached answers.
    pub cache_path: String,
    /// Maximum number of cached answers.
    pub cache_length: usize,
    /// Directory of chat sessions.
    pub chat_cache_path: String,
    /// Token budget of a chat session's history.
    pub chat_token_limit: usize,
    /// Directory of roles.
    pub role_storage_path: String,
    /// Color of plain-text answers.
    pub default_color: String,
    /// Render markdown roles as markdown.
    pub prettify_markdown: bool,
    /// Offer functions to the model.
    pub use_functions: bool,
    /// Show function output in answers.
    pub show_functions_output: bool,
    /// Request whole responses instead of streams.
    pub disable_streaming: bool,
    /// Make execute the default answer to the shell prompt.
    pub default_execute_shell_cmd: bool,
    /// Offer to execute or describe generated shell commands.
    pub shell_interaction: bool,
    /// Operating system named in built-in roles.
    pub os_name: String,
    /// Shell named in built-in roles.
    pub shell_name: String,
    /// Function rounds allowed per request.
    pub max_function_rounds: usize,
}

impl Default for Config {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        let config_dir = dirs::config_dir().unwrap_or_else(|| temp.clone());
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_TIMEOUT_SECS,
            cache_path: temp.join("cache").to_string_lossy().into_owned(),
            cache_length: DEFAULT_CACHE_LENGTH,
            chat_cache_path: temp.join("chat_cache").to_string_lossy().into_owned(),
            chat_token_limit: DEFAULT_CHAT_TOKEN_LIMIT,
            role_storage_path: config_dir
                .join("shell_gpt")
                .join("roles")
                .to_string_lossy()
                .into_owned(),
            default_color: "magenta".to_string(),
            prettify_markdown: true,
            use_functions: true,
            show_functions_output: false,
            disable_streaming: false,
            default_execute_shell_cmd: false,
            shell_interaction: true,
            os_name: detect_os(),
            shell_name: detect_shell(),
            max_function_rounds: DEFAULT_MAX_FUNCTION_ROUNDS,
        }
    }
}

impl Config {
    /// Load the configuration from the process environment and its config file.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_PATH_VARIABLE) {
            Ok(path) => Some(Path::from(path.as_str()).into_owned()),
            Err(_) => default_config_path(),
        };
        Self::from_sources(path.as_ref(), |key| std::env::var(key).ok())
    }

    /// Resolve from `file` (written with defaults if absent) and the variables
    /// returned by `env`.
    pub fn from_sources(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = match file {
            Some(path) if path.is_file() => Self::read(path)?,
            Some(path) => {
                let config = Self::default();
                if let Err(err) = config.write(path) {
                    tracing::warn!(path = path.as_str(), error = %err, "could not write default config");
                }
                config
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| Error::io(format!("failed to open {}", path.as_str()), err))?;
        let config: Self = serde_yaml::from_reader(file)?;
        tracing::debug!(path = path.as_str(), "loaded config");
        Ok(config)
    }

    /// Write this configuration, minus the API key, to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let native: &std::path::Path = path.as_ref();
        if let Some(parent) = native.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create config directory", err))?;
        }
        let file = File::create(path)
            .map_err(|err| Error::io(format!("failed to create {}", path.as_str()), err))?;
        serde_yaml::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn set<T: std::str::FromStr>(
            env: &dyn Fn(&str) -> Option<String>,
            key: &str,
            slot: &mut T,
        ) -> Result<()> {
            if let Some(value) = env(key) {
                *slot = value.trim().parse().map_err(|_| {
                    Error::validation(
                        format!("invalid value {value:?} for {key}"),
                        Some(key.to_string()),
                    )
                })?;
            }
            Ok(())
        }
        let env: &dyn Fn(&str) -> Option<String> = &env;
        if let Some(key) = env("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        set(env, "API_BASE_URL", &mut self.api_base_url)?;
        set(env, "DEFAULT_MODEL", &mut self.default_model)?;
        set(env, "REQUEST_TIMEOUT", &mut self.request_timeout)?;
        set(env, "CACHE_PATH", &mut self.cache_path)?;
        set(env, "CACHE_LENGTH", &mut self.cache_length)?;
        set(env, "CHAT_CACHE_PATH", &mut self.chat_cache_path)?;
        set(env, "CHAT_TOKEN_LIMIT", &mut self.chat_token_limit)?;
        set(env, "ROLE_STORAGE_PATH", &mut self.role_storage_path)?;
        set(env, "DEFAULT_COLOR", &mut self.default_color)?;
        set(env, "PRETTIFY_MARKDOWN", &mut self.prettify_markdown)?;
        set(env, "USE_FUNCTIONS", &mut self.use_functions)?;
        set(env, "SHOW_FUNCTIONS_OUTPUT", &mut self.show_functions_output)?;
        set(env, "DISABLE_STREAMING", &mut self.disable_streaming)?;
        set(env, "DEFAULT_EXECUTE_SHELL_CMD", &mut self.default_execute_shell_cmd)?;
        set(env, "SHELL_INTERACTION", &mut self.shell_interaction)?;
        set(env, "OS_NAME", &mut self.os_name)?;
        set(env, "SHELL_NAME", &mut self.shell_name)?;
        set(env, "MAX_FUNCTION_ROUNDS", &mut self.max_function_rounds)?;
        Ok(())
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Directory of cached answers.
    pub fn cache_dir(&self) -> Path<'static> {
        Path::from(self.cache_path.as_str()).into_owned()
    }

    /// Directory of chat sessions.
    pub fn chat_dir(&self) -> Path<'static> {
        Path::from(self.chat_cache_path.as_str()).into_owned()
    }

    /// Directory of roles.
    pub fn role_dir(&self) -> Path<'static> {
        Path::from(self.role_storage_path.as_str()).into_owned()
    }

    /// Options for the completion engine.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            stream: !self.disable_streaming,
            show_function_output: self.show_functions_output,
            max_function_rounds: self.max_function_rounds,
        }
    }
}

fn default_config_path() -> Option<Path<'static>> {
    let dir = dirs::config_dir()?;
    let path = dir.join("shell_gpt").join("config.yaml");
    Path::try_from(path).ok().map(|p| p.into_owned())
}

fn detect_os() -> String {
    match std::env::consts::OS {
        "linux" => "Linux".to_string(),
        "macos" => "Darwin/MacOS".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

fn detect_shell() -> String {
    if cfg!(windows) {
        if std::env::var_os("PSModulePath").is_some() {
            return "powershell.exe".to_string();
        }
        return "cmd.exe".to_string();
    }
    std::env::var("SHELL")
        .ok()
        .and_then(|shell| shell.rsplit('/').next().map(str::to_string))
        .filter(|shell| !shell.is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

//////////////////////////////////////////////// Args ////////////////////////////////////////////////

/// Command-line arguments for sgpt.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Model to use.
    #[arrrg(optional, "Large language model to use", "MODEL")]
    pub model: Option<String>,

    /// Sampling temperature, parsed by [`Args::temperature`].
    #[arrrg(optional, "Randomness of generated output, 0.0 to 2.0 (default: 0.0)", "TEMP")]
    pub temperature: Option<String>,

    /// Nucleus sampling, parsed by [`Args::top_p`].
    #[arrrg(optional, "Limits highest probable tokens, 0.0 to 1.0 (default: 1.0)", "P")]
    pub top_p: Option<String>,

    #[arrrg(flag, "Generate and execute shell commands")]
    pub shell: bool,

    #[arrrg(flag, "Describe a shell command")]
    pub describe_shell: bool,

    #[arrrg(flag, "Generate only code")]
    pub code: bool,

    #[arrrg(flag, "Do not offer functions to the model")]
    pub no_functions: bool,

    #[arrrg(flag, "Do not read or write the response cache")]
    pub no_cache: bool,

    #[arrrg(flag, "Print markdown answers as plain text")]
    pub no_md: bool,

    #[arrrg(flag, "Open $EDITOR to write the prompt")]
    pub editor: bool,

    #[arrrg(flag, "Do not offer to execute generated shell commands")]
    pub no_interaction: bool,

    #[arrrg(optional, "Follow a conversation with the given chat id", "ID")]
    pub chat: Option<String>,

    #[arrrg(optional, "Start a REPL session with the given chat id", "ID")]
    pub repl: Option<String>,

    #[arrrg(optional, "Print all messages of a chat session", "ID")]
    pub show_chat: Option<String>,

    #[arrrg(flag, "List all chat sessions")]
    pub list_chats: bool,

    #[arrrg(optional, "System role for the model", "NAME")]
    pub role: Option<String>,

    #[arrrg(optional, "Create a role; its instructions are read from stdin", "NAME")]
    pub create_role: Option<String>,

    #[arrrg(optional, "Output label for --create-role (default: Answer)", "LABEL")]
    pub expecting: Option<String>,

    #[arrrg(optional, "Print the instructions of a role", "NAME")]
    pub show_role: Option<String>,

    #[arrrg(flag, "List all roles")]
    pub list_roles: bool,
}

/// What an invocation asks for, after the management options are considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print the chat ids.
    ListChats,
    /// Print one chat session.
    ShowChat(String),
    /// Print the role files.
    ListRoles,
    /// Print one role.
    ShowRole(String),
    /// Store a role whose body comes from stdin.
    CreateRole {
        /// Name of the new role.
        name: String,
        /// Its output label.
        expecting: String,
    },
    /// Ask the model, once or in a REPL.
    Prompt,
}

impl Args {
    /// The management action requested, or [`Action::Prompt`].
    pub fn action(&self) -> Action {
        if self.list_chats {
            Action::ListChats
        } else if let Some(id) = &self.show_chat {
            Action::ShowChat(id.clone())
        } else if self.list_roles {
            Action::ListRoles
        } else if let Some(name) = &self.show_role {
            Action::ShowRole(name.clone())
        } else if let Some(name) = &self.create_role {
            Action::CreateRole {
                name: name.clone(),
                expecting: self.expecting.clone().unwrap_or_else(|| "Answer".to_string()),
            }
        } else {
            Action::Prompt
        }
    }

    /// The sampling temperature.
    pub fn temperature(&self) -> Result<f32> {
        parse_unit(self.temperature.as_deref(), 0.0, 0.0, 2.0, "--temperature")
    }

    /// The nucleus sampling value.
    pub fn top_p(&self) -> Result<f32> {
        parse_unit(self.top_p.as_deref(), 1.0, 0.0, 1.0, "--top-p")
    }

    /// Check the option combination for a prompting run.
    ///
    /// `prompt` is the prompt assembled from arguments and stdin;
    /// `stdin_piped` is true when stdin is not a terminal.
    pub fn validate(&self, prompt: &str, stdin_piped: bool) -> Result<()> {
        let roles = [self.shell, self.describe_shell, self.code]
            .into_iter()
            .filter(|f| *f)
            .count();
        if roles > 1 {
            return Err(Error::validation(
                "only one of --shell, --describe-shell, and --code can be used at a time",
                None,
            ));
        }
        if roles > 0 && self.role.is_some() {
            return Err(Error::validation(
                "--role cannot be combined with --shell, --describe-shell, or --code",
                Some("--role".to_string()),
            ));
        }
        if self.chat.is_some() && self.repl.is_some() {
            return Err(Error::validation(
                "--chat and --repl options cannot be used together",
                Some("--chat".to_string()),
            ));
        }
        if self.editor && stdin_piped {
            return Err(Error::validation(
                "--editor option cannot be used with stdin input",
                Some("--editor".to_string()),
            ));
        }
        if prompt.trim().is_empty() && self.repl.is_none() && !self.editor {
            return Err(Error::validation("missing argument PROMPT", None));
        }
        self.temperature()?;
        self.top_p()?;
        Ok(())
    }
}

fn parse_unit(value: Option<&str>, default: f32, min: f32, max: f32, option: &str) -> Result<f32> {
    let Some(value) = value else {
        return Ok(default);
    };
    let parsed: f32 = value.trim().parse().map_err(|_| {
        Error::validation(
            format!("{value:?} is not a number"),
            Some(option.to_string()),
        )
    })?;
    if !(min..=max).contains(&parsed) {
        return Err(Error::validation(
            format!("{parsed} is not in the range {min} to {max}"),
            Some(option.to_string()),
        ));
    }
    Ok(parsed)
}
