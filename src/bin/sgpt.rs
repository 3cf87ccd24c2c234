//! Command-line assistant for large language models.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question
//! sgpt "what is the capital of France"
//!
//! # Generate a shell command, then execute or describe it
//! sgpt --shell "find all rust files larger than 1MB"
//!
//! # Continue a conversation
//! sgpt --chat demo "my number is 2"
//! sgpt --chat demo "my number + 2?"
//!
//! # Interactive session
//! sgpt --repl temp
//!
//! # Piped input is prepended to the prompt
//! git diff | sgpt "write a commit message"
//! ```
//!
//! Set `SGPT_LOG` (e.g. `SGPT_LOG=debug`) for diagnostics on stderr.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use shellgpt::chat::{MultilineBuffer, ReplCommand, TEMP_CHAT_ID, help_text, parse_command};
use shellgpt::handler::{SHELL_ACTION_PROMPT, ShellAction, parse_shell_action, run_command};
use shellgpt::render::Interrupt;
use shellgpt::{Action, App, Args, Config, Error, OpenAi, Result, Role, Stores, TurnOptions};

const USAGE: &str = "sgpt [OPTIONS] [PROMPT...]";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SGPT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let (args, free) = Args::from_command_line_relaxed(USAGE);
    if let Err(err) = run(args, free).await {
        eprintln!("{err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(args: Args, free: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let stdin_piped = !io::stdin().is_terminal();
    let mut stdout = io::stdout();

    match args.action() {
        Action::ListChats => return Stores::open(&config)?.list_chats(&mut stdout),
        Action::ShowChat(id) => {
            let use_color = stdout.is_terminal();
            return Stores::open(&config)?.show_chat(&id, &mut stdout, use_color);
        }
        Action::ListRoles => return Stores::open(&config)?.list_roles(&mut stdout),
        Action::ShowRole(name) => return Stores::open(&config)?.show_role(&name, &mut stdout),
        Action::CreateRole { name, expecting } => {
            if !stdin_piped {
                eprintln!("Enter the role's instructions, then press Ctrl+D:");
            }
            let body = read_stdin()?;
            Stores::open(&config)?.create_role(&name, &expecting, &body)?;
            return Ok(());
        }
        Action::Prompt => {}
    }

    let mut prompt = free.join(" ");
    if stdin_piped && args.repl.is_none() {
        let piped = read_stdin()?;
        prompt = if prompt.is_empty() {
            piped
        } else {
            format!("{piped}\n\n{prompt}")
        };
    }
    args.validate(&prompt, stdin_piped)?;
    if args.editor {
        prompt = edit_prompt()?;
    }

    // Usage errors surface before the API key is needed.
    let stores = Stores::open(&config)?;
    let options = TurnOptions::new(&config, &args)?;
    let role = stores.resolve_role(&args)?;
    let chat_id = args.repl.as_deref().or(args.chat.as_deref());
    let role = match chat_id {
        Some(id) => stores.open_chat(id, role)?,
        None => role,
    };

    let transport = OpenAi::with_options(
        config.api_key.clone(),
        Some(config.api_base_url.clone()),
        Some(config.timeout()),
    )?;
    let app = App::new(config, stores, Arc::new(transport))?;
    install_interrupt_handler(app.interrupt())?;
    let interaction =
        app.config().shell_interaction && !args.no_interaction && io::stdin().is_terminal();

    if let Some(chat_id) = &args.repl {
        return repl(&app, chat_id, role, &options, &prompt).await;
    }

    let mut renderer = app.renderer(&role, &options);
    let rendered = app
        .handle(&prompt, &role, args.chat.as_deref(), &options, renderer.as_mut())
        .await?;
    if role.is_shell() && interaction && !rendered.interrupted {
        offer_shell_actions(&app, &options, &rendered.text).await?;
    }
    Ok(())
}

/// Raise the interrupt on Ctrl+C; a second Ctrl+C before the next turn exits.
fn install_interrupt_handler(interrupt: Arc<Interrupt>) -> Result<()> {
    ctrlc::set_handler(move || {
        if interrupt.trigger() {
            std::process::exit(130);
        }
    })
    .map_err(|err| Error::io("failed to install Ctrl+C handler", io::Error::other(err)))
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .map_err(|err| Error::io("failed to read stdin", err))?;
    Ok(text)
}

/// Let the user write the prompt in `$EDITOR`. The temporary file is removed
/// when the guard drops, whichever way this returns.
fn edit_prompt() -> Result<String> {
    let file = tempfile::Builder::new()
        .prefix("sgpt-")
        .suffix(".txt")
        .tempfile()
        .map_err(|err| Error::io("failed to create a temporary file", err))?;
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or("vim");
    let status = std::process::Command::new(program)
        .args(words)
        .arg(file.path())
        .status()
        .map_err(|err| Error::io(format!("failed to run {program}"), err))?;
    if !status.success() {
        return Err(Error::validation(
            format!("{program} exited with {status}"),
            Some("--editor".to_string()),
        ));
    }
    let text = std::fs::read_to_string(file.path())
        .map_err(|err| Error::io("failed to read the edited prompt", err))?;
    if text.trim().is_empty() {
        return Err(Error::validation(
            "could not get valid text from the editor",
            Some("--editor".to_string()),
        ));
    }
    Ok(text)
}

async fn describe(app: &App, options: &TurnOptions, command: &str) -> Result<()> {
    let role = app.describe_role()?;
    let mut renderer = app.renderer(&role, options);
    app.handle(command, &role, None, options, renderer.as_mut())
        .await?;
    Ok(())
}

async fn offer_shell_actions(app: &App, options: &TurnOptions, command: &str) -> Result<()> {
    let default_execute = app.config().default_execute_shell_cmd;
    loop {
        print!("{SHELL_ACTION_PROMPT}: ");
        io::stdout()
            .flush()
            .map_err(|err| Error::io("failed to write", err))?;
        let mut answer = String::new();
        let read = io::stdin()
            .read_line(&mut answer)
            .map_err(|err| Error::io("failed to read input", err))?;
        if read == 0 {
            return Ok(());
        }
        match parse_shell_action(&answer, default_execute) {
            Some(ShellAction::Execute) => {
                run_command(&app.config().shell_name, command).await?;
                return Ok(());
            }
            Some(ShellAction::Describe) => describe(app, options, command).await?,
            Some(ShellAction::Abort) => return Ok(()),
            None => continue,
        }
    }
}

async fn repl(
    app: &App,
    chat_id: &str,
    role: Role,
    options: &TurnOptions,
    initial: &str,
) -> Result<()> {
    let shell = role.is_shell();
    if chat_id == TEMP_CHAT_ID {
        println!("Entering temporary chat mode.");
    } else {
        let mut stdout = io::stdout();
        let use_color = stdout.is_terminal();
        app.stores().show_chat(chat_id, &mut stdout, use_color)?;
    }
    println!("{}", help_text(shell));

    let mut rl = DefaultEditor::new()
        .map_err(|err| Error::io("failed to start line editor", io::Error::other(err)))?;
    let mut last = String::new();
    if !initial.trim().is_empty() {
        turn(app, &role, chat_id, options, initial, &mut last).await?;
    }
    let mut multiline: Option<MultilineBuffer> = None;
    loop {
        let marker = if multiline.is_some() { "... " } else { ">>> " };
        let line = match rl.readline(marker) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                return Err(Error::io("failed to read input", io::Error::other(err)));
            }
        };
        let text = match multiline.as_mut() {
            Some(buffer) => match buffer.push(&line) {
                Some(text) => {
                    multiline = None;
                    text
                }
                None => continue,
            },
            None => match parse_command(&line, shell) {
                ReplCommand::Quit => break,
                ReplCommand::Empty => continue,
                ReplCommand::BeginMultiline => {
                    multiline = Some(MultilineBuffer::new());
                    continue;
                }
                ReplCommand::Execute => {
                    if !last.is_empty() {
                        run_command(&app.config().shell_name, &last).await?;
                    }
                    continue;
                }
                ReplCommand::Describe => {
                    if !last.is_empty() {
                        describe(app, options, &last).await?;
                    }
                    continue;
                }
                ReplCommand::Prompt(text) => text,
            },
        };
        if text.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(text.as_str());
        turn(app, &role, chat_id, options, &text, &mut last).await?;
    }
    Ok(())
}

/// One REPL exchange. Transport failures are reported and the REPL goes on.
async fn turn(
    app: &App,
    role: &Role,
    chat_id: &str,
    options: &TurnOptions,
    prompt: &str,
    last: &mut String,
) -> Result<()> {
    let mut renderer = app.renderer(role, options);
    match app
        .handle(prompt, role, Some(chat_id), options, renderer.as_mut())
        .await
    {
        Ok(rendered) => {
            *last = rendered.text;
            Ok(())
        }
        Err(err) if err.is_validation() || err.is_authentication() => Err(err),
        Err(err) => {
            renderer.print_error(&format!("Error: {err}"));
            Ok(())
        }
    }
}
