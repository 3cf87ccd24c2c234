//! Output rendering for model answers.
//!
//! A [`Renderer`] receives text as it streams in. [`render`] drives a
//! [`TextStream`] into a renderer, live or all at once, optionally passing the
//! text through a [`FenceStripper`] first.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use termimad::MadSkin;
use tokio::sync::Notify;

use crate::completion::TextStream;
use crate::error::Result;
use crate::types::ChatMessage;

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for green text.
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for magenta text.
const ANSI_MAGENTA: &str = "\x1b[35m";

/// Minimum time between two live markdown re-renders.
const MARKDOWN_REFRESH: Duration = Duration::from_millis(125);

/// The ANSI escape code for a color name, as accepted in the configuration.
pub fn ansi_color(name: &str) -> Option<&'static str> {
    let code = match name.to_ascii_lowercase().as_str() {
        "black" => "\x1b[30m",
        "red" => ANSI_RED,
        "green" => ANSI_GREEN,
        "yellow" => "\x1b[33m",
        "blue" => "\x1b[34m",
        "magenta" => ANSI_MAGENTA,
        "cyan" => "\x1b[36m",
        "white" => "\x1b[37m",
        "bright_black" => "\x1b[90m",
        "bright_red" => "\x1b[91m",
        "bright_green" => "\x1b[92m",
        "bright_yellow" => "\x1b[93m",
        "bright_blue" => "\x1b[94m",
        "bright_magenta" => "\x1b[95m",
        "bright_cyan" => "\x1b[96m",
        "bright_white" => "\x1b[97m",
        _ => return None,
    };
    Some(code)
}

/// Trait for rendering streaming output.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with an ANSI color
/// - Markdown re-rendered as it grows
/// - Plain text without styling (for piping/redirecting)
pub trait Renderer: Send {
    /// Print a chunk of response text.
    ///
    /// This is called incrementally as text is streamed from the model.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str) {
        eprintln!("{error}");
    }

    /// Print an informational message.
    fn print_info(&mut self, info: &str) {
        eprintln!("{info}");
    }

    /// Called when a response is complete.
    ///
    /// Used to ensure proper newlines and cleanup after streaming.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self) {}

    /// The signal that stops rendering, if any.
    fn interrupt(&self) -> Option<Arc<Interrupt>> {
        None
    }
}

//////////////////////////////////////////// Interrupt ////////////////////////////////////////////

/// A user interrupt, raised from a signal handler and awaited by [`render`].
#[derive(Debug, Default)]
pub struct Interrupt {
    flag: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    /// Raise the interrupt and wake every waiter. Returns true if it was
    /// already raised.
    pub fn trigger(&self) -> bool {
        let was_raised = self.flag.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        was_raised
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lower the interrupt before the next turn.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolve once the interrupt is raised.
    pub async fn raised(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            // Register before checking so a trigger in between is not missed.
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

////////////////////////////////////////// PlainTextRenderer //////////////////////////////////////////

/// Plain text renderer with an optional ANSI color.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    color: Option<&'static str>,
    line_start: bool,
    interrupt: Option<Arc<Interrupt>>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer writing uncolored text to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Creates a new PlainTextRenderer writing to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            color: None,
            line_start: true,
            interrupt: None,
        }
    }

    /// Color the text with the named color. Unknown names leave text uncolored.
    pub fn with_color(mut self, color: &str) -> Self {
        self.color = ansi_color(color);
        self
    }

    /// Stop rendering when `interrupt` is raised.
    pub fn with_interrupt(mut self, interrupt: Arc<Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = match self.color {
            Some(color) => write!(self.out, "{color}{text}{ANSI_RESET}"),
            None => write!(self.out, "{text}"),
        };
        let _ = self.out.flush();
        self.line_start = text.ends_with('\n');
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn finish_response(&mut self) {
        if !self.line_start {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.line_start = true;
        }
    }

    fn print_interrupted(&mut self) {
        self.finish_response();
        eprintln!("[interrupted]");
    }

    fn interrupt(&self) -> Option<Arc<Interrupt>> {
        self.interrupt.clone()
    }
}

////////////////////////////////////////// MarkdownRenderer //////////////////////////////////////////

/// Renders the answer as terminal markdown, redrawing it as it grows.
pub struct MarkdownRenderer {
    out: Box<dyn Write + Send>,
    skin: MadSkin,
    text: String,
    lines_drawn: usize,
    last_draw: Option<Instant>,
    interrupt: Option<Arc<Interrupt>>,
}

impl MarkdownRenderer {
    /// Creates a new MarkdownRenderer writing to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Creates a new MarkdownRenderer writing to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            skin: MadSkin::default(),
            text: String::new(),
            lines_drawn: 0,
            last_draw: None,
            interrupt: None,
        }
    }

    /// Stop rendering when `interrupt` is raised.
    pub fn with_interrupt(mut self, interrupt: Arc<Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn redraw(&mut self) {
        let rendered = format!("{}", self.skin.term_text(&self.text));
        if self.lines_drawn > 0 {
            let _ = write!(self.out, "\x1b[{}F", self.lines_drawn);
        } else {
            let _ = write!(self.out, "\r");
        }
        let _ = write!(self.out, "\x1b[J{rendered}");
        let _ = self.out.flush();
        self.lines_drawn = rendered.matches('\n').count();
        self.last_draw = Some(Instant::now());
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    fn print_text(&mut self, text: &str) {
        self.text.push_str(text);
        let due = self
            .last_draw
            .is_none_or(|last| last.elapsed() >= MARKDOWN_REFRESH);
        if due {
            self.redraw();
        }
    }

    fn finish_response(&mut self) {
        if !self.text.is_empty() {
            self.redraw();
        }
        self.text.clear();
        self.lines_drawn = 0;
        self.last_draw = None;
    }

    fn print_interrupted(&mut self) {
        self.finish_response();
        eprintln!("[interrupted]");
    }

    fn interrupt(&self) -> Option<Arc<Interrupt>> {
        self.interrupt.clone()
    }
}

/////////////////////////////////////////// FenceStripper ///////////////////////////////////////////

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Start,
    Body { opened: bool },
}

/// Removes the code fence wrapped around an answer, as it streams.
///
/// A leading ```` ```lang ```` line and a trailing ```` ``` ```` line are
/// dropped. Fence markers may be split across any number of chunks, so text
/// that might turn out to be a fence is held back until it can be decided.
#[derive(Debug, Clone)]
pub struct FenceStripper {
    state: FenceState,
    held: String,
}

impl Default for FenceStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceStripper {
    /// A stripper that has seen no text yet.
    pub fn new() -> Self {
        Self {
            state: FenceState::Start,
            held: String::new(),
        }
    }

    /// Feed one chunk; returns the text that is now safe to display.
    pub fn push(&mut self, chunk: &str) -> String {
        self.held.push_str(chunk);
        if self.state == FenceState::Start {
            let lead = self.held.len() - self.held.trim_start().len();
            let rest = &self.held[lead..];
            if rest.is_empty() || (rest.len() < FENCE.len() && FENCE.starts_with(rest)) {
                return String::new();
            }
            if rest.starts_with(FENCE) {
                let Some(newline) = rest.find('\n') else {
                    return String::new();
                };
                self.held = rest[newline + 1..].to_string();
                self.state = FenceState::Body { opened: true };
            } else {
                self.state = FenceState::Body { opened: false };
            }
        }
        self.drain_safe()
    }

    /// Signal the end of the stream; returns whatever is left to display.
    pub fn finish(&mut self) -> String {
        let held = std::mem::take(&mut self.held);
        match self.state {
            FenceState::Start => {
                if held.trim_start().starts_with(FENCE) {
                    String::new()
                } else {
                    held
                }
            }
            FenceState::Body { opened } => {
                let trimmed = held.trim_end();
                let split = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
                if opened && &trimmed[split..] == FENCE {
                    held[..split.saturating_sub(1)].to_string()
                } else {
                    held
                }
            }
        }
    }

    /// Emit everything except a trailing line that could still become a fence.
    fn drain_safe(&mut self) -> String {
        let trimmed_len = self.held.trim_end().len();
        if trimmed_len == 0 {
            return String::new();
        }
        let trimmed = &self.held[..trimmed_len];
        let line_start = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &trimmed[line_start..];
        let keep_from = if FENCE.starts_with(line) || line == FENCE {
            line_start.saturating_sub(1)
        } else {
            trimmed_len
        };
        let rest = self.held.split_off(keep_from);
        std::mem::replace(&mut self.held, rest)
    }
}

///////////////////////////////////////////// render /////////////////////////////////////////////

/// Outcome of rendering a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// The text shown to the user.
    pub text: String,
    /// True if the user interrupted the stream.
    pub interrupted: bool,
}

/// Drive `stream` into `renderer`.
///
/// When `live` is set text is shown as it arrives. Otherwise a spinner is shown
/// until the whole answer is in, which is then printed once. A failure to
/// record the answer in the response cache is logged and otherwise ignored.
/// Raising the renderer's [`Interrupt`] drops the stream at once, even while
/// it is waiting on the network or a function, which closes the connection.
pub async fn render(
    mut stream: TextStream,
    renderer: &mut dyn Renderer,
    mut filter: Option<FenceStripper>,
    live: bool,
) -> Result<Rendered> {
    let spinner = if live { None } else { Some(loading_spinner()) };
    let mut text = String::new();
    let mut interrupted = false;
    let interrupt = renderer.interrupt();
    loop {
        let next = match interrupt.as_deref() {
            Some(signal) => tokio::select! {
                biased;
                () = signal.raised() => None,
                item = stream.next() => Some(item),
            },
            None => Some(stream.next().await),
        };
        let Some(next) = next else {
            interrupted = true;
            break;
        };
        let Some(item) = next else {
            break;
        };
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) if err.is_cache() => {
                tracing::warn!(error = %err, "could not cache the answer");
                continue;
            }
            Err(err) => {
                if let Some(spinner) = &spinner {
                    spinner.finish_and_clear();
                }
                return Err(err);
            }
        };
        let shown = match filter.as_mut() {
            Some(filter) => filter.push(&chunk),
            None => chunk,
        };
        if live {
            renderer.print_text(&shown);
        }
        text.push_str(&shown);
    }
    drop(stream);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let tail = match filter.as_mut() {
        Some(filter) if !interrupted => filter.finish(),
        _ => String::new(),
    };
    if live {
        renderer.print_text(&tail);
        text.push_str(&tail);
    } else {
        text.push_str(&tail);
        renderer.print_text(&text);
    }
    if interrupted {
        renderer.print_interrupted();
    } else {
        renderer.finish_response();
    }
    Ok(Rendered { text, interrupted })
}

fn loading_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Loading...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Print a stored conversation as `role: content`, alternating colors.
pub fn write_history(
    out: &mut dyn Write,
    messages: &[ChatMessage],
    use_color: bool,
) -> io::Result<()> {
    for (index, message) in messages.iter().enumerate() {
        let line = format!("{}: {}", message.role, message.content);
        if use_color {
            let color = if index % 2 == 0 { ANSI_MAGENTA } else { ANSI_GREEN };
            writeln!(out, "{color}{line}{ANSI_RESET}")?;
        } else {
            writeln!(out, "{line}")?;
        }
    }
    out.flush()
}
