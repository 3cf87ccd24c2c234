//! Input parsing for the REPL.
//!
//! Most lines are prompts. A few are commands: `exit()` leaves the REPL, a
//! line of `"""` starts or ends a multi-line prompt, and in the shell role `e`
//! and `d` execute or describe the last generated command.

/// Delimiter line that opens and closes a multi-line prompt.
pub const MULTILINE_DELIMITER: &str = "\"\"\"";

/// A parsed line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Leave the REPL.
    Quit,

    /// Run the last generated shell command.
    Execute,

    /// Describe the last generated shell command.
    Describe,

    /// Start collecting a multi-line prompt.
    BeginMultiline,

    /// Nothing to do.
    Empty,

    /// Send this text to the model.
    Prompt(String),
}

/// Parse one line of REPL input.
///
/// `shell_role` enables the `e`/`d` shortcuts.
///
/// # Examples
///
/// ```
/// # use shellgpt::chat::{ReplCommand, parse_command};
/// assert_eq!(parse_command("exit()", false), ReplCommand::Quit);
/// assert_eq!(parse_command("e", true), ReplCommand::Execute);
/// assert_eq!(parse_command("e", false), ReplCommand::Prompt("e".to_string()));
/// ```
pub fn parse_command(input: &str, shell_role: bool) -> ReplCommand {
    let trimmed = input.trim();
    match trimmed {
        "" => ReplCommand::Empty,
        "exit()" => ReplCommand::Quit,
        MULTILINE_DELIMITER => ReplCommand::BeginMultiline,
        "e" if shell_role => ReplCommand::Execute,
        "d" if shell_role => ReplCommand::Describe,
        _ => ReplCommand::Prompt(input.trim_end().to_string()),
    }
}

/// Collects the lines of a multi-line prompt until the closing delimiter.
#[derive(Debug, Default)]
pub struct MultilineBuffer {
    text: String,
}

impl MultilineBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one line. Returns the finished prompt when `line` closes the block.
    pub fn push(&mut self, line: &str) -> Option<String> {
        if line.trim() == MULTILINE_DELIMITER {
            let text = std::mem::take(&mut self.text);
            return Some(text.trim_end_matches('\n').to_string());
        }
        self.text.push_str(line);
        self.text.push('\n');
        None
    }
}

/// Returns help text describing the REPL commands.
pub fn help_text(shell_role: bool) -> String {
    let mut help = String::from(
        "Entering REPL mode, press Ctrl+C or type exit() to exit.\n\
         Use \"\"\" on its own line to start and end multi-line input.",
    );
    if shell_role {
        help.push_str(
            "\nType \"e\" to execute the last command or \"d\" to describe it.",
        );
    }
    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit() {
        assert_eq!(parse_command("exit()", false), ReplCommand::Quit);
        assert_eq!(parse_command("  exit()  ", true), ReplCommand::Quit);
    }

    #[test]
    fn shell_shortcuts_only_in_shell_role() {
        assert_eq!(parse_command("e", true), ReplCommand::Execute);
        assert_eq!(parse_command("d", true), ReplCommand::Describe);
        assert_eq!(
            parse_command("d", false),
            ReplCommand::Prompt("d".to_string())
        );
    }

    #[test]
    fn prompts_and_blank_lines() {
        assert_eq!(parse_command("   ", false), ReplCommand::Empty);
        assert_eq!(
            parse_command("list files\n", false),
            ReplCommand::Prompt("list files".to_string())
        );
    }

    #[test]
    fn multiline_collects_until_delimiter() {
        assert_eq!(
            parse_command("\"\"\"", false),
            ReplCommand::BeginMultiline
        );
        let mut buffer = MultilineBuffer::new();
        assert_eq!(buffer.push("first line"), None);
        assert_eq!(buffer.push("  indented"), None);
        assert_eq!(
            buffer.push("\"\"\""),
            Some("first line\n  indented".to_string())
        );
        assert_eq!(buffer.push("\"\"\""), Some(String::new()));
    }

    #[test]
    fn help_mentions_shell_shortcuts() {
        assert!(help_text(true).contains("\"e\""));
        assert!(!help_text(false).contains("\"e\""));
        assert!(help_text(false).contains("exit()"));
    }
}
