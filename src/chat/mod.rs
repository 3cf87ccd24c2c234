//! Chat sessions and the REPL built on them.
//!
//! - [`session`]: persisted sessions and their token budget
//! - [`commands`]: parsing of REPL input

mod commands;
mod session;

pub use commands::{MULTILINE_DELIMITER, MultilineBuffer, ReplCommand, help_text, parse_command};
pub use session::{ChatStore, TEMP_CHAT_ID, estimate_tokens, truncate_to_budget};
