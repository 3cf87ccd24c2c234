//! Persistent chat sessions.
//!
//! Each session is one JSON file, named by its chat id, holding the ordered
//! list of messages exchanged so far. The first message is the system prompt
//! of the role that started the session.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::OnceLock;
use std::time::SystemTime;

use serde_json::{Value, from_reader, to_writer_pretty};
use tiktoken_rs::CoreBPE;
use utf8path::Path;

use crate::error::{Error, Result};
use crate::observability::CHAT_TRUNCATIONS;
use crate::role::{Role, RoleStore};
use crate::types::ChatMessage;

/// Chat id whose history never outlives the invocation that uses it.
pub const TEMP_CHAT_ID: &str = "temp";

/// A directory of chat sessions.
#[derive(Debug, Clone)]
pub struct ChatStore {
    dir: Path<'static>,
    token_limit: usize,
}

impl ChatStore {
    /// Open (creating if needed) the session directory at `dir`.
    ///
    /// Sessions are trimmed to stay under `token_limit` estimated tokens.
    pub fn new(dir: &Path, token_limit: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| Error::io("failed to create chat session directory", err))?;
        Ok(Self {
            dir: dir.clone().into_owned(),
            token_limit,
        })
    }

    /// The configured token budget.
    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    fn path(&self, chat_id: &str) -> Path<'static> {
        self.dir.join(chat_id).into_owned()
    }

    /// True if a session named `chat_id` has been stored.
    pub fn exists(&self, chat_id: &str) -> bool {
        self.path(chat_id).is_file()
    }

    /// The stored messages of `chat_id`, oldest first.
    ///
    /// A missing session, or a file that does not hold a JSON list, reads as empty.
    pub fn read(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let path = self.path(chat_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io("failed to open chat session", err)),
        };
        let value: Value = from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(
                format!("failed to parse chat session {chat_id}"),
                Some(Box::new(err)),
            )
        })?;
        if !value.is_array() {
            tracing::warn!(chat_id, "chat session is not a list of messages; ignoring it");
            return Ok(Vec::new());
        }
        serde_json::from_value(value).map_err(|err| {
            Error::serialization(
                format!("malformed message in chat session {chat_id}"),
                Some(Box::new(err)),
            )
        })
    }

    /// The stored messages of `chat_id`, trimmed to the token budget.
    pub fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let mut messages = self.read(chat_id)?;
        truncate_to_budget(&mut messages, self.token_limit);
        Ok(messages)
    }

    /// Replace the stored messages of `chat_id`.
    pub fn write(&self, chat_id: &str, messages: &[ChatMessage]) -> Result<()> {
        let file = File::create(self.path(chat_id))
            .map_err(|err| Error::io("failed to create chat session", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, messages).map_err(|err| {
            Error::serialization("failed to serialize chat session", Some(Box::new(err)))
        })
    }

    /// Append `new_messages` to `chat_id`, trim to the token budget, and persist.
    ///
    /// Returns the full message list as written.
    pub fn append_and_persist(
        &self,
        chat_id: &str,
        new_messages: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = self.read(chat_id)?;
        messages.extend_from_slice(new_messages);
        truncate_to_budget(&mut messages, self.token_limit);
        self.write(chat_id, &messages)?;
        tracing::debug!(chat_id, messages = messages.len(), "persisted chat session");
        Ok(messages)
    }

    /// Delete `chat_id`. Deleting a session that does not exist is not an error.
    pub fn invalidate(&self, chat_id: &str) -> Result<()> {
        match std::fs::remove_file(self.path(chat_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io("failed to delete chat session", err)),
        }
    }

    /// Chat ids ordered by last modification, least recent first.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)
            .map_err(|err| Error::io("failed to list chat sessions", err))?
        {
            let dirent = dirent.map_err(|err| Error::io("failed to list chat sessions", err))?;
            let metadata = dirent
                .metadata()
                .map_err(|err| Error::io("failed to stat chat session", err))?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = dirent.file_name().to_str().map(String::from) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            sessions.push((modified, name));
        }
        sessions.sort();
        Ok(sessions.into_iter().map(|(_, name)| name).collect())
    }

    /// Check that `requested` may continue `chat_id` and return the role to use.
    ///
    /// A new session accepts any role. An existing session may be continued
    /// with the role that started it, or with the default role, which then
    /// adopts the session's role. Any other role is rejected.
    pub fn resolve_role(
        &self,
        chat_id: &str,
        requested: Role,
        roles: &RoleStore,
    ) -> Result<Role> {
        let messages = self.read(chat_id)?;
        let Some(initial) = messages.first() else {
            return Ok(requested);
        };
        let Some(stored_name) = Role::name_from_prompt(&initial.content) else {
            return Err(Error::validation(
                format!("could not determine the role of chat session {chat_id}"),
                Some("--chat".to_string()),
            ));
        };
        if requested.is_default() && requested.name != stored_name {
            return roles.get(&stored_name);
        }
        if !requested.same_role(&initial.content) {
            return Err(Error::validation(
                format!(
                    "chat session {chat_id} was initiated as \"{stored_name}\" and cannot be continued as \"{}\"",
                    requested.name
                ),
                Some("--chat".to_string()),
            ));
        }
        Ok(requested)
    }
}

/////////////////////////////////////////// token budget ///////////////////////////////////////////

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| match tiktoken_rs::o200k_base() {
            Ok(bpe) => Some(bpe),
            Err(err) => {
                tracing::warn!(error = %err, "tokenizer unavailable; estimating by length");
                None
            }
        })
        .as_ref()
}

/// Estimate how many tokens `messages` occupy.
///
/// Contents are joined with single spaces and run through the o200k tokenizer.
/// This approximates, and does not reproduce, the provider's own count.
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    let text = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(&text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Drop the oldest user/assistant pair until `messages` fits in `limit` tokens.
///
/// The first message is never dropped. Trimming stops when fewer than three
/// messages remain, even if the estimate is still over the limit. Returns the
/// number of messages removed.
pub fn truncate_to_budget(messages: &mut Vec<ChatMessage>, limit: usize) -> usize {
    let mut removed = 0;
    while messages.len() >= 3 && estimate_tokens(messages) > limit {
        messages.drain(1..3);
        removed += 2;
    }
    if removed > 0 {
        CHAT_TRUNCATIONS.count(removed as u64);
        tracing::info!(removed, remaining = messages.len(), "trimmed chat history to token budget");
    }
    removed
}
