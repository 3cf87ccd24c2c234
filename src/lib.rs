//! A command-line assistant for large language models.
//!
//! Prompts are framed by a [`Role`], optionally continued from a persisted chat
//! session, answered by a streaming chat-completions endpoint that may call
//! local functions, cached on disk, and rendered to the terminal.

// Public modules
pub mod cache;
pub mod chat;
pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod functions;
pub mod handler;
pub mod observability;
pub mod render;
pub mod role;
pub mod sse;
pub mod types;

// Re-exports
pub use cache::{CachingCompleter, ResponseCache};
pub use client::{ChunkStream, OpenAi, Transport};
pub use completion::{
    Completer, CompletionEngine, CompletionRequest, EngineOptions, TextStream, Trace,
};
pub use config::{Action, Args, Config};
pub use error::{Error, Result};
pub use functions::{Function, FunctionRegistry};
pub use handler::{App, Stores, TurnOptions};
pub use observability::register_biometrics;
pub use role::{Role, RoleStore};
pub use types::*;
