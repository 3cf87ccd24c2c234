// Public modules
pub mod chat_completion;
pub mod chat_completion_chunk;
pub mod chat_completion_params;
pub mod chat_message;
pub mod finish_reason;
pub mod function_call;
pub mod message_role;
pub mod tool_param;

// Re-exports
pub use chat_completion::{ChatCompletion, CompletionChoice, ResponseMessage, ToolCall};
pub use chat_completion_chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta, ToolCallDelta};
pub use chat_completion_params::ChatCompletionParams;
pub use chat_message::ChatMessage;
pub use finish_reason::{FinishReason, FinishReasonParseError};
pub use function_call::{FunctionCall, FunctionCallDelta};
pub use message_role::{MessageRole, MessageRoleParseError};
pub use tool_param::{FunctionDefinition, ToolParam, ToolType};
