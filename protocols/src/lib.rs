//! Wire types for the OAI and OLL chat-completion dialects and the
//! dialect-neutral intermediate representation they both convert through.

pub mod dialect;
pub mod ir;
pub mod message;
pub mod oai;
pub mod oll;
pub mod validated;

pub use dialect::Dialect;
pub use message::{Content, ContentPart, ExtractedToolCall, Role, ToolSpec};
