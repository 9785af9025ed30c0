//! 记忆层：会话独占的只追加对话日志

pub mod conversation;

pub use conversation::{ContentBlock, Conversation, ConversationTurn, Role};
