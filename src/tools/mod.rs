//! Conversation tools: catalog, dispatch and text rendering.

pub mod dispatch;
pub mod render;

pub use dispatch::{ToolCall, ToolCallError, ToolDefinition, ToolDispatcher, ToolReply, tool_definitions};
