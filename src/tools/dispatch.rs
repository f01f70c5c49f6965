//! Tool catalog and dispatch onto the mirror engine.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};

use crate::mirror::core::errors::MirrorResult;
use crate::mirror::core::filters::ConversationFilters;
use crate::mirror::engine::core::MirrorEngine;
use crate::mirror::retrieval::timeframe::parse_timeframe;
use crate::tools::render;

/// Tool names understood by the dispatcher.
pub const SEARCH_CONVERSATIONS: &str = "search_conversations";
/// See [`SEARCH_CONVERSATIONS`].
pub const GET_CONVERSATION: &str = "get_conversation";
/// See [`SEARCH_CONVERSATIONS`].
pub const GET_SERVER_STATUS: &str = "get_server_status";

/// A parsed tool invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolCall {
    /// Filtered search over mirrored conversations.
    SearchConversations {
        /// Text looked up in message bodies.
        query: Option<String>,
        /// Timeframe phrase such as "last 7 days".
        timeframe: Option<String>,
        /// Exact customer email.
        customer_email: Option<String>,
        /// Maximum results.
        limit: usize,
    },
    /// Full conversation by id.
    GetConversation {
        /// Intercom conversation id.
        conversation_id: String,
    },
    /// Mirror statistics.
    GetServerStatus,
}

/// Why a tool call could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    /// No tool with this name.
    #[error("Unknown tool: {0}")]
    Unknown(String),
    /// Arguments did not match the tool schema.
    #[error("{0}")]
    InvalidArguments(String),
}

impl ToolCall {
    /// Parse a call from its name and JSON arguments.
    ///
    /// # Errors
    /// Returns `Unknown` for unsupported names and `InvalidArguments` when the
    /// arguments do not fit the tool's schema.
    pub fn parse(name: &str, arguments: &Value, default_limit: usize) -> Result<Self, ToolCallError> {
        match name {
            SEARCH_CONVERSATIONS => Ok(Self::SearchConversations {
                query: optional_string(arguments, "query")?,
                timeframe: optional_string(arguments, "timeframe")?,
                customer_email: optional_string(arguments, "customer_email")?,
                limit: match arguments.get("limit") {
                    None | Some(Value::Null) => default_limit,
                    Some(value) => value
                        .as_u64()
                        .and_then(|limit| usize::try_from(limit).ok())
                        .ok_or_else(|| {
                            ToolCallError::InvalidArguments(
                                "limit must be a non-negative integer".to_string(),
                            )
                        })?,
                },
            }),
            GET_CONVERSATION => {
                let conversation_id = optional_string(arguments, "conversation_id")?
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| {
                        ToolCallError::InvalidArguments("conversation_id is required".to_string())
                    })?;
                Ok(Self::GetConversation { conversation_id })
            }
            GET_SERVER_STATUS => Ok(Self::GetServerStatus),
            other => Err(ToolCallError::Unknown(other.to_string())),
        }
    }

    /// Tool name of this call.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SearchConversations { .. } => SEARCH_CONVERSATIONS,
            Self::GetConversation { .. } => GET_CONVERSATION,
            Self::GetServerStatus => GET_SERVER_STATUS,
        }
    }
}

fn optional_string(arguments: &Value, key: &str) -> Result<Option<String>, ToolCallError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ToolCallError::InvalidArguments(format!("{key} must be a string"))),
    }
}

/// Text reply of a tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReply {
    /// Rendered text.
    pub text: String,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolReply {
    /// Successful reply.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Failed reply.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Reply for a tool name nobody handles.
    #[must_use]
    pub fn unsupported(name: &str) -> Self {
        Self::error(ToolCallError::Unknown(name.to_string()).to_string())
    }
}

/// Tool metadata as advertised to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human description.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
}

/// The tool catalog.
#[must_use]
pub fn tool_definitions(default_limit: usize) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SEARCH_CONVERSATIONS.to_string(),
            description: "Search Intercom conversations with flexible filters".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Text to search for in conversation messages"
                    },
                    "timeframe": {
                        "type": "string",
                        "description": "Time period like 'last 7 days', 'this month', 'last week'"
                    },
                    "customer_email": {
                        "type": "string",
                        "description": "Filter by specific customer email address"
                    },
                    "limit": {
                        "type": "integer",
                        "description": format!("Maximum number of conversations to return (default: {default_limit})"),
                        "default": default_limit
                    }
                }
            }),
        },
        ToolDefinition {
            name: GET_CONVERSATION.to_string(),
            description: "Get full details of a specific conversation by ID".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "conversation_id": {
                        "type": "string",
                        "description": "The Intercom conversation ID"
                    }
                },
                "required": ["conversation_id"]
            }),
        },
        ToolDefinition {
            name: GET_SERVER_STATUS.to_string(),
            description: "Get FastIntercom server status and statistics".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Routes tool calls to the mirror engine.
pub struct ToolDispatcher {
    engine: Arc<MirrorEngine>,
}

impl ToolDispatcher {
    /// Create a dispatcher over a shared engine.
    #[must_use]
    pub const fn new(engine: Arc<MirrorEngine>) -> Self {
        Self { engine }
    }

    /// Shared engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<MirrorEngine> {
        &self.engine
    }

    /// Advertised tools.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions(self.engine.config().search.tool_default_limit)
    }

    /// Parse and run one call. Failures become error replies.
    pub async fn call(&self, name: &str, arguments: &Value) -> ToolReply {
        let call = match ToolCall::parse(name, arguments, self.engine.config().search.tool_default_limit) {
            Ok(call) => call,
            Err(ToolCallError::Unknown(name)) => return ToolReply::unsupported(&name),
            Err(err) => return ToolReply::error(format!("Error executing {name}: {err}")),
        };
        match self.execute(&call).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(tool = call.name(), %err, "Tool call failed");
                ToolReply::error(format!("Error executing {}: {err}", call.name()))
            }
        }
    }

    /// Run a parsed call.
    ///
    /// # Errors
    /// Returns an error if the engine operation fails.
    pub async fn execute(&self, call: &ToolCall) -> MirrorResult<ToolReply> {
        let app_id = self.engine.config().remote.app_id.as_deref();
        match call {
            ToolCall::SearchConversations {
                query,
                timeframe,
                customer_email,
                limit,
            } => {
                let window = parse_timeframe(timeframe.as_deref(), Utc::now());
                let mut filters = ConversationFilters::new().with_limit(*limit);
                if let Some(query) = query {
                    filters = filters.with_query(query.clone());
                }
                if let Some(email) = customer_email {
                    filters = filters.with_customer_email(email.clone());
                }
                if let Some((start, end)) = window {
                    filters = filters.with_date_range(Some(start), Some(end));
                    let coverage = self.engine.coverage(start, end).await?;
                    if let Err(err) = self
                        .engine
                        .record_request_pattern(start, end, &coverage, false)
                        .await
                    {
                        warn!(%err, "Failed to log request pattern");
                    }
                }

                let conversations = self.engine.search(&filters).await?;
                if conversations.is_empty() {
                    return Ok(ToolReply::text(render::NO_RESULTS));
                }
                Ok(ToolReply::text(render::render_search_results(&conversations, app_id)))
            }
            ToolCall::GetConversation { conversation_id } => {
                match self.engine.get_conversation(conversation_id).await? {
                    Some(conversation) => Ok(ToolReply::text(render::render_conversation(
                        &conversation,
                        app_id,
                    ))),
                    None => Ok(ToolReply::text(format!(
                        "Conversation {conversation_id} not found"
                    ))),
                }
            }
            ToolCall::GetServerStatus => {
                let status = self.engine.status().await?;
                Ok(ToolReply::text(render::render_status(&status, Utc::now())))
            }
        }
    }
}
