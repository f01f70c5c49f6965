//! Plain-text rendering of tool results.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::mirror::core::conversation::{Conversation, Message};
use crate::mirror::storage::status::MirrorStatus;

/// Reply when a search matched nothing.
pub const NO_RESULTS: &str = "No conversations found matching your criteria. \
Try broadening your search or checking if data has been synced.";

const PREVIEW_MESSAGES: usize = 3;
const PREVIEW_CHARS: usize = 100;

/// Summaries of search results, with a short preview of each conversation.
#[must_use]
pub fn render_search_results(conversations: &[Conversation], app_id: Option<&str>) -> String {
    let blocks: Vec<String> = conversations
        .iter()
        .map(|conversation| render_summary(conversation, app_id))
        .collect();
    format!(
        "Found {} conversations:\n\n{}",
        conversations.len(),
        blocks.join("\n\n")
    )
}

fn render_summary(conversation: &Conversation, app_id: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "**Conversation {}**", conversation.id);
    let _ = writeln!(out, "- Customer: {}", customer(conversation));
    let _ = writeln!(out, "- Created: {}", conversation.created_at.format("%Y-%m-%d %H:%M"));
    let _ = writeln!(out, "- Updated: {}", conversation.updated_at.format("%Y-%m-%d %H:%M"));
    if !conversation.tags.is_empty() {
        let _ = writeln!(out, "- Tags: {}", conversation.tags.join(", "));
    }
    let _ = writeln!(out, "- Messages: {}", conversation.messages.len());
    if let Some(link) = inbox_link(conversation, app_id) {
        let _ = writeln!(out, "- Link: {link}");
    }
    out.push_str("\n**Preview:**\n");
    for message in conversation.messages.iter().take(PREVIEW_MESSAGES) {
        let _ = writeln!(out, "  {}: {}", message.author_type, preview(&message.body));
    }
    out.push_str("---");
    out
}

/// Full conversation with every message.
#[must_use]
pub fn render_conversation(conversation: &Conversation, app_id: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "**Conversation {}**\n", conversation.id);
    out.push_str("**Details:**\n");
    let _ = writeln!(out, "- Customer: {}", customer(conversation));
    let _ = writeln!(out, "- Created: {}", conversation.created_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- Updated: {}", conversation.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if !conversation.tags.is_empty() {
        let _ = writeln!(out, "- Tags: {}", conversation.tags.join(", "));
    }
    let _ = writeln!(out, "- Total Messages: {}", conversation.messages.len());
    if let Some(link) = inbox_link(conversation, app_id) {
        let _ = writeln!(out, "- Link: {link}");
    }
    out.push_str("\n**Messages:**\n");
    for message in &conversation.messages {
        out.push_str(&render_message(message));
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn render_message(message: &Message) -> String {
    let kind = message
        .part_kind
        .map(|kind| format!(" ({kind})"))
        .unwrap_or_default();
    format!(
        "[{}] {}{kind}: {}",
        message.created_at.format("%Y-%m-%d %H:%M:%S"),
        message.author_type,
        message.body
    )
}

/// Server status block.
#[must_use]
pub fn render_status(status: &MirrorStatus, now: DateTime<Utc>) -> String {
    let mut out = String::from("**FastIntercom Server Status**\n\n");
    out.push_str("**Database Statistics:**\n");
    let _ = writeln!(out, "- Conversations: {}", status.total_conversations);
    let _ = writeln!(out, "- Messages: {}", status.total_messages);
    let _ = writeln!(out, "- Sync Periods: {}", status.total_sync_periods);
    let _ = writeln!(out, "- Database Size: {:.2} MB", status.database_size_mb);
    let _ = writeln!(out, "- Last Sync: {}", humanize_since(status.last_sync, now));
    out.push_str("\n**Storage:**\n");
    let _ = writeln!(out, "- Database Path: {}", status.database_path.display());
    if !status.recent_syncs.is_empty() {
        out.push_str("\n**Recent Sync Activity:**\n");
        for period in &status.recent_syncs {
            let _ = writeln!(
                out,
                "- {} to {}: {} conversations ({} new, {} updated)",
                period.start.format("%Y-%m-%d %H:%M"),
                period.end.format("%Y-%m-%d %H:%M"),
                period.conversation_count,
                period.new_conversations,
                period.updated_conversations
            );
        }
    }
    out.trim_end().to_string()
}

/// "just now", "N minutes ago", "N hours ago" or "Never".
#[must_use]
pub fn humanize_since(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "Never".to_string();
    };
    let elapsed = now - last;
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} minutes ago")
    } else {
        format!("{} hours ago", elapsed.num_hours())
    }
}

fn customer(conversation: &Conversation) -> &str {
    conversation.customer_email.as_deref().unwrap_or("Unknown")
}

fn inbox_link(conversation: &Conversation, app_id: Option<&str>) -> Option<String> {
    let url = conversation.inbox_url(app_id?).ok()?;
    Some(url.to_string())
}

fn preview(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
