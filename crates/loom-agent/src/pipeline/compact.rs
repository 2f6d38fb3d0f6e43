//! Session history compaction — summarize an aging prefix of a session's
//! message log so the active context stays bounded.
//!
//! Runs when `len(messages) >= threshold` (config: `agent.compact_threshold`,
//! default 50). The prefix `messages[0..len-keep]` is rendered to plain text
//! and handed to the provider with a canned summarization prompt; on success
//! the summary is appended to any existing one and the prefix is dropped. A
//! provider failure (including the provider used for compaction itself being
//! rate-limited) falls back to a deterministic, information-poor but always
//! available summary so a turn is never blocked on this step.

use tracing::{info, warn};

use loom_core::types::{ContentBlock, Message, Role};
use loom_sessions::manager::SessionManager;
use loom_sessions::types::SessionKey;

use crate::provider::{ChatRequest, LlmProvider};

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the following conversation excerpt. Preserve decisions \
made, facts established, pending actions, user preferences, and technical specifics. Be concise but \
do not omit anything a later turn might need. Write plain prose, no preamble.";

/// Maximum characters kept from a single tool_result's content when
/// rendering the prefix for summarization — long outputs (file dumps,
/// command output) would otherwise dominate the summarizer's own context.
const MAX_RENDERED_RESULT_CHARS: usize = 2_000;

/// Compact `key`'s session if it has reached `threshold` messages, keeping
/// the last `keep`. Returns `Ok(true)` if compaction ran, `Ok(false)` if the
/// session was under threshold. Never returns an error from the provider
/// call itself — a provider failure is absorbed into the deterministic
/// fallback so the caller doesn't need its own fallback path.
pub async fn maybe_compact(
    provider: &dyn LlmProvider,
    sessions: &SessionManager,
    key: &SessionKey,
    compact_model: &str,
    threshold: usize,
    keep: usize,
) -> loom_core::error::Result<bool> {
    let messages = sessions.snapshot_messages(key)?;
    if messages.len() < threshold {
        return Ok(false);
    }

    let split_at = messages.len().saturating_sub(keep);
    let prefix = messages[..split_at].to_vec();
    let tail = messages[split_at..].to_vec();

    info!(session = %key, prefix_len = prefix.len(), keep, "compacting session history");

    let summary = match summarize_via_provider(provider, compact_model, &prefix).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(session = %key, error = %e, "compaction provider call failed, using deterministic fallback");
            deterministic_summary(&prefix)
        }
    };

    sessions.apply_compaction(key, tail, summary)?;
    Ok(true)
}

async fn summarize_via_provider(
    provider: &dyn LlmProvider,
    model: &str,
    prefix: &[Message],
) -> Result<String, crate::provider::ProviderError> {
    let transcript = render_transcript(prefix);
    let req = ChatRequest {
        model: model.to_string(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        system_prompt: None,
        messages: vec![Message::user(transcript)],
        max_tokens: 1024,
        temperature: None,
        stop_sequences: Vec::new(),
        thinking: None,
        tools: Vec::new(),
    };

    let resp = provider.chat(&req).await?;
    Ok(resp.content)
}

/// Render a message slice as `Role: content` lines. `tool_use`/`tool_result`
/// blocks become bracketed markers rather than raw JSON; long tool results
/// are truncated so one verbose tool call doesn't dominate the excerpt.
fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_message(message: &Message) -> String {
    let body = message
        .content
        .blocks()
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}: {}", message.role, body)
}

fn render_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::Image { .. } => "[image]".to_string(),
        ContentBlock::ToolUse { name, arguments, .. } => {
            format!("[called tool {name} with {arguments}]")
        }
        ContentBlock::ToolResult { content, is_error, .. } => {
            let truncated = if content.chars().count() > MAX_RENDERED_RESULT_CHARS {
                let head: String = content.chars().take(MAX_RENDERED_RESULT_CHARS).collect();
                format!("{head}...[truncated]")
            } else {
                content.clone()
            };
            if *is_error {
                format!("[tool error: {truncated}]")
            } else {
                format!("[tool result: {truncated}]")
            }
        }
        ContentBlock::Thinking { .. } => String::new(),
    }
}

/// Counter-based summary used when the provider call fails. Deliberately
/// information-poor — it only has to keep the turn moving, not preserve
/// detail.
fn deterministic_summary(prefix: &[Message]) -> String {
    let user_count = prefix.iter().filter(|m| m.role == Role::User).count();
    let assistant_count = prefix.iter().filter(|m| m.role == Role::Assistant).count();

    let topics: Vec<String> = prefix
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.content.blocks().iter().find_map(|b| b.as_text().map(str::to_string)))
        .take(5)
        .map(|t| t.chars().take(60).collect::<String>())
        .collect();

    let mut summary = format!(
        "[Compaction fallback] {user_count} user message(s) and {assistant_count} assistant message(s) \
         were summarized without provider assistance.",
    );
    if !topics.is_empty() {
        summary.push_str(" Early topics: ");
        summary.push_str(&topics.join("; "));
    }
    summary
}
