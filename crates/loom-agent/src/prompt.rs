use serde::Serialize;

/// 2-tier system prompt for Anthropic prompt caching.
///
/// TIER 1 (static): configured system prompt + tool definitions — identical
///   for every turn of every session.
///   → cache_control: {type: "ephemeral"} — high hit rate across turns.
/// TIER 2 (volatile): session info + turn count + timestamp.
///   → NO cache — always changes, placed last so it doesn't break the prefix.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub static_text: String,
    pub volatile_text: String,
}

impl SystemPrompt {
    /// Flatten both tiers into a single string (for providers without caching).
    pub fn to_plain_text(&self) -> String {
        if self.volatile_text.is_empty() {
            self.static_text.clone()
        } else {
            format!("{}\n\n{}", self.static_text, self.volatile_text)
        }
    }

    /// Convert to Anthropic API format with a single cache breakpoint on the
    /// static tier.
    pub fn to_anthropic_blocks(&self) -> Vec<serde_json::Value> {
        let mut blocks = vec![serde_json::json!({
            "type": "text",
            "text": self.static_text,
            "cache_control": { "type": "ephemeral" }
        })];

        if !self.volatile_text.is_empty() {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": self.volatile_text,
            }));
        }

        blocks
    }
}

/// Builds the system prompt from a configured static text plus the
/// registered tools' definitions.
pub struct PromptBuilder {
    base: String,
    tool_defs: String,
}

impl PromptBuilder {
    /// `base` comes from `GatewayConfig.agent.system_prompt`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            tool_defs: String::new(),
        }
    }

    /// Build a plain system prompt with no volatile tier.
    pub fn build(&self) -> String {
        self.build_prompt(None).to_plain_text()
    }

    /// Build a 2-tier system prompt for caching.
    ///
    /// `session_info` — volatile per-turn metadata, omitted entirely when `None`.
    pub fn build_prompt(&self, session_info: Option<&SessionInfo>) -> SystemPrompt {
        let static_text = format!("{}{}", self.base, self.tool_defs);

        let volatile_text = match session_info {
            Some(info) => format!(
                "[Session: {} | Turn: {} | Time: {}]",
                info.session_key, info.turn_count, info.timestamp,
            ),
            None => String::new(),
        };

        SystemPrompt {
            static_text,
            volatile_text,
        }
    }

    /// Set tool definitions, rendered as a plain-text summary appended to
    /// the static tier. Called once at startup after the tool registry is
    /// built; the set of built-in tools does not change at runtime.
    pub fn set_tool_defs(&mut self, defs: String) {
        self.tool_defs = if defs.is_empty() {
            String::new()
        } else {
            format!("\n\n## Available Tools\n{}", defs)
        };
    }
}

/// Volatile session metadata injected into Tier 2.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_key: String,
    pub turn_count: u32,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_omits_empty_volatile_tier() {
        let builder = PromptBuilder::new("be helpful");
        let prompt = builder.build_prompt(None);
        assert_eq!(prompt.to_plain_text(), "be helpful");
    }

    #[test]
    fn plain_text_appends_volatile_tier() {
        let builder = PromptBuilder::new("be helpful");
        let info = SessionInfo {
            session_key: "main".to_string(),
            turn_count: 3,
            timestamp: "2026-07-28T00:00:00Z".to_string(),
        };
        let prompt = builder.build_prompt(Some(&info));
        assert!(prompt.to_plain_text().contains("Turn: 3"));
    }

    #[test]
    fn anthropic_blocks_cache_only_static_tier() {
        let mut builder = PromptBuilder::new("be helpful");
        builder.set_tool_defs("read_file: reads a file".to_string());
        let prompt = builder.build_prompt(None);
        let blocks = prompt.to_anthropic_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["cache_control"]["type"], "ephemeral");
        assert!(blocks[0]["text"].as_str().unwrap().contains("read_file"));
    }

    #[test]
    fn volatile_tier_not_cached() {
        let builder = PromptBuilder::new("be helpful");
        let info = SessionInfo {
            session_key: "main".to_string(),
            turn_count: 1,
            timestamp: "2026-07-28T00:00:00Z".to_string(),
        };
        let prompt = builder.build_prompt(Some(&info));
        let blocks = prompt.to_anthropic_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].get("cache_control").is_none());
    }
}
