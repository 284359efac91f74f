//! Stream Parser: consumes the worker's line-delimited JSON output, extracts
//! assistant text and tool-use/tool-result events, tracks the active
//! subagent, and accumulates token/cost statistics.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_AGENT: &str = "Debussy";

/// Events recognized in the worker's `stream-json` output. Unknown `type`
/// values fall through serde's untagged catch-all via `parse_line`'s
/// best-effort JSON handling rather than failing the whole line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },

    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: Option<UserMessage>,
        #[serde(default)]
        tool_use_result: Option<String>,
    },

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default, rename = "modelUsage")]
        model_usage: Option<HashMap<String, ModelUsage>>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct ContentDelta {
    #[serde(rename = "type")]
    pub delta_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Vec<ToolResultBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub tool_use_id: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ModelUsage {
    #[serde(default)]
    pub context_window: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub context_window: u64,
}

/// Callbacks the caller supplies; all optional so tests and simple callers
/// don't need to implement every hook.
#[derive(Default)]
pub struct ParserCallbacks<'a> {
    pub on_text: Option<Box<dyn FnMut(&str) + 'a>>,
    pub on_tool_use: Option<Box<dyn FnMut(&str) + 'a>>,
    pub on_token_stats: Option<Box<dyn FnMut(&TokenStats) + 'a>>,
    pub on_agent_change: Option<Box<dyn FnMut(&str) + 'a>>,
}

/// Stateful line-oriented parser for the worker's JSON stream. Tracks the
/// active subagent, a pending tool-use-id -> agent map for Task-tool
/// dispatch, and an append-only accumulator of all emitted text (the
/// canonical "session text" the compliance checker scans for evidence).
pub struct StreamParser {
    active_agent: String,
    pending_task_ids: HashMap<String, String>,
    full_text: String,
    pub tool_call_count: u64,
    pub last_stats: TokenStats,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            active_agent: DEFAULT_AGENT.to_string(),
            pending_task_ids: HashMap::new(),
            full_text: String::new(),
            tool_call_count: 0,
            last_stats: TokenStats::default(),
        }
    }

    pub fn reset(&mut self) {
        self.active_agent = DEFAULT_AGENT.to_string();
        self.pending_task_ids.clear();
        self.full_text.clear();
        self.tool_call_count = 0;
        self.last_stats = TokenStats::default();
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Parse one line of worker output, invoking callbacks as events are
    /// recognized. Non-JSON lines and empty lines never panic: an empty
    /// line is skipped, an unparsable line is emitted as plain text.
    pub fn parse_line(&mut self, line: &str, cb: &mut ParserCallbacks<'_>) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamEvent>(trimmed) {
            Ok(event) => self.handle_event(event, cb),
            Err(_) => self.emit_text(trimmed, cb),
        }
    }

    fn handle_event(&mut self, event: StreamEvent, cb: &mut ParserCallbacks<'_>) {
        match event {
            StreamEvent::Assistant { message, .. } => {
                for block in &message.content {
                    match block {
                        ContentBlock::Text { text } => self.emit_text(text, cb),
                        ContentBlock::ToolUse { name, input, id } => {
                            self.handle_tool_use(name, input, id, cb)
                        }
                    }
                }
                if let Some(usage) = &message.usage {
                    self.update_stats_from_usage(usage, 0.0, 200_000, cb);
                }
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if delta.delta_type == "text_delta" {
                    self.emit_text(&delta.text, cb);
                }
            }
            StreamEvent::User { message, tool_use_result } => {
                let Some(message) = message else { return };
                for block in message.content {
                    self.handle_tool_result(block, tool_use_result.as_deref(), cb);
                }
            }
            StreamEvent::Result {
                result,
                is_error,
                total_cost_usd,
                usage,
                model_usage,
                ..
            } => {
                if is_error {
                    if let Some(r) = &result {
                        self.emit_text(&error_banner(r), cb);
                    }
                }
                let context_window = model_usage
                    .as_ref()
                    .and_then(|m| m.values().find_map(|u| u.context_window))
                    .unwrap_or(200_000);
                if let Some(usage) = usage {
                    self.update_stats_from_usage(
                        &usage,
                        total_cost_usd.unwrap_or(0.0),
                        context_window,
                        cb,
                    );
                }
            }
            StreamEvent::System { .. } => {}
        }
    }

    fn update_stats_from_usage(
        &mut self,
        usage: &Usage,
        cost_usd: f64,
        context_window: u64,
        cb: &mut ParserCallbacks<'_>,
    ) {
        let stats = TokenStats {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cost_usd,
            context_window,
        };
        self.last_stats = stats.clone();
        if let Some(on_stats) = cb.on_token_stats.as_mut() {
            on_stats(&stats);
        }
    }

    fn handle_tool_use(&mut self, name: &str, input: &Value, id: &str, cb: &mut ParserCallbacks<'_>) {
        self.tool_call_count += 1;
        let banner = tool_banner(name, input);
        self.emit_text(&banner, cb);

        if name == "Task" {
            if let Some(subagent) = input.get("subagent_type").and_then(|v| v.as_str()) {
                self.pending_task_ids
                    .insert(id.to_string(), subagent.to_string());
                self.set_active_agent(subagent, cb);
            }
        }

        if let Some(on_tool_use) = cb.on_tool_use.as_mut() {
            on_tool_use(name);
        }
    }

    fn handle_tool_result(&mut self, block: ToolResultBlock, tool_use_result: Option<&str>, cb: &mut ParserCallbacks<'_>) {
        if let Some(agent) = self.pending_task_ids.remove(&block.tool_use_id) {
            self.emit_subagent_output(&agent, &block.content, cb);
            self.reset_active_agent(cb);
            return;
        }

        if block.is_error {
            // tool_use_result is the event-level error text; it takes precedence
            // over the block's own content when both are present.
            let message = tool_use_result
                .map(str::to_string)
                .or_else(|| block.content.as_ref().and_then(|c| c.as_str().map(str::to_string)))
                .unwrap_or_else(|| "tool error".to_string());
            self.emit_text(&error_banner(&message), cb);
        }
    }

    fn emit_subagent_output(&mut self, agent: &str, content: &Option<Value>, cb: &mut ParserCallbacks<'_>) {
        let Some(content) = content else { return };
        let lines: Vec<String> = match content {
            Value::String(s) => s.lines().map(str::to_string).collect(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .flat_map(|t| t.lines().map(str::to_string).collect::<Vec<_>>())
                .collect(),
            _ => Vec::new(),
        };

        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("agentId:") {
                continue;
            }
            self.emit_text(&format!("[{agent}] {trimmed}"), cb);
        }
    }

    fn set_active_agent(&mut self, agent: &str, cb: &mut ParserCallbacks<'_>) {
        if self.active_agent != agent {
            self.active_agent = agent.to_string();
            if let Some(on_change) = cb.on_agent_change.as_mut() {
                on_change(agent);
            }
        }
    }

    fn reset_active_agent(&mut self, cb: &mut ParserCallbacks<'_>) {
        self.active_agent = DEFAULT_AGENT.to_string();
        if let Some(on_change) = cb.on_agent_change.as_mut() {
            on_change(DEFAULT_AGENT);
        }
    }

    fn emit_text(&mut self, text: &str, cb: &mut ParserCallbacks<'_>) {
        if !self.full_text.is_empty() {
            self.full_text.push('\n');
        }
        self.full_text.push_str(text);
        if let Some(on_text) = cb.on_text.as_mut() {
            on_text(text);
        }
    }
}

fn error_banner(message: &str) -> String {
    format!("  [ERROR: {}]", truncate(message, 100))
}

fn tool_banner(name: &str, input: &Value) -> String {
    match name {
        "Read" | "Write" | "Edit" => {
            let path = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(basename)
                .unwrap_or_else(|| "file".to_string());
            format!("[{name}: {path}]")
        }
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate(s, 60))
                .unwrap_or_else(|| "command".to_string());
            format!("[Bash: {cmd}]")
        }
        "Glob" | "Grep" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");
            format!("[{name}: {pattern}]")
        }
        "TodoWrite" => {
            let count = input
                .get("todos")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            format!("[TodoWrite: {count} items]")
        }
        "Task" => {
            let desc = input
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("subagent");
            format!("[Task: {desc}]")
        }
        other => format!("[{other}]"),
    }
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parser: &mut StreamParser, line: &str) -> Vec<String> {
        let mut texts = Vec::new();
        {
            let mut cb = ParserCallbacks {
                on_text: Some(Box::new(|t| texts.push(t.to_string()))),
                ..Default::default()
            };
            parser.parse_line(line, &mut cb);
        }
        texts
    }

    #[test]
    fn empty_line_is_skipped() {
        let mut parser = StreamParser::new();
        let texts = parse(&mut parser, "   ");
        assert!(texts.is_empty());
    }

    #[test]
    fn non_json_line_emitted_as_plain_text() {
        let mut parser = StreamParser::new();
        let texts = parse(&mut parser, "not json at all");
        assert_eq!(texts, vec!["not json at all".to_string()]);
    }

    #[test]
    fn assistant_text_block_emitted_and_accumulated() {
        let mut parser = StreamParser::new();
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        let texts = parse(&mut parser, line);
        assert_eq!(texts, vec!["hello".to_string()]);
        assert!(parser.full_text().contains("hello"));
    }

    #[test]
    fn content_block_delta_text_delta_emitted() {
        let mut parser = StreamParser::new();
        let line = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"partial"}}"#;
        let texts = parse(&mut parser, line);
        assert_eq!(texts, vec!["partial".to_string()]);
    }

    #[test]
    fn tool_use_bash_truncates_command() {
        let mut parser = StreamParser::new();
        let long_cmd = "a".repeat(100);
        let line = format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"Bash","input":{{"command":"{long_cmd}"}},"id":"1"}}]}}}}"#
        );
        let texts = parse(&mut parser, &line);
        assert!(texts[0].starts_with("[Bash: "));
        assert!(texts[0].contains("..."));
        assert_eq!(parser.tool_call_count, 1);
    }

    #[test]
    fn unknown_tool_uses_fallback_banner() {
        let mut parser = StreamParser::new();
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"WebFetch","input":{},"id":"1"}]}}"#;
        let texts = parse(&mut parser, line);
        assert_eq!(texts, vec!["[WebFetch]".to_string()]);
    }

    #[test]
    fn task_tool_tracks_subagent_and_fires_agent_change() {
        let mut parser = StreamParser::new();
        let mut agents = Vec::new();
        {
            let mut cb = ParserCallbacks {
                on_agent_change: Some(Box::new(|a| agents.push(a.to_string()))),
                ..Default::default()
            };
            let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Task","input":{"subagent_type":"reviewer","description":"review code"},"id":"abc"}]}}"#;
            parser.parse_line(line, &mut cb);
        }
        assert_eq!(agents, vec!["reviewer".to_string()]);
        assert!(parser.pending_task_ids.contains_key("abc"));
    }

    #[test]
    fn subagent_tool_result_resets_agent_and_emits_prefixed_lines() {
        let mut parser = StreamParser::new();
        {
            let mut cb = ParserCallbacks::default();
            let task_line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Task","input":{"subagent_type":"reviewer"},"id":"abc"}]}}"#;
            parser.parse_line(task_line, &mut cb);
        }

        let mut texts = Vec::new();
        let mut agents = Vec::new();
        {
            let mut cb = ParserCallbacks {
                on_text: Some(Box::new(|t| texts.push(t.to_string()))),
                on_agent_change: Some(Box::new(|a| agents.push(a.to_string()))),
                ..Default::default()
            };
            let result_line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"abc","content":"agentId: xyz\nFound 2 issues"}]}}"#;
            parser.parse_line(result_line, &mut cb);
        }
        assert!(texts.iter().any(|t| t == "[reviewer] Found 2 issues"));
        assert_eq!(agents.last(), Some(&"Debussy".to_string()));
        assert!(parser.pending_task_ids.is_empty());
    }

    #[test]
    fn tool_error_result_emits_truncated_error_banner() {
        let mut parser = StreamParser::new();
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"zzz","is_error":true,"content":"boom"}]}}"#;
        let texts = parse(&mut parser, line);
        assert_eq!(texts, vec!["  [ERROR: boom]".to_string()]);
    }

    #[test]
    fn tool_error_prefers_event_level_tool_use_result_over_block_content() {
        let mut parser = StreamParser::new();
        let line = r#"{"type":"user","tool_use_result":"real failure reason","message":{"content":[{"type":"tool_result","tool_use_id":"zzz","is_error":true,"content":"boom"}]}}"#;
        let texts = parse(&mut parser, line);
        assert_eq!(texts, vec!["  [ERROR: real failure reason]".to_string()]);
    }

    #[test]
    fn result_event_extracts_token_stats() {
        let mut parser = StreamParser::new();
        let mut stats = None;
        {
            let mut cb = ParserCallbacks {
                on_token_stats: Some(Box::new(|s: &TokenStats| stats = Some(s.clone()))),
                ..Default::default()
            };
            let line = r#"{"type":"result","subtype":"success","is_error":false,"total_cost_usd":0.42,"usage":{"input_tokens":10,"output_tokens":20},"modelUsage":{"claude":{"context_window":200000}}}"#;
            parser.parse_line(line, &mut cb);
        }
        let stats = stats.unwrap();
        assert_eq!(stats.input_tokens, 10);
        assert_eq!(stats.cost_usd, 0.42);
        assert_eq!(stats.context_window, 200_000);
    }
}
