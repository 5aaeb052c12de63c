//! Reply drafting with graceful degradation.
//!
//! Each request walks an ordered list of [`DispatchLevel`]s. Inside a level,
//! optional request features are shed one at a time on failure: first the
//! remote MCP server, then extended thinking. Whatever happens, callers get a
//! cleaned string, empty when nothing worked.

use crate::cleanup::clean_reply;
use crate::client::MessagesApi;
use crate::messages::{
    tool_result_block, McpServer, Message, MessagesRequest, MessagesResponse, ThinkingConfig,
    ToolChoice, ToolConfiguration,
};
use crate::prompt::{self, Prompt, TranscriptEntry, REFERENCE_TOOL};
use async_trait::async_trait;
use responder_core::{KnowledgeError, LlmConfig, LlmError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const NO_REFERENCE_CONTEXT: &str = "No reference context available.";
const MIN_TOOL_CHARS: usize = 500;
const MAX_TOOL_CHARS: usize = 20_000;

/// Resolves a reference query for the model's tool call.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn lookup(&self, query: &str, max_chars: usize) -> Result<String, KnowledgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchLevel {
    /// Offer the reference tool and honour one round of tool calls.
    ToolMediated,
    /// Single request, no tool.
    Direct,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub enable_tool_use: bool,
    pub tool_max_context_chars: usize,
    pub thinking_budget: Option<u32>,
    pub mcp_server: Option<McpServer>,
    pub max_comment_chars: usize,
}

impl OrchestratorSettings {
    /// `mcp_url` is only used when MCP is enabled in `config`.
    pub fn from_config(config: &LlmConfig, system_prompt: &str, mcp_url: &str) -> Self {
        let mcp_server = (config.mcp.enabled && !mcp_url.trim().is_empty()).then(|| McpServer {
            authorization_token: Some(config.mcp.auth_token.trim().to_string()).filter(|t| !t.is_empty()),
            tool_configuration: (!config.mcp.tool_allowlist.is_empty()).then(|| ToolConfiguration {
                enabled: true,
                allowed_tools: config.mcp.tool_allowlist.clone(),
            }),
            ..McpServer::url(config.mcp.server_name.clone(), mcp_url.trim())
        });
        if config.mcp.enabled && mcp_server.is_none() {
            warn!("MCP enabled but no server URL is configured; MCP disabled");
        }

        let system_prompt = system_prompt.trim();
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: if system_prompt.is_empty() {
                prompt::DEFAULT_SYSTEM_PROMPT.to_string()
            } else {
                system_prompt.to_string()
            },
            enable_tool_use: config.enable_tool_use,
            tool_max_context_chars: config.tool_max_context_chars,
            thinking_budget: config
                .enable_thinking
                .then(|| config.thinking_budget.max(1024)),
            mcp_server,
            max_comment_chars: config.max_comment_chars,
        }
    }
}

pub struct ReplyOrchestrator {
    api: Arc<dyn MessagesApi>,
    lookup: Option<Arc<dyn ReferenceLookup>>,
    settings: OrchestratorSettings,
}

impl ReplyOrchestrator {
    pub fn new(
        api: Arc<dyn MessagesApi>,
        lookup: Option<Arc<dyn ReferenceLookup>>,
        settings: OrchestratorSettings,
    ) -> Self {
        info!(
            "Reply orchestrator ready (model={}, tool_use={}, thinking={}, mcp={})",
            settings.model,
            settings.enable_tool_use && lookup.is_some(),
            settings.thinking_budget.is_some(),
            settings.mcp_server.is_some()
        );
        Self {
            api,
            lookup,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn levels(&self) -> Vec<DispatchLevel> {
        let mut levels = Vec::with_capacity(2);
        if self.settings.enable_tool_use && self.lookup.is_some() {
            levels.push(DispatchLevel::ToolMediated);
        }
        levels.push(DispatchLevel::Direct);
        levels
    }

    /// Draft an answer to a new post. Empty on failure.
    pub async fn generate_reply(&self, subject: &str, body: &str) -> String {
        info!("Generating reply (subject={})", prompt::char_prefix(subject, 50));
        let prompt = prompt::question_prompt(subject, body);
        self.finish(self.dispatch(&prompt).await, "reply")
    }

    /// Draft a reply to `comment` given the thread so far. Empty on failure.
    pub async fn generate_followup(
        &self,
        subject: &str,
        body: &str,
        transcript: &[TranscriptEntry],
        commenter: &str,
        comment: &str,
    ) -> String {
        info!("Generating follow-up (commenter={})", commenter);
        let prompt = prompt::followup_prompt(subject, body, transcript, commenter, comment);
        self.finish(self.dispatch(&prompt).await, "follow-up")
    }

    fn finish(&self, result: Result<MessagesResponse, LlmError>, label: &str) -> String {
        match result {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    info!(
                        "{} usage: input={}, output={}",
                        label, usage.input_tokens, usage.output_tokens
                    );
                }
                clean_reply(&response.text(), self.settings.max_comment_chars)
            }
            Err(e) => {
                error!("Model request failed ({}): {}", label, e);
                String::new()
            }
        }
    }

    async fn dispatch(&self, prompt: &Prompt) -> Result<MessagesResponse, LlmError> {
        for level in self.levels() {
            let result = match level {
                DispatchLevel::ToolMediated => self.tool_mediated(prompt).await,
                DispatchLevel::Direct => self.send(self.request(vec![Message::user(&prompt.direct)])).await,
            };
            match result {
                Ok(response) => return Ok(response),
                Err(e) => warn!("{:?} dispatch failed, falling back: {}", level, e),
            }
        }
        Err(LlmError::DispatchExhausted)
    }

    async fn tool_mediated(&self, prompt: &Prompt) -> Result<MessagesResponse, LlmError> {
        let user = Message::user(&prompt.with_tool);
        let mut first_request = self.request(vec![user.clone()]);
        first_request.tools = vec![prompt::reference_tool()];
        first_request.tool_choice = Some(ToolChoice::auto());
        let first = self.send(first_request).await?;

        if !first.stopped_for_tool_use() {
            return Ok(first);
        }

        let mut results = Vec::new();
        for call in first.tool_calls().into_iter().filter(|c| c.name == REFERENCE_TOOL) {
            let query = call
                .input
                .get("query")
                .and_then(|q| q.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .unwrap_or(prompt.default_query.as_str());
            let max_chars = call
                .input
                .get("max_chars")
                .and_then(|m| m.as_u64())
                .map(|m| (m as usize).clamp(MIN_TOOL_CHARS, MAX_TOOL_CHARS))
                .unwrap_or(self.settings.tool_max_context_chars);

            let payload = self.resolve_reference(query, max_chars).await;
            results.push(tool_result_block(&call.id, &payload));
        }
        if results.is_empty() {
            return Ok(first);
        }

        let mut continuation = self.request(vec![
            user,
            Message::assistant_blocks(first.content),
            Message::user_blocks(results),
        ]);
        continuation.tools = vec![prompt::reference_tool()];
        self.send(continuation).await
    }

    async fn resolve_reference(&self, query: &str, max_chars: usize) -> String {
        debug!("Reference tool query: {}", prompt::char_prefix(query, 80));
        let Some(lookup) = &self.lookup else {
            return NO_REFERENCE_CONTEXT.to_string();
        };
        match lookup.lookup(query, max_chars).await {
            Ok(text) if !text.trim().is_empty() => prompt::char_prefix(&text, max_chars).to_string(),
            Ok(_) => NO_REFERENCE_CONTEXT.to_string(),
            Err(e) => {
                warn!("Reference lookup failed: {}", e);
                NO_REFERENCE_CONTEXT.to_string()
            }
        }
    }

    fn request(&self, messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            system: self.settings.system_prompt.clone(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            thinking: self.settings.thinking_budget.map(ThinkingConfig::enabled),
            mcp_servers: self.settings.mcp_server.iter().cloned().collect(),
        }
    }

    /// Sends `request`, shedding MCP and then thinking on failure.
    async fn send(&self, mut request: MessagesRequest) -> Result<MessagesResponse, LlmError> {
        loop {
            let error = match self.api.create(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if request.uses_mcp() {
                warn!("Request failed with MCP attached; retrying without MCP: {}", error);
                request.mcp_servers.clear();
            } else if request.thinking.is_some() {
                warn!("Request failed with thinking enabled; retrying without thinking: {}", error);
                request.thinking = None;
            } else {
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageContent;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Pops scripted results in order and records every request.
    struct FakeApi {
        script: Mutex<Vec<Result<MessagesResponse, LlmError>>>,
        requests: Mutex<Vec<MessagesRequest>>,
    }

    impl FakeApi {
        fn new(mut script: Vec<Result<MessagesResponse, LlmError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<MessagesRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagesApi for FakeApi {
        async fn create(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(LlmError::DispatchExhausted))
        }
    }

    struct FixedLookup(&'static str);

    #[async_trait]
    impl ReferenceLookup for FixedLookup {
        async fn lookup(&self, _query: &str, _max_chars: usize) -> Result<String, KnowledgeError> {
            Ok(self.0.to_string())
        }
    }

    fn text_response(text: &str) -> MessagesResponse {
        MessagesResponse {
            content: vec![json!({ "type": "text", "text": text })],
            stop_reason: Some("end_turn".to_string()),
            usage: None,
        }
    }

    fn unavailable() -> LlmError {
        LlmError::ServiceUnavailable {
            provider: "test".to_string(),
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            model: "test-model".to_string(),
            max_tokens: 1024,
            system_prompt: "be helpful".to_string(),
            enable_tool_use: true,
            tool_max_context_chars: 12_000,
            thinking_budget: None,
            mcp_server: None,
            max_comment_chars: 2900,
        }
    }

    fn orchestrator(api: Arc<FakeApi>, settings: OrchestratorSettings) -> ReplyOrchestrator {
        ReplyOrchestrator::new(api, Some(Arc::new(FixedLookup("refunds within 30 days"))), settings)
    }

    #[tokio::test]
    async fn test_tool_level_failure_falls_back_to_direct() {
        let api = FakeApi::new(vec![Err(unavailable()), Ok(text_response("Direct answer."))]);
        let orch = orchestrator(api.clone(), settings());

        assert_eq!(orch.generate_reply("Refunds", "How?").await, "Direct answer.");

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        assert!(requests[1].tools.is_empty());
        assert!(requests[1].tool_choice.is_none());
    }

    #[tokio::test]
    async fn test_every_level_failing_yields_empty() {
        let api = FakeApi::new(vec![Err(unavailable()), Err(unavailable())]);
        let orch = orchestrator(api.clone(), settings());

        assert_eq!(orch.generate_reply("Refunds", "How?").await, "");
        assert_eq!(api.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_call_is_resolved_and_continued() {
        let first = MessagesResponse {
            content: vec![
                json!({ "type": "text", "text": "Checking." }),
                json!({ "type": "tool_use", "id": "tu_1", "name": REFERENCE_TOOL, "input": { "query": "refund policy", "max_chars": 5 } }),
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: None,
        };
        let api = FakeApi::new(vec![Ok(first), Ok(text_response("Refunds take 30 days."))]);
        let orch = orchestrator(api.clone(), settings());

        assert_eq!(orch.generate_reply("Refunds", "How?").await, "Refunds take 30 days.");

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        let continuation = &requests[1];
        assert_eq!(continuation.messages.len(), 3);
        let MessageContent::Blocks(blocks) = &continuation.messages[2].content else {
            panic!("tool results should be blocks");
        };
        assert_eq!(blocks[0]["tool_use_id"], "tu_1");
        // max_chars below the floor is raised to 500, so the whole payload fits
        assert_eq!(blocks[0]["content"], Value::from("refunds within 30 days"));
    }

    #[tokio::test]
    async fn test_no_tool_call_takes_first_response() {
        let api = FakeApi::new(vec![Ok(text_response("Straight answer."))]);
        let orch = orchestrator(api.clone(), settings());

        assert_eq!(orch.generate_reply("Refunds", "How?").await, "Straight answer.");
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_options_shed_mcp_then_thinking() {
        let api = FakeApi::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(text_response("Plain answer.")),
        ]);
        let orch = orchestrator(
            api.clone(),
            OrchestratorSettings {
                thinking_budget: Some(2048),
                mcp_server: Some(McpServer::url("knowledge_mcp", "http://127.0.0.1:8765/mcp")),
                ..settings()
            },
        );

        assert_eq!(orch.generate_reply("Refunds", "How?").await, "Plain answer.");

        let requests = api.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].uses_mcp() && requests[0].thinking.is_some());
        assert!(!requests[1].uses_mcp() && requests[1].thinking.is_some());
        assert!(!requests[2].uses_mcp() && requests[2].thinking.is_none());
        // still inside the tool-mediated level
        assert!(requests.iter().all(|r| r.tools.len() == 1));
    }

    #[tokio::test]
    async fn test_without_lookup_only_direct_level_runs() {
        let api = FakeApi::new(vec![Ok(text_response("<think>x</think>Answer."))]);
        let orch = ReplyOrchestrator::new(api.clone(), None, settings());

        assert_eq!(orch.levels(), vec![DispatchLevel::Direct]);
        assert_eq!(orch.generate_reply("Refunds", "How?").await, "Answer.");
        assert!(api.requests()[0].tools.is_empty());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = LlmConfig::default();
        config.mcp.enabled = true;
        config.mcp.auth_token = " secret ".to_string();
        config.enable_thinking = false;

        let settings = OrchestratorSettings::from_config(&config, "  ", "http://127.0.0.1:8765/mcp");
        assert_eq!(settings.system_prompt, prompt::DEFAULT_SYSTEM_PROMPT);
        assert!(settings.thinking_budget.is_none());
        let server = settings.mcp_server.unwrap();
        assert_eq!(server.authorization_token.as_deref(), Some("secret"));
        assert_eq!(server.url, "http://127.0.0.1:8765/mcp");

        let no_url = OrchestratorSettings::from_config(&config, "custom", "");
        assert!(no_url.mcp_server.is_none());
        assert_eq!(no_url.system_prompt, "custom");
    }
}
