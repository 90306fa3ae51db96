//! Hook Pipeline
//!
//! Policy gate consulted before every tool execution and model call.
//!
//! ```text
//! caller ──> before_tool / before_model ──> handler 1 ──> handler 2 ──> ... ──> ALLOW
//!                                               │
//!                                               └── BLOCK (short-circuit, later handlers skipped)
//!
//! caller <── after_tool / after_model  ──> every handler, failures swallowed
//! ```
//!
//! The pipeline carries no policy of its own. Concrete rules live in
//! handlers such as [`AuditHookHandler`] and [`CommandDenylistHandler`].

pub mod audit;
pub mod denylist;

pub use audit::{mask_secrets, AuditHookHandler, AuditRecord};
pub use denylist::CommandDenylistHandler;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Tool name used for build commands run inside a sandbox
pub const SANDBOX_EXECUTE_TOOL: &str = "sandbox.execute";

/// Interception point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    BeforeTool,
    AfterTool,
    BeforeModel,
    AfterModel,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::BeforeTool => "before_tool",
            HookEvent::AfterTool => "after_tool",
            HookEvent::BeforeModel => "before_model",
            HookEvent::AfterModel => "after_model",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intercepted call. Lives only for the duration of that call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    pub event: HookEvent,
    pub job_id: Option<Uuid>,
    /// Tool or model name, e.g. `sandbox.execute` or `architect`
    pub name: String,
    /// Command line or prompt
    pub input: String,
    pub metadata: BTreeMap<String, String>,
}

impl HookContext {
    pub fn tool(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(HookEvent::BeforeTool, name, input)
    }

    pub fn model(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(HookEvent::BeforeModel, name, input)
    }

    fn new(event: HookEvent, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            event,
            job_id: None,
            name: name.into(),
            input: input.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn at(&self, event: HookEvent) -> Self {
        let mut ctx = self.clone();
        ctx.event = event;
        ctx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookDecision {
    Allow,
    Block,
}

/// Decision returned by a gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub decision: HookDecision,
    pub reason: Option<String>,
    /// Name of the handler that blocked
    pub handler: Option<String>,
}

impl HookResult {
    pub fn allow() -> Self {
        Self {
            decision: HookDecision::Allow,
            reason: None,
            handler: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: HookDecision::Block,
            reason: Some(reason.into()),
            handler: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == HookDecision::Allow
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == HookDecision::Block
    }

    /// Reason for logs, never empty for a block
    pub fn describe(&self) -> String {
        match (&self.decision, &self.reason, &self.handler) {
            (HookDecision::Allow, _, _) => "allowed".to_string(),
            (HookDecision::Block, Some(reason), Some(handler)) => {
                format!("blocked by {handler}: {reason}")
            }
            (HookDecision::Block, Some(reason), None) => format!("blocked: {reason}"),
            (HookDecision::Block, None, _) => "blocked by policy".to_string(),
        }
    }
}

/// What happened after a gated call ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl HookOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// A policy handler. Every method defaults to allow / no-op.
pub trait HookHandler: Send + Sync {
    fn name(&self) -> &str;

    fn before_tool(&self, _ctx: &HookContext) -> HookResult {
        HookResult::allow()
    }

    fn after_tool(&self, _ctx: &HookContext, _outcome: &HookOutcome) {}

    fn before_model(&self, _ctx: &HookContext) -> HookResult {
        HookResult::allow()
    }

    fn after_model(&self, _ctx: &HookContext, _outcome: &HookOutcome) {}
}

/// Hook pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub enabled: bool,
    /// Register [`AuditHookHandler`]
    pub audit: bool,
    /// Register [`CommandDenylistHandler`] with its default patterns
    pub denylist: bool,
    /// Longest payload the audit handler records, in chars
    pub audit_max_payload_chars: usize,
    /// Extra regexes blocked in tool input
    pub denied_patterns: Vec<String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audit: true,
            denylist: true,
            audit_max_payload_chars: 2000,
            denied_patterns: Vec::new(),
        }
    }
}

impl HookConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_denied_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.denied_patterns.push(pattern.into());
        self
    }
}

/// Ordered list of handlers
#[derive(Clone)]
pub struct HookPipeline {
    handlers: Vec<Arc<dyn HookHandler>>,
    enabled: bool,
}

impl Default for HookPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPipeline")
            .field("handlers", &self.handler_names())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl HookPipeline {
    /// Enabled pipeline with no handlers (allows everything)
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            handlers: Vec::new(),
            enabled: false,
        }
    }

    /// Pipeline with the built-in handlers selected by `config`
    pub fn from_config(config: &HookConfig) -> Self {
        let mut pipeline = Self::new();
        pipeline.enabled = config.enabled;
        if config.audit {
            pipeline.register(Arc::new(AuditHookHandler::new(
                config.audit_max_payload_chars,
            )));
        }
        if config.denylist || !config.denied_patterns.is_empty() {
            let mut denylist = if config.denylist {
                CommandDenylistHandler::new()
            } else {
                CommandDenylistHandler::empty()
            };
            for pattern in &config.denied_patterns {
                denylist.add_pattern(pattern);
            }
            pipeline.register(Arc::new(denylist));
        }
        pipeline
    }

    pub fn with_handler(mut self, handler: Arc<dyn HookHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        tracing::debug!("Registered hook handler {}", handler.name());
        self.handlers.push(handler);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    /// Gate a tool call. The first BLOCK wins and later handlers never run.
    pub fn before_tool(&self, ctx: &HookContext) -> HookResult {
        let ctx = ctx.at(HookEvent::BeforeTool);
        self.gate(&ctx, |h, c| h.before_tool(c))
    }

    /// Gate a model call. The first BLOCK wins and later handlers never run.
    pub fn before_model(&self, ctx: &HookContext) -> HookResult {
        let ctx = ctx.at(HookEvent::BeforeModel);
        self.gate(&ctx, |h, c| h.before_model(c))
    }

    /// Notify every handler that a tool call finished. Never fails.
    pub fn after_tool(&self, ctx: &HookContext, outcome: &HookOutcome) {
        let ctx = ctx.at(HookEvent::AfterTool);
        self.notify(&ctx, |h, c| h.after_tool(c, outcome));
    }

    /// Notify every handler that a model call finished. Never fails.
    pub fn after_model(&self, ctx: &HookContext, outcome: &HookOutcome) {
        let ctx = ctx.at(HookEvent::AfterModel);
        self.notify(&ctx, |h, c| h.after_model(c, outcome));
    }

    fn gate<F>(&self, ctx: &HookContext, check: F) -> HookResult
    where
        F: Fn(&dyn HookHandler, &HookContext) -> HookResult,
    {
        if !self.enabled {
            return HookResult::allow();
        }
        for handler in &self.handlers {
            let mut result = check(handler.as_ref(), ctx);
            if result.is_blocked() {
                result.handler.get_or_insert_with(|| handler.name().to_string());
                tracing::warn!(
                    event = %ctx.event,
                    name = %ctx.name,
                    handler = handler.name(),
                    "Hook blocked call: {}",
                    result.reason.as_deref().unwrap_or("no reason given")
                );
                return result;
            }
        }
        HookResult::allow()
    }

    fn notify<F>(&self, ctx: &HookContext, notify: F)
    where
        F: Fn(&dyn HookHandler, &HookContext),
    {
        if !self.enabled {
            return;
        }
        for handler in &self.handlers {
            let call = AssertUnwindSafe(|| notify(handler.as_ref(), ctx));
            if catch_unwind(call).is_err() {
                tracing::error!(
                    event = %ctx.event,
                    handler = handler.name(),
                    "Hook handler panicked; ignoring"
                );
            }
        }
    }
}
