//! Audit handler
//!
//! Records every intercepted call with secrets masked and payloads cut to a
//! fixed size. Never blocks.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::{HookContext, HookEvent, HookHandler, HookOutcome, HookResult};
use crate::diagnostics::truncate_chars;
use crate::types::Timestamp;

/// Records kept in memory for inspection
const RECENT_CAPACITY: usize = 256;

lazy_static! {
    static ref SECRET_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"(?im)(authorization\s*:\s*)[^\r\n]+").expect("authorization pattern"),
            "${1}***",
        ),
        (
            Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+").expect("bearer pattern"),
            "${1}***",
        ),
        (
            Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}").expect("api key pattern"),
            "sk-***",
        ),
        (
            Regex::new(r#"(?i)\b(password|passwd|secret|token|api[_-]?key)(\s*[=:]\s*)("?)[^\s"',;&]+"#)
                .expect("credential assignment pattern"),
            "${1}${2}${3}***",
        ),
    ];
}

/// Replace credentials in `text` with `***`
pub fn mask_secrets(text: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: HookEvent,
    pub job_id: Option<Uuid>,
    pub name: String,
    pub payload: String,
    pub success: Option<bool>,
    pub recorded_at: Timestamp,
}

pub struct AuditHookHandler {
    max_payload_chars: usize,
    recent: Mutex<VecDeque<AuditRecord>>,
}

impl AuditHookHandler {
    pub fn new(max_payload_chars: usize) -> Self {
        Self {
            max_payload_chars,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
        }
    }

    /// Most recent records, oldest first
    pub fn recent(&self) -> Vec<AuditRecord> {
        self.recent.lock().iter().cloned().collect()
    }

    fn record(&self, ctx: &HookContext, payload: &str, success: Option<bool>) {
        let payload = truncate_chars(&mask_secrets(payload), self.max_payload_chars);
        tracing::info!(
            target: "foundry::audit",
            event = %ctx.event,
            job_id = ?ctx.job_id,
            name = %ctx.name,
            success = ?success,
            "{}",
            payload
        );

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(AuditRecord {
            event: ctx.event,
            job_id: ctx.job_id,
            name: ctx.name.clone(),
            payload,
            success,
            recorded_at: chrono::Utc::now(),
        });
    }

    fn outcome_payload(outcome: &HookOutcome) -> &str {
        match &outcome.error {
            Some(error) => error,
            None => &outcome.output,
        }
    }
}

impl Default for AuditHookHandler {
    fn default() -> Self {
        Self::new(2000)
    }
}

impl HookHandler for AuditHookHandler {
    fn name(&self) -> &str {
        "audit"
    }

    fn before_tool(&self, ctx: &HookContext) -> HookResult {
        self.record(ctx, &ctx.input, None);
        HookResult::allow()
    }

    fn after_tool(&self, ctx: &HookContext, outcome: &HookOutcome) {
        self.record(ctx, Self::outcome_payload(outcome), Some(outcome.success));
    }

    fn before_model(&self, ctx: &HookContext) -> HookResult {
        self.record(ctx, &ctx.input, None);
        HookResult::allow()
    }

    fn after_model(&self, ctx: &HookContext, outcome: &HookOutcome) {
        self.record(ctx, Self::outcome_payload(outcome), Some(outcome.success));
    }
}
