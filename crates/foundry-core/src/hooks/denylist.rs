//! Destructive shell command denylist

use lazy_static::lazy_static;
use regex::Regex;

use super::{HookContext, HookHandler, HookResult};

lazy_static! {
    static ref DEFAULT_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "recursive delete of filesystem root",
            Regex::new(r"\brm\s+(?:-[A-Za-z]*[rR][A-Za-z]*\s+|--recursive\s+)+(?:-\S+\s+)*(?:/|/\*|~|\$HOME)(?:\s|$)")
                .expect("rm pattern"),
        ),
        ("filesystem format", Regex::new(r"\bmkfs(?:\.\w+)?\b").expect("mkfs pattern")),
        ("raw disk copy", Regex::new(r"\bdd\s+if=").expect("dd pattern")),
        (
            "fork bomb",
            Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("fork bomb pattern"),
        ),
        (
            "host power control",
            Regex::new(r"\b(?:shutdown|reboot|halt|poweroff)\b").expect("power pattern"),
        ),
        (
            "piping a download into a shell",
            Regex::new(r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da)?sh\b")
                .expect("pipe to shell pattern"),
        ),
        ("write to block device", Regex::new(r">\s*/dev/sd[a-z]").expect("block device pattern")),
        (
            "world-writable root",
            Regex::new(r"\bchmod\s+-R\s+0?777\s+/(?:\s|$)").expect("chmod pattern"),
        ),
    ];
}

/// Blocks tool input matching any configured pattern. Model calls pass.
pub struct CommandDenylistHandler {
    patterns: Vec<(String, Regex)>,
}

impl CommandDenylistHandler {
    /// Handler with the built-in patterns
    pub fn new() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS
                .iter()
                .map(|(label, re)| (label.to_string(), re.clone()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Add a custom pattern. Invalid regexes are logged and skipped.
    pub fn add_pattern(&mut self, pattern: &str) -> bool {
        match Regex::new(pattern) {
            Ok(re) => {
                self.patterns.push((format!("pattern `{pattern}`"), re));
                true
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid denylist pattern {:?}: {}", pattern, e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Label of the first pattern matching `command`
    pub fn check(&self, command: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(command))
            .map(|(label, _)| label.as_str())
    }
}

impl Default for CommandDenylistHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HookHandler for CommandDenylistHandler {
    fn name(&self) -> &str {
        "command-denylist"
    }

    fn before_tool(&self, ctx: &HookContext) -> HookResult {
        match self.check(&ctx.input) {
            Some(label) => HookResult::block(format!("destructive command ({label})")),
            None => HookResult::allow(),
        }
    }
}
