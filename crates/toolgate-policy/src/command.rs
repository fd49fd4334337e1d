//! Shell command screening for `run_command`.
//!
//! Blocked patterns are case-insensitive regular expressions. The built-in
//! list below always applies; `custom_blocked_patterns` are added when
//! `block_dangerous_commands` is enabled. Trusted patterns are globs and are
//! only consulted after the blocked check has passed.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use toolgate_protocol::GuardrailSettings;
use tracing::warn;

const BUILTIN_BLOCKED_PATTERNS: &[&str] = &[
    // rm targeting root or home
    r"\brm\s+(-[a-z-]+\s+)*(/|~|\$home)/?\*?(\s|;|&|\||$)",
    r"\bmkfs(\.[a-z0-9]+)?\b",
    r"\bdd\b.*\bof=/dev/(sd|hd|vd|xvd|nvme|disk|mmcblk)",
    r">\s*/dev/(sd|hd|vd|xvd|nvme|disk|mmcblk)",
    // fork bomb
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    r"\bchmod\s+(-[a-z]+\s+)*0?777\s+/(\s|$)",
    r"\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
    r"\b(shutdown|reboot|halt|poweroff)\b",
];

static BUILTIN_BLOCKED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BUILTIN_BLOCKED_PATTERNS
        .iter()
        .filter_map(|pattern| compile_case_insensitive(pattern).ok())
        .collect()
});

fn compile_case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Convert a trusted-command glob to an anchored, case-insensitive regex.
///
/// `*` matches any run of characters (including none), `?` exactly one.
/// Every other character is literal.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::with_capacity(pattern.len() * 2 + 2);
    expression.push('^');
    let mut buffer = [0_u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut buffer))),
        }
    }
    expression.push('$');
    RegexBuilder::new(&expression)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}

/// Whether `text` matches the glob `pattern`. Invalid patterns never match.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    glob_to_regex(pattern).is_ok_and(|regex| regex.is_match(text))
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Compiled blocked and trusted command patterns for one engine.
#[derive(Debug, Clone)]
pub struct CommandGuard {
    custom_blocked: Vec<CompiledPattern>,
    trusted: Vec<CompiledPattern>,
    auto_approve_trusted: bool,
}

impl CommandGuard {
    /// Compile guardrail patterns. Malformed patterns are logged and skipped.
    pub fn from_guardrails(guardrails: &GuardrailSettings) -> Self {
        let custom_blocked = if guardrails.block_dangerous_commands {
            compile_all(
                &guardrails.custom_blocked_patterns,
                compile_case_insensitive,
                "blocked",
            )
        } else {
            Vec::new()
        };
        let trusted = if guardrails.auto_approve_trusted_commands {
            compile_all(&guardrails.trusted_command_patterns, glob_to_regex, "trusted")
        } else {
            Vec::new()
        };
        Self {
            custom_blocked,
            trusted,
            auto_approve_trusted: guardrails.auto_approve_trusted_commands,
        }
    }

    /// The first blocked pattern `command` matches.
    pub fn blocked_match(&self, command: &str) -> Option<&str> {
        BUILTIN_BLOCKED
            .iter()
            .find(|regex| regex.is_match(command))
            .map(Regex::as_str)
            .or_else(|| {
                self.custom_blocked
                    .iter()
                    .find(|pattern| pattern.regex.is_match(command))
                    .map(|pattern| pattern.source.as_str())
            })
    }

    /// The first trusted glob `command` matches, if auto-approval is on.
    pub fn trusted_match(&self, command: &str) -> Option<&str> {
        if !self.auto_approve_trusted {
            return None;
        }
        self.trusted
            .iter()
            .find(|pattern| pattern.regex.is_match(command))
            .map(|pattern| pattern.source.as_str())
    }
}

fn compile_all(
    patterns: &[String],
    compile: fn(&str) -> Result<Regex, regex::Error>,
    kind: &'static str,
) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|source| match compile(source) {
            Ok(regex) => Some(CompiledPattern {
                source: source.clone(),
                regex,
            }),
            Err(error) => {
                warn!(pattern = %source, kind, %error, "skipping invalid command pattern");
                None
            }
        })
        .collect()
}
