//! Utility functions shared by `core` and `cli`.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds — the data model's canonical time
/// unit (§3).
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generates an opaque id of the form `<prefix>_<timestamp>_<random>`. The
/// random component is a 40-bit value (far above the ≥30-bit entropy floor
/// in §4.1) rendered as lowercase hex, making collisions improbable within a
/// single process lifetime without pulling in a UUID dependency the
/// grounding project doesn't use.
pub fn new_id(prefix: &str) -> String {
    let timestamp = current_timestamp_millis();
    let random: u64 = rand::rng().random_range(0..(1u64 << 40));
    format!("{prefix}_{timestamp}_{random:010x}")
}

/// Validates a human-supplied identifier (agent id, project name slug, etc.)
/// using the same alphanumeric/hyphen/underscore rule the grounding project
/// applies to its agent ids.
pub fn validate_identifier(name: &str, max_len: usize) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::OrchestratorError::InvalidInput("identifier cannot be empty".into()).into());
    }
    if name.len() > max_len {
        return Err(crate::OrchestratorError::InvalidInput(format!(
            "identifier cannot be longer than {max_len} characters"
        ))
        .into());
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(crate::OrchestratorError::InvalidInput(
            "identifier can only contain alphanumeric characters, hyphens, and underscores".into(),
        )
        .into());
    }
    Ok(())
}

/// Truncates a string to a maximum length with an ellipsis, used by the CLI
/// human-readable renderer for long prompts/results.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}

/// Exponential backoff delay in milliseconds, capped, matching the
/// grounding project's queue retry backoff.
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let delay = base_ms.saturating_mul(1u64 << attempt.min(16));
    delay.min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_id("task");
        let b = new_id("task");
        assert_ne!(a, b);
        assert!(a.starts_with("task_"));
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
    }

    #[test]
    fn identifier_validation_rejects_bad_input() {
        assert!(validate_identifier("", 10).is_err());
        assert!(validate_identifier("a/b", 10).is_err());
        assert!(validate_identifier("valid-id_1", 10).is_ok());
    }
}
