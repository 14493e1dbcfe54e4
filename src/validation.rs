//! Input validation for operator-supplied values. The approval gate is
//! a trust boundary: actor names and edited text arrive from the CLI
//! and end up in the audit log and on the wire.

use crate::error::{ReplyscoutError, Result};

const MAX_ACTOR_LEN: usize = 64;
const MAX_REASON_LEN: usize = 500;

/// Validate an operator name for audit attribution
pub fn validate_actor(actor: &str) -> Result<&str> {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        return Err(ReplyscoutError::InvalidConfig(
            "actor name cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_ACTOR_LEN {
        return Err(ReplyscoutError::InvalidConfig(format!(
            "actor name exceeds {MAX_ACTOR_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ReplyscoutError::InvalidConfig(
            "actor name contains control characters".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Validate a free-text reason (rejection, correction)
pub fn validate_reason(reason: &str) -> Result<&str> {
    let trimmed = reason.trim();
    if trimmed.chars().count() > MAX_REASON_LEN {
        return Err(ReplyscoutError::InvalidConfig(format!(
            "reason exceeds {MAX_REASON_LEN} characters"
        )));
    }
    Ok(trimmed)
}

/// Strip control characters from outgoing reply text. Newlines survive;
/// everything else non-printable is dropped.
#[must_use]
pub fn sanitize_outgoing_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_rules() {
        assert_eq!(validate_actor("  sam  ").unwrap(), "sam");
        assert!(validate_actor("").is_err());
        assert!(validate_actor("   ").is_err());
        assert!(validate_actor("a\u{0007}b").is_err());
        assert!(validate_actor(&"x".repeat(100)).is_err());
    }

    #[test]
    fn test_sanitize_keeps_newlines_drops_controls() {
        assert_eq!(
            sanitize_outgoing_text("hello\u{0000} there\nfriend\u{001b}"),
            "hello there\nfriend"
        );
    }

    #[test]
    fn test_reason_length_cap() {
        assert!(validate_reason(&"r".repeat(501)).is_err());
        assert_eq!(validate_reason(" fine ").unwrap(), "fine");
    }
}
