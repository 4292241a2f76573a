use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AgentError, AgentResult};

// Statement-position DDL/DML keywords . Matches at the start
// of the trimmed string, or immediately after a `;` (stacked statement).
static DDL_DML_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^|;)\s*(INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|REPLACE|LOAD)\b").unwrap()
});
static STACKED_STATEMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r";\s*\S").unwrap());
static COMMENT_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(--\s|#|/\*)").unwrap());

/// Applied to every string argument of a `reads-db` tool.
/// Bound parameters are not subject to this check — callers are
/// responsible for only passing free-form SQL-ish strings here, not values
/// destined for placeholders.
pub fn check_input(value: &str) -> AgentResult<()> {
    if DDL_DML_STATEMENT.is_match(value) {
        return Err(AgentError::input_blocked("DDL/DML keyword found in statement position"));
    }
    if STACKED_STATEMENT.is_match(value) {
        return Err(AgentError::input_blocked("stacked statements are not allowed"));
    }
    if COMMENT_ESCAPE.is_match(value) {
        return Err(AgentError::input_blocked("comment-escape pattern detected"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ddl_dml() {
        assert!(check_input("DROP TABLE users").is_err());
        assert!(check_input("SELECT 1; DELETE FROM users").is_err());
    }

    #[test]
    fn rejects_comment_escape() {
        assert!(check_input("SELECT 1 -- sneaky").is_err());
        assert!(check_input("SELECT /* hide */ 1").is_err());
    }

    #[test]
    fn allows_plain_select() {
        assert!(check_input("SELECT * FROM information_schema.processlist").is_ok());
    }
}
