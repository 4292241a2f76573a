use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PASSWORD_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z])password\w*\s*[:=]\s*(\S+)").unwrap());
static KEY_OR_SECRET_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^a-z])(?:key|secret)\w*\s*[:=]\s*([A-Za-z0-9]{40,})").unwrap());

const PLACEHOLDER_MARKERS: [&str; 6] = ["your", "example", "xxx", "...", "placeholder", "<"];

/// A value is a documentation placeholder if it's short or
/// contains one of the placeholder markers; placeholders are never redacted.
fn is_placeholder(value: &str) -> bool {
    if value.len() < 16 {
        return true;
    }
    let lower = value.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Redacts probable secrets from agent-produced text in place, leaving
/// documentation placeholders untouched. Never blocks the output solely on
/// suspicion — values are replaced, nothing is rejected.
pub fn redact_output(text: &str) -> String {
    let after_passwords = PASSWORD_ASSIGNMENT.replace_all(text, |caps: &Captures| {
        let value = &caps[1];
        if is_placeholder(value) {
            caps[0].to_string()
        } else {
            caps[0].replacen(value, "***", 1)
        }
    });

    KEY_OR_SECRET_TOKEN
        .replace_all(&after_passwords, |caps: &Captures| {
            let value = &caps[1];
            if is_placeholder(value) {
                caps[0].to_string()
            } else {
                caps[0].replacen(value, "***", 1)
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_password_is_untouched() {
        let out = redact_output("DB_PASSWORD=your-password-here");
        assert_eq!(out, "DB_PASSWORD=your-password-here");
    }

    #[test]
    fn real_password_is_redacted() {
        let out = redact_output("password=sup3r-s3cret-actual-value");
        assert!(out.contains("***"));
        assert!(!out.contains("sup3r-s3cret-actual-value"));
    }

    #[test]
    fn long_api_key_with_label_is_redacted() {
        let out = redact_output("api_key=8f3c9e2a00112233445566778899aabbccddeeff0011 rotate it");
        assert!(out.contains("***"));
    }

    #[test]
    fn empty_output_passes_through() {
        assert_eq!(redact_output(""), "");
    }
}
