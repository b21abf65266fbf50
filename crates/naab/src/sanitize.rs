//! Error message sanitization.
//!
//! Messages that leave the core in production or strict mode are scrubbed:
//! absolute paths become repository-relative, memory addresses are replaced
//! with a placeholder, runtime type spellings are simplified, and common
//! secret shapes are redacted.

use std::{path::Path, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Redaction behavior for outgoing error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SanitizeMode {
    /// No redaction; full detail for local debugging.
    Development,
    /// Redact paths, addresses, and secrets.
    #[default]
    Production,
    /// Redact and additionally suppress structural details.
    Strict,
}

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]{4,16}").expect("address pattern"));

static ABS_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/[A-Za-z0-9_.@-]+){2,}").expect("path pattern"));

/// Key/value shapes for credentials: `api_key=...`, `password: ...`, etc.
static SECRET_KV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(api[_-]?key|secret|password|passwd|token|authorization)\b\s*[=:]\s*\S+"#)
        .expect("secret kv pattern")
});

/// Bearer-style and provider-prefixed key material.
static SECRET_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(sk|pk|ghp|gho|xox[bap])[-_][A-Za-z0-9_-]{16,}\b").expect("secret token pattern")
});

static PRIVATE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----")
        .expect("private key pattern")
});

/// Verbose internal type spellings collapsed for user-facing output.
static TYPE_SPELLING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:HeapData|Value)::([A-Za-z]+)\b").expect("type spelling pattern"));

/// Outcome of a sanitizer pass, including whether anything was redacted so
/// the caller can record an audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sanitized {
    pub message: String,
    pub redacted: bool,
}

/// Scrubs an error message according to `mode`.
///
/// `repo_root` trims absolute paths under it to relative form; other
/// absolute paths keep only their final component.
pub(crate) fn sanitize_error(message: &str, mode: SanitizeMode, repo_root: Option<&Path>) -> Sanitized {
    if mode == SanitizeMode::Development {
        return Sanitized {
            message: message.to_owned(),
            redacted: false,
        };
    }

    let mut redacted = false;
    let mut out = message.to_owned();

    if PRIVATE_KEY_RE.is_match(&out) {
        out = PRIVATE_KEY_RE.replace_all(&out, "<redacted private key>").into_owned();
        redacted = true;
    }
    if SECRET_KV_RE.is_match(&out) {
        out = SECRET_KV_RE.replace_all(&out, "$1=<redacted>").into_owned();
        redacted = true;
    }
    if SECRET_TOKEN_RE.is_match(&out) {
        out = SECRET_TOKEN_RE.replace_all(&out, "<redacted>").into_owned();
        redacted = true;
    }
    if ADDRESS_RE.is_match(&out) {
        out = ADDRESS_RE.replace_all(&out, "<address>").into_owned();
        redacted = true;
    }

    out = ABS_PATH_RE
        .replace_all(&out, |caps: &regex::Captures<'_>| trim_path(&caps[0], repo_root))
        .into_owned();

    out = TYPE_SPELLING_RE.replace_all(&out, "$1").into_owned();

    if mode == SanitizeMode::Strict {
        // Strict mode keeps the leading clause only, dropping structural
        // detail after the first separator.
        if let Some(cut) = out.find([';', '(']) {
            out.truncate(cut);
            out = out.trim_end().to_owned();
        }
    }

    Sanitized { message: out, redacted }
}

fn trim_path(path: &str, repo_root: Option<&Path>) -> String {
    if let Some(root) = repo_root
        && let Some(root_str) = root.to_str()
        && let Some(stripped) = path.strip_prefix(root_str)
    {
        return stripped.trim_start_matches('/').to_owned();
    }
    path.rsplit('/').next().unwrap_or(path).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_mode_is_identity() {
        let sanitized = sanitize_error("failed at /home/user/app/m.naab 0xdeadbeef", SanitizeMode::Development, None);
        assert!(!sanitized.redacted);
        assert!(sanitized.message.contains("/home/user/app"));
    }

    #[test]
    fn addresses_are_scrubbed() {
        let sanitized = sanitize_error("pointer 0xdeadbeef dangling", SanitizeMode::Production, None);
        assert_eq!(sanitized.message, "pointer <address> dangling");
        assert!(sanitized.redacted);
    }

    #[test]
    fn paths_trim_to_repo_relative() {
        let sanitized = sanitize_error(
            "cannot open /srv/app/modules/db.naab",
            SanitizeMode::Production,
            Some(Path::new("/srv/app")),
        );
        assert_eq!(sanitized.message, "cannot open modules/db.naab");
    }

    #[test]
    fn foreign_paths_keep_final_component() {
        let sanitized = sanitize_error("cannot open /etc/ssl/private.pem", SanitizeMode::Production, None);
        assert_eq!(sanitized.message, "cannot open private.pem");
    }

    #[test]
    fn secrets_are_redacted() {
        let sanitized = sanitize_error("login failed: password=hunter2", SanitizeMode::Production, None);
        assert_eq!(sanitized.message, "login failed: password=<redacted>");
        assert!(sanitized.redacted);

        let sanitized = sanitize_error("key sk-abcdefghijklmnopqrstuv rejected", SanitizeMode::Production, None);
        assert!(sanitized.message.contains("<redacted>"));
    }

    #[test]
    fn strict_mode_drops_structural_detail() {
        let sanitized = sanitize_error(
            "TypeError in field init; expected int (got string at slot 3)",
            SanitizeMode::Strict,
            None,
        );
        assert_eq!(sanitized.message, "TypeError in field init");
    }
}
