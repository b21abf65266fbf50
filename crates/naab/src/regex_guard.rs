//! Guarded regex execution.
//!
//! User-supplied patterns pass a complexity analyzer before compilation, and
//! execution is bounded by input size, match count, and a wall-clock
//! deadline. The analyzer is deliberately conservative: it rejects the
//! classic ReDoS shapes (nested quantifiers, adjacent unbounded wildcards,
//! very wide alternations) rather than attempting exact backtracking
//! analysis — the `regex` engine itself is linear-time, so the analyzer's
//! job is to keep pathological patterns from exhausting compile-time and
//! match-state limits.

use std::time::{Duration, Instant};

use regex::RegexBuilder;

use crate::exception::{ErrorKind, RunError, RunResult};

/// Maximum pattern length in bytes.
pub const MAX_PATTERN_LEN: usize = 1024;
/// Maximum subject input in bytes.
pub const MAX_REGEX_INPUT: usize = 100 * 1024;
/// Maximum matches returned by a single call.
pub const MAX_MATCH_COUNT: usize = 10_000;
/// Per-call execution deadline.
pub const REGEX_DEADLINE: Duration = Duration::from_secs(1);
/// Compiled-program size limit handed to the regex engine.
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Rejects ReDoS-prone patterns before compilation.
pub(crate) fn analyze_pattern(pattern: &str) -> RunResult<()> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(reject(pattern, "pattern exceeds the 1 KiB length cap"));
    }

    let mut alternations = 0usize;
    // Tracks, per open group, whether a quantifier appeared inside it.
    let mut group_has_quantifier: Vec<bool> = Vec::new();
    let mut prev_was_unbounded = false;
    let mut chars = pattern.chars().peekable();
    let mut escaped = false;
    let mut in_class = false;

    while let Some(c) = chars.next() {
        if escaped {
            escaped = false;
            prev_was_unbounded = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '(' => {
                group_has_quantifier.push(false);
                prev_was_unbounded = false;
            }
            ')' => {
                let inner_quantified = group_has_quantifier.pop().unwrap_or(false);
                // A quantifier directly after a group that itself contains a
                // quantifier is the (a+)+ family.
                if inner_quantified && matches!(chars.peek(), Some('*' | '+') | Some('{')) {
                    return Err(reject(pattern, "nested quantifiers"));
                }
                prev_was_unbounded = false;
            }
            '*' | '+' => {
                if let Some(flag) = group_has_quantifier.last_mut() {
                    *flag = true;
                }
                // `.*.*` and friends: two adjacent unbounded quantifiers.
                if prev_was_unbounded {
                    return Err(reject(pattern, "adjacent unbounded quantifiers"));
                }
                prev_was_unbounded = true;
            }
            '{' => {
                if let Some(flag) = group_has_quantifier.last_mut() {
                    *flag = true;
                }
            }
            '|' => {
                alternations += 1;
                prev_was_unbounded = false;
            }
            '.' => {
                // `.` keeps prev_was_unbounded only through a following
                // quantifier, handled above.
            }
            _ => prev_was_unbounded = false,
        }
    }

    if alternations > 50 {
        return Err(reject(pattern, "too many alternation branches"));
    }
    Ok(())
}

fn reject(pattern: &str, why: &str) -> RunError {
    RunError::err(
        ErrorKind::RegexComplexity,
        format!("pattern rejected ({why}): {pattern:?}"),
    )
}

fn compile(pattern: &str) -> RunResult<regex::Regex> {
    analyze_pattern(pattern)?;
    RegexBuilder::new(pattern)
        .size_limit(COMPILED_SIZE_LIMIT)
        .dfa_size_limit(COMPILED_SIZE_LIMIT)
        .build()
        .map_err(|err| RunError::err(ErrorKind::RegexComplexity, format!("invalid pattern: {err}")))
}

fn check_input(input: &str) -> RunResult<()> {
    if input.len() > MAX_REGEX_INPUT {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            format!("regex input of {} bytes exceeds the 100 KiB cap", input.len()),
        ));
    }
    Ok(())
}

/// Whether `pattern` matches anywhere in `input`, under the guard's caps.
pub(crate) fn safe_is_match(pattern: &str, input: &str) -> RunResult<bool> {
    check_input(input)?;
    let re = compile(pattern)?;
    Ok(re.is_match(input))
}

/// All (non-overlapping) matches of `pattern` in `input`, capped at
/// [`MAX_MATCH_COUNT`] and by the per-call deadline.
pub(crate) fn safe_find_all(pattern: &str, input: &str) -> RunResult<Vec<String>> {
    check_input(input)?;
    let re = compile(pattern)?;
    let started = Instant::now();
    let mut out = Vec::new();
    for m in re.find_iter(input) {
        if out.len() >= MAX_MATCH_COUNT {
            return Err(RunError::err(
                ErrorKind::ResourceLimit,
                "regex match count exceeds the 10000 cap",
            ));
        }
        if started.elapsed() > REGEX_DEADLINE {
            return Err(RunError::err(ErrorKind::ResourceLimit, "regex execution deadline exceeded"));
        }
        out.push(m.as_str().to_owned());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_quantifiers_are_rejected() {
        assert!(analyze_pattern("(a+)+").is_err());
        assert!(analyze_pattern("(a*)*b").is_err());
        assert!(analyze_pattern("(ab|cd)+x{2}").is_ok());
    }

    #[test]
    fn adjacent_wildcards_are_rejected() {
        assert!(analyze_pattern(".*.*=.*").is_err());
        assert!(analyze_pattern(r"\d+\s\w+").is_ok());
    }

    #[test]
    fn wide_alternation_is_rejected() {
        let pattern: String = (0..60).map(|i| format!("a{i}|")).collect::<String>() + "z";
        assert!(analyze_pattern(&pattern).is_err());
    }

    #[test]
    fn escaped_metacharacters_do_not_count() {
        assert!(analyze_pattern(r"\(a\+\)\+").is_ok());
        assert!(analyze_pattern(r"[+*]+").is_ok());
    }

    #[test]
    fn matching_works_under_caps() {
        assert!(safe_is_match(r"ab+c", "xabbbc").unwrap());
        let found = safe_find_all(r"\d+", "a1 b22 c333").unwrap();
        assert_eq!(found, vec!["1", "22", "333"]);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let big = "a".repeat(MAX_REGEX_INPUT + 1);
        assert!(safe_is_match("a", &big).is_err());
    }
}
