//! Shared regex matching helper.
//!
//! Both surface languages (`when` expressions and hardware constraints) and
//! the policy template filters expose regex operators.  They all route
//! through this module so the semantics stay in one place: *search*, not
//! full match.  The pattern may hit anywhere in the value unless it carries
//! its own anchors; surrounding whitespace of the pattern is stripped.

use crate::error::{Error, Result};
use regex::Regex;

/// Compile `pattern`, returning a syntax error naming the pattern.
pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern.trim())
        .map_err(|e| Error::syntax(format!("invalid regular expression '{pattern}': {e}")))
}

/// Search semantics: does `pattern` match anywhere in `haystack`?
pub fn search(pattern: &str, haystack: &str) -> Result<bool> {
    Ok(compile(pattern)?.is_match(haystack))
}

/// Match semantics: does `pattern` match at the start of `haystack`?
pub fn match_start(pattern: &str, haystack: &str) -> Result<bool> {
    let re = compile(pattern)?;
    Ok(re.find(haystack).is_some_and(|m| m.start() == 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_is_unanchored() {
        assert!(search("ora", "fedora-40").unwrap());
        assert!(!search("^ora", "fedora-40").unwrap());
        assert!(search("^fed", "fedora-40").unwrap());
    }

    #[test]
    fn search_strips_pattern_whitespace() {
        assert!(search("  rawhide ", "fedora-rawhide").unwrap());
    }

    #[test]
    fn match_start_is_anchored() {
        assert!(match_start("fed", "fedora-40").unwrap());
        assert!(!match_start("ora", "fedora-40").unwrap());
    }

    #[test]
    fn invalid_pattern_is_syntax_error() {
        let err = search("[unclosed", "anything").unwrap_err();
        assert!(err.to_string().contains("Syntax error"));
    }
}
