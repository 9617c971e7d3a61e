//! Audit filter rules.
//!
//! # Responsibilities
//! - Parse `[method:]pattern` rule strings from configuration
//! - Normalize request paths and methods for comparison
//! - Decide whether a request is audited
//!
//! # Design Decisions
//! - Matching is case-insensitive: patterns and paths are both lower-cased
//! - `*` and `?` never cross a `/` separator, and `**` is just `*`
//! - Braces are literal characters, not alternation
//! - Globs are compiled once at parse time, never per request
//! - Repeated slashes collapse, so `///a//b//` and `a/b` compare equal
//! - No rules = audit everything

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

/// Why a configured rule string was rejected.
#[derive(Debug, Error)]
pub enum FilterRuleError {
    #[error("empty pattern in filter rule {0:?}")]
    EmptyPattern(String),

    #[error("invalid glob in filter rule {rule:?}: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: globset::Error,
    },
}

/// A method + glob predicate selecting audited requests.
#[derive(Debug, Clone)]
pub struct FilterRule {
    method: Option<String>,
    pattern: String,
    matcher: GlobMatcher,
}

impl FilterRule {
    /// Build a rule from an optional method and a raw pattern.
    pub fn new(method: Option<&str>, pattern: &str) -> Result<Self, FilterRuleError> {
        let method = method
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty());

        if pattern.trim().is_empty() {
            return Err(FilterRuleError::EmptyPattern(pattern.to_string()));
        }
        let pattern = normalize_path(pattern.trim());

        let matcher = GlobBuilder::new(&segment_glob(&pattern))
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| FilterRuleError::InvalidPattern {
                rule: pattern.clone(),
                source,
            })?
            .compile_matcher();

        Ok(Self {
            method,
            pattern,
            matcher,
        })
    }

    /// Parse a `pattern` or `method:pattern` rule string.
    ///
    /// The prefix before the first `:` is only treated as a method when it
    /// is empty or purely alphabetic, so a pattern containing a colon
    /// (`/files/a:b`) is kept whole.
    pub fn parse(raw: &str) -> Result<Self, FilterRuleError> {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some((method, pattern)) if method.bytes().all(|b| b.is_ascii_alphabetic()) => {
                Self::new(Some(method), pattern).map_err(|e| match e {
                    FilterRuleError::EmptyPattern(_) => FilterRuleError::EmptyPattern(raw.to_string()),
                    other => other,
                })
            }
            _ => Self::new(None, raw).map_err(|e| match e {
                FilterRuleError::EmptyPattern(_) => FilterRuleError::EmptyPattern(raw.to_string()),
                other => other,
            }),
        }
    }

    /// Method this rule is restricted to, if any.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// The normalized glob pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match an already-normalized method and path.
    fn matches_normalized(&self, method: &str, path: &str) -> bool {
        if let Some(expected) = &self.method {
            if expected != method {
                return false;
            }
        }
        self.matcher.is_match(path)
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{{{} {}}}", method, self.pattern),
            None => f.write_str(&self.pattern),
        }
    }
}

/// Parse configured rule strings, skipping (and logging) malformed ones.
pub fn parse_filter_rules<S: AsRef<str>>(raw: &[S]) -> Vec<FilterRule> {
    let rules: Vec<FilterRule> = raw
        .iter()
        .filter_map(|entry| match FilterRule::parse(entry.as_ref()) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule = entry.as_ref(), error = %e, "Skipping invalid filter rule");
                None
            }
        })
        .collect();

    if rules.is_empty() {
        tracing::info!("No filter rules applied, auditing every request");
    } else {
        for rule in &rules {
            tracing::info!(rule = %rule, "Applied filter rule");
        }
    }

    rules
}

/// Strip leading/trailing slashes, collapse repeated ones, lower-case, and
/// re-prefix a single `/`.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(&segment.to_lowercase());
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Restrict a pattern to single-segment wildcards: runs of `*` collapse to
/// one and `{`/`}` outside a character class are escaped.
fn segment_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    let mut in_class = false;
    let mut after_star = false;

    while let Some(c) = chars.next() {
        let star = c == '*' && !in_class;
        match c {
            '\\' => {
                glob.push(c);
                if let Some(escaped) = chars.next() {
                    glob.push(escaped);
                }
            }
            '[' if !in_class => {
                in_class = true;
                glob.push(c);
            }
            ']' if in_class => {
                in_class = false;
                glob.push(c);
            }
            '*' if star && after_star => {}
            '{' | '}' if !in_class => {
                glob.push('\\');
                glob.push(c);
            }
            _ => glob.push(c),
        }
        after_star = star;
    }
    glob
}

/// Decide whether a request is audited.
pub fn matches(method: &str, path: &str, rules: &[FilterRule]) -> bool {
    if rules.is_empty() {
        return true;
    }

    let path = normalize_path(path);
    let method = method.to_ascii_uppercase();

    rules.iter().any(|rule| rule.matches_normalized(&method, &path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(method: Option<&str>, pattern: &str) -> FilterRule {
        FilterRule::new(method, pattern).unwrap()
    }

    #[test]
    fn empty_rules_match_everything() {
        assert!(matches("GET", "/any/path", &[]));
        assert!(matches("DELETE", "", &[]));
    }

    #[test]
    fn product_wildcard() {
        let rules = vec![
            rule(Some("GET"), "/api/v2/product/*"),
            rule(Some("GET"), "/api/v3/product/*"),
        ];
        assert!(matches(
            "GET",
            "/api/v3/product/basseyn-bestway-karkasnyy-steel-pro-splash-in-shade-244-h-51-sm-1688-l-56432",
            &rules
        ));
        assert!(matches("GET", "/api/v3/product/smart-chasy-huawei-gt-6-46mm-cvet-chernyy-atm-b19", &rules));
    }

    #[test]
    fn star_does_not_cross_separator() {
        let rules = vec![rule(None, "/api/v3/product/*")];
        assert!(matches("GET", "/api/v3/product/anything-here", &rules));
        assert!(!matches("GET", "/api/v3/product/sub/path", &rules));
    }

    #[test]
    fn double_star_stays_in_one_segment() {
        let rules = vec![rule(None, "/api/**")];
        assert!(matches("GET", "/api/a", &rules));
        assert!(!matches("GET", "/api/a/b", &rules));
        assert!(!matches("GET", "/api/a/b/c", &rules));

        let inner = vec![rule(None, "/api/**/items")];
        assert!(matches("GET", "/api/v1/items", &inner));
        assert!(!matches("GET", "/api/v1/x/items", &inner));
    }

    #[test]
    fn braces_are_literal() {
        let rules = vec![rule(None, "/api/{id}")];
        assert!(matches("GET", "/api/{id}", &rules));
        assert!(!matches("GET", "/api/id", &rules));

        let alternation = vec![rule(None, "/{a,b}")];
        assert!(!matches("GET", "/a", &alternation));
        assert!(matches("GET", "/{a,b}", &alternation));
    }

    #[test]
    fn segment_glob_rewrites() {
        assert_eq!(segment_glob("/a/***/b"), "/a/*/b");
        assert_eq!(segment_glob("/x/{y}"), "/x/\\{y\\}");
        assert_eq!(segment_glob("/[{}]"), "/[{}]");
        assert_eq!(segment_glob("/\\**"), "/\\**");
        assert_eq!(segment_glob("/\\\\**"), "/\\\\*");
    }

    #[test]
    fn question_mark_matches_one_segment_char() {
        let rules = vec![rule(None, "/v?/items")];
        assert!(matches("GET", "/v1/items", &rules));
        assert!(!matches("GET", "/v10/items", &rules));
        assert!(!matches("GET", "//items", &rules));
    }

    #[test]
    fn method_specific_and_any_method() {
        let post = vec![rule(Some("POST"), "/submit/data")];
        assert!(matches("POST", "/submit/data", &post));
        assert!(!matches("GET", "/submit/data", &post));

        let any = vec![rule(None, "/api/item/*")];
        assert!(matches("GET", "/api/item/123", &any));
        assert!(matches("PATCH", "/api/item/123", &any));

        let delete = vec![rule(Some("DELETE"), "/records/*")];
        assert!(matches("DELETE", "/records/456", &delete));
    }

    #[test]
    fn path_mismatch() {
        let rules = vec![rule(Some("GET"), "/specific/path")];
        assert!(!matches("GET", "/different/path", &rules));
    }

    #[test]
    fn case_insensitive_both_ways() {
        assert!(matches("GET", "/Mixed/Case/tEsT", &[rule(None, "/mixed/case/test")]));
        assert!(matches("GET", "/mixed/case", &[rule(None, "/Mixed/Case")]));
        assert!(matches("get", "/case/test", &[rule(Some("GET"), "/case/test")]));
        assert!(matches("GET", "/case/test", &[rule(Some("get"), "/case/test")]));
    }

    #[test]
    fn empty_path_matches_root() {
        assert!(matches("GET", "", &[rule(None, "/")]));
    }

    #[test]
    fn path_trimming() {
        assert!(matches("GET", "///trim/test//", &[rule(None, "/trim/test")]));
    }

    #[test]
    fn normalization_is_idempotent() {
        for path in ["", "/", "a/b", "///a//b//", "/API/Items/"] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(&once), once);
        }
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("///a//b//"), normalize_path("a/b"));
        assert_eq!(normalize_path("a/b"), "/a/b");
    }

    #[test]
    fn parse_rule_forms() {
        let plain = FilterRule::parse("  /api/*/ ").unwrap();
        assert_eq!(plain.method(), None);
        assert_eq!(plain.pattern(), "/api/*");

        let with_method = FilterRule::parse("post:/Orders/*").unwrap();
        assert_eq!(with_method.method(), Some("POST"));
        assert_eq!(with_method.pattern(), "/orders/*");
        assert_eq!(with_method.to_string(), "{POST /orders/*}");

        let empty_method = FilterRule::parse(":/x").unwrap();
        assert_eq!(empty_method.method(), None);

        let colon_in_path = FilterRule::parse("/files/a:b").unwrap();
        assert_eq!(colon_in_path.method(), None);
        assert_eq!(colon_in_path.pattern(), "/files/a:b");
    }

    #[test]
    fn parse_rejects_empty_pattern() {
        assert!(matches!(FilterRule::parse("GET:"), Err(FilterRuleError::EmptyPattern(_))));
        assert!(matches!(FilterRule::parse("   "), Err(FilterRuleError::EmptyPattern(_))));
    }

    #[test]
    fn parse_rejects_broken_glob() {
        assert!(matches!(
            FilterRule::parse("/items/[abc"),
            Err(FilterRuleError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn malformed_rules_are_skipped() {
        let rules = parse_filter_rules(&["GET:/a/*", "", "POST:", "/b/[x"]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].to_string(), "{GET /a/*}");
    }
}
