//! Protected-title guard
//!
//! A handful of pages (workspace home, system templates) must never be deleted.
//! They are recognized by a reserved title prefix configured at construction.

use crate::models::Page;
use crate::services::error::{TreeError, TreeResult};
use regex::{Regex, RegexBuilder};

/// Compiled size limit for the combined prefix pattern
const PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Rejects deletes of pages whose title starts with a reserved prefix
#[derive(Debug, Clone)]
pub struct ProtectedTitleGuard {
    pattern: Option<Regex>,
}

impl ProtectedTitleGuard {
    /// Compile the prefixes into one anchored pattern
    ///
    /// Prefixes are matched literally. An empty list protects nothing.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the combined pattern is rejected by the regex engine,
    /// e.g. when the prefix list exceeds its size limit.
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> TreeResult<Self> {
        Self::with_size_limit(prefixes, PATTERN_SIZE_LIMIT)
    }

    pub(crate) fn with_size_limit<S: AsRef<str>>(prefixes: &[S], size_limit: usize) -> TreeResult<Self> {
        let alternatives: Vec<String> = prefixes
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!("^(?:{})", alternatives.join("|")))
            .size_limit(size_limit)
            .build()
            .map_err(|e| TreeError::InvalidConfig(format!("protected_title_prefixes: {}", e)))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn is_protected(&self, title: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(title))
    }

    /// Fail with `Protected` when `page` carries a reserved title
    pub fn check(&self, page: &Page) -> TreeResult<()> {
        match page.title.as_deref() {
            Some(title) if self.is_protected(title) => {
                tracing::warn!("Refusing to delete protected page {} ('{}')", page.id, title);
                Err(TreeError::protected(&page.id, title))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPage;
    use crate::services::ErrorKind;
    use chrono::Utc;

    #[test]
    fn test_prefix_matching() {
        let guard = ProtectedTitleGuard::new(&["__system:", "Home (", "a.b"]).unwrap();
        assert!(guard.is_protected("__system:home"));
        assert!(guard.is_protected("Home (team)"));
        assert!(guard.is_protected("a.b"));
        // Prefixes are literals, not patterns
        assert!(!guard.is_protected("axb"));
        assert!(!guard.is_protected("Notes __system:"));
    }

    #[test]
    fn test_empty_guard_protects_nothing() {
        let guard = ProtectedTitleGuard::new::<&str>(&[]).unwrap();
        assert!(!guard.is_protected("__system:home"));
    }

    #[test]
    fn test_check_reports_forbidden() {
        let guard = ProtectedTitleGuard::new(&["__system:"]).unwrap();
        let page = NewPage::new("space-1")
            .with_title("__system:home")
            .into_page("a0".to_string(), Utc::now());
        let err = guard.check(&page).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let untitled = NewPage::new("space-1").into_page("a1".to_string(), Utc::now());
        assert!(guard.check(&untitled).is_ok());
    }

    #[test]
    fn test_pattern_over_size_limit_is_rejected() {
        let prefixes = ["__system:", "Home (", "Templates/"];
        let err = ProtectedTitleGuard::with_size_limit(&prefixes, 8).unwrap_err();
        assert!(matches!(err, TreeError::InvalidConfig(_)), "got {:?}", err);
        assert_eq!(err.kind(), ErrorKind::Internal);

        assert!(ProtectedTitleGuard::with_size_limit(&prefixes, PATTERN_SIZE_LIMIT).is_ok());
    }
}
