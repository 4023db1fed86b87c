//! Protected-directory classification
//!
//! Pure predicate deciding whether files under a directory are subject to
//! pre-write backup. Matching is a case-insensitive substring check of the
//! configured directory-name markers against the candidate path, with
//! oversized paths rejected as invalid rather than matched.

use crate::config::ProtectConfig;
use std::path::Path;
use tracing::debug;

/// Classifies directories as protected or not
#[derive(Debug, Clone)]
pub struct PathClassifier {
    /// Lowercased marker patterns, each wrapped in path separators
    patterns: Vec<String>,
    /// Paths longer than this are rejected
    max_path_len: usize,
}

impl PathClassifier {
    /// Build a classifier from the protection configuration.
    ///
    /// Each marker `m` matches as the path component `/m/`, anywhere in the
    /// directory path.
    pub fn new(config: &ProtectConfig) -> Self {
        let patterns = config
            .markers
            .iter()
            .map(|m| format!("/{}/", m.trim_matches('/').to_lowercase()))
            .collect();

        PathClassifier {
            patterns,
            max_path_len: config.max_path_len,
        }
    }

    /// Check whether the given directory is protected.
    ///
    /// The directory is compared with a trailing separator so a marker can
    /// match the final path component.
    pub fn is_protected(&self, directory: &Path) -> bool {
        let raw = directory.to_string_lossy();
        if raw.len() > self.max_path_len {
            debug!(directory = %raw, "path exceeds maximum length, treating as unprotected");
            return false;
        }

        let mut candidate = raw.to_lowercase();
        if !candidate.ends_with('/') {
            candidate.push('/');
        }

        self.patterns.iter().any(|p| candidate.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classifier() -> PathClassifier {
        PathClassifier::new(&ProtectConfig::default())
    }

    #[test]
    fn test_protected_directories() {
        let c = classifier();
        assert!(c.is_protected(Path::new("/data/secret")));
        assert!(c.is_protected(Path::new("/data/secret/reports")));
        assert!(c.is_protected(Path::new("/home/user/private")));
    }

    #[test]
    fn test_unprotected_directories() {
        let c = classifier();
        assert!(!c.is_protected(Path::new("/data/public")));
        assert!(!c.is_protected(Path::new("/data/secrets-archive")));
        assert!(!c.is_protected(Path::new("/data/top-secret-ish")));
    }

    #[test]
    fn test_case_insensitive() {
        let c = classifier();
        assert!(c.is_protected(Path::new("/data/Secret")));
        assert!(c.is_protected(Path::new("/data/PRIVATE/docs")));
    }

    #[test]
    fn test_oversized_path_rejected() {
        let c = classifier();
        let long = PathBuf::from(format!("/data/secret/{}", "x".repeat(2048)));
        assert!(!c.is_protected(&long));
    }

    #[test]
    fn test_custom_markers() {
        let config = ProtectConfig {
            markers: vec!["vault".to_string()],
            max_path_len: 1024,
        };
        let c = PathClassifier::new(&config);
        assert!(c.is_protected(Path::new("/srv/vault/keys")));
        assert!(!c.is_protected(Path::new("/data/secret")));
    }
}
