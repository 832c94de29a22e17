//! Ignore patterns for reported changes
//!
//! Loads ignore patterns from the vrift-config [watch] section. Cookie files
//! are classified before this matcher runs and are never ignored.

use std::path::Path;

use vrift_config::WatchConfig;

/// Ignore pattern matcher
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<String>,
}

impl IgnoreMatcher {
    /// Create a matcher from the [watch] config section
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::with_patterns(&config.ignore_patterns)
    }

    /// Create a matcher with custom patterns
    pub fn with_patterns(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.to_vec(),
        }
    }

    /// Check if a path should be ignored
    pub fn should_ignore(&self, path: &Path) -> bool {
        self.patterns.iter().any(|pattern| {
            // Glob pattern (e.g., *.pyc)
            if let Some(suffix) = pattern.strip_prefix('*') {
                path.extension()
                    .is_some_and(|ext| format!(".{}", ext.to_string_lossy()) == suffix)
            } else {
                path.components()
                    .any(|c| c.as_os_str().to_string_lossy() == *pattern)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_patterns() {
        let matcher = IgnoreMatcher::from_config(&WatchConfig::default());
        assert!(matcher.should_ignore(Path::new("/w/.vrift/state")));
        assert!(matcher.should_ignore(Path::new("/w/sub/.DS_Store")));
        assert!(!matcher.should_ignore(Path::new("/w/src/main.rs")));
    }

    #[test]
    fn test_extension_glob() {
        let matcher = IgnoreMatcher::with_patterns(&["*.pyc".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from("pkg/mod.pyc")));
        assert!(!matcher.should_ignore(&PathBuf::from("pkg/mod.py")));
    }

    #[test]
    fn test_component_match_is_exact() {
        let matcher = IgnoreMatcher::with_patterns(&["target".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from("/p/target/debug/bin")));
        assert!(!matcher.should_ignore(&PathBuf::from("/p/targets/file")));
    }
}
