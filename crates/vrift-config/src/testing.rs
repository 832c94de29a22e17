//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary base directory
//! - Any number of watched roots under it
//! - A unique cookie prefix so parallel tests never see each other's cookies
//!
//! # Usage
//!
//! ```ignore
//! use vrift_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::with_roots(2).unwrap();
//!     // env.roots are canonical, empty, and removed on drop
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::SyncConfig;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Canonical base directory holding all roots
    pub base: PathBuf,
    /// Watched roots, canonicalized
    pub roots: Vec<PathBuf>,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment with a single root
    pub fn new() -> anyhow::Result<Self> {
        Self::with_roots(1)
    }

    /// Create a test environment with `count` watched roots
    pub fn with_roots(count: usize) -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // macOS hands out /var/... which resolves to /private/var/...
        let base = temp_dir.path().canonicalize()?;

        let mut roots = Vec::with_capacity(count);
        for i in 0..count {
            let root = base.join(format!("root{}", i));
            std::fs::create_dir_all(&root)?;
            roots.push(root);
        }

        Ok(Self {
            _temp_dir: temp_dir,
            base,
            roots,
            test_id,
        })
    }

    /// First root (every environment has at least one unless built with zero)
    pub fn root(&self) -> &PathBuf {
        &self.roots[0]
    }

    /// A path under the base that was never created
    pub fn missing_dir(&self) -> PathBuf {
        self.base.join(format!("missing-{}", self.test_id))
    }

    /// Sync config with a prefix unique to this environment
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            cookie_prefix: format!(".vrift-test-{}-", self.test_id),
            ..Default::default()
        }
    }

    /// Create a test file with content
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
