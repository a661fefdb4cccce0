use globset::{Glob, GlobSet, GlobSetBuilder};

use semindex_core::{Error, Result};

const TEST_PATTERNS: &[&str] = &[
    "**/*.test.*",
    "**/*.spec.*",
    "**/*_test.*",
    "**/__tests__/**",
    "**/tests/**",
    "**/test/**",
];

/// Which side of the test/non-test split a code search keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TestFilter {
    #[default]
    Any,
    OnlyTests,
    ExcludeTests,
}

pub struct TestPaths {
    set: GlobSet,
}

impl TestPaths {
    pub fn new() -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for p in TEST_PATTERNS {
            builder.add(Glob::new(p).map_err(|e| Error::Config(format!("bad test glob '{p}': {e}")))?);
        }
        let set = builder.build().map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { set })
    }

    pub fn is_test(&self, relative_path: &str) -> bool { self.set.is_match(relative_path) }

    pub fn keep(&self, filter: TestFilter, relative_path: &str) -> bool {
        match filter {
            TestFilter::Any => true,
            TestFilter::OnlyTests => self.is_test(relative_path),
            TestFilter::ExcludeTests => !self.is_test(relative_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_test_paths() {
        let t = TestPaths::new().unwrap();
        for p in ["src/auth.test.ts", "web/button.spec.js", "pkg/db_test.go", "src/__tests__/a.js", "tests/it.rs", "test/x.py"] {
            assert!(t.is_test(p), "{p}");
        }
        for p in ["src/auth.ts", "src/testing_utils.rs", "contest/main.rs"] {
            assert!(!t.is_test(p), "{p}");
        }
    }

    #[test]
    fn filter_modes() {
        let t = TestPaths::new().unwrap();
        assert!(t.keep(TestFilter::Any, "tests/a.rs"));
        assert!(!t.keep(TestFilter::ExcludeTests, "tests/a.rs"));
        assert!(!t.keep(TestFilter::OnlyTests, "src/a.rs"));
    }
}
