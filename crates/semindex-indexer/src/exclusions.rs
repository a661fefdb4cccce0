use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use semindex_core::traits::ExclusionRules;
use semindex_core::{Error, Result};

/// Directories that never hold reviewable sources.
const EXCLUDED_DIRS: &[&str] = &[
    ".git", ".hg", ".svn", "node_modules", "target", "dist", "build", "out", ".next", ".nuxt", "vendor",
    "__pycache__", ".venv", "venv", ".tox", "coverage", ".idea", ".vscode", ".cache",
];

const EXCLUDED_FILES: &[&str] = &[
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.map",
    "**/*.{png,jpg,jpeg,gif,ico,bmp,webp,svg,pdf}",
    "**/*.{zip,gz,tgz,tar,bz2,xz,7z,jar,war}",
    "**/*.{woff,woff2,ttf,otf,eot}",
    "**/*.{mp3,mp4,mov,wav,avi}",
    "**/*.{so,dylib,dll,exe,bin,o,a,class,pyc,wasm}",
    "**/.DS_Store",
];

/// Glob-based exclusion rules matched against project-relative paths.
pub struct DefaultExclusions {
    set: GlobSet,
}

impl DefaultExclusions {
    pub fn new() -> Result<Self> { Self::with_extra(&[]) }

    /// Defaults plus caller-supplied globs (e.g. `docs/generated/**`).
    pub fn with_extra(extra: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut add = |pattern: &str| -> Result<()> {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::Config(format!("bad exclusion glob '{pattern}': {e}")))?;
            builder.add(glob);
            Ok(())
        };
        for dir in EXCLUDED_DIRS {
            add(&format!("**/{dir}"))?;
            add(&format!("**/{dir}/**"))?;
        }
        for pattern in EXCLUDED_FILES {
            add(pattern)?;
        }
        for pattern in extra {
            add(pattern)?;
        }
        let set = builder.build().map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { set })
    }
}

impl ExclusionRules for DefaultExclusions {
    fn is_excluded(&self, relative_path: &Path) -> bool { self.set.is_match(relative_path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules() {
        let rules = DefaultExclusions::new().unwrap();
        for p in ["node_modules", "node_modules/react/index.js", "web/node_modules/x.js", ".git/HEAD", "Cargo.lock", "assets/logo.png", "app.min.js"] {
            assert!(rules.is_excluded(Path::new(p)), "{p} should be excluded");
        }
        for p in ["src/main.rs", "docs/guide.md", "build.rs", "targets/list.txt"] {
            assert!(!rules.is_excluded(Path::new(p)), "{p} should be indexed");
        }
    }

    #[test]
    fn extra_globs_apply() {
        let rules = DefaultExclusions::with_extra(&["docs/generated/**".to_string()]).unwrap();
        assert!(rules.is_excluded(Path::new("docs/generated/api.md")));
        assert!(!rules.is_excluded(Path::new("docs/guide.md")));
    }
}
