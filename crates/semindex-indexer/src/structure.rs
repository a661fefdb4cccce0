//! Directory-tree snapshot of a project, stored as one row per project.

use std::path::Path;

use walkdir::WalkDir;

use semindex_core::paths::{project_name, relative_path};
use semindex_core::traits::ExclusionRules;

pub const STRUCTURE_ID_PREFIX: &str = "__project_structure__";

pub fn structure_id(project_root: &Path) -> String { format!("{STRUCTURE_ID_PREFIX}{}", project_name(project_root)) }

/// Indented tree, directories suffixed with `/`, excluded paths pruned.
/// Stops after `max_entries` entries with a trailing marker.
pub fn render_tree(root: &Path, exclusions: &dyn ExclusionRules, max_depth: usize, max_entries: usize) -> String {
    let mut out = format!("{}/\n", project_name(root));
    let mut written = 0usize;
    let mut truncated = false;
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth.max(1))
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclusions.is_excluded(Path::new(&relative_path(root, e.path()))));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(error) => {
                tracing::debug!(%error, "skipping unreadable entry");
                continue;
            }
        };
        if written >= max_entries {
            truncated = true;
            break;
        }
        let name = entry.file_name().to_string_lossy();
        let indent = "  ".repeat(entry.depth());
        let slash = if entry.file_type().is_dir() { "/" } else { "" };
        out.push_str(&format!("{indent}{name}{slash}\n"));
        written += 1;
    }
    if truncated {
        out.push_str("  ...\n");
    }
    out
}
