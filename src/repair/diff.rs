//! Patch-size sampling against the version-control baseline.
//!
//! The loop samples a per-file changed-line map before and after each
//! attempt's actions; the difference between the two maps is the actual
//! patch size the attempt introduced, enforced against `maxPatchLines`
//! independently of whatever the adapters predicted.

use crate::snapshot::SNAPSHOT_EXCLUDES;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::process::Command;
use tracing::debug;

/// Per-file total changed lines (additions + deletions).
pub type DiffMap = BTreeMap<String, u64>;

/// Sample the working tree's diff versus the baseline.
///
/// Uses `git diff --numstat HEAD`, falling back to the plain index diff
/// when there is no commit yet. Without git (or outside a repository) the
/// map is empty, which disables the actual-size budget gracefully.
#[must_use]
pub fn sample_diff(cwd: &Path) -> DiffMap {
    let output = numstat(cwd, &["diff", "--numstat", "HEAD"])
        .or_else(|| numstat(cwd, &["diff", "--numstat"]));
    let Some(text) = output else {
        debug!("no version-control baseline, diff map empty");
        return DiffMap::new();
    };
    parse_numstat(&text)
}

/// Total per-file delta between two samples: `Σ |after - before|` over the
/// union of keys.
#[must_use]
pub fn delta_lines(before: &DiffMap, after: &DiffMap) -> u64 {
    let mut keys: std::collections::BTreeSet<&String> = before.keys().collect();
    keys.extend(after.keys());

    keys.into_iter()
        .map(|key| {
            let b = before.get(key).copied().unwrap_or(0);
            let a = after.get(key).copied().unwrap_or(0);
            a.abs_diff(b)
        })
        .sum()
}

fn numstat(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parse `git diff --numstat` output into a [`DiffMap`].
///
/// Lines are `<added>\t<deleted>\t<path>`; binary files report `-` and are
/// skipped, as are paths under the snapshot exclusions.
#[must_use]
pub fn parse_numstat(text: &str) -> DiffMap {
    let mut map = DiffMap::new();
    for line in text.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Ok(added), Ok(deleted)) = (added.parse::<u64>(), deleted.parse::<u64>()) else {
            continue;
        };
        if is_excluded_path(path) {
            continue;
        }
        map.insert(path.to_string(), added + deleted);
    }
    map
}

fn is_excluded_path(path: &str) -> bool {
    Path::new(path)
        .components()
        .next()
        .and_then(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .is_some_and(|first| SNAPSHOT_EXCLUDES.contains(&first))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numstat() {
        let map = parse_numstat("3\t1\tsrc/a.ts\n0\t5\tsrc/b.ts\n-\t-\tassets/logo.png\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["src/a.ts"], 4);
        assert_eq!(map["src/b.ts"], 5);
    }

    #[test]
    fn test_parse_numstat_skips_excluded() {
        let map = parse_numstat("10\t0\tnode_modules/x.js\n2\t0\tsrc/a.ts\n");
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("src/a.ts"));
    }

    #[test]
    fn test_delta_over_union_of_keys() {
        let mut before = DiffMap::new();
        before.insert("a.ts".into(), 4);
        before.insert("gone.ts".into(), 2);
        let mut after = DiffMap::new();
        after.insert("a.ts".into(), 10);
        after.insert("new.ts".into(), 3);

        // |10-4| + |0-2| + |3-0| = 11
        assert_eq!(delta_lines(&before, &after), 11);
    }

    #[test]
    fn test_delta_identical_maps_is_zero() {
        let mut map = DiffMap::new();
        map.insert("a.ts".into(), 7);
        assert_eq!(delta_lines(&map, &map.clone()), 0);
    }

    #[test]
    fn test_sample_diff_without_repo_is_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(sample_diff(temp.path()).is_empty());
    }
}
