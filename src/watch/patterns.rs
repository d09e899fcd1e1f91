// src/watch/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::model::WatchTarget;
use crate::watch::path_utils::is_hidden_rel;

/// Compiled include/exclude/hidden policy for one watch target.
///
/// Paths handed to this filter are relative to the target root and use
/// forward slashes, e.g. `"reports/2024/q1.txt"`. A pattern matches if it
/// matches either the whole relative path or just the file name, so
/// `include = ["*.txt"]` selects text files at any depth.
///
/// Rules:
/// - `exclude` always wins.
/// - an empty `include` list includes everything.
/// - with `ignore_hidden`, any dot-prefixed component hides the path.
#[derive(Clone)]
pub struct TargetFilter {
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    ignore_hidden: bool,
}

impl fmt::Debug for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetFilter")
            .field("has_include", &self.include_set.is_some())
            .field("has_exclude", &self.exclude_set.is_some())
            .field("ignore_hidden", &self.ignore_hidden)
            .finish()
    }
}

impl TargetFilter {
    pub fn compile(target: &WatchTarget) -> Result<Self> {
        Self::from_patterns(&target.include, &target.exclude, target.ignore_hidden)
    }

    pub fn from_patterns(include: &[String], exclude: &[String], ignore_hidden: bool) -> Result<Self> {
        let include_set = if include.is_empty() {
            None
        } else {
            Some(build_globset(include).context("building include globset")?)
        };
        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).context("building exclude globset")?)
        };
        Ok(Self {
            include_set,
            exclude_set,
            ignore_hidden,
        })
    }

    /// Returns true if a file at `rel_path` should be tracked.
    pub fn matches_file(&self, rel_path: &str) -> bool {
        if rel_path.is_empty() {
            return false;
        }
        if self.ignore_hidden && is_hidden_rel(rel_path) {
            return false;
        }
        let name = file_name(rel_path);
        if let Some(exclude) = &self.exclude_set {
            if exclude.is_match(rel_path) || exclude.is_match(name) {
                return false;
            }
        }
        match &self.include_set {
            None => true,
            Some(include) => include.is_match(rel_path) || include.is_match(name),
        }
    }

    /// Returns true if a scan should descend into the directory at `rel_path`.
    ///
    /// Only exclusions and the hidden policy prune directories; include
    /// patterns describe files.
    pub fn allows_dir(&self, rel_path: &str) -> bool {
        if self.ignore_hidden && is_hidden_rel(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude_set {
            let with_slash = format!("{rel_path}/");
            if exclude.is_match(rel_path)
                || exclude.is_match(&with_slash)
                || exclude.is_match(file_name(rel_path))
            {
                return false;
            }
        }
        true
    }
}

fn file_name(rel_path: &str) -> &str {
    rel_path.rsplit('/').next().unwrap_or(rel_path)
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str], ignore_hidden: bool) -> TargetFilter {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        TargetFilter::from_patterns(&include, &exclude, ignore_hidden).unwrap()
    }

    #[test]
    fn include_matches_file_name_at_any_depth() {
        let f = filter(&["*.txt"], &[], false);
        assert!(f.matches_file("a.txt"));
        assert!(f.matches_file("reports/2024/q1.txt"));
        assert!(!f.matches_file("reports/q1.pdf"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let f = filter(&["*.txt"], &["drafts/**", "~*"], false);
        assert!(!f.matches_file("drafts/a.txt"));
        assert!(!f.matches_file("reports/~lock.txt"));
        assert!(f.matches_file("reports/a.txt"));
        assert!(!f.allows_dir("drafts"));
        assert!(f.allows_dir("reports"));
    }

    #[test]
    fn hidden_components_are_skipped_when_asked() {
        let f = filter(&[], &[], true);
        assert!(!f.matches_file(".env"));
        assert!(!f.matches_file("sub/.cache/x.bin"));
        assert!(!f.allows_dir(".git"));
        assert!(f.matches_file("sub/visible.bin"));

        let f = filter(&[], &[], false);
        assert!(f.matches_file(".env"));
    }

    #[test]
    fn bad_pattern_fails_to_compile() {
        let err = TargetFilter::from_patterns(&["[oops".to_string()], &[], false).unwrap_err();
        assert!(format!("{err:#}").contains("[oops"));
    }
}
