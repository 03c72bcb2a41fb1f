//! Ignore-file rules shared by discovery and the ignore stage.
//!
//! Each non-empty line not starting with `#` is a glob relative to the
//! directory holding the ignore file. Patterns without a `/` match at any
//! depth, a leading `!` re-includes, and a match on a directory covers
//! everything below it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::error::Result;
use crate::scan::fs::FileSystem;

/// Rules from a single ignore file.
#[derive(Debug)]
pub struct IgnoreRules {
    base: PathBuf,
    ignore: GlobSet,
    keep: GlobSet,
}

fn compile(pattern: &str) -> std::result::Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

impl IgnoreRules {
    pub fn parse(base: &Path, contents: &str) -> Self {
        let mut ignore = GlobSetBuilder::new();
        let mut keep = GlobSetBuilder::new();

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (negated, pattern) = match line.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let pattern = pattern.trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let anchored = pattern.contains('/');
            let pattern = pattern.trim_start_matches('/');
            let prefix = if anchored { "" } else { "**/" };

            let target = if negated { &mut keep } else { &mut ignore };
            for glob in [format!("{prefix}{pattern}"), format!("{prefix}{pattern}/**")] {
                match compile(&glob) {
                    Ok(glob) => {
                        target.add(glob);
                    }
                    Err(err) => {
                        warn!(target: "scan::stage", base = %base.display(), pattern = line, error = %err, "invalid ignore pattern");
                        break;
                    }
                }
            }
        }

        let build = |builder: GlobSetBuilder| builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self {
            base: base.to_path_buf(),
            ignore: build(ignore),
            keep: build(keep),
        }
    }

    /// Read `dir/file_name`, if present.
    pub async fn load(fs: &dyn FileSystem, dir: &Path, file_name: &str) -> Result<Option<Self>> {
        let path = dir.join(file_name);
        if !fs.path_exists(&path).await {
            return Ok(None);
        }
        let bytes = fs.read(&path).await?;
        let contents = String::from_utf8_lossy(&bytes);
        Ok(Some(Self::parse(dir, &contents)))
    }
}

/// The rules in effect for one directory, nearest ignore file first.
#[derive(Debug, Default, Clone)]
pub struct IgnoreSet(Vec<Arc<IgnoreRules>>);

impl IgnoreSet {
    pub fn new(rules: Vec<Arc<IgnoreRules>>) -> Self {
        Self(rules)
    }

    /// Load the ignore files of `dir` and every ancestor.
    pub async fn load(fs: &dyn FileSystem, dir: &Path, file_name: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for ancestor in dir.ancestors() {
            if let Some(found) = IgnoreRules::load(fs, ancestor, file_name).await? {
                rules.push(Arc::new(found));
            }
        }
        Ok(Self(rules))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A re-include in any applicable file wins over every ignore.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let mut ignored = false;
        for rules in &self.0 {
            let Ok(relative) = path.strip_prefix(&rules.base) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            if rules.keep.is_match(relative) {
                return false;
            }
            ignored |= rules.ignore.is_match(relative);
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::fs::InMemoryFs;

    fn rules(base: &str, contents: &str) -> IgnoreSet {
        IgnoreSet::new(vec![Arc::new(IgnoreRules::parse(Path::new(base), contents))])
    }

    #[test]
    fn unanchored_patterns_match_at_any_depth() {
        let ignores = rules("/lib", "*.png\n# comment\n\n");
        assert!(ignores.is_ignored(Path::new("/lib/a.png")));
        assert!(ignores.is_ignored(Path::new("/lib/x/y/b.png")));
        assert!(!ignores.is_ignored(Path::new("/lib/a.jpg")));
    }

    #[test]
    fn anchored_patterns_and_directories() {
        let ignores = rules("/lib", "/raw/\ndrafts/old\n");
        assert!(ignores.is_ignored(Path::new("/lib/raw")));
        assert!(ignores.is_ignored(Path::new("/lib/raw/a.nef")));
        assert!(!ignores.is_ignored(Path::new("/lib/x/raw/a.nef")));
        assert!(ignores.is_ignored(Path::new("/lib/drafts/old/a.jpg")));
    }

    #[test]
    fn negation_reincludes() {
        let ignores = rules("/lib", "*.jpg\n!keep.jpg\n");
        assert!(ignores.is_ignored(Path::new("/lib/a.jpg")));
        assert!(!ignores.is_ignored(Path::new("/lib/keep.jpg")));
    }

    #[test]
    fn rules_only_apply_below_their_base() {
        let ignores = rules("/lib/a", "*");
        assert!(!ignores.is_ignored(Path::new("/lib/b/x.jpg")));
        assert!(!ignores.is_ignored(Path::new("/lib/a")));
        assert!(ignores.is_ignored(Path::new("/lib/a/x.jpg")));
    }

    #[tokio::test]
    async fn ancestors_contribute_their_ignore_files() {
        let fs = InMemoryFs::new();
        fs.add_file_with_contents("/lib/.ignore", "*.tmp\n");
        fs.add_file_with_contents("/lib/a/.ignore", "drafts\n");
        fs.add_file("/lib/a/x.jpg", 1);

        let set = IgnoreSet::load(&fs, Path::new("/lib/a"), ".ignore")
            .await
            .expect("load");
        assert!(set.is_ignored(Path::new("/lib/a/y.tmp")));
        assert!(set.is_ignored(Path::new("/lib/a/drafts/z.jpg")));
        assert!(!set.is_ignored(Path::new("/lib/a/x.jpg")));
    }
}
