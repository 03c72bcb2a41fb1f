use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use lumen_model::MediaKind;
use tracing::{debug, trace};

use crate::error::Result;
use crate::scan::classify::MediaClassifier;
use crate::scan::fs::{FileSystem, is_hidden, is_symlink_dir, list_dir};
use crate::scan::ignore::{IgnoreRules, IgnoreSet};

/// Per-pass memo of directory and file classification results.
///
/// One cache is created for each discovery pass and shared (behind an
/// `Arc`) by every album job that pass produces. Results are only an
/// optimization: an empty cache gives the same answers, just slower.
#[derive(Default)]
pub struct TraversalCache {
    media_kinds: DashMap<PathBuf, Option<MediaKind>>,
    dirs: DashMap<PathBuf, bool>,
    ignore_file: Option<String>,
    /// Parsed ignore file of each directory looked at so far.
    ignore_rules: DashMap<PathBuf, Option<Arc<IgnoreRules>>>,
}

impl fmt::Debug for TraversalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraversalCache")
            .field("files", &self.media_kinds.len())
            .field("dirs", &self.dirs.len())
            .field("ignore_file", &self.ignore_file)
            .finish()
    }
}

/// Outcome of walking one directory.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Walk {
    Known(bool),
    /// The directory could not be listed.
    Unknown,
}

impl TraversalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose walks skip whatever `file_name` ignore files exclude,
    /// so directories holding only ignored media are not albums.
    pub fn with_ignore_file(file_name: impl Into<String>) -> Self {
        Self {
            ignore_file: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Classify `path`, consulting the memo first. Errors are returned to
    /// the caller and not remembered.
    pub async fn media_kind(
        &self,
        fs: &dyn FileSystem,
        classifier: &dyn MediaClassifier,
        path: &Path,
    ) -> Result<Option<MediaKind>> {
        if let Some(kind) = self.media_kinds.get(path) {
            return Ok(*kind);
        }
        let kind = classifier.classify(fs, path).await?;
        self.media_kinds.insert(path.to_path_buf(), kind);
        Ok(kind)
    }

    /// Whether `dir` or any non-hidden, non-ignored directory below it
    /// holds media.
    ///
    /// A directory that cannot be listed reports `true` without being
    /// memoized, so discovery still visits it and records the failure.
    pub async fn subtree_has_media(
        &self,
        fs: &dyn FileSystem,
        classifier: &dyn MediaClassifier,
        dir: &Path,
    ) -> bool {
        if let Some(known) = self.cached_dir(dir) {
            return known;
        }
        let real = fs.canonicalize(dir).await.unwrap_or_else(|_| dir.to_path_buf());
        let mut on_walk = HashSet::new();
        match self
            .walk(fs, classifier, dir.to_path_buf(), real, &mut on_walk)
            .await
        {
            Walk::Known(has_media) => has_media,
            Walk::Unknown => true,
        }
    }

    /// Memoized answer for `dir`, if it has been evaluated.
    pub fn cached_dir(&self, dir: &Path) -> Option<bool> {
        self.dirs.get(dir).map(|entry| *entry)
    }

    /// Number of memoized directories.
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.media_kinds.is_empty()
    }

    /// Ignore rules in effect inside `dir`. Each directory's own file is
    /// read at most once per pass; unreadable files are treated as absent.
    async fn ignores(&self, fs: &dyn FileSystem, dir: &Path) -> IgnoreSet {
        let Some(file_name) = &self.ignore_file else {
            return IgnoreSet::default();
        };
        let mut rules = Vec::new();
        for ancestor in dir.ancestors() {
            let cached = self.ignore_rules.get(ancestor).map(|entry| entry.value().clone());
            let found = match cached {
                Some(found) => found,
                None => {
                    let found = match IgnoreRules::load(fs, ancestor, file_name).await {
                        Ok(found) => found.map(Arc::new),
                        Err(err) => {
                            debug!(target: "scan::discovery", path = %ancestor.display(), error = %err, "cannot read ignore file");
                            None
                        }
                    };
                    self.ignore_rules.insert(ancestor.to_path_buf(), found.clone());
                    found
                }
            };
            rules.extend(found);
        }
        IgnoreSet::new(rules)
    }

    /// `real` is `dir` with its symlinks resolved; only entries that are
    /// symlinked directories get canonicalized again.
    fn walk<'a>(
        &'a self,
        fs: &'a dyn FileSystem,
        classifier: &'a dyn MediaClassifier,
        dir: PathBuf,
        real: PathBuf,
        on_walk: &'a mut HashSet<PathBuf>,
    ) -> BoxFuture<'a, Walk> {
        Box::pin(async move {
            if let Some(known) = self.cached_dir(&dir) {
                return Walk::Known(known);
            }

            let ignores = self.ignores(fs, &dir).await;
            if ignores.is_ignored(&dir) {
                trace!(target: "scan::discovery", path = %dir.display(), "directory ignored");
                self.dirs.insert(dir, false);
                return Walk::Known(false);
            }

            // Cut symlink cycles: a directory already being walked above us
            // contributes nothing new.
            if !on_walk.insert(real.clone()) {
                trace!(target: "scan::discovery", path = %dir.display(), "symlink cycle cut");
                self.dirs.insert(dir, false);
                return Walk::Known(false);
            }

            let entries = match list_dir(fs, &dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(
                        target: "scan::discovery",
                        path = %dir.display(),
                        error = %err,
                        "directory unreadable, assuming it may contain media"
                    );
                    on_walk.remove(&real);
                    return Walk::Unknown;
                }
            };

            let mut has_media = false;
            let mut subdirs = Vec::new();
            for entry in entries.into_iter().filter(|e| !is_hidden(e)) {
                let metadata = match fs.metadata(&entry).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        trace!(target: "scan::discovery", path = %entry.display(), error = %err, "skipping entry");
                        continue;
                    }
                };
                if metadata.is_dir {
                    let entry_real = if is_symlink_dir(&metadata) {
                        fs.canonicalize(&entry).await.unwrap_or_else(|_| entry.clone())
                    } else {
                        match entry.file_name() {
                            Some(name) => real.join(name),
                            None => entry.clone(),
                        }
                    };
                    subdirs.push((entry, entry_real));
                } else if !has_media && !ignores.is_ignored(&entry) {
                    match self.media_kind(fs, classifier, &entry).await {
                        Ok(Some(_)) => has_media = true,
                        Ok(None) => {}
                        Err(err) => {
                            trace!(target: "scan::discovery", path = %entry.display(), error = %err, "classification failed");
                        }
                    }
                }
            }

            // Every subdirectory is evaluated so each one ends up memoized.
            for (subdir, subdir_real) in subdirs {
                if self
                    .walk(fs, classifier, subdir, subdir_real, on_walk)
                    .await
                    != Walk::Known(false)
                {
                    has_media = true;
                }
            }

            on_walk.remove(&real);
            self.dirs.insert(dir, has_media);
            Walk::Known(has_media)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::classify::ExtensionClassifier;
    use crate::scan::fs::InMemoryFs;

    fn library() -> InMemoryFs {
        let fs = InMemoryFs::new();
        fs.add_file("/lib/a/one.jpg", 1);
        fs.add_file("/lib/b/notes.txt", 1);
        fs.add_file("/lib/b/deep/two.mp4", 1);
        fs.add_file("/lib/c/readme.md", 1);
        fs.add_file("/lib/.hidden/three.jpg", 1);
        fs
    }

    #[tokio::test]
    async fn memoizes_every_directory_in_the_subtree() {
        let fs = library();
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::new();

        assert!(cache.subtree_has_media(&fs, &classifier, Path::new("/lib")).await);
        assert_eq!(cache.cached_dir(Path::new("/lib")), Some(true));
        assert_eq!(cache.cached_dir(Path::new("/lib/a")), Some(true));
        assert_eq!(cache.cached_dir(Path::new("/lib/b")), Some(true));
        assert_eq!(cache.cached_dir(Path::new("/lib/b/deep")), Some(true));
        assert_eq!(cache.cached_dir(Path::new("/lib/c")), Some(false));
        assert_eq!(cache.cached_dir(Path::new("/lib/.hidden")), None);
    }

    #[tokio::test]
    async fn cached_answers_survive_filesystem_changes_within_a_pass() {
        let fs = library();
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::new();
        assert!(!cache.subtree_has_media(&fs, &classifier, Path::new("/lib/c")).await);

        fs.add_file("/lib/c/new.jpg", 1);
        assert!(!cache.subtree_has_media(&fs, &classifier, Path::new("/lib/c")).await);
        assert!(TraversalCache::new().subtree_has_media(&fs, &classifier, Path::new("/lib/c")).await);
    }

    #[tokio::test]
    async fn unreadable_directory_may_contain_media_and_is_not_memoized() {
        let fs = InMemoryFs::new();
        fs.add_file("/lib/ok/readme.md", 1);
        fs.add_unreadable_dir("/lib/locked");
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::new();

        assert!(cache.subtree_has_media(&fs, &classifier, Path::new("/lib/locked")).await);
        assert_eq!(cache.cached_dir(Path::new("/lib/locked")), None);
        assert_eq!(cache.cached_dir(Path::new("/lib/ok")), None);
    }

    #[tokio::test]
    async fn symlink_cycles_terminate() {
        let fs = InMemoryFs::new();
        fs.add_file("/lib/a/one.jpg", 1);
        fs.add_symlink("/lib/a/back", "/lib");
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::new();

        assert!(cache.subtree_has_media(&fs, &classifier, Path::new("/lib")).await);
        assert_eq!(cache.cached_dir(Path::new("/lib/a/back")), Some(false));
    }

    #[tokio::test]
    async fn ignored_media_does_not_count() {
        let fs = InMemoryFs::new();
        fs.add_file_with_contents("/lib/.lumenignore", "junk\n*.png\n");
        fs.add_file("/lib/junk/a.jpg", 1);
        fs.add_file("/lib/shots/b.png", 1);
        fs.add_file("/lib/keep/c.jpg", 1);
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::with_ignore_file(".lumenignore");

        assert!(cache.subtree_has_media(&fs, &classifier, Path::new("/lib")).await);
        assert_eq!(cache.cached_dir(Path::new("/lib/junk")), Some(false));
        assert_eq!(cache.cached_dir(Path::new("/lib/shots")), Some(false));
        assert_eq!(cache.cached_dir(Path::new("/lib/keep")), Some(true));

        // Without an ignore file name nothing is excluded.
        let plain = TraversalCache::new();
        assert!(plain.subtree_has_media(&fs, &classifier, Path::new("/lib/junk")).await);
    }

    #[tokio::test]
    async fn media_kind_is_classified_once() {
        let fs = library();
        let classifier = ExtensionClassifier::new();
        let cache = TraversalCache::new();
        let path = Path::new("/lib/a/one.jpg");

        assert_eq!(
            cache.media_kind(&fs, &classifier, path).await.expect("kind"),
            Some(MediaKind::Photo)
        );
        fs.remove(path);
        // Served from the memo even though the file is gone.
        assert_eq!(
            cache.media_kind(&fs, &classifier, path).await.expect("kind"),
            Some(MediaKind::Photo)
        );
    }
}
