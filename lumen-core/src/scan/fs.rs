use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Result, ScanError};

/// Async filesystem abstraction used by discovery and the scan pipeline.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists.
    async fn path_exists(&self, path: &Path) -> bool;

    /// Open a directory for iteration.
    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>>;

    /// Fetch lightweight metadata. Symlinks are followed; `is_symlink`
    /// records whether `path` itself is a link.
    async fn metadata(&self, path: &Path) -> Result<FsMetadata>;

    /// Resolve every symlink in `path`.
    async fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Read a whole file.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Return a local path with the file's contents, suitable for handing
    /// to decoders that need a real file.
    async fn stage(&self, path: &Path) -> Result<PathBuf>;
}

/// Lightweight metadata needed by the scanner.
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub len: u64,
    /// Last modified time if available
    pub modified: Option<SystemTime>,
}

/// True when the entry is a symlink pointing at a directory. Discovery
/// follows these but guards them against cycles.
pub fn is_symlink_dir(metadata: &FsMetadata) -> bool {
    metadata.is_symlink && metadata.is_dir
}

/// Async directory iterator (similar to tokio::fs::ReadDir).
#[async_trait]
pub trait ReadDirStream {
    /// Return next entry's path, or None when exhausted.
    async fn next_entry(&mut self) -> Result<Option<PathBuf>>;
}

/// Drain a directory into a name-sorted list of entry paths.
pub async fn list_dir(fs: &dyn FileSystem, path: &Path) -> Result<Vec<PathBuf>> {
    let mut stream = fs.read_dir(path).await?;
    let mut entries = Vec::new();
    while let Some(entry) = stream.next_entry().await? {
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}

/// Dot-prefixed names are never scanned.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Real filesystem implementation backed by tokio::fs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        // try_exists avoids errors for permission issues by returning false
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        let rd = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ScanError::filesystem(path, e))?;
        Ok(Box::new(RealReadDir {
            dir: path.to_path_buf(),
            inner: rd,
        }))
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        let link = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| ScanError::filesystem(path, e))?;
        let is_symlink = link.file_type().is_symlink();
        let md = if is_symlink {
            match tokio::fs::metadata(path).await {
                Ok(md) => md,
                // Dangling link: report it as neither file nor directory.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(FsMetadata {
                        is_dir: false,
                        is_file: false,
                        is_symlink,
                        len: 0,
                        modified: None,
                    });
                }
                Err(e) => return Err(ScanError::filesystem(path, e)),
            }
        } else {
            link
        };
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            is_symlink,
            len: md.len(),
            modified: md.modified().ok(),
        })
    }

    async fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ScanError::filesystem(path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| ScanError::filesystem(path, e))
    }

    async fn stage(&self, path: &Path) -> Result<PathBuf> {
        if self.path_exists(path).await {
            Ok(path.to_path_buf())
        } else {
            Err(ScanError::filesystem(
                path,
                io::Error::new(io::ErrorKind::NotFound, "file vanished before processing"),
            ))
        }
    }
}

struct RealReadDir {
    dir: PathBuf,
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        match self.inner.next_entry().await {
            Ok(Some(entry)) => Ok(Some(entry.path())),
            Ok(None) => Ok(None),
            Err(e) => Err(ScanError::filesystem(&self.dir, e)),
        }
    }
}

const MAX_LINK_HOPS: usize = 40;

/// In-memory filesystem for tests.
///
/// Paths are treated literally; callers should use consistent absolute
/// paths. The tree can be mutated through a shared reference so tests can
/// change it between scans.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFs {
    nodes: Arc<RwLock<HashMap<PathBuf, Node>>>,
    staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum Node {
    Dir {
        children: Vec<PathBuf>,
        readable: bool,
    },
    File {
        contents: Arc<[u8]>,
    },
    Symlink {
        target: PathBuf,
    },
}

impl Node {
    fn empty_dir() -> Self {
        Node::Dir {
            children: Vec::new(),
            readable: true,
        }
    }
}

fn missing(path: &Path) -> ScanError {
    ScanError::filesystem(
        path,
        io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
    )
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that [`FileSystem::stage`] copies file contents into.
    /// Without one, staging fails with `Unsupported`.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn add_dir<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return;
        }
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::empty_dir());
    }

    /// Add a directory whose listing fails with `PermissionDenied`.
    pub fn add_unreadable_dir<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.nodes.write();
        ensure_parent_link(&mut nodes, &path);
        let children = match nodes.remove(&path) {
            Some(Node::Dir { children, .. }) => children,
            _ => Vec::new(),
        };
        nodes.insert(
            path,
            Node::Dir {
                children,
                readable: false,
            },
        );
    }

    /// Add a file with `len` zero bytes.
    pub fn add_file<P: Into<PathBuf>>(&self, path: P, len: u64) {
        self.add_file_with_contents(path, vec![0u8; len as usize]);
    }

    pub fn add_file_with_contents<P: Into<PathBuf>>(&self, path: P, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        let mut nodes = self.nodes.write();
        ensure_parent_link(&mut nodes, &path);
        nodes.insert(
            path,
            Node::File {
                contents: Arc::from(contents.into()),
            },
        );
    }

    /// Add a symlink at `link` pointing at `target`.
    pub fn add_symlink<P: Into<PathBuf>, T: Into<PathBuf>>(&self, link: P, target: T) {
        let link = link.into();
        let mut nodes = self.nodes.write();
        ensure_parent_link(&mut nodes, &link);
        nodes.insert(
            link,
            Node::Symlink {
                target: target.into(),
            },
        );
    }

    /// Remove a path and everything below it.
    pub fn remove<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write();
        nodes.retain(|p, _| !p.starts_with(path));
        if let Some(parent) = path.parent()
            && let Some(Node::Dir { children, .. }) = nodes.get_mut(parent)
        {
            children.retain(|c| c.as_path() != path);
        }
    }

    /// Follow symlinks in every component of `path`.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let nodes = self.nodes.read();
        let mut pending: VecDeque<PathBuf> = path
            .components()
            .map(|c| PathBuf::from(c.as_os_str()))
            .collect();
        let mut resolved = PathBuf::new();
        let mut hops = 0;
        while let Some(component) = pending.pop_front() {
            match component.components().next() {
                Some(Component::ParentDir) => {
                    resolved.pop();
                    continue;
                }
                Some(Component::CurDir) => continue,
                _ => {}
            }
            resolved.push(&component);
            if let Some(Node::Symlink { target }) = nodes.get(&resolved) {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(ScanError::filesystem(
                        path,
                        io::Error::other("too many levels of symbolic links"),
                    ));
                }
                let base = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
                let target = if target.is_absolute() {
                    target.clone()
                } else {
                    base.join(target)
                };
                for (i, c) in target.components().enumerate() {
                    pending.insert(i, PathBuf::from(c.as_os_str()));
                }
                resolved = PathBuf::new();
            }
        }
        if nodes.contains_key(&resolved) {
            Ok(resolved)
        } else {
            Err(missing(path))
        }
    }

    fn node(&self, path: &Path) -> Result<(PathBuf, Node)> {
        let resolved = self.resolve(path)?;
        let node = self
            .nodes
            .read()
            .get(&resolved)
            .cloned()
            .ok_or_else(|| missing(path))?;
        Ok((resolved, node))
    }
}

fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return;
        }
        // Ensure parent directory exists
        if !nodes.contains_key(parent) {
            nodes.insert(parent.to_path_buf(), Node::empty_dir());
            ensure_parent_link(nodes, parent);
        }
        if let Some(Node::Dir { children, .. }) = nodes.get_mut(parent)
            && !children.iter().any(|p| p.as_path() == path)
        {
            children.push(path.to_path_buf());
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>> {
        match self.node(path)? {
            (_, Node::Dir { readable: false, .. }) => Err(ScanError::filesystem(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            )),
            (_, Node::Dir { children, .. }) => {
                // Entries are reported below the path that was listed, which
                // differs from the stored one when listing through a link.
                let queue = children
                    .iter()
                    .filter_map(|child| child.file_name().map(|name| path.join(name)))
                    .collect();
                Ok(Box::new(InMemReadDir { queue }))
            }
            _ => Err(ScanError::filesystem(
                path,
                io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            )),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata> {
        let is_symlink = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => self.resolve(parent).is_ok_and(|parent| {
                matches!(
                    self.nodes.read().get(&parent.join(name)),
                    Some(Node::Symlink { .. })
                )
            }),
            _ => false,
        };
        let (_, node) = self.node(path)?;
        Ok(match node {
            Node::Dir { .. } => FsMetadata {
                is_dir: true,
                is_file: false,
                is_symlink,
                len: 0,
                modified: None,
            },
            Node::File { contents } => FsMetadata {
                is_dir: false,
                is_file: true,
                is_symlink,
                len: contents.len() as u64,
                modified: None,
            },
            Node::Symlink { .. } => return Err(missing(path)),
        })
    }

    async fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        self.resolve(path)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match self.node(path)? {
            (_, Node::File { contents }) => Ok(contents.to_vec()),
            _ => Err(ScanError::filesystem(
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "not a file"),
            )),
        }
    }

    async fn stage(&self, path: &Path) -> Result<PathBuf> {
        let Some(staging_dir) = &self.staging_dir else {
            return Err(ScanError::filesystem(
                path,
                io::Error::new(io::ErrorKind::Unsupported, "no staging directory configured"),
            ));
        };
        let contents = self.read(path).await?;
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let staged = staging_dir.join(relative);
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScanError::filesystem(parent, e))?;
        }
        tokio::fs::write(&staged, contents)
            .await
            .map_err(|e| ScanError::filesystem(&staged, e))?;
        Ok(staged)
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn symlinked_directory_lists_under_link_path() {
        let fs = InMemoryFs::new();
        fs.add_file("/lib/real/a.jpg", 3);
        fs.add_symlink("/lib/link", "/lib/real");

        let md = fs.metadata(Path::new("/lib/link")).await.expect("metadata");
        assert!(is_symlink_dir(&md));

        let entries = list_dir(&fs, Path::new("/lib/link")).await.expect("list");
        assert_eq!(entries, vec![PathBuf::from("/lib/link/a.jpg")]);
        assert_eq!(
            fs.canonicalize(Path::new("/lib/link/a.jpg"))
                .await
                .expect("canonical"),
            PathBuf::from("/lib/real/a.jpg")
        );
    }

    #[tokio::test]
    async fn relative_symlink_cycle_resolves_to_ancestor() {
        let fs = InMemoryFs::new();
        fs.add_dir("/lib/a");
        fs.add_symlink("/lib/a/loop", "..");

        let canonical = fs
            .canonicalize(Path::new("/lib/a/loop"))
            .await
            .expect("canonical");
        assert_eq!(canonical, PathBuf::from("/lib"));
    }

    #[tokio::test]
    async fn unreadable_directory_fails_listing_but_has_metadata() {
        let fs = InMemoryFs::new();
        fs.add_unreadable_dir("/lib/locked");

        assert!(fs.metadata(Path::new("/lib/locked")).await.is_ok());
        assert!(fs.read_dir(Path::new("/lib/locked")).await.is_err());
    }

    #[tokio::test]
    async fn removing_a_file_unlinks_it_from_its_parent() {
        let fs = InMemoryFs::new();
        fs.add_file("/lib/a.jpg", 1);
        fs.add_file("/lib/b.jpg", 1);
        fs.remove("/lib/b.jpg");

        let entries = list_dir(&fs, Path::new("/lib")).await.expect("list");
        assert_eq!(entries, vec![PathBuf::from("/lib/a.jpg")]);
        assert!(!fs.path_exists(Path::new("/lib/b.jpg")).await);
    }

    #[tokio::test]
    async fn real_fs_reports_symlinked_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::create_dir(&real).expect("mkdir");
        #[cfg(unix)]
        {
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).expect("symlink");
            let md = RealFs.metadata(&link).await.expect("metadata");
            assert!(is_symlink_dir(&md));
        }
        let md = RealFs.metadata(&real).await.expect("metadata");
        assert!(md.is_dir && !md.is_symlink);
    }
}
