//! Per-instance virtual filesystem
//!
//! Every module instance owns one [`VirtualFs`]. It starts with only the root
//! directory. Files written by the bridge live in memory; a mount exposes a
//! host directory read-only under a guest path. The WASI shim resolves every
//! guest path through here, so nothing outside the instance is ever written.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::module::{ModuleFilesystem, MountBacking};

/// A resolved filesystem entry
#[derive(Debug, Clone)]
pub enum Node {
    Dir,
    File(Arc<[u8]>),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir)
    }
}

/// Lookup failure, mapped to WASI errno values by the shim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotDir,
    IsDir,
    Exists,
    ReadOnly,
    Io,
}

#[derive(Debug, Clone)]
struct Mount {
    guest: String,
    root: PathBuf,
}

/// In-memory filesystem with host mounts
#[derive(Debug, Default)]
pub struct VirtualFs {
    dirs: BTreeSet<String>,
    files: HashMap<String, Arc<[u8]>>,
    mounts: Vec<Mount>,
}

/// Normalize a guest path to an absolute path without `.`/`..` segments
///
/// Relative paths are taken relative to `/`, the instance's working
/// directory. `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a guest path onto a base directory and normalize
pub fn join(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", base, path))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

impl VirtualFs {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            dirs,
            files: HashMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Host path backing `path` if it lies under a mount
    fn mounted(&self, path: &str) -> Option<PathBuf> {
        self.mounts
            .iter()
            .filter(|m| path == m.guest || path.starts_with(&format!("{}/", m.guest)))
            .max_by_key(|m| m.guest.len())
            .map(|m| {
                let rest = path[m.guest.len()..].trim_start_matches('/');
                if rest.is_empty() {
                    m.root.clone()
                } else {
                    m.root.join(rest)
                }
            })
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        self.mounted(&normalize(path)).is_some()
    }

    /// Resolve a guest path to a node, reading through mounts
    pub fn lookup(&self, path: &str) -> Result<Node, FsError> {
        let path = normalize(path);
        if let Some(host) = self.mounted(&path) {
            return read_host(&host);
        }
        if self.dirs.contains(&path) {
            return Ok(Node::Dir);
        }
        if let Some(data) = self.files.get(&path) {
            return Ok(Node::File(data.clone()));
        }
        match parent_of(&path) {
            Some(parent) if self.files.contains_key(parent) => Err(FsError::NotDir),
            _ => Err(FsError::NotFound),
        }
    }

    /// Create or replace an in-memory file
    pub fn put_file(&mut self, path: &str, data: Vec<u8>) -> Result<(), FsError> {
        let path = normalize(path);
        if self.mounted(&path).is_some() {
            return Err(FsError::ReadOnly);
        }
        if self.dirs.contains(&path) {
            return Err(FsError::IsDir);
        }
        if let Some(parent) = parent_of(&path) {
            self.create_dir_all(parent)?;
        }
        self.files.insert(path, Arc::from(data));
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<(), FsError> {
        if self.dirs.contains(path) {
            return Ok(());
        }
        if self.files.contains_key(path) {
            return Err(FsError::NotDir);
        }
        if let Some(parent) = parent_of(path) {
            self.create_dir_all(parent)?;
        }
        self.dirs.insert(path.to_string());
        Ok(())
    }

    /// Create a single directory; the parent must exist
    pub fn create_dir(&mut self, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        if self.mounted(&path).is_some() {
            return Err(FsError::ReadOnly);
        }
        if self.dirs.contains(&path) || self.files.contains_key(&path) {
            return Err(FsError::Exists);
        }
        match parent_of(&path) {
            Some(parent) if self.dirs.contains(parent) => {}
            Some(parent) if self.files.contains_key(parent) => return Err(FsError::NotDir),
            _ => return Err(FsError::NotFound),
        }
        self.dirs.insert(path);
        Ok(())
    }

    /// Number of in-memory files, mounts excluded
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn remove_file(&mut self, path: &str) -> Option<Arc<[u8]>> {
        self.files.remove(&normalize(path))
    }
}

fn read_host(host: &Path) -> Result<Node, FsError> {
    let meta = std::fs::metadata(host).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound,
        _ => FsError::Io,
    })?;
    if meta.is_dir() {
        return Ok(Node::Dir);
    }
    let data = std::fs::read(host).map_err(|_| FsError::Io)?;
    Ok(Node::File(Arc::from(data)))
}

fn fs_error(op: &str, path: &str, err: FsError) -> BridgeError {
    BridgeError::Filesystem(format!("{} {}: {:?}", op, path, err))
}

impl ModuleFilesystem for VirtualFs {
    fn write_file(&mut self, path: &str, contents: &str) -> BridgeResult<()> {
        self.put_file(path, contents.as_bytes().to_vec())
            .map_err(|e| fs_error("write", path, e))?;
        debug!("Wrote {} bytes to {}", contents.len(), normalize(path));
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> BridgeResult<()> {
        self.create_dir(path).map_err(|e| fs_error("mkdir", path, e))
    }

    fn mount(&mut self, backing: MountBacking, path: &str) -> BridgeResult<()> {
        let guest = normalize(path);
        match self.lookup(&guest) {
            Ok(Node::Dir) => {}
            Ok(Node::File(_)) => return Err(fs_error("mount", path, FsError::NotDir)),
            Err(e) => return Err(fs_error("mount", path, e)),
        }
        if self.mounted(&guest).is_some() {
            return Err(fs_error("mount", path, FsError::Exists));
        }

        let MountBacking::HostDir { root } = backing;
        let root = root.canonicalize().map_err(|e| {
            BridgeError::Filesystem(format!("mount root {}: {}", root.display(), e))
        })?;
        if !root.is_dir() {
            return Err(BridgeError::Filesystem(format!(
                "mount root {} is not a directory",
                root.display()
            )));
        }

        debug!("Mounted {} at {}", root.display(), guest);
        self.mounts.push(Mount { guest, root });
        Ok(())
    }
}
