//! Source provisioning
//!
//! Before the compiler runs, its fresh instance must be able to see the
//! sources. [`VirtualSources`] writes them into the instance's filesystem;
//! [`PassthroughMount`] mounts a host directory and rewrites entry points to
//! live under the mount.

use std::path::PathBuf;
use tracing::debug;

use crate::error::BridgeResult;
use crate::module::{ModuleFilesystem, MountBacking};
use crate::request::{FilesystemMode, SourcesMap};

/// Makes sources visible to a module instance
pub trait MaterializeSources: Send + Sync {
    /// Prepare the instance filesystem
    fn materialize(&self, fs: &mut dyn ModuleFilesystem) -> BridgeResult<()>;

    /// Entry point paths as the compiler must see them, in the same order
    fn resolve_entry_points(&self, entry_points: &[String]) -> Vec<String>;
}

/// Sources held in memory, written verbatim under their keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualSources {
    sources: SourcesMap,
}

impl VirtualSources {
    pub fn new(sources: SourcesMap) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl MaterializeSources for VirtualSources {
    fn materialize(&self, fs: &mut dyn ModuleFilesystem) -> BridgeResult<()> {
        for (name, text) in &self.sources {
            fs.write_file(name, text)?;
        }
        debug!("Wrote {} source files", self.sources.len());
        Ok(())
    }

    fn resolve_entry_points(&self, entry_points: &[String]) -> Vec<String> {
        entry_points.to_vec()
    }
}

/// Host directory mounted read-only at a fixed guest path
#[derive(Debug, Clone, PartialEq)]
pub struct PassthroughMount {
    mount_point: String,
    /// `None` means the process working directory at materialization time
    root: Option<PathBuf>,
}

impl PassthroughMount {
    pub fn new(mount_point: &str, root: Option<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.trim_end_matches('/').to_string(),
            root,
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn host_root(&self) -> BridgeResult<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

impl MaterializeSources for PassthroughMount {
    fn materialize(&self, fs: &mut dyn ModuleFilesystem) -> BridgeResult<()> {
        let root = self.host_root()?;
        // the instance is fresh, so every level of the mount point is new
        let mut guest = String::new();
        for segment in self.mount_point.split('/').filter(|s| !s.is_empty()) {
            guest.push('/');
            guest.push_str(segment);
            fs.mkdir(&guest)?;
        }
        debug!("Mounting {} at {}", root.display(), self.mount_point);
        fs.mount(MountBacking::HostDir { root }, &self.mount_point)
    }

    fn resolve_entry_points(&self, entry_points: &[String]) -> Vec<String> {
        entry_points
            .iter()
            .map(|entry| format!("{}/{}", self.mount_point, entry))
            .collect()
    }
}

/// The provisioning strategy chosen for one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum SourceStrategy {
    Virtual(VirtualSources),
    Passthrough(PassthroughMount),
}

impl SourceStrategy {
    pub fn mode(&self) -> FilesystemMode {
        match self {
            SourceStrategy::Virtual(_) => FilesystemMode::Virtual,
            SourceStrategy::Passthrough(_) => FilesystemMode::Passthrough,
        }
    }

    fn inner(&self) -> &dyn MaterializeSources {
        match self {
            SourceStrategy::Virtual(sources) => sources,
            SourceStrategy::Passthrough(mount) => mount,
        }
    }
}

impl MaterializeSources for SourceStrategy {
    fn materialize(&self, fs: &mut dyn ModuleFilesystem) -> BridgeResult<()> {
        self.inner().materialize(fs)
    }

    fn resolve_entry_points(&self, entry_points: &[String]) -> Vec<String> {
        self.inner().resolve_entry_points(entry_points)
    }
}
