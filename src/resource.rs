//! Resources: the things rules produce and depend on.

use crate::fs::MTime;
use crate::hash::Hasher;
use std::path::{Path, PathBuf};

/// Identity of a resource within one engine.  Two lookups of the same file
/// path or task name yield the same id; every caller-supplied resource gets
/// its own id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);
impl ResourceId {
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

/// Anything with a queryable "last modified" notion.
pub trait Resource: std::fmt::Display + Send + Sync {
    /// Returns MTime::Missing if the resource doesn't exist (yet).
    /// Errors are reserved for genuine failures to find out.
    fn last_modified(&self) -> anyhow::Result<MTime>;

    /// Resources that can feed their content into a digest return
    /// themselves here, which makes them usable as hash rule prerequisites.
    fn as_hash_resource(&self) -> Option<&dyn HashResource> {
        None
    }
}

pub trait HashResource {
    /// If the resource exists, updates the given hash with whatever data from
    /// the resource is relevant.  Absent resources leave the hash untouched.
    fn update_hash(&self, hasher: &mut Hasher) -> anyhow::Result<()>;
}

/// A file on disk, identified by its absolute, normalized path.
#[derive(Debug)]
pub struct FileResource {
    pub path: PathBuf,
    /// Path relative to the engine's base directory, for messages.
    pub display: String,
}

impl FileResource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A purely virtual named resource; its last modified time is the last
/// finish time of the rule that owns it.
#[derive(Debug)]
pub struct TaskResource {
    pub name: String,
}

pub enum ResourceKind {
    File(FileResource),
    Task(TaskResource),
    Custom(Box<dyn Resource>),
}

impl ResourceKind {
    pub fn is_hashable(&self) -> bool {
        match self {
            ResourceKind::File(_) => true,
            ResourceKind::Task(_) => false,
            ResourceKind::Custom(r) => r.as_hash_resource().is_some(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::File(file) => f.write_str(&file.display),
            ResourceKind::Task(task) => f.write_str(&task.name),
            ResourceKind::Custom(r) => write!(f, "{}", r),
        }
    }
}
