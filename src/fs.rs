use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

/// MTime info gathered for a resource.  This also models "resource is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn stamp(self) -> Option<SystemTime> {
        match self {
            MTime::Missing => None,
            MTime::Stamp(t) => Some(t),
        }
    }
}

/// The file operations the engine needs.  Indirected as a trait so tests can
/// run against an in-memory file system.
pub trait FileSystem: Send + Sync {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;
    /// Open a path for streaming reads.
    fn open(&self, path: &Path) -> std::io::Result<Box<dyn Read + '_>>;
    fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
    fn write(&self, path: &Path, content: &[u8]) -> std::io::Result<()>;
}

#[derive(Default)]
pub struct RealFileSystem {}
impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) => MTime::Stamp(meta.modified()?),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn open(&self, path: &Path) -> std::io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(std::io::BufReader::new(std::fs::File::open(path)?)))
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    /// Writes `content`, creating missing parent directories first.
    fn write(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }
}
