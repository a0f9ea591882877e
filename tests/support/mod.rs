//! Support code shared by the integration tests.
#![allow(dead_code)]

use kiln::fs::{FileSystem, MTime};
use kiln::hash::Hasher;
use kiln::signal::{Handler, Signal, Signals};
use kiln::{Console, Engine, HashResource, Resource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Wait long enough that the next timestamp is observably later.
pub fn tick() {
    std::thread::sleep(Duration::from_millis(10));
}

/// Console that remembers what was logged.
#[derive(Clone, Default)]
pub struct Lines(Arc<Mutex<Vec<String>>>);
impl Lines {
    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
    pub fn contains(&self, text: &str) -> bool {
        self.all().iter().any(|line| line.contains(text))
    }
}
impl Console for Lines {
    fn log(&self, msg: &str) {
        self.0.lock().unwrap().push(msg.to_string());
    }
    fn command(&self, cmdline: &str) {
        self.0.lock().unwrap().push(format!("$ {}", cmdline));
    }
    fn print(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

/// Signals that never arrive.
pub struct NoSignals;
impl Signals for NoSignals {
    fn install(&self, _handler: Handler) -> anyhow::Result<()> {
        Ok(())
    }
    fn uninstall(&self) {}
    fn kill(&self, _pid: u32, _signal: Signal) -> std::io::Result<()> {
        Ok(())
    }
    fn reraise(&self) {}
}

struct File {
    content: Vec<u8>,
    mtime: SystemTime,
}

/// Implementation of FileSystem that is memory-backed.
#[derive(Clone, Default)]
pub struct MemoryFs {
    files: Arc<Mutex<HashMap<PathBuf, File>>>,
}

impl MemoryFs {
    pub fn add(&self, path: &str, content: impl Into<Vec<u8>>) -> SystemTime {
        let mtime = SystemTime::now();
        self.files.lock().unwrap().insert(
            path.into(),
            File {
                content: content.into(),
                mtime,
            },
        );
        mtime
    }

    pub fn set_mtime(&self, path: &str, mtime: SystemTime) {
        self.files.lock().unwrap().get_mut(Path::new(path)).unwrap().mtime = mtime;
    }

    pub fn mtime(&self, path: &str) -> Option<SystemTime> {
        self.files.lock().unwrap().get(Path::new(path)).map(|f| f.mtime)
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(Path::new(path))
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
    }
}

impl FileSystem for MemoryFs {
    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        Ok(match self.files.lock().unwrap().get(path) {
            Some(file) => MTime::Stamp(file.mtime),
            None => MTime::Missing,
        })
    }

    fn open(&self, path: &Path) -> std::io::Result<Box<dyn std::io::Read + '_>> {
        match self.files.lock().unwrap().get(path) {
            Some(file) => Ok(Box::new(std::io::Cursor::new(file.content.clone()))),
            None => Err(std::io::ErrorKind::NotFound.into()),
        }
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        match self.files.lock().unwrap().get(path) {
            Some(file) => Ok(String::from_utf8_lossy(&file.content).into_owned()),
            None => Err(std::io::ErrorKind::NotFound.into()),
        }
    }

    fn write(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        self.files.lock().unwrap().insert(
            path.to_path_buf(),
            File {
                content: content.to_vec(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }
}

/// An engine over a memory file system rooted at /work.
pub fn memory_engine() -> (Engine, MemoryFs, Lines) {
    let fs = MemoryFs::default();
    let lines = Lines::default();
    let mut engine = Engine::with_parts(
        Box::new(fs.clone()),
        Box::new(lines.clone()),
        Box::new(NoSignals),
    );
    engine.set_base_dir("/work");
    (engine, fs, lines)
}

/// A resource that lives only in memory and can be touched.
#[derive(Clone)]
pub struct TestResource {
    name: String,
    mtime: Arc<Mutex<MTime>>,
}

impl TestResource {
    pub fn new(name: &str) -> Self {
        TestResource {
            name: name.to_string(),
            mtime: Arc::new(Mutex::new(MTime::Missing)),
        }
    }

    pub fn touch(&self) -> SystemTime {
        tick();
        let now = SystemTime::now();
        *self.mtime.lock().unwrap() = MTime::Stamp(now);
        now
    }

    pub fn mtime(&self) -> MTime {
        *self.mtime.lock().unwrap()
    }

    pub fn stamp(&self) -> SystemTime {
        self.mtime().stamp().expect("resource was touched")
    }
}

impl std::fmt::Display for TestResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Resource for TestResource {
    fn last_modified(&self) -> anyhow::Result<MTime> {
        Ok(self.mtime())
    }
}

/// A resource with content that can take part in hash rules.
#[derive(Clone)]
pub struct Blob {
    name: String,
    content: Arc<Mutex<Vec<u8>>>,
}

impl Blob {
    pub fn new(name: &str, content: &str) -> Self {
        Blob {
            name: name.to_string(),
            content: Arc::new(Mutex::new(content.as_bytes().to_vec())),
        }
    }

    pub fn set(&self, content: &str) {
        *self.content.lock().unwrap() = content.as_bytes().to_vec();
    }
}

impl std::fmt::Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Resource for Blob {
    fn last_modified(&self) -> anyhow::Result<MTime> {
        Ok(MTime::Stamp(SystemTime::UNIX_EPOCH))
    }

    fn as_hash_resource(&self) -> Option<&dyn HashResource> {
        Some(self)
    }
}

impl HashResource for Blob {
    fn update_hash(&self, hasher: &mut Hasher) -> anyhow::Result<()> {
        hasher.update(&self.content.lock().unwrap());
        Ok(())
    }
}

/// Counts recipe invocations.
#[derive(Clone, Default)]
pub struct Counter(Arc<Mutex<usize>>);
impl Counter {
    pub fn bump(&self) {
        *self.0.lock().unwrap() += 1;
    }
    pub fn get(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

/// Manages a temporary directory that a real-file-system engine builds in.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    pub fn path(&self, path: &str) -> PathBuf {
        self.dir.path().join(path)
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.path(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.path(path))
    }

    pub fn mtime(&self, path: &str) -> std::io::Result<SystemTime> {
        std::fs::metadata(self.path(path))?.modified()
    }

    /// Move a file's mtime `secs` seconds into the past.
    pub fn age(&self, path: &str, secs: u64) -> std::io::Result<()> {
        let mtime = SystemTime::now() - Duration::from_secs(secs);
        filetime::set_file_mtime(self.path(path), filetime::FileTime::from_system_time(mtime))
    }

    /// An engine on the real file system, based in this space.
    pub fn engine(&self) -> (Engine, Lines) {
        let lines = Lines::default();
        let mut engine = Engine::with_parts(
            Box::new(kiln::RealFileSystem::new()),
            Box::new(lines.clone()),
            Box::new(NoSignals),
        );
        engine.set_base_dir(self.dir.path());
        (engine, lines)
    }
}
