//! Narrow filesystem seam.
//!
//! Every component that touches disk goes through [`FileSystem`] so the
//! mover, organizer, and rollback logic can run against [`MemoryFs`] in
//! tests without touching real volumes. [`TokioFs`] is the production
//! implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::spawn_blocking;

use mediabutler_model::FileHash;

use crate::error::{ButlerError, Result};

/// Chunk size for streaming reads and copies. Keeps the worst-case buffer
/// footprint flat regardless of file size.
pub const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_file: bool,
    pub readonly: bool,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Immediate children of `dir` that are files.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Every file under `dir`, depth-first.
    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    async fn create_dir_all(&self, dir: &Path) -> Result<()>;

    /// Same-volume rename. Fails with a `CrossesDevices` IO error across
    /// volumes; callers fall back to [`FileSystem::copy_streaming`].
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Chunked copy with durability flush. A partial destination left by a
    /// mid-copy failure is removed before the error surfaces.
    async fn copy_streaming(&self, from: &Path, to: &Path) -> Result<u64>;

    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Free bytes on the volume holding `path` (or its nearest existing
    /// ancestor when the path itself does not exist yet).
    async fn free_space(&self, path: &Path) -> Result<u64>;

    async fn is_writable_dir(&self, dir: &Path) -> Result<bool>;

    async fn open_read(&self, path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Content identity of a file: SHA-256 over a streaming read.
pub async fn hash_file(fs: &dyn FileSystem, path: &Path) -> Result<FileHash> {
    let mut reader = fs.open_read(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(FileHash::from_digest(hex::encode(hasher.finalize())))
}

/// Production filesystem backed by `tokio::fs`.
#[derive(Debug, Default)]
pub struct TokioFs;

#[async_trait]
impl FileSystem for TokioFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            len: meta.len(),
            is_file: meta.is_file(),
            readonly: meta.permissions().readonly(),
        })
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut pending = vec![dir.to_path_buf()];
        let mut files = Vec::new();
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(dir).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(tokio::fs::rename(from, to).await?)
    }

    async fn copy_streaming(&self, from: &Path, to: &Path) -> Result<u64> {
        let result = copy_chunks(from, to).await;
        if result.is_err() {
            // Never leave a partial destination behind.
            let _ = tokio::fs::remove_file(to).await;
        }
        result
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_file(path).await?)
    }

    async fn free_space(&self, path: &Path) -> Result<u64> {
        let probe = nearest_existing_ancestor(path).await?;
        let space = spawn_blocking(move || fs2::available_space(&probe))
            .await
            .map_err(|err| ButlerError::Internal(format!("free-space probe panicked: {err}")))??;
        Ok(space)
    }

    async fn is_writable_dir(&self, dir: &Path) -> Result<bool> {
        match tokio::fs::metadata(dir).await {
            Ok(meta) => Ok(meta.is_dir() && !meta.permissions().readonly()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn open_read(&self, path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

async fn copy_chunks(from: &Path, to: &Path) -> Result<u64> {
    let mut src = tokio::fs::File::open(from).await?;
    let mut dst = tokio::fs::File::create(to).await?;
    let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
    let mut written: u64 = 0;
    loop {
        let read = src.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        dst.write_all(&buf[..read]).await?;
        written += read as u64;
    }
    dst.flush().await?;
    dst.sync_all().await?;
    Ok(written)
}

async fn nearest_existing_ancestor(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    loop {
        if tokio::fs::try_exists(&current).await? {
            return Ok(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(ButlerError::Path(format!(
                    "no existing ancestor for {}",
                    path.display()
                )));
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    readonly_dirs: BTreeSet<PathBuf>,
}

/// In-memory filesystem fake for tests. Single volume unless
/// `set_cross_device` is flipped, in which case every rename reports
/// `CrossesDevices` to exercise the copy fallback.
#[derive(Debug, Default)]
pub struct MemoryFs {
    state: Mutex<MemState>,
    free_space: AtomicU64,
    cross_device: AtomicBool,
    failing_renames: AtomicU64,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
            free_space: AtomicU64::new(u64::MAX),
            cross_device: AtomicBool::new(false),
            failing_renames: AtomicU64::new(0),
        }
    }

    /// Make the next `count` renames fail with a busy-file IO error, then
    /// recover. Exercises the transient-retry path.
    pub fn fail_next_renames(&self, count: u64) {
        self.failing_renames.store(count, Ordering::SeqCst);
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        add_parents(&mut state.dirs, &path);
        state.files.insert(path, contents.into());
    }

    /// Registers a file of `len` zero bytes without allocating them.
    pub fn add_sized_file(&self, path: impl Into<PathBuf>, len: usize) {
        self.add_file(path, vec![0u8; len]);
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        add_parents(&mut state.dirs, &path.join("x"));
    }

    pub fn set_readonly_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        add_parents(&mut state.dirs, &path.join("x"));
        state.readonly_dirs.insert(path);
    }

    pub fn set_free_space(&self, bytes: u64) {
        self.free_space.store(bytes, Ordering::SeqCst);
    }

    pub fn set_cross_device(&self, enabled: bool) {
        self.cross_device.store(enabled, Ordering::SeqCst);
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("memory fs lock poisoned")
            .files
            .get(path)
            .cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().expect("memory fs lock poisoned").files.len()
    }
}

fn add_parents(dirs: &mut BTreeSet<PathBuf>, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        dirs.insert(dir.to_path_buf());
        current = dir.parent();
    }
}

fn not_found(path: &Path) -> ButlerError {
    ButlerError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn exists(&self, path: &Path) -> Result<bool> {
        let state = self.state.lock().expect("memory fs lock poisoned");
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let state = self.state.lock().expect("memory fs lock poisoned");
        if let Some(contents) = state.files.get(path) {
            return Ok(FileStat {
                len: contents.len() as u64,
                is_file: true,
                readonly: false,
            });
        }
        if state.dirs.contains(path) {
            return Ok(FileStat {
                len: 0,
                is_file: false,
                readonly: state.readonly_dirs.contains(path),
            });
        }
        Err(not_found(path))
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().expect("memory fs lock poisoned");
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        Ok(state
            .files
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().expect("memory fs lock poisoned");
        Ok(state
            .files
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect())
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<()> {
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        for ancestor in dir.ancestors() {
            if state.readonly_dirs.contains(ancestor) {
                return Err(ButlerError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{} is read-only", ancestor.display()),
                )));
            }
        }
        add_parents(&mut state.dirs, &dir.join("x"));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self
            .failing_renames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ButlerError::Io(io::Error::new(
                io::ErrorKind::ResourceBusy,
                "file is in use",
            )));
        }
        if self.cross_device.load(Ordering::SeqCst) {
            return Err(ButlerError::Io(io::Error::new(
                io::ErrorKind::CrossesDevices,
                "invalid cross-device link",
            )));
        }
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        let contents = state.files.remove(from).ok_or_else(|| not_found(from))?;
        add_parents(&mut state.dirs, to);
        state.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    async fn copy_streaming(&self, from: &Path, to: &Path) -> Result<u64> {
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        let contents = state.files.get(from).cloned().ok_or_else(|| not_found(from))?;
        let len = contents.len() as u64;
        add_parents(&mut state.dirs, to);
        state.files.insert(to.to_path_buf(), contents);
        Ok(len)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().expect("memory fs lock poisoned");
        state.files.remove(path).ok_or_else(|| not_found(path))?;
        Ok(())
    }

    async fn free_space(&self, _path: &Path) -> Result<u64> {
        Ok(self.free_space.load(Ordering::SeqCst))
    }

    async fn is_writable_dir(&self, dir: &Path) -> Result<bool> {
        let state = self.state.lock().expect("memory fs lock poisoned");
        Ok(state.dirs.contains(dir) && !state.readonly_dirs.contains(dir))
    }

    async fn open_read(&self, path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let contents = self
            .contents(path)
            .ok_or_else(|| not_found(path))?;
        Ok(Box::new(std::io::Cursor::new(contents)))
    }
}
