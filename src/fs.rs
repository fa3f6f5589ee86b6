//! File-system capability.
//!
//! The store never touches `std::fs` directly; every filesystem operation
//! goes through this trait so that `InMemoryFs` can stand in for tests that
//! want to simulate torn writes without touching a real disk.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// A single open file. Reads are random-access; writes always append.
pub trait FileHandle: Send {
    /// Current on-disk length in bytes.
    fn len(&self) -> Result<u64>;

    /// Read exactly `size` bytes starting at `offset`.
    fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>>;

    /// Append `bytes` to the end of the file. Returns the offset the bytes
    /// were written at.
    fn write(&mut self, bytes: &[u8]) -> Result<u64>;

    /// Flush the file's content to stable storage.
    fn sync(&mut self) -> Result<()>;

    /// Discard everything at or after `new_size`.
    fn truncate(&mut self, new_size: u64) -> Result<()>;

    /// Close the handle. A no-op for backends without explicit close
    /// semantics; present so the capability models open/close as an
    /// explicit lifecycle rather than relying on drop order.
    fn close(&mut self) -> Result<()>;
}

/// Filesystem capability consumed by the store.
pub trait FsCapability: Send + Sync {
    /// `mkdir -p`, creating the directory with the given mode if absent.
    fn mkdirp(&self, path: &Path, mode: u32) -> Result<()>;

    /// List entry names directly inside `path`. Empty if the directory does
    /// not exist.
    fn readdir(&self, path: &Path) -> Result<Vec<String>>;

    /// True if something exists at `path`.
    fn lstat(&self, path: &Path) -> Result<bool>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn unlink(&self, path: &Path) -> Result<()>;

    fn rmdir(&self, path: &Path) -> Result<()>;

    /// Open (creating if absent) a file for random-access read/append.
    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>>;
}

// ── std::fs backend ───────────────────────────────────────────────────

/// Real on-disk filesystem capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl FsCapability for StdFs {
    fn mkdirp(&self, path: &Path, mode: u32) -> Result<()> {
        fs::create_dir_all(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        let _ = mode;
        Ok(())
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(out)
    }

    fn lstat(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path)?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Box::new(StdFileHandle { file }))
    }
}

struct StdFileHandle {
    file: File,
}

impl FileHandle for StdFileHandle {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<u64> {
        let start = self.len()?;
        self.file.write_all_at(bytes, start)?;
        Ok(start)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.file.set_len(new_size)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── In-memory backend (test seam) ─────────────────────────────────────

/// In-memory filesystem capability, a substitution seam for tests that
/// don't need real disk I/O. Not persistent across process restarts;
/// property tests simulate torn
/// writes by truncating the backing buffer directly via `truncate_file`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFs {
    inner: Arc<Mutex<InMemoryFsState>>,
}

#[derive(Debug, Default)]
struct InMemoryFsState {
    dirs: HashMap<PathBuf, ()>,
    files: HashMap<PathBuf, Vec<u8>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: truncate a file outside the `FileHandle` lifecycle, to
    /// simulate a crash mid-write without going through `close`.
    pub fn truncate_file(&self, path: &Path, new_len: usize) {
        let mut state = self.inner.lock().unwrap();
        if let Some(buf) = state.files.get_mut(path) {
            buf.truncate(new_len);
        }
    }

    /// Test helper: append raw junk bytes directly to a file's backing
    /// buffer, simulating a torn trailing write.
    pub fn append_junk(&self, path: &Path, junk: &[u8]) {
        let mut state = self.inner.lock().unwrap();
        state.files.entry(path.to_path_buf()).or_default().extend_from_slice(junk);
    }
}

impl FsCapability for InMemoryFs {
    fn mkdirp(&self, path: &Path, _mode: u32) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        let mut acc = PathBuf::new();
        for component in path.components() {
            acc.push(component);
            state.dirs.insert(acc.clone(), ());
        }
        Ok(())
    }

    fn readdir(&self, path: &Path) -> Result<Vec<String>> {
        let state = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for file_path in state.files.keys() {
            if file_path.parent() == Some(path) {
                if let Some(name) = file_path.file_name() {
                    out.push(name.to_string_lossy().into_owned());
                }
            }
        }
        Ok(out)
    }

    fn lstat(&self, path: &Path) -> Result<bool> {
        let state = self.inner.lock().unwrap();
        Ok(state.files.contains_key(path) || state.dirs.contains_key(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if let Some(contents) = state.files.remove(from) {
            state.files.insert(to.to_path_buf(), contents);
            return Ok(());
        }
        if state.dirs.remove(from).is_some() {
            let prefix = from.to_path_buf();
            let to_rename: Vec<PathBuf> = state
                .dirs
                .keys()
                .filter(|p| p.starts_with(&prefix))
                .cloned()
                .collect();
            for old in to_rename {
                let rest = old.strip_prefix(&prefix).unwrap();
                state.dirs.remove(&old);
                state.dirs.insert(to.join(rest), ());
            }
            let file_keys: Vec<PathBuf> = state
                .files
                .keys()
                .filter(|p| p.starts_with(&prefix))
                .cloned()
                .collect();
            for old in file_keys {
                let rest = old.strip_prefix(&prefix).unwrap();
                let contents = state.files.remove(&old).unwrap();
                state.files.insert(to.join(rest), contents);
            }
            state.dirs.insert(to.to_path_buf(), ());
            return Ok(());
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "rename: source does not exist").into())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.files.remove(path).is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "unlink: no such file").into());
        }
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        let has_children = state.files.keys().any(|p| p.parent() == Some(path))
            || state.dirs.keys().any(|p| p != path && p.starts_with(path));
        if has_children {
            return Err(io::Error::new(io::ErrorKind::Other, "directory not empty").into());
        }
        state.dirs.remove(path);
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FileHandle>> {
        {
            let mut state = self.inner.lock().unwrap();
            state.files.entry(path.to_path_buf()).or_default();
        }
        Ok(Box::new(InMemoryFileHandle {
            path: path.to_path_buf(),
            shared: self.inner.clone(),
        }))
    }
}

struct InMemoryFileHandle {
    path: PathBuf,
    shared: Arc<Mutex<InMemoryFsState>>,
}

impl FileHandle for InMemoryFileHandle {
    fn len(&self) -> Result<u64> {
        let state = self.shared.lock().unwrap();
        Ok(state.files.get(&self.path).map(|b| b.len() as u64).unwrap_or(0))
    }

    fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let state = self.shared.lock().unwrap();
        let buf = state
            .files
            .get(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        let start = offset as usize;
        let end = start + size;
        if end > buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into());
        }
        Ok(buf[start..end].to_vec())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<u64> {
        let mut state = self.shared.lock().unwrap();
        let buf = state.files.entry(self.path.clone()).or_default();
        let start = buf.len() as u64;
        buf.extend_from_slice(bytes);
        Ok(start)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        let mut state = self.shared.lock().unwrap();
        if let Some(buf) = state.files.get_mut(&self.path) {
            buf.truncate(new_size as usize);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_write_read_roundtrip() {
        let fs = InMemoryFs::new();
        let path = PathBuf::from("/db/0000000001");
        let mut handle = fs.open(&path).unwrap();
        let pos = handle.write(b"hello world").unwrap();
        assert_eq!(pos, 0);
        let back = handle.read_at(0, 5).unwrap();
        assert_eq!(back, b"hello");
        assert_eq!(handle.len().unwrap(), 11);
    }

    #[test]
    fn in_memory_truncate() {
        let fs = InMemoryFs::new();
        let path = PathBuf::from("/db/0000000001");
        let mut handle = fs.open(&path).unwrap();
        handle.write(b"0123456789").unwrap();
        handle.truncate(4).unwrap();
        assert_eq!(handle.len().unwrap(), 4);
        assert_eq!(handle.read_at(0, 4).unwrap(), b"0123");
    }

    #[test]
    fn in_memory_readdir_and_unlink() {
        let fs = InMemoryFs::new();
        fs.mkdirp(Path::new("/db"), 0o750).unwrap();
        fs.open(Path::new("/db/0000000001")).unwrap();
        fs.open(Path::new("/db/0000000002")).unwrap();

        let mut names = fs.readdir(Path::new("/db")).unwrap();
        names.sort();
        assert_eq!(names, vec!["0000000001", "0000000002"]);

        fs.unlink(Path::new("/db/0000000001")).unwrap();
        let names = fs.readdir(Path::new("/db")).unwrap();
        assert_eq!(names, vec!["0000000002"]);
    }

    #[test]
    fn in_memory_rename_directory_fallback() {
        let fs = InMemoryFs::new();
        fs.mkdirp(Path::new("/db"), 0o750).unwrap();
        fs.open(Path::new("/db/0000000001")).unwrap();

        fs.rename(Path::new("/db"), Path::new("/db-removed-123")).unwrap();
        assert!(fs.lstat(Path::new("/db-removed-123/0000000001")).unwrap());
        assert!(!fs.lstat(Path::new("/db/0000000001")).unwrap());
    }

    #[test]
    fn in_memory_append_junk_simulates_torn_write() {
        let fs = InMemoryFs::new();
        let path = PathBuf::from("/db/0000000001");
        {
            let mut handle = fs.open(&path).unwrap();
            handle.write(&[1, 2, 3, 4]).unwrap();
        }
        fs.append_junk(&path, &[0xff; 17]);
        let handle = fs.open(&path).unwrap();
        assert_eq!(handle.len().unwrap(), 21);
    }
}
