use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use log::trace;
use parking_lot::Mutex;

/// File storage used for persisted profiles and bus configuration.
///
/// Paths use the firmware layout (`/profiles/led0.normal.cbor`). Writes
/// replace the target atomically: readers see either the old contents or
/// the new contents, never a partial file.
pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;
    fn remove(&self, path: &str) -> io::Result<()>;
    fn exists(&self, path: &str) -> bool;
}

/// Storage rooted at a directory on the host file system.
pub struct DirStorage {
    root: PathBuf,
    // Serialises file access across all buses
    lock: Mutex<()>,
}

impl DirStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DirStorage {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn write_new(temp: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(temp)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl Storage for DirStorage {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let _lock = self.lock.lock();
        fs::read(self.resolve(path))
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let _lock = self.lock.lock();
        let target = self.resolve(path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut temp = target.clone().into_os_string();
        temp.push("~");
        let temp = PathBuf::from(temp);

        // Left over from an interrupted write
        if temp.exists() {
            fs::remove_file(&temp)?;
        }

        let result = Self::write_new(&temp, data).and_then(|_| fs::rename(&temp, &target));
        if result.is_err() {
            trace!("Removing partial file {}", temp.display());
            fs::remove_file(&temp).ok();
        }
        result
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        let _lock = self.lock.lock();
        fs::remove_file(self.resolve(path))
    }

    fn exists(&self, path: &str) -> bool {
        let _lock = self.lock.lock();
        self.resolve(path).is_file()
    }
}

/// In-memory storage. Writes can be made to fail to exercise error paths.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "write failure"));
        }

        self.files.lock().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        match self.files.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("aurcor-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn test_dir_storage_round_trip() {
        let root = temp_root("storage");
        let storage = DirStorage::new(&root);

        assert!(!storage.exists("/buses/led0.cbor"));
        storage.write("/buses/led0.cbor", &[1, 2, 3]).unwrap();
        assert!(storage.exists("/buses/led0.cbor"));
        assert!(root.join("buses/led0.cbor").is_file());
        assert!(!root.join("buses/led0.cbor~").exists());
        assert_eq!(storage.read("/buses/led0.cbor").unwrap(), vec![1, 2, 3]);

        storage.write("/buses/led0.cbor", &[4]).unwrap();
        assert_eq!(storage.read("/buses/led0.cbor").unwrap(), vec![4]);

        storage.remove("/buses/led0.cbor").unwrap();
        assert!(storage.read("/buses/led0.cbor").is_err());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_dir_storage_failed_write_leaves_no_temp_file() {
        let root = temp_root("storage-fail");
        let target = root.join("buses/led0.cbor");

        // A directory in the way makes the final rename fail
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep"), [7]).unwrap();

        let storage = DirStorage::new(&root);
        assert!(storage.write("/buses/led0.cbor", &[1, 2, 3]).is_err());
        assert!(!root.join("buses/led0.cbor~").exists());
        assert!(target.is_dir());
        assert_eq!(fs::read(target.join("keep")).unwrap(), vec![7]);

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_memory_storage_write_failure() {
        let storage = MemoryStorage::new();
        storage.write("/a", &[1]).unwrap();
        storage.fail_writes(true);
        assert!(storage.write("/a", &[2]).is_err());
        assert_eq!(storage.read("/a").unwrap(), vec![1]);
        assert_eq!(storage.files(), vec!["/a".to_string()]);
    }
}
