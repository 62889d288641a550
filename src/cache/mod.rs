//! Cache Store
//!
//! Content-addressed on-disk store for radar image bytes, keyed by the
//! frame cache key (one file per key in a flat directory). Lookups treat
//! missing, expired, and corrupted entries as plain misses rather than
//! errors, and expired/corrupt files are deleted as a side effect. Maintenance at
//! initialization purges expired entries and evicts
//! oldest-by-modification-time files until the directory fits the size
//! budget.
//!
//! All file I/O is confined to one private worker thread fed by a command
//! channel, so callers never block and directory maintenance never races a
//! read-modify-write.

use crate::error::CacheError;
use crate::frame::FrameKey;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Eight-byte PNG signature; payloads without it are treated as corrupt.
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Whether `bytes` looks like a radar overlay image.
///
/// Image decoding is out of scope for the pipeline; the signature check is
/// what distinguishes a radar PNG from an error page or truncated payload.
pub fn is_valid_radar_image(bytes: &[u8]) -> bool {
    bytes.len() > PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

enum Command {
    Get {
        key: String,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, CacheError>>,
    },
    Put {
        key: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
    Remove {
        key: String,
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
    Contains {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    SizeBytes {
        reply: oneshot::Sender<Result<u64, CacheError>>,
    },
}

/// Handle to the cache store. Cheap to clone; all clones talk to the same
/// worker thread.
#[derive(Clone)]
pub struct CacheStore {
    sender: mpsc::Sender<Command>,
}

impl CacheStore {
    /// Open (or create) a cache directory and start the I/O worker.
    ///
    /// Maintenance runs on the worker before any command is served, so the
    /// first lookup already sees a pruned directory.
    pub fn open(
        directory: PathBuf,
        max_size_bytes: u64,
        max_age: Duration,
    ) -> Result<Self, CacheError> {
        fs::create_dir_all(&directory)?;

        let (sender, receiver) = mpsc::channel();
        let worker = CacheWorker {
            root: directory,
            max_size_bytes,
            max_age,
        };
        std::thread::Builder::new()
            .name("radarloop-cache".to_string())
            .spawn(move || worker.run(receiver))?;

        Ok(Self { sender })
    }

    /// Look up image bytes. `None` for missing, expired, or corrupt entries.
    pub async fn get(&self, key: &FrameKey) -> Result<Option<Vec<u8>>, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            key: key.cache_key(),
            reply,
        })?;
        rx.await.map_err(|_| CacheError::Closed)?
    }

    /// Store image bytes under the frame's cache key.
    pub async fn put(&self, key: &FrameKey, bytes: Vec<u8>) -> Result<(), CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Put {
            key: key.cache_key(),
            bytes,
            reply,
        })?;
        rx.await.map_err(|_| CacheError::Closed)?
    }

    /// Remove an entry. Removing a missing entry is a no-op.
    pub async fn remove(&self, key: &FrameKey) -> Result<(), CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            key: key.cache_key(),
            reply,
        })?;
        rx.await.map_err(|_| CacheError::Closed)?
    }

    /// Whether a file exists for the key (expiry not consulted).
    pub async fn contains(&self, key: &FrameKey) -> Result<bool, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Contains {
            key: key.cache_key(),
            reply,
        })?;
        rx.await.map_err(|_| CacheError::Closed)
    }

    /// Total size of all cached files, in bytes.
    pub async fn size_bytes(&self) -> Result<u64, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SizeBytes { reply })?;
        rx.await.map_err(|_| CacheError::Closed)?
    }

    fn send(&self, command: Command) -> Result<(), CacheError> {
        self.sender.send(command).map_err(|_| CacheError::Closed)
    }
}

struct CacheWorker {
    root: PathBuf,
    max_size_bytes: u64,
    max_age: Duration,
}

impl CacheWorker {
    fn run(self, receiver: mpsc::Receiver<Command>) {
        self.maintain();

        while let Ok(command) = receiver.recv() {
            match command {
                Command::Get { key, reply } => {
                    let _ = reply.send(self.get(&key));
                }
                Command::Put { key, bytes, reply } => {
                    let _ = reply.send(self.put(&key, &bytes));
                }
                Command::Remove { key, reply } => {
                    let _ = reply.send(self.remove(&key));
                }
                Command::Contains { key, reply } => {
                    let _ = reply.send(self.path_for(&key).exists());
                }
                Command::SizeBytes { reply } => {
                    let _ = reply.send(self.size_bytes());
                }
            }
        }

        debug!("Cache worker stopped");
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.png", key))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if self.is_expired(&metadata) {
            debug!(key, "Cache entry expired, removing");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        if !is_valid_radar_image(&bytes) {
            warn!(key, "Corrupt cache entry, removing");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(bytes))
    }

    /// Atomic write: temp file then rename, so readers never observe a
    /// partially written entry.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let temp_path = path.with_extension("png.tmp");

        fs::write(&temp_path, bytes)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(key, bytes = bytes.len(), "Cached radar image");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn size_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn is_expired(&self, metadata: &fs::Metadata) -> bool {
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }

    /// Startup maintenance: purge expired entries, then evict oldest files
    /// until under the size budget.
    fn maintain(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cache maintenance skipped, directory unreadable");
                return;
            }
        };

        let mut files = Vec::new();
        let mut expired = 0usize;
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            if self.is_expired(&metadata) {
                if fs::remove_file(entry.path()).is_ok() {
                    expired += 1;
                }
                continue;
            }
            let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
            files.push((entry.path(), modified, metadata.len()));
        }

        let mut total: u64 = files.iter().map(|(_, _, len)| len).sum();
        let mut evicted = 0usize;
        if total > self.max_size_bytes {
            files.sort_by_key(|(_, modified, _)| *modified);
            for (path, _, len) in &files {
                if total <= self.max_size_bytes {
                    break;
                }
                if fs::remove_file(path).is_ok() {
                    total -= len;
                    evicted += 1;
                }
            }
        }

        if expired > 0 || evicted > 0 {
            info!(expired, evicted, remaining_bytes = total, "Cache maintenance complete");
        }
    }
}
