//! Durable key → embedding persistence.
//!
//! Each vector lives in its own `<key>.emb` file using a small versioned
//! binary layout (little-endian):
//!
//! ```text
//! | "RCEM" | version: u16 | reserved: u16 | dim: u32 | dim × f32 | sha256(preceding) |
//! ```
//!
//! Saving the same key twice overwrites the previous blob. Writes go to a
//! temporary sibling and are renamed into place, so readers observe either the
//! old or the new vector, never a mix. Writers targeting the same file are
//! serialized.

use crate::types::Embedding;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

pub const EMBEDDING_EXTENSION: &str = "emb";

const MAGIC: &[u8; 4] = b"RCEM";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 12;
const CHECKSUM_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid embedding key: {0:?}")]
    InvalidKey(String),
    #[error("refusing to store an empty embedding under {0:?}")]
    EmptyEmbedding(String),
    #[error("corrupt embedding at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("embedding at {} has dimension {actual}, expected {expected}", .path.display())]
    DimensionMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of resolving an embedding reference.
///
/// Keeps "never written" apart from "written but unusable".
#[derive(Debug)]
pub enum Lookup {
    Found(Embedding),
    Absent,
    Corrupt(StoreError),
}

/// File-backed embedding store rooted at one directory.
#[derive(Debug)]
pub struct EmbeddingStore {
    dir: PathBuf,
    dimension: Option<usize>,
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl EmbeddingStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            dimension: None,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Enforce a deployment-wide vector dimension on every save and load.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Path a given key is stored under.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{EMBEDDING_EXTENSION}"))
    }

    /// Persist `embedding` under `key`, replacing any previous content.
    pub fn save(&self, embedding: &Embedding, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        if embedding.values.is_empty() {
            return Err(StoreError::EmptyEmbedding(key.to_string()));
        }
        let path = self.path_for(key);
        self.check_dimension(&path, embedding.dim())?;

        let bytes = encode(embedding);
        let lock = self.lock_for(&path);
        let written = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            write_atomic(&path, &bytes)
        };
        self.release_lock(&path, lock);
        written?;

        tracing::debug!(key, path = %path.display(), dim = embedding.dim(), "embedding saved");
        Ok(path)
    }

    /// Load the vector stored at `path`.
    ///
    /// `Ok(None)` means nothing was ever written there. Unreadable or
    /// malformed content is an error.
    pub fn load(&self, path: &Path) -> Result<Option<Embedding>, StoreError> {
        let Some(embedding) = read_embedding(path)? else {
            return Ok(None);
        };
        self.check_dimension(path, embedding.dim())?;
        Ok(Some(embedding))
    }

    /// Tagged variant of [`load`](Self::load).
    pub fn lookup(&self, path: &Path) -> Lookup {
        match self.load(path) {
            Ok(Some(embedding)) => Lookup::Found(embedding),
            Ok(None) => Lookup::Absent,
            Err(e) => Lookup::Corrupt(e),
        }
    }

    /// Number of stored blobs whose key starts with `prefix`.
    pub fn count(&self, prefix: &str) -> Result<usize, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let count = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|e| e.to_str()) == Some(EMBEDDING_EXTENSION)
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|stem| stem.starts_with(prefix))
            })
            .count();
        Ok(count)
    }

    fn check_dimension(&self, path: &Path, actual: usize) -> Result<(), StoreError> {
        match self.dimension {
            Some(expected) if expected != actual => Err(StoreError::DimensionMismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Drop the per-path lock once no other writer holds or waits on it.
    fn release_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }
}

/// Read one embedding file without a store, e.g. for offline inspection.
///
/// Same contract as [`EmbeddingStore::load`] minus the dimension check.
/// Never creates directories.
pub fn read_embedding(path: &Path) -> Result<Option<Embedding>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    decode(&bytes)
        .map(Some)
        .map_err(|reason| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
}

/// Key for an enrolled student's reference vector.
pub fn student_key(student: &str) -> String {
    format!("student_{student}")
}

/// Key for an archived unknown face.
pub fn unknown_key(timestamp: &str, sequence: usize) -> String {
    format!("unknown_{timestamp}_{sequence}")
}

/// Keys become file stems: plain ASCII words only, no hidden files.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let well_formed = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("embedding");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn encode(embedding: &Embedding) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + embedding.dim() * 4 + CHECKSUM_LEN);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(embedding.dim() as u32).to_le_bytes());
    for v in &embedding.values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    let checksum = Sha256::digest(&buf);
    buf.extend_from_slice(&checksum);
    buf
}

fn decode(bytes: &[u8]) -> Result<Embedding, String> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(format!("truncated blob ({} bytes)", bytes.len()));
    }
    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);

    if &body[..4] != MAGIC {
        return Err("bad magic".into());
    }
    let version = u16::from_le_bytes([body[4], body[5]]);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }
    if Sha256::digest(body).as_slice() != checksum {
        return Err("checksum mismatch".into());
    }

    let dim = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
    let payload = &body[HEADER_LEN..];
    if payload.len() != dim * 4 {
        return Err(format!(
            "header declares {dim} values but payload holds {} bytes",
            payload.len()
        ));
    }

    let values = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding::new(values))
}
