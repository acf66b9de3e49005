//! Durable name → embedding gallery.
//!
//! The gallery lives in one file: the magic `KFG1` followed by a postcard
//! envelope. A missing or unreadable file loads as an empty gallery. Writes
//! go to a temp file in the same directory and are renamed into place, and
//! every mutation holds an exclusive lock on `<file>.lock` across its
//! load-mutate-save cycle.

use crate::lock::GalleryLock;
use crate::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"KFG1";
const FORMAT_VERSION: u32 = 1;

/// Known identities. Iteration is ordered by name.
pub type Gallery = BTreeMap<String, Embedding>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("writing gallery {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("locking gallery {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding gallery: {0}")]
    Encode(#[from] postcard::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct FaceRecord {
    name: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredGallery {
    version: u32,
    records: Vec<FaceRecord>,
}

fn encode(gallery: &Gallery) -> Result<Vec<u8>, postcard::Error> {
    let stored = StoredGallery {
        version: FORMAT_VERSION,
        records: gallery
            .iter()
            .map(|(name, emb)| FaceRecord {
                name: name.clone(),
                embedding: emb.to_vec(),
            })
            .collect(),
    };
    let mut out = MAGIC.to_vec();
    out.extend(postcard::to_allocvec(&stored)?);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<Gallery, String> {
    let body = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| "missing file magic".to_string())?;
    let (stored, rest) =
        postcard::take_from_bytes::<StoredGallery>(body).map_err(|e| e.to_string())?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes", rest.len()));
    }
    if stored.version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", stored.version));
    }

    let mut gallery = Gallery::new();
    for record in stored.records {
        if record.embedding.is_empty() {
            return Err(format!("empty embedding for {:?}", record.name));
        }
        gallery.insert(record.name, Embedding::from_vec(record.embedding));
    }
    Ok(gallery)
}

/// File-backed gallery. Every mutation is written through immediately.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".lock");
        PathBuf::from(p)
    }

    fn parent_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Read the gallery. Never fails: a missing file is an empty gallery and
    /// a corrupt one is logged and treated as empty.
    pub fn load(&self) -> Gallery {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Gallery::new(),
            Err(e) => {
                log::warn!(
                    "cannot read gallery {}: {}; starting empty",
                    self.path.display(),
                    e
                );
                return Gallery::new();
            }
        };
        match decode(&bytes) {
            Ok(gallery) => {
                log::debug!(
                    "loaded {} face(s) from {}",
                    gallery.len(),
                    self.path.display()
                );
                gallery
            }
            Err(reason) => {
                log::warn!(
                    "gallery {} is corrupt ({}); starting empty",
                    self.path.display(),
                    reason
                );
                Gallery::new()
            }
        }
    }

    /// Replace the stored gallery atomically.
    pub fn save(&self, gallery: &Gallery) -> Result<(), StoreError> {
        let data = encode(gallery)?;
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self.parent_dir();
        fs::create_dir_all(dir).map_err(write_err)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gallery".to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }

        log::debug!("saved {} face(s) to {}", gallery.len(), self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<GalleryLock, StoreError> {
        let lock_path = self.lock_path();
        let lock_err = |source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        };
        fs::create_dir_all(self.parent_dir()).map_err(lock_err)?;
        GalleryLock::acquire(&lock_path).map_err(lock_err)
    }

    /// Insert or overwrite `name`.
    pub fn add(&self, name: &str, embedding: Embedding) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut gallery = self.load();
        if gallery.insert(name.to_string(), embedding).is_some() {
            log::info!("replacing existing face for {:?}", name);
        }
        self.save(&gallery)
    }

    /// Move the entry at `old_name` to `new_name`, overwriting whatever was
    /// there. Returns `false` without touching storage if `old_name` is unknown.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        let mut gallery = self.load();
        let Some(embedding) = gallery.remove(old_name) else {
            return Ok(false);
        };
        if gallery.insert(new_name.to_string(), embedding).is_some() {
            log::info!("rename overwrote existing face for {:?}", new_name);
        }
        self.save(&gallery)?;
        Ok(true)
    }

    pub fn names(&self) -> Vec<String> {
        self.load().into_keys().collect()
    }
}
