use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

use crate::hashing::copy_hashed;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed blob directory: `objects/<first two hex>/<hash>`.
///
/// Blobs are written to `tmp/` first and renamed into place, so a blob that
/// exists under its hash is always complete.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, hash: &str) -> PathBuf {
        let prefix = hash.get(..2).unwrap_or("00");
        self.root.join("objects").join(prefix).join(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blob_path(hash).is_file()
    }

    /// Copies a file into the store while hashing it.
    ///
    /// Returns the content hash and the number of bytes read. Identical content
    /// is stored once.
    pub fn ingest(&self, source: &Path) -> io::Result<(String, u64)> {
        let temp_path = self.temp_path();
        let result = self.ingest_via(source, &temp_path);
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn ingest_via(&self, source: &Path, temp_path: &Path) -> io::Result<(String, u64)> {
        let mut reader = BufReader::new(File::open(source)?);
        let (hash, size) = {
            let mut writer = BufWriter::new(File::create(temp_path)?);
            let hashed = copy_hashed(&mut reader, &mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            hashed
        };

        let blob_path = self.blob_path(&hash);
        if blob_path.is_file() {
            fs::remove_file(temp_path)?;
        } else {
            if let Some(parent) = blob_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(temp_path, &blob_path)?;
        }
        Ok((hash, size))
    }

    pub fn open_blob(&self, hash: &str) -> io::Result<File> {
        File::open(self.blob_path(hash))
    }

    /// Deletes a blob and returns the bytes freed. Missing blobs free nothing.
    pub fn remove(&self, hash: &str) -> io::Result<u64> {
        let path = self.blob_path(hash);
        match fs::metadata(&path) {
            Ok(meta) => {
                fs::remove_file(&path)?;
                Ok(meta.len())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Total bytes held in `objects/`.
    pub fn disk_usage(&self) -> u64 {
        WalkDir::new(self.root.join("objects"))
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join("tmp")
            .join(format!("ingest-{}-{}", std::process::id(), n))
    }
}
