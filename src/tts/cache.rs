//! On-disk audio cache.
//!
//! Synthesized audio lands in a cache directory under a
//! `<YYYYmmdd_HHMMSS>_<8hex>.<ext>` name, unique across concurrent
//! synthesis tasks without coordination, and is deleted as soon as the
//! client payload has been built from it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::debug;
use uuid::Uuid;

use super::AudioFormat;

/// File-based audio cache rooted at a single directory.
pub struct AudioCache {
    dir: PathBuf,
}

impl AudioCache {
    /// Open the cache, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate a unique cache filename for the given format.
    pub fn unique_path(&self, format: AudioFormat) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        self.dir
            .join(format!("{timestamp}_{suffix}.{}", format.extension()))
    }

    /// Write audio bytes to a fresh cache file and return its path.
    pub fn store(&self, data: &[u8], format: AudioFormat) -> Result<PathBuf> {
        let path = self.unique_path(format);
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write cache file {}", path.display()))?;
        debug!(path = %path.display(), bytes = data.len(), "audio cache file written");
        Ok(path)
    }

    /// Delete a cache file. Missing files are not an error; the payload
    /// has already been built by the time this runs.
    pub fn remove(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "audio cache file removed"),
            Err(e) => debug!(path = %path.display(), error = %e, "cache file removal skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, AudioCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn creates_directory() {
        let (_tmp, cache) = cache();
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn store_writes_file_with_extension() {
        let (_tmp, cache) = cache();
        let path = cache.store(b"audio-bytes", AudioFormat::Wav).unwrap();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "wav");
        assert_eq!(std::fs::read(&path).unwrap(), b"audio-bytes");
    }

    #[test]
    fn filenames_are_unique() {
        let (_tmp, cache) = cache();
        let a = cache.unique_path(AudioFormat::Mp3);
        let b = cache.unique_path(AudioFormat::Mp3);
        assert_ne!(a, b);
    }

    #[test]
    fn filename_shape() {
        let (_tmp, cache) = cache();
        let path = cache.unique_path(AudioFormat::Mp3);
        let name = path.file_stem().unwrap().to_str().unwrap();
        // <YYYYmmdd_HHMMSS>_<8hex>
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn remove_deletes_file() {
        let (_tmp, cache) = cache();
        let path = cache.store(b"x", AudioFormat::Wav).unwrap();
        cache.remove(&path);
        assert!(!path.exists());
    }

    #[test]
    fn remove_missing_file_is_silent() {
        let (_tmp, cache) = cache();
        cache.remove(Path::new("/nonexistent/file.wav"));
    }
}
