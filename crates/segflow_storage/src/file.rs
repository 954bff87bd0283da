//! Segment storage in a file.

use crate::backend::{check_span, StorageBackend};
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A segment file.
///
/// Files are opened in append mode while their store is being written and
/// read-only once sealed. Reads are positional, so any number of readers of
/// the same segment proceed without sharing a cursor.
///
/// # Example
///
/// ```no_run
/// use segflow_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut segment = FileBackend::create(Path::new("segment-00000.dat")).unwrap();
/// let offset = segment.append(b"block bytes").unwrap();
/// segment.seal().unwrap();
/// assert_eq!(segment.read_at(offset, 5).unwrap(), b"block");
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: u64,
    sealed: bool,
    #[cfg(not(unix))]
    cursor: parking_lot::Mutex<()>,
}

impl FileBackend {
    /// Creates an empty segment file for appending, replacing any file at
    /// `path`. Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(path)?;
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        Ok(Self::from_file(path, file, 0, false))
    }

    /// Opens a finished segment file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_sealed(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::from_file(path, file, size, true))
    }

    fn from_file(path: &Path, file: File, size: u64, sealed: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            size,
            sealed,
            #[cfg(not(unix))]
            cursor: parking_lot::Mutex::new(()),
        }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(not(unix))]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let _cursor = self.cursor.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

impl StorageBackend for FileBackend {
    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.sealed {
            return Err(StorageError::Sealed);
        }
        let offset = self.size;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_span(offset, len, self.size)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            self.read_exact_at(&mut buf, offset)?;
        }
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn seal(&mut self) -> StorageResult<()> {
        if !self.sealed {
            self.file.sync_all()?;
            self.sealed = true;
        }
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_replaces_previous_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("segment-00000.dat");

        let mut first = FileBackend::create(&path).unwrap();
        first.append(b"stale rows").unwrap();
        first.seal().unwrap();

        let second = FileBackend::create(&path).unwrap();
        assert_eq!(second.size(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert_eq!(second.path(), path);
    }

    #[test]
    fn appended_blocks_are_readable_before_sealing() {
        let dir = tempdir().unwrap();
        let mut segment = FileBackend::create(&dir.path().join("s.dat")).unwrap();

        assert_eq!(segment.append(b"block-a").unwrap(), 0);
        assert_eq!(segment.read_at(0, 7).unwrap(), b"block-a");
        assert_eq!(segment.append(b"block-bb").unwrap(), 7);
        assert_eq!(segment.read_at(7, 8).unwrap(), b"block-bb");
        assert!(segment.read_at(10, 8).is_err());
    }

    #[test]
    fn sealed_file_reopens_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.dat");
        {
            let mut segment = FileBackend::create(&path).unwrap();
            segment.append(b"sealed segment").unwrap();
            segment.seal().unwrap();
            assert!(matches!(segment.append(b"x"), Err(StorageError::Sealed)));
        }

        let mut segment = FileBackend::open_sealed(&path).unwrap();
        assert!(segment.is_sealed());
        assert_eq!(segment.size(), 14);
        assert_eq!(segment.read_at(7, 7).unwrap(), b"segment");
        assert!(matches!(segment.append(b"x"), Err(StorageError::Sealed)));
        assert!(FileBackend::open_sealed(&dir.path().join("missing.dat")).is_err());
    }

    #[test]
    fn concurrent_positional_reads() {
        let dir = tempdir().unwrap();
        let mut segment = FileBackend::create(&dir.path().join("s.dat")).unwrap();
        for i in 0..64u8 {
            segment.append(&[i; 16]).unwrap();
        }
        segment.seal().unwrap();

        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let segment = &segment;
                scope.spawn(move || {
                    for i in (t..64).step_by(4) {
                        let block = segment.read_at(i * 16, 16).unwrap();
                        assert!(block.iter().all(|&b| u64::from(b) == i));
                    }
                });
            }
        });
    }
}
