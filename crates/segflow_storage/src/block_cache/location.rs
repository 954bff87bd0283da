//! Selection of the block cache storage prefix.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Filesystem types treated as shared between processes or machines.
const DISTRIBUTED_FS_TYPES: &[&str] = &[
    "nfs", "nfs4", "cifs", "smb3", "smbfs", "lustre", "gpfs", "ceph", "glusterfs", "beegfs",
    "9p",
];

/// Where a block cache keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLocation {
    /// A directory on a distributed filesystem, shared with other processes
    /// that probe the same temporary root. Left in place on teardown.
    Shared(PathBuf),
    /// A directory private to this process, removed on teardown.
    Private(PathBuf),
}

impl CacheLocation {
    /// Picks a location under `temp_root`.
    ///
    /// If `temp_root` resolves to a distributed filesystem the cache is
    /// shared through a well-known directory name; otherwise a
    /// process-unique directory is used.
    #[must_use]
    pub fn probe(temp_root: &Path) -> Self {
        if is_distributed_filesystem(temp_root) {
            Self::Shared(temp_root.join("segflow-block-cache"))
        } else {
            Self::Private(temp_root.join(format!(
                "segflow-block-cache-{}",
                Uuid::new_v4().simple()
            )))
        }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Shared(path) | Self::Private(path) => path,
        }
    }

    /// Returns whether the location is shared with other processes.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

#[cfg(target_os = "linux")]
fn is_distributed_filesystem(path: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") else {
        return false;
    };
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    filesystem_type(&resolved, &mounts).is_some_and(|fs_type| is_distributed_type(&fs_type))
}

#[cfg(not(target_os = "linux"))]
fn is_distributed_filesystem(_path: &Path) -> bool {
    false
}

fn is_distributed_type(fs_type: &str) -> bool {
    DISTRIBUTED_FS_TYPES.contains(&fs_type) || fs_type.starts_with("fuse.")
}

/// Finds the filesystem type of the longest mount point containing `path`.
fn filesystem_type(path: &Path, mounts: &str) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = PathBuf::from(fields.next()?.replace("\\040", " "));
            let fs_type = fields.next()?;
            path.starts_with(&mount_point)
                .then(|| (mount_point, fs_type.to_string()))
        })
        .max_by_key(|(mount_point, _)| mount_point.as_os_str().len())
        .map(|(_, fs_type)| fs_type)
}
