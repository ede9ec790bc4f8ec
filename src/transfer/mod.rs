//! # File transfer unit
//!
//! Moves tablespace files between the data directory and the working
//! directory, either as a verified copy or as a hard link. A tablespace is
//! transferred as a set (`.ibd` plus an optional `.cfg`); a set is either
//! completely transferred or not at all.

pub mod checksum;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

pub use checksum::file_checksum;

/// How files reach their destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Byte copy followed by size and checksum verification
    Copy,
    /// Hard link; only valid within one filesystem
    Hardlink,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Hardlink => write!(f, "hardlink"),
        }
    }
}

/// Transfer failures
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Transfer I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A required source file does not exist
    #[error("Expected file {0} does not exist")]
    Missing(PathBuf),

    /// Source and destination differ after the transfer
    #[error("Verification failed for {path}: {detail}")]
    Mismatch { path: PathBuf, detail: String },

    /// Hard link requested across filesystems
    #[error("Cannot hard-link {source_path} to {destination}: different filesystems")]
    CrossDevice {
        source_path: PathBuf,
        destination: PathBuf,
    },
}

impl TransferError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// One file to transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Optional files are skipped when the source does not exist
    pub required: bool,
}

impl FilePair {
    pub fn required<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, destination: D) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            required: true,
        }
    }

    pub fn optional<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, destination: D) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            required: false,
        }
    }
}

/// A completed, verified transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablespaceFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    /// SHA-256 of the destination contents
    pub checksum: String,
}

/// Transfers files using one [`TransferMode`]
#[derive(Debug, Clone, Copy)]
pub struct TransferUnit {
    mode: TransferMode,
}

impl TransferUnit {
    pub fn new(mode: TransferMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Transfer a tablespace file set as one unit.
    ///
    /// If any file fails, destinations already written by this call are
    /// removed again before the error is returned.
    pub fn transfer_set(&self, pairs: &[FilePair]) -> TransferResult<Vec<TablespaceFile>> {
        let mut done: Vec<TablespaceFile> = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if !pair.source.exists() {
                if pair.required {
                    rollback(&done);
                    return Err(TransferError::Missing(pair.source.clone()));
                }
                debug!("Optional file {} not present, skipping", pair.source.display());
                continue;
            }
            match self.transfer(&pair.source, &pair.destination) {
                Ok(file) => done.push(file),
                Err(e) => {
                    rollback(&done);
                    return Err(e);
                }
            }
        }
        Ok(done)
    }

    /// Transfer a single file
    pub fn transfer(&self, source: &Path, destination: &Path) -> TransferResult<TablespaceFile> {
        let parent = destination_dir(destination)?;
        fs::create_dir_all(&parent).map_err(|e| TransferError::io(&parent, e))?;
        match self.mode {
            TransferMode::Copy => copy_verified(source, destination),
            TransferMode::Hardlink => {
                ensure_same_device(source, &parent)?;
                link(source, destination)
            }
        }
    }
}

/// Fail with [`TransferError::CrossDevice`] unless `source` and
/// `destination_dir` live on the same device
pub fn ensure_same_device(source: &Path, destination_dir: &Path) -> TransferResult<()> {
    let source_dev = fs::metadata(source)
        .map_err(|e| TransferError::io(source, e))?
        .dev();
    let destination_dev = fs::metadata(destination_dir)
        .map_err(|e| TransferError::io(destination_dir, e))?
        .dev();
    if source_dev != destination_dev {
        return Err(TransferError::CrossDevice {
            source_path: source.to_path_buf(),
            destination: destination_dir.to_path_buf(),
        });
    }
    Ok(())
}

fn destination_dir(destination: &Path) -> TransferResult<PathBuf> {
    destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or_else(|| TransferError::Mismatch {
            path: destination.to_path_buf(),
            detail: "destination has no parent directory".to_string(),
        })
}

fn temp_sibling(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.ibshrink-tmp", name))
}

fn copy_verified(source: &Path, destination: &Path) -> TransferResult<TablespaceFile> {
    let temp = temp_sibling(destination);
    debug!("Copying {} to {}", source.display(), destination.display());

    if let Err(e) = place_copy(source, &temp, destination) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    let verified = verify_copy(source, destination);
    if verified.is_err() {
        let _ = fs::remove_file(destination);
    }
    verified
}

/// Copy into `temp`, make it durable with the source's owner and rename it
/// over `destination`. `temp` may be left behind on error.
fn place_copy(source: &Path, temp: &Path, destination: &Path) -> TransferResult<()> {
    fs::copy(source, temp).map_err(|e| TransferError::io(source, e))?;
    File::open(temp)
        .and_then(|f| f.sync_all())
        .map_err(|e| TransferError::io(temp, e))?;
    preserve_ownership(source, temp)?;
    fs::rename(temp, destination).map_err(|e| TransferError::io(destination, e))
}

fn verify_copy(source: &Path, destination: &Path) -> TransferResult<TablespaceFile> {
    let (source_sum, source_size) =
        file_checksum(source).map_err(|e| TransferError::io(source, e))?;
    let (dest_sum, dest_size) =
        file_checksum(destination).map_err(|e| TransferError::io(destination, e))?;
    if source_size != dest_size {
        return Err(TransferError::Mismatch {
            path: destination.to_path_buf(),
            detail: format!("size {} differs from source size {}", dest_size, source_size),
        });
    }
    if source_sum != dest_sum {
        return Err(TransferError::Mismatch {
            path: destination.to_path_buf(),
            detail: format!("checksum {} differs from source {}", dest_sum, source_sum),
        });
    }
    Ok(TablespaceFile {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        size: dest_size,
        checksum: dest_sum,
    })
}

/// Give the copy the owner of the original, as the server must be able to
/// open it. Without the privilege to do so only a warning is logged.
fn preserve_ownership(source: &Path, target: &Path) -> TransferResult<()> {
    let meta = fs::metadata(source).map_err(|e| TransferError::io(source, e))?;
    match std::os::unix::fs::chown(target, Some(meta.uid()), Some(meta.gid())) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(
                "Could not preserve ownership {}:{} on {}: {}",
                meta.uid(),
                meta.gid(),
                target.display(),
                e
            );
            Ok(())
        }
        Err(e) => Err(TransferError::io(target, e)),
    }
}

fn link(source: &Path, destination: &Path) -> TransferResult<TablespaceFile> {
    let source_meta = fs::metadata(source).map_err(|e| TransferError::io(source, e))?;

    if let Ok(existing) = fs::symlink_metadata(destination) {
        if existing.dev() == source_meta.dev() && existing.ino() == source_meta.ino() {
            debug!("{} already linked to {}", destination.display(), source.display());
        } else {
            debug!("Replacing stale {}", destination.display());
            fs::remove_file(destination).map_err(|e| TransferError::io(destination, e))?;
            hard_link(source, destination)?;
        }
    } else {
        hard_link(source, destination)?;
    }

    let linked = fs::metadata(destination).map_err(|e| TransferError::io(destination, e))?;
    if linked.ino() != source_meta.ino() {
        return Err(TransferError::Mismatch {
            path: destination.to_path_buf(),
            detail: "link does not point to the source inode".to_string(),
        });
    }
    let (checksum, size) =
        file_checksum(destination).map_err(|e| TransferError::io(destination, e))?;
    Ok(TablespaceFile {
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        size,
        checksum,
    })
}

fn hard_link(source: &Path, destination: &Path) -> TransferResult<()> {
    debug!("Linking {} to {}", source.display(), destination.display());
    fs::hard_link(source, destination).map_err(|e| {
        if e.raw_os_error() == Some(libc::EXDEV) {
            TransferError::CrossDevice {
                source_path: source.to_path_buf(),
                destination: destination.to_path_buf(),
            }
        } else {
            TransferError::io(destination, e)
        }
    })
}

fn rollback(done: &[TablespaceFile]) {
    for file in done {
        info!("Removing partially transferred {}", file.destination.display());
        if let Err(e) = fs::remove_file(&file.destination) {
            warn!("Could not remove {}: {}", file.destination.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_verifies_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data/shop/orders.ibd");
        let dest = dir.path().join("work/shop/orders.ibd");
        write(&source, b"tablespace pages");

        let unit = TransferUnit::new(TransferMode::Copy);
        let file = unit.transfer(&source, &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"tablespace pages");
        assert!(source.exists());
        assert_eq!(file.size, 16);
        assert_eq!(file.checksum, file_checksum(&source).unwrap().0);
        assert!(!temp_sibling(&dest).exists());
    }

    #[test]
    fn test_copy_overwrites_stale_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a/t.ibd");
        let dest = dir.path().join("b/t.ibd");
        write(&source, b"new");
        write(&dest, b"old partial copy");

        TransferUnit::new(TransferMode::Copy)
            .transfer(&source, &dest)
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_failed_copy_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a/t.ibd");
        let dest = dir.path().join("b/t.ibd");
        write(&source, b"pages");
        write(&dest.join("occupied"), b"");

        let err = TransferUnit::new(TransferMode::Copy)
            .transfer(&source, &dest)
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
        assert!(!temp_sibling(&dest).exists());
        assert!(dest.join("occupied").exists());
    }

    #[test]
    fn test_hardlink_same_device() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data/t.ibd");
        let dest = dir.path().join("work/t.ibd");
        write(&source, b"pages");

        let unit = TransferUnit::new(TransferMode::Hardlink);
        let file = unit.transfer(&source, &dest).unwrap();
        let (s, d) = (fs::metadata(&source).unwrap(), fs::metadata(&dest).unwrap());
        assert_eq!(s.ino(), d.ino());
        assert_eq!(file.size, 5);

        // Linking again onto the same inode is accepted
        unit.transfer(&source, &dest).unwrap();
    }

    #[test]
    fn test_hardlink_replaces_unrelated_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data/t.ibd");
        let dest = dir.path().join("work/t.ibd");
        write(&source, b"pages");
        write(&dest, b"something else");

        TransferUnit::new(TransferMode::Hardlink)
            .transfer(&source, &dest)
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pages");
    }

    #[test]
    fn test_missing_required_file_rolls_back_set() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("data/t.cfg");
        write(&cfg, b"meta");
        let pairs = vec![
            FilePair::optional(&cfg, dir.path().join("work/t.cfg")),
            FilePair::required(dir.path().join("data/t.ibd"), dir.path().join("work/t.ibd")),
        ];

        let err = TransferUnit::new(TransferMode::Copy)
            .transfer_set(&pairs)
            .unwrap_err();
        assert!(matches!(err, TransferError::Missing(_)));
        assert!(!dir.path().join("work/t.cfg").exists());
    }

    #[test]
    fn test_optional_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ibd = dir.path().join("data/t.ibd");
        write(&ibd, b"pages");
        let pairs = vec![
            FilePair::required(&ibd, dir.path().join("work/t.ibd")),
            FilePair::optional(dir.path().join("data/t.cfg"), dir.path().join("work/t.cfg")),
        ];
        let files = TransferUnit::new(TransferMode::Copy)
            .transfer_set(&pairs)
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_same_device_check() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("t.ibd");
        write(&source, b"x");
        ensure_same_device(&source, dir.path()).unwrap();
    }

    #[test]
    fn test_cross_device_hardlink_fails_without_partial_link() {
        // /dev/shm is a tmpfs on most Linux hosts; skip where it is not a
        // separate filesystem from the temp dir.
        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let other = match tempfile::tempdir_in(shm) {
            Ok(other) => other,
            Err(_) => return,
        };
        let source = dir.path().join("t.ibd");
        write(&source, b"pages");
        if fs::metadata(dir.path()).unwrap().dev() == fs::metadata(other.path()).unwrap().dev() {
            return;
        }

        let dest = other.path().join("t.ibd");
        let err = TransferUnit::new(TransferMode::Hardlink)
            .transfer(&source, &dest)
            .unwrap_err();
        assert!(matches!(err, TransferError::CrossDevice { .. }));
        assert!(!dest.exists());
    }
}
