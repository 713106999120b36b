//! Break a hard link by copying the file into a fresh inode.
//!
//! The copy is staged next to the original under `<name>,,+++`, then
//! renamed over the original name in a single `renameat`, so the name
//! always resolves to either the old shared inode or the new private one.
//! Other names that shared the old inode keep it, with its content intact.

use std::ffi::OsString;
use std::fs::{File, Permissions};
use std::io::Write;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use flcow_config::{log_engine_debug, log_engine_warn};
use memmap2::Mmap;
use nix::fcntl::{openat, renameat, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{unlinkat, UnlinkatFlags};

use crate::error::{EngineError, Result};

/// Suffix appended to the original name for the staging copy.
pub const TEMP_SUFFIX: &str = ",,+++";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    /// The name now refers to a private copy with link count 1.
    Broken,
    /// The file was no longer shared when re-checked; nothing was done.
    AlreadyExclusive,
}

/// Staging file name for `path`.
pub fn temp_name(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().as_bytes().to_vec();
    raw.extend_from_slice(TEMP_SUFFIX.as_bytes());
    PathBuf::from(OsString::from_vec(raw))
}

/// Removes the staging file on drop unless the rename went through.
struct StagedCopy<'a> {
    dir: BorrowedFd<'a>,
    path: PathBuf,
    armed: bool,
}

impl<'a> StagedCopy<'a> {
    fn new(dir: BorrowedFd<'a>, path: PathBuf) -> Self {
        Self {
            dir,
            path,
            armed: true,
        }
    }

    fn commit(mut self, target: &Path) -> Result<()> {
        renameat(self.dir, &self.path, self.dir, target).map_err(EngineError::Rename)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for StagedCopy<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = unlinkat(self.dir, &self.path, UnlinkatFlags::NoRemoveDir) {
                log_engine_warn!(temp = ?self.path, error = %e, "cannot remove staging copy");
            }
        }
    }
}

/// Give `path` (relative to `dir`) its own inode, preserving content,
/// owner, group and permission bits.
///
/// The source is re-examined here: it must still be a regular file, and if
/// its link count has dropped to 1 since the caller looked, the call is a
/// no-op. On any error the original entry and every link to it are left
/// exactly as they were and the staging copy is removed.
pub fn break_link(dir: BorrowedFd<'_>, path: &Path) -> Result<BreakOutcome> {
    if path.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath);
    }

    let source = openat(
        dir,
        path,
        OFlag::O_RDONLY | OFlag::O_CLOEXEC | OFlag::O_NOFOLLOW | OFlag::O_NOCTTY,
        Mode::empty(),
    )
    .map(File::from)
    .map_err(EngineError::Open)?;

    let meta = source.metadata().map_err(EngineError::Stat)?;
    if !meta.file_type().is_file() {
        return Err(EngineError::NotRegular);
    }
    if meta.nlink() <= 1 {
        log_engine_debug!(path = ?path, "already exclusive");
        return Ok(BreakOutcome::AlreadyExclusive);
    }
    let perm = meta.mode() & 0o7777;

    let staging = temp_name(path);
    let mut copy = openat(
        dir,
        &staging,
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_WRONLY | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(perm as libc::mode_t),
    )
    .map(File::from)
    .map_err(|source| EngineError::CreateTemp {
        path: staging.clone(),
        source,
    })?;
    let staged = StagedCopy::new(dir, staging);

    copy_content(&source, &mut copy, meta.len())?;
    drop(source);

    // chown may clear set-id bits, so permissions go last
    std::os::unix::fs::fchown(&copy, Some(meta.uid()), Some(meta.gid()))
        .map_err(EngineError::Chown)?;
    copy.set_permissions(Permissions::from_mode(perm))
        .map_err(EngineError::Chmod)?;
    drop(copy);

    staged.commit(path)?;
    log_engine_debug!(path = ?path, size = meta.len(), "hard link broken");
    Ok(BreakOutcome::Broken)
}

/// [`break_link`] relative to the working directory.
pub fn break_link_cwd(path: &Path) -> Result<BreakOutcome> {
    break_link(crate::cwd(), path)
}

fn copy_content(source: &File, dest: &mut File, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    // SAFETY: read-only private view; a concurrent truncate of the source is
    // the documented race of this design and is not guarded against.
    let map = unsafe { Mmap::map(source) }.map_err(EngineError::Map)?;
    dest.write_all(&map).map_err(EngineError::Write)
}
