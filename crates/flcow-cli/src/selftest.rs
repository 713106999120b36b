//! `flcow selftest`: link two files, rewrite one through each libc entry
//! point, and check the other kept its data.
//!
//! Only meaningful with the layer preloaded (`flcow run -- flcow selftest`).

use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flcow_config::{log_cli_debug, POLICY_ENV};
use libc::{c_char, c_int, FILE};

const DATA_BEFORE: &[u8] = b"FLCOW Test Data Before";
const DATA_AFTER: &[u8] = b"FLCOW Test Data After";

/// Exit code of the errno pass-through step.
const ERRNO_STEP: i32 = 6;

type ReopenFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut FILE) -> *mut FILE;

/// Which libc function opens the files under test.
#[derive(Debug, Clone, Copy)]
enum Opener {
    Open,
    Open64,
    OpenAt,
    OpenAt64,
    Fopen,
    Fopen64,
    Freopen,
    Freopen64,
}

/// An open file from either family.
enum Handle {
    Fd(File),
    Stream(*mut FILE),
}

impl Handle {
    unsafe fn from_fd(fd: c_int) -> io::Result<Self> {
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Handle::Fd(File::from_raw_fd(fd)))
    }

    fn from_stream(stream: *mut FILE) -> io::Result<Self> {
        if stream.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Handle::Stream(stream))
    }

    fn write_all(self, data: &[u8]) -> io::Result<()> {
        match self {
            Handle::Fd(mut file) => file.write_all(data),
            Handle::Stream(stream) => {
                let n = unsafe { libc::fwrite(data.as_ptr().cast(), 1, data.len(), stream) };
                let closed = unsafe { libc::fclose(stream) };
                if n != data.len() || closed != 0 {
                    return Err(io::Error::other("short fwrite"));
                }
                Ok(())
            }
        }
    }
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// `freopen` onto a stream that starts out on `/dev/null`.
unsafe fn reopen(real: ReopenFn, path: *const c_char, mode: *const c_char) -> *mut FILE {
    let base = libc::fopen(b"/dev/null\0".as_ptr().cast(), b"r\0".as_ptr().cast());
    if base.is_null() {
        return base;
    }
    // on failure freopen has already closed `base`
    real(path, mode, base)
}

impl Opener {
    const ALL: [Opener; 8] = [
        Opener::Open,
        Opener::Open64,
        Opener::OpenAt,
        Opener::OpenAt64,
        Opener::Fopen,
        Opener::Fopen64,
        Opener::Freopen,
        Opener::Freopen64,
    ];

    fn label(self) -> &'static str {
        match self {
            Opener::Open => "open",
            Opener::Open64 => "open64",
            Opener::OpenAt => "openat",
            Opener::OpenAt64 => "openat64",
            Opener::Fopen => "fopen",
            Opener::Fopen64 => "fopen64",
            Opener::Freopen => "freopen",
            Opener::Freopen64 => "freopen64",
        }
    }

    /// Open for write without truncation and write `data` at offset 0.
    ///
    /// The `*at` variants resolve the bare file name against `dir`, not
    /// against the working directory.
    fn write_file(self, dir: &File, path: &Path, data: &[u8]) -> io::Result<()> {
        let full = c_path(path)?;
        let name = c_path(Path::new(path.file_name().unwrap_or(path.as_os_str())))?;
        let flags = libc::O_WRONLY | libc::O_CREAT;
        let perm = 0o666 as libc::c_uint;
        // "r+" on an existing file, "w" only to create it
        let mode: &[u8] = if path.exists() { b"r+\0" } else { b"w\0" };
        let mode = mode.as_ptr().cast::<c_char>();

        let handle = unsafe {
            match self {
                Opener::Open => Handle::from_fd(libc::open(full.as_ptr(), flags, perm)),
                Opener::Open64 => Handle::from_fd(libc::open64(full.as_ptr(), flags, perm)),
                Opener::OpenAt => {
                    Handle::from_fd(libc::openat(dir.as_raw_fd(), name.as_ptr(), flags, perm))
                }
                Opener::OpenAt64 => {
                    Handle::from_fd(libc::openat64(dir.as_raw_fd(), name.as_ptr(), flags, perm))
                }
                Opener::Fopen => Handle::from_stream(libc::fopen(full.as_ptr(), mode)),
                Opener::Fopen64 => Handle::from_stream(libc::fopen64(full.as_ptr(), mode)),
                Opener::Freopen => {
                    Handle::from_stream(reopen(libc::freopen, full.as_ptr(), mode))
                }
                Opener::Freopen64 => {
                    Handle::from_stream(reopen(libc::freopen64, full.as_ptr(), mode))
                }
            }
        }?;
        handle.write_all(data)
    }
}

fn report(label: &str, step: &str, ok: bool) {
    let status = if ok { "[ OK ]" } else { "[ FAILED ]" };
    println!("[{}] {}\t\t{}", label, step, status);
    let _ = io::stdout().flush();
}

fn nlink(path: &Path) -> u64 {
    fs::symlink_metadata(path).map(|m| m.nlink()).unwrap_or(0)
}

struct Scratch {
    first: PathBuf,
    second: PathBuf,
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.second);
        let _ = fs::remove_file(&self.first);
    }
}

/// Run one opener through the whole sequence; `Err(code)` is the step
/// number that failed.
fn run_one(dir: &Path, handle: &File, opener: Opener) -> std::result::Result<(), i32> {
    let label = opener.label();
    let pid = std::process::id();
    let first = dir.join(format!(",,flcow-test1++.{pid}"));
    let second = dir.join(format!(",,flcow-test2++.{pid}"));

    if let Err(e) = opener.write_file(handle, &first, DATA_BEFORE) {
        eprintln!("{}: {}", first.display(), e);
        report(label, "Test Result", false);
        return Err(1);
    }
    report(label, "File Creation", true);
    let scratch = Scratch { first, second };

    if let Err(e) = fs::hard_link(&scratch.first, &scratch.second) {
        eprintln!("{}: {}", scratch.second.display(), e);
        report(label, "Test Result", false);
        return Err(2);
    }
    report(label, "Link Creation", true);

    if nlink(&scratch.first) < 2 || nlink(&scratch.second) < 2 {
        report(label, "Link Check", false);
        return Err(3);
    }
    report(label, "Link Check", true);

    if let Err(e) = opener.write_file(handle, &scratch.first, DATA_AFTER) {
        eprintln!("{}: {}", scratch.first.display(), e);
        report(label, "File Rewrite", false);
        return Err(4);
    }
    report(label, "File Rewrite", true);

    let untouched = fs::read(&scratch.second).is_ok_and(|d| d == DATA_BEFORE);
    log_cli_debug!(
        opener = label,
        first = nlink(&scratch.first),
        second = nlink(&scratch.second),
        untouched,
        "link counts after rewrite"
    );
    if nlink(&scratch.first) > 1 || nlink(&scratch.second) > 1 || !untouched {
        report(label, "COW Check", false);
        return Err(5);
    }
    report(label, "COW Check", true);

    println!("[{}] Test Result\t\t[ OK ]\n", label);
    Ok(())
}

/// A failed write-open must report the real call's errno, and a successful
/// one must leave errno as the caller had it, whatever the layer did first.
fn errno_check(dir: &Path) -> io::Result<bool> {
    let pid = std::process::id();
    let missing = c_path(&dir.join(format!(",,flcow-missing++.{pid}/file")))?;
    let created_path = dir.join(format!(",,flcow-errno++.{pid}"));
    let created = c_path(&created_path)?;

    let (failed_fd, failed_errno, ok_fd, kept_errno) = unsafe {
        let failed_fd = libc::open(missing.as_ptr(), libc::O_WRONLY);
        let failed_errno = *libc::__errno_location();

        *libc::__errno_location() = libc::EDOM;
        let ok_fd = libc::open(created.as_ptr(), libc::O_WRONLY | libc::O_CREAT, 0o644 as libc::c_uint);
        let kept_errno = *libc::__errno_location();
        (failed_fd, failed_errno, ok_fd, kept_errno)
    };

    if failed_fd >= 0 {
        drop(unsafe { File::from_raw_fd(failed_fd) });
    }
    if ok_fd >= 0 {
        drop(unsafe { File::from_raw_fd(ok_fd) });
        let _ = fs::remove_file(&created_path);
    }
    log_cli_debug!(failed_errno, kept_errno, "errno after intercepted opens");

    Ok(failed_fd < 0 && failed_errno == libc::ENOENT && ok_fd >= 0 && kept_errno == libc::EDOM)
}

/// Returns the process exit code: 0 on success, else the failed step.
pub fn cmd_selftest(dir: Option<&Path>) -> Result<i32> {
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Test directory {} not found", dir.display()))?;
    let handle =
        File::open(&dir).with_context(|| format!("Failed to open {}", dir.display()))?;

    // the layer re-reads the policy on every open
    std::env::set_var(POLICY_ENV, dir.as_os_str());

    for opener in Opener::ALL {
        if let Err(code) = run_one(&dir, &handle, opener) {
            return Ok(code);
        }
    }

    let ok = errno_check(&dir).context("errno check")?;
    report("errno", "Errno Check", ok);
    Ok(if ok { 0 } else { ERRNO_STEP })
}
