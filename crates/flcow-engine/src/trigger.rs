//! Decide whether an open call has to break a hard link first.
//!
//! The checks run cheapest first: requested access, then the policy prefix
//! list, then `fstatat`. Nothing here has side effects.
//!
//! The policy is matched against the name the caller passed. The link-count
//! check follows a trailing symlink the way `open` would, and the name it
//! ends at is what gets duplicated; the symlink itself is left alone.

use std::borrow::Cow;
use std::ffi::CStr;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use flcow_config::{in_policy, normalize, normalize_in, PolicyList};
use nix::errno::Errno;
use nix::fcntl::{readlinkat, AtFlags};
use nix::sys::stat::fstatat;

/// Symlinks followed before giving up, matching the kernel's ELOOP limit.
const MAX_SYMLINK_HOPS: usize = 40;

/// What the caller asked for: descriptor-family flags or a stdio mode.
#[derive(Debug, Clone, Copy)]
pub enum OpenRequest<'a> {
    Flags(libc::c_int),
    Mode(&'a [u8]),
}

impl<'a> OpenRequest<'a> {
    pub fn from_mode_cstr(mode: &'a CStr) -> Self {
        OpenRequest::Mode(mode.to_bytes())
    }

    /// True when the request can modify the file.
    pub fn wants_write(&self) -> bool {
        match *self {
            OpenRequest::Flags(flags) => flags & (libc::O_WRONLY | libc::O_RDWR) != 0,
            OpenRequest::Mode(mode) => match mode.first() {
                Some(b'w' | b'a') => true,
                Some(_) => mode.contains(&b'+'),
                None => false,
            },
        }
    }
}

/// Attributes of the target at check time. Never cached: the file may
/// change between this snapshot and the duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub regular: bool,
    pub symlink: bool,
    pub nlink: u64,
    pub size: u64,
}

impl FileSnapshot {
    /// `fstatat` without following a final symlink.
    pub fn at(dir: BorrowedFd<'_>, path: &Path) -> nix::Result<Self> {
        let st = fstatat(dir, path, AtFlags::AT_SYMLINK_NOFOLLOW)?;
        let kind = st.st_mode & libc::S_IFMT;
        Ok(Self {
            regular: kind == libc::S_IFREG,
            symlink: kind == libc::S_IFLNK,
            nlink: st.st_nlink as u64,
            size: st.st_size as u64,
        })
    }

    /// Follow a trailing symlink chain and snapshot the file it ends at.
    ///
    /// Returns the final name, relative to `dir` unless a link target was
    /// absolute. Intermediate directory symlinks are left to the kernel.
    pub fn resolve<'a>(dir: BorrowedFd<'_>, path: &'a Path) -> nix::Result<(Cow<'a, Path>, Self)> {
        let mut current = Cow::Borrowed(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let snapshot = Self::at(dir, &current)?;
            if !snapshot.symlink {
                return Ok((current, snapshot));
            }
            let target = PathBuf::from(readlinkat(dir, &*current)?);
            current = Cow::Owned(match current.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            });
        }
        Err(Errno::ELOOP)
    }

    /// A regular file reachable through more than one name.
    pub fn is_shared_regular(&self) -> bool {
        self.regular && self.nlink > 1
    }
}

/// Full breakdown of a trigger evaluation, for diagnostics.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub wants_write: bool,
    pub normalized: PathBuf,
    pub in_policy: bool,
    /// Name a trailing symlink resolves to, when it differs from the input.
    pub target: Option<PathBuf>,
    pub status: Option<FileSnapshot>,
}

impl TriggerReport {
    pub fn fires(&self) -> bool {
        self.wants_write
            && self.in_policy
            && self.status.is_some_and(|s| s.is_shared_regular())
    }
}

/// Directory used to absolutize relative paths for an at-relative call.
///
/// `None` means "use the working directory", either because `dir` is
/// `AT_FDCWD` or because the descriptor's path cannot be recovered.
pub fn dir_base(dir: BorrowedFd<'_>) -> Option<PathBuf> {
    let raw = dir.as_raw_fd();
    if raw == libc::AT_FDCWD {
        return None;
    }
    std::fs::read_link(format!("/proc/self/fd/{raw}")).ok()
}

/// Absolute spelling of `path` for policy comparison.
pub fn policy_path<'a>(dir: BorrowedFd<'_>, path: &'a Path) -> Cow<'a, Path> {
    let base = if path.is_absolute() || path.starts_with("~") {
        None
    } else {
        dir_base(dir)
    };
    match base {
        Some(base) => normalize_in(path, Some(&base)),
        None => normalize(path),
    }
}

/// Trigger predicate against the live `FLCOW_PATH`.
///
/// Returns the name to hand to [`break_link`](crate::break_link), which is
/// `path` itself unless it is a symlink.
pub fn duplication_target<'a>(
    dir: BorrowedFd<'_>,
    path: &'a Path,
    request: OpenRequest<'_>,
) -> Option<Cow<'a, Path>> {
    if !request.wants_write() || !in_policy(&policy_path(dir, path)) {
        return None;
    }
    shared_target(dir, path)
}

/// [`duplication_target`] against an explicit policy list.
pub fn duplication_target_with<'a>(
    dir: BorrowedFd<'_>,
    path: &'a Path,
    request: OpenRequest<'_>,
    policy: &PolicyList,
) -> Option<Cow<'a, Path>> {
    if !request.wants_write() || policy.is_empty() {
        return None;
    }
    if !policy.matches(&policy_path(dir, path)) {
        return None;
    }
    shared_target(dir, path)
}

fn shared_target<'a>(dir: BorrowedFd<'_>, path: &'a Path) -> Option<Cow<'a, Path>> {
    match FileSnapshot::resolve(dir, path) {
        Ok((target, snapshot)) if snapshot.is_shared_regular() => Some(target),
        _ => None,
    }
}

/// Boolean form of [`duplication_target_with`].
pub fn should_duplicate_with(
    dir: BorrowedFd<'_>,
    path: &Path,
    request: OpenRequest<'_>,
    policy: &PolicyList,
) -> bool {
    duplication_target_with(dir, path, request, policy).is_some()
}

/// Evaluate every input of the predicate, without short-circuiting.
pub fn explain(
    dir: BorrowedFd<'_>,
    path: &Path,
    request: OpenRequest<'_>,
    policy: &PolicyList,
) -> TriggerReport {
    let normalized = policy_path(dir, path).into_owned();
    let resolved = FileSnapshot::resolve(dir, path).ok();
    TriggerReport {
        wants_write: request.wants_write(),
        in_policy: policy.matches(&normalized),
        normalized,
        target: resolved
            .as_ref()
            .filter(|(target, _)| target.as_os_str() != path.as_os_str())
            .map(|(target, _)| target.to_path_buf()),
        status: resolved.map(|(_, snapshot)| snapshot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cwd;
    use std::ffi::OsStr;
    use std::fs;
    use std::os::fd::AsFd;
    use tempfile::tempdir;

    fn policy_for(dir: &Path) -> PolicyList {
        PolicyList::parse(dir.as_os_str())
    }

    #[test]
    fn test_flag_access_modes() {
        assert!(!OpenRequest::Flags(libc::O_RDONLY).wants_write());
        assert!(!OpenRequest::Flags(libc::O_RDONLY | libc::O_CREAT).wants_write());
        assert!(OpenRequest::Flags(libc::O_WRONLY).wants_write());
        assert!(OpenRequest::Flags(libc::O_RDWR | libc::O_APPEND).wants_write());
        assert!(OpenRequest::Flags(libc::O_WRONLY | libc::O_TRUNC | libc::O_CREAT).wants_write());
    }

    #[test]
    fn test_stream_modes() {
        for mode in ["w", "wb", "a", "ab", "r+", "rb+", "w+", "a+"] {
            assert!(OpenRequest::Mode(mode.as_bytes()).wants_write(), "{mode}");
        }
        for mode in ["r", "rb", "re", ""] {
            assert!(!OpenRequest::Mode(mode.as_bytes()).wants_write(), "{mode:?}");
        }
    }

    #[test]
    fn test_fires_only_for_shared_regular_in_policy() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"D1").unwrap();

        let policy = policy_for(dir.path());
        let write = OpenRequest::Flags(libc::O_WRONLY);

        // single link
        assert!(!should_duplicate_with(cwd(), &a, write, &policy));

        fs::hard_link(&a, &b).unwrap();
        assert!(should_duplicate_with(cwd(), &a, write, &policy));
        assert!(should_duplicate_with(cwd(), &b, OpenRequest::Mode(b"a"), &policy));

        // read-only never fires
        assert!(!should_duplicate_with(cwd(), &a, OpenRequest::Flags(libc::O_RDONLY), &policy));
        assert!(!should_duplicate_with(cwd(), &a, OpenRequest::Mode(b"r"), &policy));

        // outside the policy
        let other = PolicyList::parse(OsStr::new("/nonexistent-flcow-prefix"));
        assert!(!should_duplicate_with(cwd(), &a, write, &other));

        // empty policy disables everything
        assert!(!should_duplicate_with(cwd(), &a, write, &PolicyList::default()));
    }

    #[test]
    fn test_missing_file_and_directories_do_not_fire() {
        let dir = tempdir().unwrap();
        let policy = policy_for(dir.path());
        let write = OpenRequest::Flags(libc::O_WRONLY | libc::O_CREAT);

        assert!(!should_duplicate_with(cwd(), &dir.path().join("missing"), write, &policy));
        assert!(!should_duplicate_with(cwd(), dir.path(), write, &policy));
    }

    #[test]
    fn test_symlink_to_shared_file_targets_the_file() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"x").unwrap();
        fs::hard_link(&a, dir.path().join("b")).unwrap();
        let absolute = dir.path().join("abs");
        std::os::unix::fs::symlink(&a, &absolute).unwrap();
        let relative = dir.path().join("rel");
        std::os::unix::fs::symlink("a", &relative).unwrap();
        let chained = dir.path().join("chain");
        std::os::unix::fs::symlink("rel", &chained).unwrap();

        let policy = policy_for(dir.path());
        let write = OpenRequest::Flags(libc::O_RDWR);
        for link in [&absolute, &relative, &chained] {
            let target = duplication_target_with(cwd(), link, write, &policy).unwrap();
            assert_eq!(&*target, a.as_path(), "{link:?}");
        }
    }

    #[test]
    fn test_symlink_relative_to_directory_fd() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a"), b"x").unwrap();
        fs::hard_link(dir.path().join("sub/a"), dir.path().join("b")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("sub/s")).unwrap();

        let handle = fs::File::open(dir.path()).unwrap();
        let (target, snapshot) = FileSnapshot::resolve(handle.as_fd(), Path::new("sub/s")).unwrap();
        assert_eq!(&*target, Path::new("sub/a"));
        assert!(snapshot.is_shared_regular());
    }

    #[test]
    fn test_symlink_loop_and_dangling_do_not_fire() {
        let dir = tempdir().unwrap();
        let policy = policy_for(dir.path());
        let write = OpenRequest::Flags(libc::O_WRONLY);

        let looped = dir.path().join("loop");
        std::os::unix::fs::symlink("loop", &looped).unwrap();
        assert_eq!(FileSnapshot::resolve(cwd(), &looped).unwrap_err(), Errno::ELOOP);
        assert!(!should_duplicate_with(cwd(), &looped, write, &policy));

        let dangling = dir.path().join("dangling");
        std::os::unix::fs::symlink("missing", &dangling).unwrap();
        assert!(!should_duplicate_with(cwd(), &dangling, write, &policy));
    }

    #[test]
    fn test_policy_is_matched_on_the_given_name() {
        let inside = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let a = outside.path().join("a");
        fs::write(&a, b"x").unwrap();
        fs::hard_link(&a, outside.path().join("b")).unwrap();
        let link = inside.path().join("s");
        std::os::unix::fs::symlink(&a, &link).unwrap();

        let write = OpenRequest::Flags(libc::O_WRONLY);
        assert!(should_duplicate_with(cwd(), &link, write, &policy_for(inside.path())));
        assert!(!should_duplicate_with(cwd(), &link, write, &policy_for(outside.path())));
    }

    #[test]
    fn test_relative_path_against_directory_fd() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"x").unwrap();
        fs::hard_link(dir.path().join("a"), dir.path().join("b")).unwrap();

        let handle = fs::File::open(dir.path()).unwrap();
        let real_dir = dir.path().canonicalize().unwrap();
        let rel = Path::new("a");

        assert_eq!(policy_path(handle.as_fd(), rel), real_dir.join("a"));
        assert!(should_duplicate_with(
            handle.as_fd(),
            rel,
            OpenRequest::Flags(libc::O_WRONLY),
            &policy_for(&real_dir),
        ));
    }

    #[test]
    fn test_explain_reports_every_input() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"hello").unwrap();
        fs::hard_link(&a, dir.path().join("b")).unwrap();

        let report = explain(cwd(), &a, OpenRequest::Mode(b"r"), &policy_for(dir.path()));
        assert!(!report.wants_write);
        assert!(report.in_policy);
        assert!(report.target.is_none());
        let status = report.status.unwrap();
        assert_eq!(status.nlink, 2);
        assert_eq!(status.size, 5);
        assert!(status.regular);
        assert!(!report.fires());

        let link = dir.path().join("s");
        std::os::unix::fs::symlink("a", &link).unwrap();
        let report = explain(cwd(), &link, OpenRequest::Mode(b"w"), &policy_for(dir.path()));
        assert_eq!(report.target, Some(a.clone()));
        assert!(report.fires());
    }
}
