//! Path normalization for policy comparison.
//!
//! The layer never rewrites the path it hands to the real `open`. These
//! helpers only build an absolute spelling of it so that `FLCOW_PATH`
//! prefixes can be compared against relative and `~/` paths.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::HOME_ENV;

/// Size of the historical fixed path buffer, terminator included.
pub const MAX_POLICY_PATH: usize = 1024;

/// Normalize `path` using `$HOME` and the current working directory.
///
/// Equivalent to [`normalize_with`] fed from the live process environment.
pub fn normalize(path: &Path) -> Cow<'_, Path> {
    normalize_in(path, None)
}

/// Normalize `path`, resolving relative paths against `base` when given.
///
/// `base` is used by the at-relative entry points, where a relative path is
/// anchored at a directory descriptor rather than the working directory.
pub fn normalize_in<'a>(path: &'a Path, base: Option<&Path>) -> Cow<'a, Path> {
    let home = std::env::var_os(HOME_ENV);
    match base {
        Some(dir) => normalize_with(path, home.as_deref(), Some(dir)),
        None => {
            let cwd = std::env::current_dir().ok();
            normalize_with(path, home.as_deref(), cwd.as_deref())
        }
    }
}

/// Pure form of [`normalize`].
///
/// - absolute paths are returned as-is;
/// - `~/rest` becomes `home/rest`; without a (non-empty) home the path is
///   left untouched;
/// - anything else is joined onto `cwd`; without a cwd it is left untouched.
///
/// When the result would not fit in [`MAX_POLICY_PATH`] bytes (terminator
/// included) the original path is returned unchanged.
pub fn normalize_with<'a>(
    path: &'a Path,
    home: Option<&OsStr>,
    cwd: Option<&Path>,
) -> Cow<'a, Path> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.first() == Some(&b'/') || bytes.len() >= MAX_POLICY_PATH - 1 {
        return Cow::Borrowed(path);
    }

    let (base, rest) = match bytes.strip_prefix(b"~/") {
        Some(rest) => match home.filter(|h| !h.is_empty()) {
            Some(home) => (home.as_bytes(), rest),
            None => return Cow::Borrowed(path),
        },
        None => match cwd {
            Some(cwd) => (cwd.as_os_str().as_bytes(), bytes),
            None => return Cow::Borrowed(path),
        },
    };

    match join_bounded(base, rest) {
        Some(joined) => Cow::Owned(PathBuf::from(OsString::from_vec(joined))),
        None => Cow::Borrowed(path),
    }
}

fn join_bounded(base: &[u8], rest: &[u8]) -> Option<Vec<u8>> {
    // base + '/' + rest + NUL must fit
    if base.len() + rest.len() + 2 >= MAX_POLICY_PATH {
        return None;
    }
    let mut out = Vec::with_capacity(base.len() + rest.len() + 1);
    out.extend_from_slice(base);
    if !base.is_empty() && !base.ends_with(b"/") {
        out.push(b'/');
    }
    out.extend_from_slice(rest);
    Some(out)
}
