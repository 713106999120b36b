//! Exported open-family symbols.
//!
//! Every wrapper does the same three things: maybe break a hard link, look
//! up the real implementation, call it with the caller's untouched
//! arguments. Whatever the real call returns (value and errno) is what the
//! application sees. A failed copy-on-write is logged and otherwise ignored.

use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use flcow_config::{log_layer_debug, log_layer_trace, log_layer_warn};
use flcow_engine::{break_link, dir_context, duplication_target, OpenRequest};
use libc::{c_char, c_int, c_uint, mode_t, FILE};

use crate::entry::EntryPoint;
use crate::guard::{ErrnoGuard, LayerGuard};

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
type OpenAtFn = unsafe extern "C" fn(c_int, *const c_char, c_int, ...) -> c_int;
type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
type FreopenFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut FILE) -> *mut FILE;

/// Trigger and, if it fires, duplicate. Never fails from the caller's view.
unsafe fn copy_on_write<'m>(
    entry: EntryPoint,
    dirfd: c_int,
    path: *const c_char,
    request: impl FnOnce() -> OpenRequest<'m>,
) {
    if path.is_null() {
        return;
    }
    let Some(_guard) = LayerGuard::enter() else {
        return;
    };
    let _errno = ErrnoGuard::save();
    let Some(dir) = dir_context(dirfd) else {
        return;
    };

    let path = Path::new(OsStr::from_bytes(CStr::from_ptr(path).to_bytes()));
    let request = request();
    log_layer_trace!(
        entry = entry.name(),
        family = ?entry.family(),
        large_file = entry.spec().large_file,
        path = ?path,
        request = ?request,
        "intercepted"
    );

    let Some(target) = duplication_target(dir, path, request) else {
        return;
    };

    log_layer_debug!(entry = entry.name(), path = ?path, target = ?target, "breaking hard link");
    match break_link(dir, &target) {
        Ok(outcome) => {
            log_layer_debug!(entry = entry.name(), target = ?target, ?outcome, "copy-on-write done")
        }
        Err(e) => log_layer_warn!(
            entry = entry.name(),
            target = ?target,
            step = e.step(),
            error = %e,
            "copy-on-write failed, opening shared file"
        ),
    }
}

pub(crate) unsafe fn dispatch_open(
    entry: EntryPoint,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    copy_on_write(entry, libc::AT_FDCWD, path, || OpenRequest::Flags(flags));
    let real: OpenFn = entry.real();
    real(path, flags, mode as c_uint)
}

pub(crate) unsafe fn dispatch_openat(
    entry: EntryPoint,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    copy_on_write(entry, dirfd, path, || OpenRequest::Flags(flags));
    let real: OpenAtFn = entry.real();
    real(dirfd, path, flags, mode as c_uint)
}

pub(crate) unsafe fn dispatch_fopen(
    entry: EntryPoint,
    path: *const c_char,
    mode: *const c_char,
) -> *mut FILE {
    if !mode.is_null() {
        copy_on_write(entry, libc::AT_FDCWD, path, || {
            OpenRequest::from_mode_cstr(CStr::from_ptr(mode))
        });
    }
    let real: FopenFn = entry.real();
    real(path, mode)
}

pub(crate) unsafe fn dispatch_freopen(
    entry: EntryPoint,
    path: *const c_char,
    mode: *const c_char,
    stream: *mut FILE,
) -> *mut FILE {
    if !mode.is_null() {
        copy_on_write(entry, libc::AT_FDCWD, path, || {
            OpenRequest::from_mode_cstr(CStr::from_ptr(mode))
        });
    }
    let real: FreopenFn = entry.real();
    real(path, mode, stream)
}

// The C prototypes of open/openat are variadic. Defining a variadic function
// is not possible in stable Rust, so the optional mode is taken as a fixed
// trailing argument: on the Linux x86_64/aarch64 ABIs it arrives in the same
// register either way, and it is only meaningful with O_CREAT/O_TMPFILE.

macro_rules! interpose_open {
    ($($sym:ident => $entry:ident),* $(,)?) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $sym(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
            dispatch_open(EntryPoint::$entry, path, flags, mode)
        }
    )*};
}

macro_rules! interpose_openat {
    ($($sym:ident => $entry:ident),* $(,)?) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $sym(
            dirfd: c_int,
            path: *const c_char,
            flags: c_int,
            mode: mode_t,
        ) -> c_int {
            dispatch_openat(EntryPoint::$entry, dirfd, path, flags, mode)
        }
    )*};
}

macro_rules! interpose_fopen {
    ($($sym:ident => $entry:ident),* $(,)?) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $sym(path: *const c_char, mode: *const c_char) -> *mut FILE {
            dispatch_fopen(EntryPoint::$entry, path, mode)
        }
    )*};
}

macro_rules! interpose_freopen {
    ($($sym:ident => $entry:ident),* $(,)?) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $sym(
            path: *const c_char,
            mode: *const c_char,
            stream: *mut FILE,
        ) -> *mut FILE {
            dispatch_freopen(EntryPoint::$entry, path, mode, stream)
        }
    )*};
}

interpose_open!(open => Open, open64 => Open64);
interpose_openat!(openat => OpenAt, openat64 => OpenAt64);
interpose_fopen!(fopen => Fopen, fopen64 => Fopen64);
interpose_freopen!(freopen => Freopen, freopen64 => Freopen64);
