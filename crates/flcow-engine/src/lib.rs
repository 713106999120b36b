//! # flcow-engine
//!
//! Copy-on-write for hard links: the predicate that decides whether an open
//! must first give its path a private inode, and the copy that does it.
//!
//! ```ignore
//! use flcow_engine::{break_link, cwd, duplication_target, OpenRequest};
//!
//! if let Some(target) = duplication_target(cwd(), path, OpenRequest::Flags(libc::O_WRONLY)) {
//!     break_link(cwd(), &target)?;
//! }
//! ```

use std::os::fd::BorrowedFd;

pub mod engine;
pub mod error;
pub mod trigger;

pub use engine::{break_link, break_link_cwd, temp_name, BreakOutcome, TEMP_SUFFIX};
pub use error::{EngineError, Result};
pub use trigger::{
    duplication_target, duplication_target_with, explain, policy_path, should_duplicate_with,
    FileSnapshot, OpenRequest, TriggerReport,
};

/// The working directory as a directory context (`AT_FDCWD`).
pub fn cwd() -> BorrowedFd<'static> {
    // SAFETY: AT_FDCWD is a sentinel the kernel resolves to the cwd; it is
    // never closed.
    unsafe { BorrowedFd::borrow_raw(libc::AT_FDCWD) }
}

/// Borrow a directory descriptor handed to us through a C entry point.
///
/// Returns `None` for negative values other than `AT_FDCWD`; the real call
/// will report `EBADF` for those on its own.
///
/// # Safety
/// A non-negative `fd` must stay open for the returned lifetime.
pub unsafe fn dir_context<'a>(fd: libc::c_int) -> Option<BorrowedFd<'a>> {
    if fd >= 0 || fd == libc::AT_FDCWD {
        Some(BorrowedFd::borrow_raw(fd))
    } else {
        None
    }
}
