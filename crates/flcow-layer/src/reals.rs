//! Real Symbol Storage
//!
//! Each intercepted entry point keeps the address of the implementation it
//! shadows, found with `dlsym(RTLD_NEXT)` on first use. Entries live in
//! statics for the whole process and are never reset.
//!
//! First resolution may race between threads. That is harmless: every
//! racer gets the same address from the dynamic linker, so whichever store
//! lands last writes an identical value.

use libc::{c_char, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Storage for one real libc function
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    /// NUL-terminated symbol name
    name: &'static str,
}

impl RealSymbol {
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    /// Symbol name without the trailing NUL.
    pub fn name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }

    /// Address of the next definition after this library.
    ///
    /// Terminates the process if there is none: without the real
    /// implementation the caller cannot open files at all.
    pub fn get(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char) };
        if f.is_null() {
            missing_symbol(self.name());
        }
        self.ptr.store(f, Ordering::Release);
        f
    }
}

fn missing_symbol(name: &str) -> ! {
    // raw write: stderr may not be usable through std this early
    let msg = format!("missing symbol: {name}\n");
    unsafe {
        libc::write(2, msg.as_ptr() as *const c_void, msg.len());
    }
    std::process::exit(1);
}
