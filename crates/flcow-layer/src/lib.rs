//! # flcow-layer
//!
//! LD_PRELOAD layer that gives a hard-linked file its own inode the first
//! time it is opened for writing, so the write never shows through the
//! other names.
//!
//! ## Usage
//!
//! ```bash
//! FLCOW_PATH=/srv/builds:/home/me/trees \
//! LD_PRELOAD=/path/to/libflcow_layer.so \
//! make install
//! ```
//!
//! ## Environment Variables
//!
//! - `FLCOW_PATH`: colon-separated absolute prefixes. Unset or empty
//!   disables the layer entirely.
//! - `HOME`: used to expand `~/` paths before the prefix comparison.
//! - `FLCOW_LOG`: tracing filter, only with the `diagnostics` feature.
//!
//! Intercepted: `open`, `open64`, `openat`, `openat64`, `fopen`, `fopen64`,
//! `freopen`, `freopen64`.

#![allow(clippy::missing_safety_doc)]

#[cfg(not(target_os = "linux"))]
compile_error!("flcow-layer relies on LD_PRELOAD and glibc/musl errno; Linux only");

pub mod entry;
mod guard;
pub mod interpose;
pub mod reals;

pub use entry::{EntryPoint, Family, ENTRY_POINTS};

/// Runs when the dynamic loader maps the library, before `main`.
#[link_section = ".init_array"]
#[used]
pub static FLCOW_LAYER_INIT: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        install_diagnostics();
    }
    init
};

#[cfg(feature = "diagnostics")]
fn install_diagnostics() {
    // subscriber setup must not itself trigger copy-on-write
    let _guard = guard::LayerGuard::enter();
    flcow_config::init_logging(flcow_config::LogLevel::Debug);
    flcow_config::log_layer_debug!(pid = std::process::id(), "flcow layer loaded");
}

#[cfg(not(feature = "diagnostics"))]
fn install_diagnostics() {}
