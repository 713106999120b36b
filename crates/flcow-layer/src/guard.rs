use std::cell::Cell;

thread_local! {
    static IN_LAYER: Cell<bool> = const { Cell::new(false) };
}

/// Per-thread reentrancy guard.
///
/// While held, intercepted calls made by the layer itself (the engine's own
/// `openat`, a log write) skip straight to the real implementation.
pub(crate) struct LayerGuard(());

impl LayerGuard {
    pub(crate) fn enter() -> Option<Self> {
        IN_LAYER
            .try_with(|flag| {
                if flag.replace(true) {
                    None
                } else {
                    Some(LayerGuard(()))
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        let _ = IN_LAYER.try_with(|flag| flag.set(false));
    }
}

/// Restores the caller's `errno` when dropped, so nothing the layer does
/// before delegating can leak into what the application observes.
pub(crate) struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    pub(crate) fn save() -> Self {
        Self(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe { *libc::__errno_location() = self.0 };
    }
}
