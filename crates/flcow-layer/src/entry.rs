//! Table of intercepted entry points.
//!
//! One row per exported symbol. The exported functions in `interpose` are
//! thin shims that name their row; everything else (trigger, duplication,
//! real-symbol lookup) is shared and driven by the row's family.

use crate::reals::RealSymbol;

/// How the caller expresses the access it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `open`-style integer flags
    Descriptor,
    /// stdio mode string
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum EntryPoint {
    Open = 0,
    Open64,
    OpenAt,
    OpenAt64,
    Fopen,
    Fopen64,
    Freopen,
    Freopen64,
}

pub struct EntrySpec {
    pub entry: EntryPoint,
    pub family: Family,
    /// `*64` large-file variant
    pub large_file: bool,
    pub real: RealSymbol,
}

/// Indexed by `EntryPoint as usize`.
pub static ENTRY_POINTS: [EntrySpec; 8] = [
    EntrySpec {
        entry: EntryPoint::Open,
        family: Family::Descriptor,
        large_file: false,
        real: RealSymbol::new("open\0"),
    },
    EntrySpec {
        entry: EntryPoint::Open64,
        family: Family::Descriptor,
        large_file: true,
        real: RealSymbol::new("open64\0"),
    },
    EntrySpec {
        entry: EntryPoint::OpenAt,
        family: Family::Descriptor,
        large_file: false,
        real: RealSymbol::new("openat\0"),
    },
    EntrySpec {
        entry: EntryPoint::OpenAt64,
        family: Family::Descriptor,
        large_file: true,
        real: RealSymbol::new("openat64\0"),
    },
    EntrySpec {
        entry: EntryPoint::Fopen,
        family: Family::Stream,
        large_file: false,
        real: RealSymbol::new("fopen\0"),
    },
    EntrySpec {
        entry: EntryPoint::Fopen64,
        family: Family::Stream,
        large_file: true,
        real: RealSymbol::new("fopen64\0"),
    },
    EntrySpec {
        entry: EntryPoint::Freopen,
        family: Family::Stream,
        large_file: false,
        real: RealSymbol::new("freopen\0"),
    },
    EntrySpec {
        entry: EntryPoint::Freopen64,
        family: Family::Stream,
        large_file: true,
        real: RealSymbol::new("freopen64\0"),
    },
];

impl EntryPoint {
    pub fn spec(self) -> &'static EntrySpec {
        let spec = &ENTRY_POINTS[self as usize];
        debug_assert_eq!(spec.entry, self);
        spec
    }

    pub fn name(self) -> &'static str {
        self.spec().real.name()
    }

    pub fn family(self) -> Family {
        self.spec().family
    }

    /// Real implementation cast to its C signature `F`.
    ///
    /// # Safety
    /// `F` must be the function-pointer type matching this entry point.
    pub unsafe fn real<F: Copy>(self) -> F {
        let p = self.spec().real.get();
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of_val(&p));
        std::mem::transmute_copy(&p)
    }
}
