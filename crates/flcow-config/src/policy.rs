//! `FLCOW_PATH` policy list.
//!
//! The list is re-read from the environment on every check so that a
//! process changing `FLCOW_PATH` at runtime sees the new value immediately.
//! An unset or empty variable disables copy-on-write for every path.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use crate::POLICY_ENV;

/// Ordered list of absolute path prefixes opted into copy-on-write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyList {
    prefixes: Vec<PathBuf>,
}

impl PolicyList {
    /// Snapshot of the current `FLCOW_PATH`.
    pub fn from_env() -> Self {
        std::env::var_os(POLICY_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    /// Split a colon-separated list. Empty segments are dropped.
    pub fn parse(raw: &OsStr) -> Self {
        let prefixes = raw
            .as_bytes()
            .split(|b| *b == b':')
            .filter(|seg| !seg.is_empty())
            .map(|seg| PathBuf::from(OsStr::from_bytes(seg)))
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Append a prefix unless it is already present.
    pub fn push(&mut self, prefix: impl Into<PathBuf>) {
        let prefix = prefix.into();
        if !prefix.as_os_str().is_empty() && !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    pub fn extend(&mut self, other: &PolicyList) {
        for p in &other.prefixes {
            self.push(p.clone());
        }
    }

    /// Raw byte-prefix test: `/home/a` also matches `/home/ab/file`.
    pub fn matches(&self, abs_path: &Path) -> bool {
        let path = abs_path.as_os_str().as_bytes();
        self.prefixes
            .iter()
            .any(|p| path.starts_with(p.as_os_str().as_bytes()))
    }

    /// Render back into the `FLCOW_PATH` wire form.
    pub fn to_env_value(&self) -> OsString {
        let joined = self
            .prefixes
            .iter()
            .map(|p| p.as_os_str().as_bytes())
            .collect::<Vec<_>>()
            .join(&b':');
        OsString::from_vec(joined)
    }
}

/// True iff `abs_path` falls under a prefix listed in `FLCOW_PATH` right now.
///
/// An unset or empty variable is checked before the path is looked at.
pub fn in_policy(abs_path: &Path) -> bool {
    match std::env::var_os(POLICY_ENV) {
        Some(raw) if !raw.is_empty() => PolicyList::parse(&raw).matches(abs_path),
        _ => false,
    }
}
