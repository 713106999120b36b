//! `flcow run`: launch a command with the layer preloaded.

use std::env;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use flcow_config::{log_cli_debug, Config, PolicyList, LAYER_LIBRARY_NAME, POLICY_ENV};

pub struct RunArgs {
    pub prefixes: Vec<PathBuf>,
    pub library: Option<PathBuf>,
    pub command: Vec<OsString>,
}

/// Run the command and return the exit code to propagate.
pub fn cmd_run(config: &Config, args: RunArgs) -> Result<i32> {
    let Some((program, rest)) = args.command.split_first() else {
        bail!("No command given. Usage: flcow run [-p PREFIX]... -- COMMAND [ARGS...]");
    };

    let library = find_layer_library(args.library.as_deref(), config.layer.library.as_deref())?;
    let policy = build_policy(config, &args.prefixes)?;
    if policy.is_empty() {
        eprintln!(
            "{} no policy prefixes configured; copy-on-write stays disabled",
            console::style("warning:").yellow().bold()
        );
    }
    let preload = prepend_preload(&library, env::var_os("LD_PRELOAD").as_deref());

    log_cli_debug!(
        library = %library.display(),
        policy = ?policy.to_env_value(),
        program = ?program,
        "launching"
    );

    let status = Command::new(program)
        .args(rest)
        .env(POLICY_ENV, policy.to_env_value())
        .env("LD_PRELOAD", preload)
        .status()
        .with_context(|| format!("Failed to execute {}", Path::new(program).display()))?;

    Ok(status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
}

/// Config prefixes (which already include an inherited `FLCOW_PATH`) plus
/// `-p` flags; relative flags are made absolute against the cwd.
pub fn build_policy(config: &Config, extra: &[PathBuf]) -> Result<PolicyList> {
    let mut policy = config.policy_list();
    if !extra.is_empty() {
        let cwd = env::current_dir().context("Failed to get current directory")?;
        for p in extra {
            policy.push(if p.is_absolute() { p.clone() } else { cwd.join(p) });
        }
    }
    Ok(policy)
}

fn prepend_preload(library: &Path, existing: Option<&OsStr>) -> OsString {
    let mut value = library.as_os_str().to_os_string();
    if let Some(existing) = existing.filter(|e| !e.is_empty()) {
        // ld.so accepts both separators; keep the user's entries after ours
        let already = existing
            .as_bytes()
            .split(|b| *b == b':' || *b == b' ')
            .any(|entry| entry == library.as_os_str().as_bytes());
        if already {
            return existing.to_os_string();
        }
        value.push(":");
        value.push(existing);
    }
    value
}

/// Locate `libflcow_layer.so`.
///
/// Order: `--library`, config/`FLCOW_LAYER`, next to the executable,
/// `../lib` relative to it, then the cargo target directories.
pub fn find_layer_library(flag: Option<&Path>, configured: Option<&Path>) -> Result<PathBuf> {
    for explicit in [flag, configured].into_iter().flatten() {
        if explicit.is_file() {
            return explicit
                .canonicalize()
                .with_context(|| format!("resolve {}", explicit.display()));
        }
        bail!("Layer library not found at {}", explicit.display());
    }

    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let sibling = exe_dir.join(LAYER_LIBRARY_NAME);
            if sibling.is_file() {
                return Ok(sibling);
            }

            let lib_path = exe_dir.parent().map(|p| p.join("lib").join(LAYER_LIBRARY_NAME));
            if let Some(lib_path) = lib_path {
                if lib_path.is_file() {
                    return Ok(lib_path);
                }
            }
        }
    }

    for candidate in ["target/debug", "target/release"] {
        let path = Path::new(candidate).join(LAYER_LIBRARY_NAME);
        if path.is_file() {
            return path.canonicalize().context("resolve target path");
        }
    }

    bail!(
        "Could not find {}. Please run 'cargo build -p flcow-layer' first.",
        LAYER_LIBRARY_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prepend_preload() {
        let lib = Path::new("/opt/libflcow_layer.so");
        assert_eq!(prepend_preload(lib, None), OsString::from("/opt/libflcow_layer.so"));
        assert_eq!(prepend_preload(lib, Some(OsStr::new(""))), OsString::from("/opt/libflcow_layer.so"));
        assert_eq!(
            prepend_preload(lib, Some(OsStr::new("/usr/lib/libother.so"))),
            OsString::from("/opt/libflcow_layer.so:/usr/lib/libother.so")
        );
        assert_eq!(
            prepend_preload(lib, Some(OsStr::new("libx.so /opt/libflcow_layer.so"))),
            OsString::from("libx.so /opt/libflcow_layer.so")
        );
    }

    #[test]
    fn test_build_policy_makes_flags_absolute() {
        let mut config = Config::default();
        config.policy.paths.push(PathBuf::from("/srv/a"));
        let policy = build_policy(&config, &[PathBuf::from("rel"), PathBuf::from("/srv/b")]).unwrap();

        let prefixes = policy.prefixes();
        assert_eq!(prefixes[0], PathBuf::from("/srv/a"));
        assert!(prefixes[1].is_absolute());
        assert!(prefixes[1].ends_with("rel"));
        assert_eq!(prefixes[2], PathBuf::from("/srv/b"));
    }

    #[test]
    fn test_explicit_library_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.so");
        assert!(find_layer_library(Some(&missing), None).is_err());

        let present = dir.path().join(LAYER_LIBRARY_NAME);
        std::fs::write(&present, b"").unwrap();
        assert_eq!(
            find_layer_library(None, Some(&present)).unwrap(),
            present.canonicalize().unwrap()
        );
    }
}
