//! `flcow check` and `flcow break`.

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use console::style;
use flcow_config::{log_cli_info, Config};
use flcow_engine::{break_link_cwd, cwd, explain, BreakOutcome, FileSnapshot, OpenRequest, TriggerReport};

/// How the simulated open asks for the file.
pub enum AccessArg {
    Mode(String),
    Flags(i32),
}

impl AccessArg {
    fn request(&self) -> OpenRequest<'_> {
        match self {
            AccessArg::Mode(m) => OpenRequest::Mode(m.as_bytes()),
            AccessArg::Flags(f) => OpenRequest::Flags(*f),
        }
    }
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").red()
    }
}

fn print_report(path: &Path, report: &TriggerReport) {
    println!("{:<10} {}", "path:", path.display());
    println!("{:<10} {}", "absolute:", report.normalized.display());
    println!("{:<10} {}", "write:", yes_no(report.wants_write));
    println!("{:<10} {}", "policy:", yes_no(report.in_policy));
    if let Some(target) = &report.target {
        println!("{:<10} {}", "target:", target.display());
    }
    match report.status {
        Some(s) if s.regular => {
            println!("{:<10} regular, {} link(s), {} bytes", "file:", s.nlink, s.size)
        }
        Some(s) => println!("{:<10} not a regular file, {} link(s)", "file:", s.nlink),
        None => println!("{:<10} {}", "file:", style("missing").dim()),
    }
    let verdict = if report.fires() {
        style("copy-on-write").green().bold()
    } else {
        style("pass-through").dim()
    };
    println!("{:<10} {}", "verdict:", verdict);
}

/// Evaluate the trigger for `path` against the effective policy.
pub fn cmd_check(config: &Config, path: &Path, access: &AccessArg) -> Result<()> {
    let policy = config.policy_list();
    if policy.is_empty() {
        eprintln!(
            "{} no policy prefixes configured (set FLCOW_PATH or policy.paths)",
            style("note:").yellow()
        );
    }
    let report = explain(cwd(), path, access.request(), &policy);
    print_report(path, &report);
    Ok(())
}

/// Give `path` (or the file a symlink at `path` points to) its own inode
/// now, regardless of policy.
pub fn cmd_break(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_err() {
        bail!("{} does not exist", path.display());
    }
    let (target, _) = FileSnapshot::resolve(cwd(), path)
        .map_err(|e| anyhow!("cannot resolve {}: {}", path.display(), e))?;
    let path: &Path = &target;
    match break_link_cwd(path) {
        Ok(BreakOutcome::Broken) => {
            log_cli_info!(path = ?path, "hard link broken");
            println!("{} {}", style("broken:").green().bold(), path.display());
            Ok(())
        }
        Ok(BreakOutcome::AlreadyExclusive) => {
            println!("{} {}", style("exclusive:").dim(), path.display());
            Ok(())
        }
        Err(e) => {
            let step = e.step();
            Err(anyhow!(e).context(format!(
                "copy-on-write of {} failed at step '{}'",
                path.display(),
                step
            )))
        }
    }
}
