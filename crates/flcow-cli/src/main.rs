//! # flcow CLI
//!
//! Launches programs under the copy-on-write layer and inspects what the
//! layer would do for a given path.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flcow_config::{init_logging, log_cli_debug, Config, CONFIG_ENV};

mod check;
mod run;
mod selftest;

use check::AccessArg;
use run::RunArgs;

/// fl-cow: copy-on-write for hard-linked files, via LD_PRELOAD
#[derive(Parser)]
#[command(name = "flcow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with the layer preloaded
    Run {
        /// Extra policy prefix (repeatable)
        #[arg(short = 'p', long = "prefix", value_name = "PREFIX")]
        prefixes: Vec<PathBuf>,

        /// Layer library to preload
        #[arg(long, value_name = "PATH")]
        library: Option<PathBuf>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<OsString>,
    },

    /// Show whether opening PATH would trigger copy-on-write
    Check {
        path: PathBuf,

        /// stdio mode string, e.g. "r+" or "a"
        #[arg(long, conflicts_with = "flags")]
        mode: Option<String>,

        /// open(2) flags, decimal or 0x/0 prefixed
        #[arg(long, value_parser = parse_flags)]
        flags: Option<i32>,
    },

    /// Break the hard link of PATH now, ignoring policy
    Break { path: PathBuf },

    /// Hard-link scratch files and check a rewrite separates them
    Selftest {
        /// Directory for the scratch files (default: current directory)
        dir: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn parse_flags(raw: &str) -> Result<i32, String> {
    let parsed = if let Some(hex) = raw.strip_prefix("0x") {
        i32::from_str_radix(hex, 16)
    } else if raw.len() > 1 && raw.starts_with('0') {
        i32::from_str_radix(&raw[1..], 8)
    } else {
        raw.parse()
    };
    parsed.map_err(|e| format!("invalid flags '{raw}': {e}"))
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(config.log.level);
    log_cli_debug!(prefixes = config.policy.paths.len(), "configuration loaded");

    match cli.command {
        Commands::Run {
            prefixes,
            library,
            command,
        } => {
            let code = run::cmd_run(
                &config,
                RunArgs {
                    prefixes,
                    library,
                    command,
                },
            )?;
            std::process::exit(code);
        }
        Commands::Check { path, mode, flags } => {
            let access = match (mode, flags) {
                (_, Some(f)) => AccessArg::Flags(f),
                (Some(m), None) => AccessArg::Mode(m),
                (None, None) => AccessArg::Flags(libc::O_WRONLY),
            };
            check::cmd_check(&config, &path, &access)
        }
        Commands::Break { path } => check::cmd_break(&path),
        Commands::Selftest { dir } => {
            let code = selftest::cmd_selftest(dir.as_deref())?;
            std::process::exit(code);
        }
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                print!("{}", config.to_toml());
                Ok(())
            }
            ConfigCommand::Path => {
                let show = |label: &str, path: Option<PathBuf>| match path {
                    Some(p) => {
                        let state = if p.exists() { "" } else { " (not found)" };
                        println!("{:<8} {}{}", label, p.display(), state);
                    }
                    None => println!("{:<8} -", label),
                };
                show("global:", Config::global_config_path());
                show("project:", Some(Config::project_config_path()));
                show("env:", std::env::var_os(CONFIG_ENV).map(PathBuf::from));
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert_eq!(parse_flags("1"), Ok(1));
        assert_eq!(parse_flags("0"), Ok(0));
        assert_eq!(parse_flags("0x41"), Ok(0x41));
        assert_eq!(parse_flags("01101"), Ok(0o1101));
        assert!(parse_flags("w").is_err());
    }

    #[test]
    fn test_run_keeps_hyphen_args() {
        let cli = Cli::try_parse_from(["flcow", "run", "-p", "/srv", "--", "ls", "-la"]).unwrap();
        match cli.command {
            Commands::Run {
                prefixes, command, ..
            } => {
                assert_eq!(prefixes, vec![PathBuf::from("/srv")]);
                assert_eq!(command, vec![OsString::from("ls"), OsString::from("-la")]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_mode_and_flags_conflict() {
        assert!(Cli::try_parse_from(["flcow", "check", "x", "--mode", "w", "--flags", "1"]).is_err());
    }
}
