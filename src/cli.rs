//! mpa_guard - operator tool for multi-person authorization
//!
//! Runs the quorum engine against the local terminal, shows the parsed
//! policy for an account, and lints policy files.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;

use crate::config::CliConfig;
use crate::engine::{Decision, QuorumEngine};
use crate::host::TerminalHost;
use crate::policy::{self, PolicyFile};
use crate::verifier::HelperVerifier;

#[derive(Parser, Debug)]
#[command(name = "mpa_guard", about = "Multi-person (M-of-N) account authorization")]
struct Args {
    /// JSON settings file
    #[arg(long, global = true, env = "MPA_CONFIG")]
    config: Option<PathBuf>,

    /// Policy file (ACCOUNT:REQUIRED:AUTHORIZER,...)
    #[arg(long, global = true)]
    usersfile: Option<PathBuf>,

    /// Credential helper binary
    #[arg(long, global = true)]
    helper: Option<PathBuf>,

    /// Append log lines to this file instead of stderr (required by `authenticate`)
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect authorizer approvals for an account on this terminal
    Authenticate {
        /// Account to unlock (prompted for when omitted)
        #[arg(long)]
        account: Option<String>,
        /// Print the decision as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Show the policy entry that applies to an account
    Policy {
        #[arg(long)]
        account: String,
        #[arg(long)]
        json: bool,
    },

    /// Report malformed, shadowed or unsatisfiable policy entries
    Check {
        /// Policy file to check (defaults to the configured usersfile)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Parses the command line, runs it, and returns the process exit code.
pub fn run() -> Result<i32> {
    let args = Args::parse();
    let cfg = resolve_config(&args)?;
    let audited = matches!(args.command, Command::Authenticate { .. });
    init_logging(&cfg, audited)?;

    match args.command {
        Command::Authenticate { account, json } => cmd_authenticate(&cfg, account, json),
        Command::Policy { account, json } => cmd_policy(&cfg, &account, json),
        Command::Check { file } => cmd_check(&cfg, file),
    }
}

fn resolve_config(args: &Args) -> Result<CliConfig> {
    let mut cfg = CliConfig::load_from(args.config.as_deref())?;
    if let Some(path) = &args.usersfile {
        cfg.usersfile = Some(path.clone());
    }
    if let Some(path) = &args.helper {
        cfg.helper = path.clone();
    }
    if let Some(path) = &args.audit_log {
        cfg.audit_log = Some(path.clone());
    }
    cfg.debug |= args.debug;
    Ok(cfg)
}

/// Sets up the log sink.
///
/// Authorization attempts are audited: their records go to the audit log at
/// `info` or finer regardless of `RUST_LOG`, and never to the terminal the
/// authorizers are typing into.
fn init_logging(cfg: &CliConfig, audited: bool) -> Result<()> {
    let mut builder = if audited {
        if cfg.audit_log.is_none() {
            return Err(anyhow!(
                "authenticate needs an audit log (use --audit-log or MPA_AUDIT_LOG)"
            ));
        }
        let mut builder = env_logger::Builder::new();
        builder.filter_level(if cfg.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
        builder
    } else {
        let default_filter = if cfg.debug { "debug" } else { "info" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
    };
    if let Some(path) = &cfg.audit_log {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn cmd_authenticate(cfg: &CliConfig, account: Option<String>, json: bool) -> Result<i32> {
    let module_cfg = cfg.module_config();
    let engine = QuorumEngine::new(HelperVerifier::new(&cfg.helper), module_cfg.debug);
    let mut host = TerminalHost::new(account);

    let decision = engine.authorize(module_cfg.policy_file().as_ref(), &mut host);
    let outcome = decision.outcome();

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        match &decision {
            Decision::Granted => println!("GRANTED"),
            Decision::Denied(_) => println!("DENIED"),
            Decision::Indeterminate(_) => println!("NOT AUTHORIZED ({:?})", outcome),
        }
    }
    Ok(outcome.pam_code().as_raw())
}

fn cmd_policy(cfg: &CliConfig, account: &str, json: bool) -> Result<i32> {
    let source = configured_policy(cfg)?;
    let mut host = TerminalHost::new(None);
    let Some(entry) = policy::load(&source, account, &mut host) else {
        return Err(anyhow!(
            "no usable policy entry for '{}' in {}",
            account,
            source.path().display()
        ));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(0);
    }

    println!("=== Policy ===");
    println!("Account:     {}", entry.account());
    println!("Required:    {}", entry.required());
    println!(
        "Authorizers: {}",
        entry
            .authorizers()
            .iter()
            .map(|slot| slot.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if entry.denies_all() {
        println!("Note:        quorum below 1; every attempt is denied");
    }
    Ok(0)
}

fn cmd_check(cfg: &CliConfig, file: Option<PathBuf>) -> Result<i32> {
    let source = match file {
        Some(path) => PolicyFile::new(path),
        None => configured_policy(cfg)?,
    };
    let findings = policy::lint(source.open()?)?;

    println!("=== Policy Check: {} ===", source.path().display());
    for finding in &findings {
        println!("{}", finding);
    }
    println!("Findings: {}", findings.len());
    Ok(if findings.is_empty() { 0 } else { 1 })
}

fn configured_policy(cfg: &CliConfig) -> Result<PolicyFile> {
    cfg.usersfile
        .as_ref()
        .map(PolicyFile::new)
        .ok_or_else(|| anyhow!("no usersfile configured (use --usersfile or MPA_USERSFILE)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let args = Args::try_parse_from([
            "mpa_guard",
            "authenticate",
            "--account",
            "alice",
            "--usersfile",
            "/etc/security/mpa_users",
            "--debug",
        ])
        .unwrap();
        assert!(args.debug);
        assert_eq!(args.usersfile, Some(PathBuf::from("/etc/security/mpa_users")));
        assert!(matches!(
            args.command,
            Command::Authenticate { account: Some(ref a), json: false } if a == "alice"
        ));
    }
}
