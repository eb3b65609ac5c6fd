//! Configuration.
//!
//! Two sources: the option strings a host framework hands the module on each
//! call (`ModuleConfig`), and the settings of the `mpa_guard` operator tool
//! (`CliConfig`), read from an optional JSON file plus `MPA_*` environment
//! overrides.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::host::{Host, Severity};
use crate::policy::PolicyFile;
use crate::verifier::DEFAULT_HELPER;

const DEBUG_OPTION: &str = "debug";
const USERSFILE_OPTION: &str = "usersfile=";

/// Options passed to the module by the host framework.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    pub debug: bool,
    pub usersfile: Option<PathBuf>,
}

impl ModuleConfig {
    /// Parses module arguments. Unknown arguments are logged and ignored.
    ///
    /// `debug` is matched as a prefix, the way the module has always read it.
    pub fn from_args<S: AsRef<str>>(args: &[S], host: &mut dyn Host) -> Self {
        let mut cfg = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if arg.starts_with(DEBUG_OPTION) {
                cfg.debug = true;
            } else if let Some(path) = arg.strip_prefix(USERSFILE_OPTION) {
                cfg.usersfile = Some(PathBuf::from(path));
            } else {
                host.log(
                    Severity::Error,
                    &format!("unknown config argument: {}", arg),
                );
            }
        }
        cfg
    }

    pub fn policy_file(&self) -> Option<PolicyFile> {
        self.usersfile.as_ref().map(PolicyFile::new)
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CliConfigFile {
    usersfile: Option<PathBuf>,
    helper: Option<PathBuf>,
    debug: Option<bool>,
    audit_log: Option<PathBuf>,
}

/// Settings for the `mpa_guard` operator tool.
///
/// Resolution order: JSON file named by `MPA_CONFIG`, then environment
/// overrides, then validation. Command-line flags are applied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub usersfile: Option<PathBuf>,
    pub helper: PathBuf,
    pub debug: bool,
    pub audit_log: Option<PathBuf>,
}

impl CliConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MPA_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as [`CliConfig::load`] with an explicit config file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CliConfigFile) -> Self {
        Self {
            usersfile: file.usersfile,
            helper: file.helper.unwrap_or_else(|| PathBuf::from(DEFAULT_HELPER)),
            debug: file.debug.unwrap_or(false),
            audit_log: file.audit_log,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("MPA_USERSFILE") {
            if !path.trim().is_empty() {
                self.usersfile = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("MPA_HELPER") {
            if !path.trim().is_empty() {
                self.helper = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("MPA_AUDIT_LOG") {
            if !path.trim().is_empty() {
                self.audit_log = Some(PathBuf::from(path));
            }
        }
        if let Ok(debug) = std::env::var("MPA_DEBUG") {
            self.debug = parse_bool(&debug)
                .ok_or_else(|| anyhow!("MPA_DEBUG must be one of 1, 0, true, false"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.helper.is_absolute() {
            return Err(anyhow!(
                "credential helper path must be absolute: {}",
                self.helper.display()
            ));
        }
        Ok(())
    }

    /// Module-style view of these settings.
    pub fn module_config(&self) -> ModuleConfig {
        ModuleConfig {
            debug: self.debug,
            usersfile: self.usersfile.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<CliConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
