//! Authentication-module entry points.
//!
//! These mirror the two calls a host framework makes into an auth module:
//! `authenticate` once per login attempt and `setcred` after it. Both parse
//! the module options on every call; nothing is kept between attempts.

use crate::config::ModuleConfig;
use crate::engine::{Decision, QuorumEngine};
use crate::host::{Host, Severity};
use crate::status::AuthOutcome;
use crate::verifier::CredentialVerifier;

/// Runs one attempt and returns the full decision.
pub fn authorize<S, V>(host: &mut dyn Host, args: &[S], verifier: V) -> Decision
where
    S: AsRef<str>,
    V: CredentialVerifier,
{
    let cfg = ModuleConfig::from_args(args, host);
    let engine = QuorumEngine::new(verifier, cfg.debug);
    engine.authorize(cfg.policy_file().as_ref(), host)
}

pub fn authenticate<S, V>(host: &mut dyn Host, args: &[S], verifier: V) -> AuthOutcome
where
    S: AsRef<str>,
    V: CredentialVerifier,
{
    authorize(host, args, verifier).outcome()
}

/// Credential setup is left to the application; this only acknowledges.
pub fn setcred<S: AsRef<str>>(host: &mut dyn Host, args: &[S], flags: i32) -> AuthOutcome {
    let cfg = ModuleConfig::from_args(args, host);
    if cfg.debug {
        host.log(Severity::Debug, &format!("flags: {}", flags));
    }
    AuthOutcome::Success
}
