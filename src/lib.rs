//! Multi-person authorization (MPA)
//!
//! Access to a shared account is granted only after a configured quorum of
//! distinct, independently authenticated authorizers approve it.
//!
//! # Guarantees
//!
//! 1. **Fail closed**: a missing policy file, a malformed quorum, an aborted
//!    prompt or an unavailable credential helper never grants access.
//! 2. **Exact-once accounting**: each authenticated round consumes the
//!    matching authorizer slots and counts at most once.
//! 3. **Bounded attempts**: exactly `required` rounds, no retries.
//! 4. **Secret hygiene**: secrets are zeroed as soon as the helper returns
//!    and are never logged; unverified usernames are never logged.
//! 5. **Privilege separation**: passwords are checked by the external
//!    `unix_chkpwd` helper, fed over a per-call pipe.
//!
//! # Module Structure
//!
//! - `policy`: policy file parsing and linting
//! - `verifier`: credential helper subprocess adapter
//! - `engine`: quorum state machine and decisions
//! - `host`: host framework boundary (prompts, logging)
//! - `module`: authenticate/setcred entry points
//! - `config`: module options and operator tool settings

pub mod cli;
pub mod config;
pub mod engine;
pub mod host;
pub mod module;
pub mod policy;
pub mod secret;
pub mod status;
pub mod verifier;

pub use config::{CliConfig, ModuleConfig};
pub use engine::{AttemptRound, Decision, DenyReason, Indeterminate, QuorumEngine};
pub use host::{Host, PromptStyle, Severity, TerminalHost};
pub use policy::{AuthorizationPolicy, AuthorizerSlot, LintFinding, LintKind, PolicyFile};
pub use secret::Secret;
pub use status::{AuthOutcome, HelperStatus, PamCode};
pub use verifier::{CredentialVerifier, ExpiryResult, HelperVerifier, VerifyResult};
