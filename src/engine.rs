//! Quorum authorization engine.
//!
//! One call to [`QuorumEngine::authorize`] is one login attempt:
//!
//! ```text
//! Init -> LoadingPolicy -> {NotListed (Ignore), DeniesAll (Denied)}
//!      -> Round(1..=required) -> Decide
//! ```
//!
//! The engine runs exactly `required` rounds. A failed round is not retried
//! and does not extend the attempt.
//!
//! Log lines never contain secrets. A username is only logged after the
//! helper has authenticated it, since an unverified "username" may be a
//! password typed into the wrong prompt.

use anyhow::Result;
use serde::Serialize;

use crate::host::{Host, PromptStyle, Severity};
use crate::policy::{parse_policy, AuthorizationPolicy, PolicyFile};
use crate::secret::Secret;
use crate::status::{AuthOutcome, HelperStatus};
use crate::verifier::{CredentialVerifier, ExpiryResult, VerifyResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Decision {
    Granted,
    Denied(DenyReason),
    Indeterminate(Indeterminate),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DenyReason {
    /// The policy sets a quorum below one.
    PolicyDeniesAll { required: i64 },
    /// The conversation ended before the round's answers were supplied.
    InputAborted { round: i64 },
    /// An authorizer must change their own credential before approving.
    CredentialExpired { round: i64 },
    ExpiryCheckFailed { round: i64, status: HelperStatus },
    InsufficientQuorum { required: i64, approvals: i64 },
}

/// Attempts that end without a verdict on the merits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Indeterminate {
    PolicyNotConfigured,
    PolicySourceUnavailable,
    UnknownAccount,
    /// The account has no policy entry; other mechanisms decide.
    NotListed,
    VerifierUnavailable,
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted)
    }

    pub fn outcome(&self) -> AuthOutcome {
        match self {
            Decision::Granted => AuthOutcome::Success,
            Decision::Denied(reason) => match reason {
                DenyReason::CredentialExpired { .. } => AuthOutcome::CredentialExpired,
                DenyReason::ExpiryCheckFailed { status, .. } => {
                    match AuthOutcome::from_helper(*status) {
                        AuthOutcome::Success | AuthOutcome::Ignore => AuthOutcome::AuthError,
                        other => other,
                    }
                }
                DenyReason::PolicyDeniesAll { .. }
                | DenyReason::InputAborted { .. }
                | DenyReason::InsufficientQuorum { .. } => AuthOutcome::AuthError,
            },
            Decision::Indeterminate(reason) => match reason {
                Indeterminate::PolicyNotConfigured | Indeterminate::PolicySourceUnavailable => {
                    AuthOutcome::AuthInfoUnavailable
                }
                Indeterminate::UnknownAccount => AuthOutcome::UserUnknown,
                Indeterminate::NotListed => AuthOutcome::Ignore,
                Indeterminate::VerifierUnavailable => AuthOutcome::ServiceError,
            },
        }
    }
}

/// Answers collected for one quorum slot.
///
/// The secret lives only until [`AttemptRound::verify`] returns; it is wiped
/// whether the helper accepted it, rejected it, or could not be run.
pub struct AttemptRound {
    index: i64,
    authorizer: String,
    secret: Secret,
}

impl AttemptRound {
    pub fn new(index: i64, authorizer: String, secret: Secret) -> Self {
        Self {
            index,
            authorizer,
            secret,
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn authorizer(&self) -> &str {
        &self.authorizer
    }

    pub fn verify<V>(&mut self, verifier: &V) -> Result<VerifyResult>
    where
        V: CredentialVerifier + ?Sized,
    {
        let result = verifier.verify(&self.authorizer, &self.secret);
        self.secret.scrub();
        result
    }

    pub fn secret_is_scrubbed(&self) -> bool {
        self.secret.is_scrubbed()
    }
}

enum RoundOutcome {
    Approved,
    NotCounted,
    Terminal(Decision),
}

pub struct QuorumEngine<V> {
    verifier: V,
    debug: bool,
}

impl<V: CredentialVerifier> QuorumEngine<V> {
    pub fn new(verifier: V, debug: bool) -> Self {
        Self { verifier, debug }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Runs one authorization attempt. Every path that is not an explicit
    /// grant returns a non-success decision.
    pub fn authorize(&self, source: Option<&PolicyFile>, host: &mut dyn Host) -> Decision {
        let Some(source) = source else {
            host.log(Severity::Error, "no usersfile configured");
            return Decision::Indeterminate(Indeterminate::PolicyNotConfigured);
        };

        let account = match host.account() {
            Ok(account) => account,
            Err(err) => {
                host.log(Severity::Error, &format!("failed to get username: {:#}", err));
                return Decision::Indeterminate(Indeterminate::UnknownAccount);
            }
        };

        let mut policy = match self.load_policy(source, &account, host) {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                self.debug(
                    host,
                    &format!("account not present in {}; ignoring", source.path().display()),
                );
                return Decision::Indeterminate(Indeterminate::NotListed);
            }
            Err(err) => {
                host.log(Severity::Error, &format!("{:#}", err));
                return Decision::Indeterminate(Indeterminate::PolicySourceUnavailable);
            }
        };

        // The account is listed in the policy file, so it cannot be a
        // mistyped password and is safe to log from here on.
        if self.debug {
            self.dump_policy(&policy, host);
        }

        let required = policy.required();
        if policy.denies_all() {
            host.log(
                Severity::Warning,
                &format!(
                    "rejecting authentication of account '{}'; required {} < 1",
                    account, required
                ),
            );
            return Decision::Denied(DenyReason::PolicyDeniesAll { required });
        }

        let mut approvals = 0i64;
        for round in 1..=required {
            match self.run_round(round, &mut policy, host) {
                RoundOutcome::Approved => approvals += 1,
                RoundOutcome::NotCounted => {}
                RoundOutcome::Terminal(decision) => return decision,
            }
        }

        if approvals < required {
            host.log(
                Severity::Warning,
                &format!(
                    "insufficient authorizers for account '{}'; required {}, got {}",
                    account, required, approvals
                ),
            );
            return Decision::Denied(DenyReason::InsufficientQuorum {
                required,
                approvals,
            });
        }

        host.log(
            Severity::Notice,
            &format!(
                "access to account '{}' authorized by {} users",
                account, approvals
            ),
        );
        Decision::Granted
    }

    fn load_policy(
        &self,
        source: &PolicyFile,
        account: &str,
        host: &mut dyn Host,
    ) -> Result<Option<AuthorizationPolicy>> {
        let reader = source.open()?;
        parse_policy(reader, account, host)
    }

    fn run_round(
        &self,
        round: i64,
        policy: &mut AuthorizationPolicy,
        host: &mut dyn Host,
    ) -> RoundOutcome {
        let account = policy.account().to_string();
        let required = policy.required();

        let prompt = format!("authorizer [{} of {}]: ", round, required);
        let Some(authorizer) = host.prompt(PromptStyle::EchoOn, &prompt) else {
            self.debug(
                host,
                &format!("no authorizer {} username provided; aborting", round),
            );
            return RoundOutcome::Terminal(Decision::Denied(DenyReason::InputAborted { round }));
        };

        let prompt = format!("  password [{} of {}]: ", round, required);
        let Some(secret) = host.prompt(PromptStyle::EchoOff, &prompt) else {
            self.debug(
                host,
                &format!("no authorizer {} password provided; aborting", round),
            );
            return RoundOutcome::Terminal(Decision::Denied(DenyReason::InputAborted { round }));
        };

        let mut attempt = AttemptRound::new(round, authorizer, Secret::from(secret));
        match attempt.verify(&self.verifier) {
            Ok(VerifyResult::Authenticated) => {}
            Ok(VerifyResult::Rejected(status)) => {
                // The name may have been a password; it stays out of the log.
                host.log(
                    Severity::Warning,
                    &format!(
                        "authentication of authorizer {} for account '{}' failed; {}",
                        attempt.index(),
                        account,
                        status
                    ),
                );
                return RoundOutcome::NotCounted;
            }
            Err(err) => {
                host.log(
                    Severity::Error,
                    &format!(
                        "credential helper unavailable for account '{}': {:#}",
                        account, err
                    ),
                );
                return RoundOutcome::Terminal(Decision::Indeterminate(
                    Indeterminate::VerifierUnavailable,
                ));
            }
        }

        let authorizer = attempt.authorizer();
        match self.verifier.check_expiry(authorizer) {
            Ok(ExpiryResult::Ok) => {}
            // Too-recent changes only matter to password changes, not to approval.
            Ok(ExpiryResult::ChangedTooRecently) => {}
            Ok(ExpiryResult::MustChangeNow) => {
                // Changing it here would act on the target account's session,
                // not the authorizer's, so the attempt ends instead.
                host.log(
                    Severity::Warning,
                    &format!(
                        "authorizer '{}' needs to change their password; rejecting",
                        authorizer
                    ),
                );
                return RoundOutcome::Terminal(Decision::Denied(DenyReason::CredentialExpired {
                    round,
                }));
            }
            Ok(ExpiryResult::Failed(status)) => {
                host.log(
                    Severity::Warning,
                    &format!(
                        "authorizer '{}' for account '{}' failed expiry check; {}",
                        authorizer, account, status
                    ),
                );
                return RoundOutcome::Terminal(Decision::Denied(DenyReason::ExpiryCheckFailed {
                    round,
                    status,
                }));
            }
            Err(err) => {
                host.log(
                    Severity::Error,
                    &format!(
                        "credential helper unavailable for account '{}': {:#}",
                        account, err
                    ),
                );
                return RoundOutcome::Terminal(Decision::Indeterminate(
                    Indeterminate::VerifierUnavailable,
                ));
            }
        }

        if policy.consume(authorizer) {
            host.log(
                Severity::Notice,
                &format!(
                    "authorizer '{}' ({} of {}), accepted for account '{}'",
                    authorizer, round, required, account
                ),
            );
            RoundOutcome::Approved
        } else {
            host.log(
                Severity::Warning,
                &format!(
                    "authenticated user '{}' is not a valid authorizer for account '{}'",
                    authorizer, account
                ),
            );
            RoundOutcome::NotCounted
        }
    }

    fn dump_policy(&self, policy: &AuthorizationPolicy, host: &mut dyn Host) {
        host.log(
            Severity::Debug,
            &format!(
                "authorizing account '{}'; requires {} authorizers",
                policy.account(),
                policy.required()
            ),
        );
        for (idx, slot) in policy.authorizers().iter().enumerate() {
            host.log(
                Severity::Debug,
                &format!("authorizer[{}]: '{}'", idx, slot.name()),
            );
        }
    }

    fn debug(&self, host: &mut dyn Host, message: &str) {
        if self.debug {
            host.log(Severity::Debug, message);
        }
    }
}
