//! Linux-PAM status codes and the outcome surface returned to the host.
//!
//! The numeric values are a fixed external contract: the credential helper
//! reports through its exit status using these codes, and hosts expect the
//! same values back from the module entry points.

use serde::{Deserialize, Serialize};

/// Linux-PAM return codes (`security/_pam_types.h`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PamCode {
    Success = 0,
    OpenErr = 1,
    SymbolErr = 2,
    ServiceErr = 3,
    SystemErr = 4,
    BufErr = 5,
    PermDenied = 6,
    AuthErr = 7,
    CredInsufficient = 8,
    AuthinfoUnavail = 9,
    UserUnknown = 10,
    Maxtries = 11,
    NewAuthtokReqd = 12,
    AcctExpired = 13,
    SessionErr = 14,
    CredUnavail = 15,
    CredExpired = 16,
    CredErr = 17,
    NoModuleData = 18,
    ConvErr = 19,
    AuthtokErr = 20,
    AuthtokRecoveryErr = 21,
    AuthtokLockBusy = 22,
    AuthtokDisableAging = 23,
    TryAgain = 24,
    Ignore = 25,
    Abort = 26,
    AuthtokExpired = 27,
    ModuleUnknown = 28,
    BadItem = 29,
    ConvAgain = 30,
    Incomplete = 31,
}

impl PamCode {
    const ALL: [PamCode; 32] = [
        PamCode::Success,
        PamCode::OpenErr,
        PamCode::SymbolErr,
        PamCode::ServiceErr,
        PamCode::SystemErr,
        PamCode::BufErr,
        PamCode::PermDenied,
        PamCode::AuthErr,
        PamCode::CredInsufficient,
        PamCode::AuthinfoUnavail,
        PamCode::UserUnknown,
        PamCode::Maxtries,
        PamCode::NewAuthtokReqd,
        PamCode::AcctExpired,
        PamCode::SessionErr,
        PamCode::CredUnavail,
        PamCode::CredExpired,
        PamCode::CredErr,
        PamCode::NoModuleData,
        PamCode::ConvErr,
        PamCode::AuthtokErr,
        PamCode::AuthtokRecoveryErr,
        PamCode::AuthtokLockBusy,
        PamCode::AuthtokDisableAging,
        PamCode::TryAgain,
        PamCode::Ignore,
        PamCode::Abort,
        PamCode::AuthtokExpired,
        PamCode::ModuleUnknown,
        PamCode::BadItem,
        PamCode::ConvAgain,
        PamCode::Incomplete,
    ];

    pub fn from_raw(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for PamCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, self.as_raw())
    }
}

/// How the credential helper terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelperStatus {
    /// Normal exit with the given status byte.
    Exited(i32),
    /// Killed by a signal or otherwise not a normal exit.
    Abnormal,
}

impl HelperStatus {
    /// Interprets the status as a PAM code. Abnormal termination and
    /// out-of-range exit values read as a service error.
    pub fn code(self) -> PamCode {
        match self {
            HelperStatus::Exited(raw) => PamCode::from_raw(raw).unwrap_or(PamCode::ServiceErr),
            HelperStatus::Abnormal => PamCode::ServiceErr,
        }
    }

    pub fn is_success(self) -> bool {
        self == HelperStatus::Exited(PamCode::Success.as_raw())
    }
}

impl std::fmt::Display for HelperStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelperStatus::Exited(raw) => write!(f, "rc={}", raw),
            HelperStatus::Abnormal => write!(f, "abnormal termination"),
        }
    }
}

/// Result surface handed back to the host framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOutcome {
    Success,
    AuthError,
    UserUnknown,
    Ignore,
    CredentialExpired,
    ServiceError,
    AuthInfoUnavailable,
}

impl AuthOutcome {
    pub fn pam_code(self) -> PamCode {
        match self {
            AuthOutcome::Success => PamCode::Success,
            AuthOutcome::AuthError => PamCode::AuthErr,
            AuthOutcome::UserUnknown => PamCode::UserUnknown,
            AuthOutcome::Ignore => PamCode::Ignore,
            AuthOutcome::CredentialExpired => PamCode::CredExpired,
            AuthOutcome::ServiceError => PamCode::ServiceErr,
            AuthOutcome::AuthInfoUnavailable => PamCode::AuthinfoUnavail,
        }
    }

    /// Folds an arbitrary helper status into the outcome surface. Anything
    /// without a dedicated outcome becomes a plain authentication error.
    pub fn from_helper(status: HelperStatus) -> Self {
        match status.code() {
            PamCode::Success => AuthOutcome::Success,
            PamCode::UserUnknown => AuthOutcome::UserUnknown,
            PamCode::CredExpired => AuthOutcome::CredentialExpired,
            PamCode::ServiceErr => AuthOutcome::ServiceError,
            PamCode::AuthinfoUnavail => AuthOutcome::AuthInfoUnavailable,
            _ => AuthOutcome::AuthError,
        }
    }
}
