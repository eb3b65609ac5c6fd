//! Credential verification through the privileged `unix_chkpwd` helper.
//!
//! Every call spawns its own short-lived helper process:
//! - argv is exactly `[program, username, mode]`, with an empty environment
//! - a secret, when present, is the only thing written to the helper and goes
//!   over a pipe created for this call, NUL-terminated
//! - every descriptor except stdin is closed when the helper image loads, and
//!   stdin itself is closed when no secret is sent
//! - the real uid is normalized to root when running with euid 0
//!
//! The verdict is the helper's exit status. Failing to launch, feed or reap
//! the helper is an infrastructure error (`Err`), never a verdict. A username
//! that cannot be passed as an argument (embedded NUL) is answered as an
//! unknown user without starting the helper.
//!
//! There is no timeout on the helper; a hung helper blocks the caller.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use zeroize::Zeroizing;

use crate::secret::Secret;
use crate::status::{HelperStatus, PamCode};

pub const DEFAULT_HELPER: &str = "/sbin/unix_chkpwd";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelperMode {
    /// Check a password; empty passwords are refused.
    Verify,
    /// Report password-aging state.
    CheckExpiry,
}

impl HelperMode {
    pub fn as_arg(self) -> &'static str {
        match self {
            HelperMode::Verify => "nonull",
            HelperMode::CheckExpiry => "chkexpiry",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VerifyResult {
    Authenticated,
    Rejected(HelperStatus),
}

impl VerifyResult {
    fn from_status(status: HelperStatus) -> Self {
        if status.is_success() {
            VerifyResult::Authenticated
        } else {
            VerifyResult::Rejected(status)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExpiryResult {
    Ok,
    /// The password has expired and must be changed before further use.
    MustChangeNow,
    /// The password was changed too recently to change again. Not a failure.
    ChangedTooRecently,
    Failed(HelperStatus),
}

impl ExpiryResult {
    fn from_status(status: HelperStatus) -> Self {
        match status {
            HelperStatus::Exited(_) => match status.code() {
                PamCode::Success => ExpiryResult::Ok,
                PamCode::NewAuthtokReqd => ExpiryResult::MustChangeNow,
                PamCode::AuthtokErr => ExpiryResult::ChangedTooRecently,
                _ => ExpiryResult::Failed(status),
            },
            HelperStatus::Abnormal => ExpiryResult::Failed(status),
        }
    }
}

pub trait CredentialVerifier {
    fn verify(&self, username: &str, secret: &Secret) -> Result<VerifyResult>;

    fn check_expiry(&self, username: &str) -> Result<ExpiryResult>;
}

impl<T: CredentialVerifier + ?Sized> CredentialVerifier for &T {
    fn verify(&self, username: &str, secret: &Secret) -> Result<VerifyResult> {
        (**self).verify(username, secret)
    }

    fn check_expiry(&self, username: &str) -> Result<ExpiryResult> {
        (**self).check_expiry(username)
    }
}

/// Subprocess adapter for the credential helper binary.
#[derive(Clone, Debug)]
pub struct HelperVerifier {
    program: PathBuf,
}

impl Default for HelperVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_HELPER)
    }
}

impl HelperVerifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn call(
        &self,
        username: &str,
        mode: HelperMode,
        input: Option<&[u8]>,
    ) -> Result<HelperStatus> {
        if username.contains('\0') {
            return Ok(HelperStatus::Exited(PamCode::UserUnknown.as_raw()));
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(username)
            .arg(mode.as_arg())
            .env_clear()
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        sandbox::restrict(&mut cmd, input.is_some())?;

        let mut child = cmd.spawn().with_context(|| {
            format!("failed to launch credential helper {}", self.program.display())
        })?;

        let fed = match (input, child.stdin.take()) {
            (Some(bytes), Some(mut stdin)) => {
                let mut payload = Zeroizing::new(Vec::with_capacity(bytes.len() + 1));
                payload.extend_from_slice(bytes);
                payload.push(0);
                stdin
                    .write_all(&payload)
                    .context("failed to write secret to credential helper")
                // stdin drops here, closing the writer end.
            }
            (Some(_), None) => Err(anyhow!("credential helper stdin unavailable")),
            (None, _) => Ok(()),
        };

        let status = child
            .wait()
            .context("failed to wait for credential helper")?;
        fed?;
        Ok(helper_status(status))
    }
}

impl CredentialVerifier for HelperVerifier {
    fn verify(&self, username: &str, secret: &Secret) -> Result<VerifyResult> {
        let status = self.call(username, HelperMode::Verify, Some(secret.expose()))?;
        Ok(VerifyResult::from_status(status))
    }

    fn check_expiry(&self, username: &str) -> Result<ExpiryResult> {
        let status = self.call(username, HelperMode::CheckExpiry, None)?;
        Ok(ExpiryResult::from_status(status))
    }
}

fn helper_status(status: ExitStatus) -> HelperStatus {
    match status.code() {
        Some(code) => HelperStatus::Exited(code),
        None => HelperStatus::Abnormal,
    }
}

#[cfg(unix)]
mod sandbox {
    use anyhow::Result;
    use std::os::raw::{c_int, c_long, c_uint};
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[cfg(target_os = "linux")]
    const SYS_CLOSE_RANGE: c_long = 436;
    #[cfg(target_os = "linux")]
    const CLOSE_RANGE_CLOEXEC: c_uint = 1 << 2;
    const FALLBACK_OPEN_MAX: c_int = 1024;

    pub(super) fn restrict(cmd: &mut Command, keep_stdin: bool) -> Result<()> {
        let first: c_int = if keep_stdin { 1 } else { 0 };
        // SAFETY: the hook runs between fork and exec and only issues
        // async-signal-safe syscalls; it does not allocate or take locks.
        unsafe {
            cmd.pre_exec(move || {
                close_on_exec_from(first);
                if libc::geteuid() == 0 && libc::setuid(0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Ok(())
    }

    /// Marks every descriptor >= `first` close-on-exec so the helper starts
    /// with nothing but the descriptors below `first`.
    unsafe fn close_on_exec_from(first: c_int) {
        #[cfg(target_os = "linux")]
        {
            let rc = libc::syscall(
                SYS_CLOSE_RANGE,
                first as c_uint,
                c_uint::MAX,
                CLOSE_RANGE_CLOEXEC,
            );
            if rc == 0 {
                return;
            }
        }
        let max = match libc::sysconf(libc::_SC_OPEN_MAX) {
            n if n > 0 => c_int::try_from(n).unwrap_or(c_int::MAX),
            _ => FALLBACK_OPEN_MAX,
        };
        for fd in first..max {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
}

#[cfg(not(unix))]
mod sandbox {
    use anyhow::{anyhow, Result};
    use std::process::Command;

    pub(super) fn restrict(_cmd: &mut Command, _keep_stdin: bool) -> Result<()> {
        Err(anyhow!("credential helper requires a unix platform"))
    }
}
