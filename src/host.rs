//! Host adapter boundary.
//!
//! The host framework owns the login attempt: it knows which account is
//! being authenticated, it owns the conversation with the person at the
//! terminal, and it owns the log sink. The engine only talks to it through
//! [`Host`].

use anyhow::{anyhow, Result};
use std::io::Write;
use zeroize::Zeroizing;

/// Longest answer kept from one prompt; the rest of the line is discarded.
const MAX_ANSWER: usize = 512;

/// Whether typed input is echoed back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptStyle {
    EchoOn,
    EchoOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl Severity {
    pub fn level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info | Severity::Notice => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

pub trait Host {
    /// Account under authentication.
    fn account(&mut self) -> Result<String>;

    /// Asks the user for input. `None` means the conversation was aborted.
    fn prompt(&mut self, style: PromptStyle, text: &str) -> Option<String>;

    fn log(&mut self, severity: Severity, message: &str);
}

/// Forwards a host log line to the `log` facade.
pub fn forward_to_log(severity: Severity, message: &str) {
    log::log!(target: "mpa_guard", severity.level(), "{}", message);
}

/// Interactive host backed by the process terminal.
///
/// Prompts are written to stderr, answers read from stdin. Echo is disabled
/// through termios for [`PromptStyle::EchoOff`] when stdin is a terminal.
/// Answers are read straight from the descriptor, one byte at a time, so no
/// copy of a secret is left behind in a shared stdin buffer.
pub struct TerminalHost {
    account: Option<String>,
}

impl TerminalHost {
    pub fn new(account: Option<String>) -> Self {
        Self { account }
    }

    fn read_answer(&self, style: PromptStyle) -> Option<String> {
        let _echo = match style {
            PromptStyle::EchoOff => EchoGuard::disable(),
            PromptStyle::EchoOn => None,
        };
        let line = read_line_from(read_stdin);
        if style == PromptStyle::EchoOff {
            eprintln!();
        }
        line.map(into_answer)
    }
}

/// Reads one line through `read`, never asking for more than one byte, so
/// nothing past the newline is consumed. `None` on EOF before any input or
/// on a read error.
fn read_line_from<F>(mut read: F) -> Option<Zeroizing<Vec<u8>>>
where
    F: FnMut(&mut [u8]) -> std::io::Result<usize>,
{
    let mut line = Zeroizing::new(Vec::with_capacity(MAX_ANSWER));
    let mut byte = Zeroizing::new([0u8; 1]);
    loop {
        match read(&mut byte[..]) {
            Ok(0) => return if line.is_empty() { None } else { Some(line) },
            Ok(_) if byte[0] == b'\n' => return Some(line),
            Ok(_) => {
                // Capacity is fixed up front; growing would leave stale copies.
                if line.len() < MAX_ANSWER {
                    line.push(byte[0]);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return None,
        }
    }
}

/// Hands the line's buffer to a `String` without copying it.
fn into_answer(mut line: Zeroizing<Vec<u8>>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(std::mem::take(&mut *line)) {
        Ok(answer) => answer,
        Err(err) => {
            let bytes = Zeroizing::new(err.into_bytes());
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

#[cfg(unix)]
fn read_stdin(buf: &mut [u8]) -> std::io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(not(unix))]
fn read_stdin(buf: &mut [u8]) -> std::io::Result<usize> {
    use std::io::Read;
    std::io::stdin().read(buf)
}

impl Host for TerminalHost {
    fn account(&mut self) -> Result<String> {
        if let Some(account) = &self.account {
            return Ok(account.clone());
        }
        let account = self
            .prompt(PromptStyle::EchoOn, "Username: ")
            .ok_or_else(|| anyhow!("no username supplied"))?;
        if account.is_empty() {
            return Err(anyhow!("no username supplied"));
        }
        self.account = Some(account.clone());
        Ok(account)
    }

    fn prompt(&mut self, style: PromptStyle, text: &str) -> Option<String> {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
        drop(stderr);
        self.read_answer(style)
    }

    fn log(&mut self, severity: Severity, message: &str) {
        forward_to_log(severity, message);
    }
}

/// Restores terminal echo on drop.
struct EchoGuard {
    #[cfg(unix)]
    saved: libc::termios,
}

impl EchoGuard {
    #[cfg(unix)]
    fn disable() -> Option<Self> {
        let fd = libc::STDIN_FILENO;
        let mut term = std::mem::MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fills the struct on success; we only read it then.
        let saved = unsafe {
            if libc::isatty(fd) != 1 || libc::tcgetattr(fd, term.as_mut_ptr()) != 0 {
                return None;
            }
            term.assume_init()
        };
        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        // SAFETY: `quiet` is a fully initialized copy of the current settings.
        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &quiet) } != 0 {
            return None;
        }
        Some(Self { saved })
    }

    #[cfg(not(unix))]
    fn disable() -> Option<Self> {
        None
    }
}

#[cfg(unix)]
impl Drop for EchoGuard {
    fn drop(&mut self) {
        // SAFETY: restores the settings captured in `disable`.
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &self.saved);
        }
    }
}
