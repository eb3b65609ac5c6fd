//! Per-account authorization policy.
//!
//! Policy lines have the form `ACCOUNT:REQUIRED:AUTHORIZER1,AUTHORIZER2,...`.
//! Lines starting with `#` are comments. The first well-formed line whose
//! key equals the account wins; later entries for the same account are never
//! consulted.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::host::{Host, Severity};

/// Platform login-name limit (`LOGIN_NAME_MAX` on Linux).
pub const LOGIN_NAME_MAX: usize = 256;

const COMMENT: u8 = b'#';
const FIELD_SEPARATOR: u8 = b':';
const LIST_SEPARATOR: u8 = b',';

/// One entry of the authorizer list.
///
/// Names are matched as raw bytes. A name that is not UTF-8 stays in the
/// list but can never match a typed username.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorizerSlot {
    name: String,
    #[serde(skip)]
    raw: Vec<u8>,
    consumed: bool,
}

impl AuthorizerSlot {
    fn from_bytes(raw: &[u8]) -> Self {
        let raw = &raw[..raw.len().min(LOGIN_NAME_MAX)];
        Self {
            name: String::from_utf8_lossy(raw).into_owned(),
            raw: raw.to_vec(),
            consumed: false,
        }
    }

    /// Display form; invalid UTF-8 is shown with replacement characters.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_utf8(&self) -> bool {
        std::str::from_utf8(&self.raw).is_ok()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorizationPolicy {
    account: String,
    required: i64,
    authorizers: Vec<AuthorizerSlot>,
}

impl AuthorizationPolicy {
    pub fn new(account: &str, required: i64, authorizers: Vec<String>) -> Self {
        let slots = authorizers
            .iter()
            .map(|name| AuthorizerSlot::from_bytes(name.as_bytes()))
            .collect();
        Self::from_slots(account, required, slots)
    }

    fn from_slots(account: &str, required: i64, authorizers: Vec<AuthorizerSlot>) -> Self {
        Self {
            account: account.to_string(),
            required,
            authorizers,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn required(&self) -> i64 {
        self.required
    }

    pub fn authorizers(&self) -> &[AuthorizerSlot] {
        &self.authorizers
    }

    /// A quorum below one can never be satisfied meaningfully and denies all.
    pub fn denies_all(&self) -> bool {
        self.required < 1
    }

    /// Marks every unconsumed slot named `authorizer` as consumed.
    ///
    /// Returns true when at least one slot matched. A single call counts as
    /// one approval no matter how many slots it consumed.
    pub fn consume(&mut self, authorizer: &str) -> bool {
        let mut matched = false;
        for slot in self
            .authorizers
            .iter_mut()
            .filter(|slot| !slot.consumed && slot.raw == authorizer.as_bytes())
        {
            slot.consumed = true;
            matched = true;
        }
        matched
    }
}

/// Location of a policy file on disk.
#[derive(Clone, Debug)]
pub struct PolicyFile {
    path: PathBuf,
}

impl PolicyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file for one parse. Callers must not cache the result.
    pub fn open(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open policy file {}", self.path.display()))?;
        Ok(BufReader::new(file))
    }
}

/// Loads the policy for `account`, logging and swallowing I/O failures.
pub fn load(
    source: &PolicyFile,
    account: &str,
    host: &mut dyn Host,
) -> Option<AuthorizationPolicy> {
    let reader = match source.open() {
        Ok(reader) => reader,
        Err(err) => {
            host.log(Severity::Error, &format!("{:#}", err));
            return None;
        }
    };
    match parse_policy(reader, account, host) {
        Ok(policy) => policy,
        Err(err) => {
            host.log(
                Severity::Error,
                &format!("failed to read policy file {}: {:#}", source.path().display(), err),
            );
            None
        }
    }
}

/// Scans `reader` for the first well-formed entry for `account`.
///
/// Returns `Ok(None)` when the account is too long, absent, or only has
/// malformed entries. Read failures are returned as errors.
pub fn parse_policy<R: BufRead>(
    mut reader: R,
    account: &str,
    host: &mut dyn Host,
) -> Result<Option<AuthorizationPolicy>> {
    if account.len() > LOGIN_NAME_MAX {
        return Ok(None);
    }

    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .context("policy read failed")?;
        if n == 0 {
            return Ok(None);
        }
        if raw.first() == Some(&COMMENT) {
            continue;
        }
        let Some(rest) = raw
            .strip_prefix(account.as_bytes())
            .and_then(|rest| rest.strip_prefix(&[FIELD_SEPARATOR]))
        else {
            continue;
        };
        match parse_entry(account, rest) {
            Ok(policy) => return Ok(Some(policy)),
            Err(problem) => {
                let line = String::from_utf8_lossy(&raw);
                host.log(Severity::Warning, &problem.describe(&line));
            }
        }
    }
}

/// A problem found while linting a whole policy file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    pub line: usize,
    pub account: String,
    pub kind: LintKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum LintKind {
    /// The line has no `ACCOUNT:` key at all.
    MissingKey,
    /// The account name can never match a login name.
    AccountTooLong,
    /// The account key is not UTF-8 and can never match a login name.
    AccountNotUtf8,
    /// The authorizer at this list position is not UTF-8 and never matches.
    AuthorizerNotUtf8 { slot: usize },
    /// The entry will be skipped when loading.
    Malformed { reason: String },
    /// `required < 1`: the account can never be unlocked.
    DeniesAll { required: i64 },
    /// More approvals are required than there are authorizer slots.
    QuorumUnreachable { required: i64, slots: usize },
    /// An earlier well-formed entry for the same account always wins.
    Shadowed { first_line: usize },
}

impl std::fmt::Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: ", self.line)?;
        match &self.kind {
            LintKind::MissingKey => write!(f, "no account field"),
            LintKind::AccountTooLong => write!(
                f,
                "account name longer than {} bytes never matches",
                LOGIN_NAME_MAX
            ),
            LintKind::AccountNotUtf8 => write!(f, "account name is not UTF-8 and never matches"),
            LintKind::AuthorizerNotUtf8 { slot } => write!(
                f,
                "authorizer {} of '{}' is not UTF-8 and never matches",
                slot + 1,
                self.account
            ),
            LintKind::Malformed { reason } => {
                write!(f, "entry for '{}' is skipped: {}", self.account, reason)
            }
            LintKind::DeniesAll { required } => write!(
                f,
                "'{}' requires {} authorizers and denies every attempt",
                self.account, required
            ),
            LintKind::QuorumUnreachable { required, slots } => write!(
                f,
                "'{}' requires {} authorizers but lists only {}",
                self.account, required, slots
            ),
            LintKind::Shadowed { first_line } => write!(
                f,
                "entry for '{}' is never used; line {} wins",
                self.account, first_line
            ),
        }
    }
}

/// Checks every entry of a policy file, reporting lines that would be
/// skipped, never consulted, or impossible to satisfy.
pub fn lint<R: BufRead>(mut reader: R) -> Result<Vec<LintFinding>> {
    let mut findings = Vec::new();
    let mut first_seen: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    let mut raw = Vec::new();
    let mut line_no = 0usize;
    loop {
        raw.clear();
        if reader
            .read_until(b'\n', &mut raw)
            .context("policy read failed")?
            == 0
        {
            return Ok(findings);
        }
        line_no += 1;
        if raw.first() == Some(&COMMENT) || raw.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let Some(split) = raw.iter().position(|b| *b == FIELD_SEPARATOR) else {
            findings.push(LintFinding {
                line: line_no,
                account: String::new(),
                kind: LintKind::MissingKey,
            });
            continue;
        };
        let (key, rest) = (&raw[..split], &raw[split + 1..]);
        let account = String::from_utf8_lossy(key).into_owned();
        let mut finding = |kind| {
            findings.push(LintFinding {
                line: line_no,
                account: account.clone(),
                kind,
            })
        };
        if key.len() > LOGIN_NAME_MAX {
            finding(LintKind::AccountTooLong);
            continue;
        }
        if std::str::from_utf8(key).is_err() {
            finding(LintKind::AccountNotUtf8);
            continue;
        }
        let policy = match parse_entry(&account, rest) {
            Ok(policy) => policy,
            Err(problem) => {
                finding(LintKind::Malformed {
                    reason: problem.reason().to_string(),
                });
                continue;
            }
        };
        if let Some(first_line) = first_seen.get(&account) {
            finding(LintKind::Shadowed {
                first_line: *first_line,
            });
            continue;
        }
        first_seen.insert(account.clone(), line_no);
        for (slot, authorizer) in policy.authorizers().iter().enumerate() {
            if !authorizer.is_utf8() {
                finding(LintKind::AuthorizerNotUtf8 { slot });
            }
        }
        if policy.denies_all() {
            finding(LintKind::DeniesAll {
                required: policy.required(),
            });
        } else if policy.required() > policy.authorizers().len() as i64 {
            finding(LintKind::QuorumUnreachable {
                required: policy.required(),
                slots: policy.authorizers().len(),
            });
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntryProblem {
    BadRequired,
    MissingSeparator,
}

impl EntryProblem {
    fn reason(&self) -> &'static str {
        match self {
            EntryProblem::BadRequired => "required count is not an integer in range",
            EntryProblem::MissingSeparator => "missing ':' after required count",
        }
    }

    pub(crate) fn describe(&self, line: &str) -> String {
        let line = line.trim_end_matches('\n');
        match self {
            EntryProblem::BadRequired => {
                format!("invalid required count in field 2: '{}'", line)
            }
            EntryProblem::MissingSeparator => format!("malformed line in users file: '{}'", line),
        }
    }
}

/// Parses the bytes following `ACCOUNT:`.
///
/// Only the required count has to be text; authorizer names are kept as
/// bytes, cut at `LOGIN_NAME_MAX`.
pub(crate) fn parse_entry(
    account: &str,
    rest: &[u8],
) -> std::result::Result<AuthorizationPolicy, EntryProblem> {
    let head = match std::str::from_utf8(rest) {
        Ok(head) => head,
        Err(err) => std::str::from_utf8(&rest[..err.valid_up_to()]).unwrap_or_default(),
    };
    let (required, tail) = parse_c_long(head).ok_or(EntryProblem::BadRequired)?;
    // strtol reports overflow by saturating; the extremes are never trusted.
    if required == i64::MAX || required == i64::MIN {
        return Err(EntryProblem::BadRequired);
    }
    let list = rest[head.len() - tail.len()..]
        .strip_prefix(&[FIELD_SEPARATOR])
        .ok_or(EntryProblem::MissingSeparator)?;
    let list = match list.iter().position(|b| *b == b'\n') {
        Some(end) => &list[..end],
        None => list,
    };
    let authorizers = list
        .split(|b| *b == LIST_SEPARATOR)
        .map(AuthorizerSlot::from_bytes)
        .collect();
    Ok(AuthorizationPolicy::from_slots(account, required, authorizers))
}

/// Parses an integer the way C `strtol(s, &end, 0)` does: optional leading
/// whitespace and sign, then decimal, `0x` hex or leading-zero octal.
/// Returns the value and the unparsed remainder, or `None` when no digits
/// were consumed or the value does not fit in an `i64`.
pub(crate) fn parse_c_long(input: &str) -> Option<(i64, &str)> {
    let s = input.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let bytes = s.as_bytes();
    let (radix, digits) = if bytes.len() > 2
        && bytes[0] == b'0'
        && (bytes[1] == b'x' || bytes[1] == b'X')
        && bytes[2].is_ascii_hexdigit()
    {
        (16, &s[2..])
    } else if bytes.first() == Some(&b'0') {
        (8, s)
    } else {
        (10, s)
    };

    let len = digits
        .bytes()
        .take_while(|b| (*b as char).is_digit(radix))
        .count();
    if len == 0 {
        return None;
    }

    let mut value: i64 = 0;
    for b in digits[..len].bytes() {
        let digit = i64::from((b as char).to_digit(radix)?);
        value = value.checked_mul(i64::from(radix))?;
        value = if negative {
            value.checked_sub(digit)?
        } else {
            value.checked_add(digit)?
        };
    }
    Some((value, &digits[len..]))
}
