//! `mpa_guard authenticate` end to end, with `/bin/sh` as the credential
//! helper and a script path as the authorizer name.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

struct Setup {
    dir: TempDir,
    authorizer: String,
    usersfile: PathBuf,
    audit_log: PathBuf,
}

fn setup(verify_exit: i32) -> Setup {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("bob.sh");
    fs::write(
        &script,
        format!(
            "if [ \"$1\" = nonull ]; then /bin/cat > /dev/null; exit {}; fi\nexit 0\n",
            verify_exit
        ),
    )
    .unwrap();
    let authorizer = script.to_str().expect("utf-8 temp path").to_string();

    let usersfile = dir.path().join("mpa_users");
    fs::write(&usersfile, format!("alice:1:{}\n", authorizer)).unwrap();
    let audit_log = dir.path().join("audit.log");
    Setup {
        dir,
        authorizer,
        usersfile,
        audit_log,
    }
}

fn mpa_guard(args: &[&str], stdin: &str) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mpa_guard"));
    for key in [
        "MPA_CONFIG",
        "MPA_USERSFILE",
        "MPA_HELPER",
        "MPA_AUDIT_LOG",
        "MPA_DEBUG",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    let mut child = cmd
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn mpa_guard");
    // The tool may exit before reading its answers.
    let _ = child.stdin.take().unwrap().write_all(stdin.as_bytes());
    child.wait_with_output().unwrap()
}

fn authenticate(setup: &Setup, audited: bool) -> Output {
    let usersfile = setup.usersfile.to_str().unwrap();
    let audit_log = setup.audit_log.to_str().unwrap();
    let mut args = vec!["--usersfile", usersfile, "--helper", "/bin/sh"];
    if audited {
        args.extend(["--audit-log", audit_log]);
    }
    args.extend(["authenticate", "--account", "alice"]);
    mpa_guard(&args, &format!("{}\nbob-pw\n", setup.authorizer))
}

#[test]
fn grant_is_recorded_in_the_audit_log() {
    let setup = setup(0);
    let out = authenticate(&setup, true);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "GRANTED");

    let audit = fs::read_to_string(&setup.audit_log).unwrap();
    assert!(audit.contains("accepted for account 'alice'"), "{}", audit);
    assert!(
        audit.contains("access to account 'alice' authorized by 1 users"),
        "{}",
        audit
    );

    let terminal = String::from_utf8_lossy(&out.stderr);
    assert!(terminal.contains("authorizer [1 of 1]: "));
    assert!(!terminal.contains("authorized by"), "{}", terminal);
    assert!(!terminal.contains("bob-pw"));
    assert!(setup.dir.path().exists());
}

#[test]
fn rejected_round_is_recorded_and_denied() {
    let setup = setup(7);
    let out = authenticate(&setup, true);

    assert_eq!(out.status.code(), Some(7));
    let audit = fs::read_to_string(&setup.audit_log).unwrap();
    assert!(audit.contains("authentication of authorizer 1 for account 'alice' failed; rc=7"));
    assert!(audit.contains("insufficient authorizers for account 'alice'; required 1, got 0"));
}

#[test]
fn authenticate_refuses_to_run_without_an_audit_log() {
    let setup = setup(0);
    let out = authenticate(&setup, false);

    assert_ne!(out.status.code(), Some(0));
    let terminal = String::from_utf8_lossy(&out.stderr);
    assert!(terminal.contains("needs an audit log"), "{}", terminal);
    assert!(!terminal.contains("authorizer ["));
}
