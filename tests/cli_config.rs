use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use mpa_guard::config::CliConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MPA_CONFIG",
        "MPA_USERSFILE",
        "MPA_HELPER",
        "MPA_AUDIT_LOG",
        "MPA_DEBUG",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CliConfig::load().expect("load config");
    assert_eq!(cfg.usersfile, None);
    assert_eq!(cfg.helper, PathBuf::from("/sbin/unix_chkpwd"));
    assert!(!cfg.debug);
    assert_eq!(cfg.audit_log, None);
    assert!(cfg.module_config().policy_file().is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"{
            "usersfile": "/etc/security/mpa_users",
            "helper": "/usr/sbin/unix_chkpwd",
            "debug": true,
            "audit_log": "/var/log/mpa_guard.log"
        }"#,
    );

    std::env::set_var("MPA_CONFIG", file.path());
    std::env::set_var("MPA_USERSFILE", "/srv/mpa/users");
    std::env::set_var("MPA_DEBUG", "0");

    let cfg = CliConfig::load().expect("load config");

    assert_eq!(cfg.usersfile, Some(PathBuf::from("/srv/mpa/users")));
    assert_eq!(cfg.helper, PathBuf::from("/usr/sbin/unix_chkpwd"));
    assert!(!cfg.debug);
    assert_eq!(cfg.audit_log, Some(PathBuf::from("/var/log/mpa_guard.log")));

    let module = cfg.module_config();
    assert!(!module.debug);
    assert_eq!(
        module.policy_file().unwrap().path(),
        PathBuf::from("/srv/mpa/users").as_path()
    );

    clear_env();
}

#[test]
fn explicit_path_wins_over_missing_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(r#"{ "usersfile": "/etc/security/mpa_users" }"#);
    let cfg = CliConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.usersfile, Some(PathBuf::from("/etc/security/mpa_users")));
    assert_eq!(cfg.helper, PathBuf::from("/sbin/unix_chkpwd"));
}

#[test]
fn rejects_unknown_fields() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(r#"{ "usersfile": "/etc/security/mpa_users", "nullok": true }"#);
    std::env::set_var("MPA_CONFIG", file.path());
    let err = CliConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[test]
fn rejects_relative_helper_and_bad_debug_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MPA_HELPER", "unix_chkpwd");
    let err = CliConfig::load().unwrap_err();
    assert!(err.to_string().contains("must be absolute"));
    std::env::remove_var("MPA_HELPER");

    std::env::set_var("MPA_DEBUG", "sometimes");
    assert!(CliConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MPA_CONFIG", "/nonexistent/mpa_guard.json");
    let err = CliConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
