//! Coverage for config parsing, validation and path resolution.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use pbchat::config::{config_dir, load_config, runtime_paths, Config};
use pbchat::credentials::Credentials;
use pbchat::session::{Account, ServiceType};

const FULL: &str = r#"
[rpc]
call_timeout_secs = 10
connect_timeout_secs = 2

[[accounts]]
name = "work"
auto_login = true
host = "chat.example.org"
port = 8787
identity = "alice"
password_env = "PBCHAT_TEST_WORK_PASSWORD"

[[accounts.services]]
service_type = "words"
service_name = "words"
perspective_name = "alice"

[[accounts.services]]
service_type = "reality"
service_name = "stage"
perspective_name = "alice"

[[accounts]]
name = "home"
host = "localhost"
port = 8788
identity = "al"
password = "inline"

[[accounts.services]]
service_type = "words"
service_name = "words"
perspective_name = "al"
"#;

fn parse(toml_str: &str) -> Config {
    match toml::from_str::<Config>(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    }
}

#[test]
fn config_dir_resolves() {
    let path = match config_dir() {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".pbchat"));
}

#[test]
fn runtime_paths_live_under_config_dir() {
    let paths = match runtime_paths() {
        Ok(paths) => paths,
        Err(err) => panic!("runtime paths should resolve: {err}"),
    };
    assert!(paths.config_toml.ends_with(Path::new(".pbchat").join("config.toml")));
    assert!(paths.env_file.ends_with(Path::new(".pbchat").join(".env")));
    assert!(paths.logs_dir.starts_with(&paths.root));
}

#[test]
fn parse_full_config() {
    let config = parse(FULL);
    assert!(config.validate().is_ok());

    let timeouts = config.rpc.timeouts();
    assert_eq!(timeouts.call.as_secs(), 10);
    assert_eq!(timeouts.connect.as_secs(), 2);

    assert_eq!(config.accounts.len(), 2);
    let work = &config.accounts[0];
    assert!(work.auto_login);
    assert_eq!(work.services.len(), 2);
    assert_eq!(work.services[1].service_type, ServiceType::Reality);
    assert!(!config.accounts[1].auto_login);
}

#[test]
fn empty_file_is_valid_with_defaults() {
    let config = parse("");
    assert!(config.accounts.is_empty());
    assert_eq!(config.rpc.call_timeout_secs, 30);
    assert_eq!(config.rpc.connect_timeout_secs, 5);
    assert!(config.validate().is_ok());
}

#[test]
fn validation_rejects_bad_accounts() {
    let cases = [
        ("port = 8788", "port = 0", "port must be non-zero"),
        ("identity = \"al\"", "identity = \"\"", "identity must not be empty"),
        (
            "password = \"inline\"",
            "password = \"inline\"\npassword_env = \"X\"",
            "only one of password and password_env",
        ),
        ("name = \"home\"", "name = \"work\"", "duplicate account name"),
    ];
    for (from, to, expected) in cases {
        let config = parse(&FULL.replace(from, to));
        let err = match config.validate() {
            Ok(()) => panic!("{to} should be rejected"),
            Err(err) => err,
        };
        assert!(
            err.to_string().contains(expected),
            "{to}: unexpected error {err}"
        );
    }
}

#[test]
fn account_without_services_is_rejected() {
    let config = parse(
        r#"
[[accounts]]
name = "bare"
host = "localhost"
port = 1
identity = "alice"
password = "pw"
"#,
    );
    let err = config.validate().expect_err("no services");
    assert!(err.to_string().contains("no services configured"));
}

#[test]
fn unknown_service_type_fails_to_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("config.toml");
    let write = fs::write(&path, FULL.replace("\"reality\"", "\"video\""));
    assert!(write.is_ok());

    let err = load_config(&path).expect_err("unknown tag");
    assert!(format!("{err:#}").contains("failed to parse config"));
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let err = load_config(&path).expect_err("missing");
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn accounts_build_from_loaded_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("config.toml");
    assert!(fs::write(&path, FULL).is_ok());
    let config = load_config(&path).expect("loads");

    let mut vars = BTreeMap::new();
    vars.insert(
        "PBCHAT_TEST_WORK_PASSWORD".to_owned(),
        "from-env-file".to_owned(),
    );
    let credentials = Credentials::from_map(vars);

    let accounts: Vec<Account> = config
        .accounts
        .iter()
        .map(|entry| Account::from_config(entry, &credentials).expect("resolves"))
        .collect();
    assert_eq!(accounts[0].name, "work");
    assert_eq!(
        accounts[0].handler_name(&accounts[0].services[0]),
        "work (words:alice)"
    );
    assert!(!format!("{:?}", accounts[1]).contains("inline"));
}

#[test]
fn unresolvable_password_env_is_an_error() {
    let config = parse(&FULL.replace(
        "PBCHAT_TEST_WORK_PASSWORD",
        "PBCHAT_TEST_NOT_SET_ANYWHERE_91c2",
    ));
    let result = Account::from_config(&config.accounts[0], &Credentials::default());
    let err = match result {
        Ok(_) => panic!("password should not resolve"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("password for account work not found"));
}
