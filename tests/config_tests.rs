//! Unit tests for configuration validation and derived settings.

use std::io::Write;
use std::time::Duration;

use rstest::*;
use snapwright::cloud::Credentials;
use snapwright::config::ConfigError;
use snapwright::{BuilderConfig, WaitPolicy};

#[fixture]
fn valid_config() -> BuilderConfig {
    BuilderConfig {
        username: None,
        password: None,
        token: Some(String::from("IONOSTOKENEXAMPLE")),
        api_url: String::from("https://api.ionos.com/cloudapi/v6"),
        region: String::from("de/txl"),
        image: String::from("ubuntu"),
        disk_type: String::from("SSD"),
        disk_size: 50,
        cores: 4,
        ram: 2048,
        snapshot_name: String::new(),
        ssh_public_key: Some(String::from("ssh-ed25519 AAAA builder")),
        ssh_public_key_path: None,
        ssh_password: None,
        ssh_user: String::from("root"),
        ssh_bin: String::from("ssh"),
        ssh_identity_file: None,
        ssh_port: 22,
        ssh_timeout_secs: 300,
        retries: 0,
    }
}

#[rstest]
fn validation_accepts_complete_config(valid_config: BuilderConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[rstest]
#[case::image(|cfg: &mut BuilderConfig| cfg.image = String::new(), "IONOS_IMAGE", "image")]
#[case::region(|cfg: &mut BuilderConfig| cfg.region = String::from("  "), "IONOS_REGION", "region")]
#[case::credentials(|cfg: &mut BuilderConfig| cfg.token = None, "IONOS_TOKEN", "token")]
#[case::public_key(
    |cfg: &mut BuilderConfig| cfg.ssh_public_key = None,
    "IONOS_SSH_PUBLIC_KEY",
    "ssh_public_key"
)]
fn validation_errors_are_actionable(
    valid_config: BuilderConfig,
    #[case] mutate: fn(&mut BuilderConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(
        message.contains("snapwright.toml"),
        "should mention config file: {message}"
    );
    assert!(
        !message.contains('['),
        "keys are read from the top level, not a table: {message}"
    );
}

#[rstest]
#[case::disk_size(|cfg: &mut BuilderConfig| cfg.disk_size = 0, "IONOS_DISK_SIZE")]
#[case::cores(|cfg: &mut BuilderConfig| cfg.cores = 0, "IONOS_CORES")]
#[case::ram(|cfg: &mut BuilderConfig| cfg.ram = 0, "IONOS_RAM")]
fn validation_rejects_zero_sizes(
    valid_config: BuilderConfig,
    #[case] mutate: fn(&mut BuilderConfig),
    #[case] env_var: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("zero is invalid");
    assert!(
        matches!(error, ConfigError::InvalidValue(ref message) if message.contains(env_var)),
        "{error:?}"
    );
}

#[rstest]
fn token_wins_over_basic_credentials(valid_config: BuilderConfig) {
    let cfg = BuilderConfig {
        username: Some(String::from("user@example.com")),
        password: Some(String::from("hunter2")),
        ..valid_config
    };
    assert_eq!(
        cfg.credentials(),
        Ok(Credentials::Token(String::from("IONOSTOKENEXAMPLE")))
    );
}

#[rstest]
fn basic_credentials_need_both_halves(valid_config: BuilderConfig) {
    let complete = BuilderConfig {
        token: None,
        username: Some(String::from("user@example.com")),
        password: Some(String::from("hunter2")),
        ..valid_config.clone()
    };
    assert_eq!(
        complete.credentials(),
        Ok(Credentials::Basic {
            username: String::from("user@example.com"),
            password: String::from("hunter2"),
        })
    );

    let partial = BuilderConfig {
        token: Some(String::new()),
        username: Some(String::from("user@example.com")),
        password: None,
        ..valid_config
    };
    assert!(matches!(
        partial.credentials(),
        Err(ConfigError::MissingField(_))
    ));
}

#[rstest]
fn server_spec_generates_snapshot_name_when_empty(valid_config: BuilderConfig) {
    let spec = valid_config.server_spec().expect("valid config");
    assert!(spec.name.starts_with("snapwright-"), "{}", spec.name);
    assert_eq!(spec.image_password, None);
}

#[rstest]
fn server_spec_keeps_configured_name_and_password(valid_config: BuilderConfig) {
    let cfg = BuilderConfig {
        snapshot_name: String::from("golden-ubuntu"),
        ssh_password: Some(String::from("s3cret")),
        ..valid_config
    };
    let spec = cfg.server_spec().expect("valid config");
    assert_eq!(spec.name, "golden-ubuntu");
    assert_eq!(spec.image_password.as_deref(), Some("s3cret"));
    assert_eq!(spec.disk_type, "SSD");
}

#[rstest]
fn server_spec_reads_public_key_file(valid_config: BuilderConfig) {
    let mut key_file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(key_file, "ssh-rsa AAAAB3 from-file").expect("write key");
    let path = key_file.path().to_str().expect("utf-8 path").to_owned();
    let cfg = BuilderConfig {
        ssh_public_key: None,
        ssh_public_key_path: Some(path),
        ..valid_config
    };

    let spec = cfg.server_spec().expect("key file readable");

    assert_eq!(spec.ssh_public_key, "ssh-rsa AAAAB3 from-file");
}

#[rstest]
fn server_spec_reports_missing_key_file(valid_config: BuilderConfig) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.pub");
    let cfg = BuilderConfig {
        ssh_public_key: None,
        ssh_public_key_path: Some(path.to_str().expect("utf-8 path").to_owned()),
        ..valid_config
    };

    let error = cfg.server_spec().expect_err("missing key file");
    assert!(matches!(error, ConfigError::KeyFile { .. }), "{error:?}");
}

#[rstest]
#[case(0, 120, 50)]
#[case(7, 7, 7)]
fn retry_override_replaces_every_budget(
    valid_config: BuilderConfig,
    #[case] retries: u32,
    #[case] resource: u32,
    #[case] snapshot: u32,
) {
    let cfg = BuilderConfig {
        retries,
        ..valid_config
    };
    assert_eq!(
        cfg.resource_policy(),
        WaitPolicy::new(resource, Duration::from_secs(1))
    );
    assert_eq!(
        cfg.snapshot_policy(),
        WaitPolicy::new(snapshot, Duration::from_secs(10))
    );
}

#[rstest]
fn ssh_settings_follow_config(valid_config: BuilderConfig) {
    let cfg = BuilderConfig {
        ssh_user: String::from("builder"),
        ssh_port: 2222,
        ssh_identity_file: Some(String::from("~/.ssh/id_ed25519")),
        ..valid_config
    };
    let settings = cfg.ssh_settings();
    assert_eq!(settings.user, "builder");
    assert_eq!(settings.port, 2222);
    assert_eq!(settings.identity_file.as_deref(), Some("~/.ssh/id_ed25519"));
    assert!(settings.batch_mode);
}
