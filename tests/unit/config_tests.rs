//! Unit tests for configuration parsing and validation.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use agent_relay::config::DEFAULT_MAX_BUFFER_SIZE;
use agent_relay::permission::PermissionMode;
use agent_relay::{AppError, RelayConfig};

// ── Parsing ──────────────────────────────────────────────────────────────────

/// A full document maps every key onto the struct.
#[test]
fn parses_full_document() {
    let toml = r#"
cli_path = "/opt/agent/bin/claude"
model = "claude-sonnet-4-5"
max_turns = 3
system_prompt = "You are terse."
allowed_tools = ["Read", "Write"]
disallowed_tools = ["Bash"]
permission_mode = "acceptEdits"
resume = "sess-42"
fork_session = true
include_partial_messages = true
max_buffer_size = 4096
control_timeout_seconds = 5
callback_timeout_seconds = 2
max_inbound_concurrency = 4
stderr_tail_lines = 10

[extra_args]
debug-to-stderr = ""
replay-user-messages = "yes"

[env]
ANTHROPIC_LOG = "debug"
"#;

    let config = RelayConfig::from_toml_str(toml).expect("valid config");
    assert_eq!(config.cli_path, Some(PathBuf::from("/opt/agent/bin/claude")));
    assert_eq!(config.model.as_deref(), Some("claude-sonnet-4-5"));
    assert_eq!(config.max_turns, Some(3));
    assert_eq!(config.allowed_tools, vec!["Read", "Write"]);
    assert_eq!(config.disallowed_tools, vec!["Bash"]);
    assert_eq!(config.permission_mode, Some(PermissionMode::AcceptEdits));
    assert_eq!(config.resume.as_deref(), Some("sess-42"));
    assert!(config.fork_session);
    assert!(config.include_partial_messages);
    assert_eq!(config.max_buffer_size, 4096);
    assert_eq!(config.control_timeout(), Duration::from_secs(5));
    assert_eq!(config.callback_timeout(), Some(Duration::from_secs(2)));
    assert_eq!(config.max_inbound_concurrency, 4);
    assert_eq!(config.stderr_tail_lines, 10);
    assert_eq!(
        config.extra_args.get("replay-user-messages"),
        Some(&Some("yes".to_owned()))
    );
    assert_eq!(config.env.get("ANTHROPIC_LOG").map(String::as_str), Some("debug"));
}

/// Omitted limits fall back to their defaults.
#[test]
fn defaults_apply_when_omitted() {
    let config = RelayConfig::from_toml_str("model = \"m\"").expect("valid config");
    assert_eq!(config.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
    assert_eq!(config.control_timeout(), Duration::from_secs(60));
    assert_eq!(config.callback_timeout(), None, "no callback deadline by default");
    assert_eq!(config.max_inbound_concurrency, 16);
    assert_eq!(config.stderr_tail_lines, 100);
    assert!(config.permission_mode.is_none());
}

/// Unknown keys are rejected rather than silently ignored.
#[test]
fn unknown_key_is_rejected() {
    let err = RelayConfig::from_toml_str("max_buffer = 10").expect_err("unknown key");
    assert!(matches!(err, AppError::Config(_)), "got: {err}");
}

/// Unknown permission modes fail to parse.
#[test]
fn unknown_permission_mode_is_rejected() {
    let result = RelayConfig::from_toml_str("permission_mode = \"yolo\"");
    assert!(result.is_err(), "yolo is not a permission mode");
}

/// Configuration loads from a file on disk.
#[test]
fn loads_from_path() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "model = \"from-file\"\nmax_turns = 2").expect("write config");

    let config = RelayConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.model.as_deref(), Some("from-file"));
    assert_eq!(config.max_turns, Some(2));
}

/// A missing file is a config error.
#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = RelayConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(
        err.to_string().starts_with("config: failed to read config"),
        "got: {err}"
    );
}

// ── Validation ───────────────────────────────────────────────────────────────

/// A zero buffer limit is invalid.
#[test]
fn zero_buffer_is_invalid() {
    let err = RelayConfig::from_toml_str("max_buffer_size = 0").expect_err("zero buffer");
    assert!(err.to_string().contains("max_buffer_size"), "got: {err}");
}

/// Zero inbound concurrency is invalid.
#[test]
fn zero_concurrency_is_invalid() {
    let err =
        RelayConfig::from_toml_str("max_inbound_concurrency = 0").expect_err("zero concurrency");
    assert!(err.to_string().contains("max_inbound_concurrency"), "got: {err}");
}

/// A zero control timeout is invalid.
#[test]
fn zero_control_timeout_is_invalid() {
    let err =
        RelayConfig::from_toml_str("control_timeout_seconds = 0").expect_err("zero timeout");
    assert!(err.to_string().contains("control_timeout_seconds"), "got: {err}");
}

/// `max_turns = 0` is invalid.
#[test]
fn zero_max_turns_is_invalid() {
    let err = RelayConfig::from_toml_str("max_turns = 0").expect_err("zero turns");
    assert!(err.to_string().contains("max_turns"), "got: {err}");
}

/// `continue` and `resume` cannot be combined.
#[test]
fn continue_and_resume_conflict() {
    let err = RelayConfig::from_toml_str("continue = true\nresume = \"abc\"")
        .expect_err("mutually exclusive");
    assert!(err.to_string().contains("mutually exclusive"), "got: {err}");
}

/// `cwd` must name an existing directory.
#[test]
fn cwd_must_be_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    let valid = RelayConfig {
        cwd: Some(dir.path().to_path_buf()),
        ..RelayConfig::default()
    };
    assert!(valid.validate().is_ok(), "existing directory is valid");

    let invalid = RelayConfig {
        cwd: Some(dir.path().join("nope")),
        ..RelayConfig::default()
    };
    let err = invalid.validate().expect_err("missing directory");
    assert!(err.to_string().contains("cwd is not a directory"), "got: {err}");
}
