//! Unit tests for agent command line construction.

use std::collections::BTreeMap;
use std::path::PathBuf;

use agent_relay::transport::command::build_args;
use agent_relay::RelayConfig;

/// Flags follow a fixed order with stream-json framing at both ends.
#[test]
fn full_argument_order() {
    let mut extra_args = BTreeMap::new();
    extra_args.insert("replay-user-messages".to_owned(), None);
    extra_args.insert("debug".to_owned(), Some("api".to_owned()));

    let config = RelayConfig {
        system_prompt: Some("be brief".into()),
        append_system_prompt: Some("and kind".into()),
        allowed_tools: vec!["Read".into()],
        max_turns: Some(4),
        disallowed_tools: vec!["Bash".into(), "Write".into()],
        model: Some("haiku".into()),
        resume: Some("sess-1".into()),
        settings: Some("{\"a\":1}".into()),
        add_dirs: vec![PathBuf::from("/data"), PathBuf::from("/logs")],
        mcp_config: Some("mcp.json".into()),
        include_partial_messages: true,
        extra_args,
        ..RelayConfig::default()
    };

    assert_eq!(
        build_args(&config, false),
        vec![
            "--output-format",
            "stream-json",
            "--verbose",
            "--system-prompt",
            "be brief",
            "--append-system-prompt",
            "and kind",
            "--allowedTools",
            "Read",
            "--max-turns",
            "4",
            "--disallowedTools",
            "Bash,Write",
            "--model",
            "haiku",
            "--resume",
            "sess-1",
            "--settings",
            "{\"a\":1}",
            "--add-dir",
            "/data",
            "--add-dir",
            "/logs",
            "--mcp-config",
            "mcp.json",
            "--include-partial-messages",
            "--debug",
            "api",
            "--replay-user-messages",
            "--input-format",
            "stream-json",
        ]
    );
}

/// `--continue` is a bare flag.
#[test]
fn continue_is_bare_flag() {
    let config = RelayConfig {
        continue_conversation: true,
        ..RelayConfig::default()
    };
    let args = build_args(&config, false);
    let idx = args.iter().position(|a| a == "--continue").expect("flag present");
    assert_eq!(args[idx + 1], "--input-format", "no value follows --continue");
}

/// The stdio permission prompt is only requested with a permission callback.
#[test]
fn permission_prompt_tool_only_when_requested() {
    let config = RelayConfig::default();
    assert!(!build_args(&config, false).contains(&"--permission-prompt-tool".to_owned()));
    assert!(build_args(&config, true).contains(&"--permission-prompt-tool".to_owned()));
}
