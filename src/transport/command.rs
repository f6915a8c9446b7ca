//! Agent command line construction.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::RelayConfig;

/// Entrypoint reported to the agent through `CLAUDE_CODE_ENTRYPOINT`.
pub const ENTRYPOINT: &str = "sdk-rust";

/// Arguments for a stream-json session.
///
/// `permission_prompt_stdio` routes permission prompts through inbound
/// `can_use_tool` control requests.
#[must_use]
pub fn build_args(config: &RelayConfig, permission_prompt_stdio: bool) -> Vec<String> {
    let mut args: Vec<String> = ["--output-format", "stream-json", "--verbose"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();

    let mut flag = |name: &str, value: Option<String>| {
        args.push(name.to_owned());
        if let Some(value) = value {
            args.push(value);
        }
    };

    if let Some(prompt) = &config.system_prompt {
        flag("--system-prompt", Some(prompt.clone()));
    }
    if let Some(append) = &config.append_system_prompt {
        flag("--append-system-prompt", Some(append.clone()));
    }
    if !config.allowed_tools.is_empty() {
        flag("--allowedTools", Some(config.allowed_tools.join(",")));
    }
    if let Some(max_turns) = config.max_turns {
        flag("--max-turns", Some(max_turns.to_string()));
    }
    if !config.disallowed_tools.is_empty() {
        flag("--disallowedTools", Some(config.disallowed_tools.join(",")));
    }
    if let Some(model) = &config.model {
        flag("--model", Some(model.clone()));
    }
    if permission_prompt_stdio {
        flag("--permission-prompt-tool", Some("stdio".to_owned()));
    }
    if let Some(mode) = config.permission_mode {
        flag("--permission-mode", Some(mode.as_str().to_owned()));
    }
    if config.continue_conversation {
        flag("--continue", None);
    }
    if let Some(session) = &config.resume {
        flag("--resume", Some(session.clone()));
    }
    if config.fork_session {
        flag("--fork-session", None);
    }
    if let Some(settings) = &config.settings {
        flag("--settings", Some(settings.clone()));
    }
    for dir in &config.add_dirs {
        flag("--add-dir", Some(dir.to_string_lossy().into_owned()));
    }
    if let Some(mcp) = &config.mcp_config {
        flag("--mcp-config", Some(mcp.clone()));
    }
    if config.include_partial_messages {
        flag("--include-partial-messages", None);
    }
    for (name, value) in &config.extra_args {
        flag(&format!("--{name}"), value.clone());
    }

    args.extend(["--input-format".to_owned(), "stream-json".to_owned()]);
    args
}

/// Piped, `kill_on_drop` command for the agent at `cli`.
///
/// The parent environment is inherited; the identifying variables and the
/// configured overrides are layered on top.
#[must_use]
pub fn build_command(cli: &Path, config: &RelayConfig, permission_prompt_stdio: bool) -> Command {
    let mut cmd = Command::new(cli);
    cmd.args(build_args(config, permission_prompt_stdio));

    cmd.env("CLAUDE_CODE_ENTRYPOINT", ENTRYPOINT)
        .env("CLAUDE_AGENT_SDK_VERSION", env!("CARGO_PKG_VERSION"));
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd).env("PWD", cwd);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}
