//! Unit tests for permission modes, updates and decision payloads.

use clap::ValueEnum;
use serde_json::json;

use agent_relay::permission::{
    PermissionBehavior, PermissionDecision, PermissionMode, PermissionRule, PermissionUpdate,
    PermissionUpdateDestination,
};

// ── Modes ────────────────────────────────────────────────────────────────────

/// Wire spellings match serde and display.
#[test]
fn mode_spellings_agree() {
    for mode in PermissionMode::value_variants() {
        let wire = serde_json::to_value(mode).expect("serializes");
        assert_eq!(wire, json!(mode.as_str()));
        assert_eq!(mode.to_string(), mode.as_str());
    }
    assert_eq!(PermissionMode::BypassPermissions.as_str(), "bypassPermissions");
}

/// Command-line parsing accepts the wire spelling and kebab-case aliases.
#[test]
fn mode_parses_from_cli_names() {
    for (name, expected) in [
        ("default", PermissionMode::Default),
        ("acceptEdits", PermissionMode::AcceptEdits),
        ("plan", PermissionMode::Plan),
        ("bypassPermissions", PermissionMode::BypassPermissions),
        ("accept-edits", PermissionMode::AcceptEdits),
        ("bypass-permissions", PermissionMode::BypassPermissions),
    ] {
        let mode = <PermissionMode as ValueEnum>::from_str(name, false).expect(name);
        assert_eq!(mode, expected, "{name}");
    }
    assert!(<PermissionMode as ValueEnum>::from_str("everything", false).is_err());
}

/// The command-line name of every mode is the one sent on the wire.
#[test]
fn cli_name_matches_wire_spelling() {
    for mode in PermissionMode::value_variants() {
        let possible = mode.to_possible_value().expect("visible");
        assert_eq!(possible.get_name(), mode.as_str());
    }
}

// ── Updates ──────────────────────────────────────────────────────────────────

/// Agent suggestions decode into typed updates.
#[test]
fn decodes_add_rules_suggestion() {
    let update: PermissionUpdate = serde_json::from_value(json!({
        "type": "addRules",
        "rules": [{"toolName": "Bash", "ruleContent": "ls:*"}],
        "behavior": "allow",
        "destination": "session"
    }))
    .expect("valid update");

    assert_eq!(
        update,
        PermissionUpdate::AddRules {
            rules: vec![PermissionRule {
                tool_name: "Bash".into(),
                rule_content: Some("ls:*".into()),
            }],
            behavior: PermissionBehavior::Allow,
            destination: Some(PermissionUpdateDestination::Session),
        }
    );
}

/// `setMode` round-trips through the wire names.
#[test]
fn set_mode_update_wire_shape() {
    let update = PermissionUpdate::SetMode {
        mode: PermissionMode::Plan,
        destination: None,
    };
    assert_eq!(
        serde_json::to_value(&update).expect("serializes"),
        json!({"type": "setMode", "mode": "plan"})
    );
}

// ── Decisions ────────────────────────────────────────────────────────────────

/// Allow with rewritten input sends the rewrite, not the original.
#[test]
fn allow_with_rewritten_input() {
    let decision = PermissionDecision::Allow {
        updated_input: Some(json!({"command": "ls -la"})),
        updated_permissions: Some(vec![PermissionUpdate::SetMode {
            mode: PermissionMode::AcceptEdits,
            destination: Some(PermissionUpdateDestination::Session),
        }]),
    };
    let payload = decision
        .to_response(&json!({"command": "ls"}))
        .expect("serializes");

    assert_eq!(payload["behavior"], "allow");
    assert_eq!(payload["updatedInput"], json!({"command": "ls -la"}));
    assert_eq!(
        payload["updatedPermissions"],
        json!([{"type": "setMode", "mode": "acceptEdits", "destination": "session"}])
    );
}

/// A plain deny carries its message and no interrupt flag.
#[test]
fn plain_deny() {
    let payload = PermissionDecision::deny("not in this repo")
        .to_response(&json!({}))
        .expect("serializes");

    assert_eq!(payload["behavior"], "deny");
    assert_eq!(payload["message"], "not in this repo");
    assert!(!payload.contains_key("interrupt"), "interrupt only when set");
    assert!(!payload.contains_key("updatedInput"));
}
