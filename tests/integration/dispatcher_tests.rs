//! Integration tests for inbound control request dispatch.
//!
//! Every request with a `request_id` must be answered exactly once, whether
//! the callback succeeds, fails, panics, times out or is missing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use agent_relay::callback::CallbackFuture;
use agent_relay::control::{InboundDispatcher, McpHandler};
use agent_relay::hooks::{
    hook_callback, HookEvent, HookInput, HookMatcher, HookOutput, HookRegistry,
};
use agent_relay::permission::{
    can_use_tool, CanUseTool, PermissionDecision, ToolPermissionContext,
};
use agent_relay::transport::Transport;
use agent_relay::AppError;

use super::test_helpers::{AgentSide, MockTransport};

struct Setup {
    hooks: BTreeMap<HookEvent, Vec<HookMatcher>>,
    can_use_tool: Option<CanUseTool>,
    mcp: Option<Arc<dyn McpHandler>>,
    concurrency: usize,
    callback_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            hooks: BTreeMap::new(),
            can_use_tool: None,
            mcp: None,
            concurrency: 4,
            callback_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

async fn dispatcher(setup: Setup) -> (Arc<InboundDispatcher>, AgentSide) {
    let (transport, agent) = MockTransport::pair();
    transport.connect().await.expect("connect");
    let dispatcher = InboundDispatcher::new(
        transport,
        Arc::new(HookRegistry::build(&setup.hooks)),
        setup.can_use_tool,
        setup.mcp,
        setup.concurrency,
        setup.callback_timeout,
        setup.cancel,
    );
    (Arc::new(dispatcher), agent)
}

fn inbound(request_id: &str, request: Value) -> Value {
    json!({"type": "control_request", "request_id": request_id, "request": request})
}

fn bash_request(request_id: &str) -> Value {
    inbound(
        request_id,
        json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {"command": "ls"}}),
    )
}

/// Assert `envelope` is an error response for `request_id` and return the
/// error text.
fn expect_error(envelope: &Value, request_id: &str) -> String {
    assert_eq!(envelope["type"], "control_response");
    assert_eq!(envelope["response"]["subtype"], "error", "got: {envelope}");
    assert_eq!(envelope["response"]["request_id"], request_id);
    envelope["response"]["error"]
        .as_str()
        .expect("error text")
        .to_owned()
}

/// Assert `envelope` is a success response for `request_id` and return the
/// payload.
fn expect_success(envelope: &Value, request_id: &str) -> Value {
    assert_eq!(envelope["type"], "control_response");
    assert_eq!(envelope["response"]["subtype"], "success", "got: {envelope}");
    assert_eq!(envelope["response"]["request_id"], request_id);
    envelope["response"]["response"].clone()
}

// ── Permission requests ──────────────────────────────────────────────────────

/// `can_use_tool` without a registered callback is answered with an error.
#[tokio::test]
async fn can_use_tool_without_callback_is_error() {
    let (dispatcher, mut agent) = dispatcher(Setup::default()).await;

    dispatcher.handle(bash_request("in_1")).await;

    let error = expect_error(&agent.next_written().await, "in_1");
    assert!(error.contains("no permission callback"), "got: {error}");
    assert!(
        agent
            .try_next_written(Duration::from_millis(50))
            .await
            .is_none(),
        "exactly one response"
    );
}

/// Allow with rewritten input sends the rewrite.
#[tokio::test]
async fn allow_with_rewritten_input() {
    let callback = can_use_tool(|tool_name, input, _context| async move {
        assert_eq!(tool_name, "Bash");
        assert_eq!(input["command"], "ls");
        Ok(PermissionDecision::Allow {
            updated_input: Some(json!({"command": "ls --color=never"})),
            updated_permissions: None,
        })
    });
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        ..Setup::default()
    })
    .await;

    dispatcher.handle(bash_request("in_2")).await;

    let payload = expect_success(&agent.next_written().await, "in_2");
    assert_eq!(
        payload,
        json!({"behavior": "allow", "updatedInput": {"command": "ls --color=never"}})
    );
}

/// The callback sees decoded suggestions and the blocked path.
#[tokio::test]
async fn callback_receives_context() {
    let callback = can_use_tool(|_, _, context| async move {
        assert_eq!(context.suggestions.len(), 1, "unknown suggestion shapes are skipped");
        assert_eq!(context.blocked_path.as_deref(), Some("/etc/passwd"));
        Ok(PermissionDecision::deny("outside the workspace"))
    });
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(inbound(
            "in_3",
            json!({
                "subtype": "can_use_tool",
                "tool_name": "Read",
                "input": {"file_path": "/etc/passwd"},
                "permission_suggestions": [
                    {"type": "addDirectories", "directories": ["/etc"], "destination": "session"},
                    {"type": "somethingNew"}
                ],
                "blocked_path": "/etc/passwd"
            }),
        ))
        .await;

    let payload = expect_success(&agent.next_written().await, "in_3");
    assert_eq!(
        payload,
        json!({"behavior": "deny", "message": "outside the workspace"})
    );
}

/// A callback error becomes an error response.
#[tokio::test]
async fn failing_callback_is_error_response() {
    let callback = can_use_tool(|_, _, _| async {
        Err::<PermissionDecision, _>(AppError::PermissionDenied("policy store offline".into()))
    });
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        ..Setup::default()
    })
    .await;

    dispatcher.handle(bash_request("in_4")).await;

    let error = expect_error(&agent.next_written().await, "in_4");
    assert!(error.contains("policy store offline"), "got: {error}");
}

/// A panicking callback still gets exactly one error response.
#[tokio::test]
async fn panicking_callback_is_error_response() {
    let callback = can_use_tool(|tool_name, _, _| async move {
        assert_ne!(tool_name, "Bash", "callback bug");
        Ok(PermissionDecision::allow())
    });
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        ..Setup::default()
    })
    .await;

    dispatcher.handle(bash_request("in_5")).await;

    let error = expect_error(&agent.next_written().await, "in_5");
    assert!(error.contains("callback panicked"), "got: {error}");
    assert!(agent
        .try_next_written(Duration::from_millis(50))
        .await
        .is_none());
}

/// A callback panicking before returning its future is caught too.
#[tokio::test]
async fn synchronous_panic_is_error_response() {
    let callback: CanUseTool = Arc::new(
        |_: String, _: Value, _: ToolPermissionContext| -> CallbackFuture<PermissionDecision> {
            panic!("eager callback bug")
        },
    );
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        ..Setup::default()
    })
    .await;

    dispatcher.handle(bash_request("in_6")).await;

    let error = expect_error(&agent.next_written().await, "in_6");
    assert!(error.contains("callback panicked"), "got: {error}");
}

/// A callback exceeding the deadline is answered with a timeout error.
#[tokio::test]
async fn slow_callback_times_out() {
    let callback = can_use_tool(|_, _, _| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(PermissionDecision::allow())
    });
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        callback_timeout: Some(Duration::from_millis(50)),
        ..Setup::default()
    })
    .await;

    dispatcher.handle(bash_request("in_7")).await;

    let error = expect_error(&agent.next_written().await, "in_7");
    assert!(error.starts_with("timeout:"), "got: {error}");
}

// ── Hook requests ────────────────────────────────────────────────────────────

fn blocking_bash_hooks() -> BTreeMap<HookEvent, Vec<HookMatcher>> {
    let block = hook_callback(|input, tool_use_id| async move {
        assert_eq!(input.tool_name(), Some("Bash"));
        assert_eq!(tool_use_id.as_deref(), Some("toolu_1"));
        Ok(HookOutput::block("rm is not allowed"))
    });
    let mut hooks = BTreeMap::new();
    hooks.insert(HookEvent::PreToolUse, vec![HookMatcher::new("Bash").hook(block)]);
    hooks
}

fn hook_request(request_id: &str, callback_id: &str, tool_name: &str) -> Value {
    inbound(
        request_id,
        json!({
            "subtype": "hook_callback",
            "callback_id": callback_id,
            "input": {
                "hook_event_name": "PreToolUse",
                "session_id": "s1",
                "transcript_path": "/tmp/t",
                "cwd": "/work",
                "tool_name": tool_name,
                "tool_input": {"command": "rm -rf /"}
            },
            "tool_use_id": "toolu_1"
        }),
    )
}

/// A hook callback id routes to the registered callback.
#[tokio::test]
async fn hook_callback_routes_by_id() {
    let (dispatcher, mut agent) = dispatcher(Setup {
        hooks: blocking_bash_hooks(),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(hook_request("in_8", "hook_PreToolUse_0_0", "Bash"))
        .await;

    let payload = expect_success(&agent.next_written().await, "in_8");
    assert_eq!(
        payload,
        json!({"decision": "block", "reason": "rm is not allowed"})
    );
}

/// A tool the matcher does not select passes through with an empty output.
#[tokio::test]
async fn non_matching_tool_passes_through() {
    let (dispatcher, mut agent) = dispatcher(Setup {
        hooks: blocking_bash_hooks(),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(hook_request("in_9", "hook_PreToolUse_0_0", "Write"))
        .await;

    let payload = expect_success(&agent.next_written().await, "in_9");
    assert_eq!(payload, json!({}));
}

/// An unknown callback id is an error response.
#[tokio::test]
async fn unknown_callback_id_is_error() {
    let (dispatcher, mut agent) = dispatcher(Setup {
        hooks: blocking_bash_hooks(),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(hook_request("in_10", "hook_PreToolUse_9_9", "Bash"))
        .await;

    let error = expect_error(&agent.next_written().await, "in_10");
    assert!(error.contains("hook_PreToolUse_9_9"), "got: {error}");
}

/// A session-start hook decodes its input and answers with its output.
#[tokio::test]
async fn session_start_hook_is_answered() {
    let greet = hook_callback(|input, tool_use_id| async move {
        let source = match input {
            HookInput::SessionStart { source, .. } => source,
            other => return Err(AppError::Callback(format!("unexpected input {other:?}"))),
        };
        assert!(tool_use_id.is_none());
        Ok(HookOutput {
            system_message: Some(format!("session {source}")),
            ..HookOutput::default()
        })
    });
    let mut hooks = BTreeMap::new();
    hooks.insert(HookEvent::SessionStart, vec![HookMatcher::any().hook(greet)]);
    let (dispatcher, mut agent) = dispatcher(Setup {
        hooks,
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(inbound(
            "in_ss",
            json!({
                "subtype": "hook_callback",
                "callback_id": "hook_SessionStart_0_0",
                "input": {
                    "hook_event_name": "SessionStart",
                    "session_id": "s1",
                    "transcript_path": "/tmp/t",
                    "cwd": "/work",
                    "source": "startup"
                }
            }),
        ))
        .await;

    let payload = expect_success(&agent.next_written().await, "in_ss");
    assert_eq!(payload, json!({"systemMessage": "session startup"}));
}

/// Malformed hook input is an error response.
#[tokio::test]
async fn malformed_hook_input_is_error() {
    let (dispatcher, mut agent) = dispatcher(Setup {
        hooks: blocking_bash_hooks(),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(inbound(
            "in_11",
            json!({
                "subtype": "hook_callback",
                "callback_id": "hook_PreToolUse_0_0",
                "input": {"hook_event_name": "NotAnEvent"}
            }),
        ))
        .await;

    let error = expect_error(&agent.next_written().await, "in_11");
    assert!(error.contains("malformed hook input"), "got: {error}");
}

// ── MCP requests and malformed requests ──────────────────────────────────────

struct Echo;

impl McpHandler for Echo {
    fn handle(&self, server_name: String, message: Value) -> CallbackFuture<Value> {
        Box::pin(async move {
            Ok(json!({"jsonrpc": "2.0", "id": message["id"], "result": {"server": server_name}}))
        })
    }
}

/// `mcp_message` without a handler is an error response.
#[tokio::test]
async fn mcp_message_without_handler_is_error() {
    let (dispatcher, mut agent) = dispatcher(Setup::default()).await;

    dispatcher
        .handle(inbound(
            "in_12",
            json!({"subtype": "mcp_message", "server_name": "calc", "message": {"id": 1}}),
        ))
        .await;

    let error = expect_error(&agent.next_written().await, "in_12");
    assert!(error.contains("calc"), "got: {error}");
}

/// `mcp_message` replies are wrapped in `mcp_response`.
#[tokio::test]
async fn mcp_message_reply_is_wrapped() {
    let (dispatcher, mut agent) = dispatcher(Setup {
        mcp: Some(Arc::new(Echo)),
        ..Setup::default()
    })
    .await;

    dispatcher
        .handle(inbound(
            "in_13",
            json!({"subtype": "mcp_message", "server_name": "calc", "message": {"jsonrpc": "2.0", "id": 7}}),
        ))
        .await;

    let payload = expect_success(&agent.next_written().await, "in_13");
    assert_eq!(
        payload,
        json!({"mcp_response": {"jsonrpc": "2.0", "id": 7, "result": {"server": "calc"}}})
    );
}

/// An unsupported subtype is answered with an error for the same id.
#[tokio::test]
async fn unsupported_subtype_is_error() {
    let (dispatcher, mut agent) = dispatcher(Setup::default()).await;

    dispatcher
        .handle(inbound("in_14", json!({"subtype": "teleport"})))
        .await;

    let error = expect_error(&agent.next_written().await, "in_14");
    assert!(error.contains("unsupported control_request"), "got: {error}");
}

/// A request without `request_id` cannot be answered and writes nothing.
#[tokio::test]
async fn request_without_id_writes_nothing() {
    let (dispatcher, mut agent) = dispatcher(Setup::default()).await;

    dispatcher
        .handle(json!({"type": "control_request", "request": {"subtype": "can_use_tool"}}))
        .await;

    assert!(agent
        .try_next_written(Duration::from_millis(100))
        .await
        .is_none());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

/// A slow callback does not hold up later requests.
#[tokio::test]
async fn slow_callback_does_not_block_others() {
    let gate = Arc::new(Notify::new());
    let callback = {
        let gate = Arc::clone(&gate);
        can_use_tool(move |tool_name, _, _| {
            let gate = Arc::clone(&gate);
            async move {
                if tool_name == "Slow" {
                    gate.notified().await;
                }
                Ok(PermissionDecision::allow())
            }
        })
    };
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        concurrency: 2,
        ..Setup::default()
    })
    .await;

    let slow = dispatcher.dispatch(inbound(
        "slow",
        json!({"subtype": "can_use_tool", "tool_name": "Slow", "input": {}}),
    ));
    let fast = dispatcher.dispatch(bash_request("fast"));

    let first = agent.next_written().await;
    expect_success(&first, "fast");

    gate.notify_one();
    let second = agent.next_written().await;
    expect_success(&second, "slow");

    slow.await.expect("slow task");
    fast.await.expect("fast task");
}

/// Sets its flag when dropped.
struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Cancelling the session token stops in-flight handlers, drops their
/// callbacks and writes no response.
#[tokio::test]
async fn cancellation_stops_in_flight_callbacks() {
    let started = Arc::new(Notify::new());
    let dropped = Arc::new(AtomicBool::new(false));
    let callback = {
        let started = Arc::clone(&started);
        let dropped = Arc::clone(&dropped);
        can_use_tool(move |_, _, _| {
            let started = Arc::clone(&started);
            let dropped = Arc::clone(&dropped);
            async move {
                let _flag = SetOnDrop(dropped);
                started.notify_one();
                std::future::pending::<()>().await;
                Ok(PermissionDecision::allow())
            }
        })
    };
    let cancel = CancellationToken::new();
    let (dispatcher, mut agent) = dispatcher(Setup {
        can_use_tool: Some(callback),
        cancel: cancel.clone(),
        ..Setup::default()
    })
    .await;

    let task = dispatcher.dispatch(bash_request("stuck"));
    tokio::time::timeout(Duration::from_secs(2), started.notified())
        .await
        .expect("callback started");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("handler stops on cancellation")
        .expect("handler task");

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped.load(Ordering::SeqCst), "callback future was dropped");
    assert!(
        agent
            .try_next_written(Duration::from_millis(100))
            .await
            .is_none(),
        "no response after close"
    );
}

/// Requests dispatched after cancellation are never handled.
#[tokio::test]
async fn dispatch_after_cancellation_writes_nothing() {
    let cancel = CancellationToken::new();
    let (dispatcher, mut agent) = dispatcher(Setup {
        cancel: cancel.clone(),
        ..Setup::default()
    })
    .await;

    cancel.cancel();
    dispatcher
        .dispatch(bash_request("late"))
        .await
        .expect("handler task");

    assert!(agent
        .try_next_written(Duration::from_millis(100))
        .await
        .is_none());
}
