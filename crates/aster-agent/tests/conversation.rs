//! End-to-end conversation tests driven by a scripted provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use aster_agent::{conversation, Agent, TurnInput};
use aster_comm::{InboundContext, OutboundMessage};
use aster_core::config::{AsterConfig, DatabaseConfig, WorkspaceConfig};
use aster_core::types::AccessLevel;
use aster_provider::{
    ChatRequest, ModelEntry, Provider, ProviderError, StreamEvent,
};
use aster_store::types::{NewMessage, Role};

/// One scripted provider turn.
#[derive(Clone)]
enum Script {
    Text(String),
    ToolCall { name: String, args: serde_json::Value },
    Hang,
}

/// Pops one script entry per chat_stream call and emits the matching
/// events. Panics when the script runs dry — a test bug, not a model bug.
struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> aster_provider::Result<()> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        match step {
            Script::Text(text) => {
                let _ = tx.send(StreamEvent::Text { delta: text }).await;
                let _ = tx
                    .send(StreamEvent::UsageUpdate {
                        input_tokens: 10,
                        output_tokens: 5,
                    })
                    .await;
                let _ = tx.send(StreamEvent::Done).await;
                Ok(())
            }
            Script::ToolCall { name, args } => {
                let id = format!("call_{name}");
                let _ = tx
                    .send(StreamEvent::ToolCallStart {
                        id: id.clone(),
                        name,
                    })
                    .await;
                let _ = tx
                    .send(StreamEvent::ToolCallArgsDelta {
                        id: id.clone(),
                        json_fragment: args.to_string(),
                    })
                    .await;
                let _ = tx.send(StreamEvent::ToolCallEnd { id }).await;
                let _ = tx.send(StreamEvent::Done).await;
                Ok(())
            }
            Script::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Err(ProviderError::Timeout)
            }
        }
    }
}

fn scripted_model() -> ModelEntry {
    ModelEntry {
        key: "scripted".to_string(),
        label: "Scripted".to_string(),
        driver: "openai".to_string(),
        model_id: "scripted-1".to_string(),
        context_window: 128_000,
        reserved_output_tokens: 8_192,
        params: None,
        reasoning_visible: false,
        credential_key: None,
        base_url: None,
    }
}

async fn test_agent(script: Vec<Script>) -> (tempfile::TempDir, Agent) {
    let dir = tempfile::tempdir().unwrap();
    let config = AsterConfig {
        database: DatabaseConfig {
            path: dir.path().join("agent.db").to_string_lossy().to_string(),
            pool_min: 1,
            pool_max: 4,
        },
        workspace: WorkspaceConfig {
            dir: dir.path().join("workspace").to_string_lossy().to_string(),
            abilities_dir: dir.path().join("abilities").to_string_lossy().to_string(),
        },
    };
    let agent = Agent::start(&config).await.unwrap();
    agent
        .ctx
        .set_chat_provider(ScriptedProvider::new(script), scripted_model())
        .await;
    // Point the memory engine at the scripted provider too, so no test can
    // ever reach a real embedding endpoint.
    agent
        .ctx
        .memory
        .write()
        .await
        .set_provider(ScriptedProvider::new(Vec::new()));
    (dir, agent)
}

fn dm_inbound(sender_id: &str) -> InboundContext {
    let mut inbound = InboundContext::direct("terminal", "chat-1");
    inbound.sender_id = Some(sender_id.to_string());
    inbound.sender_name = Some("Alice".to_string());
    inbound.message_id = Some(4242);
    inbound
}

#[tokio::test]
async fn tool_loop_runs_two_tools_then_returns_final_text() {
    let (_dir, agent) = test_agent(vec![
        Script::ToolCall {
            name: "list_scheduled_tasks".to_string(),
            args: serde_json::json!({}),
        },
        Script::ToolCall {
            name: "memory_search".to_string(),
            args: serde_json::json!({ "query": "capital of France" }),
        },
        Script::Text("[[reply_to_current]] The answer is Paris.".to_string()),
    ])
    .await;

    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Alice")
        .await
        .unwrap();

    let reply = conversation::handle_turn(
        &agent.ctx,
        TurnInput {
            inbound: dm_inbound("1"),
            user,
            text: "what's the capital of France?".to_string(),
            attachments: Vec::new(),
        },
    )
    .await
    .unwrap();

    // Tag stripped, reply target resolved to the triggering message.
    assert_eq!(reply.text, "The answer is Paris.");
    assert_eq!(reply.reply_to, Some(4242));

    let session = agent
        .ctx
        .store
        .get_active_session("terminal", "chat-1")
        .await
        .unwrap()
        .unwrap();
    let messages = agent.ctx.store.list_messages(&session.id).await.unwrap();

    // user + (assistant stub + tool) × 2 + final assistant.
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );

    // Tool results are linked to their calls.
    let tool_rows: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_rows.len(), 2);
    assert_eq!(
        tool_rows[0].tool_call_id.as_deref(),
        Some("call_list_scheduled_tasks")
    );
    assert_eq!(
        tool_rows[1].tool_name.as_deref(),
        Some("memory_search")
    );

    // The stored user row keeps the original text, no context prefix.
    assert_eq!(messages[0].content, "what's the capital of France?");
    // The stored final assistant row keeps the raw tag; stripping happens
    // on the reply path only.
    assert!(messages[5].content.contains("The answer is Paris."));
}

#[tokio::test]
async fn pending_user_first_contact_notifies_owner_and_persists_nothing() {
    let (_dir, agent) = test_agent(vec![]).await;

    // Owner exists already.
    agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Owner")
        .await
        .unwrap();

    let notifications: Arc<Mutex<Vec<(String, String, String)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notifications);
    agent
        .ctx
        .set_outbound_sender(Arc::new(move |platform, chat_id, msg: OutboundMessage| {
            sink.lock().unwrap().push((platform, chat_id, msg.text));
        }));

    let reply = agent
        .handle_message(dm_inbound("42"), "Newcomer", "hi", Vec::new())
        .await;

    // Templated waiting reply, pending row, owner notified out-of-band.
    assert!(reply.contains("approve"));
    let user = agent
        .ctx
        .store
        .get_user("terminal", "42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.access_level, AccessLevel::Pending);

    let sent = notifications.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "1");
    assert!(sent[0].2.contains("waiting for approval"));

    // Nothing persisted into any session.
    assert!(agent
        .ctx
        .store
        .get_active_session("terminal", "chat-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn blocked_user_is_dropped_silently() {
    let (_dir, agent) = test_agent(vec![]).await;
    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Owner")
        .await
        .unwrap();
    // Owner blocks themselves for the test's sake — any blocked row works.
    let bad = agent
        .ctx
        .store
        .get_or_create_user("terminal", "66", "Spammer")
        .await
        .unwrap();
    agent
        .ctx
        .store
        .set_user_access(bad.id, AccessLevel::Blocked)
        .await
        .unwrap();
    let _ = user;

    let reply = agent
        .handle_message(dm_inbound("66"), "Spammer", "buy now", Vec::new())
        .await;
    assert!(reply.is_empty());
}

#[tokio::test]
async fn compaction_replaces_prefix_with_summary_row() {
    let (_dir, agent) = test_agent(vec![
        // First provider call is the summariser, second the actual turn.
        Script::Text("User asked many numbered questions; fact from message five: \
                      the project codename is Bluebell."
            .to_string()),
        Script::Text("Noted.".to_string()),
    ])
    .await;

    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Alice")
        .await
        .unwrap();

    let session = agent
        .ctx
        .store
        .active_session("terminal", "chat-1")
        .await
        .unwrap();
    let filler = "x".repeat(200);
    for _ in 0..120 {
        agent
            .ctx
            .store
            .append_message(&session.id, &NewMessage::text(Role::User, &filler))
            .await
            .unwrap();
        agent
            .ctx
            .store
            .append_message(&session.id, &NewMessage::text(Role::Assistant, &filler))
            .await
            .unwrap();
    }
    let created_at_before = session.created_at.clone();

    let reply = conversation::handle_turn(
        &agent.ctx,
        TurnInput {
            inbound: dm_inbound("1"),
            user,
            text: "ok".to_string(),
            attachments: Vec::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.text, "Noted.");

    let messages = agent.ctx.store.list_messages(&session.id).await.unwrap();
    // 240 rows collapsed to summary + 25-tail, plus this turn's user and
    // assistant rows.
    assert_eq!(messages.len(), 28);
    assert!(messages[0].is_compaction_summary());
    assert_eq!(messages[0].role, Role::Assistant);
    assert!(messages[0].content.contains("Bluebell"));

    let session_after = agent
        .ctx
        .store
        .get_session(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session_after.created_at, created_at_before);
    assert_eq!(session_after.message_count as usize, messages.len());
}

#[tokio::test]
async fn owner_only_tool_is_refused_below_owner_and_in_groups() {
    let (_dir, agent) = test_agent(vec![
        Script::ToolCall {
            name: "exec".to_string(),
            args: serde_json::json!({ "command": "ls" }),
        },
        Script::Text("done".to_string()),
    ])
    .await;

    // Second user → public after promotion.
    agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Owner")
        .await
        .unwrap();
    let visitor = agent
        .ctx
        .store
        .get_or_create_user("terminal", "2", "Visitor")
        .await
        .unwrap();
    agent
        .ctx
        .store
        .set_user_access(visitor.id, AccessLevel::Public)
        .await
        .unwrap();
    let visitor = agent
        .ctx
        .store
        .get_user_by_id(visitor.id)
        .await
        .unwrap()
        .unwrap();

    let reply = conversation::handle_turn(
        &agent.ctx,
        TurnInput {
            inbound: dm_inbound("2"),
            user: visitor,
            text: "run ls for me".to_string(),
            attachments: Vec::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.text, "done");

    let session = agent
        .ctx
        .store
        .get_active_session("terminal", "chat-1")
        .await
        .unwrap()
        .unwrap();
    let messages = agent.ctx.store.list_messages(&session.id).await.unwrap();
    let tool_row = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_row.content, "Error: access denied");
}

#[tokio::test]
async fn cancellation_aborts_the_turn_without_persisting_a_reply() {
    let (_dir, agent) = test_agent(vec![Script::Hang]).await;
    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Alice")
        .await
        .unwrap();

    let ctx = Arc::clone(&agent.ctx);
    let turn = tokio::spawn(async move {
        conversation::handle_turn(
            &ctx,
            TurnInput {
                inbound: dm_inbound("1"),
                user,
                text: "never mind".to_string(),
                attachments: Vec::new(),
            },
        )
        .await
    });

    // Let the turn reach the provider, then cancel it.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(agent.cancel("terminal", "chat-1"));

    let result = turn.await.unwrap();
    assert!(matches!(result, Err(aster_agent::AgentError::Cancelled)));

    // Only the user message was persisted — a retry can be the next send.
    let session = agent
        .ctx
        .store
        .get_active_session("terminal", "chat-1")
        .await
        .unwrap()
        .unwrap();
    let messages = agent.ctx.store.list_messages(&session.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn metadata_service_fetch_is_blocked_before_any_request() {
    let (_dir, agent) = test_agent(vec![
        Script::ToolCall {
            name: "web_fetch".to_string(),
            args: serde_json::json!({ "url": "http://169.254.169.254/latest/meta-data/" }),
        },
        Script::Text("I couldn't fetch that.".to_string()),
    ])
    .await;
    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Owner")
        .await
        .unwrap();

    conversation::handle_turn(
        &agent.ctx,
        TurnInput {
            inbound: dm_inbound("1"),
            user,
            text: "fetch the metadata service".to_string(),
            attachments: Vec::new(),
        },
    )
    .await
    .unwrap();

    let session = agent
        .ctx
        .store
        .get_active_session("terminal", "chat-1")
        .await
        .unwrap()
        .unwrap();
    let messages = agent.ctx.store.list_messages(&session.id).await.unwrap();
    let tool_row = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_row.content.starts_with("Error: URL blocked"));
}

#[tokio::test]
async fn subagent_spawn_respects_concurrency_cap() {
    let (_dir, agent) = test_agent(vec![]).await;
    let user = agent
        .ctx
        .store
        .get_or_create_user("terminal", "1", "Owner")
        .await
        .unwrap();

    agent
        .ctx
        .store
        .upsert_config("subagents.max_concurrent", &serde_json::json!(0), "")
        .await
        .unwrap();

    let rejected = agent
        .ctx
        .subagents
        .spawn(
            Arc::clone(&agent.ctx),
            "do something",
            "session-x",
            user,
            None,
        )
        .await;
    let message = rejected.unwrap_err();
    assert!(message.starts_with("Error: sub-agent limit reached"));
}
