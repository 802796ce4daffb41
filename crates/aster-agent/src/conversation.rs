//! The tool-calling conversation loop for one (platform, chat_id) key.
//!
//! Per-conversation serialization: at most one turn runs at a time per key;
//! later messages queue on the turn lock. A turn streams the model, executes
//! any requested tools, persists every message, and loops until the model
//! stops calling tools or the iteration cap is hit.

use std::sync::{Arc, RwLock as StdRwLock};

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aster_comm::{parse_react_tags, parse_reply_tag, DeliveryCallback, InboundContext, StatusCallback};
use aster_core::types::{AccessLevel, ChatKey, ChatType};
use aster_guard::effective_access;
use aster_provider::{
    ChatMessage, ChatRequest, ImagePart, MessageRole, Provider, StreamEvent, ToolCallStub,
};
use aster_store::types::{MessageRow, NewMessage, Role, Session, User};

use crate::abilities::InboundPayload;
use crate::agent::AgentContext;
use crate::compact;
use crate::error::{AgentError, Result};
use crate::prompt;
use crate::tools::ToolCtx;

/// Default cap on provider/tool iterations within one turn.
const DEFAULT_TOOL_LOOP_MAX: i64 = 10;

/// One inbound turn, channel-agnostic.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub inbound: InboundContext,
    pub user: User,
    pub text: String,
    pub attachments: Vec<ImagePart>,
}

/// The processed reply handed back to the channel. Tags are already
/// extracted; the channel applies outbound processing and splitting.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    pub reply_to: Option<i64>,
    pub reactions: Vec<String>,
    /// Present only when the active model's reasoning is visible.
    pub thinking: Option<String>,
    /// Token usage summed over the turn's provider calls, when reported.
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Per-process conversation state: turn locks, cancellation handles,
/// message caches, and the channel callbacks.
#[derive(Default)]
pub struct ConversationManager {
    turn_locks: DashMap<ChatKey, Arc<Mutex<()>>>,
    cancel_tokens: DashMap<ChatKey, CancellationToken>,
    cache: DashMap<String, Vec<MessageRow>>,
    delivery: StdRwLock<Option<DeliveryCallback>>,
    status: StdRwLock<Option<StatusCallback>>,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_lock(&self, key: &ChatKey) -> Arc<Mutex<()>> {
        self.turn_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Install a fresh cancellation token for a starting turn.
    pub fn begin_turn(&self, key: &ChatKey) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel_tokens.insert(key.clone(), token.clone());
        token
    }

    pub fn end_turn(&self, key: &ChatKey) {
        self.cancel_tokens.remove(key);
    }

    /// Cancel the in-flight turn for a chat, if any. Already-executed tool
    /// side effects are not rolled back.
    pub fn cancel_turn(&self, key: &ChatKey) -> bool {
        match self.cancel_tokens.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the in-memory transcript cache (after compaction or /clear).
    pub fn drop_cache(&self, session_id: &str) {
        self.cache.remove(session_id);
    }

    pub fn cached(&self, session_id: &str) -> Option<Vec<MessageRow>> {
        self.cache.get(session_id).map(|rows| rows.clone())
    }

    pub fn put_cache(&self, session_id: &str, rows: Vec<MessageRow>) {
        self.cache.insert(session_id.to_string(), rows);
    }

    pub fn set_delivery_callback(&self, cb: DeliveryCallback) {
        *self.delivery.write().unwrap() = Some(cb);
    }

    pub fn set_status_callback(&self, cb: StatusCallback) {
        *self.status.write().unwrap() = Some(cb);
    }

    /// Best-effort status line to the session's channel.
    pub fn notify_status(&self, session_id: &str, message: &str) {
        if let Some(cb) = self.status.read().unwrap().as_ref() {
            cb(session_id.to_string(), message.to_string());
        }
    }

    /// Forward a sub-agent result to the chat that spawned it.
    pub fn deliver(&self, message: &str, parent_session_id: &str) -> bool {
        match self.delivery.read().unwrap().as_ref() {
            Some(cb) => {
                cb(message.to_string(), parent_session_id.to_string());
                true
            }
            None => false,
        }
    }
}

/// Run one full turn, serialized per conversation key.
pub async fn handle_turn(ctx: &Arc<AgentContext>, input: TurnInput) -> Result<AgentReply> {
    let key = ChatKey::new(&input.inbound.platform, &input.inbound.chat_id);
    let lock = ctx.conversations.turn_lock(&key);
    let _guard = lock.lock().await;

    let cancel = ctx.conversations.begin_turn(&key);
    let result = run_turn(ctx, &input, &cancel).await;
    ctx.conversations.end_turn(&key);

    // A failed turn may have persisted rows the cache never saw — drop it
    // so the next turn re-reads the authoritative transcript.
    if result.is_err() {
        if let Ok(Some(session)) = ctx
            .store
            .get_active_session(&key.platform, &key.chat_id)
            .await
        {
            ctx.conversations.drop_cache(&session.id);
        }
    }
    result
}

async fn run_turn(
    ctx: &Arc<AgentContext>,
    input: &TurnInput,
    cancel: &CancellationToken,
) -> Result<AgentReply> {
    // 1. Resolve the model for this turn (user > group > global); the
    //    provider is swapped for this conversation when it changed.
    let (provider, model) = ctx.resolve_model(&input.user, &input.inbound).await?;

    // 2. Session.
    let session = ctx
        .store
        .active_session(&input.inbound.platform, &input.inbound.chat_id)
        .await?;

    let access = effective_access(
        input.user.access_level,
        input.inbound.chat_type == ChatType::Group,
    );

    // 3. Budget check — compact before this turn's model call if heavy.
    if let Err(e) = compact::compact_if_needed(ctx, &session).await {
        warn!(session = %session.id, error = %e, "compaction failed; continuing uncompacted");
    }

    let registry = crate::tools::build::build_registry(ctx).await?;
    let tcx = ToolCtx {
        agent: Arc::clone(ctx),
        caller: input.user.clone(),
        effective_access: access,
        session_id: session.id.clone(),
        chat: ChatKey::new(&input.inbound.platform, &input.inbound.chat_id),
        inbound: input.inbound.clone(),
    };

    // 4. Ability pre-processing for non-text inputs.
    let mut derived_text = None;
    for attachment in &input.attachments {
        let payload = InboundPayload::Image(attachment.clone());
        if let Some(text) = ctx
            .abilities
            .pre_process(&ctx.store, &payload, &tcx)
            .await
        {
            derived_text = Some(text);
            break;
        }
    }

    // 5. Persist the user message — original text verbatim; the context
    //    prefix is applied only to what the model sees this turn.
    let mut metadata = json!({});
    if !input.attachments.is_empty() {
        metadata["attachments"] = json!(input.attachments.len());
    }
    let user_msg_id = ctx
        .store
        .append_message(
            &session.id,
            &NewMessage {
                role: Role::User,
                content: input.text.clone(),
                tool_call_id: None,
                tool_name: None,
                tool_args: None,
                metadata,
            },
        )
        .await?;
    ctx.conversations.drop_cache(&session.id);

    let prefix = aster_comm::build_user_context_prefix(&input.inbound);
    let turn_user_text = match &derived_text {
        Some(derived) if input.text.is_empty() => derived.clone(),
        Some(derived) => format!("{}\n\n{}", input.text, derived),
        None => input.text.clone(),
    };

    // 6–7. The provider / tool-dispatch loop.
    let tool_loop_max = ctx
        .store
        .get_config("tool_loop_max", json!(DEFAULT_TOOL_LOOP_MAX))
        .await?
        .as_i64()
        .unwrap_or(DEFAULT_TOOL_LOOP_MAX);

    let mut history = load_history(ctx, &session).await?;
    let mut thinking_acc = String::new();
    let mut iterations = 0i64;
    let mut tokens_in = 0u32;
    let mut tokens_out = 0u32;

    loop {
        let system = prompt::build_system_prompt(&ctx.store, &registry, access).await?;
        let group = match input.inbound.chat_type {
            ChatType::Group => {
                ctx.store
                    .get_group(&input.inbound.platform, &input.inbound.chat_id)
                    .await?
            }
            ChatType::Direct => None,
        };
        let user_block = prompt::build_user_block(&input.user, group.as_ref());
        let system_text = format!("{}\n\n{}", system.text, user_block);

        let messages = render_messages(&history, user_msg_id, &prefix, &turn_user_text);
        let params = model.params.clone().unwrap_or_default();
        let req = ChatRequest {
            model: model.model_id.clone(),
            system: system_text,
            messages,
            tools: registry.specs_for(access),
            params,
        };

        let accum = stream_once(Arc::clone(&provider), &req, cancel).await?;
        if !accum.thinking.is_empty() {
            thinking_acc.push_str(&accum.thinking);
        }
        if let Some((i, o)) = accum.usage {
            tokens_in += i;
            tokens_out += o;
        }

        if accum.calls.is_empty() {
            // 8. Final text: persist and post-process tags.
            if accum.text.trim().is_empty() {
                return Err(AgentError::Provider(
                    aster_provider::ProviderError::EmptyResponse,
                ));
            }
            let assistant_id = ctx
                .store
                .append_message(&session.id, &NewMessage::text(Role::Assistant, &accum.text))
                .await?;
            debug!(session = %session.id, assistant_id, "turn complete");
            ctx.conversations.drop_cache(&session.id);

            let (text, reply_to) = parse_reply_tag(&accum.text, input.inbound.message_id);
            let (text, reactions) = parse_react_tags(&text);
            return Ok(AgentReply {
                text,
                reply_to,
                reactions,
                thinking: if model.reasoning_visible && !thinking_acc.is_empty() {
                    Some(thinking_acc)
                } else {
                    None
                },
                input_tokens: tokens_in,
                output_tokens: tokens_out,
            });
        }

        // 7a. Persist the assistant message with its tool-call stubs.
        let stubs: Vec<ToolCallStub> = accum
            .calls
            .iter()
            .map(|c| ToolCallStub {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.parsed_args(),
            })
            .collect();
        let assistant_row = NewMessage {
            role: Role::Assistant,
            content: accum.text.clone(),
            tool_call_id: None,
            tool_name: None,
            tool_args: None,
            metadata: json!({ "tool_calls": stubs }),
        };
        let assistant_id = ctx.store.append_message(&session.id, &assistant_row).await?;
        history.push(row_from_new(assistant_id, &session.id, assistant_row));

        // 7b. Dispatch each call and persist its result.
        for call in &accum.calls {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let args = call.parsed_args();
            info!(tool = %call.name, session = %session.id, "tool call");
            let result = registry.dispatch(&call.name, args.clone(), &tcx).await;
            let tool_row = NewMessage {
                role: Role::Tool,
                content: result,
                tool_call_id: Some(call.id.clone()),
                tool_name: Some(call.name.clone()),
                tool_args: Some(args),
                metadata: json!({}),
            };
            let tool_id = ctx.store.append_message(&session.id, &tool_row).await?;
            history.push(row_from_new(tool_id, &session.id, tool_row));
        }

        // 7c. Iteration cap.
        iterations += 1;
        if iterations >= tool_loop_max {
            warn!(session = %session.id, iterations, "tool loop exceeded");
            let err_row = NewMessage {
                role: Role::Tool,
                content: "Error: tool loop exceeded".to_string(),
                tool_call_id: None,
                tool_name: None,
                tool_args: None,
                metadata: json!({}),
            };
            let err_id = ctx.store.append_message(&session.id, &err_row).await?;
            history.push(row_from_new(err_id, &session.id, err_row));
            // One last model pass without tools to produce a closing reply.
            let system = prompt::build_system_prompt(&ctx.store, &registry, access).await?;
            let messages = render_messages(&history, user_msg_id, &prefix, &turn_user_text);
            let req = ChatRequest {
                model: model.model_id.clone(),
                system: system.text,
                messages,
                tools: Vec::new(),
                params: model.params.clone().unwrap_or_default(),
            };
            let final_accum = stream_once(Arc::clone(&provider), &req, cancel).await?;
            let text = if final_accum.text.trim().is_empty() {
                "I hit my tool-call limit before finishing. Please try again.".to_string()
            } else {
                final_accum.text
            };
            ctx.store
                .append_message(&session.id, &NewMessage::text(Role::Assistant, &text))
                .await?;
            ctx.conversations.drop_cache(&session.id);
            let (text, reply_to) = parse_reply_tag(&text, input.inbound.message_id);
            let (text, reactions) = parse_react_tags(&text);
            return Ok(AgentReply {
                text,
                reply_to,
                reactions,
                thinking: None,
                input_tokens: tokens_in,
                output_tokens: tokens_out,
            });
        }
    }
}

async fn load_history(ctx: &Arc<AgentContext>, session: &Session) -> Result<Vec<MessageRow>> {
    if let Some(rows) = ctx.conversations.cached(&session.id) {
        return Ok(rows);
    }
    let rows = ctx.store.list_messages(&session.id).await?;
    ctx.conversations.put_cache(&session.id, rows.clone());
    Ok(rows)
}

/// Map transcript rows to provider messages. The untrusted context prefix
/// and any ability-derived text apply only to the triggering user message of
/// this turn — the stored row keeps the user's original text.
fn render_messages(
    history: &[MessageRow],
    current_user_msg_id: i64,
    prefix: &str,
    turn_user_text: &str,
) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len());
    for row in history {
        match row.role {
            Role::System => continue,
            Role::User => {
                if row.id == current_user_msg_id {
                    out.push(ChatMessage::text(
                        MessageRole::User,
                        format!("{prefix}\n{turn_user_text}"),
                    ));
                } else {
                    out.push(ChatMessage::text(MessageRole::User, row.content.clone()));
                }
            }
            Role::Assistant => {
                let mut msg = ChatMessage::text(MessageRole::Assistant, row.content.clone());
                if let Some(calls) = row.metadata.get("tool_calls") {
                    if let Ok(stubs) = serde_json::from_value::<Vec<ToolCallStub>>(calls.clone()) {
                        msg.tool_calls = stubs;
                    }
                }
                out.push(msg);
            }
            Role::Tool => {
                let id = row.tool_call_id.clone().unwrap_or_default();
                out.push(ChatMessage::tool_result(id, row.content.clone()));
            }
        }
    }
    out
}

fn row_from_new(id: i64, session_id: &str, msg: NewMessage) -> MessageRow {
    MessageRow {
        id,
        session_id: session_id.to_string(),
        role: msg.role,
        content: msg.content,
        tool_call_id: msg.tool_call_id,
        tool_name: msg.tool_name,
        tool_args: msg.tool_args,
        metadata: msg.metadata,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

// ---------------------------------------------------------------------------
// Stream consumption
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct StreamAccum {
    pub text: String,
    pub thinking: String,
    pub calls: Vec<AccumCall>,
    pub usage: Option<(u32, u32)>,
}

pub(crate) struct AccumCall {
    pub id: String,
    pub name: String,
    pub args_buf: String,
}

impl AccumCall {
    pub fn parsed_args(&self) -> serde_json::Value {
        if self.args_buf.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(&self.args_buf).unwrap_or(json!({}))
    }
}

impl StreamAccum {
    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Text { delta } => self.text.push_str(&delta),
            StreamEvent::Thinking { delta } => self.thinking.push_str(&delta),
            StreamEvent::ToolCallStart { id, name } => self.calls.push(AccumCall {
                id,
                name,
                args_buf: String::new(),
            }),
            StreamEvent::ToolCallArgsDelta { id, json_fragment } => {
                if let Some(call) = self.calls.iter_mut().rev().find(|c| c.id == id) {
                    call.args_buf.push_str(&json_fragment);
                }
            }
            StreamEvent::ToolCallEnd { .. } => {}
            StreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
            } => self.usage = Some((input_tokens, output_tokens)),
            StreamEvent::Done => {}
        }
    }
}

/// Consume one full chat stream, honouring cancellation. Partial results on
/// cancellation are discarded, not persisted.
pub(crate) async fn stream_once(
    provider: Arc<dyn Provider>,
    req: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<StreamAccum> {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let req = req.clone();
    let call = tokio::spawn(async move { provider.chat_stream(&req, tx).await });

    let mut accum = StreamAccum::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                call.abort();
                return Err(AgentError::Cancelled);
            }
            event = rx.recv() => match event {
                Some(event) => accum.apply(event),
                None => break,
            }
        }
    }

    match call.await {
        Ok(Ok(())) => Ok(accum),
        Ok(Err(e)) => Err(AgentError::Provider(e)),
        Err(_) => Err(AgentError::Cancelled),
    }
}

/// Convenience: run a single prompt→text request (no tools). Used by the
/// compactor and the vision pre-processor.
pub(crate) async fn collect_text(
    provider: Arc<dyn Provider>,
    req: &ChatRequest,
) -> std::result::Result<String, aster_provider::ProviderError> {
    let cancel = CancellationToken::new();
    match stream_once(provider, req, &cancel).await {
        Ok(accum) => Ok(accum.text),
        Err(AgentError::Provider(e)) => Err(e),
        Err(_) => Err(aster_provider::ProviderError::Unavailable(
            "stream interrupted".to_string(),
        )),
    }
}

/// Access gate used by callers that need to know how a user's message will
/// be treated before running a turn.
pub fn turn_access(user: &User, inbound: &InboundContext) -> AccessLevel {
    effective_access(user.access_level, inbound.chat_type == ChatType::Group)
}
