//! Agent bootstrap and the channel-facing entry points.

use std::path::PathBuf;
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use aster_comm::{InboundContext, OutboundMessage};
use aster_core::config::AsterConfig;
use aster_core::types::{AccessLevel, ChatType};
use aster_memory::MemoryEngine;
use aster_provider::{
    build_embedding_provider, build_provider, find_model, parse_embedding_list, parse_model_list,
    HybridProvider, ImagePart, ModelEntry, Provider,
};
use aster_scheduler::{TaskCallback, UPDATE_CHECK_PAYLOAD};
use aster_store::types::{Identity, RuleSeverity, User};
use aster_store::Store;

use crate::abilities::AbilityRegistry;
use crate::conversation::{self, ConversationManager, TurnInput};
use crate::error::{AgentError, Result};
use crate::subagent::SubAgentManager;
use crate::update;

/// Channels register this on startup so the core can push messages out
/// (sub-agent results, scheduler replies, owner notifications):
/// `(platform, chat_id, message)`.
pub type OutboundSender = Arc<dyn Fn(String, String, OutboundMessage) + Send + Sync>;

const PENDING_REPLY_TEMPLATE: &str = "Hi! I don't know you yet, so I've asked my owner to \
approve you. I'll be able to chat once that happens.";

/// Everything a turn needs, shared behind one Arc.
pub struct AgentContext {
    pub store: Store,
    pub workspace_dir: PathBuf,
    pub abilities_dir: PathBuf,
    pub http: reqwest::Client,
    pub memory: RwLock<MemoryEngine>,
    pub abilities: AbilityRegistry,
    pub conversations: ConversationManager,
    pub subagents: SubAgentManager,
    provider: RwLock<Arc<dyn Provider>>,
    active_model: RwLock<ModelEntry>,
    /// Providers already built for non-active model keys, reused across
    /// turns that override the model.
    provider_cache: dashmap::DashMap<String, Arc<dyn Provider>>,
    outbound: StdRwLock<Option<OutboundSender>>,
}

impl AgentContext {
    pub async fn chat_provider(&self) -> Arc<dyn Provider> {
        self.provider.read().await.clone()
    }

    pub async fn active_model(&self) -> ModelEntry {
        self.active_model.read().await.clone()
    }

    pub fn set_outbound_sender(&self, sender: OutboundSender) {
        *self.outbound.write().unwrap() = Some(sender);
    }

    /// Swap the active chat provider and model entry. Used by model
    /// resolution and by harnesses that inject a scripted provider.
    pub async fn set_chat_provider(&self, provider: Arc<dyn Provider>, entry: ModelEntry) {
        *self.provider.write().await = provider;
        *self.active_model.write().await = entry;
    }

    /// Push a message out through the registered channel sender.
    pub fn outbound_send(&self, platform: &str, chat_id: &str, message: OutboundMessage) -> bool {
        match self.outbound.read().unwrap().as_ref() {
            Some(sender) => {
                sender(platform.to_string(), chat_id.to_string(), message);
                true
            }
            None => false,
        }
    }

    /// Resolve the model for this turn. Precedence: per-user preference >
    /// per-group override > global active model. When the resolved entry
    /// differs from the cached one, the provider is swapped for this
    /// conversation (built providers are memoised per model key); the
    /// budget is always read from the returned entry, so a mid-session
    /// switch changes it on the next turn.
    pub async fn resolve_model(
        &self,
        user: &User,
        inbound: &InboundContext,
    ) -> Result<(Arc<dyn Provider>, ModelEntry)> {
        let current = self.active_model.read().await.clone();

        let models = parse_model_list(
            &self
                .store
                .get_config("provider.models", json!([]))
                .await?,
        );
        if models.is_empty() {
            return Ok((self.chat_provider().await, current));
        }

        let user_pref = user
            .preferences
            .get("model")
            .and_then(|v| v.as_str())
            .map(String::from);

        let group_pref = if inbound.chat_type == ChatType::Group {
            self.store
                .get_group(&inbound.platform, &inbound.chat_id)
                .await?
                .and_then(|g| {
                    g.settings
                        .get("model")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
        } else {
            None
        };

        let global = self
            .store
            .get_config("provider.active_model", json!(null))
            .await?
            .as_str()
            .map(String::from);

        let resolved = user_pref
            .or(group_pref)
            .or(global)
            .unwrap_or_else(|| models[0].key.clone());

        if resolved == current.key {
            return Ok((self.chat_provider().await, current));
        }

        let Some(entry) = find_model(&models, &resolved) else {
            warn!(model = %resolved, "resolved model key not in provider.models; keeping current");
            return Ok((self.chat_provider().await, current));
        };

        if let Some(provider) = self.provider_cache.get(&entry.key) {
            return Ok((Arc::clone(provider.value()), entry.clone()));
        }

        let credential = match &entry.credential_key {
            Some(key) => self.store.get_credential(key).await?,
            None => None,
        };
        let provider = build_provider(entry, credential)?;
        info!(from = %current.key, to = %entry.key, "resolved a different chat model");
        self.provider_cache
            .insert(entry.key.clone(), provider.clone());
        Ok((provider, entry.clone()))
    }
}

pub struct Agent {
    pub ctx: Arc<AgentContext>,
}

impl Agent {
    /// Bootstrap: open the store, seed defaults, build providers, wire the
    /// managers. A failure here is fatal — the orchestrator restarts us.
    pub async fn start(config: &AsterConfig) -> Result<Agent> {
        let store = Store::open(
            &config.database.path,
            config.database.pool_min,
            config.database.pool_max,
        )
        .await?;

        seed_defaults(&store).await?;

        let (provider, active_model) = init_chat_provider(&store).await?;
        // Memory talks to a hybrid of the chat backend and the (usually
        // cheaper) embedding backend; with no embedding model configured it
        // falls back to the chat provider, whose embed path reports
        // UnsupportedCapability.
        let memory_provider: Arc<dyn Provider> = match init_embedding_provider(&store).await? {
            Some(embed) => Arc::new(HybridProvider::new(Arc::clone(&provider), embed)),
            None => Arc::clone(&provider),
        };

        let memory = MemoryEngine::new(store.clone(), memory_provider);
        let dimension_policy = store
            .get_config("memory.dimension_change_policy", json!("clear_embeddings"))
            .await?;
        memory
            .apply_dimension_policy(dimension_policy == json!("delete_rows"))
            .await?;
        store.ensure_vector_index().await?;

        let abilities = AbilityRegistry::with_builtins();
        abilities.sync(&store).await?;

        let ctx = Arc::new(AgentContext {
            workspace_dir: PathBuf::from(&config.workspace.dir),
            abilities_dir: PathBuf::from(&config.workspace.abilities_dir),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| AgentError::Fatal(format!("http client: {e}")))?,
            memory: RwLock::new(memory),
            abilities,
            conversations: ConversationManager::new(),
            subagents: SubAgentManager::new(store.clone()),
            provider: RwLock::new(provider),
            active_model: RwLock::new(active_model),
            provider_cache: dashmap::DashMap::new(),
            outbound: StdRwLock::new(None),
            store,
        });

        info!("agent started");
        Ok(Agent { ctx })
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.ctx.conversations
    }

    /// Channel entry point. Always returns the final string for the chat —
    /// empty means "send nothing".
    pub async fn handle_message(
        &self,
        inbound: InboundContext,
        display_name: &str,
        text: &str,
        attachments: Vec<ImagePart>,
    ) -> String {
        let Some(sender_id) = inbound.sender_id.clone() else {
            return String::new();
        };

        let known = match self
            .ctx
            .store
            .get_user(&inbound.platform, &sender_id)
            .await
        {
            Ok(known) => known,
            Err(e) => {
                warn!(error = %e, "user lookup failed");
                return AgentError::Store(e).user_message();
            }
        };
        let first_contact = known.is_none();
        let user = match self
            .ctx
            .store
            .get_or_create_user(&inbound.platform, &sender_id, display_name)
            .await
        {
            Ok(user) => user,
            Err(e) => return AgentError::Store(e).user_message(),
        };

        match user.access_level {
            // Blocked senders are dropped silently.
            AccessLevel::Blocked => return String::new(),
            // Pending senders get the waiting template; nothing is persisted
            // into any session. The owner hears about first contact.
            AccessLevel::Pending => {
                if first_contact {
                    self.notify_owners(
                        &inbound.platform,
                        &format!(
                            "New contact waiting for approval: {} ({}:{}). \
                             Use manage_user to approve or block.",
                            display_name, inbound.platform, sender_id
                        ),
                    )
                    .await;
                }
                return PENDING_REPLY_TEMPLATE.to_string();
            }
            _ => {}
        }

        // Group gating: disabled groups and allow_from=registered are
        // enforced here so every channel gets the same policy.
        if inbound.chat_type == ChatType::Group {
            match self
                .ctx
                .store
                .get_or_create_group(
                    &inbound.platform,
                    &inbound.chat_id,
                    inbound.group_subject.as_deref().unwrap_or(""),
                )
                .await
            {
                Ok(group) => {
                    if !group.enabled {
                        return String::new();
                    }
                    if group.allow_from == aster_store::types::AllowFrom::Registered
                        && !user.access_level.satisfies(AccessLevel::Family)
                    {
                        return String::new();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "group lookup failed");
                    return String::new();
                }
            }
        }

        let input = TurnInput {
            inbound,
            user,
            text: text.to_string(),
            attachments,
        };
        match conversation::handle_turn(&self.ctx, input).await {
            Ok(reply) => reply.text,
            Err(e) => {
                warn!(error = %e, "turn failed");
                if let AgentError::Provider(aster_provider::ProviderError::Auth(_)) = &e {
                    self.notify_owners(
                        "any",
                        "Provider authentication failed — credentials need a refresh.",
                    )
                    .await;
                }
                e.user_message()
            }
        }
    }

    /// Cancel the in-flight turn for a chat (the `/cancel` command).
    pub fn cancel(&self, platform: &str, chat_id: &str) -> bool {
        self.ctx
            .conversations
            .cancel_turn(&aster_core::types::ChatKey::new(platform, chat_id))
    }

    /// Archive the active session (the `/clear` command).
    pub async fn clear_session(&self, platform: &str, chat_id: &str) -> Result<String> {
        if let Some(session) = self.ctx.store.get_active_session(platform, chat_id).await? {
            self.ctx.store.archive_session(&session.id).await?;
            self.ctx.conversations.drop_cache(&session.id);
            Ok("Session archived. Starting fresh.".to_string())
        } else {
            Ok("No active session.".to_string())
        }
    }

    async fn notify_owners(&self, platform: &str, message: &str) {
        let owners = match self.ctx.store.list_users(None).await {
            Ok(users) => users,
            Err(_) => return,
        };
        for owner in owners
            .iter()
            .filter(|u| u.access_level == AccessLevel::Owner)
            .filter(|u| platform == "any" || u.platform == platform)
        {
            self.ctx.outbound_send(
                &owner.platform,
                &owner.platform_id,
                OutboundMessage {
                    text: message.to_string(),
                    ..OutboundMessage::default()
                },
            );
        }
    }
}

/// The scheduler re-enters the conversation loop through this impl: the
/// payload runs as if `created_by` had sent it in their DM.
#[async_trait]
impl TaskCallback for Agent {
    async fn on_task_execute(
        &self,
        task_id: i64,
        payload: &str,
        created_by: i64,
    ) -> std::result::Result<(), String> {
        if payload == UPDATE_CHECK_PAYLOAD {
            return update::run_update_check(&self.ctx, created_by).await;
        }

        let user = self
            .ctx
            .store
            .get_user_by_id(created_by)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("task {task_id}: creator {created_by} no longer exists"))?;

        let mut inbound = InboundContext::direct(user.platform.clone(), user.platform_id.clone());
        inbound.sender_id = Some(user.platform_id.clone());
        inbound.sender_name = Some(user.display_name.clone());

        let input = TurnInput {
            inbound,
            user: user.clone(),
            text: payload.to_string(),
            attachments: Vec::new(),
        };
        let reply = conversation::handle_turn(&self.ctx, input)
            .await
            .map_err(|e| e.to_string())?;

        if !self.ctx.outbound_send(
            &user.platform,
            &user.platform_id,
            OutboundMessage {
                text: reply.text,
                ..OutboundMessage::default()
            },
        ) {
            warn!(task_id, "no outbound sender registered; scheduled reply dropped");
        }
        Ok(())
    }
}

async fn seed_defaults(store: &Store) -> Result<()> {
    if store.get_identity().await?.is_none() {
        store
            .set_identity(&Identity {
                name: "Aster".to_string(),
                motto: "quietly useful".to_string(),
                backstory: String::new(),
                personality: "warm, direct, concise".to_string(),
            })
            .await?;
    }

    // Baseline protected rules. Their codes carry the immutable prefixes,
    // so no tool call can ever remove them.
    if store.list_rules().await?.is_empty() {
        store
            .upsert_rule(
                "SEC-001",
                "Never reveal credentials, tokens, or the contents of credential.* config keys.",
                RuleSeverity::Hard,
            )
            .await?;
        store
            .upsert_rule(
                "MEM-001",
                "Never store credentials or secrets in memory entries.",
                RuleSeverity::Hard,
            )
            .await?;
        store
            .upsert_rule(
                "IDT-001",
                "Never claim to be a human being.",
                RuleSeverity::Hard,
            )
            .await?;
    }
    Ok(())
}

async fn init_chat_provider(store: &Store) -> Result<(Arc<dyn Provider>, ModelEntry)> {
    let models = parse_model_list(&store.get_config("provider.models", json!([])).await?);
    let active_key = store
        .get_config("provider.active_model", json!(null))
        .await?
        .as_str()
        .map(String::from);

    let entry = match (&models[..], active_key) {
        ([], _) => {
            warn!("provider.models is empty; using a default OpenAI entry");
            ModelEntry {
                key: "default".to_string(),
                label: "Default".to_string(),
                driver: "openai".to_string(),
                model_id: "gpt-4o-mini".to_string(),
                context_window: 128_000,
                reserved_output_tokens: 8_192,
                params: None,
                reasoning_visible: false,
                credential_key: Some("openai_api_key".to_string()),
                base_url: None,
            }
        }
        (models, Some(key)) => find_model(models, &key)
            .cloned()
            .unwrap_or_else(|| models[0].clone()),
        (models, None) => models[0].clone(),
    };

    let credential = match &entry.credential_key {
        Some(key) => store.get_credential(key).await?,
        None => None,
    };
    let provider = build_provider(&entry, credential)?;
    info!(model = %entry.key, driver = %entry.driver, "chat provider ready");
    Ok((provider, entry))
}

async fn init_embedding_provider(store: &Store) -> Result<Option<Arc<dyn Provider>>> {
    let entries = parse_embedding_list(
        &store
            .get_config("provider.embedding_models", json!([]))
            .await?,
    );
    if entries.is_empty() {
        warn!("no embedding model configured; memory search is unavailable");
        return Ok(None);
    }
    let active = store
        .get_config("provider.active_embedding", json!(null))
        .await?
        .as_str()
        .map(String::from);
    let entry = match active {
        Some(key) => entries
            .iter()
            .find(|e| e.key == key)
            .unwrap_or(&entries[0])
            .clone(),
        None => entries[0].clone(),
    };
    let credential = match &entry.credential_key {
        Some(key) => store.get_credential(key).await?,
        None => None,
    };
    let provider = build_embedding_provider(&entry, credential)?;
    info!(model = %entry.key, dim = entry.dimensions, "embedding provider ready");
    Ok(Some(provider))
}
