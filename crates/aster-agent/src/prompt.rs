//! System prompt assembly.
//!
//! The prompt is an ordered list of sections, each with a deterministic
//! renderer over store state; the full text is hashed so callers can detect
//! change (provider-side caching keys off the hash). User context is a
//! separate block appended per turn — it is not part of the system prompt.

use sha2::{Digest, Sha256};

use aster_core::types::AccessLevel;
use aster_guard::OWNER_ONLY_TOOLS;
use aster_store::types::{Group, RuleSeverity, User};
use aster_store::Store;

use crate::error::Result;
use crate::registry::ToolRegistry;

#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub text: String,
    /// sha256 of the rendered text, hex-encoded.
    pub hash: String,
}

const PROPOSE_BEFORE_EXECUTE: &str = "\
## Operating policy
Propose before you execute. For anything with side effects — shell commands, \
file writes, configuration changes, outgoing messages — state what you are \
about to do and why before calling the tool. Trivial read-only lookups do not \
need a proposal.";

const FUNCTION_CALLING_DISCIPLINE: &str = "\
## Function calling discipline
Call a tool only when it is needed to answer. Fill every required parameter. \
Never invent tool names or parameters that were not declared. After a tool \
result arrives, use it — do not repeat the same call with the same arguments. \
If a tool returns an error string, explain the problem to the user instead of \
retrying blindly.";

const SOUL_MANAGEMENT: &str = "\
## Soul management
Your soul entries and rules can be edited through the update_soul tool by the \
owner. Rules whose code starts with SEC, MEM, or IDT are protected and can \
never be removed, including by you.";

const MEMORY_BEHAVIOR: &str = "\
## Memory behavior
Store durable facts about people and preferences with memory_store; recall \
with memory_search before saying you do not know something about the user. \
Do not store secrets, credentials, or one-off trivia. Memories in private \
categories are only ever shown to owner and family users.";

const SUBAGENT_DELEGATION: &str = "\
## Delegation
For long-running or parallelisable work, spawn_subagent runs a background \
conversation and reports back here when it finishes. Keep the task \
description self-contained; the sub-agent does not see this conversation.";

const SELF_HEALING: &str = "\
## Self-healing
When a tool fails, read the error, adjust the arguments or approach, and try \
a different way once. If it still fails, tell the user plainly what failed \
and what you tried.";

const CHANNEL_CONFIGURATION: &str = "\
## Channels
You may be reached over several chat platforms. Reply tags \
([[reply_to_current]], [[reply_to:<id>]]) and reaction tags ([[react:<emoji>]]) \
are stripped and handled by the channel. To send a file, put `MEDIA: <path>` \
on its own line; the remaining text becomes the caption.";

/// Assemble the system prompt for one turn.
pub async fn build_system_prompt(
    store: &Store,
    registry: &ToolRegistry,
    access: AccessLevel,
) -> Result<SystemPrompt> {
    let mut sections: Vec<String> = Vec::new();

    sections.push(render_identity(store).await?);
    if let Some(soul) = render_soul(store).await? {
        sections.push(soul);
    }
    if let Some(rules) = render_rules(store).await? {
        sections.push(rules);
    }
    sections.push(PROPOSE_BEFORE_EXECUTE.to_string());
    sections.push(render_tools(registry, access));
    sections.push(FUNCTION_CALLING_DISCIPLINE.to_string());
    sections.push(render_security_rules());
    sections.push(render_ability_status(store).await?);
    sections.push(render_config_snapshot(store).await?);
    sections.push(SOUL_MANAGEMENT.to_string());
    sections.push(MEMORY_BEHAVIOR.to_string());
    sections.push(SUBAGENT_DELEGATION.to_string());
    sections.push(SELF_HEALING.to_string());
    sections.push(CHANNEL_CONFIGURATION.to_string());

    let text = sections.join("\n\n");
    let hash = hex::encode(Sha256::digest(text.as_bytes()));
    Ok(SystemPrompt { text, hash })
}

/// Per-turn user context — appended after the system prompt, never cached.
pub fn build_user_block(user: &User, group: Option<&Group>) -> String {
    let mut out = String::from("## Current user\n");
    out.push_str(&format!(
        "Name: {}\nAccess level: {}\n",
        if user.display_name.is_empty() {
            "(unknown)"
        } else {
            &user.display_name
        },
        user.access_level
    ));
    if let Some(group) = group {
        out.push_str(&format!("Speaking in group: {}\n", group.name));
        let alias = group
            .settings
            .get("members")
            .and_then(|m| m.get(&user.platform_id))
            .and_then(|m| m.get("alias"))
            .and_then(|a| a.as_str());
        if let Some(alias) = alias {
            out.push_str(&format!("Group alias: {alias}\n"));
        }
    }
    out
}

async fn render_identity(store: &Store) -> Result<String> {
    let identity = store.get_identity().await?;
    let mut out = String::from("# Identity\n");
    match identity {
        Some(id) => {
            out.push_str(&format!("You are {}.", id.name));
            if !id.motto.is_empty() {
                out.push_str(&format!(" Motto: {}", id.motto));
            }
            if !id.backstory.is_empty() {
                out.push_str(&format!("\n{}", id.backstory));
            }
            if !id.personality.is_empty() {
                out.push_str(&format!("\nPersonality: {}", id.personality));
            }
        }
        None => out.push_str("You are Aster, a personal assistant."),
    }
    Ok(out)
}

async fn render_soul(store: &Store) -> Result<Option<String>> {
    let entries = store.list_soul().await?;
    if entries.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("## Soul\n");
    let mut current = String::new();
    for entry in entries {
        if entry.category != current {
            out.push_str(&format!("\n### {}\n", entry.category));
            current = entry.category.clone();
        }
        out.push_str(&format!("- {}\n", entry.content));
    }
    Ok(Some(out.trim_end().to_string()))
}

async fn render_rules(store: &Store) -> Result<Option<String>> {
    let rules = store.list_rules().await?;
    if rules.is_empty() {
        return Ok(None);
    }
    let mut out = String::from("## Rules\n");
    for rule in rules {
        let marker = match rule.severity {
            RuleSeverity::Hard => "[hard]",
            RuleSeverity::Soft => "[soft]",
        };
        out.push_str(&format!("- {} {} {}\n", rule.code, marker, rule.content));
    }
    Ok(Some(out.trim_end().to_string()))
}

fn render_tools(registry: &ToolRegistry, access: AccessLevel) -> String {
    let mut out = String::from("## Tools\n");
    let specs = registry.specs_for(access);
    if specs.is_empty() {
        out.push_str("(none available at your access level)");
        return out;
    }
    for spec in specs {
        out.push_str(&format!(
            "### {}\n{}\nParameters: {}\n",
            spec.name, spec.description, spec.parameters
        ));
    }
    out.trim_end().to_string()
}

fn render_security_rules() -> String {
    let mut out = String::from(
        "## Core security rules\nThese tools are owner-only and refuse everyone else, \
         and all of them refuse group chats entirely: ",
    );
    out.push_str(&OWNER_ONLY_TOOLS.join(", "));
    out.push_str(
        ".\nThe enforcement is in code — do not promise these actions to non-owners.",
    );
    out
}

async fn render_ability_status(store: &Store) -> Result<String> {
    let abilities = store.list_abilities().await?;
    let mut out = String::from("## Abilities\n");
    if abilities.is_empty() {
        out.push_str("(none registered)");
        return Ok(out);
    }
    for rec in abilities {
        let state = if rec.enabled { "enabled" } else { "disabled" };
        let configured = if rec.config.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            "configured"
        } else {
            "default config"
        };
        out.push_str(&format!(
            "- {} v{} — {} ({state}, {configured})\n",
            rec.name, rec.version, rec.description
        ));
    }
    Ok(out.trim_end().to_string())
}

async fn render_config_snapshot(store: &Store) -> Result<String> {
    let entries = store.list_configs().await?;
    let mut out = String::from("## Configuration\n");
    if entries.is_empty() {
        out.push_str("(no configuration set)");
        return Ok(out);
    }
    for entry in entries {
        // list_configs already redacts credential values.
        out.push_str(&format!("- {} = {}\n", entry.key, entry.value));
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.db");
        let store = Store::open(path.to_str().unwrap(), 1, 4).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn prompt_is_deterministic_and_hash_tracks_content() {
        let (_dir, store) = test_store().await;
        let registry = ToolRegistry::new(Vec::new());

        let a = build_system_prompt(&store, &registry, AccessLevel::Owner)
            .await
            .unwrap();
        let b = build_system_prompt(&store, &registry, AccessLevel::Owner)
            .await
            .unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.hash, b.hash);

        store
            .upsert_rule("GEN-001", "answer briefly", aster_store::types::RuleSeverity::Soft)
            .await
            .unwrap();
        let c = build_system_prompt(&store, &registry, AccessLevel::Owner)
            .await
            .unwrap();
        assert_ne!(a.hash, c.hash);
        assert!(c.text.contains("GEN-001"));
    }

    #[tokio::test]
    async fn credentials_never_appear_in_prompt() {
        let (_dir, store) = test_store().await;
        store
            .upsert_config(
                "credential.api_key",
                &serde_json::json!("sk-super-secret"),
                "",
            )
            .await
            .unwrap();
        let registry = ToolRegistry::new(Vec::new());
        let prompt = build_system_prompt(&store, &registry, AccessLevel::Owner)
            .await
            .unwrap();
        assert!(!prompt.text.contains("sk-super-secret"));
        assert!(prompt.text.contains("credential.api_key"));
    }

    #[tokio::test]
    async fn section_order_is_stable() {
        let (_dir, store) = test_store().await;
        let registry = ToolRegistry::new(Vec::new());
        let prompt = build_system_prompt(&store, &registry, AccessLevel::Public)
            .await
            .unwrap();

        let identity = prompt.text.find("# Identity").unwrap();
        let policy = prompt.text.find("## Operating policy").unwrap();
        let tools = prompt.text.find("## Tools").unwrap();
        let discipline = prompt.text.find("## Function calling discipline").unwrap();
        let security = prompt.text.find("## Core security rules").unwrap();
        assert!(identity < policy && policy < tools && tools < discipline && discipline < security);
    }
}
