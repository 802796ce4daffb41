//! Owner-only administration tools: config, abilities, soul/rules, users,
//! groups. All of these sit on the owner-only list and are unreachable from
//! group chats.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use aster_core::types::AccessLevel;
use aster_guard::check_rule_removal;
use aster_store::types::{AllowFrom, RuleSeverity};
use aster_store::StoreError;

use super::{arg_str, arg_str_opt, ToolCtx, ToolEntry, ToolError, ToolHandler};

// ---------------------------------------------------------------------------
// update_config
// ---------------------------------------------------------------------------

pub fn update_config_entry() -> ToolEntry {
    ToolEntry {
        name: "update_config".to_string(),
        description: "Read, set or delete configuration keys. Credential values are \
                      never shown."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "description": "get | set | delete | list" },
                "key": { "type": "string", "description": "Dotted config key" },
                "value": { "type": "string", "description": "JSON value for 'set'" }
            },
            "required": ["action"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(UpdateConfig),
    }
}

struct UpdateConfig;

#[async_trait]
impl ToolHandler for UpdateConfig {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let action = arg_str(&args, "action")?;
        let store = &ctx.agent.store;

        match action {
            "list" => {
                let entries = store
                    .list_configs()
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                if entries.is_empty() {
                    return Ok("No configuration set.".to_string());
                }
                let mut out = String::new();
                for entry in entries {
                    out.push_str(&format!("{} = {}\n", entry.key, entry.value));
                }
                Ok(out.trim_end().to_string())
            }
            "get" => {
                let key = arg_str(&args, "key")?;
                if key.starts_with(aster_store::CREDENTIAL_PREFIX) {
                    return Ok("Error: credential values are never shown".to_string());
                }
                let value = store
                    .get_config(key, json!(null))
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("{key} = {value}"))
            }
            "set" => {
                let key = arg_str(&args, "key")?;
                let raw = arg_str(&args, "value")?;
                let value: Value =
                    serde_json::from_str(raw).unwrap_or_else(|_| json!(raw));
                store
                    .upsert_config(key, &value, "")
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                if key.starts_with(aster_store::CREDENTIAL_PREFIX) {
                    Ok(format!("Set {key} (value hidden)."))
                } else {
                    Ok(format!("Set {key} = {value}"))
                }
            }
            "delete" => {
                let key = arg_str(&args, "key")?;
                let deleted = store
                    .delete_config(key)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(if deleted {
                    format!("Deleted {key}.")
                } else {
                    format!("No config key {key}.")
                })
            }
            other => Err(ToolError::BadArgs(format!("unknown action '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// update_ability
// ---------------------------------------------------------------------------

pub fn update_ability_entry() -> ToolEntry {
    ToolEntry {
        name: "update_ability".to_string(),
        description: "Enable, disable or configure an ability.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "description": "enable | disable | configure | list" },
                "name": { "type": "string", "description": "Ability name" },
                "config": { "type": "string", "description": "JSON config for 'configure'" }
            },
            "required": ["action"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(UpdateAbility),
    }
}

struct UpdateAbility;

#[async_trait]
impl ToolHandler for UpdateAbility {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let action = arg_str(&args, "action")?;
        let store = &ctx.agent.store;

        match action {
            "list" => {
                let abilities = store
                    .list_abilities()
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                if abilities.is_empty() {
                    return Ok("No abilities registered.".to_string());
                }
                let mut out = String::new();
                for rec in abilities {
                    out.push_str(&format!(
                        "{} v{} [{}] — {}\n",
                        rec.name,
                        rec.version,
                        if rec.enabled { "enabled" } else { "disabled" },
                        rec.description
                    ));
                }
                Ok(out.trim_end().to_string())
            }
            "enable" | "disable" => {
                let name = arg_str(&args, "name")?;
                let enabled = action == "enable";
                match store.set_ability_enabled(name, enabled).await {
                    Ok(()) => Ok(format!("Ability '{name}' {action}d.")),
                    Err(StoreError::NotFound { .. }) => {
                        Ok(format!("Error: no ability named '{name}'"))
                    }
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            "configure" => {
                let name = arg_str(&args, "name")?;
                let raw = arg_str(&args, "config")?;
                let config: Value = serde_json::from_str(raw)
                    .map_err(|e| ToolError::BadArgs(format!("config is not valid JSON: {e}")))?;
                match store.set_ability_config(name, &config).await {
                    Ok(()) => Ok(format!("Ability '{name}' configured.")),
                    Err(StoreError::NotFound { .. }) => {
                        Ok(format!("Error: no ability named '{name}'"))
                    }
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            other => Err(ToolError::BadArgs(format!("unknown action '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// update_soul
// ---------------------------------------------------------------------------

pub fn update_soul_entry() -> ToolEntry {
    ToolEntry {
        name: "update_soul".to_string(),
        description: "Edit identity, soul entries, and rules. Rules with SEC/MEM/IDT \
                      codes are protected and cannot be removed or edited."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "description": "identity | soul | rule" },
                "action": { "type": "string", "description": "add | remove | set" },
                "key": {
                    "type": "string",
                    "description": "Soul category, rule code, or identity field"
                },
                "value": { "type": "string", "description": "Content" },
                "severity": { "type": "string", "description": "hard | soft (rules only)" }
            },
            "required": ["target", "action"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(UpdateSoul),
    }
}

struct UpdateSoul;

#[async_trait]
impl ToolHandler for UpdateSoul {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let target = arg_str(&args, "target")?;
        let action = arg_str(&args, "action")?;
        let store = &ctx.agent.store;

        match (target, action) {
            ("identity", "set") => {
                let field = arg_str(&args, "key")?;
                let value = arg_str(&args, "value")?;
                let mut identity = store
                    .get_identity()
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?
                    .unwrap_or(aster_store::types::Identity {
                        name: "Aster".to_string(),
                        motto: String::new(),
                        backstory: String::new(),
                        personality: String::new(),
                    });
                match field {
                    "name" => identity.name = value.to_string(),
                    "motto" => identity.motto = value.to_string(),
                    "backstory" => identity.backstory = value.to_string(),
                    "personality" => identity.personality = value.to_string(),
                    other => {
                        return Err(ToolError::BadArgs(format!("unknown identity field '{other}'")))
                    }
                }
                store
                    .set_identity(&identity)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("Identity {field} updated."))
            }
            ("soul", "add") => {
                let category = arg_str_opt(&args, "key").unwrap_or("general");
                let content = arg_str(&args, "value")?;
                let id = store
                    .add_soul_entry(category, content)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("Soul entry #{id} added under '{category}'."))
            }
            ("soul", "remove") => {
                let id: i64 = arg_str(&args, "key")?
                    .parse()
                    .map_err(|_| ToolError::BadArgs("soul key must be an entry id".to_string()))?;
                let removed = store
                    .remove_soul_entry(id)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(if removed {
                    format!("Soul entry #{id} removed.")
                } else {
                    format!("No soul entry #{id}.")
                })
            }
            ("rule", "add") | ("rule", "set") => {
                let code = arg_str(&args, "key")?;
                // Editing an existing protected rule is as forbidden as
                // removing it.
                if store
                    .get_rule(code)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?
                    .is_some()
                {
                    if let Err(reason) = check_rule_removal(code) {
                        return Ok(format!("Error: {reason}"));
                    }
                }
                let content = arg_str(&args, "value")?;
                let severity = arg_str_opt(&args, "severity")
                    .map(RuleSeverity::from_str)
                    .transpose()
                    .map_err(ToolError::BadArgs)?
                    .unwrap_or(RuleSeverity::Soft);
                store
                    .upsert_rule(code, content, severity)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("Rule {code} saved."))
            }
            ("rule", "remove") => {
                let code = arg_str(&args, "key")?;
                if let Err(reason) = check_rule_removal(code) {
                    return Ok(format!("Error: {reason}"));
                }
                match store.remove_rule(code).await {
                    Ok(()) => Ok(format!("Rule {code} removed.")),
                    Err(StoreError::NotFound { .. }) => Ok(format!("No rule {code}.")),
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            (target, action) => Err(ToolError::BadArgs(format!(
                "unsupported combination: target '{target}', action '{action}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// manage_user
// ---------------------------------------------------------------------------

pub fn manage_user_entry() -> ToolEntry {
    ToolEntry {
        name: "manage_user".to_string(),
        description: "List users, change access levels, or remove users. The first \
                      owner can never be demoted or deleted."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "description": "list | set_access | delete" },
                "user_id": { "type": "integer", "description": "User id" },
                "access_level": {
                    "type": "string",
                    "description": "owner | family | public | pending | blocked"
                }
            },
            "required": ["action"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(ManageUser),
    }
}

struct ManageUser;

#[async_trait]
impl ToolHandler for ManageUser {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let action = arg_str(&args, "action")?;
        let store = &ctx.agent.store;

        match action {
            "list" => {
                let users = store
                    .list_users(None)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                let mut out = String::new();
                for user in users {
                    out.push_str(&format!(
                        "#{} {} ({}:{}) — {}{}\n",
                        user.id,
                        if user.display_name.is_empty() {
                            "(no name)"
                        } else {
                            &user.display_name
                        },
                        user.platform,
                        user.platform_id,
                        user.access_level,
                        if user.is_first_owner { " [first owner]" } else { "" }
                    ));
                }
                Ok(out.trim_end().to_string())
            }
            "set_access" => {
                let user_id = super::arg_i64(&args, "user_id")
                    .ok_or_else(|| ToolError::BadArgs("missing required 'user_id'".to_string()))?;
                let level = AccessLevel::from_str(arg_str(&args, "access_level")?)
                    .map_err(ToolError::BadArgs)?;
                match store.set_user_access(user_id, level).await {
                    Ok(()) => Ok(format!("User #{user_id} is now {level}.")),
                    Err(StoreError::Conflict(reason)) => Ok(format!("Error: {reason}")),
                    Err(StoreError::NotFound { .. }) => Ok(format!("No user #{user_id}.")),
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            "delete" => {
                let user_id = super::arg_i64(&args, "user_id")
                    .ok_or_else(|| ToolError::BadArgs("missing required 'user_id'".to_string()))?;
                match store.delete_user(user_id).await {
                    Ok(()) => Ok(format!("User #{user_id} deleted.")),
                    Err(StoreError::Conflict(reason)) => Ok(format!("Error: {reason}")),
                    Err(StoreError::NotFound { .. }) => Ok(format!("No user #{user_id}.")),
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            other => Err(ToolError::BadArgs(format!("unknown action '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// manage_group
// ---------------------------------------------------------------------------

pub fn manage_group_entry() -> ToolEntry {
    ToolEntry {
        name: "manage_group".to_string(),
        description: "List groups, enable/disable them, and adjust their policy \
                      (require_mention, allow_from, model override)."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "description": "list | enable | disable | set_policy | set_model"
                },
                "group_id": { "type": "string", "description": "Group id" },
                "require_mention": { "type": "boolean" },
                "allow_from": { "type": "string", "description": "all | registered" },
                "model": { "type": "string", "description": "Model key for set_model" }
            },
            "required": ["action"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(ManageGroup),
    }
}

struct ManageGroup;

#[async_trait]
impl ToolHandler for ManageGroup {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let action = arg_str(&args, "action")?;
        let store = &ctx.agent.store;

        match action {
            "list" => {
                let groups = store
                    .list_groups(None)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                if groups.is_empty() {
                    return Ok("No groups known.".to_string());
                }
                let mut out = String::new();
                for group in groups {
                    out.push_str(&format!(
                        "{} '{}' ({}:{}) — {}, mention={}, allow={}\n",
                        group.id,
                        group.name,
                        group.platform,
                        group.platform_group_id,
                        if group.enabled { "enabled" } else { "disabled" },
                        group.require_mention,
                        group.allow_from
                    ));
                }
                Ok(out.trim_end().to_string())
            }
            "enable" | "disable" => {
                let group_id = arg_str(&args, "group_id")?;
                match store.set_group_enabled(group_id, action == "enable").await {
                    Ok(()) => Ok(format!("Group {group_id} {action}d.")),
                    Err(StoreError::NotFound { .. }) => Ok(format!("No group {group_id}.")),
                    Err(e) => Err(ToolError::Failed(e.to_string())),
                }
            }
            "set_policy" => {
                let group_id = arg_str(&args, "group_id")?;
                let require_mention = args.get("require_mention").and_then(|v| v.as_bool());
                let allow_from = arg_str_opt(&args, "allow_from")
                    .map(AllowFrom::from_str)
                    .transpose()
                    .map_err(ToolError::BadArgs)?;
                store
                    .set_group_policy(group_id, require_mention, allow_from)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("Group {group_id} policy updated."))
            }
            "set_model" => {
                let group_id = arg_str(&args, "group_id")?;
                let model = arg_str(&args, "model")?;
                let groups = store
                    .list_groups(None)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                let Some(group) = groups.into_iter().find(|g| g.id == group_id) else {
                    return Ok(format!("No group {group_id}."));
                };
                let mut settings = group.settings.clone();
                settings["model"] = json!(model);
                store
                    .update_group_settings(group_id, &settings)
                    .await
                    .map_err(|e| ToolError::Failed(e.to_string()))?;
                Ok(format!("Group {group_id} now uses model '{model}'."))
            }
            other => Err(ToolError::BadArgs(format!("unknown action '{other}'"))),
        }
    }
}
