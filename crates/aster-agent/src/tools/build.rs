//! Registry assembly — the built-in tool set plus the enabled abilities,
//! in one shared namespace.

use std::sync::Arc;

use crate::agent::AgentContext;
use crate::error::Result;
use crate::registry::ToolRegistry;

use super::{admin, exec, files, memory, messaging, schedule, source, subagent, web_fetch, web_search};

pub async fn build_registry(ctx: &Arc<AgentContext>) -> Result<ToolRegistry> {
    let mut entries = vec![
        memory::search_entry(),
        memory::store_entry(),
        memory::delete_entry(),
        web_fetch::entry(),
        web_search::entry(),
        exec::entry(),
        files::read_entry(),
        files::write_entry(),
        files::list_entry(),
        schedule::create_entry(),
        schedule::list_entry(),
        schedule::cancel_entry(),
        subagent::spawn_entry(),
        subagent::status_entry(),
        admin::update_config_entry(),
        admin::update_ability_entry(),
        admin::update_soul_entry(),
        admin::manage_user_entry(),
        admin::manage_group_entry(),
        messaging::send_message_entry(),
        messaging::send_reaction_entry(),
        source::entry(),
    ];
    entries.extend(ctx.abilities.tool_entries(&ctx.store).await?);
    Ok(ToolRegistry::new(entries))
}
