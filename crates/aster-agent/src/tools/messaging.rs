//! Outbound messaging tools — send a message or a reaction to another chat
//! through the channel sender registered at startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use aster_comm::OutboundMessage;
use aster_core::types::AccessLevel;

use super::{arg_i64, arg_str, arg_str_opt, ToolCtx, ToolEntry, ToolError, ToolHandler};

pub fn send_message_entry() -> ToolEntry {
    ToolEntry {
        name: "send_message".to_string(),
        description: "Send a message to a specific chat on a connected platform."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "platform": { "type": "string", "description": "Target platform (default: current)" },
                "chat_id": { "type": "string", "description": "Target chat id" },
                "text": { "type": "string", "description": "Message text" }
            },
            "required": ["chat_id", "text"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(SendMessage),
    }
}

struct SendMessage;

#[async_trait]
impl ToolHandler for SendMessage {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let chat_id = arg_str(&args, "chat_id")?;
        let text = arg_str(&args, "text")?;
        let platform = arg_str_opt(&args, "platform").unwrap_or(&ctx.chat.platform);

        let sent = ctx.agent.outbound_send(
            platform,
            chat_id,
            OutboundMessage {
                text: text.to_string(),
                ..OutboundMessage::default()
            },
        );
        if sent {
            Ok(format!("Message sent to {platform}:{chat_id}."))
        } else {
            Ok("Error: no channel is connected to deliver messages".to_string())
        }
    }
}

pub fn send_reaction_entry() -> ToolEntry {
    ToolEntry {
        name: "send_reaction".to_string(),
        description: "React to a message in a chat with an emoji.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "platform": { "type": "string", "description": "Target platform (default: current)" },
                "chat_id": { "type": "string", "description": "Target chat id" },
                "message_id": { "type": "integer", "description": "Message to react to" },
                "emoji": { "type": "string", "description": "Reaction emoji" }
            },
            "required": ["chat_id", "message_id", "emoji"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(SendReaction),
    }
}

struct SendReaction;

#[async_trait]
impl ToolHandler for SendReaction {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let chat_id = arg_str(&args, "chat_id")?;
        let emoji = arg_str(&args, "emoji")?;
        let message_id = arg_i64(&args, "message_id")
            .ok_or_else(|| ToolError::BadArgs("missing required 'message_id'".to_string()))?;
        let platform = arg_str_opt(&args, "platform").unwrap_or(&ctx.chat.platform);

        let sent = ctx.agent.outbound_send(
            platform,
            chat_id,
            OutboundMessage {
                text: String::new(),
                reply_to: Some(message_id),
                reactions: vec![emoji.to_string()],
                media_path: None,
            },
        );
        if sent {
            Ok(format!("Reacted with {emoji} in {platform}:{chat_id}."))
        } else {
            Ok("Error: no channel is connected to deliver reactions".to_string())
        }
    }
}
