use serde::{Deserialize, Serialize};
use std::fmt;

/// User access hierarchy: owner > family > public.
///
/// `Pending` and `Blocked` sit outside the ordering — a pending user gets a
/// templated waiting reply, a blocked user's messages are dropped silently.
/// Neither can pass any tool's access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Family,
    Public,
    Pending,
    Blocked,
}

impl AccessLevel {
    /// Numeric rank for gate comparisons. Higher means more access.
    /// Pending and blocked rank below public so they never pass a gate.
    pub fn rank(&self) -> u8 {
        match self {
            AccessLevel::Owner => 3,
            AccessLevel::Family => 2,
            AccessLevel::Public => 1,
            AccessLevel::Pending | AccessLevel::Blocked => 0,
        }
    }

    /// True when this level satisfies `required` for a tool dispatch.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        self.rank() >= required.rank() && required.rank() > 0
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, AccessLevel::Owner)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Family => "family",
            AccessLevel::Public => "public",
            AccessLevel::Pending => "pending",
            AccessLevel::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(AccessLevel::Owner),
            "family" => Ok(AccessLevel::Family),
            "public" => Ok(AccessLevel::Public),
            "pending" => Ok(AccessLevel::Pending),
            "blocked" => Ok(AccessLevel::Blocked),
            other => Err(format!("unknown access level: {}", other)),
        }
    }
}

/// Whether a conversation happens in a DM or a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    pub fn is_group(&self) -> bool {
        matches!(self, ChatType::Group)
    }
}

/// Identifies one conversation: a platform plus that platform's chat id.
///
/// At most one turn runs at a time per key; further messages queue behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatKey {
    /// Channel platform, e.g. `"telegram"`, `"terminal"`.
    pub platform: String,
    /// Opaque chat identifier within that platform.
    pub chat_id: String,
}

impl ChatKey {
    pub fn new(platform: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_ordering() {
        assert!(AccessLevel::Owner.satisfies(AccessLevel::Family));
        assert!(AccessLevel::Family.satisfies(AccessLevel::Public));
        assert!(!AccessLevel::Public.satisfies(AccessLevel::Family));
    }

    #[test]
    fn pending_and_blocked_never_pass() {
        for lvl in [AccessLevel::Pending, AccessLevel::Blocked] {
            assert!(!lvl.satisfies(AccessLevel::Public));
            assert!(!lvl.satisfies(AccessLevel::Owner));
        }
    }

    #[test]
    fn access_round_trips_through_str() {
        for lvl in ["owner", "family", "public", "pending", "blocked"] {
            let parsed: AccessLevel = lvl.parse().unwrap();
            assert_eq!(parsed.to_string(), lvl);
        }
    }

    #[test]
    fn chat_key_display() {
        let key = ChatKey::new("telegram", "12345");
        assert_eq!(key.to_string(), "telegram:12345");
    }
}
