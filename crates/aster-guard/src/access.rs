//! Owner-only tool policy and group provenance downgrade.

use aster_core::types::AccessLevel;

/// Tools gated to owners at the registry — not merely by prompt text.
/// These are additionally blocked in group chats regardless of the caller's
/// global level.
pub const OWNER_ONLY_TOOLS: &[&str] = &[
    "exec",
    "update_config",
    "update_ability",
    "update_soul",
    "manage_group",
    "manage_user",
    "send_message",
    "send_reaction",
    "read_source",
    "file_write",
];

pub fn is_owner_only_tool(name: &str) -> bool {
    OWNER_ONLY_TOOLS.contains(&name)
}

/// The access level a caller actually gets for a dispatch.
///
/// Group provenance always downgrades to at most `family`: an owner talking
/// in a group cannot trigger owner-only tools from there.
pub fn effective_access(global: AccessLevel, is_group: bool) -> AccessLevel {
    if !is_group {
        return global;
    }
    match global {
        AccessLevel::Owner | AccessLevel::Family => AccessLevel::Family,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_caps_owner_at_family() {
        assert_eq!(
            effective_access(AccessLevel::Owner, true),
            AccessLevel::Family
        );
        assert_eq!(
            effective_access(AccessLevel::Owner, false),
            AccessLevel::Owner
        );
        assert_eq!(
            effective_access(AccessLevel::Public, true),
            AccessLevel::Public
        );
    }

    #[test]
    fn owner_only_list_contains_exec() {
        assert!(is_owner_only_tool("exec"));
        assert!(is_owner_only_tool("file_write"));
        assert!(!is_owner_only_tool("web_fetch"));
    }

    #[test]
    fn owner_only_tools_unreachable_from_groups() {
        // Even a global owner, downgraded to family in a group, fails the
        // owner gate for every owner-only tool.
        let effective = effective_access(AccessLevel::Owner, true);
        assert!(!effective.satisfies(AccessLevel::Owner));
    }
}
