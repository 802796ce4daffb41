//! Protected-rule and category-privacy checks.

use aster_core::types::AccessLevel;

/// Rule codes starting with these prefixes can never be deleted or edited
/// through tool calls.
pub const PROTECTED_RULE_PREFIXES: &[&str] = &["SEC", "MEM", "IDT"];

/// Memory categories only owner and family requesters may recall.
pub const PRIVATE_CATEGORIES: &[&str] = &["personal_info", "family", "health", "medical"];

/// Check whether a rule may be removed or edited through tools.
pub fn check_rule_removal(code: &str) -> Result<(), String> {
    let upper = code.to_uppercase();
    for prefix in PROTECTED_RULE_PREFIXES {
        if upper.starts_with(prefix) {
            return Err("rule is protected".to_string());
        }
    }
    Ok(())
}

/// Family-privacy filter on memory recall: private categories are only
/// visible to owner and family requesters.
///
/// Returns `Ok(())` when the row may be shown, `Err(reason)` when it must
/// be silently dropped from the result set.
pub fn check_rule_760(category: &str, requester: AccessLevel) -> Result<(), String> {
    if !PRIVATE_CATEGORIES.contains(&category) {
        return Ok(());
    }
    match requester {
        AccessLevel::Owner | AccessLevel::Family => Ok(()),
        other => Err(format!(
            "category '{category}' is private and requester is '{other}'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_prefixes_block_removal() {
        assert!(check_rule_removal("SEC-001").is_err());
        assert!(check_rule_removal("MEM-010").is_err());
        assert!(check_rule_removal("IDT-002").is_err());
        assert!(check_rule_removal("sec-001").is_err());
        assert!(check_rule_removal("GEN-004").is_ok());
    }

    #[test]
    fn private_categories_hidden_below_family() {
        for cat in ["personal_info", "family", "health", "medical"] {
            assert!(check_rule_760(cat, AccessLevel::Owner).is_ok());
            assert!(check_rule_760(cat, AccessLevel::Family).is_ok());
            assert!(check_rule_760(cat, AccessLevel::Public).is_err());
            assert!(check_rule_760(cat, AccessLevel::Pending).is_err());
            assert!(check_rule_760(cat, AccessLevel::Blocked).is_err());
        }
    }

    #[test]
    fn ordinary_categories_are_unrestricted() {
        assert!(check_rule_760("fact", AccessLevel::Public).is_ok());
        assert!(check_rule_760("preference", AccessLevel::Pending).is_ok());
    }
}
