//! Security gate — code-enforced checks applied uniformly at every entry
//! point. Nothing here depends on the prompt: a model that ignores its
//! instructions still cannot get past these functions.

pub mod access;
pub mod command;
pub mod files;
pub mod rules;
pub mod url;

pub use access::{effective_access, is_owner_only_tool, OWNER_ONLY_TOOLS};
pub use command::check_command_safety;
pub use files::check_write_scope;
pub use rules::{check_rule_760, check_rule_removal, PRIVATE_CATEGORIES, PROTECTED_RULE_PREFIXES};
pub use url::is_url_safe;
