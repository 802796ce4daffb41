use serde::{Deserialize, Serialize};
use std::fmt;

use aster_core::types::AccessLevel;

/// Message role within a session transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Metadata marker stored on synthetic compaction summary rows.
pub const COMPACTION_SUMMARY_TYPE: &str = "compaction_summary";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub platform: String,
    pub platform_id: String,
    pub display_name: String,
    pub access_level: AccessLevel,
    /// The first user ever promoted to owner on a platform. Immutable: no
    /// operation may demote or delete this row.
    pub is_first_owner: bool,
    pub preferences: serde_json::Value,
    pub aliases: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowFrom {
    All,
    Registered,
}

impl fmt::Display for AllowFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowFrom::All => write!(f, "all"),
            AllowFrom::Registered => write!(f, "registered"),
        }
    }
}

impl std::str::FromStr for AllowFrom {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(AllowFrom::All),
            "registered" => Ok(AllowFrom::Registered),
            other => Err(format!("unknown allow_from: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub platform: String,
    pub platform_group_id: String,
    pub name: String,
    pub enabled: bool,
    pub require_mention: bool,
    pub allow_from: AllowFrom,
    /// `settings.members` maps member_id → {name, alias?, access?, username?};
    /// `settings.model` optionally overrides the active chat model.
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub platform: String,
    pub platform_chat_id: String,
    pub status: SessionStatus,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl MessageRow {
    pub fn is_compaction_summary(&self) -> bool {
        self.metadata.get("type").and_then(|v| v.as_str()) == Some(COMPACTION_SUMMARY_TYPE)
    }
}

/// Fields of a message about to be persisted. The store assigns id and
/// created_at.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl NewMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_args: None,
            metadata: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRow {
    pub id: i64,
    pub content: String,
    pub category: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub source: String,
    pub user_id: Option<i64>,
    pub importance: f64,
    pub access_count: i64,
    pub created_at: String,
    pub accessed_at: Option<String>,
}

/// A nearest-neighbour hit: the row plus `1 − cosine_distance`.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub row: MemoryRow,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub source: AbilitySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilitySource {
    Builtin,
    User,
}

impl fmt::Display for AbilitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbilitySource::Builtin => write!(f, "builtin"),
            AbilitySource::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for AbilitySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "builtin" => Ok(AbilitySource::Builtin),
            "user" => Ok(AbilitySource::User),
            other => Err(format!("unknown ability source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Once,
    Interval,
    Cron,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleType::Once => write!(f, "once"),
            ScheduleType::Interval => write!(f, "interval"),
            ScheduleType::Cron => write!(f, "cron"),
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "once" => Ok(ScheduleType::Once),
            "interval" => Ok(ScheduleType::Interval),
            "cron" => Ok(ScheduleType::Cron),
            other => Err(format!("unknown schedule type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub schedule_value: String,
    pub payload: String,
    pub enabled: bool,
    pub last_run: Option<String>,
    /// Always populated for enabled tasks.
    pub next_run: Option<String>,
    pub run_count: i64,
    pub created_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentRun {
    pub run_id: String,
    pub parent_session_id: String,
    pub task: String,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub motto: String,
    pub backstory: String,
    pub personality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulEntry {
    pub id: i64,
    pub category: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Hard,
    Soft,
}

impl fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSeverity::Hard => write!(f, "hard"),
            RuleSeverity::Soft => write!(f, "soft"),
        }
    }
}

impl std::str::FromStr for RuleSeverity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hard" => Ok(RuleSeverity::Hard),
            "soft" => Ok(RuleSeverity::Soft),
            other => Err(format!("unknown rule severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub code: String,
    pub content: String,
    pub severity: RuleSeverity,
}
