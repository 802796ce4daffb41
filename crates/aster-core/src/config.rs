use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Boot configuration (aster.toml + ASTER_* env overrides).
///
/// Only what must be known before the store is open lives here. Runtime
/// settings — models, session limits, credentials — are rows in the
/// `config` table and are managed through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsterConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Connection pool bounds. Every unit of work holds exactly one
    /// connection for its critical section.
    #[serde(default = "default_pool_min")]
    pub pool_min: usize,
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
        }
    }
}

/// Filesystem roots the agent may operate in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Working directory for conversations and the file tools.
    #[serde(default = "default_workspace_dir")]
    pub dir: String,
    /// Where user-installed abilities live.
    #[serde(default = "default_abilities_dir")]
    pub abilities_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
            abilities_dir: default_abilities_dir(),
        }
    }
}

impl Default for AsterConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            workspace: WorkspaceConfig::default(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

fn default_db_path() -> String {
    format!("{}/.aster/aster.db", home_dir())
}

fn default_pool_min() -> usize {
    2
}

fn default_pool_max() -> usize {
    10
}

fn default_workspace_dir() -> String {
    format!("{}/.aster/workspace", home_dir())
}

fn default_abilities_dir() -> String {
    format!("{}/.aster/abilities", home_dir())
}

fn default_config_path() -> String {
    format!("{}/.aster/aster.toml", home_dir())
}

impl AsterConfig {
    /// Load config from a TOML file with ASTER_* env var overrides.
    ///
    /// A missing file is not an error — defaults apply and env vars still
    /// override, so a bare `aster init-db` works on a fresh host.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AsterConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ASTER_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_populate_paths() {
        let cfg = AsterConfig::default();
        assert!(cfg.database.path.ends_with("aster.db"));
        assert_eq!(cfg.database.pool_min, 2);
        assert_eq!(cfg.database.pool_max, 10);
    }
}
