//! Credentials migration — move legacy env/file secrets into `credential.*`
//! config rows so the daemon never needs secret environment variables.

use serde_json::json;
use tracing::info;

use aster_store::Store;

/// `(env var, credential key)` pairs recognised by the migration.
const ENV_CREDENTIALS: &[(&str, &str)] = &[
    ("ASTER_OPENAI_API_KEY", "credential.openai_api_key"),
    ("ASTER_ANTHROPIC_API_KEY", "credential.anthropic_api_key"),
    ("ASTER_TELEGRAM_BOT_TOKEN", "credential.telegram_bot_token"),
    ("ASTER_WEB_SEARCH_API_KEY", "credential.web_search_api_key"),
];

/// Legacy JSON secrets file from pre-database installs.
fn legacy_credentials_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aster/credentials.json")
}

pub async fn run(store: &Store) -> anyhow::Result<usize> {
    let mut migrated = 0usize;

    for (env_var, key) in ENV_CREDENTIALS {
        if let Ok(value) = std::env::var(env_var) {
            if !value.is_empty() {
                store
                    .upsert_config(key, &json!(value), &format!("migrated from {env_var}"))
                    .await?;
                info!(key, source = env_var, "credential migrated");
                migrated += 1;
            }
        }
    }

    let legacy = legacy_credentials_path();
    if let Ok(raw) = std::fs::read_to_string(&legacy) {
        if let Ok(map) = serde_json::from_str::<serde_json::Value>(&raw) {
            if let Some(obj) = map.as_object() {
                for (name, value) in obj {
                    let Some(value) = value.as_str() else { continue };
                    if value.is_empty() {
                        continue;
                    }
                    let key = format!("credential.{name}");
                    store
                        .upsert_config(&key, &json!(value), "migrated from credentials.json")
                        .await?;
                    info!(key, "credential migrated from legacy file");
                    migrated += 1;
                }
            }
        }
        info!(path = %legacy, "legacy credentials file processed; consider deleting it");
    }

    Ok(migrated)
}
