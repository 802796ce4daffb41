//! Config/credential registry — the key→JSON map in the `config` table.
//!
//! Keys use dotted namespaces. Everything under `credential.*` is a secret:
//! it is never logged, never echoed back by diagnostic tools, and
//! `list_configs` replaces its value with a redaction marker.

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::ConfigEntry;

/// Prefix under which secrets live.
pub const CREDENTIAL_PREFIX: &str = "credential.";

const REDACTED: &str = "[redacted]";

impl Store {
    pub async fn upsert_config(&self, key: &str, value: &Value, description: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO config (key, value, description, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                description = CASE WHEN excluded.description = ''
                                   THEN config.description
                                   ELSE excluded.description END,
                updated_at = excluded.updated_at",
            rusqlite::params![key, value.to_string(), description, Self::now()],
        )?;
        Ok(())
    }

    /// Read a config value, or `default` when the key is absent.
    pub async fn get_config(&self, key: &str, default: Value) -> Result<Value> {
        let conn = self.conn().await?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(no_rows_as_none)?;

        match raw {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(default),
        }
    }

    /// All config entries, credentials redacted. This is the only listing
    /// surface — cleartext secrets are reachable only through
    /// [`Store::get_credential`].
    pub async fn list_configs(&self) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn().await?;
        let mut stmt =
            conn.prepare("SELECT key, value, description FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, raw, description) = row?;
            let value = if key.starts_with(CREDENTIAL_PREFIX) {
                Value::String(REDACTED.to_string())
            } else {
                serde_json::from_str(&raw).unwrap_or(Value::String(raw))
            };
            entries.push(ConfigEntry {
                key,
                value,
                description,
            });
        }
        Ok(entries)
    }

    /// Cleartext secret lookup. `key` may be given with or without the
    /// `credential.` prefix.
    pub async fn get_credential(&self, key: &str) -> Result<Option<String>> {
        let full = if key.starts_with(CREDENTIAL_PREFIX) {
            key.to_string()
        } else {
            format!("{CREDENTIAL_PREFIX}{key}")
        };
        let value = self.get_config(&full, Value::Null).await?;
        Ok(value.as_str().map(String::from))
    }

    pub async fn delete_config(&self, key: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let n = conn.execute("DELETE FROM config WHERE key = ?1", rusqlite::params![key])?;
        Ok(n > 0)
    }
}

pub(crate) fn no_rows_as_none<T>(
    err: rusqlite::Error,
) -> std::result::Result<Option<T>, StoreError> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        e => Err(StoreError::Database(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn upsert_then_get() {
        let (_dir, store) = open_test_store().await;
        store
            .upsert_config("session.max_messages", &serde_json::json!(100), "cap")
            .await
            .unwrap();
        let v = store
            .get_config("session.max_messages", serde_json::json!(0))
            .await
            .unwrap();
        assert_eq!(v, serde_json::json!(100));
    }

    #[tokio::test]
    async fn missing_key_yields_default() {
        let (_dir, store) = open_test_store().await;
        let v = store
            .get_config("no.such.key", serde_json::json!("fallback"))
            .await
            .unwrap();
        assert_eq!(v, serde_json::json!("fallback"));
    }

    #[tokio::test]
    async fn credentials_are_redacted_in_listing() {
        let (_dir, store) = open_test_store().await;
        store
            .upsert_config(
                "credential.telegram_bot_token",
                &serde_json::json!("123:abc-secret"),
                "",
            )
            .await
            .unwrap();
        store
            .upsert_config("provider.active_model", &serde_json::json!("main"), "")
            .await
            .unwrap();

        let entries = store.list_configs().await.unwrap();
        let cred = entries
            .iter()
            .find(|e| e.key == "credential.telegram_bot_token")
            .unwrap();
        assert_eq!(cred.value, serde_json::json!("[redacted]"));
        assert!(!cred.value.to_string().contains("secret"));

        // Cleartext still available through the credential accessor.
        let secret = store
            .get_credential("telegram_bot_token")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret, "123:abc-secret");
    }
}
