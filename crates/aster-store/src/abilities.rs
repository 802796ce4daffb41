use std::str::FromStr;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{AbilityRecord, AbilitySource};

impl Store {
    /// Register an ability if unknown; existing rows keep their enabled flag
    /// and config but pick up new version/description.
    pub async fn register_ability(
        &self,
        name: &str,
        version: &str,
        description: &str,
        source: AbilitySource,
        default_enabled: bool,
    ) -> Result<AbilityRecord> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO abilities (name, version, description, enabled, config, source)
             VALUES (?1, ?2, ?3, ?4, '{}', ?5)
             ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                description = excluded.description",
            rusqlite::params![
                name,
                version,
                description,
                default_enabled as i64,
                source.to_string()
            ],
        )?;
        drop(conn);
        self.get_ability(name).await?.ok_or(StoreError::NotFound {
            what: "ability",
            id: name.to_string(),
        })
    }

    pub async fn get_ability(&self, name: &str) -> Result<Option<AbilityRecord>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT name, version, description, enabled, config, source
             FROM abilities WHERE name = ?1",
            rusqlite::params![name],
            row_to_ability,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn list_abilities(&self) -> Result<Vec<AbilityRecord>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            "SELECT name, version, description, enabled, config, source
             FROM abilities ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_ability)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn set_ability_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE abilities SET enabled = ?1 WHERE name = ?2",
            rusqlite::params![enabled as i64, name],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "ability",
                id: name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn set_ability_config(&self, name: &str, config: &serde_json::Value) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE abilities SET config = ?1 WHERE name = ?2",
            rusqlite::params![config.to_string(), name],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "ability",
                id: name.to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_ability(row: &rusqlite::Row<'_>) -> rusqlite::Result<AbilityRecord> {
    let source_str: String = row.get(5)?;
    let config_str: String = row.get(4)?;
    Ok(AbilityRecord {
        name: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        config: serde_json::from_str(&config_str).unwrap_or(serde_json::json!({})),
        source: AbilitySource::from_str(&source_str).unwrap_or(AbilitySource::Builtin),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn re_registration_keeps_operator_state() {
        let (_dir, store) = open_test_store().await;
        store
            .register_ability("vision", "0.1.0", "captions images", AbilitySource::Builtin, true)
            .await
            .unwrap();
        store.set_ability_enabled("vision", false).await.unwrap();
        store
            .set_ability_config("vision", &serde_json::json!({"detail": "high"}))
            .await
            .unwrap();

        // A newer build registers the same ability again.
        let rec = store
            .register_ability("vision", "0.2.0", "captions images", AbilitySource::Builtin, true)
            .await
            .unwrap();
        assert_eq!(rec.version, "0.2.0");
        assert!(!rec.enabled);
        assert_eq!(rec.config["detail"], "high");
    }
}
