use std::str::FromStr;

use uuid::Uuid;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{AllowFrom, Group};

impl Store {
    pub async fn get_group(
        &self,
        platform: &str,
        platform_group_id: &str,
    ) -> Result<Option<Group>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, platform, platform_group_id, name, enabled, require_mention,
                    allow_from, settings
             FROM groups WHERE platform = ?1 AND platform_group_id = ?2",
            rusqlite::params![platform, platform_group_id],
            row_to_group,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    /// Return the existing group row or create a disabled one. New groups
    /// start disabled under the allowlist policy; an owner enables them.
    pub async fn get_or_create_group(
        &self,
        platform: &str,
        platform_group_id: &str,
        name: &str,
    ) -> Result<Group> {
        if let Some(group) = self.get_group(platform, platform_group_id).await? {
            return Ok(group);
        }

        let id = Uuid::new_v4().to_string();
        let conn = self.conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO groups
             (id, platform, platform_group_id, name, enabled, require_mention,
              allow_from, settings)
             VALUES (?1, ?2, ?3, ?4, 0, 1, 'all', '{}')",
            rusqlite::params![id, platform, platform_group_id, name],
        )?;
        drop(conn);

        self.get_group(platform, platform_group_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "group",
                id: format!("{platform}:{platform_group_id}"),
            })
    }

    pub async fn set_group_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE groups SET enabled = ?1 WHERE id = ?2",
            rusqlite::params![enabled as i64, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "group",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn update_group_settings(
        &self,
        id: &str,
        settings: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE groups SET settings = ?1 WHERE id = ?2",
            rusqlite::params![settings.to_string(), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "group",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn set_group_policy(
        &self,
        id: &str,
        require_mention: Option<bool>,
        allow_from: Option<AllowFrom>,
    ) -> Result<()> {
        let conn = self.conn().await?;
        if let Some(rm) = require_mention {
            conn.execute(
                "UPDATE groups SET require_mention = ?1 WHERE id = ?2",
                rusqlite::params![rm as i64, id],
            )?;
        }
        if let Some(af) = allow_from {
            conn.execute(
                "UPDATE groups SET allow_from = ?1 WHERE id = ?2",
                rusqlite::params![af.to_string(), id],
            )?;
        }
        Ok(())
    }

    pub async fn list_groups(&self, platform: Option<&str>) -> Result<Vec<Group>> {
        let conn = self.conn().await?;
        let mut out = Vec::new();
        match platform {
            Some(p) => {
                let mut stmt = conn.prepare(
                    "SELECT id, platform, platform_group_id, name, enabled,
                            require_mention, allow_from, settings
                     FROM groups WHERE platform = ?1 ORDER BY name",
                )?;
                let rows = stmt.query_map(rusqlite::params![p], row_to_group)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, platform, platform_group_id, name, enabled,
                            require_mention, allow_from, settings
                     FROM groups ORDER BY name",
                )?;
                let rows = stmt.query_map([], row_to_group)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let allow_str: String = row.get(6)?;
    let settings_str: String = row.get(7)?;
    Ok(Group {
        id: row.get(0)?,
        platform: row.get(1)?,
        platform_group_id: row.get(2)?,
        name: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        require_mention: row.get::<_, i64>(5)? != 0,
        allow_from: AllowFrom::from_str(&allow_str).unwrap_or(AllowFrom::All),
        settings: serde_json::from_str(&settings_str).unwrap_or(serde_json::json!({})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn new_groups_start_disabled() {
        let (_dir, store) = open_test_store().await;
        let g = store
            .get_or_create_group("telegram", "-100", "Family Chat")
            .await
            .unwrap();
        assert!(!g.enabled);
        assert!(g.require_mention);

        store.set_group_enabled(&g.id, true).await.unwrap();
        let reread = store.get_group("telegram", "-100").await.unwrap().unwrap();
        assert!(reread.enabled);
    }

    #[tokio::test]
    async fn group_model_override_round_trips() {
        let (_dir, store) = open_test_store().await;
        let g = store
            .get_or_create_group("telegram", "-100", "Work")
            .await
            .unwrap();
        let settings = serde_json::json!({"model": "fast", "members": {}});
        store.update_group_settings(&g.id, &settings).await.unwrap();
        let reread = store.get_group("telegram", "-100").await.unwrap().unwrap();
        assert_eq!(reread.settings["model"], "fast");
    }
}
