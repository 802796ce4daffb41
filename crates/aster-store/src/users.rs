//! User rows and the first-contact bootstrap policy.
//!
//! A fresh DM from an unknown sender creates a `pending` row when an owner
//! already exists on that platform, and an `owner` row otherwise (the very
//! first human to talk to a fresh install becomes the owner). The first
//! owner row is immutable: it can never be demoted or deleted.

use std::str::FromStr;

use aster_core::types::AccessLevel;
use tracing::info;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::User;

impl Store {
    /// Look up a user by platform identity.
    pub async fn get_user(&self, platform: &str, platform_id: &str) -> Result<Option<User>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, platform, platform_id, display_name, access_level,
                    is_first_owner, preferences, aliases, created_at
             FROM users WHERE platform = ?1 AND platform_id = ?2",
            rusqlite::params![platform, platform_id],
            row_to_user,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, platform, platform_id, display_name, access_level,
                    is_first_owner, preferences, aliases, created_at
             FROM users WHERE id = ?1",
            rusqlite::params![id],
            row_to_user,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    /// Return the existing user or create one under the bootstrap policy.
    pub async fn get_or_create_user(
        &self,
        platform: &str,
        platform_id: &str,
        display_name: &str,
    ) -> Result<User> {
        if let Some(user) = self.get_user(platform, platform_id).await? {
            return Ok(user);
        }

        let owner_exists = self.owner_exists(platform).await?;
        let (level, first_owner) = if owner_exists {
            (AccessLevel::Pending, false)
        } else {
            (AccessLevel::Owner, true)
        };

        let conn = self.conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO users
             (platform, platform_id, display_name, access_level, is_first_owner,
              preferences, aliases, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '{}', '[]', ?6)",
            rusqlite::params![
                platform,
                platform_id,
                display_name,
                level.to_string(),
                first_owner as i64,
                Self::now()
            ],
        )?;
        drop(conn);

        let user = self
            .get_user(platform, platform_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "user",
                id: format!("{platform}:{platform_id}"),
            })?;

        info!(
            platform,
            platform_id,
            access = %user.access_level,
            "user created"
        );
        Ok(user)
    }

    pub async fn owner_exists(&self, platform: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE platform = ?1 AND access_level = 'owner'",
            rusqlite::params![platform],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// All owners on a platform — used for out-of-band notifications.
    pub async fn list_owners(&self, platform: &str) -> Result<Vec<User>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            "SELECT id, platform, platform_id, display_name, access_level,
                    is_first_owner, preferences, aliases, created_at
             FROM users WHERE platform = ?1 AND access_level = 'owner'
             ORDER BY id",
        )?;
        let rows = stmt.query_map(rusqlite::params![platform], row_to_user)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Change a user's access level. Refuses to touch the first owner.
    pub async fn set_user_access(&self, id: i64, level: AccessLevel) -> Result<()> {
        let user = self
            .get_user_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "user",
                id: id.to_string(),
            })?;
        if user.is_first_owner && level != AccessLevel::Owner {
            return Err(StoreError::Conflict(
                "the first owner cannot be demoted".to_string(),
            ));
        }

        let conn = self.conn().await?;
        conn.execute(
            "UPDATE users SET access_level = ?1 WHERE id = ?2",
            rusqlite::params![level.to_string(), id],
        )?;
        Ok(())
    }

    /// Delete a user. Refuses to touch the first owner.
    pub async fn delete_user(&self, id: i64) -> Result<()> {
        let user = self
            .get_user_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "user",
                id: id.to_string(),
            })?;
        if user.is_first_owner {
            return Err(StoreError::Conflict(
                "the first owner cannot be deleted".to_string(),
            ));
        }

        let conn = self.conn().await?;
        conn.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![id])?;
        Ok(())
    }

    pub async fn set_user_display_name(&self, id: i64, display_name: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            rusqlite::params![display_name, id],
        )?;
        Ok(())
    }

    pub async fn set_user_preferences(&self, id: i64, prefs: &serde_json::Value) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE users SET preferences = ?1 WHERE id = ?2",
            rusqlite::params![prefs.to_string(), id],
        )?;
        Ok(())
    }

    pub async fn list_users(&self, platform: Option<&str>) -> Result<Vec<User>> {
        let conn = self.conn().await?;
        let mut out = Vec::new();
        match platform {
            Some(p) => {
                let mut stmt = conn.prepare(
                    "SELECT id, platform, platform_id, display_name, access_level,
                            is_first_owner, preferences, aliases, created_at
                     FROM users WHERE platform = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(rusqlite::params![p], row_to_user)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, platform, platform_id, display_name, access_level,
                            is_first_owner, preferences, aliases, created_at
                     FROM users ORDER BY id",
                )?;
                let rows = stmt.query_map([], row_to_user)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let level_str: String = row.get(4)?;
    let prefs_str: String = row.get(6)?;
    let aliases_str: String = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        platform: row.get(1)?,
        platform_id: row.get(2)?,
        display_name: row.get(3)?,
        access_level: AccessLevel::from_str(&level_str).unwrap_or(AccessLevel::Pending),
        is_first_owner: row.get::<_, i64>(5)? != 0,
        preferences: serde_json::from_str(&prefs_str).unwrap_or(serde_json::json!({})),
        aliases: serde_json::from_str(&aliases_str).unwrap_or(serde_json::json!([])),
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn first_contact_becomes_owner() {
        let (_dir, store) = open_test_store().await;
        let user = store
            .get_or_create_user("telegram", "1", "Alice")
            .await
            .unwrap();
        assert_eq!(user.access_level, AccessLevel::Owner);
        assert!(user.is_first_owner);
    }

    #[tokio::test]
    async fn second_contact_is_pending() {
        let (_dir, store) = open_test_store().await;
        store
            .get_or_create_user("telegram", "1", "Alice")
            .await
            .unwrap();
        let bob = store
            .get_or_create_user("telegram", "2", "Bob")
            .await
            .unwrap();
        assert_eq!(bob.access_level, AccessLevel::Pending);
        assert!(!bob.is_first_owner);
    }

    #[tokio::test]
    async fn first_owner_is_immutable() {
        let (_dir, store) = open_test_store().await;
        let alice = store
            .get_or_create_user("telegram", "1", "Alice")
            .await
            .unwrap();

        let demote = store.set_user_access(alice.id, AccessLevel::Public).await;
        assert!(matches!(demote, Err(StoreError::Conflict(_))));

        let delete = store.delete_user(alice.id).await;
        assert!(matches!(delete, Err(StoreError::Conflict(_))));

        // Still owner afterwards.
        let reread = store.get_user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(reread.access_level, AccessLevel::Owner);
    }

    #[tokio::test]
    async fn promoting_pending_user_works() {
        let (_dir, store) = open_test_store().await;
        store
            .get_or_create_user("telegram", "1", "Alice")
            .await
            .unwrap();
        let bob = store
            .get_or_create_user("telegram", "2", "Bob")
            .await
            .unwrap();
        store
            .set_user_access(bob.id, AccessLevel::Family)
            .await
            .unwrap();
        let reread = store.get_user_by_id(bob.id).await.unwrap().unwrap();
        assert_eq!(reread.access_level, AccessLevel::Family);
    }

    #[tokio::test]
    async fn platforms_bootstrap_independently() {
        let (_dir, store) = open_test_store().await;
        store
            .get_or_create_user("telegram", "1", "Alice")
            .await
            .unwrap();
        let wa = store
            .get_or_create_user("whatsapp", "1", "Alice")
            .await
            .unwrap();
        assert_eq!(wa.access_level, AccessLevel::Owner);
    }
}
