//! Identity, soul and rules — the small tables the prompt builder reads.

use std::str::FromStr;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{Identity, Rule, RuleSeverity, SoulEntry};

impl Store {
    pub async fn get_identity(&self) -> Result<Option<Identity>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT name, motto, backstory, personality FROM identity WHERE id = 1",
            [],
            |row| {
                Ok(Identity {
                    name: row.get(0)?,
                    motto: row.get(1)?,
                    backstory: row.get(2)?,
                    personality: row.get(3)?,
                })
            },
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn set_identity(&self, identity: &Identity) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO identity (id, name, motto, backstory, personality, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, motto = excluded.motto,
                backstory = excluded.backstory, personality = excluded.personality,
                updated_at = excluded.updated_at",
            rusqlite::params![
                identity.name,
                identity.motto,
                identity.backstory,
                identity.personality,
                Self::now()
            ],
        )?;
        Ok(())
    }

    /// Soul entries grouped in category order, insertion order within.
    pub async fn list_soul(&self) -> Result<Vec<SoulEntry>> {
        let conn = self.conn().await?;
        let mut stmt =
            conn.prepare("SELECT id, category, content FROM soul ORDER BY category, id")?;
        let rows = stmt.query_map([], |row| {
            Ok(SoulEntry {
                id: row.get(0)?,
                category: row.get(1)?,
                content: row.get(2)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn add_soul_entry(&self, category: &str, content: &str) -> Result<i64> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO soul (category, content, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![category, content, Self::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn remove_soul_entry(&self, id: i64) -> Result<bool> {
        let conn = self.conn().await?;
        let n = conn.execute("DELETE FROM soul WHERE id = ?1", rusqlite::params![id])?;
        Ok(n > 0)
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare("SELECT id, code, content, severity FROM rules ORDER BY code")?;
        let rows = stmt.query_map([], row_to_rule)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn get_rule(&self, code: &str) -> Result<Option<Rule>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, code, content, severity FROM rules WHERE code = ?1",
            rusqlite::params![code],
            row_to_rule,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn upsert_rule(&self, code: &str, content: &str, severity: RuleSeverity) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO rules (code, content, severity, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(code) DO UPDATE SET
                content = excluded.content, severity = excluded.severity",
            rusqlite::params![code, content, severity.to_string(), Self::now()],
        )?;
        Ok(())
    }

    /// Plain row deletion. Protection of SEC/MEM/IDT codes is enforced by the
    /// security gate in front of every tool-reachable path.
    pub async fn remove_rule(&self, code: &str) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute("DELETE FROM rules WHERE code = ?1", rusqlite::params![code])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "rule",
                id: code.to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let severity_str: String = row.get(3)?;
    Ok(Rule {
        id: row.get(0)?,
        code: row.get(1)?,
        content: row.get(2)?,
        severity: RuleSeverity::from_str(&severity_str).unwrap_or(RuleSeverity::Soft),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn identity_upsert_round_trips() {
        let (_dir, store) = open_test_store().await;
        assert!(store.get_identity().await.unwrap().is_none());

        store
            .set_identity(&Identity {
                name: "Aster".to_string(),
                motto: "small and helpful".to_string(),
                backstory: String::new(),
                personality: "curious".to_string(),
            })
            .await
            .unwrap();
        let id = store.get_identity().await.unwrap().unwrap();
        assert_eq!(id.name, "Aster");

        store
            .set_identity(&Identity {
                name: "Aster".to_string(),
                motto: "updated".to_string(),
                backstory: String::new(),
                personality: "curious".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(store.get_identity().await.unwrap().unwrap().motto, "updated");
    }

    #[tokio::test]
    async fn rules_keyed_by_code() {
        let (_dir, store) = open_test_store().await;
        store
            .upsert_rule("SEC-001", "never echo credentials", RuleSeverity::Hard)
            .await
            .unwrap();
        store
            .upsert_rule("GEN-010", "prefer short answers", RuleSeverity::Soft)
            .await
            .unwrap();

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].code, "GEN-010");

        store.remove_rule("GEN-010").await.unwrap();
        assert!(store.get_rule("GEN-010").await.unwrap().is_none());
    }
}
