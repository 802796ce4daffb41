use std::str::FromStr;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{ScheduleType, ScheduledTask};

impl Store {
    /// Insert a task. `next_run` must already be computed — enabled tasks
    /// always carry one.
    pub async fn create_task(
        &self,
        name: &str,
        schedule_type: ScheduleType,
        schedule_value: &str,
        payload: &str,
        next_run: &str,
        created_by: i64,
    ) -> Result<ScheduledTask> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO scheduled_tasks
             (name, schedule_type, schedule_value, payload, enabled, last_run,
              next_run, run_count, created_by)
             VALUES (?1, ?2, ?3, ?4, 1, NULL, ?5, 0, ?6)",
            rusqlite::params![
                name,
                schedule_type.to_string(),
                schedule_value,
                payload,
                next_run,
                created_by
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_task(id).await?.ok_or(StoreError::NotFound {
            what: "scheduled task",
            id: id.to_string(),
        })
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, name, schedule_type, schedule_value, payload, enabled,
                    last_run, next_run, run_count, created_by
             FROM scheduled_tasks WHERE id = ?1",
            rusqlite::params![id],
            row_to_task,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    /// Enabled tasks due at or before `now`, oldest due first.
    pub async fn due_tasks(&self, now: &str) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule_type, schedule_value, payload, enabled,
                    last_run, next_run, run_count, created_by
             FROM scheduled_tasks
             WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1
             ORDER BY next_run ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![now], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn list_tasks(&self, enabled_only: bool) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn().await?;
        let sql = if enabled_only {
            "SELECT id, name, schedule_type, schedule_value, payload, enabled,
                    last_run, next_run, run_count, created_by
             FROM scheduled_tasks WHERE enabled = 1 ORDER BY next_run"
        } else {
            "SELECT id, name, schedule_type, schedule_value, payload, enabled,
                    last_run, next_run, run_count, created_by
             FROM scheduled_tasks ORDER BY next_run"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Record a completed run and schedule the next one.
    pub async fn reschedule_task(&self, id: i64, last_run: &str, next_run: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE scheduled_tasks
             SET last_run = ?1, next_run = ?2, run_count = run_count + 1
             WHERE id = ?3",
            rusqlite::params![last_run, next_run, id],
        )?;
        Ok(())
    }

    /// Record a run whose schedule could not produce a next instant —
    /// disable rather than leave an enabled task without `next_run`.
    pub async fn disable_task_after_run(&self, id: i64, last_run: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE scheduled_tasks
             SET enabled = 0, last_run = ?1, run_count = run_count + 1
             WHERE id = ?2",
            rusqlite::params![last_run, id],
        )?;
        Ok(())
    }

    pub async fn set_task_enabled(&self, id: i64, enabled: bool, next_run: Option<&str>) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE scheduled_tasks SET enabled = ?1, next_run = COALESCE(?2, next_run)
             WHERE id = ?3",
            rusqlite::params![enabled as i64, next_run, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "scheduled task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn delete_task(&self, id: i64) -> Result<bool> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "DELETE FROM scheduled_tasks WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(n > 0)
    }

    pub async fn delete_task_by_name(&self, name: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "DELETE FROM scheduled_tasks WHERE name = ?1",
            rusqlite::params![name],
        )?;
        Ok(n > 0)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let type_str: String = row.get(2)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule_type: ScheduleType::from_str(&type_str).unwrap_or(ScheduleType::Once),
        schedule_value: row.get(3)?,
        payload: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        last_run: row.get(6)?,
        next_run: row.get(7)?,
        run_count: row.get(8)?,
        created_by: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn due_selection_respects_next_run() {
        let (_dir, store) = open_test_store().await;
        store
            .create_task(
                "early",
                ScheduleType::Once,
                "2024-01-01T00:00:00+00:00",
                "ping",
                "2024-01-01T00:00:00+00:00",
                1,
            )
            .await
            .unwrap();
        store
            .create_task(
                "late",
                ScheduleType::Once,
                "2099-01-01T00:00:00+00:00",
                "ping",
                "2099-01-01T00:00:00+00:00",
                1,
            )
            .await
            .unwrap();

        let due = store.due_tasks("2025-06-01T00:00:00+00:00").await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "early");
    }

    #[tokio::test]
    async fn once_task_deletion() {
        let (_dir, store) = open_test_store().await;
        let t = store
            .create_task(
                "remind",
                ScheduleType::Once,
                "2024-01-01T00:00:00+00:00",
                "water",
                "2024-01-01T00:00:00+00:00",
                1,
            )
            .await
            .unwrap();
        assert!(store.delete_task(t.id).await.unwrap());
        assert!(store.get_task(t.id).await.unwrap().is_none());
        // Second delete is a no-op.
        assert!(!store.delete_task(t.id).await.unwrap());
    }
}
