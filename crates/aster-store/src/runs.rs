use std::str::FromStr;

use uuid::Uuid;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{RunStatus, SubAgentRun};

impl Store {
    pub async fn create_run(&self, parent_session_id: &str, task: &str) -> Result<SubAgentRun> {
        let run_id = Uuid::new_v4().to_string();
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO subagent_runs
             (run_id, parent_session_id, task, status, result, error,
              input_tokens, output_tokens, started_at, finished_at)
             VALUES (?1, ?2, ?3, 'pending', NULL, NULL, 0, 0, ?4, NULL)",
            rusqlite::params![run_id, parent_session_id, task, Self::now()],
        )?;
        drop(conn);
        self.get_run(&run_id).await?.ok_or(StoreError::NotFound {
            what: "sub-agent run",
            id: run_id,
        })
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<SubAgentRun>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT run_id, parent_session_id, task, status, result, error,
                    input_tokens, output_tokens, started_at, finished_at
             FROM subagent_runs WHERE run_id = ?1",
            rusqlite::params![run_id],
            row_to_run,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn mark_run_running(&self, run_id: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE subagent_runs SET status = 'running' WHERE run_id = ?1",
            rusqlite::params![run_id],
        )?;
        Ok(())
    }

    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        result: Option<&str>,
        error: Option<&str>,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE subagent_runs
             SET status = ?1, result = ?2, error = ?3,
                 input_tokens = ?4, output_tokens = ?5, finished_at = ?6
             WHERE run_id = ?7",
            rusqlite::params![
                status.to_string(),
                result,
                error,
                input_tokens,
                output_tokens,
                Self::now(),
                run_id
            ],
        )?;
        Ok(())
    }

    /// Runs still pending or running, optionally scoped to a parent session.
    pub async fn list_active_runs(&self, parent_session_id: Option<&str>) -> Result<Vec<SubAgentRun>> {
        let conn = self.conn().await?;
        let mut out = Vec::new();
        match parent_session_id {
            Some(parent) => {
                let mut stmt = conn.prepare(
                    "SELECT run_id, parent_session_id, task, status, result, error,
                            input_tokens, output_tokens, started_at, finished_at
                     FROM subagent_runs
                     WHERE parent_session_id = ?1 AND status IN ('pending', 'running')
                     ORDER BY started_at",
                )?;
                let rows = stmt.query_map(rusqlite::params![parent], row_to_run)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT run_id, parent_session_id, task, status, result, error,
                            input_tokens, output_tokens, started_at, finished_at
                     FROM subagent_runs
                     WHERE status IN ('pending', 'running')
                     ORDER BY started_at",
                )?;
                let rows = stmt.query_map([], row_to_run)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    /// Mark every in-flight run of a session cancelled; returns the run ids.
    pub async fn cancel_runs_by_session(&self, parent_session_id: &str) -> Result<Vec<String>> {
        let active = self.list_active_runs(Some(parent_session_id)).await?;
        let conn = self.conn().await?;
        for run in &active {
            conn.execute(
                "UPDATE subagent_runs SET status = 'cancelled', finished_at = ?1
                 WHERE run_id = ?2",
                rusqlite::params![Self::now(), run.run_id],
            )?;
        }
        Ok(active.into_iter().map(|r| r.run_id).collect())
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubAgentRun> {
    let status_str: String = row.get(3)?;
    Ok(SubAgentRun {
        run_id: row.get(0)?,
        parent_session_id: row.get(1)?,
        task: row.get(2)?,
        status: RunStatus::from_str(&status_str).unwrap_or(RunStatus::Pending),
        result: row.get(4)?,
        error: row.get(5)?,
        input_tokens: row.get(6)?,
        output_tokens: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn run_lifecycle() {
        let (_dir, store) = open_test_store().await;
        let run = store.create_run("session-1", "summarise the repo").await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        store.mark_run_running(&run.run_id).await.unwrap();
        store
            .finish_run(&run.run_id, RunStatus::Completed, Some("done"), None, 120, 30)
            .await
            .unwrap();

        let reread = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(reread.status, RunStatus::Completed);
        assert_eq!(reread.result.as_deref(), Some("done"));
        assert_eq!(reread.input_tokens, 120);
        assert!(reread.finished_at.is_some());
    }

    #[tokio::test]
    async fn session_cancel_sweeps_active_runs() {
        let (_dir, store) = open_test_store().await;
        let a = store.create_run("session-1", "a").await.unwrap();
        let b = store.create_run("session-1", "b").await.unwrap();
        store
            .finish_run(&b.run_id, RunStatus::Completed, Some("x"), None, 0, 0)
            .await
            .unwrap();

        let cancelled = store.cancel_runs_by_session("session-1").await.unwrap();
        assert_eq!(cancelled, vec![a.run_id.clone()]);
        let reread = store.get_run(&a.run_id).await.unwrap().unwrap();
        assert_eq!(reread.status, RunStatus::Cancelled);
    }
}
