//! Schema initialisation. Safe to call on every startup: table creation is
//! conditional and additive alterations are wrapped in existence checks.

use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    create_identity_tables(conn)?;
    create_config_table(conn)?;
    create_user_tables(conn)?;
    create_session_tables(conn)?;
    create_memory_table(conn)?;
    create_ability_table(conn)?;
    create_task_table(conn)?;
    create_run_table(conn)?;
    apply_additive_migrations(conn)?;
    Ok(())
}

fn create_identity_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS identity (
            id          INTEGER PRIMARY KEY CHECK (id = 1),
            name        TEXT NOT NULL,
            motto       TEXT NOT NULL DEFAULT '',
            backstory   TEXT NOT NULL DEFAULT '',
            personality TEXT NOT NULL DEFAULT '',
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS soul (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            category    TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS rules (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            code        TEXT NOT NULL UNIQUE,
            content     TEXT NOT NULL,
            severity    TEXT NOT NULL DEFAULT 'soft',
            created_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_config_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS config (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_user_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            platform       TEXT NOT NULL,
            platform_id    TEXT NOT NULL,
            display_name   TEXT NOT NULL DEFAULT '',
            access_level   TEXT NOT NULL DEFAULT 'pending',
            is_first_owner INTEGER NOT NULL DEFAULT 0,
            preferences    TEXT NOT NULL DEFAULT '{}',
            aliases        TEXT NOT NULL DEFAULT '[]',
            created_at     TEXT NOT NULL,
            UNIQUE(platform, platform_id)
        );
        CREATE TABLE IF NOT EXISTS groups (
            id                TEXT PRIMARY KEY,
            platform          TEXT NOT NULL,
            platform_group_id TEXT NOT NULL,
            name              TEXT NOT NULL DEFAULT '',
            enabled           INTEGER NOT NULL DEFAULT 0,
            require_mention   INTEGER NOT NULL DEFAULT 1,
            allow_from        TEXT NOT NULL DEFAULT 'all',
            settings          TEXT NOT NULL DEFAULT '{}',
            UNIQUE(platform, platform_group_id)
        );",
    )?;
    Ok(())
}

fn create_session_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id               TEXT PRIMARY KEY,
            platform         TEXT NOT NULL,
            platform_chat_id TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'active',
            message_count    INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active
            ON sessions(platform, platform_chat_id)
            WHERE status = 'active';
        CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id   TEXT NOT NULL,
            role         TEXT NOT NULL,
            content      TEXT NOT NULL,
            tool_call_id TEXT,
            tool_name    TEXT,
            tool_args    TEXT,
            metadata     TEXT NOT NULL DEFAULT '{}',
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, created_at, id);",
    )?;
    Ok(())
}

fn create_memory_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            content      TEXT NOT NULL,
            category     TEXT NOT NULL DEFAULT 'fact',
            embedding    BLOB,
            source       TEXT NOT NULL DEFAULT 'user_confirmed',
            user_id      INTEGER,
            importance   REAL NOT NULL DEFAULT 0.5,
            access_count INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            accessed_at  TEXT
        );",
    )?;
    Ok(())
}

fn create_ability_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS abilities (
            name        TEXT PRIMARY KEY,
            version     TEXT NOT NULL DEFAULT '0.1.0',
            description TEXT NOT NULL DEFAULT '',
            enabled     INTEGER NOT NULL DEFAULT 1,
            config      TEXT NOT NULL DEFAULT '{}',
            source      TEXT NOT NULL DEFAULT 'builtin'
        );",
    )?;
    Ok(())
}

fn create_task_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT NOT NULL,
            schedule_type  TEXT NOT NULL,
            schedule_value TEXT NOT NULL,
            payload        TEXT NOT NULL,
            enabled        INTEGER NOT NULL DEFAULT 1,
            last_run       TEXT,
            next_run       TEXT,
            run_count      INTEGER NOT NULL DEFAULT 0,
            created_by     INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_due
            ON scheduled_tasks(enabled, next_run);",
    )?;
    Ok(())
}

fn create_run_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subagent_runs (
            run_id            TEXT PRIMARY KEY,
            parent_session_id TEXT NOT NULL,
            task              TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            result            TEXT,
            error             TEXT,
            input_tokens      INTEGER NOT NULL DEFAULT 0,
            output_tokens     INTEGER NOT NULL DEFAULT 0,
            started_at        TEXT NOT NULL,
            finished_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_parent
            ON subagent_runs(parent_session_id, status);",
    )?;
    Ok(())
}

/// Columns added after the initial release. Each is guarded by an existence
/// check so re-running the migration is a no-op.
fn apply_additive_migrations(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "users", "aliases", "TEXT NOT NULL DEFAULT '[]'")?;
    add_column_if_missing(conn, "memory", "accessed_at", "TEXT")?;
    add_column_if_missing(conn, "scheduled_tasks", "run_count", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition};"))?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='messages'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn additive_migration_does_not_duplicate_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        apply_additive_migrations(&conn).unwrap();
        assert!(column_exists(&conn, "users", "aliases").unwrap());
    }
}
