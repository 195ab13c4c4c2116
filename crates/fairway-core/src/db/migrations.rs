//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: rounds, holes, clubs, sync queue, sync metadata
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS rounds (
            id INTEGER PRIMARY KEY,
            server_id INTEGER,
            course_name TEXT NOT NULL,
            date TEXT NOT NULL,
            total_score INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            ended_at INTEGER,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            idempotency_key TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rounds_status ON rounds(sync_status);
        CREATE TABLE IF NOT EXISTS holes (
            id INTEGER PRIMARY KEY,
            server_id INTEGER,
            round_id INTEGER NOT NULL,
            hole_number INTEGER NOT NULL,
            par INTEGER NOT NULL,
            score INTEGER NOT NULL,
            putts INTEGER NOT NULL DEFAULT 0,
            fairway_status TEXT NOT NULL DEFAULT 'na',
            gir_status TEXT NOT NULL DEFAULT 'missed',
            proximity_to_hole REAL,
            club_ids TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            UNIQUE (round_id, hole_number)
        );
        CREATE INDEX IF NOT EXISTS idx_holes_round ON holes(round_id);
        CREATE TABLE IF NOT EXISTS clubs (
            id INTEGER PRIMARY KEY,
            server_id INTEGER,
            name TEXT NOT NULL,
            club_type TEXT NOT NULL,
            loft REAL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            idempotency_key TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            parent_id INTEGER,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            snapshot_updated_at INTEGER NOT NULL,
            idempotency_key TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            state TEXT NOT NULL DEFAULT 'pending',
            cancelled INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (entity_kind, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_state ON sync_queue(state);
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    Ok(())
}

/// Migration to version 2: course builder tables
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            server_id INTEGER,
            name TEXT NOT NULL,
            city TEXT,
            hole_count INTEGER NOT NULL DEFAULT 18,
            published INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            idempotency_key TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS course_holes (
            id INTEGER PRIMARY KEY,
            server_id INTEGER,
            course_id INTEGER NOT NULL,
            hole_number INTEGER NOT NULL,
            par INTEGER NOT NULL DEFAULT 4,
            yardage INTEGER,
            geometry TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            UNIQUE (course_id, hole_number)
        );
        CREATE INDEX IF NOT EXISTS idx_course_holes_course ON course_holes(course_id);
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_reach_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), 2);
    }

    #[test]
    fn run_twice_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn queue_dedup_constraint_exists() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO sync_queue (entity_kind, entity_id, operation, payload, snapshot_updated_at, created_at, updated_at)
             VALUES ('round', -1, 'create', '{}', 0, 0, 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO sync_queue (entity_kind, entity_id, operation, payload, snapshot_updated_at, created_at, updated_at)
             VALUES ('round', -1, 'update', '{}', 0, 0, 0)",
            [],
        );
        assert!(dup.is_err());
    }
}
