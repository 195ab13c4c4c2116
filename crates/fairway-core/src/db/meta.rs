//! Key-value sync metadata (`sync_meta` table)
//!
//! Holds the provisional id sequence, session identity, and pull bookkeeping.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

pub const KEY_NEXT_LOCAL_ID: &str = "next_local_id";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_LAST_PULL_AT: &str = "last_pull_at";

/// Read a metadata value.
pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Write a metadata value.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
        params![key, value],
    )?;
    Ok(())
}

/// Remove a metadata value.
pub fn delete(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM sync_meta WHERE key = ?", params![key])?;
    Ok(())
}

/// Allocate the next provisional id from the durable decrementing sequence.
///
/// The first allocated id is `-1`. Must be called inside the transaction
/// that inserts the new record so the sequence never skips on rollback.
pub fn next_local_id(conn: &Connection) -> Result<i64> {
    let next = get(conn, KEY_NEXT_LOCAL_ID)?
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(-1);
    set(conn, KEY_NEXT_LOCAL_ID, &(next - 1).to_string())?;
    Ok(next)
}
