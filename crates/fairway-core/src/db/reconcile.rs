//! Central id reconciliation routine
//!
//! When the server confirms a creation it hands back positive ids for the
//! parent and its dependents. Swapping a whole family out of the provisional
//! id space is the highest-risk write in the system: done piecemeal it can
//! orphan children under a retired parent id or drop them entirely. It is
//! therefore implemented exactly once, parameterized by entity family, and
//! runs inside a single transaction.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::EntityKind;
use crate::util::now_millis;

/// Dependent table wiring for a parent entity.
#[derive(Debug, Clone, Copy)]
pub struct ChildSpec {
    pub table: &'static str,
    pub fk_column: &'static str,
}

/// Table wiring for one reconcilable entity family.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSpec {
    pub kind: EntityKind,
    pub table: &'static str,
    pub child: Option<ChildSpec>,
}

pub const ROUND_FAMILY: ReconcileSpec = ReconcileSpec {
    kind: EntityKind::Round,
    table: "rounds",
    child: Some(ChildSpec {
        table: "holes",
        fk_column: "round_id",
    }),
};

pub const CLUB_FAMILY: ReconcileSpec = ReconcileSpec {
    kind: EntityKind::Club,
    table: "clubs",
    child: None,
};

pub const COURSE_FAMILY: ReconcileSpec = ReconcileSpec {
    kind: EntityKind::Course,
    table: "courses",
    child: Some(ChildSpec {
        table: "course_holes",
        fk_column: "course_id",
    }),
};

pub const COURSE_HOLE_FAMILY: ReconcileSpec = ReconcileSpec {
    kind: EntityKind::CourseHole,
    table: "course_holes",
    child: None,
};

/// Server-assigned ids for a confirmed family. Children are matched to local
/// rows by the caller (hole number is the join key on every wire surface).
#[derive(Debug, Clone, Default)]
pub struct ServerIds {
    pub server_id: i64,
    /// `(local_id, server_id)` pairs for confirmed dependents
    pub children: Vec<(i64, i64)>,
}

/// What the reconciliation did to the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Snapshot matched: the family is keyed by server ids and `Synced`.
    Synced,
    /// A local edit landed after the push snapshot was taken. Ids were
    /// reparented (the server record exists either way) but every field
    /// value and the dirty status were preserved; the caller re-snapshots
    /// the task as an update against the server id.
    KeptDirty,
}

/// Atomically reparent a family from `local_id` to the confirmed server ids
/// and rewrite not-yet-dispatched queue tasks that reference the retired id.
pub fn reconcile(
    conn: &Connection,
    spec: &ReconcileSpec,
    local_id: i64,
    ids: &ServerIds,
    snapshot_updated_at: i64,
) -> Result<ReconcileOutcome> {
    let tx = conn.unchecked_transaction()?;

    let updated_at: i64 = tx
        .query_row(
            &format!("SELECT updated_at FROM {} WHERE id = ?", spec.table),
            params![local_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("{} {local_id}", spec.kind)))?;
    let clean = updated_at == snapshot_updated_at;
    let now = now_millis();

    // A concurrent pull may already have inserted the server copy; the local
    // family is authoritative for it.
    if local_id != ids.server_id {
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?", spec.table),
            params![ids.server_id],
        )?;
    }

    if clean {
        tx.execute(
            &format!(
                "UPDATE {} SET id = ?, server_id = ?, sync_status = 'synced', updated_at = ?
                 WHERE id = ?",
                spec.table
            ),
            params![ids.server_id, ids.server_id, now, local_id],
        )?;
    } else {
        tx.execute(
            &format!("UPDATE {} SET id = ?, server_id = ? WHERE id = ?", spec.table),
            params![ids.server_id, ids.server_id, local_id],
        )?;
    }

    if let Some(child) = spec.child {
        for (child_local, child_server) in &ids.children {
            if child_local != child_server {
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?", child.table),
                    params![child_server],
                )?;
            }
            if clean {
                tx.execute(
                    &format!(
                        "UPDATE {} SET id = ?, server_id = ?, sync_status = 'synced', updated_at = ?
                         WHERE id = ?",
                        child.table
                    ),
                    params![child_server, child_server, now, child_local],
                )?;
            } else {
                tx.execute(
                    &format!(
                        "UPDATE {} SET id = ?, server_id = ? WHERE id = ?",
                        child.table
                    ),
                    params![child_server, child_server, child_local],
                )?;
            }
        }
        // Every dependent follows the parent into the new id space,
        // including rows the server response did not cover.
        tx.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ?",
                child.table, child.fk_column, child.fk_column
            ),
            params![ids.server_id, local_id],
        )?;
    }

    // Not-yet-dispatched tasks still referencing the retired id follow too;
    // the in-flight task that drove this reconciliation is the caller's to
    // finish.
    tx.execute(
        "UPDATE sync_queue SET entity_id = ? WHERE entity_kind = ? AND entity_id = ? AND state != 'in_flight'",
        params![ids.server_id, spec.kind.as_str(), local_id],
    )?;
    tx.execute(
        "UPDATE sync_queue SET parent_id = ? WHERE parent_id = ? AND state != 'in_flight'",
        params![ids.server_id, local_id],
    )?;

    tx.commit()?;
    Ok(if clean {
        ReconcileOutcome::Synced
    } else {
        ReconcileOutcome::KeptDirty
    })
}
