//! Database schema for work_queue.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Work Queue Table - Version 0
// =============================================================================

const WORK_QUEUE_TABLE_V0: Table = Table {
    name: "work_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "retry_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("max_retries", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!("next_retry_at", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
        // Set once terminal-failure handling of a DEAD job succeeded
        sqlite_column!("reconciled_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_work_queue_status_priority", "status, priority, created_at"),
        ("idx_work_queue_next_retry", "next_retry_at"),
    ],
};

pub const WORK_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[WORK_QUEUE_TABLE_V0],
    migration: None,
}];
