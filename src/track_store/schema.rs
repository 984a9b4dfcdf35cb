//! Database schema for tracks.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

// =============================================================================
// Tracks Table - Version 0
// =============================================================================

const TRACKS_TABLE_V0: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "external_id",
            &SqlType::Integer,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("source_id", &SqlType::Text),
        sqlite_column!("content_handle", &SqlType::Text),
        sqlite_column!("content_unique_token", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("artist", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("cover_url", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!("duration", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("failure_kind", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_tracks_status", "status"),
        ("idx_tracks_content_unique_token", "content_unique_token"),
    ],
};

pub const TRACK_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[TRACKS_TABLE_V0],
    migration: None,
}];
