//! Track record storage and persistence.
//!
//! Provides SQLite-backed storage for track records. Several writers race on
//! the same record (controller, stage handlers, reconciler), so writes are
//! field-level merges and conditional updates rather than blind overwrites.

use super::models::*;
use super::schema::TRACK_STORE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const UNKNOWN_TITLE: &str = "Unknown Track";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Trait for track record storage operations.
pub trait TrackStore: Send + Sync {
    /// Get the record for an external id, creating it in `processing` from the
    /// reference if absent. Returns the record and whether it already existed.
    fn ensure_by_external_id(&self, reference: &TrackReference) -> Result<(TrackRecord, bool)>;

    /// Insert or merge a record, keyed by external id, and return the stored row.
    ///
    /// Merge rules:
    /// - empty resolution fields never erase stored ones
    /// - non-empty descriptive fields replace stored ones
    /// - an incoming `processing` never downgrades a stored `ready`
    fn upsert(&self, record: &TrackRecord) -> Result<TrackRecord>;

    /// Get a record by its external catalog id.
    fn get_by_external_id(&self, external_id: i64) -> Result<Option<TrackRecord>>;

    /// Get a record by its internal surrogate id.
    fn get_by_id(&self, id: i64) -> Result<Option<TrackRecord>>;

    /// Conditionally update the status of a record.
    ///
    /// A `ready` record is never touched. Returns true if a row was updated.
    fn set_status(
        &self,
        key: TrackKey,
        status: TrackStatus,
        failure_kind: Option<FailureKind>,
    ) -> Result<bool>;

    /// Drop an expired content handle and move the record back to `processing`.
    ///
    /// Only applies while the stored handle is still `expected_handle`, so a
    /// handle written by a newer upload survives. Returns true if a row was updated.
    fn invalidate_content_handle(&self, external_id: i64, expected_handle: &str) -> Result<bool>;

    /// Get a record by either identity.
    fn get(&self, key: TrackKey) -> Result<Option<TrackRecord>> {
        match key {
            TrackKey::External(id) => self.get_by_external_id(id),
            TrackKey::Internal(id) => self.get_by_id(id),
        }
    }
}

/// SQLite-backed track store.
pub struct SqliteTrackStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrackStore {
    /// Open an existing track database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, TRACK_STORE_VERSIONED_SCHEMAS, "track store")?;
        Ok(SqliteTrackStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        TRACK_STORE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteTrackStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<TrackRecord> {
        Ok(TrackRecord {
            id: row.get("id")?,
            external_id: row.get("external_id")?,
            source_id: row.get("source_id")?,
            content_handle: row.get("content_handle")?,
            content_unique_token: row.get("content_unique_token")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            cover_url: row.get("cover_url")?,
            duration: row.get("duration")?,
            status: TrackStatus::from_db_str(&row.get::<_, String>("status")?)
                .unwrap_or(TrackStatus::Error),
            failure_kind: row
                .get::<_, Option<String>>("failure_kind")?
                .and_then(|s| FailureKind::from_db_str(&s)),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn select_one(
        conn: &Connection,
        column: &str,
        value: i64,
    ) -> rusqlite::Result<Option<TrackRecord>> {
        conn.query_row(
            &format!("SELECT * FROM tracks WHERE {} = ?1", column),
            [value],
            Self::row_to_record,
        )
        .optional()
    }

    fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
        if value.trim().is_empty() {
            placeholder
        } else {
            value
        }
    }
}

fn key_column(key: TrackKey) -> (&'static str, i64) {
    match key {
        TrackKey::External(id) => ("external_id", id),
        TrackKey::Internal(id) => ("id", id),
    }
}

impl TrackStore for SqliteTrackStore {
    fn ensure_by_external_id(&self, reference: &TrackReference) -> Result<(TrackRecord, bool)> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp();

        let inserted = conn
            .execute(
                r#"INSERT INTO tracks (
                    external_id, title, artist, cover_url, duration, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(external_id) DO NOTHING"#,
                params![
                    reference.external_id,
                    Self::or_placeholder(&reference.title, UNKNOWN_TITLE),
                    Self::or_placeholder(&reference.artist, UNKNOWN_ARTIST),
                    reference.cover_url,
                    reference.duration,
                    TrackStatus::Processing.as_db_str(),
                    now,
                ],
            )
            .context("Failed to insert track record")?;

        let record = Self::select_one(&conn, "external_id", reference.external_id)?
            .with_context(|| {
                format!(
                    "Track {} vanished right after insert",
                    reference.external_id
                )
            })?;

        Ok((record, inserted == 0))
    }

    fn upsert(&self, record: &TrackRecord) -> Result<TrackRecord> {
        if record.status == TrackStatus::Ready
            && record.content_handle.as_deref().unwrap_or("").is_empty()
        {
            bail!(
                "Refusing to mark track {} ready without a content handle",
                record.external_id
            );
        }

        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp();
        let failure_kind = match record.status {
            TrackStatus::Error => record.failure_kind.map(|k| k.as_db_str()),
            _ => None,
        };

        let stored = conn
            .query_row(
                r#"INSERT INTO tracks (
                    external_id, source_id, content_handle, content_unique_token,
                    title, artist, cover_url, duration, status, failure_kind,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                ON CONFLICT(external_id) DO UPDATE SET
                    source_id = COALESCE(NULLIF(excluded.source_id, ''), tracks.source_id),
                    content_handle = COALESCE(NULLIF(excluded.content_handle, ''), tracks.content_handle),
                    content_unique_token = COALESCE(NULLIF(excluded.content_unique_token, ''), tracks.content_unique_token),
                    title = CASE WHEN ?12 = '' THEN tracks.title ELSE excluded.title END,
                    artist = CASE WHEN ?13 = '' THEN tracks.artist ELSE excluded.artist END,
                    cover_url = COALESCE(NULLIF(excluded.cover_url, ''), tracks.cover_url),
                    duration = CASE WHEN excluded.duration > 0 THEN excluded.duration ELSE tracks.duration END,
                    failure_kind = CASE
                        WHEN tracks.status = 'ready' AND excluded.status = 'processing' THEN tracks.failure_kind
                        ELSE excluded.failure_kind
                    END,
                    status = CASE
                        WHEN tracks.status = 'ready' AND excluded.status = 'processing' THEN tracks.status
                        ELSE excluded.status
                    END,
                    updated_at = excluded.updated_at
                RETURNING *"#,
                params![
                    record.external_id,
                    record.source_id,
                    record.content_handle,
                    record.content_unique_token,
                    Self::or_placeholder(&record.title, UNKNOWN_TITLE),
                    Self::or_placeholder(&record.artist, UNKNOWN_ARTIST),
                    record.cover_url,
                    record.duration,
                    record.status.as_db_str(),
                    failure_kind,
                    now,
                    record.title.trim(),
                    record.artist.trim(),
                ],
                Self::row_to_record,
            )
            .with_context(|| format!("Failed to upsert track {}", record.external_id))?;

        Ok(stored)
    }

    fn get_by_external_id(&self, external_id: i64) -> Result<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::select_one(&conn, "external_id", external_id)?)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<TrackRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::select_one(&conn, "id", id)?)
    }

    fn set_status(
        &self,
        key: TrackKey,
        status: TrackStatus,
        failure_kind: Option<FailureKind>,
    ) -> Result<bool> {
        if status == TrackStatus::Ready {
            bail!("Status ready can only be reached through upsert with a content handle");
        }

        let conn = self.conn.lock().unwrap();
        let (column, id) = key_column(key);
        let failure_kind = match status {
            TrackStatus::Error => failure_kind.map(|k| k.as_db_str()),
            _ => None,
        };

        let updated = conn
            .execute(
                &format!(
                    "UPDATE tracks SET status = ?1, failure_kind = ?2, updated_at = ?3 \
                     WHERE {} = ?4 AND status != 'ready'",
                    column
                ),
                params![
                    status.as_db_str(),
                    failure_kind,
                    chrono::Utc::now().timestamp(),
                    id
                ],
            )
            .with_context(|| format!("Failed to update status of track {}", key))?;

        Ok(updated > 0)
    }

    fn invalidate_content_handle(&self, external_id: i64, expected_handle: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                r#"UPDATE tracks SET
                    content_handle = NULL,
                    content_unique_token = NULL,
                    status = 'processing',
                    failure_kind = NULL,
                    updated_at = ?1
                WHERE external_id = ?2 AND content_handle = ?3"#,
                params![chrono::Utc::now().timestamp(), external_id, expected_handle],
            )
            .with_context(|| format!("Failed to invalidate content of track {}", external_id))?;

        Ok(updated > 0)
    }
}
