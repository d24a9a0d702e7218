use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use flate2::{write::GzEncoder, Compression};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::error::{TrackError, TrackResult};
use super::models::TrackRecord;

const TRACK_SCHEMA: &str = include_str!("../../../sql/tracks.sql");

#[derive(Debug, Clone)]
pub struct SqliteTrackStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteTrackStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteTrackStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> TrackResult<SqliteTrackStore> {
        let path = self.path.ok_or(TrackError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteTrackStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTrackStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteTrackStore {
    pub fn builder() -> SqliteTrackStoreBuilder {
        SqliteTrackStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> TrackResult<Self> {
        SqliteTrackStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> TrackResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            TrackError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| TrackError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> TrackResult<()> {
        let conn = self.open()?;
        conn.execute_batch(TRACK_SCHEMA)?;
        Ok(())
    }

    pub fn put(&self, record: &TrackRecord) -> TrackResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO tracks (
                id, title, artist, duration_s, view_count, thumbnail_url,
                accent_color, checksum_sha256, transferred_bytes, elapsed_ms,
                bytes_per_second, updated_at
            ) VALUES (
                :id, :title, :artist, :duration_s, :view_count, :thumbnail_url,
                :accent_color, :checksum_sha256, :transferred_bytes, :elapsed_ms,
                :bytes_per_second, :updated_at
            )
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                duration_s = excluded.duration_s,
                view_count = excluded.view_count,
                thumbnail_url = excluded.thumbnail_url,
                accent_color = excluded.accent_color,
                checksum_sha256 = excluded.checksum_sha256,
                transferred_bytes = excluded.transferred_bytes,
                elapsed_ms = excluded.elapsed_ms,
                bytes_per_second = excluded.bytes_per_second,
                updated_at = excluded.updated_at",
            params![
                &record.id,
                &record.title,
                &record.artist,
                &record.duration_seconds,
                &record.view_count,
                &record.thumbnail_url,
                &record.accent_color,
                &record.checksum_sha256,
                record.transfer.as_ref().map(|t| t.transferred_bytes as i64),
                record.transfer.as_ref().map(|t| t.elapsed_ms as i64),
                record.transfer.as_ref().map(|t| t.bytes_per_second),
                record.updated_at.map(|dt| dt.naive_utc()),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> TrackResult<Option<TrackRecord>> {
        let conn = self.open()?;
        let record = conn
            .query_row("SELECT * FROM tracks WHERE id = ?1", [id], |row| {
                TrackRecord::from_row(row)
            })
            .optional()?;
        Ok(record)
    }

    pub fn delete(&self, id: &str) -> TrackResult<()> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM tracks WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(TrackError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn list(&self, limit: Option<usize>) -> TrackResult<Vec<TrackRecord>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM tracks ORDER BY created_at DESC, id ASC");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(TrackRecord::from_row(row)?);
        }
        Ok(records)
    }

    pub fn count(&self) -> TrackResult<i64> {
        let conn = self.open()?;
        let count = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn export_backup(&self, output: impl AsRef<Path>) -> TrackResult<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.open()?;
        let mut dump = String::new();
        dump.push_str(TRACK_SCHEMA);
        dump.push('\n');
        dump.push_str("BEGIN;\n");

        let mut stmt = conn.prepare(
            "SELECT id, title, artist, duration_s, view_count, thumbnail_url,
                    accent_color, checksum_sha256, transferred_bytes, elapsed_ms,
                    bytes_per_second, created_at, updated_at
             FROM tracks ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<i64>>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, Option<f64>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
            ))
        })?;

        for row in rows {
            let (
                id,
                title,
                artist,
                duration_s,
                view_count,
                thumbnail_url,
                accent_color,
                checksum,
                transferred_bytes,
                elapsed_ms,
                bytes_per_second,
                created_at,
                updated_at,
            ) = row?;
            dump.push_str(&format!(
                "INSERT INTO tracks (id, title, artist, duration_s, view_count, thumbnail_url, accent_color, checksum_sha256, transferred_bytes, elapsed_ms, bytes_per_second, created_at, updated_at) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {});\n",
                sql_quote(&id),
                sql_quote(&title),
                sql_quote(&artist),
                format_optional_integer(duration_s),
                format_optional_integer(view_count),
                format_optional_text(thumbnail_url),
                format_optional_text(accent_color),
                format_optional_text(checksum),
                format_optional_integer(transferred_bytes),
                format_optional_integer(elapsed_ms),
                format_optional_float(bytes_per_second),
                format_optional_text(created_at),
                format_optional_text(updated_at),
            ));
        }

        dump.push_str("COMMIT;\n");

        let file = File::create(output)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(dump.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    pub fn backup_to(&self, destination: impl AsRef<Path>) -> TrackResult<()> {
        let destination_path = destination.as_ref();
        let source = self.open()?;
        let mut dest = Connection::open(destination_path)?;
        configure_connection(&dest).map_err(|source| TrackError::Open {
            source,
            path: destination_path.to_path_buf(),
        })?;
        let backup = Backup::new(&source, &mut dest)?;
        backup.run_to_completion(10, StdDuration::from_millis(50), None)?;
        Ok(())
    }
}

fn sql_quote(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    format!("'{}'", escaped)
}

fn format_optional_integer(value: Option<i64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NULL".to_string())
}

fn format_optional_float(value: Option<f64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NULL".to_string())
}

fn format_optional_text(value: Option<String>) -> String {
    value
        .map(|v| sql_quote(&v))
        .unwrap_or_else(|| "NULL".to_string())
}
