use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Final transfer statistics captured from the last progress sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    pub transferred_bytes: u64,
    pub elapsed_ms: u64,
    pub bytes_per_second: f64,
}

/// Persisted metadata for a cached track, one row per resource id.
///
/// A record existing for an id means the encoded artifact was durably
/// written first; the two are only ever valid together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<i64>,
    pub view_count: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub accent_color: Option<String>,
    pub checksum_sha256: Option<String>,
    pub transfer: Option<TransferStats>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_seconds: None,
            view_count: None,
            thumbnail_url: None,
            accent_color: None,
            checksum_sha256: None,
            transfer: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let transferred: Option<i64> = row.get("transferred_bytes")?;
        let elapsed: Option<i64> = row.get("elapsed_ms")?;
        let speed: Option<f64> = row.get("bytes_per_second")?;
        let transfer = match (transferred, elapsed, speed) {
            (Some(bytes), Some(ms), Some(bps)) => Some(TransferStats {
                transferred_bytes: bytes.max(0) as u64,
                elapsed_ms: ms.max(0) as u64,
                bytes_per_second: bps,
            }),
            _ => None,
        };
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            duration_seconds: row.get("duration_s")?,
            view_count: row.get("view_count")?,
            thumbnail_url: row.get("thumbnail_url")?,
            accent_color: row.get("accent_color")?,
            checksum_sha256: row.get("checksum_sha256")?,
            transfer,
            created_at: parse_timestamp(row.get("created_at")?)?,
            updated_at: parse_timestamp(row.get("updated_at")?)?,
        })
    }
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
