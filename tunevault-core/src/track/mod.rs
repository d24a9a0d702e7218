mod error;
mod models;
mod store;

pub use error::{TrackError, TrackResult};
pub use models::{TrackRecord, TransferStats};
pub use store::{SqliteTrackStore, SqliteTrackStoreBuilder};

const FILENAME_STRIP: &[char] = &['"', '\'', '/', '?', ':', ';', '|'];

/// Removes characters that are unsafe in artifact file names.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars().filter(|c| !FILENAME_STRIP.contains(c)).collect()
}

/// Derives (artist, title) from a raw track title.
///
/// The part before the first hyphen becomes the artist, the remainder the
/// title. When there is no hyphen, or either side is empty after trimming,
/// the artist falls back to "Unknown" and the full title is kept verbatim.
pub fn split_artist_title(raw: &str) -> (String, String) {
    if let Some(index) = raw.find('-') {
        let artist = raw[..index].trim();
        let title = raw[index + 1..].trim();
        if !artist.is_empty() && !title.is_empty() {
            return (artist.to_string(), title.to_string());
        }
    }
    ("Unknown".to_string(), raw.to_string())
}
