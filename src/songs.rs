use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::models::{ArtistRow, SongRecord, SongRow};

/// The `songs` and `artists` dimensions derived from song metadata.
#[derive(Debug, Default)]
pub struct SongDimensions {
    /// Sorted by song_id.
    pub songs: Vec<SongRow>,
    /// Sorted by artist_id.
    pub artists: Vec<ArtistRow>,
    /// Records without a song_id (no song row).
    pub missing_song_id: usize,
    /// Records without an artist_id (no artist row).
    pub missing_artist_id: usize,
    /// Records whose song_id was already taken by an earlier record.
    pub duplicate_songs: usize,
}

/// Build the song and artist dimensions.
///
/// When a key appears more than once the first record in input order wins;
/// later records for the same key are ignored even if their attributes differ.
pub fn extract_song_dimensions(records: &[SongRecord]) -> SongDimensions {
    let mut songs: BTreeMap<String, SongRow> = BTreeMap::new();
    let mut artists: BTreeMap<String, ArtistRow> = BTreeMap::new();
    let mut dims = SongDimensions::default();

    for record in records {
        match &record.song_id {
            Some(song_id) => match songs.entry(song_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(song_row(song_id, record));
                }
                Entry::Occupied(existing) => {
                    if existing.get() != &song_row(song_id, record) {
                        log::debug!("Conflicting records for song {}, keeping the first", song_id);
                    }
                    dims.duplicate_songs += 1;
                }
            },
            None => dims.missing_song_id += 1,
        }

        match &record.artist_id {
            Some(artist_id) => {
                artists
                    .entry(artist_id.clone())
                    .or_insert_with(|| artist_row(artist_id, record));
            }
            None => dims.missing_artist_id += 1,
        }
    }

    dims.songs = songs.into_values().collect();
    dims.artists = artists.into_values().collect();

    log::info!(
        "Extracted {} songs and {} artists from {} records",
        dims.songs.len(),
        dims.artists.len(),
        records.len()
    );
    dims
}

fn song_row(song_id: &str, record: &SongRecord) -> SongRow {
    SongRow {
        song_id: song_id.to_string(),
        title: record.title.clone(),
        artist_id: record.artist_id.clone(),
        year: record.year.and_then(|y| i32::try_from(y).ok()),
        duration: record.duration,
    }
}

fn artist_row(artist_id: &str, record: &SongRecord) -> ArtistRow {
    ArtistRow {
        artist_id: artist_id.to_string(),
        name: record.artist_name.clone(),
        location: record.artist_location.clone(),
        latitude: record.artist_latitude,
        longitude: record.artist_longitude,
    }
}
