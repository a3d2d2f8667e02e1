use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::models::{ActivityRecord, ArtistRow, SongRow, SongplayRow, TimeRow, UserRow};
use crate::NEXT_SONG_PAGE;

/// Song/artist ids resolved for a play.
#[derive(Debug, Clone, PartialEq)]
pub struct SongMatch {
    pub song_id: String,
    pub artist_id: String,
    pub duration: f64,
}

/// Lookup from (title, artist name) to candidate songs, used to resolve
/// the foreign keys of each play.
///
/// Only songs with a title, a duration and an artist present in the artists
/// dimension are indexed, so every match references existing dimension rows.
#[derive(Debug, Default)]
pub struct SongIndex {
    by_title: HashMap<String, HashMap<String, Vec<SongMatch>>>,
    tolerance: f64,
}

impl SongIndex {
    pub fn new(songs: &[SongRow], artists: &[ArtistRow], tolerance: f64) -> Self {
        let names: HashMap<&str, &str> = artists
            .iter()
            .filter_map(|a| a.name.as_deref().map(|n| (a.artist_id.as_str(), n)))
            .collect();

        let mut by_title: HashMap<String, HashMap<String, Vec<SongMatch>>> = HashMap::new();
        for song in songs {
            let (Some(title), Some(artist_id), Some(duration)) =
                (&song.title, &song.artist_id, song.duration)
            else {
                continue;
            };
            let Some(name) = names.get(artist_id.as_str()) else {
                continue;
            };
            by_title
                .entry(title.clone())
                .or_default()
                .entry(name.to_string())
                .or_default()
                .push(SongMatch {
                    song_id: song.song_id.clone(),
                    artist_id: artist_id.clone(),
                    duration,
                });
        }

        // Ascending song_id so ties resolve to the smallest id
        for candidates in by_title.values_mut().flat_map(|m| m.values_mut()) {
            candidates.sort_by(|a, b| a.song_id.cmp(&b.song_id));
        }

        Self { by_title, tolerance }
    }

    /// Find the song with this title and artist whose duration is within
    /// tolerance of `length`. The closest duration wins.
    pub fn lookup(&self, title: &str, artist: &str, length: f64) -> Option<&SongMatch> {
        let candidates = self.by_title.get(title)?.get(artist)?;
        let mut best: Option<(&SongMatch, f64)> = None;
        for candidate in candidates {
            let diff = (candidate.duration - length).abs();
            if diff > self.tolerance {
                continue;
            }
            if best.is_none_or(|(_, best_diff)| diff < best_diff) {
                best = Some((candidate, diff));
            }
        }
        best.map(|(m, _)| m)
    }

    pub fn len(&self) -> usize {
        self.by_title
            .values()
            .flat_map(|m| m.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The `users`, `time` and `songplays` tables derived from the activity log.
#[derive(Debug, Default)]
pub struct ActivityTables {
    /// Sorted by user_id.
    pub users: Vec<UserRow>,
    /// Sorted by start_time.
    pub time: Vec<TimeRow>,
    /// Ordered by songplay_id.
    pub songplays: Vec<SongplayRow>,
    /// Records whose page is not a song play.
    pub events_skipped: usize,
    /// Plays dropped for a missing or unusable ts/userId.
    pub plays_dropped: usize,
    /// Plays with no matching song (null song_id/artist_id).
    pub unmatched_plays: usize,
}

/// A play that passed validation.
struct Play<'a> {
    input_index: usize,
    ts: i64,
    start: DateTime<Utc>,
    user_id: i64,
    record: &'a ActivityRecord,
}

/// Calendar fields for a play timestamp, computed in UTC.
pub fn time_row(start: &DateTime<Utc>) -> TimeRow {
    TimeRow {
        start_time: start.timestamp_millis(),
        hour: start.hour() as i32,
        day: start.day() as i32,
        week: start.iso_week().week() as i32,
        month: start.month() as i32,
        year: start.year(),
        weekday: start.weekday().num_days_from_monday() as i32,
    }
}

/// Build users, time and songplays from activity records.
///
/// Only `NextSong` records count as plays. Users take their attributes from
/// their latest play (by ts, then input order). Songplay ids are assigned
/// from 1 in (ts, user_id, session_id, item_in_session, input order) order,
/// so identical input always yields identical ids.
pub fn extract_activity_tables(records: &[ActivityRecord], index: &SongIndex) -> ActivityTables {
    let mut tables = ActivityTables::default();

    let mut plays: Vec<Play> = Vec::new();
    for (input_index, record) in records.iter().enumerate() {
        if record.page.as_deref() != Some(NEXT_SONG_PAGE) {
            tables.events_skipped += 1;
            continue;
        }
        let (Some(ts), Some(user_id)) = (record.ts, record.user_id) else {
            log::debug!("Dropping play #{}: missing ts or userId", input_index);
            tables.plays_dropped += 1;
            continue;
        };
        let Some(start) = DateTime::from_timestamp_millis(ts) else {
            log::debug!("Dropping play #{}: ts {} out of range", input_index, ts);
            tables.plays_dropped += 1;
            continue;
        };
        plays.push(Play {
            input_index,
            ts,
            start,
            user_id,
            record,
        });
    }

    // Users: latest play wins; later input wins ties
    let mut users: BTreeMap<i64, (i64, usize, &ActivityRecord)> = BTreeMap::new();
    for play in &plays {
        let order = (play.ts, play.input_index);
        users
            .entry(play.user_id)
            .and_modify(|current| {
                if order >= (current.0, current.1) {
                    *current = (play.ts, play.input_index, play.record);
                }
            })
            .or_insert((play.ts, play.input_index, play.record));
    }
    tables.users = users
        .into_iter()
        .map(|(user_id, (_, _, record))| UserRow {
            user_id,
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            gender: record.gender.clone(),
            level: record.level.clone(),
        })
        .collect();

    let mut time: BTreeMap<i64, TimeRow> = BTreeMap::new();
    for play in &plays {
        time.entry(play.ts).or_insert_with(|| time_row(&play.start));
    }
    tables.time = time.into_values().collect();

    plays.sort_by_key(|p| {
        (
            p.ts,
            p.user_id,
            p.record.session_id,
            p.record.item_in_session,
            p.input_index,
        )
    });

    tables.songplays = plays
        .iter()
        .enumerate()
        .map(|(i, play)| {
            let record = play.record;
            let matched = match (&record.song, &record.artist, record.length) {
                (Some(song), Some(artist), Some(length)) => index.lookup(song, artist, length),
                _ => None,
            };
            SongplayRow {
                songplay_id: i as i64 + 1,
                start_time: play.ts,
                user_id: play.user_id,
                level: record.level.clone(),
                song_id: matched.map(|m| m.song_id.clone()),
                artist_id: matched.map(|m| m.artist_id.clone()),
                session_id: record.session_id,
                location: record.location.clone(),
                user_agent: record.user_agent.clone(),
                year: play.start.year(),
                month: play.start.month() as i32,
            }
        })
        .collect();
    tables.unmatched_plays = tables.songplays.iter().filter(|p| p.song_id.is_none()).count();

    log::info!(
        "Extracted {} songplays ({} unmatched), {} users, {} timestamps; {} non-play events, {} plays dropped",
        tables.songplays.len(),
        tables.unmatched_plays,
        tables.users.len(),
        tables.time.len(),
        tables.events_skipped,
        tables.plays_dropped
    );
    tables
}
