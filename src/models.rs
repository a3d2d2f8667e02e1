use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One song metadata record as found in the song data files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SongRecord {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub song_id: Option<String>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub artist_location: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub artist_latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub artist_longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub year: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
}

/// One line of the user activity log.
///
/// Numeric ids arrive as JSON numbers or as strings depending on the
/// producer; logged-out events carry `"userId": ""`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub artist: Option<String>,
    pub song: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub length: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub user_id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub session_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub item_in_session: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    /// Event time in epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ts: Option<i64>,
    pub page: Option<String>,
}

/// Row of the `songs` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: Option<String>,
    pub year: Option<i32>,
    pub duration: Option<f64>,
}

/// Row of the `artists` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Row of the `users` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

/// Row of the `time` dimension. `start_time` is epoch milliseconds (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRow {
    pub start_time: i64,
    pub hour: i32,
    pub day: i32,
    /// ISO-8601 week number.
    pub week: i32,
    pub month: i32,
    pub year: i32,
    /// 0 = Monday … 6 = Sunday.
    pub weekday: i32,
}

/// Row of the `songplays` fact table.
#[derive(Debug, Clone, PartialEq)]
pub struct SongplayRow {
    pub songplay_id: i64,
    pub start_time: i64,
    pub user_id: i64,
    pub level: Option<String>,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    // Partition values, derived from start_time
    pub year: i32,
    pub month: i32,
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Accept an integer, an integral float, or a numeric string. Anything else is null.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    })
}
