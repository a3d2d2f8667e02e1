//! Arrow schemas for the five output tables.
//!
//! Partition columns are encoded in the directory layout, so they are left
//! out of each table's file schema, the way Hive-partitioned Parquet is read
//! back by Spark, Athena and DataFusion.

use std::sync::{Arc, LazyLock};

use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::models::{ArtistRow, SongRow, SongplayRow, TimeRow, UserRow};

const UTC: &str = "UTC";

/// A row type that can be written as an output table.
pub trait TableRow: Sized {
    /// Directory name of the table under the destination.
    const NAME: &'static str;
    /// Partition columns, outermost first.
    const PARTITION_BY: &'static [&'static str];

    /// Schema of the columns stored inside each file.
    fn schema() -> SchemaRef;

    /// Values of the partition columns for this row, `None` for null.
    fn partition_values(&self) -> Vec<Option<String>> {
        Vec::new()
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError>;
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(UTC.into()))
}

fn strings<'a, T: 'a>(rows: &[&'a T], f: impl Fn(&'a T) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(|r| f(r)).collect::<Vec<_>>()))
}

fn timestamps<T>(rows: &[&T], f: impl Fn(&T) -> i64) -> ArrayRef {
    let values: Vec<i64> = rows.iter().map(|r| f(r)).collect();
    Arc::new(TimestampMillisecondArray::from(values).with_timezone(UTC))
}

static SONGS_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, true),
        Field::new("duration", DataType::Float64, true),
    ]))
});

impl TableRow for SongRow {
    const NAME: &'static str = "songs";
    const PARTITION_BY: &'static [&'static str] = &["year", "artist_id"];

    fn schema() -> SchemaRef {
        Arc::clone(&SONGS_SCHEMA)
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![self.year.map(|y| y.to_string()), self.artist_id.clone()]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                strings(rows, |r| Some(r.song_id.as_str())),
                strings(rows, |r| r.title.as_deref()),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.duration).collect::<Vec<_>>())),
            ],
        )
    }
}

static ARTISTS_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("artist_id", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("latitude", DataType::Float64, true),
        Field::new("longitude", DataType::Float64, true),
    ]))
});

impl TableRow for ArtistRow {
    const NAME: &'static str = "artists";
    const PARTITION_BY: &'static [&'static str] = &[];

    fn schema() -> SchemaRef {
        Arc::clone(&ARTISTS_SCHEMA)
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                strings(rows, |r| Some(r.artist_id.as_str())),
                strings(rows, |r| r.name.as_deref()),
                strings(rows, |r| r.location.as_deref()),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.latitude).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.longitude).collect::<Vec<_>>())),
            ],
        )
    }
}

static USERS_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Int64, false),
        Field::new("first_name", DataType::Utf8, true),
        Field::new("last_name", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
    ]))
});

impl TableRow for UserRow {
    const NAME: &'static str = "users";
    const PARTITION_BY: &'static [&'static str] = &[];

    fn schema() -> SchemaRef {
        Arc::clone(&USERS_SCHEMA)
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(Int64Array::from(rows.iter().map(|r| r.user_id).collect::<Vec<_>>())),
                strings(rows, |r| r.first_name.as_deref()),
                strings(rows, |r| r.last_name.as_deref()),
                strings(rows, |r| r.gender.as_deref()),
                strings(rows, |r| r.level.as_deref()),
            ],
        )
    }
}

static TIME_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("start_time", timestamp_type(), false),
        Field::new("hour", DataType::Int32, false),
        Field::new("day", DataType::Int32, false),
        Field::new("week", DataType::Int32, false),
        Field::new("weekday", DataType::Int32, false),
    ]))
});

impl TableRow for TimeRow {
    const NAME: &'static str = "time";
    const PARTITION_BY: &'static [&'static str] = &["year", "month"];

    fn schema() -> SchemaRef {
        Arc::clone(&TIME_SCHEMA)
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![Some(self.year.to_string()), Some(self.month.to_string())]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let ints = |f: fn(&TimeRow) -> i32| -> ArrayRef {
            Arc::new(Int32Array::from(rows.iter().map(|r| f(r)).collect::<Vec<_>>()))
        };
        RecordBatch::try_new(
            Self::schema(),
            vec![
                timestamps(rows, |r| r.start_time),
                ints(|r| r.hour),
                ints(|r| r.day),
                ints(|r| r.week),
                ints(|r| r.weekday),
            ],
        )
    }
}

static SONGPLAYS_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("songplay_id", DataType::Int64, false),
        Field::new("start_time", timestamp_type(), false),
        Field::new("user_id", DataType::Int64, false),
        Field::new("level", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
    ]))
});

impl TableRow for SongplayRow {
    const NAME: &'static str = "songplays";
    const PARTITION_BY: &'static [&'static str] = &["year", "month"];

    fn schema() -> SchemaRef {
        Arc::clone(&SONGPLAYS_SCHEMA)
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![Some(self.year.to_string()), Some(self.month.to_string())]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(Int64Array::from(rows.iter().map(|r| r.songplay_id).collect::<Vec<_>>())),
                timestamps(rows, |r| r.start_time),
                Arc::new(Int64Array::from(rows.iter().map(|r| r.user_id).collect::<Vec<_>>())),
                strings(rows, |r| r.level.as_deref()),
                strings(rows, |r| r.song_id.as_deref()),
                strings(rows, |r| r.artist_id.as_deref()),
                Arc::new(Int64Array::from(rows.iter().map(|r| r.session_id).collect::<Vec<_>>())),
                strings(rows, |r| r.location.as_deref()),
                strings(rows, |r| r.user_agent.as_deref()),
            ],
        )
    }
}
