pub mod activity;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod songs;
pub mod storage;
pub mod tables;
pub mod writer;

/// Value of `page` marking an activity record as a song play
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// Application name for XDG paths
pub const APP_NAME: &str = "songplay-etl";
