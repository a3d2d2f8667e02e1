pub mod pattern;

use std::sync::Arc;

use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use pattern::KeyPattern;
use thiserror::Error;

use crate::config::AwsConfig;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Location {0} has no bucket")]
    MissingBucket(String),
    #[error("Location {0} does not exist")]
    NotFound(String),
    #[error("Destination {0} must not contain wildcards")]
    WildcardDestination(String),
    #[error("Location {0} would list the whole filesystem; start it with a directory")]
    UnanchoredPattern(String),
    #[error("Invalid key pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A prefix inside an object store, optionally narrowed by a key pattern.
///
/// Input locations carry the glob part of their location string as a [`KeyPattern`];
/// destinations always match every key under their prefix.
#[derive(Clone)]
pub struct Location {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    pattern: KeyPattern,
    url: String,
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("url", &self.url)
            .field("prefix", &self.prefix)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

enum Target<'a> {
    S3 { bucket: &'a str, key: &'a str },
    Local(&'a str),
}

fn parse_target(location: &str) -> Result<Target<'_>> {
    if let Some(rest) = location.strip_prefix("s3://").or_else(|| location.strip_prefix("s3a://")) {
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::MissingBucket(location.to_string()));
        }
        Ok(Target::S3 { bucket, key })
    } else if let Some(path) = location.strip_prefix("file://") {
        Ok(Target::Local(path))
    } else if location.contains("://") {
        Err(StorageError::UnsupportedScheme(location.to_string()))
    } else {
        Ok(Target::Local(location))
    }
}

fn build_s3(bucket: &str, aws: &AwsConfig) -> Result<Arc<dyn ObjectStore>> {
    // Credentials default to the AWS_* environment variables
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(region) = &aws.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &aws.endpoint {
        builder = builder.with_endpoint(endpoint).with_allow_http(true);
    }
    if let (Some(key), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        builder = builder
            .with_access_key_id(key)
            .with_secret_access_key(secret);
    }
    Ok(Arc::new(builder.build()?))
}

fn build_local(root: &str) -> Result<Arc<dyn ObjectStore>> {
    let store = LocalFileSystem::new_with_prefix(root)?.with_automatic_cleanup(true);
    Ok(Arc::new(store))
}

fn compile(glob: &str) -> Result<KeyPattern> {
    KeyPattern::new(glob).map_err(|source| StorageError::InvalidPattern {
        pattern: glob.to_string(),
        source,
    })
}

/// A segment is hidden when it starts with `_` or `.` (`_SUCCESS`, `.crc` files).
fn is_hidden(segment: &str) -> bool {
    segment.starts_with('_') || segment.starts_with('.')
}

impl Location {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path, pattern: KeyPattern, url: impl Into<String>) -> Self {
        Self {
            store,
            prefix,
            pattern,
            url: url.into(),
        }
    }

    /// Resolve an input location such as `s3://bucket/song_data/*/*/*/*.json`
    /// or `./data/log_data/**/*.json`.
    pub fn resolve(location: &str, aws: &AwsConfig) -> Result<Self> {
        match parse_target(location)? {
            Target::S3 { bucket, key } => {
                let (literal, glob) = pattern::split_literal_prefix(key);
                Ok(Self::new(
                    build_s3(bucket, aws)?,
                    Path::from(literal.as_str()),
                    compile(&glob)?,
                    location,
                ))
            }
            Target::Local(path) => {
                let (literal, glob) = pattern::split_literal_prefix(path);
                let root = match literal.as_str() {
                    "" if path.starts_with('/') => {
                        return Err(StorageError::UnanchoredPattern(location.to_string()));
                    }
                    "" => ".",
                    other => other,
                };
                let root_path = std::path::Path::new(root);
                if glob.is_empty() && root_path.is_file() {
                    return Self::local_file(root_path, location);
                }
                if !root_path.is_dir() {
                    return Err(StorageError::NotFound(location.to_string()));
                }
                Ok(Self::new(build_local(root)?, Path::default(), compile(&glob)?, location))
            }
        }
    }

    /// A single local file: rooted at its directory, matching only its name.
    fn local_file(file: &std::path::Path, location: &str) -> Result<Self> {
        let (Some(parent), Some(name)) = (file.parent(), file.file_name()) else {
            return Err(StorageError::NotFound(location.to_string()));
        };
        let parent = if parent.as_os_str().is_empty() {
            std::path::Path::new(".")
        } else {
            parent
        };
        let store = Arc::new(LocalFileSystem::new_with_prefix(parent)?);
        let pattern = compile(&name.to_string_lossy())?;
        Ok(Self::new(store, Path::default(), pattern, location))
    }

    /// Resolve an output prefix. Local directories are created when missing.
    pub fn resolve_destination(location: &str, aws: &AwsConfig) -> Result<Self> {
        if pattern::has_wildcard(location) {
            return Err(StorageError::WildcardDestination(location.to_string()));
        }
        match parse_target(location)? {
            Target::S3 { bucket, key } => Ok(Self::new(
                build_s3(bucket, aws)?,
                Path::from(key),
                KeyPattern::any(),
                location,
            )),
            Target::Local(path) => {
                std::fs::create_dir_all(path)?;
                Ok(Self::new(build_local(path)?, Path::default(), KeyPattern::any(), location))
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Location for a sub-directory, matching every key beneath it.
    pub fn join(&self, segment: &str) -> Location {
        Location {
            store: Arc::clone(&self.store),
            prefix: self.prefix.child(segment),
            pattern: KeyPattern::any(),
            url: format!("{}/{}", self.url.trim_end_matches('/'), segment),
        }
    }

    /// Key of `location` relative to this prefix, or `None` when outside it.
    pub fn relative_key(&self, location: &Path) -> Option<String> {
        location
            .prefix_match(&self.prefix)
            .map(|parts| parts.map(|p| p.as_ref().to_string()).collect::<Vec<_>>().join("/"))
    }

    fn list_prefix(&self) -> Option<&Path> {
        if self.prefix.as_ref().is_empty() {
            None
        } else {
            Some(&self.prefix)
        }
    }

    async fn list_all(&self) -> Result<Vec<ObjectMeta>> {
        match self.store.list(self.list_prefix()).try_collect::<Vec<_>>().await {
            Ok(objects) => Ok(objects),
            Err(object_store::Error::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Objects under the prefix that match the key pattern, sorted by key.
    /// Hidden files and directories are skipped. A prefix without a pattern
    /// that names an object selects just that object.
    pub async fn list_matching(&self) -> Result<Vec<ObjectMeta>> {
        if self.pattern.as_str().is_empty() && self.list_prefix().is_some() {
            match self.store.head(&self.prefix).await {
                Ok(meta) => {
                    log::debug!("{}: single object", self.url);
                    return Ok(vec![meta]);
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut matched: Vec<ObjectMeta> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|meta| match self.relative_key(&meta.location) {
                Some(key) => !key.split('/').any(is_hidden) && self.pattern.matches(&key),
                None => false,
            })
            .collect();
        matched.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
        log::debug!("{}: {} objects match", self.url, matched.len());
        Ok(matched)
    }

    pub async fn fetch(&self, location: &Path) -> Result<Vec<u8>> {
        let bytes = self.store.get(location).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Write `data` at `segments` below the prefix and return the full key.
    pub async fn put<S: AsRef<str>>(&self, segments: &[S], data: Vec<u8>) -> Result<Path> {
        let path = segments
            .iter()
            .fold(self.prefix.clone(), |path, segment| path.child(segment.as_ref()));
        self.store.put(&path, PutPayload::from(data)).await?;
        Ok(path)
    }

    pub async fn exists<S: AsRef<str>>(&self, segments: &[S]) -> Result<bool> {
        let path = segments
            .iter()
            .fold(self.prefix.clone(), |path, segment| path.child(segment.as_ref()));
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every object under the prefix, hidden ones included.
    pub async fn delete_all(&self) -> Result<usize> {
        let objects = self.list_all().await?;
        for meta in &objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory_location(prefix: &str, glob: &str) -> (Arc<dyn ObjectStore>, Location) {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let location = Location::new(
            Arc::clone(&store),
            Path::from(prefix),
            KeyPattern::new(glob).unwrap(),
            format!("memory:///{prefix}/{glob}"),
        );
        (store, location)
    }

    async fn seed(store: &Arc<dyn ObjectStore>, key: &str) {
        store
            .put(&Path::from(key), PutPayload::from(b"{}".to_vec()))
            .await
            .unwrap();
    }

    #[test]
    fn test_parse_target() {
        assert!(matches!(
            parse_target("s3://udacity-dend/song_data/*.json").unwrap(),
            Target::S3 { bucket: "udacity-dend", key: "song_data/*.json" }
        ));
        assert!(matches!(
            parse_target("s3a://bucket").unwrap(),
            Target::S3 { bucket: "bucket", key: "" }
        ));
        assert!(matches!(parse_target("file:///tmp/out").unwrap(), Target::Local("/tmp/out")));
        assert!(matches!(parse_target("data/out").unwrap(), Target::Local("data/out")));
        assert!(matches!(parse_target("gs://bucket/x"), Err(StorageError::UnsupportedScheme(_))));
        assert!(matches!(parse_target("s3:///key"), Err(StorageError::MissingBucket(_))));
    }

    #[tokio::test]
    async fn test_list_matching_filters_and_sorts() {
        let (store, location) = memory_location("song_data", "*/*/*.json");
        seed(&store, "song_data/B/b/TRB.json").await;
        seed(&store, "song_data/A/a/TRA.json").await;
        seed(&store, "song_data/A/TRX.json").await;
        seed(&store, "song_data/A/a/_SUCCESS").await;
        seed(&store, "song_data/A/a/_tmp.json").await;
        seed(&store, "other/A/a/TRC.json").await;

        let keys: Vec<String> = location
            .list_matching()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.location.to_string())
            .collect();
        assert_eq!(keys, vec!["song_data/A/a/TRA.json", "song_data/B/b/TRB.json"]);
    }

    #[tokio::test]
    async fn test_put_join_and_delete_all() {
        let (store, root) = memory_location("warehouse", "");
        seed(&store, "warehouse-other/keep.parquet").await;

        let songs = root.join("songs");
        songs.put(&["year=2018", "part-00000.snappy.parquet"], vec![1, 2, 3]).await.unwrap();
        songs.put(&["_SUCCESS"], Vec::new()).await.unwrap();
        assert!(songs.exists(&["_SUCCESS"]).await.unwrap());
        assert_eq!(songs.url(), "memory:///warehouse/songs");

        let data = songs
            .fetch(&Path::from("warehouse/songs/year=2018/part-00000.snappy.parquet"))
            .await
            .unwrap();
        assert_eq!(data, vec![1, 2, 3]);

        assert_eq!(songs.delete_all().await.unwrap(), 2);
        assert!(!songs.exists(&["_SUCCESS"]).await.unwrap());
        // Sibling prefixes sharing a name stem are untouched
        assert!(store.head(&Path::from("warehouse-other/keep.parquet")).await.is_ok());
    }

    #[test]
    fn test_relative_key() {
        let (_, location) = memory_location("log_data", "");
        assert_eq!(
            location.relative_key(&Path::from("log_data/2018/11/events.json")),
            Some("2018/11/events.json".to_string())
        );
        assert_eq!(location.relative_key(&Path::from("song_data/x.json")), None);
    }

    #[test]
    fn test_destination_rejects_wildcards() {
        let err = Location::resolve_destination("s3://bucket/out/*", &AwsConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::WildcardDestination(_)));
    }

    #[tokio::test]
    async fn test_prefix_naming_an_object_selects_it() {
        let (store, location) = memory_location("song_data/one.json", "");
        seed(&store, "song_data/one.json").await;
        seed(&store, "song_data/two.json").await;

        let keys: Vec<String> = location
            .list_matching()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.location.to_string())
            .collect();
        assert_eq!(keys, vec!["song_data/one.json"]);
    }

    #[tokio::test]
    async fn test_resolve_single_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("songs.json"), "{}\n").unwrap();
        std::fs::write(dir.path().join("other.json"), "{}\n").unwrap();

        let file = dir.path().join("songs.json").display().to_string();
        let location = Location::resolve(&file, &AwsConfig::default()).unwrap();
        let matched = location.list_matching().await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].location.as_ref(), "songs.json");
        assert_eq!(location.fetch(&matched[0].location).await.unwrap(), b"{}\n");
    }

    #[test]
    fn test_root_level_wildcard_is_rejected() {
        let err = Location::resolve("/*.json", &AwsConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::UnanchoredPattern(_)));
    }

    #[test]
    fn test_missing_local_input_is_not_found() {
        let err = Location::resolve("/definitely/not/here/*.json", &AwsConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
