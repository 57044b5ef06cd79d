//! Catalog module holding the master file index.
//!
//! A [`Catalog`] is the persisted aggregate: the file-tree root it was built
//! from plus one [`MasterFile`] per discovered media file. It is stored as a
//! single JSON document that is overwritten on every save.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error type for catalog persistence.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Reading or writing the catalog file failed.
    #[error("catalog IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The catalog document could not be encoded or decoded.
    #[error("catalog JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Kind of media held by a master file or an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Unknown,
    Video,
    Audio,
    Subtitle,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Unknown => write!(f, "unknown"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// One elementary stream inside a container master.
///
/// Streams are stored in container index order; the position of a
/// descriptor in [`MasterFile::streams`] is its stream index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub kind: MediaKind,
    /// Codec identifier as reported by the prober (e.g. "h264", "ac3").
    pub codec: String,
    /// ISO 639-2 language tag, "und" when the stream is untagged.
    pub language: String,
    /// Bitrate in kb/s, 0 if unknown.
    pub bitrate: u32,
}

/// One source-of-truth media file.
///
/// Master files are only ever created by the reconciler and are replaced
/// wholesale when they change on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFile {
    /// Absolute path, unique within a catalog.
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Modification time observed when the entry was extracted.
    #[serde(with = "unix_time")]
    pub mtime: SystemTime,
    /// Mark-and-sweep flag, only meaningful during reconciliation.
    #[serde(skip)]
    pub valid: bool,
    /// Video masters usually have one title; audio masters have one per track.
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track_num: u32,
    #[serde(default)]
    pub track_max: u32,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub show: String,
    #[serde(default)]
    pub episode: String,
    #[serde(default)]
    pub has_picture: bool,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
}

impl MasterFile {
    /// Create an unpopulated, invalid entry for a path and its mtime.
    pub fn new(path: impl Into<PathBuf>, mtime: SystemTime) -> Self {
        Self {
            path: path.into(),
            kind: MediaKind::Unknown,
            mtime,
            valid: false,
            title: Vec::new(),
            artist: String::new(),
            album: String::new(),
            track_num: 0,
            track_max: 0,
            date: String::new(),
            show: String::new(),
            episode: String::new(),
            has_picture: false,
            streams: Vec::new(),
        }
    }

    /// Lower-cased file extension, empty when there is none.
    pub fn extension(&self) -> String {
        file_extension(&self.path)
    }

    /// Descriptive fields searched by [`Catalog::search`].
    fn search_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.artist.as_str(),
            self.album.as_str(),
            self.date.as_str(),
            self.show.as_str(),
        ]
        .into_iter()
        .chain(self.title.iter().map(String::as_str))
    }
}

/// Lower-cased extension of a path, empty when there is none.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

/// Whole seconds since the Unix epoch; times before the epoch are negative.
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// Lossless `SystemTime` encoding that also covers times before the epoch.
///
/// Stored as floored signed seconds plus a non-negative nanosecond part, under
/// the same field names serde uses for `SystemTime`, so documents written by
/// the stock encoding still load.
mod unix_time {
    use super::unix_seconds;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const NANOS_PER_SEC: u32 = 1_000_000_000;

    #[derive(Serialize, Deserialize)]
    struct Repr {
        secs_since_epoch: i64,
        nanos_since_epoch: u32,
    }

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos_since_epoch = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => after.subsec_nanos(),
            Err(e) => match e.duration().subsec_nanos() {
                0 => 0,
                before => NANOS_PER_SEC - before,
            },
        };
        Repr {
            secs_since_epoch: unix_seconds(*time),
            nanos_since_epoch,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let repr = Repr::deserialize(deserializer)?;
        if repr.nanos_since_epoch >= NANOS_PER_SEC {
            return Err(D::Error::custom("nanos_since_epoch out of range"));
        }

        let whole = Duration::from_secs(repr.secs_since_epoch.unsigned_abs());
        let secs = if repr.secs_since_epoch >= 0 {
            UNIX_EPOCH.checked_add(whole)
        } else {
            UNIX_EPOCH.checked_sub(whole)
        };
        secs.and_then(|t| t.checked_add(Duration::from_nanos(u64::from(repr.nanos_since_epoch))))
            .ok_or_else(|| D::Error::custom("modification time out of range"))
    }
}

/// The persisted index of master files under one file-tree root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Root of the tree, kept so it can be re-walked without naming it again.
    pub root: PathBuf,
    /// At most one entry per path.
    #[serde(default)]
    pub masters: Vec<MasterFile>,
}

impl Catalog {
    /// Create an empty catalog for a tree root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            masters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.masters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masters.is_empty()
    }

    /// Drop every entry whose validity flag is cleared.
    ///
    /// Only the index is touched; nothing is deleted from disk.
    pub fn compact(&mut self) {
        self.masters.retain(|mf| mf.valid);
    }

    /// Paths of all masters where any descriptive field matches `pattern`.
    ///
    /// Each master is reported at most once, in catalog order.
    pub fn search(&self, pattern: &str) -> Result<Vec<PathBuf>, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(self
            .masters
            .iter()
            .filter(|mf| mf.search_fields().any(|field| re.is_match(field)))
            .map(|mf| mf.path.clone())
            .collect())
    }

    /// Paths of the `n` most recently modified masters, newest first.
    pub fn latest(&self, n: usize) -> Vec<PathBuf> {
        let mut by_mtime: Vec<&MasterFile> = self.masters.iter().collect();
        by_mtime.sort_by_key(|mf| std::cmp::Reverse(unix_seconds(mf.mtime)));
        by_mtime
            .into_iter()
            .take(n)
            .map(|mf| mf.path.clone())
            .collect()
    }

    /// Loads a catalog from its JSON document.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Saves the catalog to `path`, replacing any previous document.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let io_err = |source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        fs::write(path, json).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn make_audio(path: &str, mtime: u64, artist: &str, titles: &[&str]) -> MasterFile {
        let mut mf = MasterFile::new(path, at(mtime));
        mf.kind = MediaKind::Audio;
        mf.artist = artist.to_string();
        mf.album = "Greatest Hits".to_string();
        mf.title = titles.iter().map(|t| t.to_string()).collect();
        mf.valid = true;
        mf
    }

    fn make_catalog() -> Catalog {
        let mut catalog = Catalog::new("/music");
        catalog.masters.push(make_audio("/music/a.flac", 100, "Nina Simone", &["Sinnerman"]));
        catalog.masters.push(make_audio("/music/b.mp3", 300, "Miles Davis", &["So What", "Blue in Green"]));
        catalog.masters.push(make_audio("/music/c.m4a", 200, "Bill Evans", &["Peace Piece"]));
        catalog
    }

    #[test]
    fn test_search_matches_any_field_once() {
        let catalog = make_catalog();

        // "Greatest" matches the album of every entry, but each is listed once
        let all = catalog.search("Greatest").unwrap();
        assert_eq!(all.len(), 3);

        let blue = catalog.search("(?i)blue").unwrap();
        assert_eq!(blue, vec![PathBuf::from("/music/b.mp3")]);

        assert!(catalog.search("Coltrane").unwrap().is_empty());
    }

    #[test]
    fn test_search_rejects_invalid_pattern() {
        let catalog = make_catalog();
        assert!(catalog.search("(unclosed").is_err());
    }

    #[test]
    fn test_latest_orders_newest_first_and_clamps() {
        let catalog = make_catalog();

        assert_eq!(
            catalog.latest(2),
            vec![PathBuf::from("/music/b.mp3"), PathBuf::from("/music/c.m4a")]
        );
        assert_eq!(catalog.latest(10).len(), 3);
        assert!(catalog.latest(0).is_empty());

        // the catalog itself keeps its order
        assert_eq!(catalog.masters[0].path, PathBuf::from("/music/a.flac"));
    }

    #[test]
    fn test_compact_drops_invalid_entries() {
        let mut catalog = make_catalog();
        catalog.masters[1].valid = false;
        catalog.compact();

        let paths: Vec<_> = catalog.masters.iter().map(|mf| mf.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/music/a.flac"), PathBuf::from("/music/c.m4a")]);
    }

    #[test]
    fn test_save_and_load_preserves_entries() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("mtooldb.json");

        let mut catalog = make_catalog();
        catalog.masters[0].streams.push(StreamDescriptor {
            kind: MediaKind::Audio,
            codec: "flac".to_string(),
            language: "und".to_string(),
            bitrate: 0,
        });
        catalog.save(&db_path).unwrap();

        let loaded = Catalog::load(&db_path).unwrap();
        assert_eq!(loaded.root, catalog.root);
        assert_eq!(loaded.len(), catalog.len());
        assert_eq!(loaded.masters[0].streams, catalog.masters[0].streams);
        assert_eq!(loaded.masters[1].mtime, catalog.masters[1].mtime);
        // the validity flag is transient
        assert!(loaded.masters.iter().all(|mf| !mf.valid));
    }

    #[test]
    fn test_pre_epoch_mtime_survives_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mtooldb.json");

        let mut catalog = make_catalog();
        catalog.masters[0].mtime = UNIX_EPOCH - Duration::from_secs(100);
        catalog.masters[1].mtime = UNIX_EPOCH - Duration::new(5, 250_000_000);
        catalog.masters[2].mtime = UNIX_EPOCH + Duration::new(7, 999_999_999);
        catalog.save(&db_path).unwrap();

        let loaded = Catalog::load(&db_path).unwrap();
        for (before, after) in catalog.masters.iter().zip(&loaded.masters) {
            assert_eq!(after.mtime, before.mtime);
        }
        assert_eq!(unix_seconds(loaded.masters[1].mtime), -6);
    }

    #[test]
    fn test_load_accepts_stock_system_time_encoding() {
        let json = r#"{
            "root": "/music",
            "masters": [{
                "path": "/music/a.flac",
                "kind": "audio",
                "mtime": { "secs_since_epoch": 1000, "nanos_since_epoch": 5 }
            }]
        }"#;
        let catalog: Catalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.masters[0].mtime, UNIX_EPOCH + Duration::new(1000, 5));
    }

    #[test]
    fn test_load_rejects_out_of_range_nanos() {
        let json = r#"{
            "root": "/music",
            "masters": [{
                "path": "/music/a.flac",
                "kind": "audio",
                "mtime": { "secs_since_epoch": 1, "nanos_since_epoch": 1000000000 }
            }]
        }"#;
        assert!(serde_json::from_str::<Catalog>(json).is_err());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = Catalog::load(&temp_dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn test_load_garbage_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("mtooldb.json");
        fs::write(&db_path, "{ not json").unwrap();

        let err = Catalog::load(&db_path).unwrap_err();
        assert!(matches!(err, CatalogError::Json { .. }));
    }

    #[test]
    fn test_file_extension_is_lowercase() {
        assert_eq!(file_extension(Path::new("/a/B.FLAC")), "flac");
        assert_eq!(file_extension(Path::new("/a/noext")), "");
        assert_eq!(file_extension(Path::new("/a/x.tar.Mkv")), "mkv");
    }

    #[test]
    fn test_unix_seconds_truncates_toward_past() {
        assert_eq!(unix_seconds(UNIX_EPOCH + Duration::from_millis(1_999)), 1);
        assert_eq!(unix_seconds(UNIX_EPOCH - Duration::from_millis(500)), -1);
        assert_eq!(unix_seconds(UNIX_EPOCH - Duration::from_secs(2)), -2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_mtime_encoding_is_lossless(secs in -4_000_000_000i64..4_000_000_000, nanos in 0u32..1_000_000_000) {
            let mut mf = MasterFile::new("/music/a.flac", UNIX_EPOCH);
            let offset = Duration::from_secs(secs.unsigned_abs());
            let whole = if secs >= 0 { UNIX_EPOCH + offset } else { UNIX_EPOCH - offset };
            mf.mtime = whole + Duration::from_nanos(u64::from(nanos));

            let json = serde_json::to_string(&mf).unwrap();
            let back: MasterFile = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.mtime, mf.mtime);
            prop_assert_eq!(unix_seconds(back.mtime), secs);
        }

        #[test]
        fn prop_unix_seconds_is_monotonic(a in 0u64..4_000_000_000_000, b in 0u64..4_000_000_000_000) {
            let ta = UNIX_EPOCH + Duration::from_millis(a);
            let tb = UNIX_EPOCH + Duration::from_millis(b);
            if ta <= tb {
                prop_assert!(unix_seconds(ta) <= unix_seconds(tb));
            }
        }
    }
}
