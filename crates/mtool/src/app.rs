//! Application facade tying configuration, catalog and profiles together.
//!
//! Every CLI command maps onto one method of [`App`]. Registries are built
//! once from the configuration and passed down by reference.

use crate::catalog::{Catalog, CatalogError};
use crate::concurrency::{derive_plan, WorkerPlan};
use crate::config::{expand_tilde, Config, ConfigError};
use crate::extract::ExtractorRegistry;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::scan::{reconcile, ScanError, ScanReport};
use crate::staleness::filter_stale;
use crate::transform::{TransformError, TransformRegistry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Error type for application operations
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No catalog has been created yet
    #[error("no catalog at {path}; create one with 'mtool init <ROOT>'")]
    NoCatalog { path: PathBuf },

    /// Catalog could not be read or written
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Reconciliation aborted; the saved catalog was left untouched
    #[error("scan aborted: {0}")]
    Scan(#[from] ScanError),

    /// Unknown profile
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Bad search pattern
    #[error("invalid search pattern: {0}")]
    Regex(#[from] regex::Error),

    /// The library root cannot be resolved
    #[error("cannot use {path} as library root: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("output path must be specified")]
    MissingOutput,

    #[error("output path {0} is not a directory")]
    OutputNotDirectory(PathBuf),
}

/// Summary printed by the `info` command.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    pub catalog_path: PathBuf,
    /// Root and size of the catalog, if one exists.
    pub catalog: Option<(PathBuf, usize)>,
    pub handlers: Vec<String>,
    pub profiles: Vec<String>,
    pub plan: WorkerPlan,
}

impl std::fmt::Display for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.catalog {
            Some((root, count)) => writeln!(
                f,
                "library file at {} contains {} master files from {}",
                self.catalog_path.display(),
                count,
                root.display()
            )?,
            None => writeln!(f, "no library file at {}", self.catalog_path.display())?,
        }
        writeln!(f, "available master file handlers: {}", self.handlers.join(", "))?;
        writeln!(f, "available image types: {}", self.profiles.join(", "))?;
        write!(
            f,
            "transcode workers: {} ({} cores)",
            self.plan.workers, self.plan.total_cores
        )
    }
}

/// Outcome of the `make` command.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeReport {
    /// Derivatives the profile projects from the catalog.
    pub projected: usize,
    /// Derivatives that were stale and handed to the workers.
    pub stale: usize,
    pub run: RunReport,
}

/// Application state built from configuration
pub struct App {
    pub config: Config,
    pub extractors: ExtractorRegistry,
    pub transforms: TransformRegistry,
}

impl App {
    /// Build the default registries from `config`.
    pub fn new(config: Config) -> Self {
        let extractors = ExtractorRegistry::with_defaults(&config.tools);
        let transforms = TransformRegistry::with_defaults(&config);
        Self::with_registries(config, extractors, transforms)
    }

    /// Build with explicit registries.
    ///
    /// Useful for testing when external tools are not available.
    pub fn with_registries(
        config: Config,
        extractors: ExtractorRegistry,
        transforms: TransformRegistry,
    ) -> Self {
        Self {
            config,
            extractors,
            transforms,
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.config.catalog_path()
    }

    fn load_catalog(&self) -> Result<Catalog, AppError> {
        let path = self.catalog_path();
        Catalog::load(&path).map_err(|e| match e {
            CatalogError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                AppError::NoCatalog { path }
            }
            e => AppError::from(e),
        })
    }

    /// Reconcile `catalog` and persist the result only when the walk
    /// succeeded.
    fn reconcile_and_save(&self, catalog: &Catalog) -> Result<ScanReport, AppError> {
        let reconciled = reconcile(catalog, &self.extractors)?;
        let path = self.catalog_path();
        info!(
            path = %path.display(),
            masters = reconciled.catalog.len(),
            "saving library"
        );
        reconciled.catalog.save(&path)?;
        Ok(reconciled.report)
    }

    /// Create a new catalog from the media under `root`, replacing any
    /// existing one.
    pub fn init(&self, root: &Path) -> Result<ScanReport, AppError> {
        let expanded = expand_tilde(root);
        let root = fs::canonicalize(&expanded).map_err(|source| AppError::Root {
            path: expanded,
            source,
        })?;
        info!(root = %root.display(), "creating new library");
        self.reconcile_and_save(&Catalog::new(root))
    }

    /// Bring the existing catalog up to date with its root.
    pub fn scan(&self) -> Result<ScanReport, AppError> {
        let catalog = self.load_catalog()?;
        info!(root = %catalog.root.display(), "rescanning");
        self.reconcile_and_save(&catalog)
    }

    /// Master paths matching any of `patterns`, grouped by pattern.
    pub fn find<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<PathBuf>, AppError> {
        let catalog = self.load_catalog()?;
        let mut paths = Vec::new();
        for pattern in patterns {
            paths.extend(catalog.search(pattern.as_ref())?);
        }
        Ok(paths)
    }

    /// The `n` most recently modified masters, newest first.
    pub fn latest(&self, n: usize) -> Result<Vec<PathBuf>, AppError> {
        Ok(self.load_catalog()?.latest(n))
    }

    /// Build every stale derivative of `profile` under `output_root`.
    ///
    /// The profile and the output root are validated before the catalog is
    /// read or any process is started.
    pub async fn make(&self, profile: &str, output_root: &Path) -> Result<MakeReport, AppError> {
        let transform = self.transforms.get(profile)?;
        if output_root.as_os_str().is_empty() {
            return Err(AppError::MissingOutput);
        }
        let output_root = expand_tilde(output_root);
        if output_root.exists() && !output_root.is_dir() {
            return Err(AppError::OutputNotDirectory(output_root));
        }

        let catalog = self.load_catalog()?;
        let derivatives = transform.project(&catalog.masters);
        let projected = derivatives.len();
        let stale = filter_stale(derivatives, &output_root);
        info!(
            profile,
            masters = catalog.len(),
            images = projected,
            present = projected - stale.len(),
            to_make = stale.len(),
            "projected"
        );

        let count = stale.len();
        let plan = derive_plan(&self.config);
        let run = Orchestrator::from_plan(&plan).run(transform, stale).await;
        info!(profile, %run, "finished");

        Ok(MakeReport {
            projected,
            stale: count,
            run,
        })
    }

    /// Library, handler and profile summary; works without a catalog.
    pub fn info(&self) -> Result<Info, AppError> {
        let catalog = match self.load_catalog() {
            Ok(c) => Some((c.root.clone(), c.len())),
            Err(AppError::NoCatalog { .. }) => None,
            Err(e) => return Err(e),
        };

        Ok(Info {
            catalog_path: self.catalog_path(),
            catalog,
            handlers: self.extractors.extensions().iter().map(|s| s.to_string()).collect(),
            profiles: self.transforms.names().iter().map(|s| s.to_string()).collect(),
            plan: derive_plan(&self.config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MasterFile, MediaKind};
    use crate::derivative::Derivative;
    use crate::extract::testing;
    use crate::scan::ScanEvent;
    use crate::transform::{MaterializeError, Transform};
    use filetime::FileTime;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Writes each master's first title into `<title>.txt`.
    struct CopyTitle;

    impl Transform for CopyTitle {
        fn name(&self) -> &str {
            "txt"
        }

        fn project(&self, masters: &[MasterFile]) -> Vec<Derivative> {
            masters
                .iter()
                .filter(|m| m.kind == MediaKind::Audio)
                .map(|m| {
                    let mut d = Derivative::new(
                        format!("{}.txt", m.title[0]),
                        &m.path,
                        m.mtime,
                    );
                    d.title = m.title[0].clone();
                    d
                })
                .collect()
        }

        fn materialize(&self, d: &Derivative) -> Result<(), MaterializeError> {
            fs::write(&d.output_path, &d.title).map_err(|source| MaterializeError::CreateDir {
                path: d.output_path.clone(),
                source,
            })
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        out: PathBuf,
        app: App,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("music");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(root.join("album")).unwrap();
        fs::create_dir_all(&out).unwrap();

        let mut config = Config::default();
        config.catalog.path = temp_dir.path().join("catalog.json");
        config.transcode.parallelism = 2;

        let mut transforms = TransformRegistry::new();
        transforms.register(Arc::new(CopyTitle));

        Fixture {
            app: App::with_registries(config, testing::registry(), transforms),
            _temp_dir: temp_dir,
            root,
            out,
        }
    }

    fn add_file(path: &Path, body: &str, secs: i64) {
        fs::write(path, body).unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn test_init_scan_find_latest() {
        let f = fixture();
        add_file(&f.root.join("album/one.flac"), "title:Blue in Green", 1_000);
        add_file(&f.root.join("album/two.mp3"), "title:So What", 2_000);
        add_file(&f.root.join("album/cover.jpg"), "jpeg", 3_000);

        let report = f.app.init(&f.root).unwrap();
        assert_eq!(report.count(|e| matches!(e, ScanEvent::New(_))), 2);
        assert!(f.app.catalog_path().exists());

        let root = fs::canonicalize(&f.root).unwrap();
        assert_eq!(
            f.app.find(&["Green", "(?i)so what"]).unwrap(),
            vec![root.join("album/one.flac"), root.join("album/two.mp3")]
        );
        assert_eq!(f.app.latest(1).unwrap(), vec![root.join("album/two.mp3")]);

        fs::remove_file(f.root.join("album/one.flac")).unwrap();
        let report = f.app.scan().unwrap();
        assert_eq!(
            report.events,
            vec![ScanEvent::Deleted(root.join("album/one.flac"))]
        );
        assert_eq!(f.app.latest(10).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_scan_leaves_saved_catalog_untouched() {
        let f = fixture();
        add_file(&f.root.join("album/one.flac"), "title:Blue in Green", 1_000);
        f.app.init(&f.root).unwrap();
        let before = fs::read(f.app.catalog_path()).unwrap();

        fs::remove_dir_all(&f.root).unwrap();
        let err = f.app.scan().unwrap_err();
        assert!(matches!(err, AppError::Scan(_)), "{}", err);
        assert_eq!(fs::read(f.app.catalog_path()).unwrap(), before);
    }

    #[test]
    fn test_pre_epoch_master_is_saved_and_rescanned_cheaply() {
        let f = fixture();
        add_file(&f.root.join("album/old.flac"), "title:Archive", -100);
        add_file(&f.root.join("album/new.flac"), "title:Fresh", 1_000);

        let report = f.app.init(&f.root).unwrap();
        assert_eq!(report.count(|e| matches!(e, ScanEvent::New(_))), 2);
        assert!(f.app.catalog_path().exists());

        let report = f.app.scan().unwrap();
        assert!(report.events.is_empty(), "{:?}", report.events);
        assert_eq!(report.unchanged, 2);

        let root = fs::canonicalize(&f.root).unwrap();
        assert_eq!(
            f.app.latest(2).unwrap(),
            vec![root.join("album/new.flac"), root.join("album/old.flac")]
        );
    }

    #[test]
    fn test_commands_without_catalog() {
        let f = fixture();
        assert!(matches!(f.app.scan(), Err(AppError::NoCatalog { .. })));
        assert!(matches!(f.app.latest(3), Err(AppError::NoCatalog { .. })));

        let info = f.app.info().unwrap();
        assert_eq!(info.catalog, None);
        assert_eq!(info.handlers, vec!["flac", "mp3"]);
        assert_eq!(info.profiles, vec!["txt"]);
        assert_eq!(info.plan.workers, 2);
    }

    #[test]
    fn test_init_missing_root() {
        let f = fixture();
        let err = f.app.init(&f.root.join("nope")).unwrap_err();
        assert!(matches!(err, AppError::Root { .. }));
        assert!(!f.app.catalog_path().exists());
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        let f = fixture();
        f.app.init(&f.root).unwrap();
        assert!(matches!(f.app.find(&["(unclosed"]), Err(AppError::Regex(_))));
    }

    #[tokio::test]
    async fn test_make_validates_before_any_work() {
        let f = fixture();

        // no catalog exists, so these can only fail on validation
        let err = f.app.make("opus", &f.out).await.unwrap_err();
        assert!(matches!(err, AppError::Transform(_)));

        let err = f.app.make("txt", Path::new("")).await.unwrap_err();
        assert!(matches!(err, AppError::MissingOutput));

        let file = f.out.join("file");
        fs::write(&file, b"").unwrap();
        let err = f.app.make("txt", &file).await.unwrap_err();
        assert!(matches!(err, AppError::OutputNotDirectory(_)));
    }

    #[tokio::test]
    async fn test_make_builds_only_stale_outputs() {
        let f = fixture();
        add_file(&f.root.join("album/one.flac"), "title:Blue in Green", 1_000);
        add_file(&f.root.join("album/two.mp3"), "title:So What", 2_000);
        f.app.init(&f.root).unwrap();

        let first = f.app.make("txt", &f.out).await.unwrap();
        assert_eq!((first.projected, first.stale), (2, 2));
        assert_eq!(first.run.created.len(), 2);
        assert_eq!(
            fs::read_to_string(f.out.join("So What.txt")).unwrap(),
            "So What"
        );

        let second = f.app.make("txt", &f.out).await.unwrap();
        assert_eq!((second.projected, second.stale), (2, 0));
        assert_eq!(second.run.attempted, 0);

        // an output older than its master is rebuilt
        filetime::set_file_mtime(f.out.join("So What.txt"), FileTime::from_unix_time(1_999, 0))
            .unwrap();
        let third = f.app.make("txt", &f.out).await.unwrap();
        assert_eq!(third.run.created, vec![f.out.join("So What.txt")]);
    }
}
