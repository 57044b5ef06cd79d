//! mtool
//!
//! Media catalog and transcoding orchestrator: keeps an index of master
//! media files in step with a directory tree and builds derivative files
//! from it with external encoders.

pub mod app;
pub mod catalog;
pub mod concurrency;
pub mod derivative;
pub mod extract;
pub mod orchestrator;
pub mod pipeline;
pub mod scan;
pub mod staleness;
pub mod transform;

pub use app::{App, AppError, Info, MakeReport};
pub use catalog::{Catalog, CatalogError, MasterFile, MediaKind, StreamDescriptor};
pub use concurrency::{derive_plan, WorkerPlan};
pub use derivative::{path_safe, Derivative};
pub use extract::{ExtractError, Extraction, Extractor, ExtractorRegistry};
pub use mtool_config as config;
pub use mtool_config::Config;
pub use orchestrator::{FailedItem, Orchestrator, RunReport};
pub use pipeline::{run_single, Pipeline, PipelineError, Stage};
pub use scan::{reconcile, Reconciliation, ScanError, ScanEvent, ScanReport};
pub use staleness::{filter_stale, is_stale};
pub use transform::{MaterializeError, Transform, TransformError, TransformRegistry};
