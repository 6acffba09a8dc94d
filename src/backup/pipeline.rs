//! One backup run: inspect the source, build the archive, record it.

use crate::backup::archive::{build_at, BackupArchive, CompressionFormat};
use crate::backup::catalog::{BackupRecord, CatalogHandle, DirectoryRecord};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::source::{inspect, SourceDirectory};

use bon::Builder;
use chrono::{DateTime, Local, SubsecRound};
use derive_more::Display;
use getset::{CopyGetters, Getters};

use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// States of a run. A failure in any of them aborts the run as [`Error::Failed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum PipelineStage {
    #[display("Inspecting")]
    Inspecting,
    #[display("Building")]
    Building,
    #[display("Recording")]
    Recording,
    #[display("Done")]
    Done,
}

/// Everything a caller decides for one run.
#[derive(Clone, Debug, Builder, Getters, CopyGetters)]
pub struct BackupRequest {
    #[builder(into)]
    #[getset(get = "pub")]
    source_path: PathBuf,
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    calculate_size: bool,
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    compressed: bool,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    format: CompressionFormat,
    #[builder(into)]
    #[getset(get = "pub")]
    backup_root: PathBuf,
    /// Pins the time the backup name is stamped with; defaults to build time.
    #[getset(get_copy = "pub")]
    created_at: Option<DateTime<Local>>,
}

#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct PipelineResult {
    source: Arc<SourceDirectory>,
    archive: BackupArchive,
    directory: DirectoryRecord,
    backup: BackupRecord,
}

/// Wraps an error with the stage it aborted. Callers decide how to report it.
fn fail(stage: PipelineStage) -> impl FnOnce(Error) -> Error {
    move |error| Error::Failed {
        stage,
        error: Box::new(error),
    }
}

/// Runs inspect → build → record against an already open catalog.
///
/// A failed archive write does not abort the run: the backup row is still
/// written, with no size, and [`BackupArchive::is_success`] reports it.
pub fn run(request: &BackupRequest, catalog: &mut CatalogHandle) -> Result<PipelineResult> {
    tracing::info!("{}: {:?}", PipelineStage::Inspecting, request.source_path);
    let source = inspect(&request.source_path, request.calculate_size)
        .map(Arc::new)
        .map_err(fail(PipelineStage::Inspecting))?;

    tracing::info!(
        "{}: {} backup of {:?} into {:?}",
        PipelineStage::Building,
        if request.compressed {
            request.format.as_str()
        } else {
            "copy"
        },
        source.safe_name(),
        request.backup_root
    );
    let created_at = request
        .created_at
        .unwrap_or_else(|| Local::now().trunc_subsecs(0));
    let archive = build_at(
        source.clone(),
        request.compressed,
        request.format,
        &request.backup_root,
        created_at,
    )
    .map_err(fail(PipelineStage::Building))?;
    if !archive.is_success() {
        tracing::warn!(
            "Backup {:?} has no usable output, recording it anyway",
            archive.backup_name()
        );
    }

    tracing::info!("{}: {:?}", PipelineStage::Recording, archive.backup_name());
    let (directory, backup) = catalog
        .record_backup(&source, &archive)
        .map_err(fail(PipelineStage::Recording))?;

    tracing::info!("{}: {:?}", PipelineStage::Done, archive.backup_file());
    Ok(PipelineResult {
        source,
        archive,
        directory,
        backup,
    })
}

/// Opens the catalog at `catalog_path`, ensures its schema, runs once and
/// releases the catalog on every exit path.
pub fn run_with_catalog<P: AsRef<Path>>(
    request: &BackupRequest,
    catalog_path: P,
) -> Result<PipelineResult> {
    let mut catalog = CatalogHandle::open(catalog_path)?;
    let res = catalog
        .ensure_schema()
        .with_msg("Preparing catalog schema failed")
        .and_then(|_| run(request, &mut catalog));

    if let Err(e) = catalog.close() {
        tracing::warn!("{e}");
    }
    res
}

impl std::fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.source)?;
        writeln!(f, "{}", self.archive)?;
        write!(
            f,
            "Catalog: directory #{}, backup #{}",
            self.directory.id, self.backup.id
        )
    }
}
