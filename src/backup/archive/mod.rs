//! Backup artifact creation.
//!
//! [`build`] turns an inspected [`SourceDirectory`] into a [`BackupArchive`]:
//! a tar, gzip-compressed tar or zip file under the backup root, or a plain
//! copy of the tree. Only invalid input and an unusable backup root fail the
//! build; a failed write is recorded in [`ArchiveWrite::Failed`] instead.

pub mod copy;
pub mod entries;
pub mod tar;
pub mod zip;

use crate::backup::compress::Compressor;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use crate::backup::source::SourceDirectory;

use chrono::{DateTime, Local, SubsecRound};
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Second-resolution suffix appended to the safe name of every backup.
pub static BACKUP_TIME_FORMAT: &str = "%Y-%m-%d-%H%M%S";

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionFormat {
    /// Recursive copy of the tree, no archive file.
    #[serde(alias = "none")]
    NoneCopy,
    Tar,
    #[serde(alias = "tar.gz")]
    TarGz,
    #[default]
    Zip,
}

impl CompressionFormat {
    /// Label stored in the catalog and shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::NoneCopy => "none",
            CompressionFormat::Tar => "tar",
            CompressionFormat::TarGz => "tar.gz",
            CompressionFormat::Zip => "zip",
        }
    }
}

impl FileExtProvider for CompressionFormat {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            CompressionFormat::NoneCopy => None,
            c => Some(c.as_str()),
        }
    }
}

impl Display for CompressionFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "none_copy" | "copy" => Ok(CompressionFormat::NoneCopy),
            "tar" => Ok(CompressionFormat::Tar),
            "tar.gz" | "tar_gz" | "tgz" => Ok(CompressionFormat::TarGz),
            "zip" => Ok(CompressionFormat::Zip),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// What the single write attempt of a build produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveWrite {
    /// Archive file is in place at `backup_file`.
    Archived { size_bytes: u64 },
    /// Source tree copied to `backup_root/<safe_name>`.
    Copied,
    /// Copy destination already existed and was left as it was.
    SkippedExisting,
    /// Write failed; nothing usable was produced by this build.
    Failed { reason: String },
}

#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct BackupArchive {
    #[getset(get = "pub")]
    source: Arc<SourceDirectory>,
    #[getset(get_copy = "pub")]
    compressed: bool,
    #[getset(get_copy = "pub")]
    compression_format: CompressionFormat,
    #[getset(get = "pub")]
    backup_root: PathBuf,
    /// `<safe_name>-<YYYY-MM-DD-HHMMSS>`, without extension.
    #[getset(get = "pub")]
    backup_name: String,
    #[getset(get = "pub")]
    backup_file: PathBuf,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Local>,
    #[getset(get = "pub")]
    write: ArchiveWrite,
}

impl BackupArchive {
    /// Size of the archive file on disk. Always `None` for copies and failed writes.
    pub fn output_size_bytes(&self) -> Option<u64> {
        match self.write {
            ArchiveWrite::Archived { size_bytes } => Some(size_bytes),
            _ => None,
        }
    }

    /// `false` only when the write step failed. A skipped copy counts as success
    /// because an earlier copy is still in place.
    pub fn is_success(&self) -> bool {
        !matches!(self.write, ArchiveWrite::Failed { .. })
    }

    /// Format name for the catalog, `None` for uncompressed backups.
    pub fn compression_label(&self) -> Option<&'static str> {
        self.compressed.then(|| self.compression_format.as_str())
    }
}

/// Builds a backup of `source` under `backup_root`, stamped with the current time.
pub fn build<P: AsRef<Path>>(
    source: Arc<SourceDirectory>,
    compressed: bool,
    format: CompressionFormat,
    backup_root: P,
) -> Result<BackupArchive> {
    build_at(
        source,
        compressed,
        format,
        backup_root,
        Local::now().trunc_subsecs(0),
    )
}

/// [`build`] with an explicit creation time, which fixes `backup_name`.
#[named]
pub fn build_at<P: AsRef<Path>>(
    source: Arc<SourceDirectory>,
    compressed: bool,
    format: CompressionFormat,
    backup_root: P,
    created_at: DateTime<Local>,
) -> Result<BackupArchive> {
    if compressed && format == CompressionFormat::NoneCopy {
        return Err(Error::UnsupportedFormat(format.as_str().to_string()))
            .with_fn_name(function_path!());
    }

    let backup_root = backup_root.as_ref().to_path_buf();
    std::fs::create_dir_all(&backup_root)
        .map_err(|e| Error::Storage {
            path: backup_root.clone(),
            source: e,
        })
        .with_fn_name(function_path!())?;
    tracing::debug!("Backup root ready: {:?}", backup_root);

    let backup_name = format!(
        "{}-{}",
        source.safe_name(),
        created_at.format(BACKUP_TIME_FORMAT)
    );
    let ext = if compressed { format.file_ext() } else { None };
    let backup_file = match ext {
        Some(ext) => backup_root.join(format!("{backup_name}.{ext}")),
        None => backup_root.join(&backup_name),
    };

    let write_res = if compressed {
        write_archive(&source, format, &backup_file)
    } else {
        copy::copy_source_tree(&source, &backup_root)
    };
    let write = write_res.unwrap_or_else(|e| {
        let reason = if compressed {
            format!("Compression to {:?} failed", backup_file)
        } else {
            format!("Copy of {:?} failed", source.path())
        };
        let e = e
            .with_msg(reason)
            .with_debug_object_and_fn_name(format, function_path!());
        tracing::error!("{e}");
        ArchiveWrite::Failed {
            reason: e.to_string(),
        }
    });

    Ok(BackupArchive {
        source,
        compressed,
        compression_format: format,
        backup_root,
        backup_name,
        backup_file,
        created_at,
        write,
    })
}

fn tmp_path(backup_file: &Path) -> PathBuf {
    let mut tmp = OsString::from(backup_file.as_os_str());
    tmp.push(".tmp");
    tmp.into()
}

/// Writes into `<backup_file>.tmp` and renames over `backup_file` on success,
/// so the final name never holds a partial archive.
fn write_archive(
    source: &SourceDirectory,
    format: CompressionFormat,
    backup_file: &Path,
) -> Result<ArchiveWrite> {
    let file_path_tmp = tmp_path(backup_file);

    let res = File::create(&file_path_tmp)
        .map(BufWriter::new)
        .map_err(Error::from)
        .and_then(|writer| match format {
            CompressionFormat::Tar => tar::write_tar_archive(source, Compressor::plain(writer)),
            CompressionFormat::TarGz => tar::write_tar_archive(source, Compressor::gzip(writer)),
            CompressionFormat::Zip => zip::write_zip_archive(source, writer),
            CompressionFormat::NoneCopy => Err(Error::UnsupportedFormat(format.to_string())),
        })
        .and_then(|writer| writer.into_inner().map_err(IntoInnerError::into_error).map_err(Error::from))
        .and_then(|file| file.sync_all().map_err(Error::from))
        .and_then(|_| std::fs::rename(&file_path_tmp, backup_file).map_err(Error::from))
        .and_then(|_| std::fs::metadata(backup_file).map_err(Error::from));

    match res {
        Ok(md) => {
            tracing::info!("Created backup file: {:?} ({} bytes)", backup_file, md.len());
            Ok(ArchiveWrite::Archived {
                size_bytes: md.len(),
            })
        }
        Err(e) => {
            if file_path_tmp.is_file() {
                if let Err(e2) = std::fs::remove_file(&file_path_tmp) {
                    tracing::warn!("Delete tmp file {:?} failed: {}", file_path_tmp, e2);
                }
            }
            Err(e)
        }
    }
}

impl Display for BackupArchive {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "BackupArchive for: {:?}", self.source.safe_name())?;
        writeln!(f, "Backup Name: {:?}", self.backup_name)?;
        writeln!(f, "Backup Path: {}", self.backup_root.display())?;
        writeln!(f, "Backup File: {}", self.backup_file.display())?;
        writeln!(f, "Compressed: {}", if self.compressed { "Yes" } else { "No" })?;
        match self.output_size_bytes() {
            Some(size) => writeln!(f, "Size: {} KiB", size / 1024)?,
            None => writeln!(f, "Size: Unknown")?,
        }
        write!(f, "Backup Date: {}", self.created_at.format("%Y-%m-%d %H:%M"))
    }
}
