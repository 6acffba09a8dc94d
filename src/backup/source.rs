//! Source directory inspection.
//!
//! Resolves the caller-supplied path, derives the safe name used for archive
//! member roots and catalog rows, and optionally sums the size of every
//! regular file below it.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithFnName;

use chrono::{DateTime, Local, SubsecRound};
use function_name::named;
use getset::{CopyGetters, Getters};
use walkdir::WalkDir;

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Characters replaced by `_` when deriving a safe name, spaces included.
const UNSAFE_NAME_CHARS: [char; 10] = [' ', '<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// An inspected source directory. Immutable once [`inspect`] returns it.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct SourceDirectory {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get = "pub")]
    safe_name: String,
    /// Sum of regular file sizes, `None` when size calculation was not requested.
    #[getset(get_copy = "pub")]
    size_bytes: Option<u64>,
    #[getset(get_copy = "pub")]
    modified_at: DateTime<Local>,
}

/// Replaces spaces and `< > : " / \ | ? *` with underscores.
pub fn make_safe_name<S: AsRef<str>>(name: S) -> String {
    name.as_ref()
        .chars()
        .map(|c| if UNSAFE_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Validates `path` as a directory and collects the facts recorded for it.
///
/// Only a missing or non-directory path is an error. Unreadable metadata falls
/// back to the current time and a failed size walk yields `0`, both logged.
#[named]
pub fn inspect<P: AsRef<Path>>(path: P, calculate_size: bool) -> Result<SourceDirectory> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::error!("Directory: {:?} does not exist", path);
        return Err(Error::InvalidSource {
            path: path.to_path_buf(),
            reason: "path does not exist",
        })
        .with_fn_name(function_path!());
    }
    if !path.is_dir() {
        tracing::error!("Directory: {:?} is not a directory", path);
        return Err(Error::InvalidSource {
            path: path.to_path_buf(),
            reason: "path is not a directory",
        })
        .with_fn_name(function_path!());
    }

    // Name comes from the path as given so a symlinked source keeps the link's name.
    let given = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let path = path.canonicalize().unwrap_or_else(|e| {
        tracing::warn!("Could not canonicalize {:?}, using it as given: {}", path, e);
        given.clone()
    });

    let safe_name = given
        .file_name()
        .or_else(|| path.file_name())
        .map(|n| make_safe_name(n.to_string_lossy()))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::InvalidSource {
            path: path.clone(),
            reason: "path has no final component to name the backup after",
        })
        .with_fn_name(function_path!())?;

    let modified_at = modified_at(&path);
    let size_bytes = calculate_size.then(|| directory_size(&path));

    tracing::debug!(
        "Inspected {:?} as {:?} (size: {:?}, modified: {})",
        path,
        safe_name,
        size_bytes,
        modified_at
    );

    Ok(SourceDirectory {
        path,
        safe_name,
        size_bytes,
        modified_at,
    })
}

fn modified_at(path: &Path) -> DateTime<Local> {
    modified_or_now(path, std::fs::metadata(path).and_then(|md| md.modified()))
}

fn modified_or_now(path: &Path, modified: std::io::Result<SystemTime>) -> DateTime<Local> {
    match modified {
        Ok(time) => time.into(),
        Err(e) => {
            tracing::error!("Could not get modification date of {:?}: {}", path, e);
            Local::now().trunc_subsecs(0)
        }
    }
}

/// Sums regular files only. Symlinks are not followed and not counted.
fn directory_size(path: &Path) -> u64 {
    let walked: Result<u64> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .try_fold(0u64, |total, entry| {
            let entry = entry?;
            if entry.file_type().is_file() {
                Ok(total + entry.metadata()?.len())
            } else {
                Ok(total)
            }
        });
    size_or_zero(path, walked)
}

fn size_or_zero(path: &Path, walked: Result<u64>) -> u64 {
    walked.unwrap_or_else(|e| {
        tracing::error!("Error calculating directory size of {:?}: {}", path, e);
        0
    })
}

impl Display for SourceDirectory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SourceDirectory: {:?}", self.safe_name)?;
        writeln!(f, "Path: {}", self.path.display())?;
        match self.size_bytes {
            Some(size) => writeln!(f, "Size: {} KiB", size / 1024)?,
            None => writeln!(f, "Size: Unknown")?,
        }
        write!(f, "Last Modified: {}", self.modified_at.format("%Y-%m-%d %H:%M"))
    }
}
