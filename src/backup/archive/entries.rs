use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::source::SourceDirectory;

use function_name::named;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// A filesystem node of the source tree and the path it takes inside the backup.
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Location on the filesystem.
    pub src: Arc<Path>,
    /// Location inside the archive, always rooted at the source's safe name.
    pub dst: Arc<Path>,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    fn new<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B, kind: EntryKind) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            kind,
        }
    }

    /// A regular file, or a symlink whose target is one.
    pub fn has_file_content(&self) -> bool {
        match self.kind {
            EntryKind::File => true,
            EntryKind::Symlink => self.src.is_file(),
            EntryKind::Directory => false,
        }
    }
}

/// Walks the source tree without following symlinks, parents before children,
/// siblings in file name order. The root itself comes first as `safe_name`.
#[named]
pub fn source_entries(source: &SourceDirectory) -> impl Iterator<Item = Result<ArchiveEntry>> {
    let src_dir = source.path().to_path_buf();
    let dst_dir = PathBuf::from(source.safe_name());

    WalkDir::new(source.path())
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |res| match res {
            Ok(de) => process_dir_entry(de, &src_dir, &dst_dir),
            Err(e) => Some(Err(e.into())),
        })
        .map(move |res| res.with_fn_name(function_path!()))
}

/// Entries with file content, the view a zip archive is built from. Symlinks to
/// files are kept so their target's content gets stored; any other symlink is dropped.
pub fn source_files(source: &SourceDirectory) -> impl Iterator<Item = Result<ArchiveEntry>> {
    source_entries(source).filter(|res| match res {
        Ok(entry) if entry.has_file_content() => true,
        Ok(entry) => {
            if entry.kind == EntryKind::Symlink {
                tracing::debug!("Skipping {:?}, symlink does not point to a file", entry.src);
            }
            false
        }
        Err(_) => true,
    })
}

fn process_dir_entry<P1: AsRef<Path>, P2: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P1,
    base_dst_dir: P2,
) -> Option<Result<ArchiveEntry>> {
    let file_type = de.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        tracing::trace!("Skipping {:?}, not a file, directory or symlink", de.path());
        return None;
    };

    let p = de.into_path();
    let res = match p.strip_prefix(base_src_dir.as_ref()) {
        Ok(stripped_path) => Ok(base_dst_dir.as_ref().join(stripped_path)),
        Err(e) => Err(Error::from(e).with_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_src_dir.as_ref(),
            p
        ))),
    };

    Some(res.map(|dst| {
        let entry = ArchiveEntry::new(p, dst, kind);
        tracing::trace!("Including {:?}: {:?} -> {:?}", entry.kind, entry.src, entry.dst);
        entry
    }))
}
