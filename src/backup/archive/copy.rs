use crate::backup::archive::entries::{source_entries, EntryKind};
use crate::backup::archive::{tmp_path, ArchiveWrite};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::source::SourceDirectory;
use std::path::Path;

/// Copies the source tree to `backup_root/<safe_name>`.
///
/// An existing destination is left untouched and reported as
/// [`ArchiveWrite::SkippedExisting`]; copies never merge into or replace it.
/// The tree is staged in `<safe_name>.tmp` and renamed into place, so a failed
/// copy leaves no destination behind. Symlinked files are copied as regular
/// files; symlinks to anything else are skipped.
pub fn copy_source_tree(source: &SourceDirectory, backup_root: &Path) -> Result<ArchiveWrite> {
    let dest = backup_root.join(source.safe_name());
    if dest.exists() {
        tracing::warn!("Destination {:?} already exists. Skipping copy.", dest);
        return Ok(ArchiveWrite::SkippedExisting);
    }

    let staging = tmp_path(&dest);
    tracing::debug!("Copying {:?} to {:?}", source.path(), staging);
    let entry_count = stage_then_rename(&staging, &dest, |staging| copy_entries(source, staging))?;
    tracing::info!("Copied {} entries to {:?}", entry_count, dest);

    Ok(ArchiveWrite::Copied)
}

/// Runs `stage` against a fresh `staging` directory and renames it to `dest`.
/// Whatever `stage` left behind is removed when it or the rename fails.
fn stage_then_rename<F>(staging: &Path, dest: &Path, stage: F) -> Result<usize>
where
    F: FnOnce(&Path) -> Result<usize>,
{
    if staging.is_dir() {
        tracing::warn!("Removing leftover staging directory {:?}", staging);
        std::fs::remove_dir_all(staging)?;
    }

    let res = stage(staging).and_then(|count| {
        std::fs::rename(staging, dest)
            .map(|_| count)
            .map_err(Error::from)
    });

    if res.is_err() && staging.is_dir() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            tracing::warn!("Delete staging directory {:?} failed: {}", staging, e);
        }
    }
    res
}

fn copy_entries(source: &SourceDirectory, staging: &Path) -> Result<usize> {
    let mut entry_count = 0;
    for entry in source_entries(source) {
        let entry = entry?;
        let target = staging.join(entry.dst.strip_prefix(source.safe_name())?);
        match entry.kind {
            EntryKind::Directory => std::fs::create_dir_all(&target)?,
            EntryKind::File => {
                std::fs::copy(&entry.src, &target)?;
            }
            EntryKind::Symlink if entry.has_file_content() => {
                std::fs::copy(&entry.src, &target)?;
            }
            EntryKind::Symlink => {
                tracing::debug!("Skipping {:?}, symlink does not point to a file", entry.src);
                continue;
            }
        }
        entry_count += 1;
    }
    Ok(entry_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::source::inspect;
    use tempfile::TempDir;

    fn notes(temp_dir: &TempDir) -> std::path::PathBuf {
        let root = temp_dir.path().join("Notes");
        std::fs::create_dir_all(root.join("sub/empty")).unwrap();
        std::fs::write(root.join("a.txt"), "hello").unwrap();
        std::fs::write(root.join("sub/b.txt"), "abc").unwrap();
        root
    }

    #[test]
    fn test_copy_reproduces_tree() {
        let temp_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let source = inspect(notes(&temp_dir), false).unwrap();

        let write = copy_source_tree(&source, backup_root.path()).unwrap();
        assert_eq!(write, ArchiveWrite::Copied);

        let dest = backup_root.path().join("Notes");
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
        assert_eq!(std::fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "abc");
        assert!(dest.join("sub/empty").is_dir());
        assert!(!backup_root.path().join("Notes.tmp").exists());
    }

    #[test]
    fn test_copy_skips_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let root = temp_dir.path().join("Notes");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "new").unwrap();
        std::fs::create_dir_all(backup_root.path().join("Notes")).unwrap();
        std::fs::write(backup_root.path().join("Notes/old.txt"), "old").unwrap();
        let source = inspect(&root, false).unwrap();

        let write = copy_source_tree(&source, backup_root.path()).unwrap();
        assert_eq!(write, ArchiveWrite::SkippedExisting);
        assert!(!backup_root.path().join("Notes/a.txt").exists());
        assert!(backup_root.path().join("Notes/old.txt").exists());
    }

    #[test]
    fn test_failed_copy_leaves_no_destination() {
        let temp_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let staging = backup_root.path().join("Notes.tmp");
        let dest = backup_root.path().join("Notes");

        let err = stage_then_rename(&staging, &dest, |staging| {
            std::fs::create_dir_all(staging.join("sub"))?;
            std::fs::write(staging.join("sub/partial.txt"), "par")?;
            Err(std::io::Error::other("disk full").into())
        })
        .unwrap_err();

        assert!(matches!(err.root(), Error::Io(_)));
        assert!(!staging.exists());
        assert!(!dest.exists());

        let source = inspect(notes(&temp_dir), false).unwrap();
        let write = copy_source_tree(&source, backup_root.path()).unwrap();
        assert_eq!(write, ArchiveWrite::Copied);
        assert_eq!(std::fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_leftover_staging_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let staging = backup_root.path().join("Notes.tmp");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("stale.txt"), "stale").unwrap();
        let source = inspect(notes(&temp_dir), false).unwrap();

        let write = copy_source_tree(&source, backup_root.path()).unwrap();

        assert_eq!(write, ArchiveWrite::Copied);
        let dest = backup_root.path().join("Notes");
        assert!(dest.join("a.txt").is_file());
        assert!(!dest.join("stale.txt").exists());
        assert!(!staging.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dereferences_symlinked_files() {
        let temp_dir = TempDir::new().unwrap();
        let backup_root = TempDir::new().unwrap();
        let root = notes(&temp_dir);
        let outside = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("shared.txt"), "shared").unwrap();
        std::os::unix::fs::symlink("../shared.txt", root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("dir_link")).unwrap();
        let source = inspect(&root, false).unwrap();

        copy_source_tree(&source, backup_root.path()).unwrap();

        let copied = backup_root.path().join("Notes/link.txt");
        assert!(!copied.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "shared");
        assert!(backup_root
            .path()
            .join("Notes/dir_link")
            .symlink_metadata()
            .is_err());
    }
}
