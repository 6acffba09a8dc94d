use crate::backup::archive::entries::source_files;
use crate::backup::result_error::result::Result;
use crate::backup::source::SourceDirectory;
use itertools::Itertools;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip member names always use `/`, whatever the host separator is.
fn zip_entry_name(dst: &Path) -> String {
    dst.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .join("/")
}

/// Deflates every regular file of the source into a zip written to `writer`.
/// Symlinked files are stored with their target's content.
///
/// Directories get no entries of their own; their structure lives in member names.
pub fn write_zip_archive<W: Write + Seek>(source: &SourceDirectory, writer: W) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entry_count = 0;
    for entry in source_files(source) {
        let entry = entry?;
        let mut file = File::open(&entry.src)?;
        let large_file = file.metadata()?.len() >= u64::from(u32::MAX);

        zip.start_file(zip_entry_name(&entry.dst), options.large_file(large_file))?;
        std::io::copy(&mut file, &mut zip)?;
        tracing::trace!("Added {:?} to zip as {:?}", entry.src, entry.dst);
        entry_count += 1;
    }
    tracing::info!("Processed {} zip entries", entry_count);

    Ok(zip.finish()?)
}
