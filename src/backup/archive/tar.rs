use crate::backup::archive::entries::source_entries;
use crate::backup::compress::Compressor;
use crate::backup::finish::Finish;
use crate::backup::result_error::result::Result;
use crate::backup::source::SourceDirectory;
use std::io::Write;

/// Writes the whole source tree as a tar stream through `writer`.
///
/// Symlinks are stored as links. Returns the writer under the compressor once
/// the tar trailer and any gzip footer are written.
pub fn write_tar_archive<W: Write>(source: &SourceDirectory, writer: Compressor<W>) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    let mut entry_count = 0;
    for entry in source_entries(source) {
        let entry = entry?;
        builder.append_path_with_name(entry.src.as_ref(), entry.dst.as_ref())?;
        entry_count += 1;
    }
    tracing::info!("Processed {} tar entries", entry_count);

    Ok(builder.into_inner()?.finish()?)
}
