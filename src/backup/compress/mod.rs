use crate::backup::finish::Finish;
use derive_more::From;
use flate2::write::GzEncoder;
use flate2::Compression;
use io_enum::Write;
use std::io;
use std::io::Write;

/// Outer byte stream of a tar archive: raw, or gzip-compressed.
#[derive(Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    pub fn plain(writer: W) -> Self {
        Compressor::None(writer)
    }

    pub fn gzip(writer: W) -> Self {
        tracing::debug!("Creating gzip compressor with default level");
        GzEncoder::new(writer, Compression::default()).into()
    }
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Gzip(w) => w.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_plain_compressor_passes_bytes_through() {
        let mut compressor = Compressor::plain(Cursor::new(Vec::new()));
        compressor.write_all(b"raw bytes").unwrap();

        let inner = compressor.finish().unwrap();
        assert_eq!(inner.get_ref().as_slice(), b"raw bytes");
    }

    #[test]
    fn test_gzip_compressor_writes_gzip_magic() {
        let mut compressor = Compressor::gzip(Cursor::new(Vec::new()));
        compressor.write_all(b"some bytes").unwrap();

        let inner = compressor.finish().unwrap();
        assert_eq!(&inner.get_ref()[..2], &[0x1f, 0x8b]);
    }
}
