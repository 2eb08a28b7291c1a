use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::bufpool;
use crate::error::Result;
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::reader::EntryReader;
use super::structures::ZipFileEntry;

/// Prefix of every temporary file created for an extracted entry.
pub const TEMP_PREFIX: &str = "zipfs";

/// Entry-level access to an archive: streams, data offsets and extraction.
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Offset of the entry's (possibly compressed) payload within the archive.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        self.parser.data_offset(entry).await
    }

    /// The archive's random-access source.
    pub fn source(&self) -> &Arc<R> {
        self.parser.reader()
    }

    /// Open a decompressing stream over the entry.
    pub async fn open(&self, entry: &ZipFileEntry) -> Result<EntryReader<R>> {
        let data_offset = self.data_offset(entry).await?;
        EntryReader::new(Arc::clone(self.source()), entry, data_offset)
    }

    /// Extract the whole entry into a new temporary file under `dir`.
    ///
    /// The file is deleted when the returned path is dropped, including when
    /// extraction fails halfway.
    pub async fn extract_to_temp(&self, entry: &ZipFileEntry, dir: &Path) -> Result<TempPath> {
        let mut reader = self.open(entry).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut buf = bufpool::get();
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;

        log::debug!(
            "extracted {} ({} bytes) to {}",
            entry.file_name,
            entry.uncompressed_size,
            path.display()
        );
        Ok(path)
    }
}
