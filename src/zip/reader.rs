//! Forward-only reader over one entry's data.
//!
//! Compressed bytes are fetched with positioned reads from the shared
//! [`ReadAt`] source, so many readers can stream from the same archive at
//! once. Deflate data is inflated incrementally with [`flate2::Decompress`]
//! and the CRC32 is verified once the declared size has been produced.

use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;

use crate::bufpool::{self, PooledBuffer};
use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::{CompressionMethod, ZipFileEntry};

pub struct EntryReader<R: ReadAt> {
    source: Arc<R>,
    name: String,
    /// Archive offset of the next compressed byte to fetch
    offset: u64,
    compressed_remaining: u64,
    uncompressed_remaining: u64,
    position: u64,
    inflater: Option<Inflater>,
    hasher: crc32fast::Hasher,
    expected_crc: u32,
    verified: bool,
}

struct Inflater {
    state: Decompress,
    input: PooledBuffer<'static>,
    start: usize,
    end: usize,
}

impl<R: ReadAt> EntryReader<R> {
    /// Reader for `entry` whose data begins at `data_offset`.
    pub fn new(source: Arc<R>, entry: &ZipFileEntry, data_offset: u64) -> Result<Self> {
        let inflater = match entry.compression_method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(Inflater {
                state: Decompress::new(false),
                input: bufpool::get(),
                start: 0,
                end: 0,
            }),
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedCompressionMethod(method));
            }
        };

        let compressed_remaining = match inflater {
            Some(_) => entry.compressed_size,
            None => entry.uncompressed_size,
        };

        Ok(Self {
            source,
            name: entry.file_name.clone(),
            offset: data_offset,
            compressed_remaining,
            uncompressed_remaining: entry.uncompressed_size,
            position: 0,
            inflater,
            hasher: crc32fast::Hasher::new(),
            expected_crc: entry.crc32,
            verified: false,
        })
    }

    /// Number of uncompressed bytes produced so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next uncompressed bytes. Returns 0 at the end of the entry.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.uncompressed_remaining == 0 {
            self.verify()?;
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(self.uncompressed_remaining as usize);
        let n = if self.inflater.is_some() {
            self.read_deflate(&mut buf[..want]).await?
        } else {
            self.read_stored(&mut buf[..want]).await?
        };

        self.hasher.update(&buf[..n]);
        self.position += n as u64;
        self.uncompressed_remaining -= n as u64;
        Ok(n)
    }

    async fn read_stored(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.source.read_at(self.offset, buf).await?;
        if n == 0 {
            return Err(truncated(&self.name));
        }
        self.offset += n as u64;
        self.compressed_remaining = self.compressed_remaining.saturating_sub(n as u64);
        Ok(n)
    }

    async fn read_deflate(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let needs_input = self
                .inflater
                .as_ref()
                .is_some_and(|inflater| inflater.start == inflater.end);
            if needs_input && self.compressed_remaining > 0 {
                self.fill().await?;
            }

            let Some(inflater) = self.inflater.as_mut() else {
                return Ok(0);
            };
            let before_in = inflater.state.total_in();
            let before_out = inflater.state.total_out();
            let status = inflater
                .state
                .decompress(
                    &inflater.input[inflater.start..inflater.end],
                    buf,
                    FlushDecompress::None,
                )
                .map_err(|e| Error::invalid(format!("{}: {}", self.name, e)))?;
            let consumed = (inflater.state.total_in() - before_in) as usize;
            let produced = (inflater.state.total_out() - before_out) as usize;
            inflater.start += consumed;

            if produced > 0 {
                return Ok(produced);
            }
            if status == Status::StreamEnd {
                return Err(truncated(&self.name));
            }
            if consumed == 0 {
                // The inflater wants more input than is buffered.
                if self.compressed_remaining == 0 {
                    return Err(truncated(&self.name));
                }
                self.fill().await?;
            }
        }
    }

    /// Move unconsumed input to the front and top the buffer up from the archive.
    async fn fill(&mut self) -> Result<()> {
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(());
        };
        inflater.input.copy_within(inflater.start..inflater.end, 0);
        inflater.end -= inflater.start;
        inflater.start = 0;

        let room = (inflater.input.len() - inflater.end) as u64;
        let len = room.min(self.compressed_remaining) as usize;
        if len == 0 {
            return Ok(());
        }
        let end = inflater.end;
        let n = self
            .source
            .read_at(self.offset, &mut inflater.input[end..end + len])
            .await?;
        if n == 0 {
            return Err(truncated(&self.name));
        }
        inflater.end += n;
        self.offset += n as u64;
        self.compressed_remaining -= n as u64;
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        self.verified = true;
        if self.hasher.clone().finalize() != self.expected_crc {
            return Err(Error::Checksum {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

fn truncated(name: &str) -> Error {
    Error::invalid(format!("{name}: unexpected end of entry data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    struct Memory(Vec<u8>);

    #[async_trait]
    impl ReadAt for Memory {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let offset = offset.min(self.0.len() as u64) as usize;
            // Short reads on purpose, to exercise refills.
            let n = buf.len().min(self.0.len() - offset).min(1000);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }

    fn content() -> Vec<u8> {
        (0..100_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    fn entry(method: CompressionMethod, data: &[u8], compressed: u64) -> ZipFileEntry {
        ZipFileEntry {
            file_name: "data.bin".to_string(),
            compression_method: method,
            compressed_size: compressed,
            uncompressed_size: data.len() as u64,
            crc32: crc32fast::hash(data),
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            unix_mtime: None,
            is_directory: false,
        }
    }

    async fn read_all<R: ReadAt>(reader: &mut EntryReader<R>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn inflates_deflate_entries() {
        let data = content();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        // Leading padding stands in for the local file header.
        let mut archive = vec![0xAA; 17];
        archive.extend_from_slice(&compressed);

        let entry = entry(CompressionMethod::Deflate, &data, compressed.len() as u64);
        let mut reader = EntryReader::new(Arc::new(Memory(archive)), &entry, 17).unwrap();
        assert_eq!(read_all(&mut reader).await.unwrap(), data);
        assert_eq!(reader.position(), data.len() as u64);
    }

    #[tokio::test]
    async fn reads_stored_entries() {
        let data = content();
        let entry = entry(CompressionMethod::Stored, &data, data.len() as u64);
        let mut reader = EntryReader::new(Arc::new(Memory(data.clone())), &entry, 0).unwrap();
        assert_eq!(read_all(&mut reader).await.unwrap(), data);
    }

    #[tokio::test]
    async fn reports_checksum_mismatch() {
        let data = b"hello, world".to_vec();
        let mut entry = entry(CompressionMethod::Stored, &data, data.len() as u64);
        entry.crc32 ^= 1;
        let mut reader = EntryReader::new(Arc::new(Memory(data)), &entry, 0).unwrap();
        let err = read_all(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }), "{err}");
    }

    #[tokio::test]
    async fn reports_truncated_data() {
        let data = content();
        let entry = entry(CompressionMethod::Stored, &data, data.len() as u64);
        let mut reader =
            EntryReader::new(Arc::new(Memory(data[..500].to_vec())), &entry, 0).unwrap();
        let err = read_all(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(_)), "{err}");
    }

    #[test]
    fn rejects_unknown_methods() {
        let entry = entry(CompressionMethod::Unknown(12), b"", 0);
        let err = EntryReader::new(Arc::new(Memory(Vec::new())), &entry, 0)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedCompressionMethod(12)));
    }
}
