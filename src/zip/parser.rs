//! Central directory parsing over a [`ReadAt`] source.
//!
//! Only the tail of the archive is touched to build the listing; local
//! headers are read lazily, one per entry, when its data is first needed.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::structures::*;

const MAX_COMMENT_SIZE: u64 = 65535;

/// Reads the archive's directory records. Used through
/// [`ZipExtractor`](super::ZipExtractor).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the end of central directory record, returning it with its
    /// offset. A trailing archive comment pushes it back by up to 64 KiB.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        // Common case: no comment, the record is the last 22 bytes.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let window = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let window_start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(window_start, &mut buf).await?;

        // A signature only counts if its comment length reaches exactly to EOF.
        let last = buf.len().saturating_sub(EndOfCentralDirectory::SIZE);
        let found = (0..last).rev().find(|&i| {
            &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE
                && u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize
                    == buf.len() - i - EndOfCentralDirectory::SIZE
        });

        match found {
            Some(i) => {
                let eocd = EndOfCentralDirectory::from_bytes(
                    &buf[i..i + EndOfCentralDirectory::SIZE],
                )?;
                Ok((eocd, window_start + i as u64))
            }
            None => Err(Error::invalid("end of central directory not found")),
        }
    }

    /// Follow the ZIP64 locator sitting right before the classic record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::invalid("missing zip64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Every central directory record, in archive order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > self.size {
            return Err(Error::invalid("central directory extends past end of file"));
        }

        // One read for the whole directory; over HTTP that is one request.
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut cursor = Cursor::new(cd_data.as_slice());
        let entries = (0..total_entries)
            .map(|_| parse_central_header(&mut cursor))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("central directory: {} entries", entries.len());
        Ok(entries)
    }

    /// Offset of the entry's data, past its local header. The local name and
    /// extra field lengths may differ from the central directory's copy.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;

        if &lfh[0..4] != LFH_SIGNATURE {
            return Err(Error::invalid(format!(
                "invalid local file header for {}",
                entry.file_name
            )));
        }

        let name_len = u16::from_le_bytes([lfh[26], lfh[27]]) as u64;
        let extra_len = u16::from_le_bytes([lfh[28], lfh[29]]) as u64;
        Ok(entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

fn parse_central_header(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor
        .read_exact(&mut sig)
        .map_err(|_| Error::invalid("truncated central directory"))?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::invalid("invalid central directory file header"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name)?;
    let file_name = String::from_utf8_lossy(&name).into_owned();

    let mut extras = Extras {
        uncompressed_size,
        compressed_size,
        lfh_offset,
        unix_mtime: None,
    };
    let extra_end = cursor.position() + extra_len as u64;
    extras.read(cursor, extra_end)?;
    cursor.set_position(extra_end + comment_len as u64);

    Ok(ZipFileEntry {
        is_directory: file_name.ends_with('/'),
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size: extras.compressed_size,
        uncompressed_size: extras.uncompressed_size,
        crc32,
        lfh_offset: extras.lfh_offset,
        last_mod_time,
        last_mod_date,
        unix_mtime: extras.unix_mtime,
    })
}

/// Values the extra field may override or add.
struct Extras {
    uncompressed_size: u64,
    compressed_size: u64,
    lfh_offset: u64,
    unix_mtime: Option<i64>,
}

impl Extras {
    /// Walk the extra records up to `end`. Unknown ids are skipped and a
    /// record claiming more than what is left is clamped.
    fn read(&mut self, cursor: &mut Cursor<&[u8]>, end: u64) -> Result<()> {
        while cursor.position() + 4 <= end {
            let id = cursor.read_u16::<LittleEndian>()?;
            let size = cursor.read_u16::<LittleEndian>()?;
            let field_end = (cursor.position() + size as u64).min(end);

            match id {
                ZIP64_EXTRA_ID => {
                    // Present in this order, and only for saturated fields.
                    for value in [
                        &mut self.uncompressed_size,
                        &mut self.compressed_size,
                        &mut self.lfh_offset,
                    ] {
                        if *value == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                            *value = cursor.read_u64::<LittleEndian>()?;
                        }
                    }
                }
                EXTENDED_TIMESTAMP_ID if size >= 5 => {
                    let flags = cursor.read_u8()?;
                    if flags & 0x01 != 0 {
                        self.unix_mtime = Some(cursor.read_i32::<LittleEndian>()? as i64);
                    }
                }
                _ => {}
            }

            cursor.set_position(field_end);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::zip::write::SimpleFileOptions;
    use ::zip::{CompressionMethod as Method, ZipWriter};
    use async_trait::async_trait;
    use std::io::Write;

    struct Memory(Vec<u8>);

    #[async_trait]
    impl ReadAt for Memory {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let offset = offset.min(self.0.len() as u64) as usize;
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }

    fn archive(comment: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(Method::Stored);
        zip.add_directory("docs/", stored).unwrap();
        zip.start_file("docs/readme.txt", stored).unwrap();
        zip.write_all(b"read me first").unwrap();
        zip.start_file("data.bin", SimpleFileOptions::default()).unwrap();
        zip.write_all(&[7u8; 4096]).unwrap();
        zip.set_comment(comment);
        zip.finish().unwrap().into_inner()
    }

    fn parser(bytes: Vec<u8>) -> ZipParser<Memory> {
        ZipParser::new(Arc::new(Memory(bytes)))
    }

    #[tokio::test]
    async fn lists_records_in_archive_order() {
        let entries = parser(archive("")).list_files().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["docs/", "docs/readme.txt", "data.bin"]);

        assert!(entries[0].is_directory);
        assert_eq!(entries[1].compression_method, CompressionMethod::Stored);
        assert_eq!(entries[1].uncompressed_size, 13);
        assert_eq!(entries[1].crc32, crc32fast::hash(b"read me first"));
        assert_eq!(entries[2].compression_method, CompressionMethod::Deflate);
        assert_eq!(entries[2].uncompressed_size, 4096);
        assert!(entries[2].compressed_size < 4096);
    }

    #[tokio::test]
    async fn finds_the_directory_behind_a_comment() {
        let bytes = archive(&"x".repeat(1000));
        let size = bytes.len() as u64;
        let parser = parser(bytes);

        let (eocd, offset) = parser.find_eocd().await.unwrap();
        assert_eq!(offset, size - 1000 - EndOfCentralDirectory::SIZE as u64);
        assert_eq!(eocd.total_entries, 3);
        assert_eq!(parser.list_files().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn data_offset_points_at_the_stored_bytes() {
        let bytes = archive("");
        let parser = parser(bytes.clone());
        let entries = parser.list_files().await.unwrap();

        let offset = parser.data_offset(&entries[1]).await.unwrap() as usize;
        assert_eq!(&bytes[offset..offset + 13], b"read me first");
    }

    #[tokio::test]
    async fn rejects_data_without_a_directory() {
        let err = parser(b"PK\x03\x04 but nothing else".to_vec())
            .list_files()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(_)));

        // Directory offset pointing past the end.
        let mut bytes = archive("");
        let at = bytes.len() - EndOfCentralDirectory::SIZE + 16;
        bytes[at..at + 4].copy_from_slice(&0x7fff_0000u32.to_le_bytes());
        assert!(matches!(
            parser(bytes).list_files().await,
            Err(Error::InvalidArchive(_))
        ));
    }
}
