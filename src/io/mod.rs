mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Trait for random access reading from an archive source.
///
/// Reads are positioned and never move a shared cursor, so any number of
/// in-flight requests may read the same source concurrently.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely starting at `offset`.
    async fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf).await?;
            if n == 0 {
                return Err(Error::invalid(format!(
                    "unexpected end of archive at offset {offset}"
                )));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}
