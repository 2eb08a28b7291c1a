//! Response bodies streamed out of the archive in pool-sized chunks.
//!
//! The first chunk is fetched before the response is built, so a failure
//! there can still become a 500. Failures after that end the body stream
//! and are only logged.

use axum::body::Body;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::sync::Arc;
use tempfile::TempPath;

use crate::bufpool;
use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::zip::EntryReader;

pub(crate) enum ChunkSource<R: ReadAt> {
    /// Decompressed bytes from the entry stream.
    Identity(EntryReader<R>),
    /// Raw compressed bytes copied from the archive.
    Raw {
        source: Arc<R>,
        offset: u64,
        remaining: u64,
    },
}

impl<R: ReadAt + 'static> ChunkSource<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = bufpool::get();
        let n = match self {
            ChunkSource::Identity(reader) => reader.read(&mut buf).await?,
            ChunkSource::Raw {
                source,
                offset,
                remaining,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let len = buf.len().min(*remaining as usize);
                source.read_exact_at(*offset, &mut buf[..len]).await?;
                *offset += len as u64;
                *remaining -= len as u64;
                len
            }
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&buf[..n])))
    }

    /// Fetch the first chunk, then hand the rest to a lazily polled body.
    pub(crate) async fn into_body(mut self, name: String) -> Result<Body> {
        let first = self.next_chunk().await?;
        let Some(first) = first else {
            return Ok(Body::empty());
        };

        let rest = stream::try_unfold(self, move |mut source| {
            let name = name.clone();
            async move {
                match source.next_chunk().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, source))),
                    Ok(None) => Ok(None),
                    Err(err) => {
                        log::warn!("serving {name}: {err}");
                        Err(err)
                    }
                }
            }
        });
        Ok(Body::from_stream(
            stream::once(async move { Ok::<_, Error>(first) }).chain(rest),
        ))
    }
}

/// Wrap a body so the temp file backing it is deleted once the body is
/// finished or dropped.
pub(crate) fn with_temp_file(body: Body, temp: TempPath) -> Body {
    let stream = body.into_data_stream().map(move |chunk| {
        let _keep = &temp;
        chunk
    });
    Body::from_stream(stream)
}
