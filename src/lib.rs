//! # zipfs
//!
//! A ZIP archive exposed as a read-only, seekable filesystem and served over
//! HTTP.
//!
//! The archive's central directory is read once and indexed into a directory
//! tree. File handles stream entries straight out of the archive and only
//! extract an entry to a temp file when something seeks into it. The HTTP
//! handler sends deflated entries unchanged to clients that accept
//! `Content-Encoding: deflate`, and answers range requests from an extracted
//! copy.
//!
//! Archives can be local files or remote URLs; remote archives are read with
//! HTTP Range requests, so only the central directory and the requested
//! entries are downloaded.
//!
//! ## Features
//!
//! - Directory listing with directories inferred from nested entry names
//! - STORED and DEFLATE entries, ZIP64 archives, CRC32 verification
//! - ETag, `If-None-Match` and `If-Range` handling
//! - Mountable under any base path as an `axum` router
//!
//! ## Example
//!
//! ```no_run
//! use zipfs::{FileServer, FileSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fs = FileSystem::open_path("site.zip").await?;
//!
//!     let mut file = fs.open("/index.html")?;
//!     let mut html = Vec::new();
//!     file.read_to_end(&mut html).await?;
//!     println!("{} bytes", html.len());
//!
//!     let app = FileServer::new(&fs).router("/static");
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod bufpool;
pub mod cli;
pub mod error;
pub mod fs;
pub mod io;
pub mod server;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use fs::{DirEntries, FileInfo, FileMode, FileSystem, ZipFile};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use server::{FileServer, ServerConfig};
pub use zip::{CompressionMethod, ZipFileEntry};
