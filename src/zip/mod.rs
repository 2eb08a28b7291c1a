//! ZIP archive parsing and entry access.
//!
//! This module reads archives from any [`ReadAt`](crate::io::ReadAt) source,
//! supporting both the standard format and ZIP64 extensions.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`reader`]: Forward-only decompressing stream over one entry
//! - [`extractor`]: Entry-level API: open streams, find data offsets, extract to temp files
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first (from the end of the file), then the Central
//! Directory, so listing never touches entry data - which keeps remote
//! archives cheap to open.
//!
//! ## Limitations
//!
//! - STORED and DEFLATE only; other methods fail with
//!   [`Error::UnsupportedCompressionMethod`](crate::Error::UnsupportedCompressionMethod)
//! - No encryption support
//! - No multi-disk archive support

mod extractor;
mod parser;
mod reader;
mod structures;

pub use extractor::{TEMP_PREFIX, ZipExtractor};
pub use parser::ZipParser;
pub use reader::EntryReader;
pub use structures::*;
