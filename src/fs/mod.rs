//! Read-only filesystem view of an archive.
//!
//! [`FileSystem`] parses the central directory once and answers `open`
//! through a [`DirectoryIndex`](index::DirectoryIndex). Handles
//! ([`ZipFile`]) stream straight from the archive and fall back to a temp
//! file extracted on the first seek; that temp file is shared by every later
//! handle on the same entry.
//!
//! Temp files live until the filesystem is closed (or the last handle,
//! server or filesystem referencing the archive is dropped).

mod file;
pub(crate) mod index;

pub use file::{DirEntries, FileInfo, FileMode, ZipFile};
pub use index::{SYNTHETIC_DIR_TIME, clean_path};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tempfile::TempPath;

use crate::error::{Error, Result};
use crate::io::{HttpRangeReader, LocalFileReader, ReadAt};
use crate::zip::{ZipExtractor, ZipFileEntry};

use index::{DirectoryIndex, Node, NodeId};

/// A filesystem backed by a ZIP archive.
pub struct FileSystem<R: ReadAt = LocalFileReader> {
    archive: Arc<Archive<R>>,
}

impl FileSystem<LocalFileReader> {
    /// Open the ZIP file at `path`.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let reader = LocalFileReader::new(path.as_ref())?;
        Self::new(Arc::new(reader)).await
    }
}

impl FileSystem<HttpRangeReader> {
    /// Open a remote ZIP file, fetching only the ranges that are needed.
    pub async fn open_url(url: impl Into<String>) -> Result<Self> {
        let reader = HttpRangeReader::new(url.into()).await?;
        Self::new(Arc::new(reader)).await
    }
}

impl<R: ReadAt> FileSystem<R> {
    /// Read the central directory from `reader` and index it.
    pub async fn new(reader: Arc<R>) -> Result<Self> {
        let extractor = ZipExtractor::new(reader);
        let entries = extractor.list_files().await?;
        let index = DirectoryIndex::build(entries);

        Ok(Self {
            archive: Arc::new(Archive {
                extractor: RwLock::new(Some(Arc::new(extractor))),
                index,
                temp_dir: RwLock::new(std::env::temp_dir()),
                temp_files: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Directory for extracted entries; the system temp dir by default.
    /// Applies to extractions started after the call, including those of
    /// servers built from this filesystem.
    pub fn set_temp_dir(&self, dir: impl Into<PathBuf>) {
        *self
            .archive
            .temp_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner) = dir.into();
    }

    /// Open a file or directory. Leading slashes, `.` and `..` are resolved
    /// before lookup.
    pub fn open(&self, name: &str) -> Result<ZipFile<R>> {
        self.archive.extractor()?;
        let name = clean_path(name);
        match self.archive.index.lookup(&name) {
            Some(node) => Ok(ZipFile::new(name, Arc::clone(&self.archive), node)),
            None => Err(Error::NotFound { path: name }),
        }
    }

    /// Every entry stored in the archive, parents before children.
    pub fn entries(&self) -> Vec<ZipFileEntry> {
        self.archive
            .index
            .nodes()
            .filter_map(|node| node.entry().cloned())
            .collect()
    }

    /// Release the archive source and delete extracted temp files.
    ///
    /// Later `open` calls fail with [`Error::FilesystemClosed`], and handles
    /// opened earlier fail with [`Error::FileClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let released = self
            .archive
            .extractor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_none() {
            return Ok(());
        }

        let temp_files = std::mem::take(
            &mut *self
                .archive
                .temp_files
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut result = Ok(());
        for path in temp_files {
            if let Err(err) = path.close() {
                log::warn!("removing temp file: {err}");
                result = Err(err.into());
            }
        }
        result
    }

    pub(crate) fn archive(&self) -> &Arc<Archive<R>> {
        &self.archive
    }
}

/// State shared by a filesystem, its handles and any server built from it.
pub(crate) struct Archive<R: ReadAt> {
    /// `None` once the filesystem has been closed.
    extractor: RwLock<Option<Arc<ZipExtractor<R>>>>,
    pub(crate) index: DirectoryIndex,
    temp_dir: RwLock<PathBuf>,
    temp_files: Mutex<Vec<TempPath>>,
}

impl<R: ReadAt> Archive<R> {
    pub(crate) fn extractor(&self) -> Result<Arc<ZipExtractor<R>>> {
        self.extractor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::FilesystemClosed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.extractor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.index.node(id)
    }

    /// Path of the node's extracted copy, extracting it on first use.
    ///
    /// Concurrent callers for the same node wait on one extraction and all
    /// observe the same path.
    pub(crate) async fn materialize(&self, id: NodeId) -> Result<PathBuf> {
        let node = self.node(id);
        let entry = node
            .entry()
            .ok_or_else(|| Error::invalid(format!("{}: no archive entry", node.path())))?;

        let path = node
            .materialized
            .get_or_try_init(|| async {
                let extractor = self.extractor()?;
                let temp = extractor.extract_to_temp(entry, &self.temp_dir()).await?;
                let path = temp.to_path_buf();
                self.temp_files
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(temp);
                Ok::<_, Error>(path)
            })
            .await?;
        Ok(path.clone())
    }
}
