use std::collections::VecDeque;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use crate::io::ReadAt;
use crate::zip::{EntryReader, ZipFileEntry};

use super::Archive;
use super::index::{Node, NodeId};

/// Permission and type bits of a [`FileInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory bit (`S_IFDIR`).
    pub const DIR: u32 = 0o040_000;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_dir(self) -> bool {
        self.0 & Self::DIR != 0
    }

    /// The `rwxrwxrwx` part.
    pub fn permissions(self) -> u32 {
        self.0 & 0o777
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_dir() { "d" } else { "-" })?;
        for shift in [6, 3, 0] {
            let bits = (self.0 >> shift) & 0o7;
            let r = if bits & 0o4 != 0 { 'r' } else { '-' };
            let w = if bits & 0o2 != 0 { 'w' } else { '-' };
            let x = if bits & 0o1 != 0 { 'x' } else { '-' };
            write!(f, "{r}{w}{x}")?;
        }
        Ok(())
    }
}

/// Metadata of a file or directory in the archive.
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    size: u64,
    mode: FileMode,
    modified: SystemTime,
    entry: Option<ZipFileEntry>,
}

impl FileInfo {
    fn from_node(node: &Node) -> Self {
        let mode = if node.is_dir() {
            FileMode(FileMode::DIR | 0o555)
        } else {
            FileMode(0o444)
        };
        Self {
            name: node.name().to_string(),
            size: node.size(),
            mode,
            modified: node.modified(),
            entry: node.entry().cloned(),
        }
    }

    /// Base name; `/` for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size; 0 for directories.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// The archive record, absent for directories inferred from nested paths.
    pub fn entry(&self) -> Option<&ZipFileEntry> {
        self.entry.as_ref()
    }
}

/// One batch from [`ZipFile::read_dir`].
#[derive(Debug, Clone)]
pub struct DirEntries {
    pub entries: Vec<FileInfo>,
    /// No children remain after this batch.
    pub end: bool,
}

enum State<R: ReadAt> {
    Unopened,
    Streaming(EntryReader<R>),
    FileBacked(tokio::fs::File),
}

/// An open file or directory.
///
/// Reads stream from the archive until the first seek; from then on the
/// handle reads a temp file holding the extracted entry.
pub struct ZipFile<R: ReadAt> {
    name: String,
    archive: Arc<Archive<R>>,
    node: NodeId,
    state: State<R>,
    closed: bool,
    pending: Option<VecDeque<NodeId>>,
}

impl<R: ReadAt> ZipFile<R> {
    pub(crate) fn new(name: String, archive: Arc<Archive<R>>, node: NodeId) -> Self {
        Self {
            name,
            archive,
            node,
            state: State::Unopened,
            closed: false,
            pending: None,
        }
    }

    /// The name this handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stat(&self) -> FileInfo {
        FileInfo::from_node(self.archive.node(self.node))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check("read")?;
        self.check_file("read")?;

        if let State::Unopened = self.state {
            let extractor = self.archive.extractor()?;
            let entry = self.entry("read")?;
            self.state = State::Streaming(extractor.open(entry).await?);
        }

        match &mut self.state {
            State::Streaming(reader) => reader.read(buf).await,
            State::FileBacked(file) => Ok(file.read(buf).await?),
            State::Unopened => Ok(0),
        }
    }

    /// Read everything from the current position to the end.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Seek within the entry, extracting it to a temp file first if needed.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check("seek")?;
        self.check_file("seek")?;

        if let State::FileBacked(file) = &mut self.state {
            return Ok(file.seek(pos).await?);
        }

        // The stream cannot seek; it is replaced once the temp file is
        // positioned, and stays usable if that fails.
        let pos = match (&self.state, pos) {
            (State::Streaming(reader), SeekFrom::Current(delta)) => {
                let target = reader.position() as i64 + delta;
                let target = u64::try_from(target).map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "invalid seek to a negative position",
                    )
                })?;
                SeekFrom::Start(target)
            }
            (_, pos) => pos,
        };

        let path = self.archive.materialize(self.node).await?;
        let mut file = tokio::fs::File::open(&path).await?;
        let offset = file.seek(pos).await?;
        self.state = State::FileBacked(file);
        Ok(offset)
    }

    /// List directory children in name order.
    ///
    /// `count == 0` returns every child at once. Otherwise up to `count`
    /// children are returned per call; the batch that exhausts the listing
    /// with fewer than `count` children (possibly none) has `end` set.
    pub fn read_dir(&mut self, count: usize) -> Result<DirEntries> {
        self.check("readdir")?;
        let node = self.archive.node(self.node);
        if !node.is_dir() {
            return Err(Error::NotADirectory {
                op: "readdir",
                path: self.name.clone(),
            });
        }

        if count == 0 {
            return Ok(DirEntries {
                entries: self.infos(node.children().iter().copied()),
                end: true,
            });
        }

        let pending = self
            .pending
            .get_or_insert_with(|| node.children().iter().copied().collect());
        let take = count.min(pending.len());
        let batch: Vec<NodeId> = pending.drain(..take).collect();
        Ok(DirEntries {
            entries: self.infos(batch),
            end: take < count,
        })
    }

    /// Release the stream or temp-file descriptor. The shared temp file
    /// itself stays for later handles.
    pub fn close(&mut self) -> Result<()> {
        self.state = State::Unopened;
        self.pending = None;
        self.closed = true;
        Ok(())
    }

    fn infos(&self, ids: impl IntoIterator<Item = NodeId>) -> Vec<FileInfo> {
        ids.into_iter()
            .map(|id| FileInfo::from_node(self.archive.node(id)))
            .collect()
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.closed || self.archive.is_closed() {
            return Err(Error::FileClosed {
                op,
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_file(&self, op: &'static str) -> Result<()> {
        if self.archive.node(self.node).is_dir() {
            return Err(Error::IsADirectory {
                op,
                path: self.name.clone(),
            });
        }
        Ok(())
    }

    fn entry(&self, op: &'static str) -> Result<&ZipFileEntry> {
        self.archive
            .node(self.node)
            .entry()
            .ok_or_else(|| Error::IsADirectory {
                op,
                path: self.name.clone(),
            })
    }
}
