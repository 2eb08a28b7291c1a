//! Directory tree built once from the archive's flat entry list.
//!
//! Every path component becomes a node, whether or not the archive stores a
//! record for it. Nodes live in one vector and refer to each other by index;
//! the tree never changes after [`DirectoryIndex::build`], apart from each
//! node's single-assignment temp-file slot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::OnceCell;

use crate::zip::ZipFileEntry;

pub(crate) type NodeId = usize;

pub(crate) const ROOT: NodeId = 0;

/// Modification time reported for directories with no archive record
/// (2001-01-01T00:00:00Z).
pub const SYNTHETIC_DIR_TIME: u64 = 978_307_200;

pub(crate) struct Node {
    /// Normalized path; directories end in `/`, the root is `/`.
    path: String,
    entry: Option<ZipFileEntry>,
    children: Vec<NodeId>,
    /// Where the entry has been extracted to, once something seeked into it.
    pub(crate) materialized: OnceCell<PathBuf>,
}

impl Node {
    fn new(path: String) -> Self {
        Self {
            path,
            entry: None,
            children: Vec::new(),
            materialized: OnceCell::new(),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Base name; `/` for the root.
    pub(crate) fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            return "/";
        }
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    pub(crate) fn entry(&self) -> Option<&ZipFileEntry> {
        self.entry.as_ref()
    }

    /// Nodes without an entry are directories inferred from nested paths.
    pub(crate) fn is_dir(&self) -> bool {
        self.entry.as_ref().is_none_or(|e| e.is_directory)
    }

    pub(crate) fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub(crate) fn size(&self) -> u64 {
        match &self.entry {
            Some(entry) if !entry.is_directory => entry.uncompressed_size,
            _ => 0,
        }
    }

    pub(crate) fn modified(&self) -> SystemTime {
        match &self.entry {
            Some(entry) => entry.modified(),
            None => SystemTime::UNIX_EPOCH + Duration::from_secs(SYNTHETIC_DIR_TIME),
        }
    }
}

pub(crate) struct DirectoryIndex {
    nodes: Vec<Node>,
    /// Cleaned path without leading or trailing slash; the root is `""`.
    by_path: HashMap<String, NodeId>,
}

impl DirectoryIndex {
    pub(crate) fn build(entries: Vec<ZipFileEntry>) -> Self {
        let mut index = Self {
            nodes: vec![Node::new("/".to_string())],
            by_path: HashMap::from([(String::new(), ROOT)]),
        };

        for entry in entries {
            // Rooted, so `..` never climbs out of the archive.
            let key = rooted_key(&entry.file_name);
            if key.is_empty() {
                log::debug!("skipping entry {:?}: empty path", entry.file_name);
                continue;
            }
            let id = index.find_or_create(&key, entry.is_directory);
            if index.nodes[id].entry.is_some() {
                log::debug!("duplicate entry {:?}, keeping the last", entry.file_name);
            }
            if entry.is_directory && !index.nodes[id].path.ends_with('/') {
                index.nodes[id].path.push('/');
            }
            index.nodes[id].entry = Some(entry);
        }

        for id in 0..index.nodes.len() {
            let mut children = std::mem::take(&mut index.nodes[id].children);
            children.sort_by(|&a, &b| index.nodes[a].name().cmp(index.nodes[b].name()));
            index.nodes[id].children = children;
        }

        log::debug!("directory index: {} nodes", index.nodes.len());
        index
    }

    /// Find the node for `key`, creating it and any missing ancestors.
    fn find_or_create(&mut self, key: &str, is_dir: bool) -> NodeId {
        if let Some(&id) = self.by_path.get(key) {
            return id;
        }

        let parent = match key.rfind('/') {
            Some(slash) => self.find_or_create(&key[..slash], true),
            None => ROOT,
        };
        let path = if is_dir {
            format!("{key}/")
        } else {
            key.to_string()
        };

        let id = self.nodes.len();
        self.nodes.push(Node::new(path));
        self.nodes[parent].children.push(id);
        self.by_path.insert(key.to_string(), id);
        id
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(&rooted_key(path)).copied()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Child of directory `id` with the given base name.
    pub(crate) fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .binary_search_by(|&c| self.nodes[c].name().cmp(name))
            .ok()
            .map(|pos| self.nodes[id].children[pos])
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
}

/// Map key for `path`: cleaned as if rooted, without the leading slash.
fn rooted_key(path: &str) -> String {
    clean_path(&format!("/{path}")).trim_start_matches('/').to_string()
}

/// Lexically clean a slash-separated path.
///
/// Collapses repeated slashes, drops `.` elements and resolves `..` against
/// the preceding element (never climbing above the root). A leading slash is
/// kept if present; the result has no trailing slash except for `/` itself.
/// An empty path cleans to `.`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
