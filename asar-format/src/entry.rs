use std::fmt;
use std::io::Read;

use crate::integrity::Integrity;
use crate::path::{self, PATH_SEP};
use crate::source::{Section, Source};

/// Upper bound on the buffer reserved up front by [`Entry::read_to_vec`], so
/// a hostile `size` cannot force a huge allocation before any byte is read.
const READ_HINT: u64 = 1 << 20;

bitflags::bitflags! {
    /// Kind and attribute bits of an entry.
    #[derive(Default)]
    pub struct Flags: u32 {
        /// The entry is a directory.
        const DIR = 1 << 0;
        /// The file has its executable bit set.
        const EXECUTABLE = 1 << 1;
        /// The entry's contents are not stored in the archive.
        const UNPACKED = 1 << 2;
    }
}

/// Index of an entry within its [`Tree`].
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub const ROOT: EntryId = EntryId(0);

    #[inline(always)]
    pub fn get(self) -> usize {
        self.0
    }
}

/// Where a packed file's bytes live: an absolute range start within a
/// borrowed source. The range length is the entry size.
#[derive(Clone, Copy)]
pub(crate) struct Content<'a> {
    pub(crate) source: Source<'a>,
    pub(crate) start: u64,
}

impl fmt::Debug for Content<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub(crate) struct Node<'a> {
    pub(crate) name: String,
    pub(crate) flags: Flags,
    pub(crate) size: u64,
    pub(crate) offset: Option<u64>,
    pub(crate) link: Option<String>,
    pub(crate) integrity: Option<Integrity>,
    pub(crate) parent: Option<EntryId>,
    pub(crate) children: Vec<EntryId>,
    pub(crate) content: Option<Content<'a>>,
}

impl<'a> Node<'a> {
    pub(crate) fn directory(name: String, flags: Flags, parent: Option<EntryId>) -> Node<'a> {
        Node {
            name,
            flags: flags | Flags::DIR,
            size: 0,
            offset: None,
            link: None,
            integrity: None,
            parent,
            children: vec![],
            content: None,
        }
    }

    pub(crate) fn file(name: String, flags: Flags, parent: EntryId) -> Node<'a> {
        Node {
            name,
            flags: flags - Flags::DIR,
            size: 0,
            offset: None,
            link: None,
            integrity: None,
            parent: Some(parent),
            children: vec![],
            content: None,
        }
    }

    #[inline(always)]
    pub(crate) fn is_dir(&self) -> bool {
        self.flags.contains(Flags::DIR)
    }

    /// Whether the node's bytes live in the content region.
    #[inline(always)]
    pub(crate) fn is_packed(&self) -> bool {
        !self.flags.intersects(Flags::DIR | Flags::UNPACKED) && self.link.is_none()
    }
}

/// An archive's entries, stored as an arena indexed by [`EntryId`].
///
/// The root directory is always at [`EntryId::ROOT`]. Packed files borrow
/// their content source for `'a`, so the source outlives every entry bound
/// to it.
pub struct Tree<'a> {
    pub(crate) nodes: Vec<Node<'a>>,
}

impl Default for Tree<'_> {
    fn default() -> Self {
        Tree::new()
    }
}

impl fmt::Debug for Tree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes.iter()).finish()
    }
}

impl<'a> Tree<'a> {
    pub fn new() -> Tree<'a> {
        Tree {
            nodes: vec![Node::directory(String::new(), Flags::DIR, None)],
        }
    }

    #[inline(always)]
    pub fn root(&self) -> Entry<'_, 'a> {
        Entry {
            tree: self,
            id: EntryId::ROOT,
        }
    }

    pub fn entry(&self, id: EntryId) -> Option<Entry<'_, 'a>> {
        if id.0 < self.nodes.len() {
            Some(Entry { tree: self, id })
        } else {
            None
        }
    }

    /// Number of entries, including the root.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    #[inline(always)]
    pub(crate) fn node(&self, id: EntryId) -> &Node<'a> {
        &self.nodes[id.0]
    }

    #[inline(always)]
    pub(crate) fn node_mut(&mut self, id: EntryId) -> &mut Node<'a> {
        &mut self.nodes[id.0]
    }

    pub(crate) fn push(&mut self, parent: EntryId, node: Node<'a>) -> EntryId {
        let id = EntryId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }
}

/// What a [`Entry::walk`] visitor wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    /// Do not descend into the visited entry.
    SkipDir,
}

/// A borrowed handle to one entry of a [`Tree`].
#[derive(Clone, Copy)]
pub struct Entry<'t, 'a> {
    tree: &'t Tree<'a>,
    id: EntryId,
}

impl fmt::Debug for Entry<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path())
            .field("flags", &self.flags())
            .field("size", &self.size())
            .field("offset", &self.offset())
            .finish()
    }
}

impl<'t, 'a> Entry<'t, 'a> {
    #[inline(always)]
    fn node(&self) -> &'t Node<'a> {
        self.tree.node(self.id)
    }

    #[inline(always)]
    pub fn id(&self) -> EntryId {
        self.id
    }

    #[inline(always)]
    pub fn tree(&self) -> &'t Tree<'a> {
        self.tree
    }

    /// The entry's name. Empty for the root.
    #[inline(always)]
    pub fn name(&self) -> &'t str {
        &self.node().name
    }

    #[inline(always)]
    pub fn flags(&self) -> Flags {
        self.node().flags
    }

    #[inline(always)]
    pub fn is_dir(&self) -> bool {
        self.node().is_dir()
    }

    #[inline(always)]
    pub fn is_link(&self) -> bool {
        self.node().link.is_some()
    }

    #[inline(always)]
    pub fn is_file(&self) -> bool {
        !self.is_dir() && !self.is_link()
    }

    #[inline(always)]
    pub fn is_executable(&self) -> bool {
        self.flags().contains(Flags::EXECUTABLE)
    }

    #[inline(always)]
    pub fn is_unpacked(&self) -> bool {
        self.flags().contains(Flags::UNPACKED)
    }

    /// Content length in bytes. Always zero for directories.
    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.node().size
    }

    /// Position within the content region, once assigned by encoding or
    /// read by decoding. Only packed files have one.
    #[inline(always)]
    pub fn offset(&self) -> Option<u64> {
        self.node().offset
    }

    #[inline(always)]
    pub fn link(&self) -> Option<&'t str> {
        self.node().link.as_deref()
    }

    #[inline(always)]
    pub fn integrity(&self) -> Option<&'t Integrity> {
        self.node().integrity.as_ref()
    }

    pub fn parent(&self) -> Option<Entry<'t, 'a>> {
        self.node().parent.map(|id| Entry {
            tree: self.tree,
            id,
        })
    }

    pub fn children(&self) -> impl ExactSizeIterator<Item = Entry<'t, 'a>> + 't {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| Entry { tree, id })
    }

    /// The absolute path of the entry, e.g. `/sub2/file2.jpg`. The root is `/`.
    pub fn path(&self) -> String {
        let mut parts = vec![];
        let mut cur = *self;
        while let Some(parent) = cur.parent() {
            parts.push(cur.name());
            cur = parent;
        }

        if parts.is_empty() {
            return PATH_SEP.to_string();
        }

        parts.reverse();
        let mut out = String::new();
        for part in parts {
            out.push_str(PATH_SEP);
            out.push_str(part);
        }
        out
    }

    /// Resolves a descendant by matching one name per level.
    ///
    /// ```
    /// # use asar_format::Builder;
    /// let mut builder = Builder::new();
    /// builder
    ///     .add_directory("sub2", Default::default())
    ///     .add_bytes("file2.jpg", b"", Default::default());
    /// let tree = builder.finish();
    /// assert!(tree.root().find(["sub2", "file2.jpg"]).is_some());
    /// ```
    pub fn find<I, S>(&self, path: I) -> Option<Entry<'t, 'a>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cur = *self;
        for name in path {
            let name = name.as_ref();
            cur = cur.children().find(|c| c.name() == name)?;
        }
        Some(cur)
    }

    /// Like [`find`](Self::find), splitting `path` on `/`.
    #[inline(always)]
    pub fn find_path(&self, path: &str) -> Option<Entry<'t, 'a>> {
        self.find(path::segments(path))
    }

    /// Visits every descendant depth-first, parents before children, in
    /// insertion order. The visitor receives each entry's path relative to
    /// `self` and may return [`Walk::SkipDir`] to not descend into it. The
    /// first visitor error stops the walk and is returned.
    pub fn walk<E, F>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&str, Entry<'t, 'a>) -> Result<Walk, E>,
    {
        self.walk_inner("", &mut visitor)
    }

    fn walk_inner<E, F>(&self, parent_path: &str, visitor: &mut F) -> Result<(), E>
    where
        F: FnMut(&str, Entry<'t, 'a>) -> Result<Walk, E>,
    {
        for child in self.children() {
            let child_path = format!("{}{}", parent_path, child.name());
            if visitor(&child_path, child)? == Walk::SkipDir {
                continue;
            }
            if child.is_dir() {
                child.walk_inner(&format!("{}{}", child_path, PATH_SEP), visitor)?;
            }
        }
        Ok(())
    }

    /// A bounded reader over the entry's contents, or `None` for directories,
    /// links, unpacked files and files not bound to a source.
    pub fn open(&self) -> Option<Section<'a>> {
        let node = self.node();
        if !node.is_packed() {
            return None;
        }
        node.content
            .map(|content| Section::new(content.source, content.start, node.size))
    }

    /// Reads the whole content of a packed file. A source holding fewer than
    /// `size` bytes is an `UnexpectedEof` error.
    pub fn read_to_vec(&self) -> Option<std::io::Result<Vec<u8>>> {
        let mut section = self.open()?;
        let size = self.size();
        let hint = usize::try_from(size.min(READ_HINT)).unwrap_or(0);
        let mut buf = Vec::with_capacity(hint);
        Some(section.read_to_end(&mut buf).and_then(|n| {
            if n as u64 == size {
                Ok(buf)
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{}: expected {} bytes, read {}", self.path(), size, n),
                ))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    fn sample() -> Tree<'static> {
        let mut builder = Builder::new();
        builder
            .add_bytes("a", b"a", Flags::empty())
            .add_directory("b", Flags::empty())
            .add_bytes("c", b"cc", Flags::empty())
            .add_bytes("d", b"ddd", Flags::EXECUTABLE);
        builder
            .to_parent()
            .unwrap()
            .add_bytes("e", b"", Flags::empty());
        builder.finish()
    }

    fn collect(tree: &Tree<'_>, skip: Option<&str>) -> Vec<String> {
        let mut seen = vec![];
        tree.root()
            .walk::<(), _>(|path, _| {
                seen.push(path.to_string());
                if Some(path) == skip {
                    Ok(Walk::SkipDir)
                } else {
                    Ok(Walk::Continue)
                }
            })
            .unwrap();
        seen
    }

    #[test]
    fn walk_order() {
        let tree = sample();
        assert_eq!(collect(&tree, None), ["a", "b", "b/c", "b/d", "e"]);
        // Restartable
        assert_eq!(collect(&tree, None), ["a", "b", "b/c", "b/d", "e"]);
    }

    #[test]
    fn walk_skip() {
        let tree = sample();
        assert_eq!(collect(&tree, Some("b")), ["a", "b", "e"]);
    }

    #[test]
    fn walk_error_aborts() {
        let tree = sample();
        let mut seen = 0;
        let result = tree.root().walk(|path, _| {
            seen += 1;
            if path == "b/c" {
                Err("boom")
            } else {
                Ok(Walk::Continue)
            }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(seen, 3);
    }

    #[test]
    fn walk_relative_to_subtree() {
        let tree = sample();
        let b = tree.root().find(["b"]).unwrap();
        let mut seen = vec![];
        b.walk::<(), _>(|path, _| {
            seen.push(path.to_string());
            Ok(Walk::Continue)
        })
        .unwrap();
        assert_eq!(seen, ["c", "d"]);
    }

    #[test]
    fn paths() {
        let tree = sample();
        assert_eq!(tree.root().path(), "/");
        assert_eq!(tree.root().find(["a"]).unwrap().path(), "/a");
        assert_eq!(tree.root().find(["b", "d"]).unwrap().path(), "/b/d");
    }

    #[test]
    fn find() {
        let tree = sample();
        let root = tree.root();
        assert!(root.find(["b", "x"]).is_none());
        assert!(root.find(["a", "c"]).is_none());
        assert_eq!(root.find::<_, &str>([]).unwrap().id(), EntryId::ROOT);
        assert_eq!(root.find_path("/b//d").unwrap().size(), 3);
        assert!(root.find_path("b/d").unwrap().is_executable());
    }

    #[test]
    fn open_reads_bound_content() {
        let tree = sample();
        let root = tree.root();
        assert!(root.open().is_none());
        assert!(root.find(["b"]).unwrap().open().is_none());
        assert_eq!(
            root.find(["b", "d"]).unwrap().read_to_vec().unwrap().unwrap(),
            b"ddd"
        );
    }

    #[test]
    fn short_source_is_an_error() {
        let data: &[u8] = b"abc";
        let mut builder = Builder::new();
        builder.add_file("short", data, 10, Flags::empty(), None, None);
        let tree = builder.finish();
        let err = tree
            .root()
            .find(["short"])
            .unwrap()
            .read_to_vec()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn offsets_unassigned_before_encode() {
        let tree = sample();
        assert_eq!(tree.root().find(["a"]).unwrap().offset(), None);
    }
}
