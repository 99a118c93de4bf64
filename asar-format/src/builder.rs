use crate::entry::{Content, EntryId, Flags, Node, Tree};
use crate::error::{Error, Result};
use crate::integrity::Integrity;
use crate::source::Source;

/// Assembles a [`Tree`] one entry at a time.
///
/// The builder keeps a cursor on the active directory. Files are added to
/// the active directory; [`add_directory`](Builder::add_directory) adds a
/// directory and makes it active.
#[derive(Debug, Default)]
pub struct Builder<'a> {
    tree: Tree<'a>,
    current: EntryId,
}

impl<'a> Builder<'a> {
    pub fn new() -> Builder<'a> {
        Builder::default()
    }

    #[inline(always)]
    pub fn root(&self) -> EntryId {
        EntryId::ROOT
    }

    /// The active directory.
    #[inline(always)]
    pub fn current(&self) -> EntryId {
        self.current
    }

    #[inline(always)]
    pub fn tree(&self) -> &Tree<'a> {
        &self.tree
    }

    pub fn finish(self) -> Tree<'a> {
        self.tree
    }

    /// Adds a directory under the active directory and makes it active.
    pub fn add_directory(&mut self, name: &str, flags: Flags) -> &mut Self {
        let node = Node::directory(name.to_string(), flags, Some(self.current));
        self.current = self.tree.push(self.current, node);
        self
    }

    /// Adds a file whose `size` bytes are read from the start of `content`.
    ///
    /// A `link` makes the entry a symbolic link to that target, with no
    /// content of its own. `integrity` is written to the header as given.
    pub fn add_file<S: Into<Source<'a>>>(
        &mut self,
        name: &str,
        content: S,
        size: u64,
        flags: Flags,
        link: Option<&str>,
        integrity: Option<Integrity>,
    ) -> &mut Self {
        let mut node = Node::file(name.to_string(), flags, self.current);
        node.size = size;
        node.integrity = integrity;
        match link.filter(|x| !x.is_empty()) {
            Some(target) => node.link = Some(target.to_string()),
            None => {
                if !node.flags.contains(Flags::UNPACKED) {
                    node.content = Some(Content {
                        source: content.into(),
                        start: 0,
                    });
                }
            }
        }
        self.tree.push(self.current, node);
        self
    }

    /// Adds a file with the given bytes as its contents.
    pub fn add_bytes(&mut self, name: &str, content: &'a [u8], flags: Flags) -> &mut Self {
        self.add_file(name, content, content.len() as u64, flags, None, None)
    }

    /// Adds a symbolic link to `target`, a path relative to the archive root.
    pub fn add_link(&mut self, name: &str, target: &str) -> &mut Self {
        let mut node = Node::file(name.to_string(), Flags::empty(), self.current);
        node.link = Some(target.to_string());
        self.tree.push(self.current, node);
        self
    }

    /// Makes the parent of the active directory active.
    ///
    /// Fails with [`Error::RootHasNoParent`] when the root is active.
    pub fn to_parent(&mut self) -> Result<&mut Self> {
        match self.tree.node(self.current).parent {
            Some(parent) => {
                self.current = parent;
                Ok(self)
            }
            None => Err(Error::RootHasNoParent),
        }
    }

    /// Makes a previously added directory active.
    pub fn set_cursor(&mut self, id: EntryId) -> Result<&mut Self> {
        let entry = self.tree.entry(id).ok_or(Error::UnknownEntry)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory(entry.path()));
        }
        self.current = id;
        Ok(self)
    }
}
