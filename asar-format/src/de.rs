use std::collections::HashSet;
use std::fmt;
use std::io::{BufReader, Read};

use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, Unexpected, Visitor};
use serde::Deserialize;

use crate::entry::{Content, EntryId, Flags, Node, Tree};
use crate::error::{Error, Phase};
use crate::header::{FrameHeader, FRAME_SIZE};
use crate::integrity::Integrity;
use crate::path::is_valid_name;
use crate::source::{Section, Source};

/// Directories nested deeper than this are rejected. Kept below serde_json's
/// own recursion limit of 128 objects, which counts two per directory.
const MAX_DEPTH: usize = 60;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// An unsigned integer, given either as a JSON number or as a string of
/// decimal digits with no sign and no leading zeros.
struct Integer(u64);

impl<'de> Deserialize<'de> for Integer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IntegerVisitor;

        impl<'de> Visitor<'de> for IntegerVisitor {
            type Value = Integer;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an unsigned integer or a string of decimal digits")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Integer, E> {
                Ok(Integer(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Integer, E> {
                let canonical = !v.is_empty()
                    && v.bytes().all(|b| b.is_ascii_digit())
                    && (v == "0" || !v.starts_with('0'));
                if !canonical {
                    return Err(E::invalid_value(Unexpected::Str(v), &self));
                }
                v.parse()
                    .map(Integer)
                    .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(IntegerVisitor)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IntegrityRecord {
    algorithm: String,
    hash: String,
    #[serde(rename = "blockSize")]
    block_size: Integer,
    blocks: Vec<String>,
}

impl From<IntegrityRecord> for Integrity {
    fn from(record: IntegrityRecord) -> Self {
        Integrity {
            algorithm: record.algorithm,
            hash: record.hash,
            block_size: record.block_size.0,
            blocks: record.blocks,
        }
    }
}

/// The fields collected from one entry object.
#[derive(Default)]
struct Fields {
    files: bool,
    size: Option<u64>,
    offset: Option<u64>,
    unpacked: Option<bool>,
    executable: Option<bool>,
    link: Option<String>,
    integrity: Option<Integrity>,
}

fn duplicate_key(key: &str, path: &str) -> Error {
    Error::header(format!("duplicate key `{}` in `{}`", key, path))
}

fn set_once<T>(slot: &mut Option<T>, value: T, key: &str, path: &str) -> Result<(), Error> {
    if slot.is_some() {
        return Err(duplicate_key(key, path));
    }
    *slot = Some(value);
    Ok(())
}

/// Builds a [`Tree`] while the header streams through serde_json, binding
/// packed files to the archive source.
struct TreeDecoder<'a> {
    tree: Tree<'a>,
    source: Source<'a>,
    base: u64,
    /// The first crate error raised inside a visitor. serde only carries a
    /// message through, so the typed error waits here.
    failure: Option<Error>,
}

impl<'a> TreeDecoder<'a> {
    fn fail<E: de::Error>(&mut self, err: Error) -> E {
        let e = E::custom(&err);
        self.failure = Some(err);
        e
    }

    fn path(&self, id: EntryId) -> String {
        self.tree.entry(id).map(|e| e.path()).unwrap_or_default()
    }

    fn finish_entry(&mut self, id: EntryId, path: &str, fields: Fields) -> Result<(), Error> {
        let Fields {
            files,
            size,
            offset,
            unpacked,
            executable,
            link,
            integrity,
        } = fields;
        let unpacked = unpacked.unwrap_or(false);

        if files {
            if size.is_some()
                || offset.is_some()
                || executable.is_some()
                || link.is_some()
                || integrity.is_some()
            {
                return Err(Error::header(format!(
                    "directory `{}` carries file fields",
                    path
                )));
            }
            if unpacked {
                self.tree.node_mut(id).flags |= Flags::UNPACKED;
            }
            tracing::trace!(%path, "decoded directory");
            return Ok(());
        }

        if let Some(target) = link {
            if size.is_some()
                || offset.is_some()
                || executable.is_some()
                || integrity.is_some()
                || unpacked
            {
                return Err(Error::header(format!(
                    "link `{}` carries file fields",
                    path
                )));
            }
            tracing::trace!(%path, %target, "decoded link");
            self.tree.node_mut(id).link = Some(target);
            return Ok(());
        }

        let size = size.ok_or_else(|| Error::header(format!("file `{}` has no size", path)))?;
        let mut flags = Flags::empty();
        if executable.unwrap_or(false) {
            flags |= Flags::EXECUTABLE;
        }

        let content = if unpacked {
            flags |= Flags::UNPACKED;
            None
        } else {
            let offset =
                offset.ok_or_else(|| Error::header(format!("file `{}` has no offset", path)))?;
            let start = self
                .base
                .checked_add(offset)
                .filter(|start| start.checked_add(size).is_some())
                .ok_or_else(|| {
                    Error::header(format!("file `{}` lies outside the addressable range", path))
                })?;
            Some((offset, start))
        };

        tracing::trace!(%path, size, offset = ?content.map(|c| c.0), "decoded file");

        let node = self.tree.node_mut(id);
        node.flags = flags;
        node.size = size;
        node.integrity = integrity;
        if let Some((offset, start)) = content {
            node.offset = Some(offset);
            node.content = Some(Content {
                source: self.source,
                start,
            });
        }
        Ok(())
    }
}

/// The top-level object, holding exactly one key, `files`.
struct RootSeed<'d, 'a>(&'d mut TreeDecoder<'a>);

impl<'de> DeserializeSeed<'de> for RootSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RootSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object with a single `files` key")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match map.next_key::<String>()? {
            Some(key) if key == "files" => {}
            Some(key) => {
                return Err(de::Error::custom(format_args!(
                    "expected key `files`, found {:?}",
                    key
                )))
            }
            None => return Err(de::Error::missing_field("files")),
        }
        map.next_value_seed(FilesSeed {
            decoder: &mut *self.0,
            parent: EntryId::ROOT,
            depth: 0,
        })?;
        match map.next_key::<String>()? {
            None => Ok(()),
            Some(key) => Err(de::Error::custom(format_args!(
                "unexpected key {:?} after `files`",
                key
            ))),
        }
    }
}

/// A `files` object: the children of `parent`, by name.
struct FilesSeed<'d, 'a> {
    decoder: &'d mut TreeDecoder<'a>,
    parent: EntryId,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for FilesSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        if self.depth >= MAX_DEPTH {
            return Err(self
                .decoder
                .fail(Error::header("directories nested too deeply")));
        }
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for FilesSeed<'_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an object of entries keyed by name")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let FilesSeed {
            decoder,
            parent,
            depth,
        } = self;

        let mut names = HashSet::new();
        while let Some(name) = map.next_key::<String>()? {
            if !is_valid_name(&name) {
                return Err(decoder.fail(Error::InvalidName(name)));
            }
            if !names.insert(name.clone()) {
                return Err(decoder.fail(Error::DuplicateName(name)));
            }
            map.next_value_seed(EntrySeed {
                decoder: &mut *decoder,
                parent,
                name,
                depth,
            })?;
        }
        Ok(())
    }
}

/// One entry object. The node is pushed before its keys are read so that
/// children of a directory follow it in the arena.
struct EntrySeed<'d, 'a> {
    decoder: &'d mut TreeDecoder<'a>,
    parent: EntryId,
    name: String,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for EntrySeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for EntrySeed<'_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a directory, file or link entry")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let EntrySeed {
            decoder,
            parent,
            name,
            depth,
        } = self;

        let id = decoder
            .tree
            .push(parent, Node::file(name, Flags::empty(), parent));
        let path = decoder.path(id);
        let mut fields = Fields::default();

        while let Some(key) = map.next_key::<String>()? {
            let stored = match key.as_str() {
                "files" if fields.files => Err(duplicate_key(&key, &path)),
                "files" => {
                    fields.files = true;
                    decoder.tree.node_mut(id).flags |= Flags::DIR;
                    map.next_value_seed(FilesSeed {
                        decoder: &mut *decoder,
                        parent: id,
                        depth: depth + 1,
                    })?;
                    Ok(())
                }
                "size" => set_once(&mut fields.size, map.next_value::<Integer>()?.0, &key, &path),
                "offset" => {
                    set_once(&mut fields.offset, map.next_value::<Integer>()?.0, &key, &path)
                }
                "unpacked" => set_once(&mut fields.unpacked, map.next_value()?, &key, &path),
                "executable" => set_once(&mut fields.executable, map.next_value()?, &key, &path),
                "link" => set_once(&mut fields.link, map.next_value()?, &key, &path),
                "integrity" => {
                    let record: IntegrityRecord = map.next_value()?;
                    set_once(&mut fields.integrity, record.into(), &key, &path)
                }
                _ => Err(Error::header(format!("unknown key {:?} in `{}`", key, path))),
            };
            stored.map_err(|err| decoder.fail::<A::Error>(err))?;
        }

        decoder
            .finish_entry(id, &path, fields)
            .map_err(|err| decoder.fail(err))
    }
}

fn header_error(err: serde_json::Error) -> Error {
    if err.is_io() {
        Error::Io {
            phase: Phase::ReadHeader,
            source: err.into(),
        }
    } else {
        Error::header(err.to_string())
    }
}

/// Parses header text into a tree whose packed files are bound to `source`
/// at `base` plus their offset.
pub(crate) fn decode_header<'a, R: Read>(
    reader: R,
    source: Source<'a>,
    base: u64,
) -> Result<Tree<'a>, Error> {
    let mut decoder = TreeDecoder {
        tree: Tree::new(),
        source,
        base,
        failure: None,
    };
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let parsed = RootSeed(&mut decoder)
        .deserialize(&mut deserializer)
        .and_then(|()| deserializer.end());

    match parsed {
        Ok(()) => Ok(decoder.tree),
        Err(err) => Err(decoder.failure.take().unwrap_or_else(|| header_error(err))),
    }
}

/// Reads an archive's header from `source` and returns its tree.
///
/// Packed files in the returned tree read their contents from `source`,
/// which must therefore outlive the tree. Any malformed input fails the
/// whole decode; no partial tree is ever returned.
pub fn decode<'a, S: Into<Source<'a>>>(source: S) -> Result<Tree<'a>, Error> {
    let source = source.into();
    let frame = FrameHeader::read_from(&source)?;
    let header = Section::new(source, FRAME_SIZE, frame.header_len as u64);
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, header);

    let tree = decode_header(reader, source, frame.content_offset())?;

    tracing::debug!(
        entries = tree.len() - 1,
        content_offset = frame.content_offset(),
        "decoded archive"
    );

    Ok(tree)
}
