use std::collections::HashSet;
use std::io::Write;

use serde_json::{json, Value};

use crate::entry::{EntryId, Flags, Node, Tree};
use crate::error::{Error, Phase, Result};
use crate::header::{FrameHeader, FRAME_SIZE};
use crate::integrity::Integrity;
use crate::path::validate_name;
use crate::source::Section;

/// Builds the header text and records which content ranges follow it.
struct HeaderEncoder<'t, 'a> {
    tree: &'t Tree<'a>,
    header: Vec<u8>,
    next_offset: u64,
    contents: Vec<(EntryId, Section<'a>)>,
    offsets: Vec<(EntryId, u64)>,
}

impl<'t, 'a> HeaderEncoder<'t, 'a> {
    fn new(tree: &'t Tree<'a>) -> Self {
        HeaderEncoder {
            tree,
            header: Vec::with_capacity(4096),
            next_offset: 0,
            contents: vec![],
            offsets: vec![],
        }
    }

    #[inline(always)]
    fn write_raw(&mut self, s: &str) {
        self.header.extend_from_slice(s.as_bytes());
    }

    #[inline(always)]
    fn write_value(&mut self, value: Value) {
        self.header.extend_from_slice(value.to_string().as_bytes());
    }

    fn write_key(&mut self, key: &str) {
        self.write_value(Value::from(key));
        self.header.push(b':');
    }

    fn encode(&mut self, id: EntryId) -> Result<()> {
        let node = self.tree.node(id);
        self.header.push(b'{');
        if node.is_dir() {
            self.encode_dir(node)?;
        } else if let Some(target) = &node.link {
            self.write_key("link");
            self.write_value(Value::from(target.as_str()));
        } else {
            self.encode_file(id, node)?;
        }
        self.header.push(b'}');
        Ok(())
    }

    fn encode_dir(&mut self, node: &'t Node<'a>) -> Result<()> {
        if node.flags.contains(Flags::UNPACKED) {
            self.write_key("unpacked");
            self.write_raw("true,");
        }
        self.write_key("files");
        self.header.push(b'{');

        let mut seen = HashSet::with_capacity(node.children.len());
        for (i, &child_id) in node.children.iter().enumerate() {
            let child = self.tree.node(child_id);
            validate_name(&child.name)?;
            if !seen.insert(child.name.as_str()) {
                return Err(Error::DuplicateName(child.name.clone()));
            }

            if i > 0 {
                self.header.push(b',');
            }
            self.write_key(&child.name);
            self.encode(child_id)?;
        }

        self.header.push(b'}');
        Ok(())
    }

    fn encode_file(&mut self, id: EntryId, node: &'t Node<'a>) -> Result<()> {
        self.write_key("size");
        self.write_value(Value::from(node.size));

        if node.flags.contains(Flags::EXECUTABLE) {
            self.write_raw(",");
            self.write_key("executable");
            self.write_raw("true");
        }

        self.write_raw(",");
        if node.is_packed() {
            let offset = self.next_offset;
            self.write_key("offset");
            self.write_value(Value::from(offset.to_string()));

            let section = match node.content {
                Some(content) => Section::new(content.source, content.start, node.size),
                None => {
                    return Err(Error::Io {
                        phase: self.content_phase(id),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "file has no content source",
                        ),
                    })
                }
            };

            tracing::trace!(
                path = %self.tree.entry(id).map(|e| e.path()).unwrap_or_default(),
                offset,
                size = node.size,
                "queued content"
            );

            self.next_offset = offset.checked_add(node.size).ok_or_else(|| {
                Error::header("content region exceeds the addressable size")
            })?;
            self.offsets.push((id, offset));
            self.contents.push((id, section));
        } else {
            self.write_key("unpacked");
            self.write_raw("true");
        }

        if let Some(integrity) = &node.integrity {
            self.write_raw(",");
            self.write_key("integrity");
            self.write_value(integrity_value(integrity));
        }

        Ok(())
    }

    fn content_phase(&self, id: EntryId) -> Phase {
        Phase::WriteContent {
            index: self.contents.len(),
            path: self
                .tree
                .entry(id)
                .map(|e| e.path())
                .unwrap_or_default(),
        }
    }
}

fn integrity_value(integrity: &Integrity) -> Value {
    json!({
        "algorithm": integrity.algorithm,
        "hash": integrity.hash,
        "blockSize": integrity.block_size,
        "blocks": integrity.blocks,
    })
}

fn write_header<W: Write>(
    writer: &mut W,
    frame: &FrameHeader,
    header: &[u8],
    padding: usize,
) -> std::io::Result<()> {
    frame.write_to(writer)?;
    writer.write_all(header)?;
    writer.write_all(&[0u8; 3][..padding])
}

/// Writes `tree` as an archive to `writer`, returning the number of bytes
/// written.
///
/// Packed files are assigned consecutive offsets in traversal order, and
/// their contents are streamed from their sources after the header. On error
/// the writer holds an incomplete archive and must be discarded.
pub fn encode<W: Write>(tree: &mut Tree<'_>, mut writer: W) -> Result<u64> {
    let (header, contents) = {
        let mut encoder = HeaderEncoder::new(tree);
        encoder.encode(EntryId::ROOT)?;
        let HeaderEncoder {
            header,
            contents,
            offsets,
            ..
        } = encoder;

        for &(id, offset) in offsets.iter() {
            tree.node_mut(id).offset = Some(offset);
        }
        (header, contents)
    };

    let frame = FrameHeader::for_header_len(header.len())?;
    let padding = (frame.padded_len() - header.len() as u64) as usize;

    tracing::debug!(
        header_len = header.len(),
        padded_len = frame.padded_len(),
        files = contents.len(),
        "encoded header"
    );

    write_header(&mut writer, &frame, &header, padding)
        .map_err(Error::io(Phase::WriteHeader))?;

    let mut written = FRAME_SIZE + frame.padded_len();

    for (index, (id, mut section)) in contents.into_iter().enumerate() {
        let phase = || Phase::WriteContent {
            index,
            path: tree.entry(id).map(|e| e.path()).unwrap_or_default(),
        };

        let copied = std::io::copy(&mut section, &mut writer).map_err(|source| Error::Io {
            phase: phase(),
            source,
        })?;
        if copied != section.len() {
            return Err(Error::Io {
                phase: phase(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "content source ended after {} of {} bytes",
                        copied,
                        section.len()
                    ),
                ),
            });
        }
        written += copied;
    }

    writer.flush().map_err(Error::io(Phase::Flush))?;
    tracing::debug!(bytes = written, "encoded archive");

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    fn header_text(archive: &[u8]) -> &str {
        let len = u32::from_le_bytes([archive[12], archive[13], archive[14], archive[15]]);
        std::str::from_utf8(&archive[16..16 + len as usize]).unwrap()
    }

    #[test]
    fn minimal_header() {
        let mut builder = Builder::new();
        builder
            .add_directory("sub", Flags::empty())
            .add_bytes("f.txt", b"hi", Flags::empty());
        builder
            .to_parent()
            .unwrap()
            .add_bytes("g.txt", b"bye", Flags::EXECUTABLE);
        let mut tree = builder.finish();

        let mut out = vec![];
        let written = encode(&mut tree, &mut out).unwrap();
        assert_eq!(written, out.len() as u64);

        let text = header_text(&out);
        assert_eq!(
            text,
            r#"{"files":{"sub":{"files":{"f.txt":{"size":2,"offset":"0"}}},"g.txt":{"size":3,"executable":true,"offset":"2"}}}"#
        );
        assert!(out.ends_with(b"hibye"));
    }

    #[test]
    fn frame_fields_and_padding() {
        let mut builder = Builder::new();
        builder.add_bytes("a", b"xyz", Flags::empty());
        let mut tree = builder.finish();

        let mut out = vec![];
        encode(&mut tree, &mut out).unwrap();

        let fields: Vec<u32> = out[..16]
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let header_len = header_text(&out).len() as u32;
        let padded = (header_len + 3) / 4 * 4;

        assert_eq!(fields[0], 4);
        assert_eq!(fields[3], header_len);
        assert_eq!(fields[2], padded + 4);
        assert_eq!(fields[1], fields[2] + 4);
        assert_eq!(out.len() as u32, 16 + padded + 3);
        assert!(out[16 + header_len as usize..16 + padded as usize]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn offsets_are_contiguous() {
        let data: [&[u8]; 4] = [b"one", b"", b"three", b"4"];
        let mut builder = Builder::new();
        builder.add_bytes("0", data[0], Flags::empty());
        builder.add_directory("d", Flags::empty());
        builder.add_bytes("1", data[1], Flags::empty());
        builder.add_file("skip", data[2], 5, Flags::UNPACKED, None, None);
        builder.add_bytes("2", data[2], Flags::empty());
        builder.to_parent().unwrap();
        builder.add_link("l", "d/2");
        builder.add_bytes("3", data[3], Flags::empty());
        let mut tree = builder.finish();

        encode(&mut tree, std::io::sink()).unwrap();

        let root = tree.root();
        let paths = ["0", "d/1", "d/2", "3"];
        let mut expected = 0;
        for path in paths {
            let entry = root.find_path(path).unwrap();
            assert_eq!(entry.offset(), Some(expected));
            expected += entry.size();
        }
        assert_eq!(root.find_path("d/skip").unwrap().offset(), None);
        assert_eq!(root.find_path("l").unwrap().offset(), None);
    }

    #[test]
    fn unpacked_and_links() {
        let mut builder = Builder::new();
        builder
            .add_directory("native", Flags::UNPACKED)
            .add_file("addon.node", &b"elf"[..], 3, Flags::UNPACKED, None, None);
        builder.to_parent().unwrap().add_link("alias", "native/addon.node");
        let mut tree = builder.finish();

        let mut out = vec![];
        encode(&mut tree, &mut out).unwrap();
        let text = header_text(&out);
        assert_eq!(
            text,
            r#"{"files":{"native":{"unpacked":true,"files":{"addon.node":{"size":3,"unpacked":true}}},"alias":{"link":"native/addon.node"}}}"#
        );
        // No content region at all.
        let padded = (text.len() + 3) / 4 * 4;
        assert_eq!(out.len(), 16 + padded);
    }

    #[test]
    fn integrity_is_written() {
        let content: &[u8] = b"hello";
        let integrity = Integrity::compute(content, 0, 5, 4).unwrap();
        let mut builder = Builder::new();
        builder.add_file("h", content, 5, Flags::empty(), None, Some(integrity.clone()));
        let mut tree = builder.finish();

        let mut out = vec![];
        encode(&mut tree, &mut out).unwrap();
        let text = header_text(&out);
        assert!(text.contains(r#""integrity":{"algorithm":"SHA256","#));
        assert!(text.contains(&format!(r#""hash":"{}""#, integrity.hash)));
        assert!(text.contains(r#""blockSize":4"#));
    }

    #[test]
    fn names_are_escaped() {
        let mut builder = Builder::new();
        builder.add_bytes("quote\"d", b"", Flags::empty());
        let mut tree = builder.finish();
        let mut out = vec![];
        encode(&mut tree, &mut out).unwrap();
        assert!(header_text(&out).contains(r#""quote\"d""#));
    }

    #[test]
    fn invalid_names_fail() {
        for name in ["", ".", "..", "a/b", r"a\b"] {
            let mut builder = Builder::new();
            builder.add_bytes(name, b"", Flags::empty());
            let mut tree = builder.finish();
            let result = encode(&mut tree, std::io::sink());
            assert!(
                matches!(result, Err(Error::InvalidName(ref n)) if n == name),
                "{:?}",
                name
            );
        }
    }

    #[test]
    fn duplicate_names_fail() {
        let mut builder = Builder::new();
        builder
            .add_bytes("a", b"", Flags::empty())
            .add_directory("a", Flags::empty());
        let mut tree = builder.finish();
        assert!(matches!(
            encode(&mut tree, std::io::sink()),
            Err(Error::DuplicateName(n)) if n == "a"
        ));
    }

    #[test]
    fn short_source_fails() {
        let mut builder = Builder::new();
        builder.add_file("f", &b"abc"[..], 10, Flags::empty(), None, None);
        let mut tree = builder.finish();
        match encode(&mut tree, std::io::sink()) {
            Err(Error::Io {
                phase: Phase::WriteContent { index, path },
                source,
            }) => {
                assert_eq!(index, 0);
                assert_eq!(path, "/f");
                assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_tree() {
        let mut tree = Tree::new();
        let mut out = vec![];
        encode(&mut tree, &mut out).unwrap();
        assert_eq!(header_text(&out), r#"{"files":{}}"#);
        assert_eq!(out.len(), 16 + 12);
    }
}
