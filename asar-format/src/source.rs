//! Positioned reads over archive and content sources.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A byte source supporting reads at an absolute position.
///
/// Implementations must not depend on a shared cursor, so that concurrent
/// readers of the same source do not interfere with each other.
pub trait ReadAt: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`. Returns `Ok(0)` at
    /// or past the end of the source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(v) if v < self.len() => v,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl ReadAt for memmap2::Mmap {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

#[cfg(unix)]
impl ReadAt for File {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// A borrowed content source, as held by entries and sections.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Bytes(&'a [u8]),
    Dyn(&'a dyn ReadAt),
}

impl ReadAt for Source<'_> {
    #[inline(always)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self {
            Source::Bytes(bytes) => bytes.read_at(buf, offset),
            Source::Dyn(source) => source.read_at(buf, offset),
        }
    }
}

impl<'a> From<&'a [u8]> for Source<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Source::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Source<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Source::Bytes(bytes)
    }
}

impl<'a> From<&'a memmap2::Mmap> for Source<'a> {
    fn from(map: &'a memmap2::Mmap) -> Self {
        Source::Bytes(map)
    }
}

impl<'a> From<&'a File> for Source<'a> {
    fn from(file: &'a File) -> Self {
        Source::Dyn(file)
    }
}

impl<'a> From<&'a dyn ReadAt> for Source<'a> {
    fn from(source: &'a dyn ReadAt) -> Self {
        Source::Dyn(source)
    }
}

/// A bounded view of `len` bytes of a source, starting at `start`.
///
/// Each section carries its own cursor. Reads are clamped to the section, so
/// no byte outside `[start, start + len)` is ever returned.
#[derive(Clone, Copy)]
pub struct Section<'a> {
    source: Source<'a>,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a> Section<'a> {
    pub fn new<S: Into<Source<'a>>>(source: S, start: u64, len: u64) -> Section<'a> {
        Section {
            source: source.into(),
            start,
            len,
            pos: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl std::fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("start", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}

impl Read for Section<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = self.len - self.pos;
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let offset = self.start.checked_add(self.pos).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "section extends past u64::MAX")
        })?;
        let n = self.source.read_at(&mut buf[..max], offset)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Section<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(v) => Some(v),
            SeekFrom::End(v) => self.len.checked_add_signed(v),
            SeekFrom::Current(v) => self.pos.checked_add_signed(v),
        };
        match target {
            Some(v) => {
                self.pos = v;
                Ok(v)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
