use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Phase, Result};
use crate::source::ReadAt;

/// Size of the fixed prefix preceding the header text.
pub const FRAME_SIZE: u64 = 16;

/// The value of the first frame field.
pub(crate) const FRAME_MARKER: u32 = 4;

/// The header text is zero-padded to a multiple of this many bytes.
pub(crate) const HEADER_ALIGNMENT: u64 = 4;

/// The four little-endian length fields at the start of every archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub marker: u32,
    pub outer_size: u32,
    pub inner_size: u32,
    pub header_len: u32,
}

#[inline(always)]
pub(crate) fn padded(len: u64) -> u64 {
    let diff = len % HEADER_ALIGNMENT;
    if diff == 0 {
        len
    } else {
        len + (HEADER_ALIGNMENT - diff)
    }
}

impl FrameHeader {
    /// Builds the frame for a header text of `header_len` unpadded bytes.
    pub fn for_header_len(header_len: usize) -> Result<FrameHeader> {
        let padded_len = padded(header_len as u64);
        let outer_size =
            u32::try_from(padded_len + 8).map_err(|_| Error::HeaderTooLarge(header_len))?;

        Ok(FrameHeader {
            marker: FRAME_MARKER,
            outer_size,
            inner_size: outer_size - 4,
            header_len: header_len as u32,
        })
    }

    /// Length of the header text including its zero padding.
    #[inline(always)]
    pub fn padded_len(&self) -> u64 {
        padded(self.header_len as u64)
    }

    /// Absolute position of the content region.
    #[inline(always)]
    pub fn content_offset(&self) -> u64 {
        FRAME_SIZE + self.padded_len()
    }

    pub fn to_bytes(&self) -> [u8; FRAME_SIZE as usize] {
        let mut buf = [0u8; FRAME_SIZE as usize];
        LittleEndian::write_u32_into(
            &[self.marker, self.outer_size, self.inner_size, self.header_len],
            &mut buf,
        );
        buf
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.marker)?;
        writer.write_u32::<LittleEndian>(self.outer_size)?;
        writer.write_u32::<LittleEndian>(self.inner_size)?;
        writer.write_u32::<LittleEndian>(self.header_len)
    }

    /// Parses and validates a frame. The length fields must agree with each
    /// other exactly.
    pub fn from_bytes(buf: &[u8; FRAME_SIZE as usize]) -> Result<FrameHeader> {
        let mut fields = [0u32; 4];
        LittleEndian::read_u32_into(buf, &mut fields);
        let [marker, outer_size, inner_size, header_len] = fields;

        let header = FrameHeader {
            marker,
            outer_size,
            inner_size,
            header_len,
        };

        if marker != FRAME_MARKER {
            return Err(Error::header(format!(
                "unexpected frame marker {} (expected {})",
                marker, FRAME_MARKER
            )));
        }

        if outer_size as u64 != inner_size as u64 + 4 {
            return Err(Error::header(format!(
                "outer frame size {} does not match inner frame size {}",
                outer_size, inner_size
            )));
        }

        if inner_size as u64 != header.padded_len() + 4 {
            return Err(Error::header(format!(
                "inner frame size {} does not match header length {}",
                inner_size, header_len
            )));
        }

        Ok(header)
    }

    pub fn read_from<R: ReadAt + ?Sized>(source: &R) -> Result<FrameHeader> {
        let mut buf = [0u8; FRAME_SIZE as usize];
        source.read_exact_at(&mut buf, 0).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::header("truncated frame header")
            } else {
                Error::Io {
                    phase: Phase::ReadFrame,
                    source: e,
                }
            }
        })?;
        let header = Self::from_bytes(&buf)?;

        tracing::debug!(
            outer_size = header.outer_size,
            inner_size = header.inner_size,
            header_len = header.header_len,
            content_offset = format_args!("{:#x}", header.content_offset()),
            "deserialized FrameHeader"
        );

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding() {
        assert_eq!(padded(0), 0);
        assert_eq!(padded(1), 4);
        assert_eq!(padded(4), 4);
        assert_eq!(padded(13), 16);
    }

    #[test]
    fn field_relations() {
        let header = FrameHeader::for_header_len(13).unwrap();
        assert_eq!(header.marker, 4);
        assert_eq!(header.header_len, 13);
        assert_eq!(header.inner_size, 16 + 4);
        assert_eq!(header.outer_size, header.inner_size + 4);
        assert_eq!(header.content_offset(), 32);
    }

    #[test]
    fn bytes_layout() {
        let header = FrameHeader::for_header_len(6).unwrap();
        let bytes = header.to_bytes();
        assert_eq!(bytes, [4, 0, 0, 0, 16, 0, 0, 0, 12, 0, 0, 0, 6, 0, 0, 0]);

        let mut written = vec![];
        header.write_to(&mut written).unwrap();
        assert_eq!(written, bytes);
        assert_eq!(FrameHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn rejects_mismatched_fields() {
        let mut bytes = FrameHeader::for_header_len(6).unwrap().to_bytes();
        bytes[0] = 5;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(Error::InvalidHeader(_))));

        let mut bytes = FrameHeader::for_header_len(6).unwrap().to_bytes();
        bytes[4] = 20;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(Error::InvalidHeader(_))));

        let mut bytes = FrameHeader::for_header_len(6).unwrap().to_bytes();
        bytes[12] = 9;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn truncated() {
        let data: &[u8] = &[4, 0, 0, 0, 16, 0];
        assert!(matches!(FrameHeader::read_from(data), Err(Error::InvalidHeader(_))));
    }
}
