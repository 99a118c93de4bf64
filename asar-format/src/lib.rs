//! Reading and writing asar archives.
//!
//! An archive is a 16-byte frame, a JSON header describing the entry tree,
//! and the packed file contents concatenated in header order. Build a
//! [`Tree`] with a [`Builder`] and [`encode`] it, or [`decode`] an archive
//! from any [`ReadAt`] source to get a tree whose files read lazily from it.

mod builder;
#[cfg(feature = "reader")]
mod de;
mod entry;
mod error;
mod file;
mod header;
mod integrity;
pub mod path;
#[cfg(feature = "writer")]
mod ser;
mod source;

pub use builder::Builder;
#[cfg(feature = "reader")]
pub use de::decode;
pub use entry::{Entry, EntryId, Flags, Tree, Walk};
pub use error::{Error, Phase, Result};
#[cfg(feature = "reader")]
pub use file::reader::AsarFileReader;
#[cfg(feature = "writer")]
pub use file::writer::AsarFileWriter;
pub use header::{FrameHeader, FRAME_SIZE};
pub use integrity::{Integrity, ALGORITHM_SHA256, DEFAULT_BLOCK_SIZE};
#[cfg(feature = "writer")]
pub use ser::encode;
pub use source::{ReadAt, Section, Source};
