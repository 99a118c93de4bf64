use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::entry::Tree;
use crate::error::{Error, Phase, Result};
use crate::ser::encode;

#[derive(Debug)]
pub struct AsarFileWriter {
    pub(crate) file: BufWriter<File>,
    pub(crate) path: PathBuf,
}

impl AsarFileWriter {
    /// Creates a new archive file. An existing file at `path` is left alone
    /// and reported as an error.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<AsarFileWriter> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(Error::io(Phase::Create))?;

        Ok(AsarFileWriter {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes `tree` into the file and returns the archive length.
    pub fn write(mut self, tree: &mut Tree<'_>) -> Result<u64> {
        let len = encode(tree, &mut self.file)?;
        tracing::debug!(path = %self.path.display(), len, "wrote archive");
        Ok(len)
    }
}
