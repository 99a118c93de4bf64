use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::de::decode;
use crate::entry::{Entry, Tree, Walk};
use crate::error::{Error, Phase, Result};
use crate::header::FrameHeader;
use crate::path::{self, PATH_SEP};

#[derive(Debug)]
pub struct AsarFileReader {
    pub(crate) map: Mmap,
    pub(crate) path: PathBuf,
    pub(crate) header: FrameHeader,
}

impl AsarFileReader {
    /// Opens and maps an existing archive, failing if its frame is not valid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<AsarFileReader> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(Error::io(Phase::Open))?;

        let len = file.metadata().map_err(Error::io(Phase::Open))?.len();
        if len == 0 {
            return Err(Error::header("archive is empty"));
        }

        // The map is read-only; concurrent truncation of the file by another
        // process is outside what this reader guards against.
        let map = unsafe { Mmap::map(&file) }.map_err(Error::io(Phase::Open))?;
        let header = FrameHeader::read_from(&map[..])?;

        Ok(AsarFileReader {
            path: path.canonicalize().map_err(Error::io(Phase::Open))?,
            map,
            header,
        })
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The whole mapped archive.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Decodes the archive's tree. Packed files read straight from the map.
    pub fn tree(&self) -> Result<Tree<'_>> {
        decode(&self.map[..])
    }

    /// Writes every entry below `dest`, creating it if needed.
    ///
    /// Unpacked files have no bytes in the archive and are skipped.
    pub fn extract_all<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest).map_err(Error::io(Phase::Extract {
            path: dest.display().to_string(),
        }))?;

        let tree = self.tree()?;
        tree.root().walk(|rel, entry| {
            let target = path::segments(rel).fold(dest.to_path_buf(), |p, s| p.join(s));
            extract_entry(&entry, &target)?;
            Ok(Walk::Continue)
        })?;

        tracing::debug!(dest = %dest.display(), entries = tree.len() - 1, "extracted archive");
        Ok(())
    }
}

fn extract_entry(entry: &Entry<'_, '_>, target: &Path) -> Result<()> {
    let phase = || Phase::Extract { path: entry.path() };

    if entry.is_dir() {
        return fs::create_dir_all(target).map_err(Error::io(phase()));
    }

    if let Some(link) = entry.link() {
        return extract_link(entry, link, target);
    }

    let mut section = match entry.open() {
        Some(section) => section,
        None => {
            tracing::warn!(path = %entry.path(), "skipping unpacked file");
            return Ok(());
        }
    };

    tracing::trace!(path = %entry.path(), target = %target.display(), "extracting");
    let file = File::create(target).map_err(Error::io(phase()))?;
    let mut writer = BufWriter::new(file);
    let copied = io::copy(&mut section, &mut writer)
        .and_then(|n| writer.flush().map(|_| n))
        .map_err(Error::io(phase()))?;
    if copied != entry.size() {
        return Err(Error::Io {
            phase: phase(),
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, archive holds {}", entry.size(), copied),
            ),
        });
    }

    #[cfg(unix)]
    if entry.is_executable() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(0o755))
            .map_err(Error::io(phase()))?;
    }

    Ok(())
}

/// Link targets are relative to the archive root. On disk they become
/// relative to the link's own directory so the extracted tree can move.
fn extract_link(entry: &Entry<'_, '_>, link: &str, target: &Path) -> Result<()> {
    for segment in path::segments(link) {
        path::validate_name(segment)?;
    }

    let depth = entry.path().matches(PATH_SEP).count().saturating_sub(1);
    let relative = format!("{}{}", "../".repeat(depth), link.trim_start_matches(PATH_SEP));

    tracing::trace!(path = %entry.path(), %relative, "extracting link");

    #[cfg(unix)]
    std::os::unix::fs::symlink(&relative, target).map_err(Error::io(Phase::Extract {
        path: entry.path(),
    }))?;

    #[cfg(windows)]
    {
        let resolved = target.parent().unwrap_or(target).join(&relative);
        let result = if resolved.is_dir() {
            std::os::windows::fs::symlink_dir(&relative, target)
        } else {
            std::os::windows::fs::symlink_file(&relative, target)
        };
        result.map_err(Error::io(Phase::Extract { path: entry.path() }))?;
    }

    Ok(())
}
