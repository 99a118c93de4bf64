use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use asar_format::{Builder, EntryId, Flags, Integrity, ReadAt};
use walkdir::WalkDir;

use crate::cli::PackArgs;
use crate::error::{Error, Result};
use crate::util::{format_size, matches_any, parse_patterns, resolve_link};

/// A file on disk that is opened on its first read and closed again once the
/// last byte has been read, so packing holds at most one handle at a time.
struct LazyFile {
    path: PathBuf,
    size: u64,
    file: Mutex<Option<File>>,
}

impl LazyFile {
    fn new(path: PathBuf, size: u64) -> LazyFile {
        LazyFile {
            path,
            size,
            file: Mutex::new(None),
        }
    }
}

impl ReadAt for LazyFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file handle lock poisoned"))?;
        let file = match slot.take() {
            Some(file) => file,
            None => {
                tracing::trace!(path = %self.path.display(), "opening");
                File::open(&self.path)?
            }
        };
        let n = file.read_at(buf, offset)?;
        if n > 0 && offset.saturating_add(n as u64) < self.size {
            *slot = Some(file);
        }
        Ok(n)
    }
}

enum Kind {
    Dir,
    File {
        source: LazyFile,
        size: u64,
        executable: bool,
        unpacked: bool,
    },
    Link(String),
}

/// One entry found on disk, in walk order.
struct Item {
    /// Archive path of the containing directory, empty for the root.
    parent: String,
    name: String,
    path: PathBuf,
    kind: Kind,
}

impl Item {
    fn rel(&self) -> String {
        if self.parent.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.parent, self.name)
        }
    }
}

pub fn run(args: PackArgs) -> Result<()> {
    let unpack = parse_patterns(&args.unpack)?;
    let exclude = parse_patterns(&args.exclude)?;

    if !args.dir.is_dir() {
        return Err(Error::NotADirectory {
            path: args.dir.clone(),
        });
    }

    if args.archive.exists() && !args.force {
        return Err(Error::ArchiveExists {
            path: args.archive.clone(),
        });
    }

    let items = collect(&args.dir, &unpack, &exclude)?;

    let mut builder = Builder::new();
    let mut dirs: HashMap<String, EntryId> = HashMap::new();
    dirs.insert(String::new(), builder.root());

    let mut packed_files = 0usize;
    let mut packed_bytes = 0u64;

    for item in &items {
        let Some(&parent) = dirs.get(&item.parent) else {
            continue;
        };
        builder
            .set_cursor(parent)
            .map_err(|source| Error::WriteArchive {
                path: args.archive.clone(),
                source,
            })?;

        match &item.kind {
            Kind::Dir => {
                builder.add_directory(&item.name, Flags::empty());
                dirs.insert(item.rel(), builder.current());
            }
            Kind::Link(target) => {
                builder.add_link(&item.name, target);
            }
            Kind::File {
                source,
                size,
                executable,
                unpacked,
            } => {
                let mut flags = Flags::empty();
                if *executable {
                    flags |= Flags::EXECUTABLE;
                }
                if *unpacked {
                    flags |= Flags::UNPACKED;
                }

                let content: &dyn ReadAt = source;
                let integrity = if args.no_integrity || *unpacked {
                    None
                } else {
                    Some(
                        Integrity::compute(content, 0, *size, args.block_size).map_err(
                            |source| Error::Integrity {
                                path: item.path.clone(),
                                source,
                            },
                        )?,
                    )
                };

                if !*unpacked {
                    packed_files += 1;
                    packed_bytes = packed_bytes.saturating_add(*size);
                }
                builder.add_file(&item.name, content, *size, flags, None, integrity);
            }
        }
    }

    let mut tree = builder.finish();

    // The archive is written beside its target and only moved into place once
    // complete, so a failed run leaves any previous archive untouched.
    let dir = match args.archive.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".asar-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|source| Error::CreateArchive {
            path: args.archive.clone(),
            source,
        })?;
    let len = asar_format::encode(&mut tree, BufWriter::new(temp.as_file_mut())).map_err(
        |source| Error::WriteArchive {
            path: args.archive.clone(),
            source,
        },
    )?;

    copy_unpacked(&args.archive, &items)?;

    let persisted = if args.force {
        temp.persist(&args.archive)
    } else {
        temp.persist_noclobber(&args.archive)
    };
    persisted.map_err(|err| Error::PersistArchive {
        path: args.archive.clone(),
        source: err.error,
    })?;

    println!(
        "Packed {} files ({}) into {} ({})",
        packed_files,
        format_size(packed_bytes),
        args.archive.display(),
        format_size(len)
    );

    Ok(())
}

/// Walks `dir` sorted by file name, so the same tree always yields the same
/// archive.
fn collect(dir: &Path, unpack: &[glob::Pattern], exclude: &[glob::Pattern]) -> Result<Vec<Item>> {
    let mut items = vec![];
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match relative(dir, entry.path()) {
            Some(rel) => !matches_any(&rel, exclude),
            None => true,
        });

    for entry in walker {
        let entry = entry.map_err(|source| Error::ProcessDirEntry { source })?;
        let path = entry.path().to_path_buf();
        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => return Err(Error::NonUtf8Name { path }),
        };
        let rel = relative(dir, &path).ok_or_else(|| Error::NonUtf8Name { path: path.clone() })?;
        let parent = match rel.rfind('/') {
            Some(i) => rel[..i].to_string(),
            None => String::new(),
        };

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            Kind::Dir
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(|source| Error::OpenFile {
                path: path.clone(),
                source,
            })?;
            let resolved = target
                .to_str()
                .and_then(|target| resolve_link(&parent, &target.replace('\\', "/")));
            match resolved {
                Some(target) => Kind::Link(target),
                None => {
                    tracing::warn!(path = %path.display(), target = %target.display(), "skipping link leaving the archive");
                    continue;
                }
            }
        } else {
            let unpacked = matches_any(&rel, unpack);
            file_kind(&path, unpacked)?
        };

        tracing::trace!(%rel, "collected");
        items.push(Item {
            parent,
            name,
            path,
            kind,
        });
    }

    Ok(items)
}

fn file_kind(path: &Path, unpacked: bool) -> Result<Kind> {
    let meta = fs::metadata(path).map_err(|source| Error::OpenFile {
        path: path.to_path_buf(),
        source,
    })?;
    let size = meta.len();

    #[cfg(unix)]
    let executable = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o100 != 0
    };
    #[cfg(not(unix))]
    let executable = false;

    Ok(Kind::File {
        source: LazyFile::new(path.to_path_buf(), size),
        size,
        executable,
        unpacked,
    })
}

/// Unpacked files live next to the archive, in `<archive>.unpacked/`.
fn copy_unpacked(archive: &Path, items: &[Item]) -> Result<()> {
    let mut root = archive.as_os_str().to_owned();
    root.push(".unpacked");
    let root = PathBuf::from(root);

    for item in items {
        if !matches!(item.kind, Kind::File { unpacked: true, .. }) {
            continue;
        }
        let target = item.rel().split('/').fold(root.clone(), |p, s| p.join(s));
        let copy_err = |source| Error::CopyUnpacked {
            path: item.path.clone(),
            source,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(copy_err)?;
        }
        fs::copy(&item.path, &target).map_err(copy_err)?;
        tracing::debug!(from = %item.path.display(), to = %target.display(), "copied unpacked file");
    }

    Ok(())
}

fn relative(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use asar_format::AsarFileReader;

    fn args(archive: PathBuf, dir: PathBuf) -> PackArgs {
        PackArgs {
            archive,
            dir,
            unpack: vec![],
            exclude: vec![],
            no_integrity: false,
            block_size: asar_format::DEFAULT_BLOCK_SIZE,
            force: false,
        }
    }

    fn sample_dir(root: &Path) -> PathBuf {
        let dir = root.join("app");
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::create_dir_all(dir.join("assets")).unwrap();
        fs::write(dir.join("index.js"), b"require('./lib/b')").unwrap();
        fs::write(dir.join("lib").join("b.js"), b"module.exports = 1").unwrap();
        fs::write(dir.join("lib").join("a.js"), b"").unwrap();
        fs::write(dir.join("lib").join("addon.node"), b"\x7fELF").unwrap();
        fs::write(dir.join("assets").join("app.js.map"), b"{}").unwrap();
        dir
    }

    #[test]
    fn pack_is_sorted_and_readable() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        let archive = temp.path().join("app.asar");
        run(args(archive.clone(), dir)).unwrap();

        let reader = AsarFileReader::open(&archive).unwrap();
        let tree = reader.tree().unwrap();
        let mut paths = vec![];
        tree.root()
            .walk::<(), _>(|path, _| {
                paths.push(path.to_string());
                Ok(asar_format::Walk::Continue)
            })
            .unwrap();
        assert_eq!(
            paths,
            [
                "assets",
                "assets/app.js.map",
                "index.js",
                "lib",
                "lib/a.js",
                "lib/addon.node",
                "lib/b.js"
            ]
        );

        let b = tree.root().find_path("lib/b.js").unwrap();
        assert_eq!(b.read_to_vec().unwrap().unwrap(), b"module.exports = 1");
        assert!(b.integrity().is_some());
        assert_eq!(tree.root().find_path("lib/a.js").unwrap().size(), 0);
    }

    #[test]
    fn unpack_and_exclude() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        let archive = temp.path().join("app.asar");
        let mut args = args(archive.clone(), dir);
        args.unpack = vec!["*.node".into()];
        args.exclude = vec!["*.map".into()];
        args.no_integrity = true;
        run(args).unwrap();

        let reader = AsarFileReader::open(&archive).unwrap();
        let tree = reader.tree().unwrap();
        let root = tree.root();
        assert!(root.find_path("assets/app.js.map").is_none());
        let addon = root.find_path("lib/addon.node").unwrap();
        assert!(addon.is_unpacked());
        assert_eq!(addon.size(), 4);
        assert!(root.find_path("index.js").unwrap().integrity().is_none());

        let copied = temp
            .path()
            .join("app.asar.unpacked")
            .join("lib")
            .join("addon.node");
        assert_eq!(fs::read(copied).unwrap(), b"\x7fELF");
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        let archive = temp.path().join("app.asar");
        fs::write(&archive, b"old").unwrap();

        assert!(matches!(
            run(args(archive.clone(), dir.clone())),
            Err(Error::ArchiveExists { .. })
        ));

        let mut args = args(archive.clone(), dir);
        args.force = true;
        run(args).unwrap();
        assert!(AsarFileReader::open(&archive).is_ok());
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[cfg(unix)]
    #[test]
    fn failed_pack_leaves_nothing_behind() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        fs::write(dir.join("bad\\name"), b"x").unwrap();
        let archive = temp.path().join("app.asar");

        assert!(matches!(
            run(args(archive.clone(), dir.clone())),
            Err(Error::WriteArchive { .. })
        ));
        assert_eq!(dir_names(temp.path()), ["app"]);

        fs::remove_file(dir.join("bad\\name")).unwrap();
        run(args(archive.clone(), dir)).unwrap();
        assert!(AsarFileReader::open(&archive).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn failed_repack_keeps_previous_archive() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        let archive = temp.path().join("app.asar");
        run(args(archive.clone(), dir.clone())).unwrap();
        let before = fs::read(&archive).unwrap();

        fs::write(dir.join("bad\\name"), b"x").unwrap();
        let mut args = args(archive.clone(), dir);
        args.force = true;
        assert!(matches!(run(args), Err(Error::WriteArchive { .. })));

        assert_eq!(fs::read(&archive).unwrap(), before);
        assert_eq!(dir_names(temp.path()), ["app", "app.asar"]);
    }

    #[test]
    fn lazy_file_holds_a_handle_only_while_reading() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("f.bin");
        fs::write(&path, b"0123456789").unwrap();
        let is_open = |file: &LazyFile| file.file.lock().unwrap().is_some();

        let file = LazyFile::new(path.clone(), 10);
        assert!(!is_open(&file));

        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert!(is_open(&file));

        let mut rest = [0u8; 8];
        assert_eq!(file.read_at(&mut rest, 4).unwrap(), 6);
        assert_eq!(&rest[..6], b"456789");
        assert!(!is_open(&file));

        // Reopens on demand after closing.
        assert_eq!(file.read_at(&mut buf, 6).unwrap(), 4);
        assert_eq!(&buf, b"6789");
        assert!(!is_open(&file));

        let missing = LazyFile::new(temp.path().join("missing"), 1);
        assert!(missing.read_at(&mut buf, 0).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn links_inside_the_tree_are_kept() {
        let temp = tempfile::tempdir().unwrap();
        let dir = sample_dir(temp.path());
        std::os::unix::fs::symlink("../index.js", dir.join("lib").join("main.js")).unwrap();
        std::os::unix::fs::symlink("/etc/hostname", dir.join("outside")).unwrap();
        let archive = temp.path().join("app.asar");
        run(args(archive.clone(), dir)).unwrap();

        let reader = AsarFileReader::open(&archive).unwrap();
        let tree = reader.tree().unwrap();
        assert_eq!(
            tree.root().find_path("lib/main.js").unwrap().link(),
            Some("index.js")
        );
        assert!(tree.root().find_path("outside").is_none());
    }
}
