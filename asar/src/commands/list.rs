use asar_format::{AsarFileReader, Walk};

use crate::cli::ListArgs;
use crate::error::{Error, Result};
use crate::util::{format_size, kind};

pub fn run(args: ListArgs) -> Result<()> {
    let reader = AsarFileReader::open(&args.archive).map_err(|source| Error::OpenArchive {
        path: args.archive.clone(),
        source,
    })?;
    let tree = reader.tree().map_err(|source| Error::ReadArchive {
        path: args.archive.clone(),
        source,
    })?;

    if args.long {
        println!("{:<5} {:>12}  {:>12}  Path", "Kind", "Size", "Offset");
        println!("{}", "-".repeat(60));
    }

    tree.root().walk(|path, entry| {
        if !args.long {
            println!("/{}", path);
            return Ok::<_, Error>(Walk::Continue);
        }

        let size = if entry.is_file() {
            format_size(entry.size())
        } else {
            "-".into()
        };
        let location = match entry.offset() {
            Some(offset) => offset.to_string(),
            None if entry.is_unpacked() => "unpacked".into(),
            None => "-".into(),
        };
        match entry.link() {
            Some(target) => println!(
                "{:<5} {:>12}  {:>12}  /{} -> /{}",
                kind(&entry),
                size,
                location,
                path,
                target
            ),
            None => println!("{:<5} {:>12}  {:>12}  /{}", kind(&entry), size, location, path),
        }
        Ok(Walk::Continue)
    })?;

    Ok(())
}
