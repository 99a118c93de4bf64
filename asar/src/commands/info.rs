use asar_format::{AsarFileReader, Tree, Walk};

use crate::cli::InfoArgs;
use crate::error::{Error, Result};
use crate::util::format_size;

#[derive(Debug, Default)]
struct Stats {
    directories: u64,
    packed: u64,
    unpacked: u64,
    links: u64,
    with_integrity: u64,
    packed_bytes: u64,
    unpacked_bytes: u64,
}

impl Stats {
    /// Byte totals saturate, since sizes come straight from the header.
    fn collect(tree: &Tree<'_>) -> Result<Stats> {
        let mut stats = Stats::default();
        tree.root().walk(|_, entry| {
            if entry.is_dir() {
                stats.directories += 1;
            } else if entry.is_link() {
                stats.links += 1;
            } else if entry.is_unpacked() {
                stats.unpacked += 1;
                stats.unpacked_bytes = stats.unpacked_bytes.saturating_add(entry.size());
            } else {
                stats.packed += 1;
                stats.packed_bytes = stats.packed_bytes.saturating_add(entry.size());
            }
            if entry.integrity().is_some() {
                stats.with_integrity += 1;
            }
            Ok::<_, Error>(Walk::Continue)
        })?;
        Ok(stats)
    }
}

pub fn run(args: InfoArgs) -> Result<()> {
    let reader = AsarFileReader::open(&args.archive).map_err(|source| Error::OpenArchive {
        path: args.archive.clone(),
        source,
    })?;
    let tree = reader.tree().map_err(|source| Error::ReadArchive {
        path: args.archive.clone(),
        source,
    })?;

    let stats = Stats::collect(&tree)?;

    let header = reader.header();
    let archive_len = reader.as_bytes().len() as u64;

    println!("Archive: {}", reader.path().display());
    println!("Size:    {}", format_size(archive_len));
    println!();
    println!("Frame:");
    println!("  marker:          {}", header.marker);
    println!("  outer size:      {}", header.outer_size);
    println!("  inner size:      {}", header.inner_size);
    println!("  header length:   {}", header.header_len);
    println!(
        "  padding:         {}",
        header.padded_len() - u64::from(header.header_len)
    );
    println!("  content offset:  {}", header.content_offset());
    println!();
    println!("Entries:");
    println!("  directories:     {}", stats.directories);
    println!(
        "  packed files:    {} ({})",
        stats.packed,
        format_size(stats.packed_bytes)
    );
    println!(
        "  unpacked files:  {} ({})",
        stats.unpacked,
        format_size(stats.unpacked_bytes)
    );
    println!("  links:           {}", stats.links);
    println!("  with integrity:  {}", stats.with_integrity);

    let content_len = archive_len.saturating_sub(header.content_offset());
    if content_len != stats.packed_bytes {
        tracing::warn!(
            content_len,
            packed_bytes = stats.packed_bytes,
            "content region does not match the sum of packed file sizes"
        );
    }

    Ok(())
}
