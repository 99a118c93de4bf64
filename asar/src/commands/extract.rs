use asar_format::AsarFileReader;

use crate::cli::ExtractArgs;
use crate::error::{Error, Result};

pub fn run(args: ExtractArgs) -> Result<()> {
    let reader = AsarFileReader::open(&args.archive).map_err(|source| Error::OpenArchive {
        path: args.archive.clone(),
        source,
    })?;

    let output_path = match args.output {
        Some(path) => path,
        None => std::env::current_dir().map_err(|source| Error::CurrentDir { source })?,
    };

    reader
        .extract_all(&output_path)
        .map_err(|source| Error::Extract {
            path: output_path.clone(),
            source,
        })?;

    tracing::info!(
        archive = %args.archive.display(),
        output = %output_path.display(),
        "extracted"
    );

    Ok(())
}
