use std::path::PathBuf;

use miette::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum Error {
    #[error("Cannot open archive `{}`", .path.display())]
    #[diagnostic(help("Is this a valid .asar file?"))]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: asar_format::Error,
    },

    #[error("Cannot read header of archive `{}`", .path.display())]
    #[diagnostic(help("The archive header is malformed or truncated."))]
    ReadArchive {
        path: PathBuf,
        #[source]
        source: asar_format::Error,
    },

    #[error("Archive `{}` already exists", .path.display())]
    #[diagnostic(help("Pass --force to replace it."))]
    ArchiveExists { path: PathBuf },

    #[error("Cannot create archive `{}`", .path.display())]
    CreateArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot move finished archive into place at `{}`", .path.display())]
    #[diagnostic(help("Pass --force to replace an existing archive."))]
    PersistArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write archive `{}`", .path.display())]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: asar_format::Error,
    },

    #[error("Cannot extract archive into `{}`", .path.display())]
    Extract {
        path: PathBuf,
        #[source]
        source: asar_format::Error,
    },

    #[error("`{}` is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Cannot open file `{}`", .path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot copy unpacked file `{}`", .path.display())]
    CopyUnpacked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot hash file `{}`", .path.display())]
    Integrity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File name of `{}` is not valid UTF-8", .path.display())]
    #[diagnostic(help("Archive entry names must be UTF-8."))]
    NonUtf8Name { path: PathBuf },

    #[error("Cannot process directory entry")]
    ProcessDirEntry {
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Cannot determine current directory")]
    CurrentDir {
        #[source]
        source: std::io::Error,
    },
}
