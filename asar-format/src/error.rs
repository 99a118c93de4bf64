use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The stage of an encode, decode or file operation an I/O failure happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    ReadFrame,
    ReadHeader,
    WriteHeader,
    WriteContent { index: usize, path: String },
    Flush,
    Open,
    Create,
    Extract { path: String },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::ReadFrame => f.write_str("reading frame header"),
            Phase::ReadHeader => f.write_str("reading header"),
            Phase::WriteHeader => f.write_str("writing header"),
            Phase::WriteContent { index, path } => {
                write!(f, "writing content #{} (`{}`)", index, path)
            }
            Phase::Flush => f.write_str("flushing archive"),
            Phase::Open => f.write_str("opening archive"),
            Phase::Create => f.write_str("creating archive"),
            Phase::Extract { path } => write!(f, "extracting `{}`", path),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid entry name `{0}`")]
    InvalidName(String),

    #[error("duplicate entry name `{0}`")]
    DuplicateName(String),

    #[error("header of {0} bytes does not fit the frame")]
    HeaderTooLarge(usize),

    #[error("I/O error while {phase}")]
    Io {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    #[error("root entry has no parent")]
    RootHasNoParent,

    #[error("`{0}` is not a directory")]
    NotADirectory(String),

    #[error("entry does not belong to this tree")]
    UnknownEntry,
}

impl Error {
    pub(crate) fn header<S: Into<String>>(msg: S) -> Error {
        Error::InvalidHeader(msg.into())
    }

    pub(crate) fn io(phase: Phase) -> impl FnOnce(std::io::Error) -> Error {
        move |source| Error::Io { phase, source }
    }
}
