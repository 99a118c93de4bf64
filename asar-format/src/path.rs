//! Entry names and the `/`-delimited paths built from them.

use crate::error::{Error, Result};

/// The separator used between entry names in archive paths.
pub const PATH_SEP: &str = "/";

/// Returns whether `name` may be used as a single entry name.
///
/// A name must not be empty, must not be `.` or `..`, and must not contain
/// `/`, `\` or NUL.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c == '\0')
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Splits a `/`-delimited path into its segments, skipping empty ones.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEP).filter(|x| !x.is_empty())
}
