use std::io;
use std::path::PathBuf;

/// A specialized `Result` type for drcov operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors that can occur while decoding or encoding a drcov file.
///
/// Every parse fault carries the raw offending text (without its line
/// terminator) so callers can report exactly what was rejected.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input file does not exist. Raised before any parsing begins.
    #[error("{} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// The VERSION or FLAVOR line is malformed, or the version is unsupported.
    #[error("Invalid DrCov header: {0}")]
    InvalidHeader(String),

    /// The VERSION line carries a value that is not an integer.
    #[error("Invalid DrCov version: {0}")]
    InvalidVersionString(String),

    /// The `Module Table:` line or its `Columns:` line was rejected.
    #[error("Invalid module table header: {0}")]
    InvalidModuleTableHeader(String),

    /// A module table row does not match its column schema.
    #[error("Invalid module table entry: {0}")]
    InvalidModuleTableEntry(String),

    /// The `BB Table:` line is malformed or missing.
    #[error("Invalid BB table header: {0}")]
    InvalidBbTableHeader(String),

    /// A basic block references a module id that was never declared.
    #[error("Basic block {index} references undeclared module id {mod_id}")]
    UnknownModuleId { index: usize, mod_id: u32 },
}
