//! # drcov-extract
//!
//! A Rust library for decoding, filtering and re-encoding DrCov coverage
//! files as written by DynamoRIO's drcov client and compatible tracers.
//!
//! A DrCov file is a two line text header, a text module table and a binary
//! basic block table:
//!
//! ```text
//! DRCOV VERSION: 2
//! DRCOV FLAVOR: drcov
//! Module Table: version 2, count 1
//! Columns: id, base, end, entry, checksum, timestamp, path
//! 0, 0x400000, 0x401000, 0x0000000000000000, 0x00000000, 0x00000000, a.dll
//! BB Table: 2 bbs
//! <2 x 8-byte little-endian records {u32 start, u16 size, u16 mod_id}>
//! ```
//!
//! Decoding accepts DRCOV versions 2 and 3 and all six module table layouts
//! of table versions 2 to 4 (see [`ModuleTableSchema`]). Encoding always
//! writes version 2 with the `V2Win` layout, so `entry`, `checksum`,
//! `timestamp`, `offset` and `containing_id` are not preserved.
//!
//! ## References
//!
//! - DrCov format analysis: <https://www.ayrx.me/drcov-file-format/>
//! - DynamoRIO drcov tool: <https://dynamorio.org/>
//! - Lighthouse plugin: <https://github.com/gaasedelen/lighthouse>
//!
//! ## Example Usage
//!
//! ```no_run
//! use drcov_extract::DrCov;
//!
//! // Reading a file
//! let coverage = drcov_extract::from_file("coverage.drcov").unwrap();
//! println!("{coverage}");
//!
//! // Keeping only one module
//! coverage
//!     .export_module_by_name_to_file("libc.so", "libc.drcov")
//!     .unwrap();
//!
//! // Creating coverage data using the builder
//! let new_coverage = DrCov::builder()
//!     .add_module(0, "/bin/program", 0x400000, 0x50000)
//!     .add_block(0, 0x1000, 32) // module 0, offset 0x1000, size 32
//!     .build()
//!     .unwrap();
//!
//! // Writing to a file
//! drcov_extract::to_file(&new_coverage, "output.drcov").unwrap();
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

mod cov_info;
mod document;
mod error;
mod module_table;

pub use cov_info::{BbEntry, CodeBlock, CoverageInfo};
pub use document::{DrCov, DrCovBuilder, FileHeader};
pub use error::{Error, Result};
pub use module_table::{Column, ModuleTableEntry, ModuleTableHeader, ModuleTableSchema};

/// Constants used throughout the library.
mod consts {
    use std::ops::RangeInclusive;

    pub(crate) const SUPPORTED_FILE_VERSIONS: RangeInclusive<u32> = 2..=3;
    pub(crate) const SUPPORTED_MODULE_TABLE_VERSIONS: RangeInclusive<u32> = 2..=5;
    pub(crate) const ENCODED_FILE_VERSION: u32 = 2;
    pub(crate) const DEFAULT_FLAVOR: &str = "drcov";
    pub(crate) const BB_ENTRY_SIZE: usize = 8;
    pub(crate) const VERSION_PREFIX: &str = "DRCOV VERSION:";
    pub(crate) const FLAVOR_PREFIX: &str = "DRCOV FLAVOR:";
    pub(crate) const MODULE_TABLE_PREFIX: &str = "Module Table: ";
    pub(crate) const COLUMNS_PREFIX: &str = "Columns: ";
    pub(crate) const BB_TABLE_PREFIX: &str = "BB Table: ";
    pub(crate) const BB_TABLE_SUFFIX: &str = " bbs";
}

/// Parses a drcov file from a file path.
///
/// # Errors
/// Returns `FileNotFound` before opening anything if `path` does not exist.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DrCov> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    from_reader(File::open(path)?)
}

/// Parses a drcov file from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<DrCov> {
    DrCov::decode(reader)
}

/// Parses a drcov file held in memory.
pub fn from_bytes(data: &[u8]) -> Result<DrCov> {
    DrCov::from_bytes(data)
}

/// Writes every module of `data` to a file path.
pub fn to_file<P: AsRef<Path>>(data: &DrCov, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    data.write_to(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Writes every module of `data` to any writer.
pub fn to_writer<W: Write>(data: &DrCov, writer: &mut W) -> Result<()> {
    data.write_to(writer)
}
