//! Module table codec.
//!
//! DynamoRIO has shipped several module table layouts over the years. Each
//! layout is identified by the exact `Columns:` line that follows the
//! `Module Table:` header, and is represented here by a
//! [`ModuleTableSchema`] variant that declares its typed columns.
//!
//! | Schema   | Table version | Columns |
//! |----------|---------------|---------|
//! | `V2Win`  | 2 | `id, base, end, entry, checksum, timestamp, path` |
//! | `V2Unix` | 2 | `id, base, end, entry, path` |
//! | `V3Win`  | 3 | `id, containing_id, start, end, entry, checksum, timestamp, path` |
//! | `V3Unix` | 3 | `id, containing_id, start, end, entry, path` |
//! | `V4Win`  | 4 | `id, containing_id, start, end, entry, offset, checksum, timestamp, path` |
//! | `V4Unix` | 4 | `id, containing_id, start, end, entry, offset, path` |

use std::fmt::{self, Display, Formatter};

use crate::consts;
use crate::cov_info::CoverageInfo;
use crate::error::{Error, Result};

/// The `Module Table: version <v>, count <n>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleTableHeader {
    pub version: u32,
    pub count: usize,
}

impl ModuleTableHeader {
    /// Parses a module table header line.
    ///
    /// Only the grammar is checked here; see [`ModuleTableHeader::is_supported`]
    /// for the version range.
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = || Error::InvalidModuleTableHeader(line.to_string());

        let rest = line
            .trim()
            .strip_prefix(consts::MODULE_TABLE_PREFIX)
            .and_then(|s| s.strip_prefix("version "))
            .ok_or_else(invalid)?;
        let (version, count) = rest.split_once(", count ").ok_or_else(invalid)?;

        Ok(Self {
            version: parse_decimal(version).ok_or_else(invalid)?,
            count: parse_decimal(count).ok_or_else(invalid)?,
        })
    }

    pub fn is_supported(&self) -> bool {
        consts::SUPPORTED_MODULE_TABLE_VERSIONS.contains(&self.version)
    }
}

impl Display for ModuleTableHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}version {}, count {}",
            consts::MODULE_TABLE_PREFIX,
            self.version,
            self.count
        )
    }
}

/// A single column of a module table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    ContainingId,
    Base,
    Start,
    End,
    Entry,
    Offset,
    Checksum,
    Timestamp,
    Path,
}

impl Column {
    /// The column name as written in the `Columns:` line.
    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::ContainingId => "containing_id",
            Column::Base => "base",
            Column::Start => "start",
            Column::End => "end",
            Column::Entry => "entry",
            Column::Offset => "offset",
            Column::Checksum => "checksum",
            Column::Timestamp => "timestamp",
            Column::Path => "path",
        }
    }
}

/// The six known module table layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleTableSchema {
    /// DynamoRIO 7.0.0-RC1, table version 2, Windows.
    V2Win,
    /// DynamoRIO 7.0.0-RC1, table version 2, Unix.
    V2Unix,
    /// DynamoRIO 7.0.17594B, table version 3, Windows.
    V3Win,
    /// DynamoRIO 7.0.17594B, table version 3, Unix.
    V3Unix,
    /// DynamoRIO 7.0.17640, table version 4, Windows.
    V4Win,
    /// DynamoRIO 7.0.17640, table version 4, Unix.
    V4Unix,
}

impl ModuleTableSchema {
    pub const ALL: [ModuleTableSchema; 6] = [
        ModuleTableSchema::V2Win,
        ModuleTableSchema::V3Win,
        ModuleTableSchema::V4Win,
        ModuleTableSchema::V2Unix,
        ModuleTableSchema::V3Unix,
        ModuleTableSchema::V4Unix,
    ];

    /// The typed columns of a row, in wire order. `Path` is always last.
    pub fn columns(self) -> &'static [Column] {
        use Column::*;
        match self {
            ModuleTableSchema::V2Win => &[Id, Base, End, Entry, Checksum, Timestamp, Path],
            ModuleTableSchema::V2Unix => &[Id, Base, End, Entry, Path],
            ModuleTableSchema::V3Win => &[
                Id,
                ContainingId,
                Start,
                End,
                Entry,
                Checksum,
                Timestamp,
                Path,
            ],
            ModuleTableSchema::V3Unix => &[Id, ContainingId, Start, End, Entry, Path],
            ModuleTableSchema::V4Win => &[
                Id,
                ContainingId,
                Start,
                End,
                Entry,
                Offset,
                Checksum,
                Timestamp,
                Path,
            ],
            ModuleTableSchema::V4Unix => &[Id, ContainingId, Start, End, Entry, Offset, Path],
        }
    }

    /// The canonical `Columns:` line identifying this schema.
    pub fn column_header(self) -> &'static str {
        match self {
            ModuleTableSchema::V2Win => "Columns: id, base, end, entry, checksum, timestamp, path",
            ModuleTableSchema::V2Unix => "Columns: id, base, end, entry, path",
            ModuleTableSchema::V3Win => {
                "Columns: id, containing_id, start, end, entry, checksum, timestamp, path"
            }
            ModuleTableSchema::V3Unix => "Columns: id, containing_id, start, end, entry, path",
            ModuleTableSchema::V4Win => {
                "Columns: id, containing_id, start, end, entry, offset, checksum, timestamp, path"
            }
            ModuleTableSchema::V4Unix => {
                "Columns: id, containing_id, start, end, entry, offset, path"
            }
        }
    }

    pub fn table_version(self) -> u32 {
        match self {
            ModuleTableSchema::V2Win | ModuleTableSchema::V2Unix => 2,
            ModuleTableSchema::V3Win | ModuleTableSchema::V3Unix => 3,
            ModuleTableSchema::V4Win | ModuleTableSchema::V4Unix => 4,
        }
    }

    /// Whether the layout carries the PE `checksum` and `timestamp` columns.
    pub fn is_windows(self) -> bool {
        matches!(
            self,
            ModuleTableSchema::V2Win | ModuleTableSchema::V3Win | ModuleTableSchema::V4Win
        )
    }

    /// Selects the schema whose column header matches `line` verbatim
    /// (surrounding whitespace ignored).
    pub fn from_column_header(line: &str) -> Result<Self> {
        let header = line.trim();
        let invalid = || Error::InvalidModuleTableHeader(header.to_string());

        let names = header
            .strip_prefix(consts::COLUMNS_PREFIX)
            .ok_or_else(invalid)?;
        Self::ALL
            .into_iter()
            .find(|schema| {
                schema
                    .columns()
                    .iter()
                    .map(|column| column.name())
                    .eq(names.split(", "))
            })
            .ok_or_else(invalid)
    }

    /// Decodes one module table row.
    ///
    /// The row is split on every `,`, so a path cannot contain one. Exactly
    /// one token per column is required.
    pub fn parse_entry(self, line: &str) -> Result<ModuleTableEntry> {
        let invalid = || Error::InvalidModuleTableEntry(line.to_string());
        let columns = self.columns();

        let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
        if tokens.len() != columns.len() {
            return Err(invalid());
        }

        let mut entry = ModuleTableEntry::default();
        for (column, token) in columns.iter().zip(tokens) {
            match column {
                Column::Id => {
                    entry.id = parse_unsigned(token)
                        .and_then(|v| u32::try_from(v).ok())
                        .ok_or_else(invalid)?
                }
                Column::ContainingId => {
                    entry.containing_id = Some(
                        parse_signed(token)
                            .and_then(|v| i32::try_from(v).ok())
                            .ok_or_else(invalid)?,
                    )
                }
                Column::Base | Column::Start => {
                    entry.base = parse_unsigned(token).ok_or_else(invalid)?
                }
                Column::End => entry.end = parse_unsigned(token).ok_or_else(invalid)?,
                Column::Entry => entry.entry = parse_unsigned(token).ok_or_else(invalid)?,
                Column::Offset => entry.offset = Some(parse_unsigned(token).ok_or_else(invalid)?),
                Column::Checksum => {
                    entry.checksum = Some(
                        parse_unsigned(token)
                            .and_then(|v| u32::try_from(v).ok())
                            .ok_or_else(invalid)?,
                    )
                }
                Column::Timestamp => {
                    entry.timestamp = Some(
                        parse_unsigned(token)
                            .and_then(|v| u32::try_from(v).ok())
                            .ok_or_else(invalid)?,
                    )
                }
                Column::Path => entry.path = token.to_string(),
            }
        }
        Ok(entry)
    }

    /// Formats one module table row, without the line terminator.
    ///
    /// Missing optional fields are written as zero, except `containing_id`
    /// which DynamoRIO writes as `-1` when a module has no container.
    pub fn format_entry(self, entry: &ModuleTableEntry) -> String {
        self.columns()
            .iter()
            .map(|column| match column {
                Column::Id => entry.id.to_string(),
                Column::ContainingId => entry.containing_id.unwrap_or(-1).to_string(),
                Column::Base | Column::Start => format!("{:#x}", entry.base),
                Column::End => format!("{:#x}", entry.end),
                Column::Entry => format!("0x{:016x}", entry.entry),
                Column::Offset => format!("{:#x}", entry.offset.unwrap_or(0)),
                Column::Checksum => format!("0x{:08x}", entry.checksum.unwrap_or(0)),
                Column::Timestamp => format!("0x{:08x}", entry.timestamp.unwrap_or(0)),
                Column::Path => entry.path.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Display for ModuleTableSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_header())
    }
}

/// One decoded module table row.
///
/// Rows only live long enough to be projected into a [`CoverageInfo`].
/// `start` columns are stored in `base`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleTableEntry {
    pub id: u32,
    pub base: u64,
    pub end: u64,
    pub entry: u64,
    pub path: String,
    pub containing_id: Option<i32>,
    pub offset: Option<u64>,
    pub checksum: Option<u32>,
    pub timestamp: Option<u32>,
}

impl ModuleTableEntry {
    /// Builds the row written for a document module. `entry`, `checksum`
    /// and `timestamp` are not tracked by the document and come out as zero.
    ///
    /// Returns `None` when the module end does not fit in 64 bits.
    pub fn from_coverage_info(id: u32, info: &CoverageInfo) -> Option<Self> {
        Some(Self {
            id,
            base: info.base_addr,
            end: info.end_addr()?,
            path: info.name.clone(),
            checksum: Some(0),
            timestamp: Some(0),
            ..Default::default()
        })
    }

    /// Returns the size of the module in bytes.
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.base)
    }

    pub fn to_coverage_info(&self) -> CoverageInfo {
        CoverageInfo::new(self.path.clone(), self.base, self.size())
    }
}

pub(crate) fn parse_decimal<T: std::str::FromStr>(token: &str) -> Option<T> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Parses a bare decimal or a `0x`-prefixed hexadecimal integer.
fn parse_unsigned(token: &str) -> Option<u64> {
    match token.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u64::from_str_radix(hex, 16).ok()
        }
        Some(_) => None,
        None => parse_decimal(token),
    }
}

fn parse_signed(token: &str) -> Option<i64> {
    match token.strip_prefix('-') {
        Some(magnitude) => parse_unsigned(magnitude)
            .and_then(|v| i64::try_from(v).ok())
            .map(|v| -v),
        None => parse_unsigned(token).and_then(|v| i64::try_from(v).ok()),
    }
}
