use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use linear_map::LinearMap;
use tracing::{debug, trace, warn};

use crate::consts;
use crate::cov_info::{BbEntry, CodeBlock, CoverageInfo};
use crate::error::{Error, Result};
use crate::module_table::{
    parse_decimal, ModuleTableEntry, ModuleTableHeader, ModuleTableSchema,
};

/// Module table layout used when writing. Decoded files are always
/// normalized to it, whatever layout they were read with.
const ENCODED_SCHEMA: ModuleTableSchema = ModuleTableSchema::V2Win;

/// DrCov file header containing version and tool information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub flavor: String,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            version: consts::ENCODED_FILE_VERSION,
            flavor: consts::DEFAULT_FLAVOR.to_string(),
        }
    }
}

impl FileHeader {
    /// Whether the version is one this crate can decode.
    pub fn is_supported(&self) -> bool {
        consts::SUPPORTED_FILE_VERSIONS.contains(&self.version)
    }

    /// Reads the `DRCOV VERSION:` and `DRCOV FLAVOR:` lines.
    ///
    /// The version range is not checked here.
    fn read<R: BufRead>(lines: &mut LineReader<R>) -> Result<Self> {
        let version_line = lines.next_line()?.to_string();
        if !version_line.starts_with(consts::VERSION_PREFIX) {
            return Err(Error::InvalidHeader(version_line));
        }

        let flavor_line = lines.next_line()?;
        let is_drcov_flavor = flavor_line
            .strip_prefix(consts::FLAVOR_PREFIX)
            .and_then(|rest| rest.strip_prefix(' '))
            .is_some_and(|flavor| flavor.starts_with(consts::DEFAULT_FLAVOR));
        if !is_drcov_flavor {
            return Err(Error::InvalidHeader(flavor_line.to_string()));
        }
        let flavor = last_field(flavor_line).to_string();

        let version_str = last_field(&version_line);
        let version = parse_decimal(version_str)
            .ok_or_else(|| Error::InvalidVersionString(version_str.to_string()))?;

        Ok(Self { version, flavor })
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{} {}", consts::VERSION_PREFIX, self.version)?;
        writeln!(writer, "{} {}", consts::FLAVOR_PREFIX, self.flavor)
    }
}

/// The text after the last `:` of a header line, trimmed.
fn last_field(line: &str) -> &str {
    line.rsplit_once(':').map_or(line, |(_, value)| value).trim()
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

/// Builds the module table row for one module, refusing modules the row
/// grammar cannot carry back.
fn module_row(id: u32, info: &CoverageInfo) -> io::Result<ModuleTableEntry> {
    if info.name.contains(',') {
        return Err(invalid_input(format!(
            "module path {:?} contains a comma",
            info.name
        )));
    }
    ModuleTableEntry::from_coverage_info(id, info).ok_or_else(|| {
        invalid_input(format!(
            "module {id} at {:#x} with size {:#x} ends past the address space",
            info.base_addr, info.module_size
        ))
    })
}

/// Reads newline-terminated lines while leaving the underlying reader
/// positioned exactly after the last consumed line, so the binary BB table
/// can be read from the same stream.
struct LineReader<R> {
    reader: R,
    buf: String,
    line_no: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line_no: 0,
        }
    }

    /// Returns the next line without its terminator. At EOF this is empty.
    fn next_line(&mut self) -> Result<&str> {
        self.buf.clear();
        self.reader.read_line(&mut self.buf)?;
        self.line_no += 1;
        Ok(self.buf.trim_end_matches(&['\r', '\n'][..]))
    }

    fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

/// A decoded DrCov document: per-module coverage keyed by module id.
///
/// Ids are whatever the module table declared; they need not be contiguous
/// or sorted. Iteration follows module table order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrCov {
    pub cov_infos: LinearMap<u32, CoverageInfo>,
}

impl DrCov {
    /// Creates a new `DrCovBuilder` to construct a document by hand.
    pub fn builder() -> DrCovBuilder {
        DrCovBuilder::default()
    }

    /// Decodes a complete DrCov document from a stream positioned at its
    /// first byte.
    ///
    /// Decoding is all-or-nothing: the first malformed line or record aborts
    /// with an error and no partial document is returned.
    pub fn decode<R: Read>(reader: R) -> Result<Self> {
        let mut lines = LineReader::new(BufReader::new(reader));

        let header = FileHeader::read(&mut lines)?;
        if !header.is_supported() {
            return Err(Error::InvalidHeader(format!(
                "{} {} is not supported",
                consts::VERSION_PREFIX,
                header.version
            )));
        }
        debug!(version = header.version, flavor = %header.flavor, "read drcov header");

        let mut doc = DrCov::default();
        doc.read_module_table(&mut lines)?;
        doc.read_bb_table(&mut lines)?;
        Ok(doc)
    }

    /// Decodes a document held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::decode(Cursor::new(data))
    }

    fn read_module_table<R: BufRead>(&mut self, lines: &mut LineReader<R>) -> Result<()> {
        let table = ModuleTableHeader::parse(lines.next_line()?)?;
        if !table.is_supported() {
            return Err(Error::InvalidModuleTableHeader(format!(
                "Module Table version {} is not supported",
                table.version
            )));
        }

        let schema = ModuleTableSchema::from_column_header(lines.next_line()?)?;
        debug!(
            table_version = table.version,
            count = table.count,
            ?schema,
            "reading module table"
        );

        for _ in 0..table.count {
            let entry = schema.parse_entry(lines.next_line()?)?;
            trace!(line = lines.line_no, id = entry.id, path = %entry.path, "module");
            self.cov_infos.insert(entry.id, entry.to_coverage_info());
        }
        Ok(())
    }

    fn read_bb_table<R: BufRead>(&mut self, lines: &mut LineReader<R>) -> Result<()> {
        let header = lines.next_line()?;
        let count: usize = header
            .trim()
            .strip_prefix(consts::BB_TABLE_PREFIX)
            .and_then(|rest| rest.strip_suffix(consts::BB_TABLE_SUFFIX))
            .and_then(parse_decimal)
            .ok_or_else(|| Error::InvalidBbTableHeader(header.to_string()))?;
        debug!(line = lines.line_no, count, "reading bb table");

        let reader = lines.reader_mut();
        for index in 0..count {
            let entry = BbEntry::read_from(reader)?;
            let mod_id = u32::from(entry.mod_id);
            self.cov_infos
                .get_mut(&mod_id)
                .ok_or(Error::UnknownModuleId { index, mod_id })?
                .passed_blocks
                .push(entry.code_block());
        }
        Ok(())
    }

    /// Encodes the given modules as a standalone document.
    ///
    /// Module ids are written unchanged. The BB table contains exactly the
    /// blocks of the given modules, module by module, in list order.
    pub fn encode<'a, W, I>(writer: &mut W, modules: I) -> Result<()>
    where
        W: Write,
        I: IntoIterator<Item = (u32, &'a CoverageInfo)>,
    {
        let modules: Vec<_> = modules.into_iter().collect();
        let rows = modules
            .iter()
            .map(|(id, info)| module_row(*id, info))
            .collect::<io::Result<Vec<_>>>()?;

        FileHeader::default().write(writer)?;

        let table = ModuleTableHeader {
            version: ENCODED_SCHEMA.table_version(),
            count: modules.len(),
        };
        writeln!(writer, "{table}")?;
        writeln!(writer, "{}", ENCODED_SCHEMA.column_header())?;
        for row in &rows {
            writeln!(writer, "{}", ENCODED_SCHEMA.format_entry(row))?;
        }

        let total: usize = modules.iter().map(|(_, info)| info.passed_blocks.len()).sum();
        writeln!(
            writer,
            "{}{}{}",
            consts::BB_TABLE_PREFIX,
            total,
            consts::BB_TABLE_SUFFIX
        )?;

        let mut binary_data = Vec::with_capacity(total * consts::BB_ENTRY_SIZE);
        for (id, info) in &modules {
            if info.passed_blocks.is_empty() {
                continue;
            }
            let mod_id = u16::try_from(*id).map_err(|_| {
                invalid_input(format!("module id {id} does not fit in a BB table record"))
            })?;
            for block in &info.passed_blocks {
                BbEntry {
                    start: block.rva,
                    size: block.size,
                    mod_id,
                }
                .write_to(&mut binary_data)?;
            }
        }
        writer.write_all(&binary_data)?;
        debug!(modules = modules.len(), blocks = total, "encoded drcov document");
        Ok(())
    }

    /// Encodes every module of this document.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        Self::encode(writer, self.iter())
    }

    /// Returns the first module, in table order, whose name contains `name`.
    pub fn find_module_by_name(&self, name: &str) -> Option<(u32, &CoverageInfo)> {
        self.iter().find(|(_, info)| info.name.contains(name))
    }

    /// Encodes only the first module whose name contains `name`.
    ///
    /// Returns `Ok(false)` and writes nothing when no module matches.
    pub fn export_module_by_name<W: Write>(&self, writer: &mut W, name: &str) -> Result<bool> {
        match self.find_module_by_name(name) {
            Some(module) => {
                Self::encode(writer, [module])?;
                Ok(true)
            }
            None => {
                warn!(module = name, "module is not found");
                Ok(false)
            }
        }
    }

    /// Like [`DrCov::export_module_by_name`], returning the encoded bytes.
    pub fn export_module_by_name_to_vec(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut buffer = Vec::new();
        let found = self.export_module_by_name(&mut buffer, name)?;
        Ok(found.then_some(buffer))
    }

    /// Like [`DrCov::export_module_by_name`], writing to `path`.
    ///
    /// The file is only created when a module matches.
    pub fn export_module_by_name_to_file<P: AsRef<Path>>(
        &self,
        name: &str,
        path: P,
    ) -> Result<bool> {
        let Some(module) = self.find_module_by_name(name) else {
            warn!(module = name, "module is not found");
            return Ok(false);
        };
        let mut writer = BufWriter::new(File::create(path)?);
        Self::encode(&mut writer, [module])?;
        writer.flush()?;
        Ok(true)
    }

    pub fn get(&self, id: u32) -> Option<&CoverageInfo> {
        self.cov_infos.get(&id)
    }

    /// Iterates over `(module id, coverage)` in module table order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &CoverageInfo)> + '_ {
        self.cov_infos.iter().map(|(id, info)| (*id, info))
    }

    pub fn len(&self) -> usize {
        self.cov_infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cov_infos.is_empty()
    }

    /// Number of blocks across all modules.
    pub fn total_blocks(&self) -> usize {
        self.iter().map(|(_, info)| info.passed_blocks.len()).sum()
    }
}

impl Display for DrCov {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (id, info)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, "\n\n")?;
            }
            write!(f, "module_id: {id}\n{info}")?;
        }
        Ok(())
    }
}

/// A builder for creating `DrCov` documents.
#[derive(Debug, Default)]
pub struct DrCovBuilder {
    data: DrCov,
    blocks: Vec<(u16, CodeBlock)>,
}

impl DrCovBuilder {
    /// Adds a module with the given id. A repeated id replaces the earlier
    /// module in place.
    pub fn add_module(mut self, id: u32, name: &str, base_addr: u64, module_size: u64) -> Self {
        self.data
            .cov_infos
            .insert(id, CoverageInfo::new(name, base_addr, module_size));
        self
    }

    /// Adds a fully-specified module, including any blocks it already has.
    pub fn add_coverage_info(mut self, id: u32, info: CoverageInfo) -> Self {
        self.data.cov_infos.insert(id, info);
        self
    }

    /// Adds an executed block to module `mod_id`.
    pub fn add_block(mut self, mod_id: u16, rva: u32, size: u16) -> Self {
        self.blocks.push((mod_id, CodeBlock::new(rva, size)));
        self
    }

    /// Consumes the builder and returns the final `DrCov`.
    ///
    /// # Errors
    /// Returns `UnknownModuleId` if a block references a module that was
    /// never added.
    pub fn build(mut self) -> Result<DrCov> {
        for (index, (mod_id, block)) in self.blocks.into_iter().enumerate() {
            let mod_id = u32::from(mod_id);
            self.data
                .cov_infos
                .get_mut(&mod_id)
                .ok_or(Error::UnknownModuleId { index, mod_id })?
                .passed_blocks
                .push(block);
        }
        Ok(self.data)
    }
}
