use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// An executed code range, relative to the base of its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeBlock {
    /// Offset of the basic block start from the module base.
    pub rva: u32,
    /// Size of the basic block in bytes.
    pub size: u16,
}

impl CodeBlock {
    pub fn new(rva: u32, size: u16) -> Self {
        Self { rva, size }
    }
}

impl Display for CodeBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "rva: {:#x}, size: {:#x}", self.rva, self.size)
    }
}

/// Coverage recorded for one loaded module.
///
/// `passed_blocks` is kept in BB table order; it is not sorted by address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverageInfo {
    /// Module path as written in the module table.
    pub name: String,
    pub base_addr: u64,
    pub module_size: u64,
    pub passed_blocks: Vec<CodeBlock>,
}

impl CoverageInfo {
    /// Creates coverage for a module with no executed blocks yet.
    pub fn new(name: impl Into<String>, base_addr: u64, module_size: u64) -> Self {
        Self {
            name: name.into(),
            base_addr,
            module_size,
            passed_blocks: Vec::new(),
        }
    }

    /// Returns the first address past the end of the module, or `None` if
    /// the module runs past the 64-bit address space.
    pub fn end_addr(&self) -> Option<u64> {
        self.base_addr.checked_add(self.module_size)
    }
}

impl Display for CoverageInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "module: {}, base_addr: {:#x}, module_size: {:#x}",
            self.name, self.base_addr, self.module_size
        )?;
        for (i, block) in self.passed_blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

/// A raw basic block table record.
///
/// On the wire this is 8 bytes, little-endian, with no padding:
/// `{ start: u32, size: u16, mod_id: u16 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BbEntry {
    /// Offset of the basic block start from the image base.
    pub start: u32,
    pub size: u16,
    /// ID of the module the block belongs to.
    pub mod_id: u16,
}

impl BbEntry {
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let start = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u16::<LittleEndian>()?;
        let mod_id = reader.read_u16::<LittleEndian>()?;
        Ok(Self {
            start,
            size,
            mod_id,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.start)?;
        writer.write_u16::<LittleEndian>(self.size)?;
        writer.write_u16::<LittleEndian>(self.mod_id)
    }

    pub fn code_block(&self) -> CodeBlock {
        CodeBlock::new(self.start, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bb_entry_layout() {
        let entry = BbEntry {
            start: 0x1000,
            size: 0x10,
            mod_id: 0,
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x10, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00]);

        let parsed = BbEntry::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.code_block(), CodeBlock::new(0x1000, 0x10));
    }

    #[test]
    fn test_bb_entry_field_order() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0xcd, 0xab, 0x02, 0x01];
        let entry = BbEntry::read_from(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(entry.start, 0x12345678);
        assert_eq!(entry.size, 0xabcd);
        assert_eq!(entry.mod_id, 0x0102);
    }

    #[test]
    fn test_bb_entry_truncated() {
        let bytes = [0u8; 7];
        let err = BbEntry::read_from(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_coverage_info_display() {
        let mut info = CoverageInfo::new("a.dll", 0x400000, 0x1000);
        info.passed_blocks.push(CodeBlock::new(0x10, 0x4));
        info.passed_blocks.push(CodeBlock::new(0x20, 0x8));
        assert_eq!(
            info.to_string(),
            "module: a.dll, base_addr: 0x400000, module_size: 0x1000\nrva: 0x10, size: 0x4\nrva: 0x20, size: 0x8"
        );
    }

    #[test]
    fn test_coverage_info_end_addr() {
        let info = CoverageInfo::new("/bin/test", 0x400000, 0x50000);
        assert_eq!(info.end_addr(), Some(0x450000));
        assert!(info.passed_blocks.is_empty());

        let top = CoverageInfo::new("top", u64::MAX - 0xfff, 0x1000);
        assert_eq!(top.end_addr(), None);
    }
}
