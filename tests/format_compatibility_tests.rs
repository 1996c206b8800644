use drcov_extract::{from_bytes, from_reader, to_writer, CodeBlock, ModuleTableSchema};
use std::io::Cursor;

fn with_records(text: &str, records: &[(u32, u16, u16)]) -> Vec<u8> {
    let mut data = text.as_bytes().to_vec();
    for &(start, size, mod_id) in records {
        data.extend_from_slice(&start.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&mod_id.to_le_bytes());
    }
    data
}

#[test]
fn test_v2_windows_format_parsing() {
    let v2_win = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 2, count 2\nColumns: id, base, end, entry, checksum, timestamp, path\n0, 0x400000, 0x500000, 0x401000, 0x12345678, 0x87654321, C:\\bin\\test.exe\n1, 0x10000000, 0x10080000, 0x10001000, 0x0001c4a2, 0x5a2b3c4d, C:\\Windows\\System32\\kernel32.dll\nBB Table: 0 bbs\n";

    let coverage = from_reader(Cursor::new(v2_win)).unwrap();
    assert_eq!(coverage.len(), 2);

    let exe = coverage.get(0).unwrap();
    assert_eq!(exe.name, "C:\\bin\\test.exe");
    assert_eq!(exe.base_addr, 0x400000);
    assert_eq!(exe.module_size, 0x100000);

    let kernel32 = coverage.get(1).unwrap();
    assert_eq!(kernel32.name, "C:\\Windows\\System32\\kernel32.dll");
    assert_eq!(kernel32.base_addr, 0x10000000);
    assert_eq!(kernel32.module_size, 0x80000);
}

#[test]
fn test_v2_unix_format_parsing() {
    let v2_unix = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 2, count 1\nColumns: id, base, end, entry, path\n0, 0x0000000000400000, 0x0000000000450000, 0x0000000000401000, /bin/test\nBB Table: 0 bbs\n";

    let coverage = from_reader(Cursor::new(v2_unix)).unwrap();
    let module = coverage.get(0).unwrap();
    assert_eq!(module.name, "/bin/test");
    assert_eq!(module.base_addr, 0x400000);
    assert_eq!(module.module_size, 0x50000);
}

#[test]
fn test_v3_format_parsing() {
    // 'start' replaces 'base' and containing_id may be -1
    let v3_unix = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 3, count 2\nColumns: id, containing_id, start, end, entry, path\n0, -1, 0x400000, 0x500000, 0x401000, /bin/main\n1, 0, 0x450000, 0x460000, 0x451000, /bin/main\nBB Table: 0 bbs\n";

    let coverage = from_reader(Cursor::new(v3_unix)).unwrap();
    assert_eq!(coverage.get(0).unwrap().base_addr, 0x400000);
    assert_eq!(coverage.get(0).unwrap().module_size, 0x100000);
    assert_eq!(coverage.get(1).unwrap().base_addr, 0x450000);
    assert_eq!(coverage.get(1).unwrap().module_size, 0x10000);

    let v3_win = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 3, count 1\nColumns: id, containing_id, start, end, entry, checksum, timestamp, path\n0, -1, 0x400000, 0x500000, 0x401000, 0xabcdef00, 0x11223344, C:\\test.exe\nBB Table: 0 bbs\n";

    let coverage_win = from_reader(Cursor::new(v3_win)).unwrap();
    assert_eq!(coverage_win.get(0).unwrap().name, "C:\\test.exe");
    assert_eq!(coverage_win.get(0).unwrap().module_size, 0x100000);
}

#[test]
fn test_v4_format_parsing() {
    let v4_win = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 4, count 1\nColumns: id, containing_id, start, end, entry, offset, checksum, timestamp, path\n0, -1, 0x400000, 0x500000, 0x401000, 0x1000, 0x12345678, 0x87654321, C:\\test.exe\nBB Table: 0 bbs\n";

    let coverage = from_reader(Cursor::new(v4_win)).unwrap();
    assert_eq!(coverage.get(0).unwrap().base_addr, 0x400000);
    assert_eq!(coverage.get(0).unwrap().module_size, 0x100000);

    let v4_unix = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 4, count 1\nColumns: id, containing_id, start, end, entry, offset, path\n0, -1, 0x7ffff7a00000, 0x7ffff7c00000, 0x7ffff7a01000, 0x0, /lib/x86_64-linux-gnu/libc.so.6\nBB Table: 0 bbs\n";

    let coverage_unix = from_reader(Cursor::new(v4_unix)).unwrap();
    let libc = coverage_unix.get(0).unwrap();
    assert_eq!(libc.name, "/lib/x86_64-linux-gnu/libc.so.6");
    assert_eq!(libc.base_addr, 0x7ffff7a00000);
    assert_eq!(libc.module_size, 0x200000);
}

#[test]
fn test_every_schema_in_a_full_document() {
    for schema in ModuleTableSchema::ALL {
        let row = match schema {
            ModuleTableSchema::V2Win => "5, 0x1000, 0x3000, 0x1100, 0x0, 0x0, /m",
            ModuleTableSchema::V2Unix => "5, 0x1000, 0x3000, 0x1100, /m",
            ModuleTableSchema::V3Win => "5, -1, 0x1000, 0x3000, 0x1100, 0x0, 0x0, /m",
            ModuleTableSchema::V3Unix => "5, -1, 0x1000, 0x3000, 0x1100, /m",
            ModuleTableSchema::V4Win => "5, -1, 0x1000, 0x3000, 0x1100, 0x0, 0x0, 0x0, /m",
            ModuleTableSchema::V4Unix => "5, -1, 0x1000, 0x3000, 0x1100, 0x0, /m",
        };
        let text = format!(
            "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version {}, count 1\n{}\n{}\nBB Table: 1 bbs\n",
            schema.table_version(),
            schema.column_header(),
            row
        );
        let data = with_records(&text, &[(0x40, 6, 5)]);

        let coverage = from_bytes(&data).unwrap();
        let module = coverage.get(5).unwrap();
        assert_eq!(module.name, "/m", "{schema:?}");
        assert_eq!(module.base_addr, 0x1000, "{schema:?}");
        assert_eq!(module.module_size, 0x2000, "{schema:?}");
        assert_eq!(module.passed_blocks, [CodeBlock::new(0x40, 6)], "{schema:?}");
    }
}

#[test]
fn test_drcov_version_3_header() {
    let v3_header = "DRCOV VERSION: 3\nDRCOV FLAVOR: drcov\nModule Table: version 4, count 1\nColumns: id, containing_id, start, end, entry, offset, path\n0, -1, 0x400000, 0x500000, 0x401000, 0x0, /bin/test\nBB Table: 0 bbs\n";
    let coverage = from_reader(Cursor::new(v3_header)).unwrap();
    assert_eq!(coverage.len(), 1);
}

#[test]
fn test_module_table_version_5_with_known_columns() {
    // Table version 5 is accepted; the layout is still picked by its columns.
    let v5 = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 5, count 1\nColumns: id, containing_id, start, end, entry, offset, path\n0, -1, 0x400000, 0x500000, 0x401000, 0x0, /bin/test\nBB Table: 0 bbs\n";
    let coverage = from_reader(Cursor::new(v5)).unwrap();
    assert_eq!(coverage.get(0).unwrap().name, "/bin/test");
}

#[test]
fn test_flavor_suffix_accepted() {
    let flavor = "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov-64\nModule Table: version 2, count 0\nColumns: id, base, end, entry, path\nBB Table: 0 bbs\n";
    assert!(from_reader(Cursor::new(flavor)).unwrap().is_empty());
}

#[test]
fn test_reencode_normalizes_to_v2_windows() {
    let v4_unix = "DRCOV VERSION: 3\nDRCOV FLAVOR: drcov\nModule Table: version 4, count 1\nColumns: id, containing_id, start, end, entry, offset, path\n3, -1, 0x400000, 0x500000, 0x401000, 0x2000, /bin/test\nBB Table: 1 bbs\n";
    let data = with_records(v4_unix, &[(0x1000, 32, 3)]);
    let coverage = from_bytes(&data).unwrap();

    let mut buffer = Vec::new();
    to_writer(&coverage, &mut buffer).unwrap();

    let expected = with_records(
        "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 2, count 1\nColumns: id, base, end, entry, checksum, timestamp, path\n3, 0x400000, 0x500000, 0x0000000000000000, 0x00000000, 0x00000000, /bin/test\nBB Table: 1 bbs\n",
        &[(0x1000, 32, 3)],
    );
    assert_eq!(buffer, expected);
    assert_eq!(from_bytes(&buffer).unwrap(), coverage);
}

#[test]
fn test_version_2_is_byte_stable() {
    let original = with_records(
        "DRCOV VERSION: 2\nDRCOV FLAVOR: drcov\nModule Table: version 2, count 2\nColumns: id, base, end, entry, checksum, timestamp, path\n0, 0x400000, 0x401000, 0x0000000000000000, 0x00000000, 0x00000000, a.dll\n1, 0x500000, 0x540000, 0x0000000000000000, 0x00000000, 0x00000000, b.dll\nBB Table: 3 bbs\n",
        &[(0x10, 4, 0), (0x20, 8, 0), (0x300, 16, 1)],
    );

    let mut buffer = Vec::new();
    to_writer(&from_bytes(&original).unwrap(), &mut buffer).unwrap();
    assert_eq!(buffer, original);
}
