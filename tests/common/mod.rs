#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use object::write;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use standalone_archive::format;
use standalone_archive::{ArchiveWriter, Error, ErrorKind, ModuleSource, ResignHook, Result, Schema};

pub const MARKER: &[u8] = b"__APP_MAIN__";

pub const MAIN_JS: &[u8] = b"// __APP_MAIN__\nconsole.log('hello');\n";
pub const UTIL_JS: &[u8] = b"export const util = 1;\n";
pub const DATA_JSON: &[u8] = b"{\"data\":true}";

/// An archive with three modules, the second holding the marker.
pub fn archive(schema: Schema) -> Vec<u8> {
    let mut writer = ArchiveWriter::new(schema);
    writer.add_module(ModuleSource {
        name: b"/$bunfs/root/util.js",
        contents: UTIL_JS,
        encoding: format::ENCODING_UTF8,
        module_format: format::FORMAT_ESM,
        ..ModuleSource::default()
    });
    writer.add_module(ModuleSource {
        name: b"/$bunfs/root/main.js",
        contents: MAIN_JS,
        source_map: b"{\"version\":3}",
        encoding: format::ENCODING_UTF8,
        module_format: format::FORMAT_ESM,
        ..ModuleSource::default()
    });
    writer.add_module(ModuleSource {
        name: b"/$bunfs/root/data.json",
        contents: DATA_JSON,
        ..ModuleSource::default()
    });
    writer.set_entry_module_id(1);
    writer.set_compile_args(b"--smol");
    writer.write().unwrap()
}

fn object_bytes(format: BinaryFormat, f: impl FnOnce(&mut write::Object<'static>)) -> Vec<u8> {
    let mut object = write::Object::new(format, Architecture::X86_64, Endianness::Little);
    let text = object.section_id(write::StandardSection::Text);
    object.append_section_data(text, &[0xc3; 16], 16);
    f(&mut object);
    object.write().unwrap()
}

/// An ELF file followed by an overlay holding `archive` and its 8 byte length.
pub fn elf(archive: &[u8]) -> Vec<u8> {
    let mut data = object_bytes(BinaryFormat::Elf, |_| {});
    data.extend_from_slice(archive);
    data.extend_from_slice(&(archive.len() as u64).to_le_bytes());
    data
}

/// A plain ELF file with no overlay.
pub fn elf_without_overlay() -> Vec<u8> {
    object_bytes(BinaryFormat::Elf, |_| {})
}

fn section_contents(archive: &[u8], capacity: usize, width: usize) -> Vec<u8> {
    let mut section = if width == 4 {
        (archive.len() as u32).to_le_bytes().to_vec()
    } else {
        (archive.len() as u64).to_le_bytes().to_vec()
    };
    section.extend_from_slice(archive);
    assert!(section.len() <= capacity);
    section.resize(capacity, 0);
    section
}

/// A Mach-O file with `archive` in a `__BUN,__bun` section of `capacity` bytes.
pub fn macho(archive: &[u8], capacity: usize) -> Vec<u8> {
    let section = section_contents(archive, capacity, 8);
    object_bytes(BinaryFormat::MachO, |object| {
        let id = object.add_section(
            format::MACHO_SEGMENT.as_bytes().to_vec(),
            format::MACHO_SECTION.as_bytes().to_vec(),
            SectionKind::ReadOnlyData,
        );
        object.append_section_data(id, &section, 16);
    })
}

/// A Mach-O file with no archive section.
pub fn macho_without_section() -> Vec<u8> {
    object_bytes(BinaryFormat::MachO, |_| {})
}

/// A PE image with `archive` in a `.bun` section of `capacity` bytes.
pub fn pe(archive: &[u8], capacity: u32, width: usize) -> Vec<u8> {
    use object::pe;

    let section = section_contents(archive, capacity as usize, width);
    let mut data = Vec::new();
    let mut writer = write::pe::Writer::new(true, 0x1000, 0x200, &mut data);
    writer.reserve_dos_header();
    writer.reserve_nt_headers(16);
    writer.reserve_section_headers(1);
    let range = writer.reserve_section(
        *b".bun\0\0\0\0",
        pe::IMAGE_SCN_CNT_INITIALIZED_DATA | pe::IMAGE_SCN_MEM_READ,
        capacity,
        capacity,
    );

    writer.write_empty_dos_header().unwrap();
    writer.write_nt_headers(write::pe::NtHeaders {
        machine: pe::IMAGE_FILE_MACHINE_AMD64,
        time_date_stamp: 0,
        characteristics: pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE,
        major_linker_version: 0,
        minor_linker_version: 0,
        address_of_entry_point: 0,
        image_base: 0x1_4000_0000,
        major_operating_system_version: 6,
        minor_operating_system_version: 0,
        major_image_version: 0,
        minor_image_version: 0,
        major_subsystem_version: 6,
        minor_subsystem_version: 0,
        subsystem: pe::IMAGE_SUBSYSTEM_WINDOWS_CUI,
        dll_characteristics: 0,
        size_of_stack_reserve: 0x10_0000,
        size_of_stack_commit: 0x1000,
        size_of_heap_reserve: 0x10_0000,
        size_of_heap_commit: 0x1000,
    });
    writer.write_section_headers();
    writer.write_section(range.file_offset, &section);
    data
}

/// Write `data` to a file named `name` in `dir`.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// A signing hook that records the paths it was called with.
#[derive(Debug, Default, Clone)]
pub struct RecordingHook {
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingHook {
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResignHook for RecordingHook {
    fn resign(&self, path: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// A signing hook that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingHook;

impl ResignHook for FailingHook {
    fn resign(&self, _path: &Path) -> Result<()> {
        Err(Error::resign("signing identity not found"))
    }
}

pub fn assert_kind<T: std::fmt::Debug>(result: Result<T>, kind: ErrorKind) {
    match result {
        Ok(value) => panic!("expected {:?}, got {:?}", kind, value),
        Err(e) => assert_eq!(e.kind(), kind, "{}", e),
    }
}
