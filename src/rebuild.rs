//! Writing archives.
//!
//! [`ArchiveWriter`] lays out an archive from scratch. [`rebuild`] feeds it the
//! fields of a decoded [`Archive`] with one field substituted.
//!
//! The layout is always canonical: every string field of every module, in module
//! order and then field order, each followed by a NUL byte; then the module table;
//! then the compile arguments and a NUL byte; then the offsets header and trailer.
//! An archive that is already canonical rebuilds to identical bytes.

#[cfg(feature = "logging")]
use log::info;
use object::pod::bytes_of;
use object::{LittleEndian as LE, U32Bytes, U64Bytes};

use crate::archive::{Archive, ByteRange, FieldKind, Schema};
use crate::format;
use crate::{Error, ErrorKind, Result};

/// The fields of one module to be written.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleSource<'a> {
    /// The module path.
    pub name: &'a [u8],
    /// The module source.
    pub contents: &'a [u8],
    /// The serialized source map.
    pub source_map: &'a [u8],
    /// Precompiled bytecode.
    pub bytecode: &'a [u8],
    /// Serialized module metadata. Must be empty for [`Schema::V1`].
    pub module_info: &'a [u8],
    /// The path the bytecode was compiled from. Must be empty for [`Schema::V1`].
    pub bytecode_origin_path: &'a [u8],
    /// The raw encoding flag.
    pub encoding: u8,
    /// The raw loader flag.
    pub loader: u8,
    /// The raw module format flag.
    pub module_format: u8,
    /// The raw side flag.
    pub side: u8,
}

impl<'a> ModuleSource<'a> {
    /// Return the bytes of a field.
    pub fn field(&self, kind: FieldKind) -> &'a [u8] {
        match kind {
            FieldKind::Name => self.name,
            FieldKind::Contents => self.contents,
            FieldKind::SourceMap => self.source_map,
            FieldKind::Bytecode => self.bytecode,
            FieldKind::ModuleInfo => self.module_info,
            FieldKind::BytecodeOriginPath => self.bytecode_origin_path,
        }
    }

    /// Replace the bytes of a field.
    pub fn set_field(&mut self, kind: FieldKind, data: &'a [u8]) {
        match kind {
            FieldKind::Name => self.name = data,
            FieldKind::Contents => self.contents = data,
            FieldKind::SourceMap => self.source_map = data,
            FieldKind::Bytecode => self.bytecode = data,
            FieldKind::ModuleInfo => self.module_info = data,
            FieldKind::BytecodeOriginPath => self.bytecode_origin_path = data,
        }
    }
}

/// A writer for the canonical archive layout.
#[derive(Debug)]
pub struct ArchiveWriter<'a> {
    schema: Schema,
    modules: Vec<ModuleSource<'a>>,
    compile_args: &'a [u8],
    entry_module_id: u32,
    flags: u32,
}

impl<'a> ArchiveWriter<'a> {
    /// Create a writer for an empty archive with the given record layout.
    pub fn new(schema: Schema) -> Self {
        ArchiveWriter {
            schema,
            modules: Vec::new(),
            compile_args: &[],
            entry_module_id: 0,
            flags: 0,
        }
    }

    /// Create a writer that reproduces a decoded archive.
    pub fn from_archive(archive: &Archive<'a>) -> Self {
        let mut writer = ArchiveWriter::new(archive.schema());
        for module in archive.modules() {
            let mut source = ModuleSource {
                encoding: module.encoding,
                loader: module.loader,
                module_format: module.module_format,
                side: module.side,
                ..ModuleSource::default()
            };
            for kind in archive.schema().fields() {
                if let Some(data) = archive.field_bytes(module, *kind) {
                    source.set_field(*kind, data);
                }
            }
            writer.modules.push(source);
        }
        writer.compile_args = archive.compile_args();
        writer.entry_module_id = archive.header().entry_module_id;
        writer.flags = archive.header().flags;
        writer
    }

    /// Append a module. Modules are written in the order they are added.
    pub fn add_module(&mut self, module: ModuleSource<'a>) {
        self.modules.push(module);
    }

    /// Return a mutable reference to a module that was added.
    pub fn module_mut(&mut self, index: usize) -> Option<&mut ModuleSource<'a>> {
        self.modules.get_mut(index)
    }

    /// Set the compile arguments.
    pub fn set_compile_args(&mut self, compile_args: &'a [u8]) {
        self.compile_args = compile_args;
    }

    /// Set the index of the entry point module.
    pub fn set_entry_module_id(&mut self, id: u32) {
        self.entry_module_id = id;
    }

    /// Set the archive flags.
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// Return the length of the archive that `write` would produce.
    pub fn len(&self) -> u64 {
        let strings: u64 = self
            .modules
            .iter()
            .map(|module| {
                self.schema
                    .fields()
                    .iter()
                    .map(|kind| module.field(*kind).len() as u64 + 1)
                    .sum::<u64>()
            })
            .sum();
        strings
            + (self.modules.len() * self.schema.record_size()) as u64
            + self.compile_args.len() as u64
            + 1
            + format::SIZEOF_OFFSETS as u64
            + format::TRAILER.len() as u64
    }

    /// Return true if no modules have been added.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Write the archive.
    pub fn write(&self) -> Result<Vec<u8>> {
        if self.schema == Schema::V1 {
            if let Some(index) = self
                .modules
                .iter()
                .position(|m| !m.module_info.is_empty() || !m.bytecode_origin_path.is_empty())
            {
                return Err(Error::malformed(format!(
                    "Module {} has fields that the 36 byte record cannot store",
                    index
                )));
            }
        }

        let len = self.len();
        check_offsets(len, self.compile_args.len() as u64)?;
        let capacity = usize::try_from(len).map_err(|_| too_large(len))?;
        let mut buffer = Vec::with_capacity(capacity);

        let fields = self.schema.fields();
        let mut ranges = Vec::with_capacity(self.modules.len() * fields.len());
        for module in &self.modules {
            for kind in fields {
                ranges.push(append_string(&mut buffer, module.field(*kind))?);
            }
        }

        let table_offset = to_u32(buffer.len())?;
        for (module, ranges) in self.modules.iter().zip(ranges.chunks(fields.len())) {
            match self.schema {
                Schema::V1 => {
                    let record = format::ModuleV1 {
                        name: ranges[0].to_pointer(),
                        contents: ranges[1].to_pointer(),
                        sourcemap: ranges[2].to_pointer(),
                        bytecode: ranges[3].to_pointer(),
                        encoding: module.encoding,
                        loader: module.loader,
                        module_format: module.module_format,
                        side: module.side,
                    };
                    buffer.extend_from_slice(bytes_of(&record));
                }
                Schema::V2 => {
                    let record = format::ModuleV2 {
                        name: ranges[0].to_pointer(),
                        contents: ranges[1].to_pointer(),
                        sourcemap: ranges[2].to_pointer(),
                        bytecode: ranges[3].to_pointer(),
                        module_info: ranges[4].to_pointer(),
                        bytecode_origin_path: ranges[5].to_pointer(),
                        encoding: module.encoding,
                        loader: module.loader,
                        module_format: module.module_format,
                        side: module.side,
                    };
                    buffer.extend_from_slice(bytes_of(&record));
                }
            }
        }
        let table_length = to_u32(buffer.len() - table_offset as usize)?;
        let table = ByteRange::new_unchecked(table_offset, table_length);

        let compile_args = append_string(&mut buffer, self.compile_args)?;

        let byte_count = (buffer.len() + format::SIZEOF_OFFSETS + format::TRAILER.len()) as u64;
        let offsets = format::Offsets {
            byte_count: U64Bytes::new(LE, byte_count),
            modules_ptr: table.to_pointer(),
            entry_point_id: U32Bytes::new(LE, self.entry_module_id),
            compile_exec_argv_ptr: compile_args.to_pointer(),
            flags: U32Bytes::new(LE, self.flags),
        };
        buffer.extend_from_slice(bytes_of(&offsets));
        buffer.extend_from_slice(&format::TRAILER);
        debug_assert_eq!(buffer.len() as u64, self.len());
        Ok(buffer)
    }
}

fn append_string(buffer: &mut Vec<u8>, data: &[u8]) -> Result<ByteRange> {
    let offset = to_u32(buffer.len())?;
    let length = to_u32(data.len())?;
    buffer.extend_from_slice(data);
    buffer.push(0);
    Ok(ByteRange::new_unchecked(offset, length))
}

/// Check that an archive of `len` bytes can address its contents with 32-bit
/// pointers, before any of it is written.
///
/// The compile arguments are the last pointer, so every other offset and
/// length is bounded by theirs.
fn check_offsets(len: u64, compile_args_len: u64) -> Result<()> {
    let trailing = (format::SIZEOF_OFFSETS + format::TRAILER.len()) as u64 + compile_args_len + 1;
    let compile_args_offset = len.saturating_sub(trailing);
    if compile_args_offset > u64::from(u32::MAX) {
        return Err(too_large(compile_args_offset));
    }
    if compile_args_len > u64::from(u32::MAX) {
        return Err(too_large(compile_args_len));
    }
    Ok(())
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| too_large(value as u64))
}

fn too_large(value: u64) -> Error {
    Error::new(
        ErrorKind::ArchiveTooLarge,
        format!("Archive offset {:#x} does not fit in 32 bits", value),
    )
}

/// Rebuild an archive with one module field replaced.
///
/// The module table keeps the record layout it was decoded with, and modules keep
/// their order. Fields before the replaced one keep their offsets if the archive was
/// canonical; fields after it move by the change in length.
pub fn rebuild(archive: &Archive<'_>, index: usize, kind: FieldKind, data: &[u8]) -> Result<Vec<u8>> {
    let module = archive
        .modules()
        .get(index)
        .ok_or_else(|| Error::not_found(format!("No module at index {}", index)))?;
    let old = archive.field_bytes(module, kind).ok_or_else(|| {
        Error::malformed(format!(
            "Field {} is not stored by {:?} module records",
            kind,
            archive.schema()
        ))
    })?;

    let mut writer = ArchiveWriter::from_archive(archive);
    if let Some(source) = writer.module_mut(index) {
        source.set_field(kind, data);
    }
    #[cfg(feature = "logging")]
    info!(
        "Replacing {} of module {} ({} bytes with {} bytes)",
        kind,
        String::from_utf8_lossy(archive.bytes(module.name)),
        old.len(),
        data.len()
    );
    #[cfg(not(feature = "logging"))]
    let _ = old;
    writer.write()
}
