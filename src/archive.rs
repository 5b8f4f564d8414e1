//! The decoded module archive.
//!
//! An [`Archive`] borrows the archive bytes and describes every module field as a
//! [`ByteRange`] into them. Ranges are validated when they are decoded, so reading
//! a field never fails afterwards.

use std::fmt;

#[cfg(feature = "logging")]
use log::debug;
use object::{LittleEndian as LE, ReadRef};

use crate::format::{self, StringPointer};
use crate::{Error, ErrorKind, Result};

/// A view of a byte range within the data region of an archive.
///
/// Views are only created by validating an on-disk pointer against the data region,
/// so `offset + length` never exceeds the region length.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    offset: u32,
    length: u32,
}

impl ByteRange {
    /// The offset from the start of the archive.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The length in bytes, excluding any NUL terminator.
    #[inline]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// The offset of the first byte after the range.
    #[inline]
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.length)
    }

    pub(crate) fn from_pointer(pointer: &StringPointer, limit: usize) -> Result<Self> {
        let range = ByteRange {
            offset: pointer.offset.get(LE),
            length: pointer.length.get(LE),
        };
        if range.end() > limit as u64 {
            return Err(Error::malformed(format!(
                "Range {:#x}+{:#x} exceeds archive data length {:#x}",
                range.offset, range.length, limit
            )));
        }
        Ok(range)
    }

    pub(crate) fn to_pointer(self) -> StringPointer {
        StringPointer {
            offset: object::U32Bytes::new(LE, self.offset),
            length: object::U32Bytes::new(LE, self.length),
        }
    }

    /// Used by the writer, which owns the layout it is describing.
    pub(crate) fn new_unchecked(offset: u32, length: u32) -> Self {
        ByteRange { offset, length }
    }
}

/// The module record layout used by an archive.
///
/// A single layout applies to the whole module table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Four string fields followed by four flag bytes.
    V1,
    /// Six string fields followed by four flag bytes.
    V2,
}

impl Schema {
    /// The size of one module record.
    pub fn record_size(self) -> usize {
        match self {
            Schema::V1 => format::SIZEOF_MODULE_V1,
            Schema::V2 => format::SIZEOF_MODULE_V2,
        }
    }

    /// The string fields of a record, in on-disk order.
    pub fn fields(self) -> &'static [FieldKind] {
        match self {
            Schema::V1 => &[
                FieldKind::Name,
                FieldKind::Contents,
                FieldKind::SourceMap,
                FieldKind::Bytecode,
            ],
            Schema::V2 => &[
                FieldKind::Name,
                FieldKind::Contents,
                FieldKind::SourceMap,
                FieldKind::Bytecode,
                FieldKind::ModuleInfo,
                FieldKind::BytecodeOriginPath,
            ],
        }
    }

    /// Infer the layout from the length of the module table.
    ///
    /// When the length is a multiple of both record sizes, `V2` is chosen.
    pub fn infer(table_length: usize) -> Result<Schema> {
        if table_length % format::SIZEOF_MODULE_V2 == 0 {
            Ok(Schema::V2)
        } else if table_length % format::SIZEOF_MODULE_V1 == 0 {
            Ok(Schema::V1)
        } else {
            Err(Error::new(
                ErrorKind::StructSizeAmbiguous,
                format!(
                    "Module table length {} is not a multiple of {} or {}",
                    table_length,
                    format::SIZEOF_MODULE_V1,
                    format::SIZEOF_MODULE_V2
                ),
            ))
        }
    }
}

/// A string field of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// The module path.
    Name,
    /// The module source.
    Contents,
    /// The serialized source map.
    SourceMap,
    /// Precompiled bytecode.
    Bytecode,
    /// Serialized module metadata. Only present in [`Schema::V2`].
    ModuleInfo,
    /// The path the bytecode was compiled from. Only present in [`Schema::V2`].
    BytecodeOriginPath,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldKind::Name => "name",
            FieldKind::Contents => "contents",
            FieldKind::SourceMap => "sourcemap",
            FieldKind::Bytecode => "bytecode",
            FieldKind::ModuleInfo => "module_info",
            FieldKind::BytecodeOriginPath => "bytecode_origin_path",
        })
    }
}

/// The text encoding of a module's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    #[allow(missing_docs)]
    Binary,
    #[allow(missing_docs)]
    Latin1,
    #[allow(missing_docs)]
    Utf8,
}

impl Encoding {
    /// Decode the flag byte, if it has a known value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            format::ENCODING_BINARY => Some(Encoding::Binary),
            format::ENCODING_LATIN1 => Some(Encoding::Latin1),
            format::ENCODING_UTF8 => Some(Encoding::Utf8),
            _ => None,
        }
    }
}

/// The JavaScript module system a module uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    #[allow(missing_docs)]
    None,
    #[allow(missing_docs)]
    Esm,
    #[allow(missing_docs)]
    Cjs,
}

impl ModuleFormat {
    /// Decode the flag byte, if it has a known value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            format::FORMAT_NONE => Some(ModuleFormat::None),
            format::FORMAT_ESM => Some(ModuleFormat::Esm),
            format::FORMAT_CJS => Some(ModuleFormat::Cjs),
            _ => None,
        }
    }
}

/// Whether a module is for the server or the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    #[allow(missing_docs)]
    Server,
    #[allow(missing_docs)]
    Client,
}

impl Side {
    /// Decode the flag byte, if it has a known value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            format::SIDE_SERVER => Some(Side::Server),
            format::SIDE_CLIENT => Some(Side::Client),
            _ => None,
        }
    }
}

/// One entry of the module table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// The module path.
    pub name: ByteRange,
    /// The module source.
    pub contents: ByteRange,
    /// The serialized source map.
    pub source_map: ByteRange,
    /// Precompiled bytecode.
    pub bytecode: ByteRange,
    /// Serialized module metadata, for [`Schema::V2`].
    pub module_info: Option<ByteRange>,
    /// The path the bytecode was compiled from, for [`Schema::V2`].
    pub bytecode_origin_path: Option<ByteRange>,
    /// The raw encoding flag. See [`Encoding::from_raw`].
    pub encoding: u8,
    /// The raw loader flag.
    pub loader: u8,
    /// The raw module format flag. See [`ModuleFormat::from_raw`].
    pub module_format: u8,
    /// The raw side flag. See [`Side::from_raw`].
    pub side: u8,
}

impl ModuleRecord {
    /// Return the range of a field, or `None` if the record layout lacks it.
    pub fn field(&self, kind: FieldKind) -> Option<ByteRange> {
        match kind {
            FieldKind::Name => Some(self.name),
            FieldKind::Contents => Some(self.contents),
            FieldKind::SourceMap => Some(self.source_map),
            FieldKind::Bytecode => Some(self.bytecode),
            FieldKind::ModuleInfo => self.module_info,
            FieldKind::BytecodeOriginPath => self.bytecode_origin_path,
        }
    }

    fn parse_v1(raw: &format::ModuleV1, limit: usize) -> Result<Self> {
        Ok(ModuleRecord {
            name: ByteRange::from_pointer(&raw.name, limit)?,
            contents: ByteRange::from_pointer(&raw.contents, limit)?,
            source_map: ByteRange::from_pointer(&raw.sourcemap, limit)?,
            bytecode: ByteRange::from_pointer(&raw.bytecode, limit)?,
            module_info: None,
            bytecode_origin_path: None,
            encoding: raw.encoding,
            loader: raw.loader,
            module_format: raw.module_format,
            side: raw.side,
        })
    }

    fn parse_v2(raw: &format::ModuleV2, limit: usize) -> Result<Self> {
        Ok(ModuleRecord {
            name: ByteRange::from_pointer(&raw.name, limit)?,
            contents: ByteRange::from_pointer(&raw.contents, limit)?,
            source_map: ByteRange::from_pointer(&raw.sourcemap, limit)?,
            bytecode: ByteRange::from_pointer(&raw.bytecode, limit)?,
            module_info: Some(ByteRange::from_pointer(&raw.module_info, limit)?),
            bytecode_origin_path: Some(ByteRange::from_pointer(
                &raw.bytecode_origin_path,
                limit,
            )?),
            encoding: raw.encoding,
            loader: raw.loader,
            module_format: raw.module_format,
            side: raw.side,
        })
    }
}

/// The fixed header that locates the module table and compile arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetsHeader {
    /// The archive length recorded by the writer.
    pub total_byte_count: u64,
    /// The module table.
    pub module_table: ByteRange,
    /// Index of the entry point module.
    pub entry_module_id: u32,
    /// The compile arguments, excluding the NUL terminator.
    pub compile_args: ByteRange,
    /// Archive flags.
    pub flags: u32,
}

impl OffsetsHeader {
    fn parse(raw: &format::Offsets, limit: usize) -> Result<Self> {
        Ok(OffsetsHeader {
            total_byte_count: raw.byte_count.get(LE),
            module_table: ByteRange::from_pointer(&raw.modules_ptr, limit)?,
            entry_module_id: raw.entry_point_id.get(LE),
            compile_args: ByteRange::from_pointer(&raw.compile_exec_argv_ptr, limit)?,
            flags: raw.flags.get(LE),
        })
    }
}

/// A fully decoded module archive.
#[derive(Debug, Clone)]
pub struct Archive<'data> {
    data: &'data [u8],
    header: OffsetsHeader,
    schema: Schema,
    modules: Vec<ModuleRecord>,
}

impl<'data> Archive<'data> {
    /// Parse an archive from its exact bytes, ending with the trailer.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        if !data.ends_with(&format::TRAILER) {
            return Err(Error::new(
                ErrorKind::TrailerMismatch,
                "Archive does not end with the expected trailer",
            ));
        }
        let data_len = data
            .len()
            .checked_sub(format::SIZEOF_OFFSETS + format::TRAILER.len())
            .ok_or_else(|| Error::malformed("Archive is too short for its header"))?;
        let raw_header = data
            .read_at::<format::Offsets>(data_len as u64)
            .map_err(|()| Error::malformed("Invalid archive header"))?;
        let header = OffsetsHeader::parse(raw_header, data_len)?;
        if header.total_byte_count != data.len() as u64 {
            return Err(Error::malformed(format!(
                "Archive header records {} bytes but the archive is {} bytes",
                header.total_byte_count,
                data.len()
            )));
        }

        let table_length = header.module_table.length() as usize;
        let schema = Schema::infer(table_length)?;
        #[cfg(feature = "logging")]
        debug!(
            "Module table has {} bytes, using {:?} records",
            table_length, schema
        );
        let modules = decode_modules(&data[..data_len], header.module_table, schema)?;
        Ok(Archive {
            data,
            header,
            schema,
            modules,
        })
    }

    /// The archive bytes, including the header and trailer.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// The offsets header.
    pub fn header(&self) -> &OffsetsHeader {
        &self.header
    }

    /// The module record layout.
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// The modules, in table order.
    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    /// The module the header names as the entry point, if the index is valid.
    pub fn entry_module(&self) -> Option<&ModuleRecord> {
        self.modules.get(self.header.entry_module_id as usize)
    }

    /// The compile arguments.
    pub fn compile_args(&self) -> &'data [u8] {
        self.bytes(self.header.compile_args)
    }

    /// Return the bytes of a range decoded from this archive.
    pub fn bytes(&self, range: ByteRange) -> &'data [u8] {
        let start = range.offset as usize;
        let end = start + range.length as usize;
        self.data.get(start..end).unwrap_or(&[])
    }

    /// Return the bytes of a module field, or `None` if the layout lacks it.
    pub fn field_bytes(&self, module: &ModuleRecord, kind: FieldKind) -> Option<&'data [u8]> {
        module.field(kind).map(|range| self.bytes(range))
    }

    /// Return the index of the first module with the given name.
    pub fn module_by_name(&self, name: &[u8]) -> Option<usize> {
        self.modules
            .iter()
            .position(|module| self.bytes(module.name) == name)
    }
}

/// Decode every record of the module table.
///
/// `data` is the region preceding the offsets header; every range must lie within it.
pub fn decode_modules(data: &[u8], table: ByteRange, schema: Schema) -> Result<Vec<ModuleRecord>> {
    let record_size = schema.record_size();
    let count = table.length() as usize / record_size;
    let mut modules = Vec::with_capacity(count);
    for index in 0..count {
        let offset = u64::from(table.offset()) + (index * record_size) as u64;
        let module = match schema {
            Schema::V1 => data
                .read_at::<format::ModuleV1>(offset)
                .map_err(|()| Error::malformed(format!("Invalid module record {}", index)))
                .and_then(|raw| ModuleRecord::parse_v1(raw, data.len()))?,
            Schema::V2 => data
                .read_at::<format::ModuleV2>(offset)
                .map_err(|()| Error::malformed(format!("Invalid module record {}", index)))
                .and_then(|raw| ModuleRecord::parse_v2(raw, data.len()))?,
        };
        modules.push(module);
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebuild::{ArchiveWriter, ModuleSource};

    fn sample(schema: Schema) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(schema);
        writer.add_module(ModuleSource {
            name: b"/$bunfs/root/a.js",
            contents: b"console.log(1)",
            module_format: format::FORMAT_ESM,
            encoding: format::ENCODING_UTF8,
            ..ModuleSource::default()
        });
        writer.add_module(ModuleSource {
            name: b"/$bunfs/root/b.js",
            contents: b"export {}",
            source_map: b"{}",
            ..ModuleSource::default()
        });
        writer.set_compile_args(b"--smol");
        writer.set_entry_module_id(1);
        writer.write().unwrap()
    }

    #[test]
    fn parse_v1() {
        let data = sample(Schema::V1);
        let archive = Archive::parse(&data).unwrap();
        assert_eq!(archive.schema(), Schema::V1);
        assert_eq!(archive.modules().len(), 2);
        let a = &archive.modules()[0];
        assert_eq!(archive.bytes(a.name), b"/$bunfs/root/a.js");
        assert_eq!(archive.bytes(a.contents), b"console.log(1)");
        assert_eq!(a.module_info, None);
        assert_eq!(Encoding::from_raw(a.encoding), Some(Encoding::Utf8));
        assert_eq!(ModuleFormat::from_raw(a.module_format), Some(ModuleFormat::Esm));
        assert_eq!(archive.compile_args(), b"--smol");
        let entry = archive.entry_module().unwrap();
        assert_eq!(archive.bytes(entry.source_map), b"{}");
        assert_eq!(archive.header().total_byte_count, data.len() as u64);
    }

    #[test]
    fn parse_v2() {
        let data = sample(Schema::V2);
        let archive = Archive::parse(&data).unwrap();
        assert_eq!(archive.schema(), Schema::V2);
        let b = &archive.modules()[1];
        assert_eq!(b.module_info.map(|r| r.length()), Some(0));
        assert_eq!(archive.module_by_name(b"/$bunfs/root/b.js"), Some(1));
        assert_eq!(archive.module_by_name(b"missing"), None);
    }

    #[test]
    fn infer_schema() {
        assert_eq!(Schema::infer(36).unwrap(), Schema::V1);
        assert_eq!(Schema::infer(72).unwrap(), Schema::V1);
        assert_eq!(Schema::infer(52).unwrap(), Schema::V2);
        assert_eq!(Schema::infer(104).unwrap(), Schema::V2);
        assert_eq!(
            Schema::infer(50).unwrap_err().kind(),
            ErrorKind::StructSizeAmbiguous
        );
    }

    #[test]
    fn infer_schema_tie_break() {
        // 468 is 13 records of 36 bytes and 9 records of 52 bytes.
        assert_eq!(468 % 36, 0);
        assert_eq!(468 % 52, 0);
        assert_eq!(Schema::infer(468).unwrap(), Schema::V2);
        assert_eq!(Schema::infer(0).unwrap(), Schema::V2);
    }

    #[test]
    fn ambiguous_table_length() {
        let mut data = sample(Schema::V1);
        // Shrink the module table pointer by one byte.
        let header = data.len() - format::SIZEOF_OFFSETS - format::TRAILER.len();
        let length_offset = header + 8 + 4;
        let length = u32::from_le_bytes(data[length_offset..length_offset + 4].try_into().unwrap());
        data[length_offset..length_offset + 4].copy_from_slice(&(length - 1).to_le_bytes());
        let err = Archive::parse(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructSizeAmbiguous);
    }

    #[test]
    fn range_out_of_bounds() {
        let mut data = sample(Schema::V2);
        // Point the first module's contents past the data region.
        let header = data.len() - format::SIZEOF_OFFSETS - format::TRAILER.len();
        let table = u32::from_le_bytes(data[header + 8..header + 12].try_into().unwrap()) as usize;
        data[table + 8..table + 12].copy_from_slice(&(header as u32).to_le_bytes());
        let err = Archive::parse(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn byte_count_mismatch() {
        let mut data = sample(Schema::V2);
        let header = data.len() - format::SIZEOF_OFFSETS - format::TRAILER.len();
        data[header..header + 8].copy_from_slice(&12345u64.to_le_bytes());
        let err = Archive::parse(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn trailer_mismatch() {
        let mut data = sample(Schema::V2);
        let last = data.len() - 2;
        data[last] ^= 0xff;
        let err = Archive::parse(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrailerMismatch);

        let err = Archive::parse(&format::TRAILER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}
