//! On-disk definitions for the standalone module archive.
//!
//! These definitions are independent of read/write support, although we do implement
//! some traits useful for those.
//!
//! The archive is laid out as:
//!
//! ```text
//! string data | module table | compile arguments | Offsets | TRAILER
//! ```
//!
//! All integers are little endian. Every pointer is relative to the start of the
//! archive.

use object::pod::Pod;
use object::{LittleEndian as LE, U32Bytes, U64Bytes};

/// The sentinel at the end of every archive.
pub const TRAILER: [u8; 16] = *b"\n---- Bun! ----\n";

/// The size of [`Offsets`].
pub const SIZEOF_OFFSETS: usize = 32;

/// The size of a module record using [`ModuleV1`].
pub const SIZEOF_MODULE_V1: usize = 36;

/// The size of a module record using [`ModuleV2`].
pub const SIZEOF_MODULE_V2: usize = 52;

/// Section headers may be padded by up to this many bytes beyond the archive.
pub const SECTION_PADDING_TOLERANCE: u64 = 4096;

/// The Mach-O segment holding the archive.
pub const MACHO_SEGMENT: &str = "__BUN";

/// The Mach-O section holding the archive.
pub const MACHO_SECTION: &str = "__bun";

/// The PE section holding the archive.
pub const PE_SECTION: &str = ".bun";

/// Name prefix of modules in the virtual filesystem on Unix hosts.
pub const BUNFS_ROOT: &[u8] = b"/$bunfs/root/";

/// Name prefix of modules in the virtual filesystem on Windows hosts.
pub const BUNFS_ROOT_WINDOWS: &[u8] = b"B:/~BUN/root/";

/// A byte range within the archive.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct StringPointer {
    /// Offset from the start of the archive.
    pub offset: U32Bytes<LE>,
    /// Length in bytes, excluding the NUL terminator.
    pub length: U32Bytes<LE>,
}

/// The fixed header immediately preceding [`TRAILER`].
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Offsets {
    /// Length of the whole archive, including this header and the trailer.
    pub byte_count: U64Bytes<LE>,
    /// The module table.
    pub modules_ptr: StringPointer,
    /// Index of the entry point module.
    pub entry_point_id: U32Bytes<LE>,
    /// Arguments the executable was compiled with.
    pub compile_exec_argv_ptr: StringPointer,
    /// Archive flags.
    pub flags: U32Bytes<LE>,
}

/// A module record in the original 36 byte layout.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ModuleV1 {
    /// The module path in the virtual filesystem.
    pub name: StringPointer,
    /// The module source.
    pub contents: StringPointer,
    /// The serialized source map.
    pub sourcemap: StringPointer,
    /// Precompiled bytecode.
    pub bytecode: StringPointer,
    /// One of the `ENCODING_*` constants.
    pub encoding: u8,
    /// The loader used for the module, as numbered by the runtime.
    pub loader: u8,
    /// One of the `FORMAT_*` constants.
    pub module_format: u8,
    /// One of the `SIDE_*` constants.
    pub side: u8,
}

/// A module record in the extended 52 byte layout.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ModuleV2 {
    /// The module path in the virtual filesystem.
    pub name: StringPointer,
    /// The module source.
    pub contents: StringPointer,
    /// The serialized source map.
    pub sourcemap: StringPointer,
    /// Precompiled bytecode.
    pub bytecode: StringPointer,
    /// Serialized module metadata.
    pub module_info: StringPointer,
    /// The path the bytecode was compiled from.
    pub bytecode_origin_path: StringPointer,
    /// One of the `ENCODING_*` constants.
    pub encoding: u8,
    /// The loader used for the module, as numbered by the runtime.
    pub loader: u8,
    /// One of the `FORMAT_*` constants.
    pub module_format: u8,
    /// One of the `SIDE_*` constants.
    pub side: u8,
}

unsafe impl Pod for StringPointer {}
unsafe impl Pod for Offsets {}
unsafe impl Pod for ModuleV1 {}
unsafe impl Pod for ModuleV2 {}

// Values of `encoding`.
/// Arbitrary bytes.
pub const ENCODING_BINARY: u8 = 0;
/// Latin-1 text.
pub const ENCODING_LATIN1: u8 = 1;
/// UTF-8 text.
pub const ENCODING_UTF8: u8 = 2;

// Values of `module_format`.
/// Not a JavaScript module.
pub const FORMAT_NONE: u8 = 0;
/// An ECMAScript module.
pub const FORMAT_ESM: u8 = 1;
/// A CommonJS module.
pub const FORMAT_CJS: u8 = 2;

// Values of `side`.
/// Server-side module.
pub const SIDE_SERVER: u8 = 0;
/// Client-side module.
pub const SIDE_CLIENT: u8 = 1;
