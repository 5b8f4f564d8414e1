//! Finding the archive within a host executable.
//!
//! The format is identified once from its magic bytes by [`classify`], and
//! [`for_format`] selects the [`Container`] strategy used for every later step.

use std::fmt;
use std::path::Path;

#[cfg(feature = "logging")]
use log::debug;

use crate::blob::{Blob, HeaderWidth, LengthPlacement};
use crate::repack::{RepackStrategy, ResignHook};
use crate::{Error, ErrorKind, Result};

mod elf;
pub use elf::ElfContainer;

mod macho;
pub use macho::MachOContainer;

mod pe;
pub use pe::PeContainer;

/// A host executable format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// ELF, with the archive in a trailing overlay.
    Elf,
    /// Mach-O, with the archive in the `__BUN,__bun` section.
    MachO,
    /// PE, with the archive in the `.bun` section.
    Pe,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Elf => "ELF",
            Format::MachO => "Mach-O",
            Format::Pe => "PE",
        })
    }
}

/// Identify the executable format from its magic bytes.
pub fn classify(data: &[u8]) -> Result<Format> {
    if data.starts_with(&object::elf::ELFMAG) {
        return Ok(Format::Elf);
    }
    if let Some(magic) = data.get(..4) {
        let magic = u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]);
        match magic {
            object::macho::MH_MAGIC
            | object::macho::MH_CIGAM
            | object::macho::MH_MAGIC_64
            | object::macho::MH_CIGAM_64 => return Ok(Format::MachO),
            _ => {}
        }
    }
    if let Some(magic) = data.get(..2) {
        if u16::from_le_bytes([magic[0], magic[1]]) == object::pe::IMAGE_DOS_SIGNATURE {
            return Ok(Format::Pe);
        }
    }
    Err(Error::new(
        ErrorKind::UnsupportedFormat,
        "File is not an ELF, Mach-O or PE executable",
    ))
}

/// Return true if the data should be handled as an executable rather than a script.
pub fn is_candidate_container(data: &[u8]) -> bool {
    classify(data).is_ok()
}

/// Return the strategy for a format.
pub fn for_format(format: Format) -> Box<dyn Container> {
    match format {
        Format::Elf => Box::new(ElfContainer),
        Format::MachO => Box::new(MachOContainer),
        Format::Pe => Box::new(PeContainer),
    }
}

/// The file range a container reserves for the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRange {
    /// The file offset of the range.
    pub offset: u64,
    /// The size of the range.
    pub size: u64,
    /// Where the archive length is stored within the range.
    pub placement: LengthPlacement,
}

/// Format specific handling of a host executable.
pub trait Container: fmt::Debug {
    /// The format this strategy handles.
    fn format(&self) -> Format;

    /// Find the file range reserved for the archive.
    ///
    /// Fails with [`ErrorKind::SectionNotFound`] if the container has no such range.
    fn reserved_range(&self, data: &[u8]) -> Result<ReservedRange>;

    /// How a rebuilt archive is written back.
    fn strategy(&self) -> RepackStrategy;

    /// Run after the rewritten file has been moved into place.
    fn post_repack(&self, _path: &Path, _hook: &dyn ResignHook) -> Result<()> {
        Ok(())
    }
}

/// Where the archive sits within the host executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLocation {
    /// The host format.
    pub format: Format,
    /// The file offset that the repacker overwrites from.
    ///
    /// For an overlay, this is the start of the archive. For a section, this is the
    /// start of the section, where the length field is.
    pub file_offset: u64,
    /// The number of bytes from `file_offset` that belong to the archive.
    ///
    /// For a section, this is the section size, and includes the length field.
    pub reserved_capacity: u64,
    /// The width of the archive length field.
    pub header_width: HeaderWidth,
    /// Where the archive length is stored.
    pub placement: LengthPlacement,
}

/// Find the archive within a host executable.
pub fn locate<'data>(
    container: &dyn Container,
    data: &'data [u8],
) -> Result<(ContainerLocation, Blob<'data>)> {
    let range = container.reserved_range(data)?;
    let start = usize::try_from(range.offset).ok();
    let end = range
        .offset
        .checked_add(range.size)
        .and_then(|end| usize::try_from(end).ok());
    let raw = match (start, end) {
        (Some(start), Some(end)) => data.get(start..end),
        _ => None,
    }
    .ok_or_else(|| {
        Error::malformed(format!(
            "Archive range {:#x}+{:#x} exceeds file size {:#x}",
            range.offset,
            range.size,
            data.len()
        ))
    })?;

    let blob = Blob::parse(raw, range.placement)?;
    let location = match range.placement {
        LengthPlacement::Trailing => {
            let file_offset = range.offset + blob.offset as u64;
            ContainerLocation {
                format: container.format(),
                file_offset,
                reserved_capacity: range.offset + range.size - file_offset,
                header_width: blob.header_width,
                placement: range.placement,
            }
        }
        LengthPlacement::Leading => ContainerLocation {
            format: container.format(),
            file_offset: range.offset,
            reserved_capacity: range.size,
            header_width: blob.header_width,
            placement: range.placement,
        },
    };
    #[cfg(feature = "logging")]
    debug!(
        "{} archive at {:#x}, {} bytes reserved",
        location.format, location.file_offset, location.reserved_capacity
    );
    Ok((location, blob))
}

fn section_not_found(format: Format, name: &str) -> Error {
    Error::new(
        ErrorKind::SectionNotFound,
        format!("{} file has no {} section", format, name),
    )
}
