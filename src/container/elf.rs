use std::mem;

use object::elf;
use object::read::elf::{FileHeader, ProgramHeader, SectionHeader};
use object::{Endianness, FileKind};

use super::{Container, Format, ReservedRange};
use crate::blob::LengthPlacement;
use crate::repack::RepackStrategy;
use crate::{Error, ErrorKind, Result};

/// ELF executables carry the archive in an overlay after all other file contents.
///
/// The overlay is not described by any header, so it may grow or shrink freely.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElfContainer;

impl Container for ElfContainer {
    fn format(&self) -> Format {
        Format::Elf
    }

    fn reserved_range(&self, data: &[u8]) -> Result<ReservedRange> {
        let kind = FileKind::parse(data).map_err(Error::object)?;
        let end = match kind {
            FileKind::Elf32 => structure_end::<elf::FileHeader32<Endianness>>(data)?,
            FileKind::Elf64 => structure_end::<elf::FileHeader64<Endianness>>(data)?,
            _ => return Err(Error::malformed("Not an ELF file")),
        };
        let len = data.len() as u64;
        if end >= len {
            return Err(Error::new(
                ErrorKind::SectionNotFound,
                "ELF file has no overlay",
            ));
        }
        Ok(ReservedRange {
            offset: end,
            size: len - end,
            placement: LengthPlacement::Trailing,
        })
    }

    fn strategy(&self) -> RepackStrategy {
        RepackStrategy::Overlay
    }
}

/// Return the end of the last byte described by the ELF headers.
fn structure_end<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Result<u64> {
    let header = Elf::parse(data).map_err(Error::object)?;
    let endian = header.endian().map_err(Error::object)?;
    let mut end = mem::size_of::<Elf>() as u64;

    let phnum = header.phnum(endian, data).map_err(Error::object)? as u64;
    if phnum != 0 {
        let phoff: u64 = header.e_phoff(endian).into();
        end = end.max(phoff.saturating_add(phnum * u64::from(header.e_phentsize(endian))));
    }
    for segment in header.program_headers(endian, data).map_err(Error::object)? {
        let offset: u64 = segment.p_offset(endian).into();
        let size: u64 = segment.p_filesz(endian).into();
        end = end.max(offset.saturating_add(size));
    }

    let shnum = header.shnum(endian, data).map_err(Error::object)? as u64;
    if shnum != 0 {
        let shoff: u64 = header.e_shoff(endian).into();
        end = end.max(shoff.saturating_add(shnum * u64::from(header.e_shentsize(endian))));
    }
    let sections = header.sections(endian, data).map_err(Error::object)?;
    for section in sections.iter() {
        if section.sh_type(endian) == elf::SHT_NOBITS {
            continue;
        }
        let offset: u64 = section.sh_offset(endian).into();
        let size: u64 = section.sh_size(endian).into();
        end = end.max(offset.saturating_add(size));
    }
    Ok(end)
}
