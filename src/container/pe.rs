use object::{Object, ObjectSection};

use super::{section_not_found, Container, Format, ReservedRange};
use crate::blob::LengthPlacement;
use crate::format::PE_SECTION;
use crate::repack::RepackStrategy;
use crate::{Error, Result};

/// PE executables carry the archive in the `.bun` section.
///
/// The usable size is the smaller of the virtual size and the raw data size.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeContainer;

impl Container for PeContainer {
    fn format(&self) -> Format {
        Format::Pe
    }

    fn reserved_range(&self, data: &[u8]) -> Result<ReservedRange> {
        let file = object::File::parse(data).map_err(Error::object)?;
        let section = file
            .sections()
            .find(|section| section.name().ok() == Some(PE_SECTION))
            .ok_or_else(|| section_not_found(Format::Pe, PE_SECTION))?;
        let (offset, size) = section
            .file_range()
            .ok_or_else(|| Error::malformed(format!("{} section has no file data", PE_SECTION)))?;
        Ok(ReservedRange {
            offset,
            size,
            placement: LengthPlacement::Leading,
        })
    }

    fn strategy(&self) -> RepackStrategy {
        RepackStrategy::FixedCapacity
    }
}
