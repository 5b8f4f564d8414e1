use std::path::Path;

#[cfg(feature = "logging")]
use log::debug;
use object::{Object, ObjectSection};

use super::{section_not_found, Container, Format, ReservedRange};
use crate::blob::LengthPlacement;
use crate::format::{MACHO_SECTION, MACHO_SEGMENT};
use crate::repack::{RepackStrategy, ResignHook};
use crate::{Error, Result};

/// Mach-O executables carry the archive in the `__BUN,__bun` section.
///
/// The section cannot grow, and the file must be signed again after it changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachOContainer;

impl Container for MachOContainer {
    fn format(&self) -> Format {
        Format::MachO
    }

    fn reserved_range(&self, data: &[u8]) -> Result<ReservedRange> {
        let file = object::File::parse(data).map_err(Error::object)?;
        let section = file
            .sections()
            .find(|section| {
                section.segment_name().ok().flatten() == Some(MACHO_SEGMENT)
                    && section.name().ok() == Some(MACHO_SECTION)
            })
            .ok_or_else(|| {
                section_not_found(Format::MachO, &format!("{},{}", MACHO_SEGMENT, MACHO_SECTION))
            })?;
        let (offset, size) = section.file_range().ok_or_else(|| {
            Error::malformed(format!(
                "{},{} section has no file data",
                MACHO_SEGMENT, MACHO_SECTION
            ))
        })?;
        Ok(ReservedRange {
            offset,
            size,
            placement: LengthPlacement::Leading,
        })
    }

    fn strategy(&self) -> RepackStrategy {
        RepackStrategy::FixedCapacity
    }

    fn post_repack(&self, path: &Path, hook: &dyn ResignHook) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!("Signing {}", path.display());
        hook.resign(path)
    }
}
