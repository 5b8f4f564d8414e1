//! Finding the archive bytes within the raw range a container reserves for it.
//!
//! An ELF overlay stores the archive followed by its length. Mach-O and PE sections
//! store the length followed by the archive, and the section may be padded.
//! Older runtimes wrote the length as 4 bytes, newer ones as 8 bytes.

#[cfg(feature = "logging")]
use log::debug;
use object::{LittleEndian as LE, ReadRef, U32Bytes, U64Bytes};

use crate::archive::Archive;
use crate::format;
use crate::{Error, ErrorKind, Result};

/// Where the archive length is stored relative to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPlacement {
    /// The length follows the archive at the very end of the range.
    Trailing,
    /// The length precedes the archive at the start of the range.
    Leading,
}

/// The width of the archive length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWidth {
    /// A 4 byte length.
    U32,
    /// An 8 byte length.
    U64,
}

impl HeaderWidth {
    /// The size of the length field in bytes.
    pub fn size(self) -> usize {
        match self {
            HeaderWidth::U32 => 4,
            HeaderWidth::U64 => 8,
        }
    }

    /// Encode a length, failing if it does not fit.
    pub fn encode(self, length: u64) -> Result<Vec<u8>> {
        match self {
            HeaderWidth::U32 => {
                let length = u32::try_from(length).map_err(|_| {
                    Error::new(
                        ErrorKind::ArchiveTooLarge,
                        format!("Archive length {:#x} does not fit in 4 bytes", length),
                    )
                })?;
                Ok(length.to_le_bytes().to_vec())
            }
            HeaderWidth::U64 => Ok(length.to_le_bytes().to_vec()),
        }
    }

    fn read(self, data: &[u8], offset: usize) -> Option<u64> {
        match self {
            HeaderWidth::U32 => data
                .read_at::<U32Bytes<LE>>(offset as u64)
                .ok()
                .map(|value| u64::from(value.get(LE))),
            HeaderWidth::U64 => data
                .read_at::<U64Bytes<LE>>(offset as u64)
                .ok()
                .map(|value| value.get(LE)),
        }
    }
}

/// The archive bytes found within a raw range.
#[derive(Debug, Clone, Copy)]
pub struct Blob<'data> {
    /// The archive, from the first string byte to the end of the trailer.
    pub data: &'data [u8],
    /// The offset of `data` within the raw range.
    pub offset: usize,
    /// The width of the length field.
    pub header_width: HeaderWidth,
}

impl<'data> Blob<'data> {
    /// Find the archive within `raw`.
    ///
    /// For a leading length, the 8 byte reading is preferred when it accounts for the
    /// range to within [`format::SECTION_PADDING_TOLERANCE`] bytes. Otherwise the
    /// 4 byte reading is tried, and finally an 8 byte reading with more padding.
    /// A candidate is only accepted if it ends with the trailer.
    pub fn parse(raw: &'data [u8], placement: LengthPlacement) -> Result<Self> {
        let candidates: &[(HeaderWidth, bool)] = match placement {
            LengthPlacement::Trailing => &[(HeaderWidth::U64, false), (HeaderWidth::U32, false)],
            LengthPlacement::Leading => &[
                (HeaderWidth::U64, true),
                (HeaderWidth::U32, false),
                (HeaderWidth::U64, false),
            ],
        };

        let mut fits = false;
        for &(width, tolerance) in candidates {
            let Some(blob) = Self::candidate(raw, placement, width, tolerance) else {
                continue;
            };
            fits = true;
            if blob.data.ends_with(&format::TRAILER) {
                #[cfg(feature = "logging")]
                debug!(
                    "Found {} byte archive with {} byte length at offset {:#x}",
                    blob.data.len(),
                    width.size(),
                    blob.offset
                );
                return Ok(blob);
            }
        }
        if fits {
            Err(Error::new(
                ErrorKind::TrailerMismatch,
                "Archive does not end with the expected trailer",
            ))
        } else {
            Err(Error::malformed(format!(
                "No archive length fits within {} bytes",
                raw.len()
            )))
        }
    }

    fn candidate(
        raw: &'data [u8],
        placement: LengthPlacement,
        width: HeaderWidth,
        tolerance: bool,
    ) -> Option<Self> {
        let size = width.size();
        match placement {
            LengthPlacement::Trailing => {
                let length_offset = raw.len().checked_sub(size)?;
                let length = usize::try_from(width.read(raw, length_offset)?).ok()?;
                let offset = length_offset.checked_sub(length)?;
                Some(Blob {
                    data: &raw[offset..length_offset],
                    offset,
                    header_width: width,
                })
            }
            LengthPlacement::Leading => {
                let length = width.read(raw, 0)?;
                let end = length.checked_add(size as u64)?;
                if end > raw.len() as u64 {
                    return None;
                }
                if tolerance && raw.len() as u64 - end > format::SECTION_PADDING_TOLERANCE {
                    return None;
                }
                Some(Blob {
                    data: &raw[size..end as usize],
                    offset: size,
                    header_width: width,
                })
            }
        }
    }
}

/// Find and decode the archive within `raw`.
pub fn parse_blob(raw: &[u8], placement: LengthPlacement) -> Result<Archive<'_>> {
    let blob = Blob::parse(raw, placement)?;
    Archive::parse(blob.data)
}
