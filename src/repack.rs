//! Writing a rebuilt archive back into its host executable.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use crate::blob::LengthPlacement;
use crate::container::{ContainerLocation, Format};
use crate::{Error, ErrorKind, Result};

/// How a rebuilt archive replaces the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepackStrategy {
    /// Replace the trailing overlay. The file length follows the archive length.
    Overlay,
    /// Overwrite the reserved section and pad it with zeros. The file length is unchanged.
    FixedCapacity,
}

/// Signs an executable after it has been rewritten.
pub trait ResignHook: std::fmt::Debug {
    /// Sign the file at `path` in place.
    fn resign(&self, path: &Path) -> Result<()>;
}

/// Ad-hoc signing with the system `codesign` tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codesign;

impl ResignHook for Codesign {
    fn resign(&self, path: &Path) -> Result<()> {
        let output = Command::new("codesign")
            .args(["--force", "--sign", "-"])
            .arg(path)
            .output()
            .map_err(|e| Error::resign(format!("Failed to run codesign: {}", e)))?;
        if !output.status.success() {
            return Err(Error::resign(format!(
                "codesign failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Return a copy of `data` with the archive replaced.
///
/// Nothing is returned for a fixed capacity container if the archive does not fit.
pub fn repack(
    data: &[u8],
    location: &ContainerLocation,
    strategy: RepackStrategy,
    archive: &[u8],
) -> Result<Vec<u8>> {
    let start = usize::try_from(location.file_offset)
        .ok()
        .filter(|start| *start <= data.len())
        .ok_or_else(|| Error::malformed("Archive offset exceeds file size"))?;
    let length = location.header_width.encode(archive.len() as u64)?;
    match strategy {
        RepackStrategy::Overlay => {
            debug_assert_eq!(location.placement, LengthPlacement::Trailing);
            let mut out = Vec::with_capacity(start + archive.len() + length.len());
            out.extend_from_slice(&data[..start]);
            out.extend_from_slice(archive);
            out.extend_from_slice(&length);
            Ok(out)
        }
        RepackStrategy::FixedCapacity => {
            debug_assert_eq!(location.placement, LengthPlacement::Leading);
            let needed = (length.len() + archive.len()) as u64;
            if needed > location.reserved_capacity {
                return Err(Error::new(
                    ErrorKind::SizeOverflow,
                    format!(
                        "Rebuilt archive needs {} bytes but the {} section holds {}",
                        needed, location.format, location.reserved_capacity
                    ),
                ));
            }
            let end = usize::try_from(location.reserved_capacity)
                .ok()
                .and_then(|capacity| start.checked_add(capacity))
                .filter(|end| *end <= data.len())
                .ok_or_else(|| Error::malformed("Archive section exceeds file size"))?;
            let mut out = data.to_vec();
            let section_out = &mut out[start..end];
            section_out[..length.len()].copy_from_slice(&length);
            section_out[length.len()..needed as usize].copy_from_slice(archive);
            section_out[needed as usize..].fill(0);
            Ok(out)
        }
    }
}

/// Write `data` to `path` through a temporary file in the same directory.
///
/// The file is renamed over `path` once it is complete. If `permissions` is given it
/// is applied before the rename.
pub fn write_atomic(path: &Path, data: &[u8], permissions: Option<fs::Permissions>) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".standalone-archive")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.persist(path).map_err(|e| Error::io(e.error))?;
    Ok(())
}

/// The result of writing a rebuilt archive.
#[derive(Debug)]
pub struct RepackReport {
    /// The host format, or `None` for a plain script file.
    pub format: Option<Format>,
    /// The archive length written, excluding any length field or padding.
    pub archive_len: u64,
    /// The length of the written file.
    pub file_len: u64,
    /// The error from signing the file, if it failed.
    ///
    /// The file is still written when this is set.
    pub resign_error: Option<Error>,
}
