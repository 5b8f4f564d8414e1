//! Extracting and substituting module payloads in files.
//!
//! A file is either a host executable with an embedded archive, or a plain
//! bundled script. [`Rewriter`] handles both from bytes in memory, and
//! [`extract`], [`substitute`] and [`substitute_all`] wrap it for files on disk.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use log::{info, warn};

use crate::archive::{Archive, FieldKind};
use crate::container::{self, Container, ContainerLocation, Format};
use crate::locate::{self, ModulePredicate};
use crate::rebuild::rebuild;
use crate::repack::{repack, write_atomic, Codesign, RepackReport, ResignHook};
use crate::{Error, Result};

/// Identifies a module within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    /// The index of the module in the table. Always 0 for a script.
    pub index: usize,
    /// The module name, or the file name for a script.
    pub name: Vec<u8>,
}

/// A payload read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// The field contents.
    pub payload: Vec<u8>,
    /// The module holding the payload.
    pub module: ModuleIdentity,
    /// The field holding the payload.
    pub field: FieldKind,
}

/// The file contents after a substitution.
#[derive(Debug, Clone)]
pub struct Replacement {
    /// The complete new file.
    pub data: Vec<u8>,
    /// The length of the rebuilt archive, or of the script.
    pub archive_len: u64,
}

/// The result of a substitution.
#[derive(Debug)]
pub enum Outcome {
    /// The file was rewritten.
    Written(RepackReport),
    /// The payload was already in place and nothing was written.
    Unchanged,
}

/// Options for [`substitute`] and [`substitute_all`].
#[derive(Debug)]
#[non_exhaustive]
pub struct SubstituteOptions {
    /// Write to this path instead of rewriting the input.
    ///
    /// Ignored by [`substitute_all`].
    pub output: Option<PathBuf>,
    /// Copy the input before its first rewrite.
    ///
    /// An existing copy is never overwritten. No copy is made when
    /// `output` names another file, since the input is left as it is.
    pub backup: bool,
    /// Appended to the input path to name the copy.
    pub backup_suffix: OsString,
    /// Sign Mach-O files after they are written.
    pub resign: bool,
    /// The signing hook. [`Codesign`] is used if this is `None`.
    pub resign_hook: Option<Box<dyn ResignHook>>,
}

impl Default for SubstituteOptions {
    fn default() -> Self {
        SubstituteOptions {
            output: None,
            backup: false,
            backup_suffix: OsString::from(".backup"),
            resign: true,
            resign_hook: None,
        }
    }
}

impl SubstituteOptions {
    fn hook(&self) -> Option<&dyn ResignHook> {
        if !self.resign {
            return None;
        }
        Some(self.resign_hook.as_deref().unwrap_or(&Codesign))
    }
}

#[derive(Debug)]
enum Host<'data> {
    Container {
        container: Box<dyn Container>,
        location: ContainerLocation,
        archive: Archive<'data>,
    },
    Script {
        name: Vec<u8>,
    },
}

/// A parsed file that payloads can be read from and substituted into.
#[derive(Debug)]
pub struct Rewriter<'data> {
    data: &'data [u8],
    host: Host<'data>,
}

impl<'data> Rewriter<'data> {
    /// Parse the contents of the file at `path`.
    ///
    /// Data that is not an ELF, Mach-O or PE file is treated as a script, and is
    /// identified by the file name of `path`.
    pub fn parse(data: &'data [u8], path: &Path) -> Result<Self> {
        if !container::is_candidate_container(data) {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned().into_bytes())
                .unwrap_or_default();
            return Ok(Rewriter {
                data,
                host: Host::Script { name },
            });
        }
        let format = container::classify(data)?;
        let container = container::for_format(format);
        let (location, blob) = container::locate(&*container, data)?;
        let archive = Archive::parse(blob.data)?;
        Ok(Rewriter {
            data,
            host: Host::Container {
                container,
                location,
                archive,
            },
        })
    }

    /// The host format, or `None` for a script.
    pub fn format(&self) -> Option<Format> {
        match &self.host {
            Host::Container { location, .. } => Some(location.format),
            Host::Script { .. } => None,
        }
    }

    /// The embedded archive, or `None` for a script.
    pub fn archive(&self) -> Option<&Archive<'data>> {
        match &self.host {
            Host::Container { archive, .. } => Some(archive),
            Host::Script { .. } => None,
        }
    }

    /// Where the archive sits in the file, or `None` for a script.
    pub fn location(&self) -> Option<&ContainerLocation> {
        match &self.host {
            Host::Container { location, .. } => Some(location),
            Host::Script { .. } => None,
        }
    }

    /// Find the payload selected by `predicate`.
    ///
    /// A script matches if its contents or its file name match.
    pub fn locate<P: ModulePredicate + ?Sized>(&self, predicate: &P) -> Result<Extracted> {
        match &self.host {
            Host::Container { archive, .. } => {
                let located = locate::locate(archive, predicate)?;
                let record = &archive.modules()[located.index];
                let payload = archive
                    .field_bytes(record, located.field)
                    .ok_or_else(|| Error::malformed(format!("Module has no {}", located.field)))?;
                Ok(Extracted {
                    payload: payload.to_vec(),
                    module: ModuleIdentity {
                        index: located.index,
                        name: archive.bytes(record.name).to_vec(),
                    },
                    field: located.field,
                })
            }
            Host::Script { name } => {
                if !predicate.matches_contents(self.data) && !predicate.matches_name(name) {
                    return Err(Error::not_found("Script does not match"));
                }
                Ok(Extracted {
                    payload: self.data.to_vec(),
                    module: ModuleIdentity {
                        index: 0,
                        name: name.clone(),
                    },
                    field: FieldKind::Contents,
                })
            }
        }
    }

    /// Return the file contents with a field replaced by `payload`.
    ///
    /// Returns `None` if the field already holds `payload`. The module is found by
    /// index, or by name if the name at that index differs.
    pub fn replace(
        &self,
        module: &ModuleIdentity,
        field: FieldKind,
        payload: &[u8],
    ) -> Result<Option<Replacement>> {
        match &self.host {
            Host::Container {
                container,
                location,
                archive,
            } => {
                let index = resolve(archive, module)?;
                let record = &archive.modules()[index];
                let current = archive.field_bytes(record, field).ok_or_else(|| {
                    Error::malformed(format!(
                        "{:?} module records have no {}",
                        archive.schema(),
                        field
                    ))
                })?;
                if current == payload {
                    return Ok(None);
                }
                let rebuilt = rebuild(archive, index, field, payload)?;
                let data = repack(self.data, location, container.strategy(), &rebuilt)?;
                Ok(Some(Replacement {
                    data,
                    archive_len: rebuilt.len() as u64,
                }))
            }
            Host::Script { .. } => {
                if field != FieldKind::Contents {
                    return Err(Error::not_found(format!("Scripts have no {}", field)));
                }
                if self.data == payload {
                    return Ok(None);
                }
                Ok(Some(Replacement {
                    data: payload.to_vec(),
                    archive_len: payload.len() as u64,
                }))
            }
        }
    }
}

fn resolve(archive: &Archive<'_>, module: &ModuleIdentity) -> Result<usize> {
    match archive.modules().get(module.index) {
        Some(record) if archive.bytes(record.name) == &module.name[..] => Ok(module.index),
        _ => archive.module_by_name(&module.name).ok_or_else(|| {
            Error::not_found(format!(
                "No module named {}",
                String::from_utf8_lossy(&module.name)
            ))
        }),
    }
}

/// Read the payload selected by `predicate` from the file at `path`.
pub fn extract<P: ModulePredicate + ?Sized>(path: &Path, predicate: &P) -> Result<Extracted> {
    let data = fs::read(path)?;
    Rewriter::parse(&data, path)?.locate(predicate)
}

/// Replace a field of a module in the file at `path`.
pub fn substitute(
    path: &Path,
    module: &ModuleIdentity,
    field: FieldKind,
    payload: &[u8],
    options: &SubstituteOptions,
) -> Result<Outcome> {
    let output = options.output.as_deref().unwrap_or(path);
    substitute_to(path, output, module, field, payload, options)
}

/// Replace the payload selected by `predicate` in each file, in place.
///
/// Each file is handled independently, and a failure does not stop the others.
pub fn substitute_all<P, I>(
    paths: I,
    predicate: &P,
    payload: &[u8],
    options: &SubstituteOptions,
) -> Vec<Result<Outcome>>
where
    P: ModulePredicate + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|path| {
            let path = path.as_ref();
            let result = extract(path, predicate).and_then(|extracted| {
                substitute_to(
                    path,
                    path,
                    &extracted.module,
                    extracted.field,
                    payload,
                    options,
                )
            });
            #[cfg(feature = "logging")]
            if let Err(e) = &result {
                warn!("Skipping {}: {}", path.display(), e);
            }
            result
        })
        .collect()
}

fn substitute_to(
    path: &Path,
    output: &Path,
    module: &ModuleIdentity,
    field: FieldKind,
    payload: &[u8],
    options: &SubstituteOptions,
) -> Result<Outcome> {
    let data = fs::read(path)?;
    let permissions = fs::metadata(path)?.permissions();
    let rewriter = Rewriter::parse(&data, path)?;
    let Some(replacement) = rewriter.replace(module, field, payload)? else {
        #[cfg(feature = "logging")]
        info!("{} is already up to date", path.display());
        return Ok(Outcome::Unchanged);
    };

    if options.backup && output == path {
        backup(path, &options.backup_suffix, &data, permissions.clone())?;
    }
    write_atomic(output, &replacement.data, Some(permissions))?;
    #[cfg(feature = "logging")]
    info!(
        "Replaced {} of {} ({} bytes), wrote {} bytes to {}",
        field,
        String::from_utf8_lossy(&module.name),
        payload.len(),
        replacement.data.len(),
        output.display()
    );

    let mut resign_error = None;
    if let (Host::Container { container, .. }, Some(hook)) = (&rewriter.host, options.hook()) {
        if let Err(e) = container.post_repack(output, hook) {
            #[cfg(feature = "logging")]
            warn!("Failed to sign {}: {}", output.display(), e);
            resign_error = Some(e);
        }
    }
    Ok(Outcome::Written(RepackReport {
        format: rewriter.format(),
        archive_len: replacement.archive_len,
        file_len: replacement.data.len() as u64,
        resign_error,
    }))
}

/// Return the path of the backup copy for `path`.
pub fn backup_path(path: &Path, suffix: &OsString) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn backup(
    path: &Path,
    suffix: &OsString,
    data: &[u8],
    permissions: fs::Permissions,
) -> Result<()> {
    let backup = backup_path(path, suffix);
    if backup.exists() {
        return Ok(());
    }
    let dir = match backup.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    // The copy only appears under its own name once it is complete.
    let mut temp = tempfile::Builder::new()
        .prefix(".standalone-archive")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.as_file().set_permissions(permissions)?;
    match temp.persist_noclobber(&backup) {
        Ok(_) => {}
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(Error::io(e.error)),
    }
    #[cfg(feature = "logging")]
    info!("Saved backup to {}", backup.display());
    Ok(())
}

impl Outcome {
    /// Return true if nothing was written.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Outcome::Unchanged)
    }

    /// The report for a written file.
    pub fn report(&self) -> Option<&RepackReport> {
        match self {
            Outcome::Written(report) => Some(report),
            Outcome::Unchanged => None,
        }
    }
}
