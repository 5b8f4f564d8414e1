//! A library for reading and rewriting the module archive embedded in standalone
//! executables.
//!
//! A standalone executable is a runtime binary with an archive of bundled modules
//! embedded in it. On ELF the archive is appended as an overlay, and on Mach-O and
//! PE it is stored in a dedicated section of fixed size. This crate finds the
//! archive, decodes its module table, replaces the contents of one module field,
//! and writes the file back using the strategy the host format allows.
//!
//! Use [`extract`] to read the payload that a [`Matcher`] selects, and
//! [`substitute`] to replace it. [`Rewriter`] provides the same operations on
//! data already in memory.
//!
//! # Example
//! ```no_run
//! use standalone_archive::{extract, substitute, Matcher, SubstituteOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let path = std::path::Path::new("path/to/app");
//!   let matcher = Matcher::marker(b"__APP_MAIN__".to_vec()).bunfs_entry();
//!   let extracted = extract(path, &matcher)?;
//!
//!   let mut payload = extracted.payload.clone();
//!   payload.extend_from_slice(b"\nconsole.log('patched');\n");
//!   let mut options = SubstituteOptions::default();
//!   options.backup = true;
//!   substitute(path, &extracted.module, extracted.field, &payload, &options)?;
//!   Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod format;

pub mod archive;
pub use archive::{Archive, ByteRange, FieldKind, ModuleRecord, OffsetsHeader, Schema};

pub mod blob;
pub use blob::{parse_blob, HeaderWidth, LengthPlacement};

pub mod container;
pub use container::{classify, is_candidate_container, ContainerLocation, Format};

pub mod locate;
pub use locate::{locate, Located, Matcher, ModulePredicate};

pub mod rebuild;
pub use rebuild::{rebuild, ArchiveWriter, ModuleSource};

pub mod repack;
pub use repack::{repack, Codesign, RepackReport, RepackStrategy, ResignHook};

mod rewriter;
pub use rewriter::{
    backup_path, extract, substitute, substitute_all, Extracted, ModuleIdentity, Outcome,
    Replacement, Rewriter, SubstituteOptions,
};
