//! Selecting the module to operate on.
//!
//! The caller describes the target with a [`ModulePredicate`]. Records are
//! checked in table order:
//!
//! 1. a content marker in a module's contents wins immediately,
//! 2. otherwise the first module whose name matches is used,
//! 3. otherwise the first module whose bytecode contains the marker is used.

#[cfg(feature = "logging")]
use log::debug;
use memchr::memmem;

use crate::archive::{Archive, FieldKind};
use crate::format;
use crate::{Error, Result};

/// Decides which module holds the payload of interest.
pub trait ModulePredicate {
    /// Return true if a module's contents contain the content marker.
    fn matches_contents(&self, contents: &[u8]) -> bool;

    /// Return true if a module's name identifies it as the target.
    fn matches_name(&self, _name: &[u8]) -> bool {
        false
    }

    /// Return true if a module's bytecode contains the content marker.
    fn matches_bytecode(&self, _bytecode: &[u8]) -> bool {
        false
    }
}

/// A predicate built from a content marker and name patterns.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct Matcher {
    /// Bytes that only occur in the target module.
    pub marker: Option<Vec<u8>>,
    /// Names containing any of these are fallback candidates.
    pub name_patterns: Vec<Vec<u8>>,
    /// Also search module bytecode for the marker.
    pub bytecode_fallback: bool,
}

impl Matcher {
    /// Create a matcher for a content marker, with bytecode fallback enabled.
    pub fn marker(marker: impl Into<Vec<u8>>) -> Self {
        Matcher {
            marker: Some(marker.into()),
            name_patterns: Vec::new(),
            bytecode_fallback: true,
        }
    }

    /// Add a name pattern.
    pub fn with_name_pattern(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.name_patterns.push(pattern.into());
        self
    }

    /// Add the virtual filesystem root prefixes as name patterns.
    pub fn bunfs_entry(self) -> Self {
        self.with_name_pattern(format::BUNFS_ROOT)
            .with_name_pattern(format::BUNFS_ROOT_WINDOWS)
    }

    fn contains_marker(&self, data: &[u8]) -> bool {
        match &self.marker {
            Some(marker) => memmem::find(data, marker).is_some(),
            None => false,
        }
    }
}

impl ModulePredicate for Matcher {
    fn matches_contents(&self, contents: &[u8]) -> bool {
        self.contains_marker(contents)
    }

    fn matches_name(&self, name: &[u8]) -> bool {
        self.name_patterns
            .iter()
            .any(|pattern| memmem::find(name, pattern).is_some())
    }

    fn matches_bytecode(&self, bytecode: &[u8]) -> bool {
        self.bytecode_fallback && self.contains_marker(bytecode)
    }
}

/// How a module was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The contents contained the marker.
    ContentMarker,
    /// The name matched a pattern.
    NamePattern,
    /// The bytecode contained the marker.
    BytecodeMarker,
}

/// The selected module and the field holding its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// The index of the module in the table.
    pub index: usize,
    /// The field holding the payload.
    pub field: FieldKind,
    /// How the module was selected.
    pub kind: MatchKind,
}

/// Select a module with the given predicate.
pub fn locate<P: ModulePredicate + ?Sized>(archive: &Archive<'_>, predicate: &P) -> Result<Located> {
    let mut by_name = None;
    let mut by_bytecode = None;
    for (index, module) in archive.modules().iter().enumerate() {
        if predicate.matches_contents(archive.bytes(module.contents)) {
            #[cfg(feature = "logging")]
            debug!("Module {} contents match", index);
            return Ok(Located {
                index,
                field: FieldKind::Contents,
                kind: MatchKind::ContentMarker,
            });
        }
        if by_name.is_none() && predicate.matches_name(archive.bytes(module.name)) {
            by_name = Some(index);
        }
        if by_bytecode.is_none()
            && module.bytecode.length() != 0
            && predicate.matches_bytecode(archive.bytes(module.bytecode))
        {
            by_bytecode = Some(index);
        }
    }

    if let Some(index) = by_name {
        #[cfg(feature = "logging")]
        debug!("Module {} name matches", index);
        return Ok(Located {
            index,
            field: FieldKind::Contents,
            kind: MatchKind::NamePattern,
        });
    }
    if let Some(index) = by_bytecode {
        #[cfg(feature = "logging")]
        debug!("Module {} bytecode matches", index);
        return Ok(Located {
            index,
            field: FieldKind::Bytecode,
            kind: MatchKind::BytecodeMarker,
        });
    }
    Err(Error::not_found(format!(
        "No module matched among {} modules",
        archive.modules().len()
    )))
}
