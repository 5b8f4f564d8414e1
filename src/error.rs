use std::{error, fmt, io};

/// An error that occurred while reading or rewriting an embedded archive.
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

#[derive(Debug)]
enum ErrorInner {
    Io(io::Error),
    Object(object::read::Error),
    Archive(ErrorKind, String),
}

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The file is not an ELF, Mach-O or PE file.
    UnsupportedFormat,
    /// The container has no segment, section or overlay holding an archive.
    SectionNotFound,
    /// The trailer sentinel is missing or corrupted.
    TrailerMismatch,
    /// The module table length is not a multiple of any known record size.
    StructSizeAmbiguous,
    /// The rebuilt archive does not fit in the reserved section.
    SizeOverflow,
    /// No module matched the requested identity or predicate.
    NotFound,
    /// The rebuilt archive needs offsets that do not fit in 32 bits.
    ArchiveTooLarge,
    /// A length, pointer or header failed a bounds check.
    Malformed,
    /// The post-write signing step failed.
    Resign,
    /// An I/O error occurred.
    Io(io::ErrorKind),
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Io(e) => e.fmt(f),
            ErrorInner::Object(e) => e.fmt(f),
            ErrorInner::Archive(_, message) => message.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.inner {
            ErrorInner::Io(e) => Some(e),
            ErrorInner::Object(e) => Some(e),
            ErrorInner::Archive(..) => None,
        }
    }
}

impl Error {
    /// Get the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Io(e) => ErrorKind::Io(e.kind()),
            ErrorInner::Object(_) => ErrorKind::Malformed,
            ErrorInner::Archive(kind, _) => *kind,
        }
    }

    /// Create an error for a failed signing step.
    ///
    /// This is for use by [`ResignHook`](crate::ResignHook) implementations.
    pub fn resign(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resign, message)
    }

    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            inner: ErrorInner::Archive(kind, message.into()),
        }
    }

    pub(crate) fn io(error: io::Error) -> Self {
        Self {
            inner: ErrorInner::Io(error),
        }
    }

    pub(crate) fn object(error: object::read::Error) -> Self {
        Self {
            inner: ErrorInner::Object(error),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::io(error)
    }
}

/// The `Result` type for this library.
pub type Result<T> = std::result::Result<T, Error>;
