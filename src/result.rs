use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// No End of central directory record within the search window,
    /// i.e. this isn't a ZIP file (or it's a thoroughly broken one).
    #[error("Not a ZIP archive: {0}")]
    NotAnArchive(&'static str),

    /// A structural record (CFH, LFH, ZIP64 locator/record, or ZIP64
    /// extended information field) is missing or not where the
    /// archive says it should be.
    #[error("Invalid ZIP archive: {0}")]
    InvalidArchive(&'static str),

    /// A 4-byte offset field can't hold its displaced value.
    /// The archive would have to become ZIP64 to accommodate it,
    /// and rewriting archives into ZIP64 is out of this crate's scope.
    #[error("ZIP offset overflow: {0}")]
    Overflow(&'static str),
}
