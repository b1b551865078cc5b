use crate::bson;
use crate::engine::PageType;
use std::fmt::Display;
use thiserror::Error;

/// Engine error: a stable numeric code plus a human readable message.
///
/// Programmer and data-contract errors leave the current transaction
/// usable; resource errors abort it; integrity and I/O errors poison the
/// whole engine (every following operation fails with `EngineClosed`).
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("file not found")]
    FileNotFound,
    #[error("invalid database file")]
    InvalidDatabase,
    #[error("size limit reached")]
    SizeLimitReached,
    #[error("duplicate key in unique index")]
    IndexDuplicateKey,
    #[error("index key too long")]
    IndexKeyTooLong,
    #[error("index not found")]
    IndexNotFound,
    #[error("invalid collection name")]
    InvalidCollectionName,
    #[error("collection limit reached")]
    CollectionLimitReached,
    #[error("index already exists")]
    IndexAlreadyExists,
    #[error("collection not found")]
    CollectionNotFound,
    #[error("lock timeout")]
    LockTimeout,
    #[error("maximum number of open transactions reached")]
    TransactionLimitReached,
    #[error("invalid transaction state")]
    InvalidTransactionState,
    #[error("document size exceeds limit")]
    DocumentSizeExceeded,
    #[error("document nesting too deep")]
    DocumentMaxDepthReached,
    #[error("invalid vector dimensions")]
    InvalidVectorDimensions,
    #[error("memory cache limit exceeded")]
    CacheLimitReached,
    #[error("invalid datafile state")]
    InvalidDatafileState,
    #[error("page type mismatch")]
    PageTypeMismatch,
    #[error("write-ahead log corrupted")]
    WalCorrupted,
    #[error("engine closed")]
    EngineClosed,
    #[error("unsupported feature")]
    Unsupported,
    #[error("i/o error")]
    Io,
    #[error("invalid bson")]
    InvalidBson,
    #[error("collation not match")]
    CollationNotMatch,
}

impl ErrorKind {
    /// Stable numeric code; part of the public contract.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::FileNotFound => 101,
            ErrorKind::InvalidDatabase => 103,
            ErrorKind::SizeLimitReached => 105,
            ErrorKind::IndexDuplicateKey => 110,
            ErrorKind::IndexKeyTooLong => 111,
            ErrorKind::IndexNotFound => 112,
            ErrorKind::InvalidCollectionName => 113,
            ErrorKind::CollectionLimitReached => 114,
            ErrorKind::IndexAlreadyExists => 115,
            ErrorKind::CollectionNotFound => 116,
            ErrorKind::LockTimeout => 120,
            ErrorKind::TransactionLimitReached => 122,
            ErrorKind::InvalidTransactionState => 126,
            ErrorKind::DocumentSizeExceeded => 128,
            ErrorKind::DocumentMaxDepthReached => 130,
            ErrorKind::InvalidVectorDimensions => 131,
            ErrorKind::CacheLimitReached => 135,
            ErrorKind::InvalidDatafileState => 140,
            ErrorKind::PageTypeMismatch => 141,
            ErrorKind::WalCorrupted => 142,
            ErrorKind::EngineClosed => 150,
            ErrorKind::Unsupported => 190,
            ErrorKind::Io => 200,
            ErrorKind::InvalidBson => 201,
            ErrorKind::CollationNotMatch => 202,
        }
    }

    /// True when the engine must transition to the closed-with-error state.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Io
                | ErrorKind::InvalidDatafileState
                | ErrorKind::PageTypeMismatch
                | ErrorKind::WalCorrupted
        )
    }
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Display) -> Self {
        Error {
            kind,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

// constructor per documented failure
impl Error {
    pub(crate) fn file_not_found(name: &str) -> Error {
        Error::new(ErrorKind::FileNotFound, format!("file not found: {name}"))
    }

    pub(crate) fn invalid_database() -> Error {
        Error::new(ErrorKind::InvalidDatabase, "invalid database file")
    }

    pub(crate) fn invalid_page() -> Error {
        Error::new(ErrorKind::InvalidDatabase, "invalid page content")
    }

    pub(crate) fn size_limit_reached() -> Error {
        Error::new(
            ErrorKind::SizeLimitReached,
            "data file has reached the LIMIT_SIZE pragma",
        )
    }

    pub(crate) fn index_duplicate_key(index: &str, key: bson::Value) -> Error {
        Error::new(
            ErrorKind::IndexDuplicateKey,
            format!("duplicate key in unique index {index}: {key:?}"),
        )
    }

    pub(crate) fn index_key_too_long(index: &str) -> Error {
        Error::new(
            ErrorKind::IndexKeyTooLong,
            format!("index key exceeds maximum length in {index}"),
        )
    }

    pub(crate) fn index_not_found(collection: &str, name: &str) -> Error {
        Error::new(
            ErrorKind::IndexNotFound,
            format!("index {name} not found in collection {collection}"),
        )
    }

    pub(crate) fn invalid_collection_name(name: &str) -> Error {
        Error::new(
            ErrorKind::InvalidCollectionName,
            format!("invalid collection name: {name}"),
        )
    }

    pub(crate) fn invalid_index_name(name: &str) -> Error {
        Error::new(
            ErrorKind::InvalidCollectionName,
            format!("invalid index name: {name}"),
        )
    }

    pub(crate) fn name_length_header_space(name: &str) -> Error {
        Error::new(
            ErrorKind::CollectionLimitReached,
            format!("name length exceeds available header space: {name}"),
        )
    }

    pub(crate) fn collection_index_limit_reached() -> Error {
        Error::new(
            ErrorKind::CollectionLimitReached,
            "collection index limit reached",
        )
    }

    pub(crate) fn already_exists_collection_name(name: &str) -> Error {
        Error::new(
            ErrorKind::InvalidCollectionName,
            format!("collection already exists: {name}"),
        )
    }

    pub(crate) fn index_already_exists(name: &str) -> Error {
        Error::new(
            ErrorKind::IndexAlreadyExists,
            format!("index already exists: {name}"),
        )
    }

    pub(crate) fn collection_not_found(name: &str) -> Error {
        Error::new(
            ErrorKind::CollectionNotFound,
            format!("collection not found: {name}"),
        )
    }

    pub(crate) fn lock_timeout(target: &str) -> Error {
        Error::new(
            ErrorKind::LockTimeout,
            format!("timed out waiting for lock: {target}"),
        )
    }

    pub(crate) fn transaction_limit() -> Error {
        Error::new(
            ErrorKind::TransactionLimitReached,
            "maximum number of open transactions reached",
        )
    }

    pub(crate) fn invalid_transaction_state(state: &str) -> Error {
        Error::new(
            ErrorKind::InvalidTransactionState,
            format!("invalid transaction state: {state}"),
        )
    }

    pub(crate) fn document_size_exceed_limit() -> Error {
        Error::new(
            ErrorKind::DocumentSizeExceeded,
            "document size exceeds limit",
        )
    }

    pub(crate) fn document_max_depth() -> Error {
        Error::new(
            ErrorKind::DocumentMaxDepthReached,
            "document nesting exceeds maximum depth",
        )
    }

    pub(crate) fn invalid_vector_dimensions(expected: u16, got: usize) -> Error {
        Error::new(
            ErrorKind::InvalidVectorDimensions,
            format!("vector index expects {expected} dimensions, got {got}"),
        )
    }

    pub(crate) fn cache_limit_exceeded() -> Error {
        Error::new(
            ErrorKind::CacheLimitReached,
            "memory cache is full and no page can be reclaimed",
        )
    }

    pub(crate) fn invalid_datafile_state(message: impl Display) -> Error {
        Error::new(ErrorKind::InvalidDatafileState, message)
    }

    pub(crate) fn invalid_page_type(expected: PageType, got: PageType, page_id: u32) -> Error {
        Error::new(
            ErrorKind::PageTypeMismatch,
            format!("page {page_id}: expected {expected:?} page, got {got:?}"),
        )
    }

    pub(crate) fn wal_corrupted(message: impl Display) -> Error {
        Error::new(ErrorKind::WalCorrupted, message)
    }

    pub(crate) fn engine_closed() -> Error {
        Error::new(ErrorKind::EngineClosed, "engine is closed")
    }

    pub(crate) fn unsupported(feature: &str) -> Error {
        Error::new(ErrorKind::Unsupported, format!("unsupported: {feature}"))
    }

    pub(crate) fn invalid_bson() -> Error {
        Error::new(ErrorKind::InvalidBson, "invalid bson")
    }

    pub(crate) fn collation_not_match() -> Error {
        Error::new(
            ErrorKind::CollationNotMatch,
            "requested collation does not match the data file",
        )
    }

    pub(crate) fn datetime_overflow() -> Error {
        Error::new(ErrorKind::InvalidBson, "datetime out of range")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::new(ErrorKind::FileNotFound, err)
        } else {
            Error::new(ErrorKind::Io, err)
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::new(ErrorKind::InvalidBson, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::LockTimeout.code(), 120);
        assert_eq!(ErrorKind::IndexDuplicateKey.code(), 110);
        assert_eq!(ErrorKind::CacheLimitReached.code(), 135);
        assert_eq!(ErrorKind::WalCorrupted.code(), 142);
    }

    #[test]
    fn fatal_kinds_poison_the_engine() {
        assert!(ErrorKind::Io.is_fatal());
        assert!(ErrorKind::WalCorrupted.is_fatal());
        assert!(!ErrorKind::IndexDuplicateKey.is_fatal());
        assert!(!ErrorKind::LockTimeout.is_fatal());
    }
}
