//! Import error taxonomy

use thiserror::Error;
use uuid::Uuid;

/// Configuration-level import errors. These are fatal to a run and are
/// raised before any store mutation happens.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unknown import kind '{0}'")]
    UnknownImportKind(String),

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("delimiter must be a single ASCII character, got '{0}'")]
    InvalidDelimiter(String),

    #[error("contact group '{0}' not found")]
    ContactGroupNotFound(Uuid),
}
