//! Per-session import configuration

use uuid::Uuid;

use crate::types::ImportError;

pub const DEFAULT_BATCH_SIZE: usize = 50_000;
pub const DEFAULT_DELIMITER: &str = ",";

/// Supported import operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Insert contacts, skipping those whose GUID already exists.
    InsertAndSkipExisting,
    /// Delete contacts matched by GUID.
    Delete,
}

impl ImportKind {
    pub fn parse(value: &str) -> Result<Self, ImportError> {
        match value {
            "insert" => Ok(Self::InsertAndSkipExisting),
            "delete" => Ok(Self::Delete),
            other => Err(ImportError::UnknownImportKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertAndSkipExisting => "insert",
            Self::Delete => "delete",
        }
    }
}

/// User-defined import variables, fixed for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct ImportContext {
    /// Groups to link inserted contacts into. May be empty.
    pub groups: Vec<Uuid>,
    pub batch_size: usize,
    pub delimiter: u8,
    pub kind: ImportKind,
}

impl ImportContext {
    pub fn new(
        groups: Vec<Uuid>,
        batch_size: usize,
        delimiter: &str,
        kind: ImportKind,
    ) -> Result<Self, ImportError> {
        if batch_size == 0 {
            return Err(ImportError::InvalidBatchSize);
        }
        let delimiter = match delimiter.as_bytes() {
            [single] => *single,
            _ => return Err(ImportError::InvalidDelimiter(delimiter.to_string())),
        };
        Ok(Self {
            groups,
            batch_size,
            delimiter,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_kind_parses_known_values() {
        assert_eq!(
            ImportKind::parse("insert").unwrap(),
            ImportKind::InsertAndSkipExisting
        );
        assert_eq!(ImportKind::parse("delete").unwrap(), ImportKind::Delete);
    }

    #[test]
    fn import_kind_rejects_unknown_value() {
        let err = ImportKind::parse("upsert").unwrap_err();
        assert!(matches!(err, ImportError::UnknownImportKind(v) if v == "upsert"));
    }

    #[test]
    fn context_rejects_zero_batch_size() {
        let err = ImportContext::new(vec![], 0, ",", ImportKind::Delete).unwrap_err();
        assert!(matches!(err, ImportError::InvalidBatchSize));
    }

    #[test]
    fn context_rejects_multi_character_delimiter() {
        let err = ImportContext::new(vec![], 100, ";;", ImportKind::Delete).unwrap_err();
        assert!(matches!(err, ImportError::InvalidDelimiter(_)));
    }

    #[test]
    fn context_accepts_semicolon_delimiter() {
        let ctx =
            ImportContext::new(vec![], 100, ";", ImportKind::InsertAndSkipExisting).unwrap();
        assert_eq!(ctx.delimiter, b';');
    }
}
