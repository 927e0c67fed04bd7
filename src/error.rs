use std::fmt;

use thiserror::Error;

use crate::dispatch::{DispatchError, TokenUsage};
use crate::document::PatchError;

/// Which translation path produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Document,
}

impl ContentKind {
    fn unit_name(&self) -> &'static str {
        match self {
            ContentKind::Html => "chunk",
            ContentKind::Document => "batch",
        }
    }

    fn unit_plural(&self) -> &'static str {
        match self {
            ContentKind::Html => "chunks",
            ContentKind::Document => "batches",
        }
    }

    fn unit_size(&self) -> &'static str {
        match self {
            ContentKind::Html => "bytes per chunk",
            ContentKind::Document => "text units per batch",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Html => f.write_str("HTML"),
            ContentKind::Document => f.write_str("document"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(
        "{kind} input too large: {units} {plural} exceed the limit of {limit} ({per_unit} {size})",
        plural = .kind.unit_plural(),
        size = .kind.unit_size()
    )]
    TooLarge {
        kind: ContentKind,
        units: usize,
        limit: usize,
        /// Size of one unit: bytes per chunk or text units per batch.
        per_unit: usize,
    },
    #[error("{kind} {unit} {ordinal} failed: {source:#}", unit = .kind.unit_name())]
    Unit {
        kind: ContentKind,
        ordinal: usize,
        usage: TokenUsage,
        source: anyhow::Error,
    },
    #[error("translation cancelled")]
    Cancelled { usage: TokenUsage },
    #[error("invalid JSON document: {0}")]
    InvalidDocument(#[source] serde_json::Error),
    #[error("failed to apply translations: {0}")]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TranslateError {
    pub(crate) fn from_dispatch(kind: ContentKind, per_unit: usize, err: DispatchError) -> Self {
        match err {
            DispatchError::TooManyUnits { units, limit } => TranslateError::TooLarge {
                kind,
                units,
                limit,
                per_unit,
            },
            DispatchError::Unit {
                ordinal,
                usage,
                source,
            } => TranslateError::Unit {
                kind,
                ordinal,
                usage,
                source,
            },
            DispatchError::Cancelled { usage, .. } => TranslateError::Cancelled { usage },
        }
    }

    /// Tokens consumed before the failure.
    pub fn usage(&self) -> TokenUsage {
        match self {
            TranslateError::Unit { usage, .. } | TranslateError::Cancelled { usage } => *usage,
            _ => TokenUsage::default(),
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, TranslateError::TooLarge { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn too_large_names_the_limit() {
        let err = TranslateError::from_dispatch(
            ContentKind::Html,
            500,
            DispatchError::TooManyUnits {
                units: 31,
                limit: 30,
            },
        );
        assert!(err.is_precondition());
        assert_eq!(
            err.to_string(),
            "HTML input too large: 31 chunks exceed the limit of 30 (500 bytes per chunk)"
        );
    }

    #[test]
    fn unit_errors_keep_ordinal_and_usage() {
        let err = TranslateError::from_dispatch(
            ContentKind::Document,
            10,
            DispatchError::Unit {
                ordinal: 3,
                usage: TokenUsage::new(40, 2),
                source: anyhow!("translation count mismatch: got 9, expected 10"),
            },
        );
        assert_eq!(err.usage(), TokenUsage::new(40, 2));
        assert_eq!(
            err.to_string(),
            "document batch 3 failed: translation count mismatch: got 9, expected 10"
        );
    }
}
