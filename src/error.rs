//! Error types shared by every layer of the engine.
//!
//! Errors are structured values: a kind, a human readable message and, for
//! expressions, the byte span of the offending source text. Backend failures
//! keep the backend's own message inside [`EngineError::BackendError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-open byte range into an expression's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        SourceSpan { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn join(self, other: SourceSpan) -> SourceSpan {
        SourceSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid viewport: {0}")]
    InvalidViewport(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown expression: {0}")]
    UnknownExpression(String),

    #[error("Expression error at {}..{}: {message}", span.start, span.end)]
    ExpressionError { message: String, span: SourceSpan },

    #[error("View or table has been deleted")]
    ViewInvalidated,

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl EngineError {
    pub(crate) fn expression(message: impl Into<String>, span: SourceSpan) -> Self {
        EngineError::ExpressionError {
            message: message.into(),
            span,
        }
    }

    /// Stable name of the error kind, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::SchemaMismatch(_) => "SchemaMismatch",
            EngineError::InvalidViewport(_) => "InvalidViewport",
            EngineError::UnknownColumn(_) => "UnknownColumn",
            EngineError::UnknownExpression(_) => "UnknownExpression",
            EngineError::ExpressionError { .. } => "ExpressionError",
            EngineError::ViewInvalidated => "ViewInvalidated",
            EngineError::DuplicateId(_) => "DuplicateId",
            EngineError::UnknownType(_) => "UnknownType",
            EngineError::BackendError(_) => "BackendError",
            EngineError::InvalidConfig(_) => "InvalidConfig",
            EngineError::NotFound(_) => "NotFound",
            EngineError::Unsupported(_) => "Unsupported",
        }
    }

    /// Source span for expression errors.
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            EngineError::ExpressionError { span, .. } => Some(*span),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
