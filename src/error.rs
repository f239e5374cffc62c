use thiserror::Error;

/// Everything that can go wrong between loading a document and handing back
/// compressed bytes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressError {
    #[error("Failed to load PDF: {0}")]
    Decode(String),

    #[error("Session not initialized")]
    NotInitialized,

    #[error("Compression cancelled")]
    Cancelled,

    #[error("Failed to encode page {page}: {reason}")]
    Encode { page: usize, reason: String },

    #[error("Failed to embed image for page {page}: {reason}")]
    Embed { page: usize, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("Failed to save PDF: {0}")]
    Write(String),
}

impl CompressError {
    /// Stable code sent alongside the message in `Error` events.
    pub fn code(&self) -> &'static str {
        match self {
            CompressError::Decode(_) => "DECODE_ERROR",
            CompressError::NotInitialized => "NOT_INITIALIZED",
            CompressError::Cancelled => "CANCELLED",
            CompressError::Encode { .. } => "ENCODE_ERROR",
            CompressError::Embed { .. } => "EMBED_ERROR",
            CompressError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            CompressError::PageOutOfRange { .. } => "PAGE_OUT_OF_RANGE",
            CompressError::Write(_) => "WRITE_ERROR",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompressError::Cancelled)
    }
}

impl From<lopdf::Error> for CompressError {
    fn from(e: lopdf::Error) -> Self {
        CompressError::Decode(format!("{:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, CompressError>;
