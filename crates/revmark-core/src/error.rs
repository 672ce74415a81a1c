use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevmarkError {
    #[error("Content not supported for comparison: {construct}")]
    UnsupportedContent { construct: String },

    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("XML parsing error at {location}: {message}")]
    XmlParse { message: String, location: String },

    #[error("XML serialization error: {0}")]
    XmlWrite(String),

    #[error("Invalid settings: {message}")]
    InvalidSettings { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RevmarkError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::UnsupportedContent {
            construct: construct.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RevmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = RevmarkError::unsupported("w:altChunk");
        assert_eq!(
            err.to_string(),
            "Content not supported for comparison: w:altChunk"
        );
    }

    #[test]
    fn error_malformed_input_formats_correctly() {
        let err = RevmarkError::malformed("table row without cells");
        assert_eq!(err.to_string(), "Malformed input: table row without cells");
    }

    #[test]
    fn error_internal_inconsistency_formats_correctly() {
        let err = RevmarkError::InternalInconsistency("left ranges cover 3 of 4 atoms".into());
        assert_eq!(
            err.to_string(),
            "Internal inconsistency: left ranges cover 3 of 4 atoms"
        );
    }
}
