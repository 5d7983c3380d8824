use thiserror::Error;

/// Errors produced while reading, parsing, serializing or writing variant data.
#[derive(Debug, Error)]
pub enum VcfError {
    /// Invalid or missing option combination, e.g. a region query on a reader
    /// that was opened without an index.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed input, e.g. a record line with the wrong number of columns
    /// or an invalid numeric token.
    #[error("parse error: {0}")]
    Parse(String),

    /// A header field declaration that cannot be interpreted, e.g. an INFO
    /// line with an unknown `Type` or a missing mandatory attribute.
    #[error("schema error: {0}")]
    Schema(String),

    /// A record that is inconsistent with the header it is written under,
    /// e.g. a sample count that does not match the header's sample list.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl VcfError {
    /// Prefixes a parse error with the 1-based line number it occurred on.
    /// Other error kinds pass through unchanged.
    pub(crate) fn at_line(self, line: u64) -> Self {
        match self {
            VcfError::Parse(msg) => VcfError::Parse(format!("line {}: {}", line, msg)),
            other => other,
        }
    }
}

impl From<niffler::Error> for VcfError {
    fn from(e: niffler::Error) -> Self {
        VcfError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

pub type Result<T> = std::result::Result<T, VcfError>;
