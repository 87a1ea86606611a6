/// Errors that can occur while reading or writing persisted configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The backing store failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be parsed as a dotted-decimal IPv4 address.
    #[error("invalid address '{0}' (expected a.b.c.d)")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
