use std::fmt;

use boardlink_transport::TransportError;
use serde::{Serialize, Serializer};

/// Closed set of codes carried by protocol error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    /// The message text could not be parsed.
    BadFormat,
    /// The message has no `/subsystem` address.
    NoAddress,
    SubsystemNotFound,
    PropertyNotFound,
    /// Wrong argument count, type or value.
    BadData,
    ReadOnly,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::BadFormat => 1,
            ErrorCode::NoAddress => 2,
            ErrorCode::SubsystemNotFound => 3,
            ErrorCode::PropertyNotFound => 4,
            ErrorCode::BadData => 5,
            ErrorCode::ReadOnly => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::BadFormat,
            2 => ErrorCode::NoAddress,
            3 => ErrorCode::SubsystemNotFound,
            4 => ErrorCode::PropertyNotFound,
            5 => ErrorCode::BadData,
            6 => ErrorCode::ReadOnly,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::BadFormat => "bad_format",
            ErrorCode::NoAddress => "no_address",
            ErrorCode::SubsystemNotFound => "subsystem_not_found",
            ErrorCode::PropertyNotFound => "property_not_found",
            ErrorCode::BadData => "bad_data",
            ErrorCode::ReadOnly => "read_only",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Failure of a single property get or set, answered as an error reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PropertyError {
    pub code: ErrorCode,
    pub message: String,
}

impl PropertyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadData, message)
    }

    pub fn read_only(property: &str) -> Self {
        Self::new(ErrorCode::ReadOnly, format!("{property} is read only"))
    }
}

/// Reasons message text is rejected before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,

    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("message does not start with a '/' address")]
    NoAddress,

    #[error("unterminated string argument")]
    UnterminatedString,

    #[error("invalid escape '\\{0}' in string argument")]
    BadEscape(char),
}

impl ParseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ParseError::NoAddress => ErrorCode::NoAddress,
            _ => ErrorCode::BadFormat,
        }
    }
}

/// Errors that end a dispatcher operation.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A subsystem with the same name is already registered.
    #[error("subsystem {0} already registered")]
    DuplicateSubsystem(String),

    /// The channel failed while serving.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    /// The peer answered with an error reply.
    #[error("remote error {code}: {message}")]
    Remote { code: ErrorCode, message: String },
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_as_name() {
        let json = serde_json::to_string(&ErrorCode::PropertyNotFound).unwrap();
        assert_eq!(json, "\"property_not_found\"");
        assert_eq!(
            serde_json::to_value([ErrorCode::Ok, ErrorCode::ReadOnly]).unwrap(),
            serde_json::json!(["ok", "read_only"])
        );
    }

    #[test]
    fn codes_roundtrip_through_numbers() {
        for code in 0..=6 {
            let parsed = ErrorCode::from_code(code).unwrap();
            assert_eq!(parsed.code(), code);
        }
        assert!(ErrorCode::from_code(99).is_none());
    }
}
