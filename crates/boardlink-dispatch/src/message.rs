//! Text form of property messages.
//!
//! ```text
//! /subsystem/property [arg ...]
//! ```
//!
//! Arguments are separated by spaces. A bare token that parses as a 32-bit
//! integer is an int (`i`); anything else is a string (`s`). Strings may be
//! double-quoted, with `\"` and `\\` as the only escapes, and are always
//! written back quoted.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ErrorCode, ParseError};

/// Address segment used for error replies.
pub const ERROR_PROPERTY: &str = "error";

/// Typed message argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Str(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) => None,
        }
    }

    /// Type tag: `i` or `s`.
    pub fn tag(&self) -> char {
        match self {
            Value::Int(_) => 'i',
            Value::Str(_) => 's',
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i32::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    if ch == '"' || ch == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                f.write_str("\"")
            }
        }
    }
}

/// One property request or reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub address: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Request or reply for `/subsystem/property`.
    pub fn property(subsystem: &str, property: &str, args: Vec<Value>) -> Self {
        Self::new(format!("/{subsystem}/{property}"), args)
    }

    /// Error reply tagged with `subsystem`, or the bare `/error` address
    /// when there is none.
    pub fn error(subsystem: Option<&str>, code: ErrorCode, message: &str) -> Self {
        let address = match subsystem {
            Some(name) => format!("/{name}/{ERROR_PROPERTY}"),
            None => format!("/{ERROR_PROPERTY}"),
        };
        Self::new(address, vec![Value::Int(code.code()), Value::from(message)])
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        std::str::from_utf8(bytes)
            .map_err(|_| ParseError::NotUtf8)?
            .parse()
    }

    /// First address segment.
    pub fn subsystem(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Second address segment.
    pub fn property_name(&self) -> Option<&str> {
        self.segments().nth(1)
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.address.split('/').filter(|s| !s.is_empty())
    }

    /// Type tags of the arguments, e.g. `"is"`.
    pub fn type_tags(&self) -> String {
        self.args.iter().map(Value::tag).collect()
    }

    /// Code and text of an error reply.
    pub fn as_error(&self) -> Option<(ErrorCode, &str)> {
        let is_error = self.segments().last() == Some(ERROR_PROPERTY);
        match (is_error, self.args.as_slice()) {
            (true, [Value::Int(code), Value::Str(text)]) => {
                Some((ErrorCode::from_code(*code)?, text.as_str()))
            }
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        if !text.starts_with('/') {
            return Err(ParseError::NoAddress);
        }

        let (address, rest) = text.split_once(' ').unwrap_or((text, ""));
        Ok(Self {
            address: address.to_string(),
            args: parse_args(rest)?,
        })
    }
}

fn parse_args(text: &str) -> Result<Vec<Value>, ParseError> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Ok(args);
        };

        if first == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None => return Err(ParseError::UnterminatedString),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(c @ ('"' | '\\')) => s.push(c),
                        Some(other) => return Err(ParseError::BadEscape(other)),
                        None => return Err(ParseError::UnterminatedString),
                    },
                    Some(c) => s.push(c),
                }
            }
            args.push(Value::Str(s));
        } else {
            let mut token = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
            args.push(match token.parse::<i32>() {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Str(token),
            });
        }
    }
}
