use crate::error::PropertyError;
use crate::message::Value;

pub type PropertyResult<T> = std::result::Result<T, PropertyError>;

/// Whether a property accepts `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Entry in a subsystem's property table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub access: Access,
}

impl Property {
    pub const fn read_write(name: &'static str) -> Self {
        Self {
            name,
            access: Access::ReadWrite,
        }
    }

    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name,
            access: Access::ReadOnly,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

/// A named group of properties reachable as `/name/property`.
///
/// Properties are addressed by their index in [`Subsystem::properties`].
/// The dispatcher resolves names, rejects `set` on read-only entries and
/// turns every [`PropertyError`] into an error reply, so implementations
/// only see in-range indices.
pub trait Subsystem: Send {
    fn name(&self) -> &str;

    fn properties(&self) -> &[Property];

    fn get(&mut self, index: usize) -> PropertyResult<Value>;

    fn set(&mut self, index: usize, args: &[Value]) -> PropertyResult<()>;
}

impl<S: Subsystem + ?Sized> Subsystem for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn properties(&self) -> &[Property] {
        (**self).properties()
    }

    fn get(&mut self, index: usize) -> PropertyResult<Value> {
        (**self).get(index)
    }

    fn set(&mut self, index: usize, args: &[Value]) -> PropertyResult<()> {
        (**self).set(index, args)
    }
}

/// The single int argument of a set.
pub fn expect_int(args: &[Value]) -> PropertyResult<i32> {
    match args {
        [Value::Int(v)] => Ok(*v),
        _ => Err(PropertyError::bad_data("Incorrect data - need an int")),
    }
}

/// The single string argument of a set.
pub fn expect_str(args: &[Value]) -> PropertyResult<&str> {
    match args {
        [Value::Str(s)] => Ok(s),
        _ => Err(PropertyError::bad_data("Incorrect data - need a string")),
    }
}
