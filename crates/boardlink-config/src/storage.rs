use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Byte value of never-written cells.
pub const ERASED: u8 = 0xFF;

/// A cell that has never been written.
pub const ERASED_CELL: [u8; ConfigKey::WIDTH] = [ERASED; ConfigKey::WIDTH];

/// Fixed locations of persisted configuration values.
///
/// Every value is four bytes wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Address,
    Mask,
    Gateway,
    Checksum,
    TcpOutAddress,
    TcpOutPort,
    TcpOutAutoconnect,
}

impl ConfigKey {
    /// Width of every stored value.
    pub const WIDTH: usize = 4;

    /// Byte offset of this key in a storage image.
    pub fn offset(self) -> u64 {
        match self {
            ConfigKey::Address => 0,
            ConfigKey::Mask => 4,
            ConfigKey::Gateway => 8,
            ConfigKey::Checksum => 12,
            ConfigKey::TcpOutAddress => 16,
            ConfigKey::TcpOutPort => 20,
            ConfigKey::TcpOutAutoconnect => 24,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::Address => "address",
            ConfigKey::Mask => "mask",
            ConfigKey::Gateway => "gateway",
            ConfigKey::Checksum => "checksum",
            ConfigKey::TcpOutAddress => "tcpout_address",
            ConfigKey::TcpOutPort => "tcpout_port",
            ConfigKey::TcpOutAutoconnect => "tcpout_autoconnect",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent key-value medium holding 4-byte cells.
///
/// Like an erased EEPROM, a cell that was never written reads back as
/// [`ERASED_CELL`] rather than failing.
pub trait Storage: Send {
    /// Read the cell stored under `key`.
    fn read(&self, key: ConfigKey) -> Result<[u8; 4]>;

    /// Persist `value` under `key` before returning.
    fn write(&mut self, key: ConfigKey, value: [u8; 4]) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn read(&self, key: ConfigKey) -> Result<[u8; 4]> {
        (**self).read(key)
    }

    fn write(&mut self, key: ConfigKey, value: [u8; 4]) -> Result<()> {
        (**self).write(key, value)
    }
}

/// Volatile storage, mostly for tests and host-side tools.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    cells: HashMap<ConfigKey, [u8; 4]>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a cell so it reads back as [`ERASED_CELL`].
    pub fn erase(&mut self, key: ConfigKey) {
        self.cells.remove(&key);
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: ConfigKey) -> Result<[u8; 4]> {
        Ok(self.cells.get(&key).copied().unwrap_or(ERASED_CELL))
    }

    fn write(&mut self, key: ConfigKey, value: [u8; 4]) -> Result<()> {
        self.cells.insert(key, value);
        Ok(())
    }
}

/// EEPROM-like storage image in a single file.
///
/// Cells live at fixed offsets ([`ConfigKey::offset`]). Growing the file to
/// reach a cell fills the gap with [`ERASED`] bytes, so a partially written
/// image never checksums as valid by accident. A missing file or a read
/// past the end of the image yields [`ERASED_CELL`].
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Use the image at `path`. The file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the storage image.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&self, key: ConfigKey) -> Result<[u8; 4]> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ERASED_CELL),
            Err(err) => return Err(err.into()),
        };
        file.seek(SeekFrom::Start(key.offset()))?;
        let mut cell = ERASED_CELL;
        match file.read_exact(&mut cell) {
            Ok(()) => Ok(cell),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(ERASED_CELL),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, key: ConfigKey, value: [u8; 4]) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let len = file.metadata()?.len();
        let offset = key.offset();
        if len < offset {
            file.seek(SeekFrom::End(0))?;
            let gap = (offset - len) as usize;
            file.write_all(&vec![ERASED; gap])?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&value)?;
        file.sync_data()?;
        debug!(path = ?self.path, %key, "persisted config cell");
        Ok(())
    }
}
