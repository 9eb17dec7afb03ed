use std::io;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Create or append.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), size }
    }
}

/// The device filesystem.
///
/// Files are closed by dropping them, so every exit path of a connection releases
/// its open file.
pub trait FileSystem {
    type File: io::Read + io::Write;

    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<Self::File>;

    fn size(&mut self, file: &Self::File) -> io::Result<u64>;

    fn remove(&mut self, path: &str) -> io::Result<()>;

    /// Lists the entries of a directory in the filesystem's own iteration order.
    fn list_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>>;
}
