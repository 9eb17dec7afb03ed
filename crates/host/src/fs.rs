//! The device filesystem as a directory on the host.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use devapi::platform::{DirEntry, FileSystem, OpenMode};
use tracing::trace;

#[derive(Debug)]
pub struct StdFileSystem {
    root: PathBuf,
}

impl StdFileSystem {
    /// Serves `root`, creating it when missing.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a device path below the root; anything escaping it is refused.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|component| matches!(component, Component::Normal(_))) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid device path {path:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl FileSystem for StdFileSystem {
    type File = File;

    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<File> {
        let full = self.resolve(path)?;
        trace!(path = %full.display(), ?mode, "open");
        if mode != OpenMode::Read
            && let Some(parent) = full.parent()
        {
            fs::create_dir_all(parent)?;
        }

        match mode {
            OpenMode::Read => {
                let file = File::open(&full)?;
                if !file.metadata()?.is_file() {
                    return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not a file", full.display())));
                }
                Ok(file)
            }
            OpenMode::Write => OpenOptions::new().write(true).create(true).truncate(true).open(full),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(full),
        }
    }

    fn size(&mut self, file: &File) -> io::Result<u64> {
        Ok(file.metadata()?.len())
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    /// Regular files of the directory, sorted by name.
    fn list_dir(&mut self, path: &str) -> io::Result<Vec<DirEntry>> {
        let dir = if path.is_empty() { self.root.clone() } else { self.resolve(path)? };

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                entries.push(DirEntry::new(entry.file_name().to_string_lossy(), metadata.len()));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
