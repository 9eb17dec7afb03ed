//! Flash emulated by an image file.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use devapi::platform::{Flash, FlashError};
use tracing::{info, warn};

const WORD: u32 = 4;

#[derive(Debug)]
pub struct FileFlash {
    image: File,
    size: u32,
}

impl FileFlash {
    /// Opens the image at `path`; a missing or short image is extended with erased
    /// (`0xFF`) bytes to `size`.
    pub fn open(path: impl AsRef<Path>, size: u32) -> io::Result<Self> {
        let path = path.as_ref();
        let mut image = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;

        let current = image.metadata()?.len();
        if current < u64::from(size) {
            info!(path = %path.display(), size, "initializing flash image");
            image.seek(SeekFrom::Start(current))?;
            let missing = u64::from(size) - current;
            io::copy(&mut io::repeat(0xFF).take(missing), &mut image)?;
        }
        Ok(Self { image, size })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn contains(&self, offset: u32, len: usize) -> bool {
        u64::from(offset) + len as u64 <= u64::from(self.size)
    }
}

impl Flash for FileFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if !self.contains(offset, buf.len()) {
            return Err(FlashError::OutOfRange { offset });
        }
        self.image.seek(SeekFrom::Start(u64::from(offset))).and_then(|_| self.image.read_exact(buf)).map_err(|e| {
            warn!(offset, cause = %e, "flash image read failed");
            FlashError::Read { offset }
        })
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset % WORD != 0 || data.len() % WORD as usize != 0 {
            return Err(FlashError::Unaligned { offset });
        }
        if !self.contains(offset, data.len()) {
            return Err(FlashError::OutOfRange { offset });
        }
        self.image.seek(SeekFrom::Start(u64::from(offset))).and_then(|_| self.image.write_all(data)).map_err(|e| {
            warn!(offset, cause = %e, "flash image write failed");
            FlashError::Write { offset }
        })
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        let offset = sector.checked_mul(Self::SECTOR_SIZE).ok_or(FlashError::Erase { sector })?;
        if !self.contains(offset, Self::SECTOR_SIZE as usize) {
            return Err(FlashError::Erase { sector });
        }
        let erased = vec![0xFF_u8; Self::SECTOR_SIZE as usize];
        self.image.seek(SeekFrom::Start(u64::from(offset))).and_then(|_| self.image.write_all(&erased)).map_err(|e| {
            warn!(sector, cause = %e, "flash image erase failed");
            FlashError::Erase { sector }
        })
    }
}

#[cfg(test)]
mod tests {
    use devapi::platform::FlashWriteSession;

    use super::*;
    use crate::test_dir;

    const SIZE: u32 = 4 * 4096;

    fn image(name: &str) -> FileFlash {
        FileFlash::open(test_dir(name).join("flash.bin"), SIZE).unwrap()
    }

    #[test]
    fn new_image_is_erased() {
        let mut flash = image("flash_new");
        let mut buf = [0; 8];
        flash.read(SIZE - 8, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
        assert_eq!(flash.read(SIZE - 4, &mut buf), Err(FlashError::OutOfRange { offset: SIZE - 4 }));
    }

    #[test]
    fn session_writes_reach_the_image() {
        let mut flash = image("flash_session");
        let mut session = FlashWriteSession::begin(0x1000).unwrap();
        session.write(&mut flash, b"firmw").unwrap();
        session.write(&mut flash, b"are").unwrap();
        assert_eq!(session.finish(&mut flash).unwrap(), 8);

        let mut buf = [0; 12];
        flash.read(0x1000, &mut buf).unwrap();
        assert_eq!(&buf, b"firmware\xFF\xFF\xFF\xFF");
    }

    #[test]
    fn rejects_unaligned_and_out_of_range_writes() {
        let mut flash = image("flash_checks");
        assert_eq!(flash.write(2, b"abcd"), Err(FlashError::Unaligned { offset: 2 }));
        assert_eq!(flash.write(0, b"abc"), Err(FlashError::Unaligned { offset: 0 }));
        assert_eq!(flash.write(SIZE, b"abcd"), Err(FlashError::OutOfRange { offset: SIZE }));
        assert_eq!(flash.erase_sector(4), Err(FlashError::Erase { sector: 4 }));
    }

    #[test]
    fn image_survives_reopening() {
        let path = test_dir("flash_reopen").join("flash.bin");
        let mut flash = FileFlash::open(&path, SIZE).unwrap();
        flash.erase_sector(0).unwrap();
        flash.write(0, b"boot").unwrap();
        drop(flash);

        let mut flash = FileFlash::open(&path, SIZE).unwrap();
        let mut buf = [0; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"boot");
        assert_eq!(flash.size(), SIZE);
    }
}
