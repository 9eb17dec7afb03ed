//! Raw flash access and the streaming write session used for firmware uploads.

use thiserror::Error;
use tracing::{debug, trace};

use crate::ensure;

const WORD: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("flash address {offset:#x} out of range")]
    OutOfRange { offset: u32 },

    #[error("flash address {offset:#x} is not word aligned")]
    Unaligned { offset: u32 },

    #[error("flash read failed at {offset:#x}")]
    Read { offset: u32 },

    #[error("flash write failed at {offset:#x}")]
    Write { offset: u32 },

    #[error("erasing flash sector {sector} failed")]
    Erase { sector: u32 },
}

/// Raw non-volatile storage.
///
/// Writes are always word aligned in address and length; sectors must be erased
/// before they are written.
pub trait Flash {
    /// Reads are issued in multiples of this many bytes.
    const READ_UNIT: usize = 4;

    const SECTOR_SIZE: u32 = 4096;

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError>;
}

/// A write cursor over flash, fed with arbitrarily sized pieces of an image.
///
/// Up to three trailing bytes are held back so the flash only sees whole words.
/// Each sector is erased the first time a write reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashWriteSession {
    start: u32,
    offset: u32,
    last_erased: Option<u32>,
    pending: [u8; WORD],
    pending_len: usize,
}

impl FlashWriteSession {
    pub fn begin(offset: u32) -> Result<Self, FlashError> {
        ensure!(offset as usize % WORD == 0, FlashError::Unaligned { offset });
        debug!(offset = format_args!("{offset:#x}"), "begin flash write");
        Ok(Self { start: offset, offset, last_erased: None, pending: [0xFF; WORD], pending_len: 0 })
    }

    /// Address the next whole word will be written to.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Bytes accepted so far, including the ones still held back.
    pub fn written(&self) -> u32 {
        (self.offset - self.start).saturating_add(self.pending_len as u32)
    }

    pub fn write<F: Flash + ?Sized>(&mut self, flash: &mut F, mut data: &[u8]) -> Result<(), FlashError> {
        if self.pending_len > 0 {
            let take = (WORD - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len < WORD {
                return Ok(());
            }
            let word = self.pending;
            self.program(flash, &word)?;
            self.pending = [0xFF; WORD];
            self.pending_len = 0;
        }

        let aligned = data.len() - data.len() % WORD;
        if aligned > 0 {
            self.program(flash, &data[..aligned])?;
        }

        let tail = &data[aligned..];
        self.pending[..tail.len()].copy_from_slice(tail);
        self.pending_len = tail.len();
        Ok(())
    }

    /// Flushes a trailing partial word padded with `0xFF`; returns the bytes accepted.
    pub fn finish<F: Flash + ?Sized>(mut self, flash: &mut F) -> Result<u32, FlashError> {
        let written = self.written();
        if self.pending_len > 0 {
            let mut word = [0xFF; WORD];
            word[..self.pending_len].copy_from_slice(&self.pending[..self.pending_len]);
            self.program(flash, &word)?;
        }
        debug!(start = format_args!("{:#x}", self.start), written, "finished flash write");
        Ok(written)
    }

    fn program<F: Flash + ?Sized>(&mut self, flash: &mut F, data: &[u8]) -> Result<(), FlashError> {
        let end = u32::try_from(data.len()).ok().and_then(|len| self.offset.checked_add(len));
        let end = end.ok_or(FlashError::OutOfRange { offset: self.offset })?;
        let first = self.offset / F::SECTOR_SIZE;
        let last = (end - 1) / F::SECTOR_SIZE;
        for sector in first..=last {
            if self.last_erased.is_none_or(|erased| sector > erased) {
                trace!(sector, "erase flash sector");
                flash.erase_sector(sector)?;
                self.last_erased = Some(sector);
            }
        }

        flash.write(self.offset, data)?;
        self.offset = end;
        Ok(())
    }
}
