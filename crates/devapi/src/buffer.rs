//! Exact-size growable byte buffer.
//!
//! [`DynBuf`] is the accumulation buffer every connection parses requests into and
//! builds responses in. It never keeps slack capacity: each mutation allocates a
//! region of exactly the new length, copies, and swaps it in. Allocation is
//! fallible, either because the allocator refuses the request or because the
//! buffer's configured heap budget would be exceeded, and a failed mutation
//! leaves the buffer exactly as it was.

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::ensure;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("allocation of {requested} bytes failed")]
    Alloc { requested: usize },

    #[error("allocation of {requested} bytes exceeds the limit {limit}")]
    OverLimit { requested: usize, limit: usize },

    #[error("range {offset}..{end} outside buffer of {length} bytes")]
    OutOfRange { offset: usize, end: usize, length: usize },
}

/// A byte buffer whose storage is always exactly `len()` bytes.
///
/// The storage is unset when the buffer is empty.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct DynBuf {
    data: Option<Box<[u8]>>,
    limit: Option<usize>,
}

impl DynBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer that refuses to grow beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { data: None, limit: Some(limit) }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut region = self.allocate(self.len() + bytes.len())?;
        region.extend_from_slice(self.as_slice());
        region.extend_from_slice(bytes);
        self.install(region);
        Ok(())
    }

    pub fn prepend(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut region = self.allocate(self.len() + bytes.len())?;
        region.extend_from_slice(bytes);
        region.extend_from_slice(self.as_slice());
        self.install(region);
        Ok(())
    }

    /// Drops the first `n` bytes. Removing at least `len()` bytes empties the buffer.
    pub fn remove_prefix(&mut self, n: usize) -> Result<(), BufferError> {
        if n == 0 || self.is_empty() {
            return Ok(());
        }
        if n >= self.len() {
            self.free();
            return Ok(());
        }
        let mut region = self.allocate(self.len() - n)?;
        region.extend_from_slice(&self.as_slice()[n..]);
        self.install(region);
        Ok(())
    }

    /// Splices `bytes` in place of the `old_len` bytes starting at `offset`.
    pub fn replace(&mut self, offset: usize, old_len: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let length = self.len();
        let end = offset.saturating_add(old_len);
        ensure!(end <= length, BufferError::OutOfRange { offset, end, length });

        if bytes.len() == old_len {
            self.as_mut_slice()[offset..end].copy_from_slice(bytes);
            return Ok(());
        }

        let new_len = length - old_len + bytes.len();
        let mut region = self.allocate(new_len)?;
        let current = self.as_slice();
        region.extend_from_slice(&current[..offset]);
        region.extend_from_slice(bytes);
        region.extend_from_slice(&current[end..]);
        self.install(region);
        Ok(())
    }

    /// Releases the storage. Calling it on an empty buffer is a no-op.
    pub fn free(&mut self) {
        self.data = None;
    }

    /// Moves the content out, leaving the buffer empty with the same limit.
    pub fn take(&mut self) -> Option<Box<[u8]>> {
        self.data.take()
    }

    fn allocate(&self, requested: usize) -> Result<Vec<u8>, BufferError> {
        if let Some(limit) = self.limit
            && requested > limit
        {
            error!(requested, limit, "buffer limit exceeded");
            return Err(BufferError::OverLimit { requested, limit });
        }

        let mut region = Vec::new();
        region.try_reserve_exact(requested).map_err(|e| {
            error!(requested, cause = %e, "buffer allocation failed");
            BufferError::Alloc { requested }
        })?;
        Ok(region)
    }

    fn install(&mut self, region: Vec<u8>) {
        self.data = if region.is_empty() { None } else { Some(region.into_boxed_slice()) };
    }
}

impl AsRef<[u8]> for DynBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for DynBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynBuf").field("len", &self.len()).field("limit", &self.limit).finish()
    }
}
