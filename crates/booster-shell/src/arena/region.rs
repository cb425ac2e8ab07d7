//! Owned, grow-only scratch regions and the byte budget they draw from.
//!
//! A region is sized to the largest request it has seen. Growing builds the
//! replacement buffer first and only then swaps it in, so a failed grow
//! leaves the previous contents and size untouched.

use std::mem::size_of;

use bytemuck::Zeroable;

use crate::error::BoostError;

// =============================================================================
// ScratchBudget
// =============================================================================

/// Byte accounting for everything a shell allocates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScratchBudget {
    limit: Option<usize>,
    used: usize,
}

impl ScratchBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, used: 0 }
    }

    /// Unbounded budget.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Check that replacing `old` bytes with `new` bytes stays within limit.
    fn check_grow(&self, region: &'static str, old: usize, new: usize) -> Result<(), BoostError> {
        let after = (self.used - old)
            .checked_add(new)
            .ok_or_else(|| BoostError::oom(region, new))?;
        match self.limit {
            Some(limit) if after > limit => Err(BoostError::oom(region, new)),
            _ => Ok(()),
        }
    }

    fn commit_grow(&mut self, old: usize, new: usize) {
        self.used = self.used - old + new;
    }

    fn release(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.used);
        self.used -= bytes;
    }
}

// =============================================================================
// Region
// =============================================================================

/// Outcome of an `ensure` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// The existing buffer was large enough.
    Reused,
    /// A larger buffer replaced the old one.
    Grown,
}

/// Grow-only buffer of plain-old-data elements.
#[derive(Debug)]
pub struct Region<T> {
    buf: Vec<T>,
    name: &'static str,
}

impl<T: bytemuck::Pod> Region<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            buf: Vec::new(),
            name,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.buf.len() * size_of::<T>()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf
    }

    /// Make the region hold at least `len` elements.
    ///
    /// Existing elements are copied into the grown buffer. Reused buffers are
    /// not cleared.
    pub fn ensure(&mut self, len: usize, budget: &mut ScratchBudget) -> Result<Growth, BoostError> {
        if len <= self.buf.len() {
            return Ok(Growth::Reused);
        }
        let new_bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| BoostError::oom(self.name, usize::MAX))?;
        let old_bytes = self.size_bytes();
        budget.check_grow(self.name, old_bytes, new_bytes)?;

        let mut fresh: Vec<T> = Vec::new();
        fresh
            .try_reserve_exact(len)
            .map_err(|_| BoostError::oom(self.name, new_bytes))?;
        fresh.extend_from_slice(&self.buf);
        fresh.resize(len, T::zeroed());

        log::trace!("{}: grew {} -> {} bytes", self.name, old_bytes, new_bytes);
        self.buf = fresh;
        budget.commit_grow(old_bytes, new_bytes);
        Ok(Growth::Grown)
    }

    /// Free the buffer and return its bytes to the budget.
    pub fn release(&mut self, budget: &mut ScratchBudget) {
        budget.release(self.size_bytes());
        self.buf = Vec::new();
    }
}

// =============================================================================
// ByteRegion
// =============================================================================

/// Byte region with 8-byte alignment, backed by `u64` words.
#[derive(Debug)]
pub struct ByteRegion {
    words: Region<u64>,
    bytes: usize,
}

impl ByteRegion {
    pub fn new(name: &'static str) -> Self {
        Self {
            words: Region::new(name),
            bytes: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.words.name()
    }

    /// Usable bytes (the largest request seen).
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Bytes held, including word padding.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.words.size_bytes()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(self.words.as_slice())[..self.bytes]
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(self.words.as_mut_slice())[..self.bytes]
    }

    /// Make the region hold at least `bytes` bytes.
    pub fn ensure(&mut self, bytes: usize, budget: &mut ScratchBudget) -> Result<Growth, BoostError> {
        let words = bytes.div_ceil(size_of::<u64>());
        let growth = self.words.ensure(words, budget)?;
        self.bytes = self.bytes.max(bytes);
        Ok(growth)
    }

    pub fn release(&mut self, budget: &mut ScratchBudget) {
        self.words.release(budget);
        self.bytes = 0;
    }
}
