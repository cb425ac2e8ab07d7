//! Typed views over arena byte regions.
//!
//! The arena only knows bytes and strides. Collaborators that know the
//! session configuration build these views to read and write records. Every
//! view borrows the arena mutably, so a view can never outlive the next
//! `fill` or `release`.

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use super::layout::{BinFloat, BinLayout, RecordLayout, TREE_NODE_HEADER_BYTES};

// =============================================================================
// Bins
// =============================================================================

/// Mutable view of a bin region as records of float type `F`.
#[derive(Debug)]
pub struct BinsMut<'a, F: BinFloat> {
    bytes: &'a mut [u8],
    layout: BinLayout,
    #[cfg(debug_assertions)]
    end: usize,
    _float: PhantomData<F>,
}

impl<'a, F: BinFloat> BinsMut<'a, F> {
    /// Wrap `bytes` (8-byte aligned) as bins with the given layout.
    ///
    /// # Panics
    ///
    /// Panics if `layout` was built for a different float width, or if
    /// `bytes` is not 8-byte aligned.
    pub fn new(bytes: &'a mut [u8], layout: BinLayout) -> Self {
        assert_eq!(layout.float_bytes(), size_of::<F>(), "bin float width mismatch");
        assert_eq!(bytes.as_ptr() as usize % 8, 0, "bin region must be 8-byte aligned");
        Self {
            #[cfg(debug_assertions)]
            end: bytes.as_ptr_range().end as usize,
            bytes,
            layout,
            _float: PhantomData,
        }
    }

    /// Check every record against an end address recorded when the region
    /// was filled, rather than the end of `bytes`.
    #[cfg(debug_assertions)]
    pub(crate) fn with_debug_end(mut self, end: usize) -> Self {
        self.end = end;
        self
    }

    #[inline]
    pub fn layout(&self) -> BinLayout {
        self.layout
    }

    /// Number of whole bins in the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.stride()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access bin `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn bin_mut(&mut self, i: usize) -> BinMut<'_, F> {
        let stride = self.layout.stride();
        let start = i * stride;
        #[cfg(debug_assertions)]
        debug_assert!(
            self.bytes.as_ptr() as usize + start + stride <= self.end,
            "bin record {} past recorded region end",
            i
        );
        BinMut::from_record(&mut self.bytes[start..start + stride], self.layout)
    }

    /// Zero the first `n` bins. Reused regions hold stale data until cleared.
    pub fn clear(&mut self, n: usize) {
        let end = n * self.layout.stride();
        self.bytes[..end].fill(0);
    }
}

/// One bin record.
#[derive(Debug)]
pub struct BinMut<'a, F: BinFloat> {
    count: &'a mut u64,
    weight: &'a mut F,
    gradients: &'a mut [F],
    pair_len: usize,
}

impl<'a, F: BinFloat> BinMut<'a, F> {
    fn from_record(record: &'a mut [u8], layout: BinLayout) -> Self {
        let (count, rest) = record.split_at_mut(layout.weight_offset());
        let (weight, rest) = rest.split_at_mut(layout.gradients_offset() - layout.weight_offset());
        let gradients = &mut rest[..layout.gradient_floats() * size_of::<F>()];
        Self {
            count: bytemuck::from_bytes_mut(count),
            weight: bytemuck::from_bytes_mut(weight),
            gradients: bytemuck::cast_slice_mut::<u8, F>(gradients),
            pair_len: layout.pair_len(),
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        *self.count
    }

    #[inline]
    pub fn weight(&self) -> F {
        *self.weight
    }

    #[inline]
    pub fn gradient(&self, score: usize) -> F {
        self.gradients[score * self.pair_len]
    }

    /// Hessian of `score`; `None` for regression bins.
    #[inline]
    pub fn hessian(&self, score: usize) -> Option<F> {
        (self.pair_len == 2).then(|| self.gradients[score * 2 + 1])
    }

    /// Number of scores per bin.
    #[inline]
    pub fn n_scores(&self) -> usize {
        self.gradients.len() / self.pair_len
    }

    /// Accumulate one sample. `hessians` is ignored for regression bins.
    ///
    /// # Panics
    ///
    /// Debug builds panic unless `gradients` (and `hessians`, for
    /// classification bins) hold exactly [`n_scores`](Self::n_scores) values.
    pub fn add_sample(&mut self, weight: F, gradients: &[F], hessians: &[F]) {
        debug_assert_eq!(gradients.len(), self.n_scores(), "gradient count");
        debug_assert!(
            self.pair_len == 1 || hessians.len() == self.n_scores(),
            "hessian count"
        );
        *self.count += 1;
        *self.weight += weight;
        for (s, &g) in gradients.iter().enumerate() {
            self.gradients[s * self.pair_len] += g;
        }
        if self.pair_len == 2 {
            for (s, &h) in hessians.iter().enumerate() {
                self.gradients[s * 2 + 1] += h;
            }
        }
    }

    /// Add another bin's statistics into this one.
    pub fn merge<G: BinFloat>(&mut self, other: &BinMut<'_, G>) {
        debug_assert_eq!(self.gradients.len(), other.gradients.len());
        *self.count += *other.count;
        *self.weight += F::from_f64(other.weight.to_f64());
        for (dst, &src) in self.gradients.iter_mut().zip(other.gradients.iter()) {
            *dst += F::from_f64(src.to_f64());
        }
    }

    pub fn clear(&mut self) {
        *self.count = 0;
        *self.weight = F::default();
        self.gradients.fill(F::default());
    }
}

// =============================================================================
// Tree nodes
// =============================================================================

/// Bookkeeping at the front of every tree-node record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TreeNodeHeader {
    /// First bin covered by this node.
    pub bin_begin: u64,
    /// One past the last bin covered by this node.
    pub bin_end: u64,
    /// Index of the left child record, `u64::MAX` for leaves.
    pub left_child: u64,
    /// Best split gain found for this node.
    pub gain: f64,
}

const _: () = assert!(size_of::<TreeNodeHeader>() == TREE_NODE_HEADER_BYTES);

/// Tree-node scratch for a classification or regression session.
///
/// Each record is a [`TreeNodeHeader`] followed by the node's aggregate big
/// bin.
#[derive(Debug)]
pub struct TreeNodes<'a, const CLASSIFICATION: bool> {
    bytes: &'a mut [u8],
    layout: RecordLayout,
}

impl<'a, const CLASSIFICATION: bool> TreeNodes<'a, CLASSIFICATION> {
    pub fn new(bytes: &'a mut [u8], layout: RecordLayout) -> Self {
        assert_eq!(
            layout.bin().is_classification(),
            CLASSIFICATION,
            "tree node view does not match the session task"
        );
        assert_eq!(layout.header_bytes(), TREE_NODE_HEADER_BYTES);
        Self { bytes, layout }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.stride()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_mut(&mut self, i: usize) -> (&mut TreeNodeHeader, BinMut<'_, f64>) {
        let stride = self.layout.stride();
        let record = &mut self.bytes[i * stride..(i + 1) * stride];
        let (header, bin) = record.split_at_mut(TREE_NODE_HEADER_BYTES);
        (
            bytemuck::from_bytes_mut(header),
            BinMut::from_record(bin, self.layout.bin()),
        )
    }
}

// =============================================================================
// Split positions
// =============================================================================

/// Split-candidate scratch for a classification or regression session.
///
/// Each record is the candidate's bin position followed by the left-side sum
/// as a big bin.
#[derive(Debug)]
pub struct SplitPositions<'a, const CLASSIFICATION: bool> {
    bytes: &'a mut [u8],
    layout: RecordLayout,
}

impl<'a, const CLASSIFICATION: bool> SplitPositions<'a, CLASSIFICATION> {
    pub fn new(bytes: &'a mut [u8], layout: RecordLayout) -> Self {
        assert_eq!(
            layout.bin().is_classification(),
            CLASSIFICATION,
            "split position view does not match the session task"
        );
        Self { bytes, layout }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.stride()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position_mut(&mut self, i: usize) -> (&mut u64, BinMut<'_, f64>) {
        let stride = self.layout.stride();
        let header_bytes = self.layout.header_bytes();
        let record = &mut self.bytes[i * stride..(i + 1) * stride];
        let (position, bin) = record.split_at_mut(header_bytes);
        (
            bytemuck::from_bytes_mut(position),
            BinMut::from_record(bin, self.layout.bin()),
        )
    }
}
