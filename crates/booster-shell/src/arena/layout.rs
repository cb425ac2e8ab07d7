//! Record strides and region sizing.
//!
//! Bin records have no fixed Rust type: their stride depends on the float
//! width, the classification flag and the number of scores. Everything here
//! is computed at runtime with checked arithmetic so that absurd
//! configurations surface as [`BoostError::OutOfMemory`] instead of wrapping.
//!
//! # Bin record layout
//!
//! ```text
//! offset 0            : count   (u64)
//! offset 8            : weight  (F)
//! offset 8 + size_of F: gradients, n_scores entries
//!                       classification: [g0, h0, g1, h1, ...]
//!                       regression:     [g0, g1, ...]
//! stride              : rounded up to 8 bytes
//! ```

use std::fmt::Debug;
use std::mem::size_of;
use std::ops::AddAssign;

use crate::config::{TaskKind, TreeLimits};
use crate::core::{SessionCore, Term};
use crate::error::BoostError;

/// Alignment (and stride granularity) of every byte region.
pub const RECORD_ALIGN: usize = 8;

/// Bytes of tree-node bookkeeping preceding the node's aggregate bin.
pub const TREE_NODE_HEADER_BYTES: usize = 32;

/// Bytes of split-candidate bookkeeping preceding the left-sum bin.
pub const SPLIT_POSITION_HEADER_BYTES: usize = 8;

const BIN_COUNT_BYTES: usize = size_of::<u64>();

// =============================================================================
// BinFloat
// =============================================================================

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Float types a bin record may be built from.
///
/// `f32` backs the fast bins, `f64` the big bins.
pub trait BinFloat:
    bytemuck::Pod + Default + Debug + PartialEq + AddAssign + sealed::Sealed + 'static
{
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl BinFloat for f32 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl BinFloat for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

#[inline]
fn round_up(bytes: usize, align: usize) -> Option<usize> {
    bytes.checked_add(align - 1).map(|b| b / align * align)
}

// =============================================================================
// BinLayout
// =============================================================================

/// Runtime layout of one bin record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinLayout {
    classification: bool,
    n_scores: usize,
    float_bytes: usize,
    stride: usize,
}

impl BinLayout {
    /// Layout for bins of float type `F`. `None` if the stride overflows.
    pub fn new<F: BinFloat>(classification: bool, n_scores: usize) -> Option<Self> {
        let float_bytes = size_of::<F>();
        let pair_len = if classification { 2 } else { 1 };
        let floats = n_scores.checked_mul(pair_len)?.checked_add(1)?;
        let raw = floats.checked_mul(float_bytes)?.checked_add(BIN_COUNT_BYTES)?;
        Some(Self {
            classification,
            n_scores,
            float_bytes,
            stride: round_up(raw, RECORD_ALIGN)?,
        })
    }

    /// Fast (`f32`) bin layout for a task.
    pub fn fast(task: TaskKind) -> Option<Self> {
        Self::new::<f32>(task.is_classification(), task.n_scores())
    }

    /// Big (`f64`) bin layout for a task.
    pub fn big(task: TaskKind) -> Option<Self> {
        Self::new::<f64>(task.is_classification(), task.n_scores())
    }

    #[inline]
    pub fn is_classification(&self) -> bool {
        self.classification
    }

    #[inline]
    pub fn n_scores(&self) -> usize {
        self.n_scores
    }

    #[inline]
    pub fn float_bytes(&self) -> usize {
        self.float_bytes
    }

    /// Floats per score entry: gradient and hessian for classification.
    #[inline]
    pub fn pair_len(&self) -> usize {
        if self.classification {
            2
        } else {
            1
        }
    }

    /// Bytes between consecutive bins.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub(crate) fn weight_offset(&self) -> usize {
        BIN_COUNT_BYTES
    }

    #[inline]
    pub(crate) fn gradients_offset(&self) -> usize {
        BIN_COUNT_BYTES + self.float_bytes
    }

    /// Number of floats in the gradient section.
    #[inline]
    pub(crate) fn gradient_floats(&self) -> usize {
        self.n_scores * self.pair_len()
    }
}

// =============================================================================
// RecordLayout
// =============================================================================

/// A fixed header followed by one big bin: tree nodes and split positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    header_bytes: usize,
    bin: BinLayout,
}

impl RecordLayout {
    pub fn new(header_bytes: usize, bin: BinLayout) -> Option<Self> {
        debug_assert_eq!(header_bytes % RECORD_ALIGN, 0);
        header_bytes.checked_add(bin.stride())?;
        Some(Self { header_bytes, bin })
    }

    #[inline]
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    #[inline]
    pub fn bin(&self) -> BinLayout {
        self.bin
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.header_bytes + self.bin.stride()
    }
}

// =============================================================================
// ArenaLayout / ArenaRequirements
// =============================================================================

/// Record layouts for all region kinds of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    pub fast_bin: BinLayout,
    pub big_bin: BinLayout,
    pub tree_node: RecordLayout,
    pub split_position: RecordLayout,
}

impl ArenaLayout {
    pub fn for_task(task: TaskKind) -> Result<Self, BoostError> {
        let overflow = || BoostError::oom("bin layout", usize::MAX);
        let fast_bin = BinLayout::fast(task).ok_or_else(overflow)?;
        let big_bin = BinLayout::big(task).ok_or_else(overflow)?;
        Ok(Self {
            fast_bin,
            big_bin,
            tree_node: RecordLayout::new(TREE_NODE_HEADER_BYTES, big_bin).ok_or_else(overflow)?,
            split_position: RecordLayout::new(SPLIT_POSITION_HEADER_BYTES, big_bin)
                .ok_or_else(overflow)?,
        })
    }
}

/// Record counts and byte sizes every region must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRequirements {
    pub layout: ArenaLayout,
    /// Fast bin records.
    pub fast_bins: usize,
    /// Big bin records.
    pub big_bins: usize,
    /// `f32` slots in the multiclass midway buffer.
    pub midway_slots: usize,
    /// Tree-node records.
    pub tree_nodes: usize,
    /// Split-position records.
    pub split_positions: usize,
}

impl ArenaRequirements {
    /// Requirements covering every term of a core.
    pub fn for_core<C: SessionCore + ?Sized>(core: &C) -> Result<Self, BoostError> {
        Self::for_terms(core.task(), core.tree_limits(), core.terms())
    }

    /// Requirements covering a single term of a core.
    pub fn for_term<C: SessionCore + ?Sized>(core: &C, index: usize) -> Result<Self, BoostError> {
        let terms = core.terms();
        let term = terms.get(index).ok_or(BoostError::InvalidTerm {
            index,
            n_terms: terms.len(),
        })?;
        Self::for_terms(core.task(), core.tree_limits(), std::slice::from_ref(term))
    }

    /// Requirements covering the given terms.
    ///
    /// Every count is at least 1 so a filled arena never has an empty region.
    pub fn for_terms(task: TaskKind, limits: TreeLimits, terms: &[Term]) -> Result<Self, BoostError> {
        let layout = ArenaLayout::for_task(task)?;

        let mut fast_bins = 1usize;
        let mut big_bins = 1usize;
        let mut width = 0usize;
        for term in terms {
            let tensor = term
                .tensor_bins()
                .ok_or_else(|| BoostError::oom("fast bins", usize::MAX))?;
            let big = term
                .auxiliary_bins()
                .and_then(|aux| aux.checked_add(tensor))
                .ok_or_else(|| BoostError::oom("big bins", usize::MAX))?;
            fast_bins = fast_bins.max(tensor);
            big_bins = big_bins.max(big);
            width = width.max(term.width());
        }

        let leaves = limits
            .max_leaves
            .min(limits.depth_leaf_bound())
            .min(width)
            .max(1);
        // full binary tree with `leaves` leaves
        let tree_nodes = leaves
            .checked_mul(2)
            .map(|n| n - 1)
            .ok_or_else(|| BoostError::oom("tree nodes", usize::MAX))?;
        let split_positions = width
            .checked_mul(limits.max_depth)
            .ok_or_else(|| BoostError::oom("split positions", usize::MAX))?
            .max(1);

        let req = Self {
            layout,
            fast_bins,
            big_bins,
            midway_slots: task.n_scores().max(1),
            tree_nodes,
            split_positions,
        };
        // surface byte overflow here rather than during the fill
        req.total_bytes()?;
        Ok(req)
    }

    pub fn fast_bins_bytes(&self) -> Result<usize, BoostError> {
        bytes_for("fast bins", self.fast_bins, self.layout.fast_bin.stride())
    }

    pub fn big_bins_bytes(&self) -> Result<usize, BoostError> {
        bytes_for("big bins", self.big_bins, self.layout.big_bin.stride())
    }

    pub fn midway_bytes(&self) -> Result<usize, BoostError> {
        bytes_for("multiclass midway", self.midway_slots, size_of::<f32>())
    }

    pub fn tree_nodes_bytes(&self) -> Result<usize, BoostError> {
        bytes_for("tree nodes", self.tree_nodes, self.layout.tree_node.stride())
    }

    pub fn split_positions_bytes(&self) -> Result<usize, BoostError> {
        bytes_for(
            "split positions",
            self.split_positions,
            self.layout.split_position.stride(),
        )
    }

    /// Sum of all region sizes.
    pub fn total_bytes(&self) -> Result<usize, BoostError> {
        [
            self.fast_bins_bytes()?,
            self.big_bins_bytes()?,
            self.midway_bytes()?,
            self.tree_nodes_bytes()?,
            self.split_positions_bytes()?,
        ]
        .into_iter()
        .try_fold(0usize, |acc, b| acc.checked_add(b))
        .ok_or_else(|| BoostError::oom("scratch arena", usize::MAX))
    }
}

#[inline]
fn bytes_for(region: &'static str, count: usize, stride: usize) -> Result<usize, BoostError> {
    count
        .checked_mul(stride)
        .ok_or_else(|| BoostError::oom(region, usize::MAX))
}
