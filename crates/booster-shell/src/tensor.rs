//! Term-update tensors.
//!
//! A [`Tensor`] holds one score vector per cell of a term: for a term with
//! bins `[b0, b1, ..]` it has `b0 * b1 * ..` cells of `n_scores` values each,
//! laid out row-major (last dimension fastest). Storage grows to the largest
//! term seen and is reused when a smaller term becomes active.
//!
//! The shell owns a [`TensorPair`]: the term update handed to callers, and the
//! inner term update the booster works in.

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::arena::{Region, ScratchBudget};
use crate::error::BoostError;

/// Float type of model scores.
pub type FloatScore = f64;

// =============================================================================
// Tensor
// =============================================================================

/// Per-term score tensor with grow-only storage.
#[derive(Debug)]
pub struct Tensor {
    storage: Region<FloatScore>,
    shape: Vec<usize>,
    n_scores: usize,
}

impl Tensor {
    /// Empty tensor (no dimensions, no storage).
    pub fn new(name: &'static str, n_scores: usize) -> Self {
        debug_assert!(n_scores > 0, "n_scores must be positive");
        Self {
            storage: Region::new(name),
            shape: Vec::new(),
            n_scores,
        }
    }

    #[inline]
    pub fn n_scores(&self) -> usize {
        self.n_scores
    }

    /// Bins per dimension of the current term.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn n_dimensions(&self) -> usize {
        self.shape.len()
    }

    /// Number of cells (0 before the first `ensure_shape`).
    #[inline]
    pub fn n_cells(&self) -> usize {
        if self.shape.is_empty() {
            0
        } else {
            self.shape.iter().product()
        }
    }

    /// Active values: `n_cells * n_scores`.
    #[inline]
    fn len(&self) -> usize {
        self.n_cells() * self.n_scores
    }

    /// Bytes of storage held (may exceed the active shape).
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.storage.size_bytes()
    }

    /// Switch to `shape`, growing storage if needed.
    ///
    /// Values are unspecified afterwards; call [`reset`](Self::reset). On
    /// failure the previous shape and values are kept.
    pub fn ensure_shape(&mut self, shape: &[usize], budget: &mut ScratchBudget) -> Result<(), BoostError> {
        self.reserve(shape, budget)?;
        self.set_shape(shape);
        Ok(())
    }

    /// Grow storage to fit `shape` without switching to it.
    ///
    /// The current shape and values are unchanged, whether or not this
    /// succeeds.
    pub fn reserve(&mut self, shape: &[usize], budget: &mut ScratchBudget) -> Result<(), BoostError> {
        let len = shape
            .iter()
            .try_fold(self.n_scores, |acc, &b| acc.checked_mul(b))
            .ok_or_else(|| BoostError::oom(self.storage.name(), usize::MAX))?;
        self.storage.ensure(len, budget)?;
        Ok(())
    }

    /// Switch to a shape whose storage is already reserved.
    fn set_shape(&mut self, shape: &[usize]) {
        debug_assert!(shape.iter().product::<usize>() * self.n_scores <= self.storage.len());
        self.shape.clear();
        self.shape.extend_from_slice(shape);
    }

    /// Zero every active value.
    pub fn reset(&mut self) {
        let len = self.len();
        self.storage.as_mut_slice()[..len].fill(0.0);
    }

    /// Active values as `[cells, scores]`.
    pub fn values(&self) -> ArrayView2<'_, FloatScore> {
        let len = self.len();
        ArrayView2::from_shape((self.n_cells(), self.n_scores), &self.storage.as_slice()[..len])
            .expect("tensor storage matches its shape")
    }

    /// Active values as `[cells, scores]`, mutable.
    pub fn values_mut(&mut self) -> ArrayViewMut2<'_, FloatScore> {
        let (cells, scores, len) = (self.n_cells(), self.n_scores, self.len());
        ArrayViewMut2::from_shape((cells, scores), &mut self.storage.as_mut_slice()[..len])
            .expect("tensor storage matches its shape")
    }

    /// Flat cell index for a multi-dimensional bin index.
    pub fn cell_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        index
            .iter()
            .zip(&self.shape)
            .try_fold(0usize, |acc, (&i, &b)| (i < b).then(|| acc * b + i))
    }

    /// Scores of one cell.
    pub fn scores(&self, index: &[usize]) -> Option<&[FloatScore]> {
        let cell = self.cell_index(index)?;
        let start = cell * self.n_scores;
        Some(&self.storage.as_slice()[start..start + self.n_scores])
    }

    /// Scores of one cell, mutable.
    pub fn scores_mut(&mut self, index: &[usize]) -> Option<&mut [FloatScore]> {
        let cell = self.cell_index(index)?;
        let start = cell * self.n_scores;
        Some(&mut self.storage.as_mut_slice()[start..start + self.n_scores])
    }

    /// Make this tensor an exact copy of `other`.
    pub fn copy_from(&mut self, other: &Tensor, budget: &mut ScratchBudget) -> Result<(), BoostError> {
        if self.n_scores != other.n_scores {
            return Err(BoostError::ContractViolation("tensor score count mismatch"));
        }
        self.ensure_shape(&other.shape, budget)?;
        let len = self.len();
        self.storage.as_mut_slice()[..len].copy_from_slice(&other.storage.as_slice()[..len]);
        Ok(())
    }

    /// Element-wise `self += other`; shapes must match.
    pub fn add_assign(&mut self, other: &Tensor) -> Result<(), BoostError> {
        if self.shape != other.shape || self.n_scores != other.n_scores {
            return Err(BoostError::ContractViolation("tensor shape mismatch"));
        }
        let mut values = self.values_mut();
        values += &other.values();
        Ok(())
    }

    /// Multiply every value by `factor`.
    ///
    /// Returns `false` if any result is NaN or infinite.
    pub fn scale(&mut self, factor: FloatScore) -> bool {
        let len = self.len();
        let mut finite = true;
        for v in &mut self.storage.as_mut_slice()[..len] {
            *v *= factor;
            finite &= v.is_finite();
        }
        finite
    }

    /// Free storage and return the bytes to `budget`.
    pub fn release(&mut self, budget: &mut ScratchBudget) {
        self.storage.release(budget);
        self.shape.clear();
    }
}

// =============================================================================
// TensorPair
// =============================================================================

/// Term update and inner term update owned by a shell.
#[derive(Debug)]
pub struct TensorPair {
    pub term_update: Tensor,
    pub inner_term_update: Tensor,
}

impl TensorPair {
    pub fn new(n_scores: usize) -> Self {
        Self {
            term_update: Tensor::new("term update", n_scores),
            inner_term_update: Tensor::new("inner term update", n_scores),
        }
    }

    /// Size both tensors for a term and zero them.
    ///
    /// Both are grown before either switches shape, so on failure the pair
    /// still describes the previous term.
    pub fn prepare(&mut self, shape: &[usize], budget: &mut ScratchBudget) -> Result<(), BoostError> {
        self.term_update.reserve(shape, budget)?;
        self.inner_term_update.reserve(shape, budget)?;
        self.term_update.set_shape(shape);
        self.inner_term_update.set_shape(shape);
        self.term_update.reset();
        self.inner_term_update.reset();
        Ok(())
    }

    pub fn size_bytes(&self) -> usize {
        self.term_update.size_bytes() + self.inner_term_update.size_bytes()
    }

    pub fn release(&mut self, budget: &mut ScratchBudget) {
        self.term_update.release(budget);
        self.inner_term_update.release(budget);
    }
}
