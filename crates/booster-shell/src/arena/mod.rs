//! Reusable scratch memory for tree growing.
//!
//! A [`ScratchArena`] owns five independently sized regions that every
//! tree-growing round of a session reuses:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ScratchArena                                                  │
//! │  fast_bins        [bin][bin]...      f32 records, runtime stride
//! │  big_bins         [bin][bin]...      f64 records, runtime stride
//! │  multiclass_midway[f32; n_scores]                             │
//! │  split_positions  [hdr|bin][hdr|bin]...                       │
//! │  tree_nodes       [hdr|bin][hdr|bin]...                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Regions are sized to the largest requirement seen and never shrink until
//! [`ScratchArena::release`]. Contents survive between rounds; callers clear
//! what they need.
//!
//! Debug builds record the end address of both bin regions at fill time, and
//! bin views check every record they hand out against it. Release builds
//! carry no such fields.

mod layout;
mod region;
mod views;

pub use layout::{
    ArenaLayout, ArenaRequirements, BinFloat, BinLayout, RecordLayout, RECORD_ALIGN,
    SPLIT_POSITION_HEADER_BYTES, TREE_NODE_HEADER_BYTES,
};
pub use region::{ByteRegion, Growth, Region, ScratchBudget};
pub use views::{BinMut, BinsMut, SplitPositions, TreeNodeHeader, TreeNodes};

use std::fmt;

use crate::error::BoostError;

// =============================================================================
// ArenaMetrics
// =============================================================================

/// Statistics for arena usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaMetrics {
    /// Number of successful fills.
    pub fills: u64,
    /// Fills that had to grow at least one region.
    pub grows: u64,
    /// Fills served entirely from existing regions.
    pub reuses: u64,
    /// Bytes currently held by the arena.
    pub reserved_bytes: usize,
    /// Maximum bytes held at any point.
    pub peak_bytes: usize,
}

impl fmt::Display for ArenaMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArenaMetrics {{ fills: {}, grows: {}, reuses: {}, reserved: {}B, peak: {}B }}",
            self.fills, self.grows, self.reuses, self.reserved_bytes, self.peak_bytes
        )
    }
}

// =============================================================================
// DebugBounds
// =============================================================================

/// End addresses of the bin regions, debug builds only.
#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy, Default)]
struct DebugBounds {
    fast_end: usize,
    big_end: usize,
}

#[cfg(debug_assertions)]
#[inline]
fn end_address(bytes: &[u8]) -> usize {
    bytes.as_ptr_range().end as usize
}

// =============================================================================
// ScratchArena
// =============================================================================

/// Owned scratch regions reused across tree-growing rounds.
#[derive(Debug)]
pub struct ScratchArena {
    fast_bins: ByteRegion,
    big_bins: ByteRegion,
    multiclass_midway: Region<f32>,
    split_positions: ByteRegion,
    tree_nodes: ByteRegion,
    layout: Option<ArenaLayout>,
    metrics: ArenaMetrics,
    #[cfg(debug_assertions)]
    bounds: DebugBounds,
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchArena {
    /// Empty arena. Nothing is allocated until [`fill`](Self::fill).
    pub fn new() -> Self {
        Self {
            fast_bins: ByteRegion::new("fast bins"),
            big_bins: ByteRegion::new("big bins"),
            multiclass_midway: Region::new("multiclass midway"),
            split_positions: ByteRegion::new("split positions"),
            tree_nodes: ByteRegion::new("tree nodes"),
            layout: None,
            metrics: ArenaMetrics::default(),
            #[cfg(debug_assertions)]
            bounds: DebugBounds::default(),
        }
    }

    /// Grow every region to cover `req`.
    ///
    /// Regions are grown in order: fast bins, big bins, multiclass midway,
    /// split positions, tree nodes. On failure the regions grown so far keep
    /// their new size, the failing region and all later ones keep their old
    /// size, and the arena stays releasable.
    pub fn fill(&mut self, req: &ArenaRequirements, budget: &mut ScratchBudget) -> Result<(), BoostError> {
        if let Some(layout) = self.layout {
            debug_assert_eq!(layout, req.layout, "arena layout changed between fills");
        }
        self.layout = Some(req.layout);

        let result = self.fill_regions(req, budget);
        self.metrics.reserved_bytes = self.size_bytes();
        self.metrics.peak_bytes = self.metrics.peak_bytes.max(self.metrics.reserved_bytes);

        let grew = result?;
        self.metrics.fills += 1;
        if grew {
            self.metrics.grows += 1;
        } else {
            self.metrics.reuses += 1;
        }
        Ok(())
    }

    fn fill_regions(&mut self, req: &ArenaRequirements, budget: &mut ScratchBudget) -> Result<bool, BoostError> {
        let mut grew = false;

        grew |= self.fast_bins.ensure(req.fast_bins_bytes()?, budget)? == Growth::Grown;
        #[cfg(debug_assertions)]
        {
            self.bounds.fast_end = end_address(self.fast_bins.as_bytes());
        }

        grew |= self.big_bins.ensure(req.big_bins_bytes()?, budget)? == Growth::Grown;
        #[cfg(debug_assertions)]
        {
            self.bounds.big_end = end_address(self.big_bins.as_bytes());
        }

        grew |= self.multiclass_midway.ensure(req.midway_slots, budget)? == Growth::Grown;
        grew |= self.split_positions.ensure(req.split_positions_bytes()?, budget)? == Growth::Grown;
        grew |= self.tree_nodes.ensure(req.tree_nodes_bytes()?, budget)? == Growth::Grown;
        Ok(grew)
    }

    /// Free every region and return the bytes to `budget`.
    pub fn release(&mut self, budget: &mut ScratchBudget) {
        self.fast_bins.release(budget);
        self.big_bins.release(budget);
        self.multiclass_midway.release(budget);
        self.split_positions.release(budget);
        self.tree_nodes.release(budget);
        self.layout = None;
        self.metrics.reserved_bytes = 0;
        #[cfg(debug_assertions)]
        {
            self.bounds = DebugBounds::default();
        }
    }

    /// Whether a fill has succeeded since creation or the last release.
    #[inline]
    pub fn is_filled(&self) -> bool {
        self.metrics.reserved_bytes > 0 && self.layout.is_some() && !self.tree_nodes.is_empty()
    }

    #[inline]
    pub fn layout(&self) -> Option<ArenaLayout> {
        self.layout
    }

    #[inline]
    pub fn metrics(&self) -> &ArenaMetrics {
        &self.metrics
    }

    /// Bytes held by all regions.
    pub fn size_bytes(&self) -> usize {
        self.fast_bins.size_bytes()
            + self.big_bins.size_bytes()
            + self.multiclass_midway.size_bytes()
            + self.split_positions.size_bytes()
            + self.tree_nodes.size_bytes()
    }

    // =========================================================================
    // Raw region access
    // =========================================================================

    #[inline]
    pub fn fast_bins(&mut self) -> &mut [u8] {
        self.fast_bins.as_bytes_mut()
    }

    #[inline]
    pub fn big_bins(&mut self) -> &mut [u8] {
        self.big_bins.as_bytes_mut()
    }

    #[inline]
    pub fn multiclass_midway(&mut self) -> &mut [f32] {
        self.multiclass_midway.as_mut_slice()
    }

    #[inline]
    pub fn tree_nodes(&mut self) -> &mut [u8] {
        self.tree_nodes.as_bytes_mut()
    }

    #[inline]
    pub fn split_positions(&mut self) -> &mut [u8] {
        self.split_positions.as_bytes_mut()
    }

    // =========================================================================
    // Typed views
    // =========================================================================

    /// Fast bins as `f32` records. `None` before the first fill.
    pub fn fast_bins_view(&mut self) -> Option<BinsMut<'_, f32>> {
        let layout = self.layout?.fast_bin;
        let bins = BinsMut::new(self.fast_bins.as_bytes_mut(), layout);
        #[cfg(debug_assertions)]
        let bins = bins.with_debug_end(self.bounds.fast_end);
        Some(bins)
    }

    /// Big bins as `f64` records. `None` before the first fill.
    pub fn big_bins_view(&mut self) -> Option<BinsMut<'_, f64>> {
        let layout = self.layout?.big_bin;
        let bins = BinsMut::new(self.big_bins.as_bytes_mut(), layout);
        #[cfg(debug_assertions)]
        let bins = bins.with_debug_end(self.bounds.big_end);
        Some(bins)
    }

    /// Tree-node scratch. `None` before the first fill.
    ///
    /// # Panics
    ///
    /// Panics if `CLASSIFICATION` does not match the session task.
    pub fn tree_nodes_view<const CLASSIFICATION: bool>(
        &mut self,
    ) -> Option<TreeNodes<'_, CLASSIFICATION>> {
        let layout = self.layout?.tree_node;
        Some(TreeNodes::new(self.tree_nodes.as_bytes_mut(), layout))
    }

    /// Split-position scratch. `None` before the first fill.
    ///
    /// # Panics
    ///
    /// Panics if `CLASSIFICATION` does not match the session task.
    pub fn split_positions_view<const CLASSIFICATION: bool>(
        &mut self,
    ) -> Option<SplitPositions<'_, CLASSIFICATION>> {
        let layout = self.layout?.split_position;
        Some(SplitPositions::new(self.split_positions.as_bytes_mut(), layout))
    }

    // =========================================================================
    // Debug bounds
    // =========================================================================

    /// Recorded end address of the fast-bin region.
    #[cfg(debug_assertions)]
    #[inline]
    pub fn bins_fast_end_debug(&self) -> usize {
        self.bounds.fast_end
    }

    /// Recorded end address of the big-bin region.
    #[cfg(debug_assertions)]
    #[inline]
    pub fn bins_big_end_debug(&self) -> usize {
        self.bounds.big_end
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskKind, TreeLimits};
    use crate::core::Term;

    fn requirements(task: TaskKind, terms: &[Term]) -> ArenaRequirements {
        ArenaRequirements::for_terms(task, TreeLimits::new(4, 16), terms).unwrap()
    }

    #[test]
    fn fill_sizes_every_region() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        let req = requirements(TaskKind::Regression, &[Term::main(8)]);
        arena.fill(&req, &mut budget).unwrap();

        assert!(arena.is_filled());
        assert_eq!(arena.fast_bins().len(), 8 * req.layout.fast_bin.stride());
        assert_eq!(arena.big_bins().len(), 8 * req.layout.big_bin.stride());
        assert_eq!(arena.multiclass_midway().len(), 1);
        assert_eq!(arena.tree_nodes().len(), req.tree_nodes * req.layout.tree_node.stride());
        assert_eq!(
            arena.split_positions().len(),
            req.split_positions * req.layout.split_position.stride()
        );
        assert_eq!(budget.used(), arena.size_bytes());
    }

    #[test]
    fn refill_reuses_regions() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        let req = requirements(TaskKind::BinaryClassification, &[Term::main(8), Term::new([3, 3])]);

        arena.fill(&req, &mut budget).unwrap();
        let fast = arena.fast_bins().as_ptr();
        let nodes = arena.tree_nodes().as_ptr();

        arena.fill(&req, &mut budget).unwrap();
        assert_eq!(arena.fast_bins().as_ptr(), fast);
        assert_eq!(arena.tree_nodes().as_ptr(), nodes);
        assert_eq!(arena.metrics().fills, 2);
        assert_eq!(arena.metrics().grows, 1);
        assert_eq!(arena.metrics().reuses, 1);
    }

    #[test]
    fn smaller_requirement_keeps_larger_regions() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        let task = TaskKind::Regression;
        let big = requirements(task, &[Term::main(32)]);
        let small = requirements(task, &[Term::main(4)]);

        arena.fill(&big, &mut budget).unwrap();
        let len = arena.fast_bins().len();
        arena.fill(&small, &mut budget).unwrap();
        assert_eq!(arena.fast_bins().len(), len);
    }

    #[test]
    fn failed_fill_keeps_earlier_regions_and_releases_cleanly() {
        let task = TaskKind::Regression;
        let req = requirements(task, &[Term::main(8)]);
        let bins_only = req.fast_bins_bytes().unwrap() + req.big_bins_bytes().unwrap() + 4;
        let mut budget = ScratchBudget::new(Some(bins_only));
        let mut arena = ScratchArena::new();

        let err = arena.fill(&req, &mut budget).unwrap_err();
        assert!(matches!(err, BoostError::OutOfMemory { region: "split positions", .. }));
        assert_eq!(arena.fast_bins().len(), req.fast_bins_bytes().unwrap());
        assert_eq!(arena.big_bins().len(), req.big_bins_bytes().unwrap());
        assert!(arena.split_positions().is_empty());
        assert!(arena.tree_nodes().is_empty());
        assert!(!arena.is_filled());
        assert_eq!(arena.metrics().fills, 0);

        arena.release(&mut budget);
        assert_eq!(budget.used(), 0);
        assert_eq!(arena.size_bytes(), 0);
    }

    #[test]
    fn typed_views_follow_task() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        let task = TaskKind::MulticlassClassification { n_classes: 3 };
        arena.fill(&requirements(task, &[Term::main(5)]), &mut budget).unwrap();

        let mut fast = arena.fast_bins_view().unwrap();
        assert_eq!(fast.len(), 5);
        fast.bin_mut(4).add_sample(1.0, &[1.0, 2.0, 3.0], &[1.0; 3]);

        let big = arena.big_bins_view().unwrap();
        assert_eq!(big.layout().n_scores(), 3);

        assert!(arena.tree_nodes_view::<true>().unwrap().len() >= 1);
        assert!(arena.split_positions_view::<true>().unwrap().len() >= 1);
    }

    #[test]
    fn views_are_none_before_fill() {
        let mut arena = ScratchArena::new();
        assert!(arena.fast_bins_view().is_none());
        assert!(arena.big_bins_view().is_none());
        assert!(arena.tree_nodes_view::<false>().is_none());
        assert!(arena.split_positions_view::<false>().is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn debug_bounds_track_bin_region_ends() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        arena
            .fill(&requirements(TaskKind::Regression, &[Term::main(6)]), &mut budget)
            .unwrap();

        let fast_end = arena.fast_bins().as_ptr_range().end as usize;
        let big_end = arena.big_bins().as_ptr_range().end as usize;
        assert_eq!(arena.bins_fast_end_debug(), fast_end);
        assert_eq!(arena.bins_big_end_debug(), big_end);

        arena.release(&mut budget);
        assert_eq!(arena.bins_fast_end_debug(), 0);
    }

    #[test]
    fn metrics_track_peak() {
        let mut arena = ScratchArena::new();
        let mut budget = ScratchBudget::unlimited();
        arena
            .fill(&requirements(TaskKind::Regression, &[Term::main(6)]), &mut budget)
            .unwrap();
        let peak = arena.metrics().peak_bytes;
        assert_eq!(peak, arena.size_bytes());
        arena.release(&mut budget);
        assert_eq!(arena.metrics().reserved_bytes, 0);
        assert_eq!(arena.metrics().peak_bytes, peak);
    }
}
