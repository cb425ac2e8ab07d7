//! The booster shell: one boosting session's mutable state.
//!
//! A [`BoosterShell`] ties a session core to the memory a boosting round
//! needs: the active term, the [`TensorPair`] and the [`ScratchArena`].
//!
//! # Lifecycle
//!
//! ```text
//! Created ──attach_core──► CoreAttached ──fill_allocations──► AllocationsFilled
//!                                │                                 │  ▲
//!                                │                          prepare_term / fill
//!                                └──(failure)──► AllocationFailed ◄┘
//! ```
//!
//! Every state can be released. Shells reached through a
//! [`HandleRegistry`](crate::handle::HandleRegistry) are validated there once;
//! the accessors here assume the caller already holds a valid shell.

use std::sync::Arc;

use crate::arena::{
    ArenaRequirements, BinsMut, ScratchArena, ScratchBudget, SplitPositions, TreeNodes,
};
use crate::core::SessionCore;
use crate::error::BoostError;
use crate::tensor::{Tensor, TensorPair};

/// Tensor shape used when the core has no terms.
const SCALAR_SHAPE: &[usize] = &[1];

/// Lifecycle state of a shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// Fresh shell: no core, no memory.
    Created,
    /// Core attached, nothing allocated yet.
    CoreAttached,
    /// Tensors and arena sized for the core.
    AllocationsFilled,
    /// The last fill ran out of memory. Earlier regions are intact.
    AllocationFailed,
}

/// Session record behind a booster handle.
pub struct BoosterShell {
    core: Option<Arc<dyn SessionCore>>,
    term_index: Option<usize>,
    tensors: Option<TensorPair>,
    arena: ScratchArena,
    budget: ScratchBudget,
    state: ShellState,
}

impl Default for BoosterShell {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BoosterShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoosterShell")
            .field("state", &self.state)
            .field("term_index", &self.term_index)
            .field("budget", &self.budget)
            .field("arena", self.arena.metrics())
            .finish()
    }
}

impl BoosterShell {
    /// New shell in the `Created` state. Safe to release immediately.
    pub fn new() -> Self {
        Self {
            core: None,
            term_index: None,
            tensors: None,
            arena: ScratchArena::new(),
            budget: ScratchBudget::unlimited(),
            state: ShellState::Created,
        }
    }

    #[inline]
    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Attach the session core. Allowed exactly once.
    ///
    /// # Errors
    ///
    /// A second attach is a contract violation: it panics in debug builds
    /// and returns [`BoostError::ContractViolation`] in release builds. The
    /// first core stays attached either way.
    pub fn attach_core(&mut self, core: Arc<dyn SessionCore>) -> Result<(), BoostError> {
        if self.core.is_some() {
            log::error!("attach_core called on a shell that already has a core");
            debug_assert!(false, "booster core attached twice");
            return Err(BoostError::ContractViolation("booster core attached twice"));
        }
        self.budget = ScratchBudget::new(core.scratch_budget());
        self.core = Some(core);
        self.state = ShellState::CoreAttached;
        log::debug!("booster shell: core attached");
        Ok(())
    }

    /// The attached core, if any.
    #[inline]
    pub fn core(&self) -> Option<&Arc<dyn SessionCore>> {
        self.core.as_ref()
    }

    fn require_core(&self) -> Result<Arc<dyn SessionCore>, BoostError> {
        self.core
            .clone()
            .ok_or(BoostError::ContractViolation("no booster core attached"))
    }

    /// Size tensors and scratch regions for every term of the core.
    ///
    /// Tensors are sized for the active term if one is selected, otherwise
    /// for the term with the most cells. Regions only grow, so calling this
    /// again with the same core reuses every buffer.
    ///
    /// # Errors
    ///
    /// [`BoostError::OutOfMemory`] if an allocation fails or the scratch
    /// budget is exceeded. The shell is then `AllocationFailed` and should be
    /// released; regions filled before the failure stay valid.
    pub fn fill_allocations(&mut self) -> Result<(), BoostError> {
        let core = self.require_core()?;
        let terms = core.terms();
        let shape = match self.term_index.and_then(|i| terms.get(i)) {
            Some(term) => term.bins(),
            None => terms
                .iter()
                .max_by_key(|t| t.tensor_bins().unwrap_or(usize::MAX))
                .map_or(SCALAR_SHAPE, |t| t.bins()),
        };

        let result = ArenaRequirements::for_core(&*core).and_then(|req| {
            self.tensors
                .get_or_insert_with(|| TensorPair::new(core.n_scores()))
                .prepare(shape, &mut self.budget)?;
            self.arena.fill(&req, &mut self.budget)
        });
        self.finish_fill(result)
    }

    /// Make `index` the active term: size both tensors for it (zeroed) and
    /// make sure the arena covers it.
    ///
    /// # Errors
    ///
    /// [`BoostError::InvalidTerm`] for an index outside the core,
    /// [`BoostError::OutOfMemory`] as for [`fill_allocations`](Self::fill_allocations).
    pub fn prepare_term(&mut self, index: usize) -> Result<(), BoostError> {
        let core = self.require_core()?;
        let req = ArenaRequirements::for_term(&*core, index)?;
        let term = &core.terms()[index];

        let result = self
            .tensors
            .get_or_insert_with(|| TensorPair::new(core.n_scores()))
            .prepare(term.bins(), &mut self.budget)
            .and_then(|()| self.arena.fill(&req, &mut self.budget));
        self.finish_fill(result)?;
        self.term_index = Some(index);
        Ok(())
    }

    fn finish_fill(&mut self, result: Result<(), BoostError>) -> Result<(), BoostError> {
        match result {
            Ok(()) => {
                self.state = ShellState::AllocationsFilled;
                log::debug!("booster shell: allocations filled, {}", self.arena.metrics());
                Ok(())
            }
            Err(e) => {
                self.state = ShellState::AllocationFailed;
                log::warn!("booster shell: fill failed: {}", e);
                Err(e)
            }
        }
    }

    /// Copy the inner term update into the published term update.
    pub fn publish_term_update(&mut self) -> Result<(), BoostError> {
        let tensors = self
            .tensors
            .as_mut()
            .ok_or(BoostError::ContractViolation("tensors not allocated"))?;
        tensors
            .term_update
            .copy_from(&tensors.inner_term_update, &mut self.budget)
    }

    /// Release all owned memory and detach the core.
    ///
    /// Tensors go first, then the arena, then the core reference.
    pub fn release(&mut self) {
        if let Some(tensors) = self.tensors.as_mut() {
            tensors.release(&mut self.budget);
        }
        self.tensors = None;
        self.arena.release(&mut self.budget);
        self.core = None;
        self.term_index = None;
        debug_assert_eq!(self.budget.used(), 0);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Active term, `None` if none has been selected.
    #[inline]
    pub fn term_index(&self) -> Option<usize> {
        self.term_index
    }

    #[inline]
    pub fn set_term_index(&mut self, index: Option<usize>) {
        self.term_index = index;
    }

    #[inline]
    pub fn term_update(&mut self) -> Option<&mut Tensor> {
        self.tensors.as_mut().map(|t| &mut t.term_update)
    }

    #[inline]
    pub fn inner_term_update(&mut self) -> Option<&mut Tensor> {
        self.tensors.as_mut().map(|t| &mut t.inner_term_update)
    }

    /// Both tensors at once.
    #[inline]
    pub fn tensors(&mut self) -> Option<&mut TensorPair> {
        self.tensors.as_mut()
    }

    #[inline]
    pub fn arena(&mut self) -> &mut ScratchArena {
        &mut self.arena
    }

    #[inline]
    pub fn budget(&self) -> &ScratchBudget {
        &self.budget
    }

    #[inline]
    pub fn fast_bins(&mut self) -> Option<BinsMut<'_, f32>> {
        self.arena.fast_bins_view()
    }

    #[inline]
    pub fn big_bins(&mut self) -> Option<BinsMut<'_, f64>> {
        self.arena.big_bins_view()
    }

    #[inline]
    pub fn multiclass_midway(&mut self) -> &mut [f32] {
        self.arena.multiclass_midway()
    }

    #[inline]
    pub fn tree_nodes<const CLASSIFICATION: bool>(&mut self) -> Option<TreeNodes<'_, CLASSIFICATION>> {
        self.arena.tree_nodes_view::<CLASSIFICATION>()
    }

    #[inline]
    pub fn split_positions<const CLASSIFICATION: bool>(
        &mut self,
    ) -> Option<SplitPositions<'_, CLASSIFICATION>> {
        self.arena.split_positions_view::<CLASSIFICATION>()
    }

    #[cfg(debug_assertions)]
    #[inline]
    pub fn bins_fast_end_debug(&self) -> usize {
        self.arena.bins_fast_end_debug()
    }

    #[cfg(debug_assertions)]
    #[inline]
    pub fn bins_big_end_debug(&self) -> usize {
        self.arena.bins_big_end_debug()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoosterConfig, TaskKind, TreeLimits};
    use crate::core::{BoosterCore, Term};

    fn core(task: TaskKind, terms: Vec<Term>) -> Arc<dyn SessionCore> {
        let config = BoosterConfig::builder()
            .task(task)
            .tree(TreeLimits::new(5, 32))
            .build()
            .unwrap();
        Arc::new(BoosterCore::new(config, terms).unwrap())
    }

    #[test]
    fn new_shell_is_empty_and_releasable() {
        let mut shell = BoosterShell::new();
        assert_eq!(shell.state(), ShellState::Created);
        assert!(shell.core().is_none());
        assert_eq!(shell.term_index(), None);
        assert!(shell.term_update().is_none());
        assert!(shell.fast_bins().is_none());
        shell.release();
        assert_eq!(shell.budget().used(), 0);
    }

    #[test]
    fn fill_before_attach_is_rejected() {
        let mut shell = BoosterShell::new();
        assert!(matches!(
            shell.fill_allocations(),
            Err(BoostError::ContractViolation(_))
        ));
    }

    #[test]
    fn fill_sizes_tensors_for_largest_term() {
        let mut shell = BoosterShell::new();
        shell
            .attach_core(core(TaskKind::Regression, vec![Term::main(4), Term::new([3, 5])]))
            .unwrap();
        shell.fill_allocations().unwrap();
        assert_eq!(shell.state(), ShellState::AllocationsFilled);
        assert_eq!(shell.term_update().unwrap().shape(), &[3, 5]);
        assert_eq!(shell.inner_term_update().unwrap().n_cells(), 15);
    }

    #[test]
    fn prepare_term_switches_tensor_shape() {
        let mut shell = BoosterShell::new();
        shell
            .attach_core(core(
                TaskKind::MulticlassClassification { n_classes: 3 },
                vec![Term::main(4), Term::new([3, 5])],
            ))
            .unwrap();
        shell.fill_allocations().unwrap();
        let used = shell.budget().used();

        shell.prepare_term(0).unwrap();
        assert_eq!(shell.term_index(), Some(0));
        let update = shell.term_update().unwrap();
        assert_eq!(update.shape(), &[4]);
        assert_eq!(update.n_scores(), 3);
        // everything was already sized for the largest term
        assert_eq!(shell.budget().used(), used);

        let err = shell.prepare_term(2).unwrap_err();
        assert_eq!(err, BoostError::InvalidTerm { index: 2, n_terms: 2 });
        assert_eq!(shell.term_index(), Some(0));
    }

    fn budgeted_core(task: TaskKind, terms: Vec<Term>, budget: usize) -> Arc<dyn SessionCore> {
        let config = BoosterConfig::builder()
            .task(task)
            .tree(TreeLimits::new(5, 32))
            .scratch_budget(budget)
            .build()
            .unwrap();
        Arc::new(BoosterCore::new(config, terms).unwrap())
    }

    #[test]
    fn failed_prepare_term_keeps_previous_term_intact() {
        let terms = vec![Term::main(4), Term::main(40)];

        // bytes held once term 0 is prepared
        let mut sizing_shell = BoosterShell::new();
        sizing_shell.attach_core(core(TaskKind::Regression, terms.clone())).unwrap();
        sizing_shell.prepare_term(0).unwrap();
        let term0_bytes = sizing_shell.budget().used();

        // the term update can grow to 40 cells, the inner update cannot
        let budget = term0_bytes + (40 - 4) * 8 + 16;
        let mut shell = BoosterShell::new();
        shell
            .attach_core(budgeted_core(TaskKind::Regression, terms, budget))
            .unwrap();
        shell.prepare_term(0).unwrap();
        shell.term_update().unwrap().scores_mut(&[2]).unwrap()[0] = 0.75;
        shell.inner_term_update().unwrap().scores_mut(&[3]).unwrap()[0] = -0.5;

        let err = shell.prepare_term(1).unwrap_err();
        assert!(matches!(err, BoostError::OutOfMemory { region: "inner term update", .. }));
        assert_eq!(shell.state(), ShellState::AllocationFailed);
        assert_eq!(shell.term_index(), Some(0));

        let update = shell.term_update().unwrap();
        assert_eq!(update.shape(), &[4]);
        assert_eq!(update.scores(&[2]).unwrap(), &[0.75]);
        let inner = shell.inner_term_update().unwrap();
        assert_eq!(inner.shape(), &[4]);
        assert_eq!(inner.scores(&[3]).unwrap(), &[-0.5]);

        shell.release();
        assert_eq!(shell.budget().used(), 0);
    }

    #[test]
    fn publish_copies_inner_update() {
        let mut shell = BoosterShell::new();
        shell.attach_core(core(TaskKind::Regression, vec![Term::main(3)])).unwrap();
        shell.prepare_term(0).unwrap();
        shell
            .inner_term_update()
            .unwrap()
            .scores_mut(&[1])
            .unwrap()[0] = 0.5;
        shell.publish_term_update().unwrap();
        assert_eq!(shell.term_update().unwrap().scores(&[1]).unwrap(), &[0.5]);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "booster core attached twice")]
    fn second_attach_panics_in_debug() {
        let mut shell = BoosterShell::new();
        shell.attach_core(core(TaskKind::Regression, vec![Term::main(3)])).unwrap();
        let _ = shell.attach_core(core(TaskKind::Regression, vec![Term::main(3)]));
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn second_attach_is_rejected_in_release() {
        let mut shell = BoosterShell::new();
        let first = core(TaskKind::Regression, vec![Term::main(3)]);
        shell.attach_core(first.clone()).unwrap();
        let err = shell
            .attach_core(core(TaskKind::BinaryClassification, vec![Term::main(9)]))
            .unwrap_err();
        assert!(matches!(err, BoostError::ContractViolation(_)));
        assert!(Arc::ptr_eq(shell.core().unwrap(), &first));
    }

    #[test]
    fn release_returns_every_byte() {
        let mut shell = BoosterShell::new();
        shell
            .attach_core(core(TaskKind::BinaryClassification, vec![Term::main(16)]))
            .unwrap();
        shell.fill_allocations().unwrap();
        assert!(shell.budget().used() > 0);
        shell.release();
        assert_eq!(shell.budget().used(), 0);
        assert!(shell.core().is_none());
    }
}
