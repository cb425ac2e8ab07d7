//! Session core: the read-only model/data context a shell is attached to.
//!
//! The shell never owns the core outright. It holds an `Arc` to it so several
//! shells (e.g. one per cross-validation fold) can share one core, and it only
//! ever reads sizing information through the [`SessionCore`] trait.

use serde::{Deserialize, Serialize};

use crate::config::{BoosterConfig, ConfigError, TaskKind, TreeLimits};

// =============================================================================
// Term
// =============================================================================

/// A group of one or more features boosted together.
///
/// Stores the number of bins along each dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    bins: Vec<usize>,
}

impl Term {
    pub fn new(bins: impl Into<Vec<usize>>) -> Self {
        Self { bins: bins.into() }
    }

    /// Single-feature term.
    pub fn main(bins: usize) -> Self {
        Self { bins: vec![bins] }
    }

    /// Bins per dimension.
    #[inline]
    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    #[inline]
    pub fn n_dimensions(&self) -> usize {
        self.bins.len()
    }

    /// Widest single dimension.
    #[inline]
    pub fn width(&self) -> usize {
        self.bins.iter().copied().max().unwrap_or(0)
    }

    /// Cells of the full tensor: product of bins. `None` on overflow.
    pub fn tensor_bins(&self) -> Option<usize> {
        self.bins.iter().try_fold(1usize, |acc, &b| acc.checked_mul(b))
    }

    /// Marginal total bins used by multi-dimensional split search.
    ///
    /// Zero for single-dimension terms, otherwise `Σ_d tensor_bins / bins_d`.
    pub fn auxiliary_bins(&self) -> Option<usize> {
        if self.bins.len() < 2 {
            return Some(0);
        }
        let total = self.tensor_bins()?;
        self.bins
            .iter()
            .try_fold(0usize, |acc, &b| acc.checked_add(total / b.max(1)))
    }
}

// =============================================================================
// SessionCore
// =============================================================================

/// Read-only view of a session's configuration, as consumed by the shell.
pub trait SessionCore: Send + Sync {
    /// Learning task.
    fn task(&self) -> TaskKind;

    /// All terms the session will boost.
    fn terms(&self) -> &[Term];

    /// Tree growth limits.
    fn tree_limits(&self) -> TreeLimits;

    /// Cap on scratch bytes, if any.
    fn scratch_budget(&self) -> Option<usize> {
        None
    }

    #[inline]
    fn is_classification(&self) -> bool {
        self.task().is_classification()
    }

    #[inline]
    fn n_classes(&self) -> usize {
        self.task().n_classes()
    }

    #[inline]
    fn n_scores(&self) -> usize {
        self.task().n_scores()
    }

    /// Widest single dimension over all terms.
    fn max_term_width(&self) -> usize {
        self.terms().iter().map(Term::width).max().unwrap_or(0)
    }
}

// =============================================================================
// BoosterCore
// =============================================================================

/// Concrete session core built from a [`BoosterConfig`] and the term list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoosterCore {
    config: BoosterConfig,
    terms: Vec<Term>,
}

impl BoosterCore {
    /// Validate and build a core.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config is invalid, a term has no
    /// dimensions, or any dimension has zero bins.
    pub fn new(config: BoosterConfig, terms: Vec<Term>) -> Result<Self, ConfigError> {
        config.validate()?;
        for (i, term) in terms.iter().enumerate() {
            if term.bins.is_empty() {
                return Err(ConfigError::EmptyTerm(i));
            }
            if let Some(d) = term.bins.iter().position(|&b| b == 0) {
                return Err(ConfigError::ZeroBins {
                    term: i,
                    dimension: d,
                });
            }
        }
        Ok(Self { config, terms })
    }

    #[inline]
    pub fn config(&self) -> &BoosterConfig {
        &self.config
    }
}

impl SessionCore for BoosterCore {
    fn task(&self) -> TaskKind {
        self.config.task
    }

    fn terms(&self) -> &[Term] {
        &self.terms
    }

    fn tree_limits(&self) -> TreeLimits {
        self.config.tree
    }

    fn scratch_budget(&self) -> Option<usize> {
        self.config.scratch_budget
    }
}
