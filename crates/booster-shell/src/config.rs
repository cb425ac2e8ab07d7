//! Session configuration with builder pattern.
//!
//! [`BoosterConfig`] describes what a boosting session needs to size its
//! scratch memory: the task (and so the number of scores per bin), the tree
//! growth limits, and an optional cap on scratch bytes. It uses the `bon`
//! crate for the builder and validates at build time.
//!
//! # Example
//!
//! ```
//! use booster_shell::config::{BoosterConfig, TaskKind, TreeLimits};
//!
//! let config = BoosterConfig::builder()
//!     .task(TaskKind::MulticlassClassification { n_classes: 3 })
//!     .tree(TreeLimits::new(5, 32))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.task.n_scores(), 3);
//! ```

use bon::Builder;
use serde::{Deserialize, Serialize};

// =============================================================================
// TaskKind
// =============================================================================

/// What kind of target the session boosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Regression (continuous target).
    #[default]
    Regression,
    /// Binary classification (2 classes, one logit).
    BinaryClassification,
    /// Multi-class classification (3+ classes).
    MulticlassClassification {
        /// Number of classes.
        n_classes: usize,
    },
}

impl TaskKind {
    /// Whether bins carry hessians alongside gradients.
    #[inline]
    pub fn is_classification(&self) -> bool {
        !matches!(self, Self::Regression)
    }

    /// Number of classes (0 for regression).
    #[inline]
    pub fn n_classes(&self) -> usize {
        match self {
            Self::Regression => 0,
            Self::BinaryClassification => 2,
            Self::MulticlassClassification { n_classes } => *n_classes,
        }
    }

    /// Number of scores (gradient slots) per bin and per tensor cell.
    ///
    /// Binary classification boosts a single logit.
    #[inline]
    pub fn n_scores(&self) -> usize {
        match self {
            Self::Regression | Self::BinaryClassification => 1,
            Self::MulticlassClassification { n_classes } => *n_classes,
        }
    }
}

// =============================================================================
// TreeLimits
// =============================================================================

/// Bounds on a single tree-growing round.
///
/// These bound the tree-node and split-position scratch regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLimits {
    /// Maximum depth of a tree (root is depth 0). Must be >= 1.
    pub max_depth: usize,
    /// Maximum number of leaves. Must be >= 2.
    pub max_leaves: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_depth: 6,
            max_leaves: 64,
        }
    }
}

impl TreeLimits {
    pub fn new(max_depth: usize, max_leaves: usize) -> Self {
        Self {
            max_depth,
            max_leaves,
        }
    }

    /// Leaves a depth-limited tree can reach: `2^max_depth`, saturating.
    #[inline]
    pub fn depth_leaf_bound(&self) -> usize {
        u32::try_from(self.max_depth)
            .ok()
            .and_then(|d| 1usize.checked_shl(d))
            .unwrap_or(usize::MAX)
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Multiclass needs at least 3 classes.
    #[error("multiclass classification needs at least 3 classes, got {0}")]
    InvalidClassCount(usize),

    /// max_depth must be >= 1.
    #[error("max_depth must be >= 1, got {0}")]
    InvalidMaxDepth(usize),

    /// max_leaves must be >= 2.
    #[error("max_leaves must be >= 2, got {0}")]
    InvalidMaxLeaves(usize),

    /// A term has no dimensions.
    #[error("term {0} has no dimensions")]
    EmptyTerm(usize),

    /// A term dimension has zero bins.
    #[error("term {term} dimension {dimension} has zero bins")]
    ZeroBins { term: usize, dimension: usize },
}

// =============================================================================
// BoosterConfig
// =============================================================================

/// Configuration for one boosting session.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
#[serde(default)]
pub struct BoosterConfig {
    /// Learning task. Default: regression.
    #[builder(default)]
    pub task: TaskKind,

    /// Tree growth limits.
    #[builder(default)]
    pub tree: TreeLimits,

    /// Cap on bytes held by scratch regions and tensors. `None` is unbounded.
    pub scratch_budget: Option<usize>,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            task: TaskKind::default(),
            tree: TreeLimits::default(),
            scratch_budget: None,
        }
    }
}

impl<S: booster_config_builder::IsComplete> BoosterConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the task or tree limits are invalid.
    pub fn build(self) -> Result<BoosterConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl BoosterConfig {
    /// Validate the configuration.
    ///
    /// Called by the builder; call it yourself after deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let TaskKind::MulticlassClassification { n_classes } = self.task {
            if n_classes < 3 {
                return Err(ConfigError::InvalidClassCount(n_classes));
            }
        }
        if self.tree.max_depth == 0 {
            return Err(ConfigError::InvalidMaxDepth(self.tree.max_depth));
        }
        if self.tree.max_leaves < 2 {
            return Err(ConfigError::InvalidMaxLeaves(self.tree.max_leaves));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
