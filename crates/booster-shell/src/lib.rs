//! booster-shell: session lifecycle and scratch memory for a boosting trainer.
//!
//! A boosting session is driven through an opaque [`BoosterHandle`]. Behind
//! it sits a [`BoosterShell`] holding the active term, the term-update
//! tensors and a [`ScratchArena`] of histogram and tree-building buffers,
//! all sized once for the attached [`SessionCore`] and reused every round.
//!
//! # Key Types
//!
//! - [`HandleRegistry`] / [`BoosterHandle`] - Create, validate and free sessions
//! - [`BoosterShell`] - One session's mutable state
//! - [`ScratchArena`] - Fast bins, big bins, multiclass midway, tree nodes, split positions
//! - [`TensorPair`] - Term update and inner term update
//! - [`BoosterConfig`] / [`BoosterCore`] - Session configuration
//!
//! # Lifecycle
//!
//! ```
//! use std::sync::Arc;
//! use booster_shell::{BoosterConfig, BoosterCore, HandleRegistry, TaskKind, Term};
//!
//! let config = BoosterConfig::builder()
//!     .task(TaskKind::MulticlassClassification { n_classes: 3 })
//!     .build()
//!     .unwrap();
//! let core = BoosterCore::new(config, vec![Term::main(16), Term::new([4, 8])]).unwrap();
//!
//! let mut registry = HandleRegistry::new();
//! let handle = registry.create();
//! registry.attach_core(handle, Arc::new(core)).unwrap();
//! registry.fill_allocations(handle).unwrap();
//! registry.prepare_term(handle, 1).unwrap();
//! registry.free(handle).unwrap();
//! ```

pub mod arena;
pub mod config;
pub mod core;
pub mod error;
pub mod handle;
pub mod shell;
pub mod tensor;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Handles and sessions
pub use handle::{BoosterHandle, HandleRegistry, HandleTag};
pub use shell::{BoosterShell, ShellState};

// Configuration
pub use config::{BoosterConfig, ConfigError, TaskKind, TreeLimits};
pub use crate::core::{BoosterCore, SessionCore, Term};

// Memory
pub use arena::{ArenaMetrics, ArenaRequirements, ScratchArena, ScratchBudget};
pub use tensor::{FloatScore, Tensor, TensorPair};

// Errors
pub use error::{BoostError, ErrorCode};
