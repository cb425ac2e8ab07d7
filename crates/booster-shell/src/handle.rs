//! Opaque booster handles and the registry that validates them.
//!
//! Callers outside the crate never see a [`BoosterShell`] directly. They hold
//! a [`BoosterHandle`], a plain `u64` token, and every operation resolves it
//! through a [`HandleRegistry`] first. Resolution reads one slot-table entry
//! and nothing else, so any bit pattern is safe to present.
//!
//! # Token layout
//!
//! ```text
//!  63            32 31             0
//! ┌────────────────┬────────────────┐
//! │   generation   │  slot index+1  │      0 = null handle
//! └────────────────┴────────────────┘
//! ```
//!
//! Freeing a shell tags its slot `Freed`. When the slot is handed out again
//! its generation is bumped, so stale tokens still resolve as `Freed` rather
//! than reaching the new session.

use std::fmt;
use std::sync::Arc;

use crate::core::SessionCore;
use crate::error::BoostError;
use crate::shell::BoosterShell;

// =============================================================================
// BoosterHandle / HandleTag
// =============================================================================

/// Opaque token naming one booster session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoosterHandle(u64);

impl BoosterHandle {
    /// The null handle.
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn new(index: usize, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | (index as u64 + 1))
    }

    /// Slot index, `None` for the null handle.
    #[inline]
    fn index(self) -> Option<usize> {
        ((self.0 & 0xFFFF_FFFF) as usize).checked_sub(1)
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for BoosterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Verification state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleTag {
    /// Names a live session.
    Live,
    /// Named a session that has since been freed.
    Freed,
    /// Null, or never issued by this registry.
    Invalid,
}

impl fmt::Display for HandleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::Freed => "freed",
            Self::Invalid => "invalid",
        })
    }
}

// =============================================================================
// HandleRegistry
// =============================================================================

#[derive(Debug)]
struct ShellSlot {
    generation: u32,
    tag: HandleTag,
    shell: Option<Box<BoosterShell>>,
}

/// Slot table mapping handles to shells.
///
/// Not internally synchronized: drive each registry from one thread at a
/// time (or wrap it in a lock). Separate registries share nothing.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: Vec<ShellSlot>,
    free_slots: Vec<usize>,
    live: usize,
}

/// Largest slot count a token can address.
const MAX_SLOTS: usize = u32::MAX as usize - 1;

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Classify a handle without logging.
    pub fn status(&self, handle: BoosterHandle) -> HandleTag {
        let Some(slot) = handle.index().and_then(|i| self.slots.get(i)) else {
            return HandleTag::Invalid;
        };
        let generation = handle.generation();
        if generation == 0 || generation > slot.generation {
            HandleTag::Invalid
        } else if generation < slot.generation {
            HandleTag::Freed
        } else {
            slot.tag
        }
    }

    /// Validate a handle, logging one diagnostic on failure.
    fn check(&self, handle: BoosterHandle, op: &'static str) -> Result<usize, BoostError> {
        let tag = self.status(handle);
        match tag {
            HandleTag::Live => handle
                .index()
                .ok_or(BoostError::ContractViolation("live handle without slot")),
            HandleTag::Freed => {
                log::error!("{}: attempt to use freed booster handle {}", op, handle);
                Err(BoostError::InvalidHandle { handle, tag })
            }
            HandleTag::Invalid if handle.is_null() => {
                log::error!("{}: null booster handle", op);
                Err(BoostError::InvalidHandle { handle, tag })
            }
            HandleTag::Invalid => {
                log::error!("{}: attempt to use invalid booster handle {}", op, handle);
                Err(BoostError::InvalidHandle { handle, tag })
            }
        }
    }

    fn shell_mut(&mut self, handle: BoosterHandle, op: &'static str) -> Result<&mut BoosterShell, BoostError> {
        let index = self.check(handle, op)?;
        self.slots[index]
            .shell
            .as_deref_mut()
            .ok_or(BoostError::ContractViolation("live slot without shell"))
    }

    /// Resolve a handle to its shell. Logs and returns `None` if not live.
    pub fn resolve(&self, handle: BoosterHandle) -> Option<&BoosterShell> {
        let index = self.check(handle, "resolve").ok()?;
        self.slots[index].shell.as_deref()
    }

    /// Resolve a handle to its shell, mutably.
    pub fn resolve_mut(&mut self, handle: BoosterHandle) -> Option<&mut BoosterShell> {
        self.shell_mut(handle, "resolve").ok()
    }

    /// Run `f` against a live shell.
    ///
    /// The handle is checked once; `f` sees the shell directly.
    pub fn with_shell<R>(
        &mut self,
        handle: BoosterHandle,
        f: impl FnOnce(&mut BoosterShell) -> R,
    ) -> Result<R, BoostError> {
        self.shell_mut(handle, "with_shell").map(f)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a session in the `Created` state.
    ///
    /// Returns [`BoosterHandle::NULL`] (and logs) if the slot table cannot
    /// grow.
    pub fn create(&mut self) -> BoosterHandle {
        let index = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.tag = HandleTag::Live;
                slot.shell = Some(Box::new(BoosterShell::new()));
                index
            }
            None => {
                if self.slots.len() >= MAX_SLOTS || self.slots.try_reserve(1).is_err() {
                    log::error!("create: out of memory for booster shell");
                    return BoosterHandle::NULL;
                }
                self.slots.push(ShellSlot {
                    generation: 1,
                    tag: HandleTag::Live,
                    shell: Some(Box::new(BoosterShell::new())),
                });
                self.slots.len() - 1
            }
        };
        self.live += 1;
        let handle = BoosterHandle::new(index, self.slots[index].generation);
        log::debug!("create: booster handle {}", handle);
        handle
    }

    /// Attach a session core to the shell behind `handle`.
    pub fn attach_core(&mut self, handle: BoosterHandle, core: Arc<dyn SessionCore>) -> Result<(), BoostError> {
        self.shell_mut(handle, "attach_core")?.attach_core(core)
    }

    /// Size every tensor and scratch region for the attached core.
    pub fn fill_allocations(&mut self, handle: BoosterHandle) -> Result<(), BoostError> {
        self.shell_mut(handle, "fill_allocations")?.fill_allocations()
    }

    /// Select and size the active term.
    pub fn prepare_term(&mut self, handle: BoosterHandle, index: usize) -> Result<(), BoostError> {
        self.shell_mut(handle, "prepare_term")?.prepare_term(index)
    }

    pub fn term_index(&mut self, handle: BoosterHandle) -> Result<Option<usize>, BoostError> {
        Ok(self.shell_mut(handle, "term_index")?.term_index())
    }

    pub fn set_term_index(&mut self, handle: BoosterHandle, index: Option<usize>) -> Result<(), BoostError> {
        self.shell_mut(handle, "set_term_index")?.set_term_index(index);
        Ok(())
    }

    /// Free the session behind `handle`.
    ///
    /// The slot is tagged `Freed` before any memory is released. Freed,
    /// null and foreign handles are logged and left alone.
    pub fn free(&mut self, handle: BoosterHandle) -> Result<(), BoostError> {
        let index = self.check(handle, "free")?;
        let slot = &mut self.slots[index];
        slot.tag = HandleTag::Freed;
        if let Some(mut shell) = slot.shell.take() {
            shell.release();
        }
        // a slot whose generation is exhausted is retired
        if slot.generation < u32::MAX {
            self.free_slots.push(index);
        }
        self.live -= 1;
        log::debug!("free: booster handle {}", handle);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
