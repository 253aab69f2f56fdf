//! Explicitly paired interrupt disable/enable.
//!
//! Short read-modify-write sequences use `critical_section::with` directly.
//! This is for callers that need to keep interrupts off across several engine
//! calls, with the same nesting rules as the runtime's global
//! disable/enable pair.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex, RestoreState};

pub struct InterruptNesting {
    // Depth, and the restore state of the outermost acquire.
    state: Mutex<Cell<(u32, Option<RestoreState>)>>,
}

impl InterruptNesting {
    pub const fn new() -> Self {
        InterruptNesting {
            state: Mutex::new(Cell::new((0, None))),
        }
    }

    pub fn disable(&self) {
        // SAFETY: the outermost restore state is kept until the matching
        // `enable`; inner ones are released immediately in LIFO order.
        let restore = unsafe { critical_section::acquire() };
        let cs = unsafe { CriticalSection::new() };
        let cell = self.state.borrow(cs);
        match cell.get() {
            (0, _) => cell.set((1, Some(restore))),
            (depth, outer) => {
                cell.set((depth + 1, outer));
                unsafe { critical_section::release(restore) };
            }
        }
    }

    /// Returns `false` when there was no matching `disable`.
    #[must_use]
    pub fn enable(&self) -> bool {
        // SAFETY: see `disable`.
        let restore = unsafe { critical_section::acquire() };
        let cs = unsafe { CriticalSection::new() };
        let cell = self.state.borrow(cs);
        let (depth, outer) = cell.get();
        if depth == 0 {
            unsafe { critical_section::release(restore) };
            return false;
        }
        if depth == 1 {
            cell.set((0, None));
        } else {
            cell.set((depth - 1, outer));
        }
        unsafe { critical_section::release(restore) };
        if depth == 1 {
            if let Some(outer) = outer {
                unsafe { critical_section::release(outer) };
            }
        }
        true
    }

    pub fn depth(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow(cs).get().0)
    }
}

impl Default for InterruptNesting {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupts stay disabled while this is alive.
#[must_use]
pub struct InterruptsDisabled<'a> {
    nesting: &'a InterruptNesting,
}

impl<'a> InterruptsDisabled<'a> {
    pub(crate) fn new(nesting: &'a InterruptNesting) -> Self {
        nesting.disable();
        InterruptsDisabled { nesting }
    }
}

impl Drop for InterruptsDisabled<'_> {
    fn drop(&mut self) {
        // Always paired with the `disable` in `new`.
        let _ = self.nesting.enable();
    }
}
