//! Plain data types shared across the Weft race-detector crates.
//!
//! Everything here is passive: snapshots of accesses, classification enums,
//! and the small tokens the concurrency engine threads through its hot path.
//! The task/label model and the race-analysis policy stay opaque — labels and
//! locksets appear only as generic parameters, compared exclusively through
//! the `RaceModel` capability boundary in `weft-core`.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Address and identity newtypes
// ---------------------------------------------------------------------------

/// Instruction address of an instrumented load or store.
///
/// Carried through race reports so the finalization pass can symbolize the
/// racing pair. The engine itself never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
pub struct InstnAddr(pub usize);

impl fmt::Display for InstnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque identifier of the issuing task.
///
/// Pointer-sized because the task runtime hands out the address of its own
/// per-task bookkeeping; the engine only compares and copies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
pub struct TaskId(pub usize);

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Kind of task that issued the access, as reported by the task runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    /// The initial (sequential) task. Accesses from it are never checked.
    Initial,
    /// An implicit task of a parallel region.
    Implicit,
    /// An explicit task.
    Explicit,
    /// A target/offload task.
    Target,
}

/// Data-sharing classification of the accessed address for the issuing
/// thread.
///
/// Thread-private storage cannot race by construction; the check driver
/// short-circuits the two private classifications without touching the
/// history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataSharing {
    /// Reachable by more than one thread.
    Shared,
    /// On the issuing thread's stack, above the task exit frame.
    ThreadPrivateAboveExit,
    /// On the issuing thread's stack, below the task exit frame.
    ThreadPrivateBelowExit,
    /// Static thread-local storage.
    StaticThreadPrivate,
}

impl DataSharing {
    /// True for classifications that make a race impossible by construction.
    #[inline]
    #[must_use]
    pub const fn is_thread_private(self) -> bool {
        matches!(
            self,
            DataSharing::ThreadPrivateBelowExit | DataSharing::StaticThreadPrivate
        )
    }
}

// ---------------------------------------------------------------------------
// History state token
// ---------------------------------------------------------------------------

/// Abstract state label of an access history.
///
/// The engine knows three values: a slot is born [`EMPTY`](Self::EMPTY), and
/// the first inserted record moves it to [`SINGLE_READ`](Self::SINGLE_READ)
/// or [`SINGLE_WRITE`](Self::SINGLE_WRITE). Every other token is minted by
/// the record-management policy and round-trips through the slot unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
pub struct HistoryState(pub u32);

impl HistoryState {
    /// No record has ever been inserted.
    pub const EMPTY: Self = Self(0);
    /// Exactly one record, a read.
    pub const SINGLE_READ: Self = Self(1);
    /// Exactly one record, a write.
    pub const SINGLE_WRITE: Self = Self(2);
}

// ---------------------------------------------------------------------------
// Record-management action alphabet
// ---------------------------------------------------------------------------

/// What the record-management policy wants done at the current position of a
/// history traversal.
///
/// The policy decides, the driver applies. Insertions made during a pass are
/// never revisited in the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordAction {
    /// Leave the current record alone and advance.
    None,
    /// Overwrite the current record with the current access.
    ReplaceCurrent,
    /// Remove the current record; the traversal continues with whatever
    /// slides into its position.
    RemoveCurrent,
    /// Insert the current access immediately after the current record.
    InsertAfterCurrent,
    /// Append the current access at the end of the history.
    InsertNew,
}

// ---------------------------------------------------------------------------
// Happens-before verdict
// ---------------------------------------------------------------------------

/// Result of comparing two task labels.
///
/// `diff_index` is the position of the first differing label segment; the
/// race-analysis policy uses it to refine unordered verdicts. Negative when
/// the comparison did not locate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HbResult {
    pub ordered: bool,
    pub diff_index: i32,
}

// ---------------------------------------------------------------------------
// Access records
// ---------------------------------------------------------------------------

/// Immutable snapshot of one memory access.
///
/// `L` and `S` are the task model's label and lockset types; the engine
/// stores and clones them but never looks inside.
#[derive(Debug, Clone)]
pub struct Record<L, S> {
    pub is_write: bool,
    pub label: L,
    pub lock_set: S,
    pub task: TaskId,
    pub instn_addr: InstnAddr,
    pub hw_lock: bool,
}

impl<L, S> Record<L, S> {
    pub fn new(
        is_write: bool,
        label: L,
        lock_set: S,
        task: TaskId,
        instn_addr: InstnAddr,
        hw_lock: bool,
    ) -> Self {
        Self { is_write, label, lock_set, task, instn_addr, hw_lock }
    }
}

/// Per-access descriptor handed to the check driver.
///
/// Built once per instrumented reference; `byte_addr` is rewritten as the
/// byte loop walks the access.
#[derive(Debug, Clone, Copy)]
pub struct CheckInfo {
    pub byte_addr: usize,
    pub instn_addr: InstnAddr,
    pub task: TaskId,
    pub task_kind: TaskKind,
    pub team_size: u32,
    pub is_write: bool,
    pub hw_lock: bool,
    pub sharing: DataSharing,
}

// ---------------------------------------------------------------------------
// Race reports
// ---------------------------------------------------------------------------

/// One detected race: the two racing instruction addresses and the byte they
/// collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaceReport {
    pub hist_instn: InstnAddr,
    pub cur_instn: InstnAddr,
    pub byte_addr: usize,
}

impl fmt::Display for RaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data race on {:#x}: {} vs {}",
            self.byte_addr, self.hist_instn, self.cur_instn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instn_addr_displays_hex() {
        assert_eq!(InstnAddr(0xdead_beef).to_string(), "0xdeadbeef");
    }

    #[test]
    fn thread_private_classification() {
        assert!(DataSharing::ThreadPrivateBelowExit.is_thread_private());
        assert!(DataSharing::StaticThreadPrivate.is_thread_private());
        assert!(!DataSharing::Shared.is_thread_private());
        assert!(!DataSharing::ThreadPrivateAboveExit.is_thread_private());
    }

    #[test]
    fn history_state_well_known_tokens_are_distinct() {
        assert_ne!(HistoryState::EMPTY, HistoryState::SINGLE_READ);
        assert_ne!(HistoryState::SINGLE_READ, HistoryState::SINGLE_WRITE);
        // Policy-minted tokens round-trip.
        let minted = HistoryState(0x40);
        assert_eq!(minted, HistoryState(0x40));
    }

    #[test]
    fn race_report_display() {
        let report = RaceReport {
            hist_instn: InstnAddr(0x1000),
            cur_instn: InstnAddr(0x2000),
            byte_addr: 0x3000,
        };
        assert_eq!(
            report.to_string(),
            "data race on 0x3000: 0x1000 vs 0x2000"
        );
    }
}
