//! Capability boundaries to the task runtime and the race-analysis policy.
//!
//! The engine consumes three opaque values per access — a label, a lockset,
//! and a check descriptor — and delegates every semantic decision to the
//! traits below. Implementations must be pure with respect to their inputs:
//! the driver may call them again after a traversal restart and expects the
//! same answers for the same arguments.

use std::sync::Arc;

use weft_types::{DataSharing, HbResult, HistoryState, RaceReport, Record, RecordAction, TaskId, TaskKind};

use crate::history::AccessHistory;

/// The race-analysis oracle: label comparison, race decision, and access
/// history management.
///
/// `Label` encodes a task's position in the happens-before lattice;
/// `LockSet` the mutual-exclusion tokens held at the access. Both are
/// snapshots, immutable for the duration of a check, and entirely opaque to
/// the engine.
pub trait RaceModel: Send + Sync + 'static {
    type Label: Clone + Send + Sync + 'static;
    type LockSet: Clone + Send + Sync + 'static;

    /// Whether the access labeled `hist` is ordered before the access
    /// labeled `cur`, and at which label segment the two first diverge.
    fn happens_before(&self, hist: &Self::Label, cur: &Self::Label) -> HbResult;

    /// Whether the two accesses constitute a data race.
    fn analyze_race(
        &self,
        hist: &Record<Self::Label, Self::LockSet>,
        cur: &Record<Self::Label, Self::LockSet>,
        hb: HbResult,
    ) -> bool;

    /// How the history should evolve given a non-racing pair: the next
    /// history-state token and the action to apply at the current traversal
    /// position.
    fn manage_record(
        &self,
        state: HistoryState,
        hist: &Record<Self::Label, Self::LockSet>,
        cur: &Record<Self::Label, Self::LockSet>,
        hb: HbResult,
    ) -> (HistoryState, RecordAction);
}

/// Everything the task runtime knows about the access being issued.
pub struct TaskAccessInfo<M: RaceModel> {
    pub task_kind: TaskKind,
    pub team_size: u32,
    pub thread_num: u32,
    pub task: TaskId,
    pub label: M::Label,
    pub lock_set: M::LockSet,
}

// Hand-written so the bound lands on the associated types, not on `M`.
impl<M: RaceModel> Clone for TaskAccessInfo<M> {
    fn clone(&self) -> Self {
        Self {
            task_kind: self.task_kind,
            team_size: self.team_size,
            thread_num: self.thread_num,
            task: self.task,
            label: self.label.clone(),
            lock_set: self.lock_set.clone(),
        }
    }
}

/// The task runtime side of the boundary.
pub trait TaskRuntime<M: RaceModel>: Send + Sync {
    /// Snapshot of the issuing task. `None` means the runtime has no task
    /// context for the calling thread and the access must be skipped.
    fn prepare(&self) -> Option<TaskAccessInfo<M>>;

    /// Data-sharing classification of `addr` for the calling thread.
    fn data_sharing(&self, addr: usize) -> DataSharing;

    /// Whether this byte was already checked by `task` in the current task
    /// phase with a compatible access mode.
    fn is_duplicate_access(&self, task: TaskId, is_write: bool, addr: usize) -> bool;
}

/// Shadow-memory resolution: one `AccessHistory` slot per tracked byte.
///
/// The `Arc` models the lifetime rule that a slot is destroyed only when the
/// shadow region backing it is released, never while a check holds it.
pub trait ShadowSlots<M: RaceModel>: Send + Sync {
    fn slot(&self, byte_addr: usize) -> Arc<AccessHistory<M>>;
}

/// Race-report sink.
///
/// `report_race` is the runtime path, invoked while the reporting thread
/// still holds the slot's writer lock — implementations must not block on
/// detector state. `flush_deferred` receives the accumulated report list at
/// finalization for end-of-run symbolization.
pub trait ReportSink: Send + Sync {
    fn report_race(&self, report: &RaceReport);

    fn flush_deferred(&self, reports: &[RaceReport]) {
        for report in reports {
            self.report_race(report);
        }
    }
}
