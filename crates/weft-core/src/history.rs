//! Per-byte access history slots.
//!
//! A slot is the unit the whole engine revolves around: a phase-fair lock, a
//! packed state word, the lazily allocated record sequence, and the
//! slot-local counters. The slot itself performs no synchronization beyond
//! exposing its lock — the record accessors are `unsafe` and state their
//! lock-discipline contracts; holding to them is the driver's job.
//!
//! Locking rules:
//!
//! - records may be read under any holder of the lock, reader or writer;
//! - records may be mutated only under the writer lock;
//! - the state word is atomic and may additionally be flagged from outside
//!   any hold (the task-exit recycling hook).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use weft_sync::PfqRwLock;
use weft_types::{HistoryState, Record};

use crate::model::RaceModel;
use crate::stats::SlotCounters;

/// Flag bits of the slot state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFlag {
    /// A race was reported on this byte; the slot is quiesced for the rest
    /// of the run.
    DataRaceFound,
    /// The memory behind this byte was recycled (explicit task end); the
    /// next access resets the history.
    MemoryRecycled,
}

impl SlotFlag {
    const fn bit(self) -> u64 {
        match self {
            SlotFlag::DataRaceFound => 1 << 0,
            SlotFlag::MemoryRecycled => 1 << 1,
        }
    }
}

const FLAG_MASK: u64 = 0b11;
const STATE_SHIFT: u32 = 32;
const STATE_MASK: u64 = 0xFFFF_FFFF_0000_0000;

/// Access history of one tracked byte.
pub struct AccessHistory<M: RaceModel> {
    lock: PfqRwLock,
    /// Flag bits in the low word, history-state token in the high word.
    word: AtomicU64,
    /// Absent is treated as empty; presence means some check has taken
    /// write intent on this slot at least once.
    records: UnsafeCell<Option<Box<Vec<Record<M::Label, M::LockSet>>>>>,
    counters: SlotCounters,
}

// SAFETY: `records` is guarded by `lock` (mutation under the writer hold,
// reads under any hold); everything else is atomic. Label and lockset types
// are Send + Sync by the RaceModel bounds.
unsafe impl<M: RaceModel> Send for AccessHistory<M> {}
unsafe impl<M: RaceModel> Sync for AccessHistory<M> {}

impl<M: RaceModel> AccessHistory<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: PfqRwLock::new(),
            word: AtomicU64::new(0),
            records: UnsafeCell::new(None),
            counters: SlotCounters::new(),
        }
    }

    #[inline]
    pub fn lock(&self) -> &PfqRwLock {
        &self.lock
    }

    #[inline]
    pub fn counters(&self) -> &SlotCounters {
        &self.counters
    }

    /// Peek at the record sequence without forcing allocation.
    ///
    /// # Safety
    ///
    /// The caller must hold this slot's lock (either side) for the lifetime
    /// of the returned reference, and must not call [`records_mut`] while it
    /// is live.
    ///
    /// [`records_mut`]: Self::records_mut
    pub unsafe fn records(&self) -> Option<&Vec<Record<M::Label, M::LockSet>>> {
        unsafe { (*self.records.get()).as_deref() }
    }

    /// The record sequence, allocated on first use.
    ///
    /// # Safety
    ///
    /// The caller must hold this slot's writer lock for the lifetime of the
    /// returned reference, with no other reference from [`records`] live.
    ///
    /// [`records`]: Self::records
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn records_mut(&self) -> &mut Vec<Record<M::Label, M::LockSet>> {
        let slot = unsafe { &mut *self.records.get() };
        slot.get_or_insert_with(Box::default)
    }

    /// Clones the current records under a short-lived reader hold.
    /// Diagnostic/finalization helper, not for the check path.
    #[must_use]
    pub fn records_snapshot(&self) -> Vec<Record<M::Label, M::LockSet>> {
        let (ticket, _) = self.lock.read_lock();
        // SAFETY: reader hold taken above, released below.
        let snapshot = unsafe { self.records() }.cloned().unwrap_or_default();
        self.lock.read_unlock(ticket);
        snapshot
    }

    pub fn set_flag(&self, flag: SlotFlag) {
        self.word.fetch_or(flag.bit(), Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: SlotFlag) {
        self.word.fetch_and(!flag.bit(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self) {
        self.word.fetch_and(!FLAG_MASK, Ordering::AcqRel);
    }

    #[must_use]
    pub fn race_found(&self) -> bool {
        self.word.load(Ordering::Acquire) & SlotFlag::DataRaceFound.bit() != 0
    }

    #[must_use]
    pub fn mem_recycled(&self) -> bool {
        self.word.load(Ordering::Acquire) & SlotFlag::MemoryRecycled.bit() != 0
    }

    /// Task-exit hook: mark the memory behind this byte as recycled. Called
    /// by the task runtime without holding the slot lock.
    pub fn mark_recycled(&self) {
        self.set_flag(SlotFlag::MemoryRecycled);
    }

    #[must_use]
    pub fn state(&self) -> HistoryState {
        HistoryState((self.word.load(Ordering::Acquire) >> STATE_SHIFT) as u32)
    }

    /// Store a new history-state token, preserving the flag bits, which may
    /// move concurrently under `mark_recycled`.
    pub fn set_state(&self, state: HistoryState) {
        let bits = u64::from(state.0) << STATE_SHIFT;
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let next = (current & !STATE_MASK) | bits;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl<M: RaceModel> Default for AccessHistory<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RaceModel> std::fmt::Debug for AccessHistory<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessHistory")
            .field("state", &self.state())
            .field("race_found", &self.race_found())
            .field("mem_recycled", &self.mem_recycled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use weft_types::{HbResult, HistoryState, InstnAddr, Record, RecordAction, TaskId};

    use super::*;

    struct NullModel;

    impl RaceModel for NullModel {
        type Label = u64;
        type LockSet = ();

        fn happens_before(&self, _: &u64, _: &u64) -> HbResult {
            HbResult { ordered: true, diff_index: -1 }
        }

        fn analyze_race(&self, _: &Record<u64, ()>, _: &Record<u64, ()>, _: HbResult) -> bool {
            false
        }

        fn manage_record(
            &self,
            state: HistoryState,
            _: &Record<u64, ()>,
            _: &Record<u64, ()>,
            _: HbResult,
        ) -> (HistoryState, RecordAction) {
            (state, RecordAction::None)
        }
    }

    #[test]
    fn flags_and_state_share_the_word_without_clobbering() {
        let slot: AccessHistory<NullModel> = AccessHistory::new();
        assert_eq!(slot.state(), HistoryState::EMPTY);
        assert!(!slot.race_found());

        slot.set_state(HistoryState::SINGLE_WRITE);
        slot.set_flag(SlotFlag::DataRaceFound);
        slot.mark_recycled();
        assert_eq!(slot.state(), HistoryState::SINGLE_WRITE);
        assert!(slot.race_found());
        assert!(slot.mem_recycled());

        slot.clear_flag(SlotFlag::MemoryRecycled);
        assert!(slot.race_found());
        assert!(!slot.mem_recycled());

        slot.clear_flags();
        assert!(!slot.race_found());
        assert_eq!(slot.state(), HistoryState::SINGLE_WRITE);

        // Policy-minted tokens round-trip through the word.
        slot.set_state(HistoryState(0xABCD));
        assert_eq!(slot.state(), HistoryState(0xABCD));
    }

    #[test]
    fn records_absent_until_forced() {
        let slot: AccessHistory<NullModel> = AccessHistory::new();
        assert!(slot.records_snapshot().is_empty());

        let node = weft_sync::McsNode::new();
        // SAFETY: node pinned on this frame.
        let node = unsafe { std::pin::Pin::new_unchecked(&node) };
        // SAFETY: writer hold around the mutation.
        unsafe {
            slot.lock().write_lock(node);
            assert!(slot.records().is_none());
            slot.records_mut().push(Record::new(
                true,
                7,
                (),
                TaskId(0x10),
                InstnAddr(0x4000),
                false,
            ));
            slot.lock().write_unlock(node);
        }

        let snapshot = slot.records_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_write);
        assert_eq!(snapshot[0].label, 7);
    }
}
