//! Process-wide race-report state.
//!
//! Three pieces of global mutable state live here, each with its specified
//! guard: the one-shot race flag (release store, acquire read), the deferred
//! race-report list, and the seen-slot map — the latter two behind their own
//! MCS queue locks so the short critical sections stay FIFO-fair under
//! check-path contention.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use weft_sync::Mutex;
use weft_types::RaceReport;

static RACE_FOUND: AtomicBool = AtomicBool::new(false);

static DEFERRED_REPORTS: Mutex<Vec<RaceReport>> = Mutex::new(Vec::new());

/// Slot address → times the check driver finished on it.
static SEEN_SLOTS: Mutex<BTreeMap<usize, u64>> = Mutex::new(BTreeMap::new());

/// Whether any race has been detected process-wide.
#[must_use]
pub fn race_found() -> bool {
    RACE_FOUND.load(Ordering::Acquire)
}

pub(crate) fn set_race_found() {
    RACE_FOUND.store(true, Ordering::Release);
}

pub(crate) fn push_deferred(report: RaceReport) {
    DEFERRED_REPORTS.lock_with(|reports| reports.push(report));
}

pub(crate) fn drain_deferred() -> Vec<RaceReport> {
    DEFERRED_REPORTS.lock_with(std::mem::take)
}

pub(crate) fn note_slot_seen(slot_addr: usize) {
    SEEN_SLOTS.lock_with(|map| *map.entry(slot_addr).or_insert(0) += 1);
}

/// Number of distinct slots the driver has finished on.
#[must_use]
pub fn distinct_slots_seen() -> usize {
    SEEN_SLOTS.lock_with(|map| map.len())
}

/// Clears all global report state. Tests only — the real process keeps this
/// state for its whole lifetime.
pub fn reset_global_state() {
    RACE_FOUND.store(false, Ordering::Release);
    DEFERRED_REPORTS.lock_with(Vec::clear);
    SEEN_SLOTS.lock_with(BTreeMap::clear);
}
