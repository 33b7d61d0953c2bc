//! The per-byte check driver.
//!
//! Given a slot, the current task's label and lockset, and a check
//! descriptor, decide whether a race exists and update the slot. The driver
//! gathers its work under the slot's reader lock and upgrades to the writer
//! side only when mutation is needed. When the upgrade is atomic the
//! records it inspected cannot have moved and the traversal continues; when
//! it is not, everything observed so far is stale and the traversal restarts
//! from the top of the (possibly rewritten) sequence. Releasing and
//! re-acquiring instead would lose fairness and risk live-lock — the
//! three-way upgrade verdict is the reason the bespoke lock exists.

use std::pin::Pin;

use weft_sync::{McsNode, PfqRwLock, ReadTicket, Upgrade};
use weft_types::{CheckInfo, HistoryState, RaceReport, Record, RecordAction};

use crate::config::{DetectorConfig, ReportMode};
use crate::history::{AccessHistory, SlotFlag};
use crate::model::{RaceModel, ReportSink};
use crate::report;
use crate::stats::{CHECK_METRICS, classify};

/// Which side of the slot lock is currently held.
enum Side {
    Reader(ReadTicket),
    Writer,
}

/// The driver's lock obligation plus the contention facts accumulated for
/// counter classification.
struct Hold {
    side: Side,
    mod_intent: bool,
    rr_contend: bool,
    upgrade_atomic: bool,
}

impl Hold {
    fn reading(ticket: ReadTicket) -> Self {
        Self {
            side: Side::Reader(ticket),
            mod_intent: false,
            rr_contend: false,
            upgrade_atomic: false,
        }
    }

    /// Takes the writer lock if it is not already held. Returns `true` when
    /// the upgrade was not atomic — the records observed so far may have
    /// changed and the caller must restart its traversal. Never restarts
    /// once the writer lock is held.
    fn ensure_writer(&mut self, lock: &PfqRwLock, node: Pin<&McsNode>) -> bool {
        self.mod_intent = true;
        match std::mem::replace(&mut self.side, Side::Writer) {
            Side::Writer => false,
            Side::Reader(ticket) => {
                // SAFETY: `node` is pinned on the driver's frame for the
                // whole call and backs at most this one acquisition;
                // `ticket` is this thread's live reader hold.
                let outcome = unsafe { lock.upgrade(node, ticket, &mut self.rr_contend) };
                self.upgrade_atomic = outcome == Upgrade::Atomic;
                outcome.invalidates_observations()
            }
        }
    }

    fn release(self, lock: &PfqRwLock, node: Pin<&McsNode>) {
        match self.side {
            // SAFETY: the writer hold was taken with this node.
            Side::Writer => unsafe { lock.write_unlock(node) },
            Side::Reader(ticket) => lock.read_unlock(ticket),
        }
    }
}

/// Runs the race check for one byte against its history slot.
///
/// Side effects only: may append/mutate/clear records, set the race flag,
/// report through `sink` or the deferred list, and bump counters. Exactly
/// one lock release happens on every path out.
pub fn check_data_race<M: RaceModel>(
    model: &M,
    slot: &AccessHistory<M>,
    cur_label: &M::Label,
    cur_lock_set: &M::LockSet,
    check: &CheckInfo,
    config: &DetectorConfig,
    sink: &dyn ReportSink,
) {
    CHECK_METRICS.record_check();
    slot.counters().record_access();

    let cur = Record::new(
        check.is_write,
        cur_label.clone(),
        cur_lock_set.clone(),
        check.task,
        check.instn_addr,
        check.hw_lock,
    );

    let wnode = McsNode::new();
    // SAFETY: the node lives on this frame for the whole call.
    let wnode = unsafe { Pin::new_unchecked(&wnode) };

    let (ticket, rw_contend) = slot.lock().read_lock();
    let mut hold = Hold::reading(ticket);

    'restart: loop {
        // Races across thread-private storage are impossible by
        // construction; leave without touching the history.
        if check.sharing.is_thread_private() {
            break;
        }

        // SAFETY: a reader or writer hold is live throughout the loop.
        if unsafe { slot.records() }.is_none() {
            if hold.ensure_writer(slot.lock(), wnode) {
                continue 'restart;
            }
            // SAFETY: writer hold.
            unsafe { slot.records_mut() };
        }

        // SAFETY: hold is live.
        let len = unsafe { slot.records() }.map_or(0, Vec::len);
        if len > config.record_threshold {
            CHECK_METRICS.record_overflow();
            tracing::debug!(
                target: "weft.driver",
                byte_addr = check.byte_addr,
                records = len,
                "access history over threshold"
            );
        }

        if slot.race_found() {
            // Only one race is reported per byte per run; the slot is
            // quiesced. Drain anything a concurrently marking call left
            // behind.
            if len > 0 {
                if hold.ensure_writer(slot.lock(), wnode) {
                    continue 'restart;
                }
                // SAFETY: writer hold.
                unsafe { slot.records_mut() }.clear();
            }
            break;
        }

        if slot.mem_recycled() {
            // Explicit task end recycled this memory; reset the state flags
            // and records and continue as a fresh history.
            if hold.ensure_writer(slot.lock(), wnode) {
                continue 'restart;
            }
            slot.clear_flags();
            // SAFETY: writer hold.
            unsafe { slot.records_mut() }.clear();
        }

        // SAFETY: hold is live. Re-read: the recycle branch may have
        // emptied the sequence.
        let len = unsafe { slot.records() }.map_or(0, Vec::len);
        if len == 0 {
            if hold.ensure_writer(slot.lock(), wnode) {
                continue 'restart;
            }
            slot.set_state(if cur.is_write {
                HistoryState::SINGLE_WRITE
            } else {
                HistoryState::SINGLE_READ
            });
            // SAFETY: writer hold.
            unsafe { slot.records_mut() }.push(cur.clone());
            break;
        }

        // Walk the history front to back. `end` bounds this pass: records
        // appended during it are never revisited.
        let mut idx = 0;
        let mut end = len;
        while idx < end {
            // SAFETY: hold is live; the action bookkeeping keeps `idx`
            // within the sequence.
            let Some(records) = (unsafe { slot.records() }) else {
                break;
            };
            let hist = &records[idx];
            let hb = model.happens_before(&hist.label, &cur.label);

            if model.analyze_race(hist, &cur, hb) {
                // Take the writer lock before reporting: after a non-atomic
                // upgrade another writer may have rewritten (or already
                // raced) this history, so the verdict must be re-derived
                // from a fresh traversal.
                if hold.ensure_writer(slot.lock(), wnode) {
                    continue 'restart;
                }
                let race = RaceReport {
                    hist_instn: hist.instn_addr,
                    cur_instn: cur.instn_addr,
                    byte_addr: check.byte_addr,
                };
                report::set_race_found();
                CHECK_METRICS.record_race();
                match config.report_mode {
                    ReportMode::Deferred => report::push_deferred(race),
                    ReportMode::Runtime => sink.report_race(&race),
                    ReportMode::Silent => {}
                }
                slot.set_flag(SlotFlag::DataRaceFound);
                // SAFETY: writer hold. Emptying the records here keeps the
                // quiesced-slot rule: a marked slot never carries records.
                unsafe { slot.records_mut() }.clear();
                tracing::debug!(target: "weft.driver", %race, "data race detected");
                break 'restart;
            }

            let (next_state, action) = model.manage_record(slot.state(), hist, &cur, hb);
            if hold.ensure_writer(slot.lock(), wnode) {
                continue 'restart;
            }
            slot.set_state(next_state);
            // SAFETY: writer hold.
            apply_action(unsafe { slot.records_mut() }, action, &cur, &mut idx, &mut end);
        }
        break;
    }

    let (mod_intent, rr_contend, upgrade_atomic) =
        (hold.mod_intent, hold.rr_contend, hold.upgrade_atomic);
    hold.release(slot.lock(), wnode);

    let bucket = classify(mod_intent, rw_contend, rr_contend, upgrade_atomic);
    CHECK_METRICS.bump(bucket);
    slot.counters().bump(bucket);
    report::note_slot_seen(std::ptr::from_ref(slot) as usize);
}

/// Applies one management action at position `idx`, maintaining the
/// traversal cursor and the pass bound `end`.
fn apply_action<L: Clone, S: Clone>(
    records: &mut Vec<Record<L, S>>,
    action: RecordAction,
    cur: &Record<L, S>,
    idx: &mut usize,
    end: &mut usize,
) {
    match action {
        RecordAction::None => *idx += 1,
        RecordAction::ReplaceCurrent => {
            records[*idx] = cur.clone();
            *idx += 1;
        }
        RecordAction::RemoveCurrent => {
            // The traversal continues with whatever slid into `idx`.
            records.remove(*idx);
            *end -= 1;
        }
        RecordAction::InsertAfterCurrent => {
            records.insert(*idx + 1, cur.clone());
            // Skip the inserted element; it is not revisited this pass.
            *idx += 2;
            *end += 1;
        }
        RecordAction::InsertNew => {
            // Appended past the pass bound, so never revisited.
            records.push(cur.clone());
            *idx += 1;
        }
    }
}
