//! The detector's process surface.
//!
//! [`Detector`] wires the external collaborators together and exposes the
//! single inbound entry point, [`check_access`], which the instrumentation
//! bridge calls on every memory reference. Construction is the
//! initialization hook; [`finalize`] flushes the deferred race-report list
//! and emits the counter snapshot.
//!
//! [`check_access`]: Detector::check_access
//! [`finalize`]: Detector::finalize

use std::sync::atomic::{AtomicBool, Ordering};

use weft_error::{Result, WeftError};
use weft_types::{CheckInfo, InstnAddr, TaskKind};

use crate::config::DetectorConfig;
use crate::driver::check_data_race;
use crate::model::{RaceModel, ReportSink, ShadowSlots, TaskRuntime};
use crate::report;
use crate::stats::{CHECK_METRICS, CheckMetricsSnapshot};

/// The assembled detector.
///
/// All methods take `&self`; the engine below is designed for concurrent
/// calls from every application thread.
pub struct Detector<M, T, S, K>
where
    M: RaceModel,
    T: TaskRuntime<M>,
    S: ShadowSlots<M>,
    K: ReportSink,
{
    model: M,
    tasks: T,
    shadow: S,
    sink: K,
    config: DetectorConfig,
    finalized: AtomicBool,
}

impl<M, T, S, K> Detector<M, T, S, K>
where
    M: RaceModel,
    T: TaskRuntime<M>,
    S: ShadowSlots<M>,
    K: ReportSink,
{
    /// Assembles the detector. This is the process-start hook: once the
    /// value exists, instrumentation may call [`check_access`] from any
    /// thread.
    ///
    /// [`check_access`]: Self::check_access
    pub fn new(model: M, tasks: T, shadow: S, sink: K, config: DetectorConfig) -> Self {
        tracing::info!(
            target: "weft.runtime",
            report_mode = ?config.report_mode,
            record_threshold = config.record_threshold,
            "weft detector live"
        );
        Self { model, tasks, shadow, sink, config, finalized: AtomicBool::new(false) }
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Inbound entry point: one instrumented memory reference.
    ///
    /// Walks each byte of the access, consults the per-task duplicate
    /// filter, resolves the shadow slot, and runs the check driver. Never
    /// reports failure to the caller — it proceeds, or silently skips when
    /// the task runtime has nothing for this thread, when the issuing task
    /// is the initial task, or after finalization.
    pub fn check_access(
        &self,
        addr: usize,
        bytes_accessed: u32,
        instn_addr: InstnAddr,
        hw_lock: bool,
        is_write: bool,
    ) {
        if bytes_accessed == 0 || self.finalized.load(Ordering::Acquire) {
            return;
        }
        let Some(info) = self.tasks.prepare() else {
            tracing::trace!(target: "weft.runtime", addr, "no task context, skipping access");
            return;
        };
        if info.task_kind == TaskKind::Initial {
            return;
        }

        let sharing = self.tasks.data_sharing(addr);
        let mut check = CheckInfo {
            byte_addr: addr,
            instn_addr,
            task: info.task,
            task_kind: info.task_kind,
            team_size: info.team_size,
            is_write,
            hw_lock,
            sharing,
        };

        for offset in 0..bytes_accessed as usize {
            let byte_addr = addr + offset;
            CHECK_METRICS.record_byte_checked();
            if self.tasks.is_duplicate_access(info.task, is_write, byte_addr) {
                continue;
            }
            let slot = self.shadow.slot(byte_addr);
            check.byte_addr = byte_addr;
            check_data_race(
                &self.model,
                &slot,
                &info.label,
                &info.lock_set,
                &check,
                &self.config,
                &self.sink,
            );
        }
    }

    /// Finalization hook: flushes the deferred race-report list to the sink
    /// and emits the counter snapshot. Callable once.
    pub fn finalize(&self) -> Result<CheckMetricsSnapshot> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(WeftError::AlreadyFinalized);
        }

        let deferred = report::drain_deferred();
        if !deferred.is_empty() {
            self.sink.flush_deferred(&deferred);
        }

        let snapshot = CHECK_METRICS.snapshot();
        tracing::info!(
            target: "weft.runtime",
            checks = snapshot.checks_total,
            bytes = snapshot.bytes_checked_total,
            races = snapshot.races_total,
            overflow = snapshot.history_overflow_total,
            slots_seen = report::distinct_slots_seen(),
            race_found = report::race_found(),
            deferred_reports = deferred.len(),
            "weft detector finalized"
        );
        Ok(snapshot)
    }
}
