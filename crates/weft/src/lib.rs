//! Weft: dynamic data-race detection for fork-join task-parallel runtimes.
//!
//! This facade re-exports the public surface of the workspace crates:
//!
//! - [`weft_core`] — the concurrency-control and access-history engine
//!   ([`Detector`], [`AccessHistory`], the check driver, the counters).
//! - [`weft_sync`] — the MCS queue lock and the phase-fair reader/writer
//!   lock with upgrade.
//! - [`weft_types`] — records, reports, and classification enums.
//! - [`weft_error`] — error types.
//!
//! An embedding runtime implements the [`RaceModel`], [`TaskRuntime`],
//! [`ShadowSlots`], and [`ReportSink`] boundaries, assembles a
//! [`Detector`], and routes every instrumented load and store through
//! [`Detector::check_access`].

pub use weft_core::{
    AccessHistory, CHECK_METRICS, CheckMetrics, CheckMetricsSnapshot, CounterBucket,
    Detector, DetectorConfig, RaceModel, ReportMode, ReportSink, ShadowSlots, SlotCounters,
    SlotFlag, TaskAccessInfo, TaskRuntime, check_data_race, distinct_slots_seen, race_found,
};
pub use weft_error::{Result, WeftError};
pub use weft_sync::{McsLock, McsNode, Mutex, PfqRwLock, ReadTicket, Upgrade};
pub use weft_types::{
    CheckInfo, DataSharing, HbResult, HistoryState, InstnAddr, RaceReport, Record,
    RecordAction, TaskId, TaskKind,
};
