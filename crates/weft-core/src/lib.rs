//! Concurrency-control and access-history engine of the Weft race detector.
//!
//! Every byte of every tracked access traverses this crate on a hot path:
//! [`runtime::Detector::check_access`] walks the bytes of an instrumented
//! reference, resolves each one to an [`history::AccessHistory`] slot, and
//! runs the [`driver`] against it under the slot's phase-fair lock. The
//! driver gathers work under a reader hold, upgrades to the writer side only
//! when mutation is needed, and restarts its traversal whenever the upgrade
//! was not atomic — the history it was inspecting may have moved under it.
//!
//! The task/label model, shadow-memory mapping, and race-analysis policy are
//! capability boundaries, expressed as the traits in [`model`] and mocked in
//! tests.

pub mod config;
pub mod driver;
pub mod history;
pub mod model;
pub mod report;
pub mod runtime;
pub mod stats;

pub use config::{DetectorConfig, ReportMode};
pub use driver::check_data_race;
pub use history::{AccessHistory, SlotFlag};
pub use model::{RaceModel, ReportSink, ShadowSlots, TaskAccessInfo, TaskRuntime};
pub use report::{distinct_slots_seen, race_found};
pub use runtime::Detector;
pub use stats::{CHECK_METRICS, CheckMetrics, CheckMetricsSnapshot, CounterBucket, SlotCounters};
