//! Check-path counters.
//!
//! Every driver call is classified by three facts — did it ever intend to
//! modify the history, what contention did it meet, and if it upgraded, was
//! the upgrade atomic — into one of nine buckets. Buckets are bumped both on
//! the slot and on the process-global [`CHECK_METRICS`].
//!
//! Counters are lock-free `AtomicU64` with `Relaxed` ordering — readers may
//! observe stale sums but never torn values.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-global check metrics singleton.
pub static CHECK_METRICS: CheckMetrics = CheckMetrics::new();

/// Classification of one driver call.
///
/// `Mod`/`NoMod`: whether an upgrade was ever attempted. `RwCon`: the reader
/// lock saw an announced writer at acquisition. `RrCon`: the upgrade saw
/// other readers. `Us`/`Uf`: the upgrade was atomic / was not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterBucket {
    NoModRwCon,
    NoModRrCon,
    NoModNoCon,
    ModRwConUs,
    ModRwConUf,
    ModRrConUs,
    ModRrConUf,
    ModNoConUs,
    ModNoConUf,
}

/// Bucket selection. Reader/writer contention outranks reader/reader
/// contention when both were observed.
#[must_use]
pub fn classify(
    mod_intent: bool,
    rw_contend: bool,
    rr_contend: bool,
    upgrade_atomic: bool,
) -> CounterBucket {
    if !mod_intent {
        if rw_contend {
            CounterBucket::NoModRwCon
        } else if rr_contend {
            CounterBucket::NoModRrCon
        } else {
            CounterBucket::NoModNoCon
        }
    } else if rw_contend {
        if upgrade_atomic { CounterBucket::ModRwConUs } else { CounterBucket::ModRwConUf }
    } else if rr_contend {
        if upgrade_atomic { CounterBucket::ModRrConUs } else { CounterBucket::ModRrConUf }
    } else if upgrade_atomic {
        CounterBucket::ModNoConUs
    } else {
        CounterBucket::ModNoConUf
    }
}

/// The nine-bucket contention taxonomy, used both per slot and globally.
#[derive(Debug)]
pub struct ContentionCounters {
    pub no_mod_rw_con: AtomicU64,
    pub no_mod_rr_con: AtomicU64,
    pub no_mod_no_con: AtomicU64,
    pub mod_rw_con_us: AtomicU64,
    pub mod_rw_con_uf: AtomicU64,
    pub mod_rr_con_us: AtomicU64,
    pub mod_rr_con_uf: AtomicU64,
    pub mod_no_con_us: AtomicU64,
    pub mod_no_con_uf: AtomicU64,
}

impl ContentionCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            no_mod_rw_con: AtomicU64::new(0),
            no_mod_rr_con: AtomicU64::new(0),
            no_mod_no_con: AtomicU64::new(0),
            mod_rw_con_us: AtomicU64::new(0),
            mod_rw_con_uf: AtomicU64::new(0),
            mod_rr_con_us: AtomicU64::new(0),
            mod_rr_con_uf: AtomicU64::new(0),
            mod_no_con_us: AtomicU64::new(0),
            mod_no_con_uf: AtomicU64::new(0),
        }
    }

    fn cell(&self, bucket: CounterBucket) -> &AtomicU64 {
        match bucket {
            CounterBucket::NoModRwCon => &self.no_mod_rw_con,
            CounterBucket::NoModRrCon => &self.no_mod_rr_con,
            CounterBucket::NoModNoCon => &self.no_mod_no_con,
            CounterBucket::ModRwConUs => &self.mod_rw_con_us,
            CounterBucket::ModRwConUf => &self.mod_rw_con_uf,
            CounterBucket::ModRrConUs => &self.mod_rr_con_us,
            CounterBucket::ModRrConUf => &self.mod_rr_con_uf,
            CounterBucket::ModNoConUs => &self.mod_no_con_us,
            CounterBucket::ModNoConUf => &self.mod_no_con_uf,
        }
    }

    pub fn bump(&self, bucket: CounterBucket) {
        self.cell(bucket).fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ContentionSnapshot {
        ContentionSnapshot {
            no_mod_rw_con: self.no_mod_rw_con.load(Ordering::Relaxed),
            no_mod_rr_con: self.no_mod_rr_con.load(Ordering::Relaxed),
            no_mod_no_con: self.no_mod_no_con.load(Ordering::Relaxed),
            mod_rw_con_us: self.mod_rw_con_us.load(Ordering::Relaxed),
            mod_rw_con_uf: self.mod_rw_con_uf.load(Ordering::Relaxed),
            mod_rr_con_us: self.mod_rr_con_us.load(Ordering::Relaxed),
            mod_rr_con_uf: self.mod_rr_con_uf.load(Ordering::Relaxed),
            mod_no_con_us: self.mod_no_con_us.load(Ordering::Relaxed),
            mod_no_con_uf: self.mod_no_con_uf.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.no_mod_rw_con.store(0, Ordering::Relaxed);
        self.no_mod_rr_con.store(0, Ordering::Relaxed);
        self.no_mod_no_con.store(0, Ordering::Relaxed);
        self.mod_rw_con_us.store(0, Ordering::Relaxed);
        self.mod_rw_con_uf.store(0, Ordering::Relaxed);
        self.mod_rr_con_us.store(0, Ordering::Relaxed);
        self.mod_rr_con_uf.store(0, Ordering::Relaxed);
        self.mod_no_con_us.store(0, Ordering::Relaxed);
        self.mod_no_con_uf.store(0, Ordering::Relaxed);
    }
}

impl Default for ContentionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of the contention taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContentionSnapshot {
    pub no_mod_rw_con: u64,
    pub no_mod_rr_con: u64,
    pub no_mod_no_con: u64,
    pub mod_rw_con_us: u64,
    pub mod_rw_con_uf: u64,
    pub mod_rr_con_us: u64,
    pub mod_rr_con_uf: u64,
    pub mod_no_con_us: u64,
    pub mod_no_con_uf: u64,
}

impl ContentionSnapshot {
    /// Sum of all nine buckets — equals the number of classified calls.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.no_mod_rw_con
            + self.no_mod_rr_con
            + self.no_mod_no_con
            + self.mod_rw_con_us
            + self.mod_rw_con_uf
            + self.mod_rr_con_us
            + self.mod_rr_con_uf
            + self.mod_no_con_us
            + self.mod_no_con_uf
    }

    /// Sum of the six modifying-intent buckets.
    #[must_use]
    pub fn modifying(&self) -> u64 {
        self.mod_rw_con_us
            + self.mod_rw_con_uf
            + self.mod_rr_con_us
            + self.mod_rr_con_uf
            + self.mod_no_con_us
            + self.mod_no_con_uf
    }
}

/// Slot-local counters: access count plus the contention taxonomy.
#[derive(Debug)]
pub struct SlotCounters {
    pub accesses: AtomicU64,
    pub contention: ContentionCounters,
}

impl SlotCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self { accesses: AtomicU64::new(0), contention: ContentionCounters::new() }
    }

    pub fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump(&self, bucket: CounterBucket) {
        self.contention.bump(bucket);
    }
}

impl Default for SlotCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-global check metrics.
#[derive(Debug)]
pub struct CheckMetrics {
    /// Driver invocations.
    pub checks_total: AtomicU64,
    /// Bytes walked by `check_access` (including duplicates that were then
    /// skipped).
    pub bytes_checked_total: AtomicU64,
    /// Calls that found a history over the record threshold.
    pub history_overflow_total: AtomicU64,
    /// Races reported.
    pub races_total: AtomicU64,
    pub contention: ContentionCounters,
}

impl CheckMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            checks_total: AtomicU64::new(0),
            bytes_checked_total: AtomicU64::new(0),
            history_overflow_total: AtomicU64::new(0),
            races_total: AtomicU64::new(0),
            contention: ContentionCounters::new(),
        }
    }

    pub fn record_check(&self) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_byte_checked(&self) {
        self.bytes_checked_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.history_overflow_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_race(&self) {
        self.races_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump(&self, bucket: CounterBucket) {
        self.contention.bump(bucket);
    }

    #[must_use]
    pub fn snapshot(&self) -> CheckMetricsSnapshot {
        CheckMetricsSnapshot {
            checks_total: self.checks_total.load(Ordering::Relaxed),
            bytes_checked_total: self.bytes_checked_total.load(Ordering::Relaxed),
            history_overflow_total: self.history_overflow_total.load(Ordering::Relaxed),
            races_total: self.races_total.load(Ordering::Relaxed),
            contention: self.contention.snapshot(),
        }
    }

    /// Reset all counters to zero (tests/diagnostics).
    pub fn reset(&self) {
        self.checks_total.store(0, Ordering::Relaxed);
        self.bytes_checked_total.store(0, Ordering::Relaxed);
        self.history_overflow_total.store(0, Ordering::Relaxed);
        self.races_total.store(0, Ordering::Relaxed);
        self.contention.reset();
    }
}

/// Serializable snapshot of the global check metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckMetricsSnapshot {
    pub checks_total: u64,
    pub bytes_checked_total: u64,
    pub history_overflow_total: u64,
    pub races_total: u64,
    pub contention: ContentionSnapshot,
}

impl fmt::Display for CheckMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checks(calls={} bytes={} overflow={} races={} mod={} of {})",
            self.checks_total,
            self.bytes_checked_total,
            self.history_overflow_total,
            self.races_total,
            self.contention.modifying(),
            self.contention.total(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_the_bucket_table() {
        use CounterBucket::*;

        // No modifying intent: the upgrade-outcome column is irrelevant.
        assert_eq!(classify(false, true, false, false), NoModRwCon);
        assert_eq!(classify(false, true, true, true), NoModRwCon);
        assert_eq!(classify(false, false, true, false), NoModRrCon);
        assert_eq!(classify(false, false, false, false), NoModNoCon);

        assert_eq!(classify(true, true, false, true), ModRwConUs);
        assert_eq!(classify(true, true, false, false), ModRwConUf);
        assert_eq!(classify(true, false, true, true), ModRrConUs);
        assert_eq!(classify(true, false, true, false), ModRrConUf);
        assert_eq!(classify(true, false, false, true), ModNoConUs);
        assert_eq!(classify(true, false, false, false), ModNoConUf);
    }

    #[test]
    fn rw_contention_outranks_rr() {
        assert_eq!(classify(true, true, true, true), CounterBucket::ModRwConUs);
        assert_eq!(classify(true, true, true, false), CounterBucket::ModRwConUf);
    }

    #[test]
    fn bump_lands_in_the_right_cell() {
        let counters = ContentionCounters::new();
        counters.bump(CounterBucket::ModNoConUs);
        counters.bump(CounterBucket::ModNoConUs);
        counters.bump(CounterBucket::NoModNoCon);
        let snap = counters.snapshot();
        assert_eq!(snap.mod_no_con_us, 2);
        assert_eq!(snap.no_mod_no_con, 1);
        assert_eq!(snap.total(), 3);
        assert_eq!(snap.modifying(), 2);
    }

    #[test]
    fn snapshot_display_is_one_line() {
        let metrics = CheckMetrics::new();
        metrics.record_check();
        metrics.record_byte_checked();
        let line = metrics.snapshot().to_string();
        assert!(line.starts_with("checks("));
        assert!(!line.contains('\n'));
    }
}
