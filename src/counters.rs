//! Counting Engine
//!
//! The hot-path counters themselves: per-routine instruction/call counts,
//! per-block execution and branch-outcome counts, session-wide seen/taken
//! buckets per control-transfer kind, and a bounded target-frequency
//! table for indirect transfers.
//!
//! Every per-occurrence update is a relaxed atomic add (two for a
//! seen/taken pair). No allocation, I/O, or blocking on any counting
//! path; the only branch is the semantically required taken check. The
//! target table is the one exception to scalar counting: indirect
//! targets vary per occurrence, so it keeps a bounded per-target vector
//! with an overflow counter instead of dropping data silently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::classify::FlowClass;
use crate::host::ImageInfo;

// ============================================================================
// Seen/taken pairs and session-wide totals
// ============================================================================

/// Seen/taken counter pair for one control-transfer kind.
#[derive(Debug, Default)]
pub struct SeenTaken {
    pub seen: AtomicU64,
    pub taken: AtomicU64,
}

impl SeenTaken {
    #[inline]
    pub fn record(&self, taken: bool) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        if taken {
            self.taken.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn counts(&self) -> (u64, u64) {
        (
            self.seen.load(Ordering::Relaxed),
            self.taken.load(Ordering::Relaxed),
        )
    }
}

/// Session-wide seen/taken buckets, one per control-transfer kind that
/// counts globally rather than on the owning block.
#[derive(Debug, Default)]
pub struct FlowTotals {
    pub direct_calls: SeenTaken,
    pub indirect_calls: SeenTaken,
    pub returns: SeenTaken,
    pub syscalls: SeenTaken,
}

impl FlowTotals {
    /// Bucket for a class, if the class counts into the totals at all.
    pub fn bucket(&self, class: FlowClass) -> Option<&SeenTaken> {
        match class {
            FlowClass::DirectCall => Some(&self.direct_calls),
            FlowClass::IndirectCall => Some(&self.indirect_calls),
            FlowClass::IndirectReturn => Some(&self.returns),
            FlowClass::IndirectSyscall => Some(&self.syscalls),
            _ => None,
        }
    }

    /// Returns with seen != taken indicate an instrumentation bug.
    pub fn returns_diverged(&self) -> bool {
        let (seen, taken) = self.returns.counts();
        seen != taken
    }
}

// ============================================================================
// Target-frequency table
// ============================================================================

/// Bounded table of resolved indirect-transfer targets.
///
/// Indirect calls and jumps resolve to different targets per occurrence;
/// each distinct target gets its own counter up to `max_targets`, and
/// occurrences past the cap are tallied in `dropped` so totals stay
/// exact.
#[derive(Debug)]
pub struct TargetTable {
    targets: RwLock<Vec<(u64, AtomicU64)>>,
    dropped: AtomicU64,
    max_targets: usize,
}

impl TargetTable {
    pub const DEFAULT_MAX_TARGETS: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_TARGETS)
    }

    pub fn with_capacity(max_targets: usize) -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            dropped: AtomicU64::new(0),
            max_targets,
        }
    }

    /// Record one transfer to `target`.
    pub fn record(&self, target: u64) {
        let targets = self.targets.read().unwrap();
        for (t, count) in targets.iter() {
            if *t == target {
                count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        drop(targets);

        let mut targets = self.targets.write().unwrap();
        // Re-scan under the write lock: another stream may have added it.
        for (t, count) in targets.iter() {
            if *t == target {
                count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        if targets.len() < self.max_targets {
            targets.push((target, AtomicU64::new(1)));
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Distinct targets observed (excluding any past the cap).
    pub fn len(&self) -> usize {
        self.targets.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().unwrap().is_empty()
    }

    /// Total transfers recorded, including those past the target cap.
    pub fn total(&self) -> u64 {
        let targets = self.targets.read().unwrap();
        let counted: u64 = targets.iter().map(|(_, c)| c.load(Ordering::Relaxed)).sum();
        counted + self.dropped.load(Ordering::Relaxed)
    }

    /// Occurrences whose target could not get its own counter.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Value-semantics copy of the per-target counts.
    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        self.targets
            .read()
            .unwrap()
            .iter()
            .map(|(t, c)| (*t, c.load(Ordering::Relaxed)))
            .collect()
    }

    /// The single target taking >90% of transfers, once at least
    /// `sample_floor` occurrences exist.
    pub fn dominant(&self, sample_floor: u64) -> Option<(u64, f64)> {
        let targets = self.targets.read().unwrap();
        if targets.is_empty() {
            return None;
        }

        let total: u64 = targets.iter().map(|(_, c)| c.load(Ordering::Relaxed)).sum();
        if total < sample_floor {
            return None;
        }

        let mut best = (0u64, 0u64);
        for (t, c) in targets.iter() {
            let count = c.load(Ordering::Relaxed);
            if count > best.1 {
                best = (*t, count);
            }
        }

        let ratio = (best.1 as f64) / (total as f64);
        if ratio > 0.90 {
            Some((best.0, ratio))
        } else {
            None
        }
    }

    pub fn is_monomorphic(&self) -> bool {
        self.len() == 1 && self.dropped() == 0
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Routine statistics
// ============================================================================

/// Per-routine statistics record.
///
/// Identity fields are captured once at registration and never change;
/// counters only grow for the lifetime of the record.
#[derive(Debug)]
pub struct RoutineStats {
    /// Name of the image the routine lives in
    pub image_name: String,
    /// Lowest mapped address of that image
    pub image_base: u64,
    /// Routine name as reported by the host
    pub name: String,
    /// Routine entry address
    pub addr: u64,
    /// Dynamic instruction executions inside the routine
    pub instr_count: AtomicU64,
    /// Dynamic invocations of the routine
    pub call_count: AtomicU64,
}

impl RoutineStats {
    pub fn new(image: ImageInfo, name: &str, addr: u64) -> Self {
        Self {
            image_name: image.name,
            image_base: image.base,
            name: name.to_string(),
            addr,
            instr_count: AtomicU64::new(0),
            call_count: AtomicU64::new(0),
        }
    }

    /// Fires before every instruction in the routine.
    #[inline]
    pub fn count_instruction(&self) {
        self.instr_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fires once per dynamic entry into the routine.
    #[inline]
    pub fn count_call(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instructions(&self) -> u64 {
        self.instr_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Was the routine ever dynamically reached?
    pub fn observed(&self) -> bool {
        self.instructions() > 0 || self.calls() > 0
    }
}

// ============================================================================
// Block statistics
// ============================================================================

/// Per-block statistics record.
#[derive(Debug)]
pub struct BlockStats {
    /// Block entry address
    pub addr: u64,
    /// Best-effort image identity; blocks register even when the address
    /// resolves to no loaded image
    pub image: Option<ImageInfo>,
    /// Counting policy fixed at instrumentation time
    pub class: FlowClass,
    /// Times the block was entered
    pub exec_count: AtomicU64,
    /// Times the terminating branch resolved taken
    pub taken_count: AtomicU64,
    /// Times it fell through / resolved not taken
    pub fallthrough_count: AtomicU64,
    /// Resolved targets for indirect transfers
    pub targets: TargetTable,
}

impl BlockStats {
    pub fn new(addr: u64, image: Option<ImageInfo>, class: FlowClass) -> Self {
        Self {
            addr,
            image,
            class,
            exec_count: AtomicU64::new(0),
            taken_count: AtomicU64::new(0),
            fallthrough_count: AtomicU64::new(0),
            targets: TargetTable::new(),
        }
    }

    /// Fires on every entry into the block.
    #[inline]
    pub fn count_entry(&self) {
        self.exec_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fires when the terminator resolves; exactly one of the two
    /// counters moves.
    #[inline]
    pub fn count_branch(&self, taken: bool) {
        if taken {
            self.taken_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fallthrough_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the resolved target of an indirect transfer.
    #[inline]
    pub fn record_target(&self, target: u64) {
        self.targets.record(target);
    }

    pub fn executions(&self) -> u64 {
        self.exec_count.load(Ordering::Relaxed)
    }

    pub fn taken(&self) -> u64 {
        self.taken_count.load(Ordering::Relaxed)
    }

    pub fn fallthrough(&self) -> u64 {
        self.fallthrough_count.load(Ordering::Relaxed)
    }

    pub fn observed(&self) -> bool {
        self.executions() > 0 || self.taken() > 0 || self.fallthrough() > 0
    }

    /// Bias of the terminating branch, once at least `sample_floor`
    /// outcomes exist.
    pub fn bias(&self, sample_floor: u64) -> BranchBias {
        let t = self.taken();
        let ft = self.fallthrough();
        let total = t + ft;

        if total < sample_floor {
            return BranchBias::Unknown;
        }

        let ratio = (t as f64) / (total as f64);
        if ratio > 0.99 {
            BranchBias::AlwaysTaken
        } else if ratio < 0.01 {
            BranchBias::NeverTaken
        } else if ratio > 0.80 {
            BranchBias::MostlyTaken
        } else if ratio < 0.20 {
            BranchBias::MostlyNotTaken
        } else {
            BranchBias::Mixed
        }
    }
}

/// Branch bias classification derived from taken/fallthrough counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchBias {
    Unknown,
    AlwaysTaken,
    NeverTaken,
    MostlyTaken,
    MostlyNotTaken,
    Mixed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageInfo {
        ImageInfo {
            name: "app".to_string(),
            base: 0x400000,
        }
    }

    #[test]
    fn test_routine_counting() {
        let stats = RoutineStats::new(image(), "foo", 0x401000);
        assert!(!stats.observed());

        stats.count_call();
        for _ in 0..3 {
            stats.count_instruction();
        }
        stats.count_call();
        for _ in 0..3 {
            stats.count_instruction();
        }

        assert_eq!(stats.instructions(), 6);
        assert_eq!(stats.calls(), 2);
        assert!(stats.observed());
    }

    #[test]
    fn test_branch_counting_partitions() {
        let block = BlockStats::new(0x401040, Some(image()), FlowClass::DirectBranch);
        for i in 0..10 {
            block.count_entry();
            block.count_branch(i < 4);
        }
        assert_eq!(block.executions(), 10);
        assert_eq!(block.taken(), 4);
        assert_eq!(block.fallthrough(), 6);
        assert_eq!(block.taken() + block.fallthrough(), block.executions());
    }

    #[test]
    fn test_branch_bias() {
        let block = BlockStats::new(0x1000, None, FlowClass::DirectBranch);

        // Below the sample floor nothing is claimed.
        block.count_branch(true);
        assert_eq!(block.bias(100), BranchBias::Unknown);

        for _ in 0..994 {
            block.count_branch(true);
        }
        for _ in 0..5 {
            block.count_branch(false);
        }
        assert_eq!(block.bias(100), BranchBias::AlwaysTaken);

        let mixed = BlockStats::new(0x2000, None, FlowClass::DirectBranch);
        for i in 0..200 {
            mixed.count_branch(i % 2 == 0);
        }
        assert_eq!(mixed.bias(100), BranchBias::Mixed);
    }

    #[test]
    fn test_target_table_sums() {
        let table = TargetTable::new();
        table.record(0x1000);
        table.record(0x1000);
        table.record(0x2000);
        table.record(0x2000);
        table.record(0x3000);

        assert_eq!(table.len(), 3);
        assert_eq!(table.total(), 5);
        let mut snap = table.snapshot();
        snap.sort();
        assert_eq!(snap, vec![(0x1000, 2), (0x2000, 2), (0x3000, 1)]);
    }

    #[test]
    fn test_target_table_cap_keeps_totals_exact() {
        let table = TargetTable::with_capacity(2);
        for t in 0..5u64 {
            table.record(0x1000 + t * 0x10);
        }
        assert_eq!(table.len(), 2);
        assert_eq!(table.dropped(), 3);
        assert_eq!(table.total(), 5);
    }

    #[test]
    fn test_dominant_target() {
        let table = TargetTable::new();
        for _ in 0..950 {
            table.record(0x1000);
        }
        for _ in 0..50 {
            table.record(0x2000);
        }
        let (target, ratio) = table.dominant(100).unwrap();
        assert_eq!(target, 0x1000);
        assert!(ratio > 0.90);

        // Below the sample floor the query stays conservative.
        let sparse = TargetTable::new();
        sparse.record(0x1000);
        assert!(sparse.dominant(100).is_none());
    }

    #[test]
    fn test_flow_totals_buckets() {
        let totals = FlowTotals::default();
        totals.direct_calls.record(true);
        totals.indirect_calls.record(true);
        totals.indirect_calls.record(true);
        totals.syscalls.record(true);

        assert_eq!(totals.direct_calls.counts(), (1, 1));
        assert_eq!(totals.indirect_calls.counts(), (2, 2));
        assert_eq!(totals.syscalls.counts(), (1, 1));
        assert!(totals.bucket(FlowClass::DirectBranch).is_none());
        assert!(totals.bucket(FlowClass::IndirectReturn).is_some());

        assert!(!totals.returns_diverged());
        totals.returns.seen.fetch_add(1, Ordering::Relaxed);
        assert!(totals.returns_diverged());
    }
}
