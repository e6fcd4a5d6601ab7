//! Profiling Session
//!
//! One profiling run, from first discovery event to finalization. The
//! session owns the registry and the session-wide totals, turns discovery
//! events into records with a counting policy fixed per block, exposes
//! the per-occurrence counting entry points the host's callbacks invoke,
//! and writes the reports exactly once when the target exits.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::classify::{classify, FlowClass};
use crate::counters::{BranchBias, FlowTotals};
use crate::host::{BlockHandle, ImageResolver, RoutineHandle, TerminatorDesc};
use crate::registry::{BlockId, Registry, RoutineId};
use crate::report;
use crate::{ProfError, ProfResult};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory the report files land in
    pub out_dir: PathBuf,
    /// Routine report file name
    pub routine_report: String,
    /// Block report file name
    pub block_report: String,
    /// Emit the block-level report alongside the routine report
    pub emit_block_report: bool,
    /// Check seen/taken bookkeeping at finalization
    pub consistency_checks: bool,
    /// Minimum outcome count before bias / dominant-target queries commit
    pub bias_sample_floor: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            routine_report: "rtn-report.csv".to_string(),
            block_report: "blk-report.csv".to_string(),
            emit_block_report: true,
            consistency_checks: true,
            bias_sample_floor: 100,
        }
    }
}

/// One profiling run.
pub struct Session {
    config: SessionConfig,
    registry: Registry,
    totals: FlowTotals,
    finalized: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            totals: FlowTotals::default(),
            finalized: false,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    // ========================================================================
    // Structural discovery (once per static entity)
    // ========================================================================

    /// The host reports a routine. Returns the record id the host wires
    /// its instruction and entry callbacks to, or `None` when the routine
    /// is stale or resolves to no loaded image; either way the run
    /// continues and prior state is untouched.
    pub fn on_routine_discovered(
        &mut self,
        handle: RoutineHandle,
        name: &str,
        addr: u64,
        valid: bool,
        resolver: &dyn ImageResolver,
    ) -> Option<RoutineId> {
        if !valid {
            debug!("[Session] ignoring stale routine handle {:?} ({})", handle, name);
            return None;
        }
        self.registry.register_routine(handle, name, addr, resolver)
    }

    /// The host reports a basic block with its terminator. The counting
    /// policy is decided here, once, and stored on the record; the
    /// per-occurrence path only dispatches on it.
    pub fn on_block_discovered(
        &mut self,
        handle: BlockHandle,
        entry_addr: u64,
        term: &TerminatorDesc,
        resolver: &dyn ImageResolver,
    ) -> BlockId {
        if term.is_inconsistent() {
            warn!(
                "[Session] inconsistent terminator flags for block {:#x}: {:?}",
                entry_addr, term
            );
        }
        let class = classify(term);
        self.registry.register_block(handle, entry_addr, class, resolver)
    }

    /// The host reports an instruction inside a routine and gets back the
    /// record its pre-execution callback counts into. `None` when the
    /// owning routine was skipped (unresolvable or stale), in which case
    /// the instruction is not instrumented.
    pub fn on_instruction_discovered(&self, owner: RoutineHandle) -> Option<RoutineId> {
        self.registry.lookup_routine(owner)
    }

    // ========================================================================
    // Per-occurrence counting (hot path)
    // ========================================================================

    /// Fires before every instruction in an instrumented routine.
    #[inline]
    pub fn count_instruction(&self, id: RoutineId) {
        self.registry.routine(id).count_instruction();
    }

    /// Fires once before the first instruction of every dynamic entry.
    #[inline]
    pub fn count_routine_entry(&self, id: RoutineId) {
        self.registry.routine(id).count_call();
    }

    /// Fires on every entry into an instrumented block.
    #[inline]
    pub fn count_block_entry(&self, id: BlockId) {
        self.registry.block(id).count_entry();
    }

    /// Fires when the block's terminator resolves. `taken` is the
    /// occurrence's branch outcome; `target` is the resolved target when
    /// the host can supply it (indirect transfers only).
    pub fn count_branch_outcome(&self, id: BlockId, taken: bool, target: Option<u64>) {
        let block = self.registry.block(id);
        match block.class {
            FlowClass::None => {
                // Host protocol violation: no terminator was classified
                // for this block, so there is nothing to count.
                debug!(
                    "[Session] branch outcome for unclassified block {:#x}",
                    block.addr
                );
            }
            FlowClass::DirectCall => self.totals.direct_calls.record(taken),
            FlowClass::DirectBranch => block.count_branch(taken),
            FlowClass::IndirectCall => {
                self.totals.indirect_calls.record(taken);
                if let Some(t) = target {
                    block.record_target(t);
                }
            }
            FlowClass::IndirectReturn => self.totals.returns.record(taken),
            // A syscall instruction always transfers control.
            FlowClass::IndirectSyscall => self.totals.syscalls.record(true),
            FlowClass::IndirectJump => {
                block.count_branch(taken);
                if let Some(t) = target {
                    block.record_target(t);
                }
            }
        }
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// The target exited; write the reports. Fired exactly once by the
    /// host contract; a second call warns and changes nothing.
    pub fn finalize(&mut self, exit_code: i32) -> ProfResult<()> {
        if self.finalized {
            warn!("[Session] finalize called twice, reports already written");
            return Err(ProfError::AlreadyFinalized);
        }
        self.finalized = true;

        info!("[Session] target exited with code {}", exit_code);

        if self.config.consistency_checks && self.totals.returns_diverged() {
            let (seen, taken) = self.totals.returns.counts();
            warn!(
                "[Session] return seen/taken diverged ({} seen, {} taken): instrumentation bug",
                seen, taken
            );
        }

        let routine_rows = report::routine_rows(&self.registry);
        let path = self.config.out_dir.join(&self.config.routine_report);
        report::write_report(&routine_rows, &path)?;

        if self.config.emit_block_report {
            let block_rows = report::block_rows(&self.registry);
            let path = self.config.out_dir.join(&self.config.block_report);
            report::write_report(&block_rows, &path)?;
        }

        let (dc_seen, _) = self.totals.direct_calls.counts();
        let (ic_seen, _) = self.totals.indirect_calls.counts();
        let (ret_seen, _) = self.totals.returns.counts();
        let (sys_seen, _) = self.totals.syscalls.counts();
        info!(
            "[Session] {} of {} routines and {} of {} blocks observed; \
             calls: {} direct / {} indirect, {} returns, {} syscalls",
            routine_rows.len(),
            self.registry.routine_count(),
            self.registry.blocks().iter().filter(|b| b.observed()).count(),
            self.registry.block_count(),
            dc_seen,
            ic_seen,
            ret_seen,
            sys_seen,
        );
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn totals(&self) -> &FlowTotals {
        &self.totals
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // ========================================================================
    // Analysis views
    // ========================================================================

    /// Branch bias of a block under the configured sample floor.
    pub fn block_bias(&self, id: BlockId) -> BranchBias {
        self.registry.block(id).bias(self.config.bias_sample_floor)
    }

    /// Dominant indirect target of a block, once enough occurrences
    /// exist to commit to one.
    pub fn dominant_target(&self, id: BlockId) -> Option<(u64, f64)> {
        self.registry
            .block(id)
            .targets
            .dominant(self.config.bias_sample_floor)
    }
}
