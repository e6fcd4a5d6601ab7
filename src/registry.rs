//! Entity Registry
//!
//! Owns every statistics record for the lifetime of a session. Records
//! live in arenas addressed by stable ids, with a parallel lookup from
//! the host's opaque handles, so a record is created exactly once per
//! physical entity no matter how often the host revisits it, is never
//! moved or dropped mid-run, and iterates in discovery order for the
//! deterministic report tiebreak.

use std::collections::HashMap;

use log::debug;

use crate::classify::FlowClass;
use crate::counters::{BlockStats, RoutineStats};
use crate::host::{BlockHandle, ImageResolver, RoutineHandle};

/// Stable index of a routine record within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(pub(crate) usize);

/// Stable index of a block record within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// Registry of all routine and block records for one profiling run.
#[derive(Debug, Default)]
pub struct Registry {
    routines: Vec<RoutineStats>,
    blocks: Vec<BlockStats>,
    routine_index: HashMap<RoutineHandle, RoutineId>,
    block_index: HashMap<BlockHandle, BlockId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine the host discovered.
    ///
    /// Returns `None` when `addr` resolves to no loaded image; the caller
    /// skips instrumentation for that routine and the run continues.
    /// Re-registering a known handle returns the existing record's id.
    pub fn register_routine(
        &mut self,
        handle: RoutineHandle,
        name: &str,
        addr: u64,
        resolver: &dyn ImageResolver,
    ) -> Option<RoutineId> {
        if let Some(&id) = self.routine_index.get(&handle) {
            return Some(id);
        }

        let image = match resolver.find_owning_image(addr) {
            Some(image) => image,
            None => {
                debug!("[Registry] no owning image for {} at {:#x}, skipping", name, addr);
                return None;
            }
        };

        let id = RoutineId(self.routines.len());
        self.routines.push(RoutineStats::new(image, name, addr));
        self.routine_index.insert(handle, id);
        Some(id)
    }

    /// Register a block the host discovered. Always succeeds; image
    /// resolution is best-effort and only feeds report identity.
    pub fn register_block(
        &mut self,
        handle: BlockHandle,
        entry_addr: u64,
        class: FlowClass,
        resolver: &dyn ImageResolver,
    ) -> BlockId {
        if let Some(&id) = self.block_index.get(&handle) {
            return id;
        }

        let image = resolver.find_owning_image(entry_addr);
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockStats::new(entry_addr, image, class));
        self.block_index.insert(handle, id);
        id
    }

    pub fn lookup_routine(&self, handle: RoutineHandle) -> Option<RoutineId> {
        self.routine_index.get(&handle).copied()
    }

    pub fn lookup_block(&self, handle: BlockHandle) -> Option<BlockId> {
        self.block_index.get(&handle).copied()
    }

    pub fn routine(&self, id: RoutineId) -> &RoutineStats {
        &self.routines[id.0]
    }

    pub fn block(&self, id: BlockId) -> &BlockStats {
        &self.blocks[id.0]
    }

    /// All routine records in discovery order.
    pub fn routines(&self) -> &[RoutineStats] {
        &self.routines
    }

    /// All block records in discovery order.
    pub fn blocks(&self) -> &[BlockStats] {
        &self.blocks
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    // ========================================================================
    // Hot-entity queries
    // ========================================================================

    /// Top `n` routines by dynamic instruction count.
    pub fn hot_routines(&self, n: usize) -> Vec<(RoutineId, u64)> {
        let mut hot: Vec<_> = self
            .routines
            .iter()
            .enumerate()
            .map(|(i, r)| (RoutineId(i), r.instructions()))
            .filter(|(_, count)| *count > 0)
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1));
        hot.truncate(n);
        hot
    }

    /// Top `n` blocks by execution count.
    pub fn hot_blocks(&self, n: usize) -> Vec<(BlockId, u64)> {
        let mut hot: Vec<_> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i), b.executions()))
            .filter(|(_, count)| *count > 0)
            .collect();
        hot.sort_by(|a, b| b.1.cmp(&a.1));
        hot.truncate(n);
        hot
    }

    pub fn is_hot_block(&self, id: BlockId, threshold: u64) -> bool {
        self.block(id).executions() >= threshold
    }
}
