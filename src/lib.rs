//! dbiprof - Execution Profiling Core for DBI Runtimes
//!
//! dbiprof is the counting and reporting engine behind a dynamic binary
//! instrumentation profiler. A host runtime (the component that locates
//! routines, images, and basic blocks in a live process and patches in
//! callbacks) feeds structural discovery events into a [`Session`]; the
//! session decides what to count, fixes a counting policy per block, and
//! exposes the per-occurrence counting entry points the host's callbacks
//! invoke. At target exit it writes deterministic, sorted reports.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Host DBI Runtime                          │
//! │   routine/block/instruction discovery · callback patching        │
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 │ structural events            │ dynamic callbacks
//!                 ▼                              ▼
//! ┌───────────────────────────┐   ┌──────────────────────────────────┐
//! │         Session           │   │          Counting Engine         │
//! │  ┌─────────────────────┐  │   │  per-routine instr/call counts   │
//! │  │   Entity Registry   │  │   │  per-block exec/taken/fallthru   │
//! │  │  handle → record    │◀─┼───│  seen/taken buckets per kind     │
//! │  └─────────────────────┘  │   │  indirect-target frequencies     │
//! │  ┌─────────────────────┐  │   └──────────────────────────────────┘
//! │  │ Flow Classifier     │  │                  │ finalization
//! │  │ terminator → policy │  │                  ▼
//! │  └─────────────────────┘  │   ┌──────────────────────────────────┐
//! └───────────────────────────┘   │          Report Builder          │
//!                                 │  filter · sort · render · write  │
//!                                 └──────────────────────────────────┘
//! ```
//!
//! The crate never disassembles, relocates, or controls the target; the
//! [`host`] module is the entire seam to the runtime. For development
//! and testing, [`trace`] replays a recorded event stream through a
//! session in place of a live host.
//!
//! # Quick Start
//!
//! ```rust
//! use dbiprof::{BlockHandle, ImageMap, RoutineHandle, Session, TerminatorDesc};
//!
//! let mut images = ImageMap::new();
//! images.add_image("app", 0x400000, 0x10000);
//!
//! let mut session = Session::with_defaults();
//! let foo = session
//!     .on_routine_discovered(RoutineHandle(1), "foo", 0x401000, true, &images)
//!     .unwrap();
//! let blk = session.on_block_discovered(
//!     BlockHandle(1),
//!     0x401040,
//!     &TerminatorDesc::direct_branch(),
//!     &images,
//! );
//!
//! // The host's callbacks fire these on every dynamic occurrence.
//! session.count_routine_entry(foo);
//! session.count_instruction(foo);
//! session.count_block_entry(blk);
//! session.count_branch_outcome(blk, true, None);
//! ```

pub mod classify;
pub mod counters;
pub mod host;
pub mod registry;
pub mod report;
pub mod session;
pub mod trace;

pub use classify::{classify, FlowClass};
pub use counters::{BlockStats, BranchBias, FlowTotals, RoutineStats, SeenTaken, TargetTable};
pub use host::{BlockHandle, ImageInfo, ImageMap, ImageResolver, RoutineHandle, TerminatorDesc};
pub use registry::{BlockId, Registry, RoutineId};
pub use report::{block_rows, render, routine_rows, write_report, ReportRow};
pub use session::{Session, SessionConfig};
pub use trace::{replay, replay_path, ReplaySummary, TraceEvent};

/// Profiling result
pub type ProfResult<T> = Result<T, ProfError>;

/// Profiling errors
///
/// Counting never fails; errors arise only at the edges (report emission,
/// trace replay). Nothing here may abort the observed target.
#[derive(Debug, thiserror::Error)]
pub enum ProfError {
    /// Report file could not be written at finalization
    #[error("report I/O failure: {0}")]
    Report(#[source] std::io::Error),

    /// Trace stream could not be read
    #[error("trace I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Trace line did not parse, or violated event ordering
    #[error("malformed trace at line {line}: {reason}")]
    Trace { line: usize, reason: String },

    /// Finalization ran twice
    #[error("session already finalized")]
    AlreadyFinalized,
}
