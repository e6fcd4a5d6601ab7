//! Trace Replay
//!
//! A recorded event stream standing in for a live instrumentation
//! runtime: one JSON object per line, replayed through a [`Session`] in
//! order. Structural events build the image map and register entities;
//! dynamic events drive the counting entry points; the `exit` event
//! finalizes the session. Replay reproduces exactly the counters the
//! equivalent direct API calls produce.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::host::{BlockHandle, ImageMap, RoutineHandle, TerminatorDesc};
use crate::session::Session;
use crate::{ProfError, ProfResult};

fn default_count() -> u64 {
    1
}

fn default_valid() -> bool {
    true
}

/// One recorded host-runtime event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// An image was loaded, covering `[base, base + size)`
    Image { name: String, base: u64, size: u64 },
    /// A routine became structurally known
    Routine {
        handle: u64,
        name: String,
        addr: u64,
        #[serde(default = "default_valid")]
        valid: bool,
    },
    /// A basic block became structurally known
    Block {
        handle: u64,
        addr: u64,
        term: TerminatorDesc,
    },
    /// A routine was dynamically entered
    Call { routine: u64 },
    /// Instructions executed inside a routine
    Instr {
        routine: u64,
        #[serde(default = "default_count")]
        count: u64,
    },
    /// A block was entered
    Enter {
        block: u64,
        #[serde(default = "default_count")]
        count: u64,
    },
    /// A block's terminator resolved
    Branch {
        block: u64,
        taken: bool,
        #[serde(default)]
        target: Option<u64>,
    },
    /// The target process exited
    Exit { code: i32 },
}

/// What a replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Events applied (including skipped ones)
    pub events: u64,
    /// Dynamic events referencing handles never registered
    pub skipped: u64,
    /// Exit code from the trace's `exit` event, if one was present
    pub exit_code: Option<i32>,
}

/// Replay a trace from a reader into `session`.
///
/// Hard syntax errors and events after `exit` abort with a line-numbered
/// [`ProfError::Trace`]; dynamic events naming unknown handles are
/// skipped and tallied, matching the recoverable-resolution contract.
pub fn replay<R: BufRead>(reader: R, session: &mut Session) -> ProfResult<ReplaySummary> {
    let mut images = ImageMap::new();
    let mut summary = ReplaySummary::default();

    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        if summary.exit_code.is_some() {
            return Err(ProfError::Trace {
                line: lineno,
                reason: "event after exit".to_string(),
            });
        }

        let event: TraceEvent = serde_json::from_str(text).map_err(|e| ProfError::Trace {
            line: lineno,
            reason: e.to_string(),
        })?;
        summary.events += 1;

        match event {
            TraceEvent::Image { name, base, size } => {
                images.add_image(&name, base, size);
            }
            TraceEvent::Routine {
                handle,
                name,
                addr,
                valid,
            } => {
                session.on_routine_discovered(RoutineHandle(handle), &name, addr, valid, &images);
            }
            TraceEvent::Block { handle, addr, term } => {
                session.on_block_discovered(BlockHandle(handle), addr, &term, &images);
            }
            TraceEvent::Call { routine } => {
                match session.registry().lookup_routine(RoutineHandle(routine)) {
                    Some(id) => session.count_routine_entry(id),
                    None => {
                        debug!("[Replay] call for unknown routine handle {}", routine);
                        summary.skipped += 1;
                    }
                }
            }
            TraceEvent::Instr { routine, count } => {
                match session.registry().lookup_routine(RoutineHandle(routine)) {
                    Some(id) => {
                        for _ in 0..count {
                            session.count_instruction(id);
                        }
                    }
                    None => {
                        debug!("[Replay] instr for unknown routine handle {}", routine);
                        summary.skipped += 1;
                    }
                }
            }
            TraceEvent::Enter { block, count } => {
                match session.registry().lookup_block(BlockHandle(block)) {
                    Some(id) => {
                        for _ in 0..count {
                            session.count_block_entry(id);
                        }
                    }
                    None => {
                        debug!("[Replay] enter for unknown block handle {}", block);
                        summary.skipped += 1;
                    }
                }
            }
            TraceEvent::Branch {
                block,
                taken,
                target,
            } => match session.registry().lookup_block(BlockHandle(block)) {
                Some(id) => session.count_branch_outcome(id, taken, target),
                None => {
                    debug!("[Replay] branch for unknown block handle {}", block);
                    summary.skipped += 1;
                }
            },
            TraceEvent::Exit { code } => {
                summary.exit_code = Some(code);
                session.finalize(code)?;
            }
        }
    }

    info!(
        "[Replay] {} events applied, {} skipped, exit {:?}",
        summary.events, summary.skipped, summary.exit_code
    );
    Ok(summary)
}

/// Replay a trace file into `session`.
pub fn replay_path(path: &Path, session: &mut Session) -> ProfResult<ReplaySummary> {
    let file = File::open(path)?;
    replay(BufReader::new(file), session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    fn trace_session(dir: &std::path::Path) -> Session {
        Session::new(SessionConfig {
            out_dir: dir.to_path_buf(),
            ..SessionConfig::default()
        })
    }

    const TRACE: &str = r#"
# foo runs twice at three instructions per call
{"event":"image","name":"app","base":4194304,"size":65536}
{"event":"routine","handle":1,"name":"foo","addr":4198400}
{"event":"block","handle":10,"addr":4198464,"term":{"transfers_control":true,"is_direct":true}}
{"event":"call","routine":1}
{"event":"instr","routine":1,"count":3}
{"event":"call","routine":1}
{"event":"instr","routine":1,"count":3}
{"event":"enter","block":10,"count":10}
{"event":"branch","block":10,"taken":true}
{"event":"branch","block":10,"taken":true}
{"event":"branch","block":10,"taken":true}
{"event":"branch","block":10,"taken":true}
{"event":"branch","block":10,"taken":false}
{"event":"branch","block":10,"taken":false}
{"event":"branch","block":10,"taken":false}
{"event":"branch","block":10,"taken":false}
{"event":"branch","block":10,"taken":false}
{"event":"branch","block":10,"taken":false}
{"event":"exit","code":0}
"#;

    #[test]
    fn test_replay_matches_direct_api() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = trace_session(dir.path());
        let summary = replay(TRACE.as_bytes(), &mut session).unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.exit_code, Some(0));
        assert!(session.is_finalized());

        let text = std::fs::read_to_string(dir.path().join("rtn-report.csv")).unwrap();
        assert_eq!(text, "app, 0x400000, foo, 0x401000, 6, 2\n");

        let blocks = std::fs::read_to_string(dir.path().join("blk-report.csv")).unwrap();
        assert_eq!(blocks, "app, 0x400000, blk_401040, 0x401040, 10, 4\n");
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = trace_session(dir.path());
        let trace = "{\"event\":\"image\",\"name\":\"app\",\"base\":0,\"size\":4096}\nnot json\n";

        let err = replay(trace.as_bytes(), &mut session).unwrap_err();
        match err {
            ProfError::Trace { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_handles_are_skipped_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = trace_session(dir.path());
        let trace = concat!(
            "{\"event\":\"call\",\"routine\":42}\n",
            "{\"event\":\"branch\",\"block\":42,\"taken\":true}\n",
            "{\"event\":\"exit\",\"code\":0}\n",
        );

        let summary = replay(trace.as_bytes(), &mut session).unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.exit_code, Some(0));
    }

    #[test]
    fn test_event_after_exit_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = trace_session(dir.path());
        let trace = concat!(
            "{\"event\":\"exit\",\"code\":0}\n",
            "{\"event\":\"call\",\"routine\":1}\n",
        );

        let err = replay(trace.as_bytes(), &mut session).unwrap_err();
        assert!(matches!(err, ProfError::Trace { line: 2, .. }));
    }

    #[test]
    fn test_trace_without_exit_writes_no_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = trace_session(dir.path());
        let trace = concat!(
            "{\"event\":\"image\",\"name\":\"app\",\"base\":4194304,\"size\":65536}\n",
            "{\"event\":\"routine\",\"handle\":1,\"name\":\"foo\",\"addr\":4198400}\n",
            "{\"event\":\"call\",\"routine\":1}\n",
        );

        let summary = replay(trace.as_bytes(), &mut session).unwrap();
        assert_eq!(summary.exit_code, None);
        assert!(!session.is_finalized());
        assert!(!dir.path().join("rtn-report.csv").exists());
    }

    #[test]
    fn test_event_roundtrip_through_serde() {
        let event = TraceEvent::Branch {
            block: 7,
            taken: true,
            target: Some(0x401000),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        match back {
            TraceEvent::Branch {
                block,
                taken,
                target,
            } => {
                assert_eq!(block, 7);
                assert!(taken);
                assert_eq!(target, Some(0x401000));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
