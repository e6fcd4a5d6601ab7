//! Control-Flow Classification
//!
//! Maps the static properties of a block terminator to the counting
//! policy applied on every dynamic occurrence. Classification runs once
//! per static block at instrumentation time; the per-occurrence path
//! dispatches on the stored [`FlowClass`] and never re-derives it.

use crate::host::TerminatorDesc;

/// Counting policy for a block terminator.
///
/// Closed set: every terminator maps to exactly one variant, with
/// `IndirectJump` as the catch-all for computed transfers that are not
/// calls, returns, or traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowClass {
    /// No control-transferring terminator; block counts executions only
    None,
    /// Call with an immediate target
    DirectCall,
    /// Conditional or unconditional direct branch
    DirectBranch,
    /// Call through a register, memory slot, or the stack
    IndirectCall,
    /// Return to the caller
    IndirectReturn,
    /// System-call trap
    IndirectSyscall,
    /// Any other computed jump (jump tables, computed gotos)
    IndirectJump,
}

impl FlowClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::DirectCall => "direct-call",
            Self::DirectBranch => "direct-branch",
            Self::IndirectCall => "indirect-call",
            Self::IndirectReturn => "return",
            Self::IndirectSyscall => "syscall",
            Self::IndirectJump => "indirect-jump",
        }
    }

    /// Target is computed at runtime rather than a fixed immediate.
    pub fn is_indirect(&self) -> bool {
        matches!(
            self,
            Self::IndirectCall | Self::IndirectReturn | Self::IndirectSyscall | Self::IndirectJump
        )
    }

    /// Classes whose resolved targets vary per occurrence and feed the
    /// block's target-frequency table.
    pub fn records_targets(&self) -> bool {
        matches!(self, Self::IndirectCall | Self::IndirectJump)
    }
}

/// Classify a terminator. Pure function of its static properties.
///
/// Syscalls and returns win over the call/branch flags: both trap or
/// unwind regardless of how the decoder filled the remaining bits, so a
/// descriptor flagged inconsistently still lands in a counted bucket.
pub fn classify(term: &TerminatorDesc) -> FlowClass {
    if !term.transfers_control {
        return FlowClass::None;
    }
    if term.is_syscall {
        return FlowClass::IndirectSyscall;
    }
    if term.is_ret {
        return FlowClass::IndirectReturn;
    }
    if term.is_call {
        if term.is_direct {
            FlowClass::DirectCall
        } else {
            FlowClass::IndirectCall
        }
    } else if term.is_direct {
        FlowClass::DirectBranch
    } else {
        FlowClass::IndirectJump
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(&TerminatorDesc::fallthrough()), FlowClass::None);
        assert_eq!(classify(&TerminatorDesc::direct_call()), FlowClass::DirectCall);
        assert_eq!(classify(&TerminatorDesc::direct_branch()), FlowClass::DirectBranch);
        assert_eq!(classify(&TerminatorDesc::indirect_call()), FlowClass::IndirectCall);
        assert_eq!(classify(&TerminatorDesc::ret()), FlowClass::IndirectReturn);
        assert_eq!(classify(&TerminatorDesc::syscall()), FlowClass::IndirectSyscall);
        assert_eq!(classify(&TerminatorDesc::indirect_jump()), FlowClass::IndirectJump);
    }

    #[test]
    fn test_classify_is_pure_and_stable() {
        let term = TerminatorDesc::indirect_call();
        let first = classify(&term);
        for _ in 0..16 {
            assert_eq!(classify(&term), first);
        }
    }

    #[test]
    fn test_inconsistent_descriptor_still_lands_in_a_bucket() {
        // Return flag wins over a stray call flag.
        let term = TerminatorDesc {
            transfers_control: true,
            is_call: true,
            is_ret: true,
            ..TerminatorDesc::default()
        };
        assert!(term.is_inconsistent());
        assert_eq!(classify(&term), FlowClass::IndirectReturn);
    }

    #[test]
    fn test_target_recording_classes() {
        assert!(FlowClass::IndirectCall.records_targets());
        assert!(FlowClass::IndirectJump.records_targets());
        assert!(!FlowClass::IndirectReturn.records_targets());
        assert!(!FlowClass::IndirectSyscall.records_targets());
        assert!(!FlowClass::DirectCall.records_targets());
        assert!(!FlowClass::DirectBranch.records_targets());
        assert!(!FlowClass::None.records_targets());
    }
}
