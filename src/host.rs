//! Host Runtime Interface
//!
//! dbiprof never locates routines, decodes instructions, or patches code.
//! Those jobs belong to the instrumentation runtime driving the session.
//! This module defines the seam between the two: opaque entity handles,
//! the static terminator descriptor the runtime derives from its own
//! decoder, and the image-resolution query.

use serde::{Deserialize, Serialize};

/// Opaque routine handle supplied by the host runtime.
///
/// Handles are only compared and hashed; dbiprof attaches no meaning to
/// the value beyond identity within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutineHandle(pub u64);

/// Opaque basic-block handle supplied by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHandle(pub u64);

/// Identity of a loaded image (executable or shared object).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Image name as reported by the loader
    pub name: String,
    /// Lowest mapped address of the image
    pub base: u64,
}

/// Static control-flow properties of a block terminator.
///
/// Mirrors what an instruction decoder knows about the final instruction
/// of a basic block before the block ever executes. The flags are
/// decoder-derived facts, not a classification; see [`crate::classify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorDesc {
    /// Terminator can transfer control somewhere other than the next
    /// sequential instruction
    #[serde(default)]
    pub transfers_control: bool,
    /// Target is a fixed immediate (register/memory/stack targets are
    /// indirect)
    #[serde(default)]
    pub is_direct: bool,
    /// Is this a call?
    #[serde(default)]
    pub is_call: bool,
    /// Is this a return?
    #[serde(default)]
    pub is_ret: bool,
    /// Is this a system-call trap?
    #[serde(default)]
    pub is_syscall: bool,
}

impl TerminatorDesc {
    /// Block ends without any control transfer of interest.
    pub fn fallthrough() -> Self {
        Self::default()
    }

    /// Call with an immediate target.
    pub fn direct_call() -> Self {
        Self {
            transfers_control: true,
            is_direct: true,
            is_call: true,
            ..Self::default()
        }
    }

    /// Call through a register, memory slot, or the stack.
    pub fn indirect_call() -> Self {
        Self {
            transfers_control: true,
            is_call: true,
            ..Self::default()
        }
    }

    /// Conditional or unconditional branch with an immediate target.
    pub fn direct_branch() -> Self {
        Self {
            transfers_control: true,
            is_direct: true,
            ..Self::default()
        }
    }

    /// Computed jump (jump table, computed goto, tail dispatch).
    pub fn indirect_jump() -> Self {
        Self {
            transfers_control: true,
            ..Self::default()
        }
    }

    /// Return to the caller.
    pub fn ret() -> Self {
        Self {
            transfers_control: true,
            is_ret: true,
            ..Self::default()
        }
    }

    /// System-call trap.
    pub fn syscall() -> Self {
        Self {
            transfers_control: true,
            is_syscall: true,
            ..Self::default()
        }
    }

    /// Flag combinations no real decoder produces. The session logs these
    /// as internal-consistency warnings and keeps counting best-effort.
    pub fn is_inconsistent(&self) -> bool {
        let kinds = self.is_call as u8 + self.is_ret as u8 + self.is_syscall as u8;
        if kinds > 1 {
            return true;
        }
        // A kind flag without a control transfer, or a "direct" return/trap.
        if !self.transfers_control && kinds > 0 {
            return true;
        }
        self.is_direct && (self.is_ret || self.is_syscall)
    }
}

/// Image-resolution query exposed by the host runtime.
///
/// Resolution failure is an expected, recoverable condition: dynamically
/// generated code and code outside any loaded module simply resolve to
/// `None` and are not instrumented.
pub trait ImageResolver {
    fn find_owning_image(&self, addr: u64) -> Option<ImageInfo>;
}

/// Address-range image table.
///
/// The replay driver builds one of these from `image` trace events; a
/// live host would normally answer [`ImageResolver`] from its own loader
/// state instead.
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    spans: Vec<ImageSpan>,
}

#[derive(Debug, Clone)]
struct ImageSpan {
    name: String,
    base: u64,
    size: u64,
}

impl ImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loaded image covering `[base, base + size)`.
    pub fn add_image(&mut self, name: &str, base: u64, size: u64) {
        self.spans.push(ImageSpan {
            name: name.to_string(),
            base,
            size,
        });
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl ImageResolver for ImageMap {
    fn find_owning_image(&self, addr: u64) -> Option<ImageInfo> {
        self.spans
            .iter()
            .find(|s| addr >= s.base && addr - s.base < s.size)
            .map(|s| ImageInfo {
                name: s.name.clone(),
                base: s.base,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_map_resolution() {
        let mut map = ImageMap::new();
        map.add_image("app", 0x1000, 0x2000);
        map.add_image("libc.so", 0x7f00_0000, 0x10_0000);

        let img = map.find_owning_image(0x1080).unwrap();
        assert_eq!(img.name, "app");
        assert_eq!(img.base, 0x1000);

        let img = map.find_owning_image(0x7f00_1234).unwrap();
        assert_eq!(img.name, "libc.so");

        // First byte past the end is outside the image.
        assert!(map.find_owning_image(0x3000).is_none());
        assert!(map.find_owning_image(0x0).is_none());
    }

    #[test]
    fn test_terminator_constructors() {
        assert!(!TerminatorDesc::fallthrough().transfers_control);
        assert!(TerminatorDesc::direct_call().is_direct);
        assert!(!TerminatorDesc::indirect_call().is_direct);
        assert!(TerminatorDesc::ret().is_ret);
        assert!(TerminatorDesc::syscall().is_syscall);
        for t in [
            TerminatorDesc::fallthrough(),
            TerminatorDesc::direct_call(),
            TerminatorDesc::indirect_call(),
            TerminatorDesc::direct_branch(),
            TerminatorDesc::indirect_jump(),
            TerminatorDesc::ret(),
            TerminatorDesc::syscall(),
        ] {
            assert!(!t.is_inconsistent());
        }
    }

    #[test]
    fn test_inconsistent_flags() {
        let both = TerminatorDesc {
            transfers_control: true,
            is_call: true,
            is_ret: true,
            ..TerminatorDesc::default()
        };
        assert!(both.is_inconsistent());

        let direct_ret = TerminatorDesc {
            transfers_control: true,
            is_direct: true,
            is_ret: true,
            ..TerminatorDesc::default()
        };
        assert!(direct_ret.is_inconsistent());

        let kind_without_transfer = TerminatorDesc {
            is_call: true,
            ..TerminatorDesc::default()
        };
        assert!(kind_without_transfer.is_inconsistent());
    }
}
