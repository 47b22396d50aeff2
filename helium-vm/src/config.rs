//! VM-wide configuration and the size constants it defaults to, modeled
//! on the fixed parameter table a VM publishes alongside its interpreter.

/// Default total heap size: 16 MiB (spec §4.7).
pub const DEFAULT_HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Default allocation alignment, in bytes.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Young generation size: 4 MiB.
pub const YOUNG_GEN_SIZE: usize = 4 * 1024 * 1024;

/// Old generation size: 8 MiB.
pub const OLD_GEN_SIZE: usize = 8 * 1024 * 1024;

/// Permanent generation size: 4 MiB.
pub const PERM_GEN_SIZE: usize = 4 * 1024 * 1024;

/// Default maximum number of live entries on the operand stack.
pub const DEFAULT_MAX_STACK_ENTRIES: usize = 1024 * 1024;

/// Default maximum call-frame nesting depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

/// Tunable parameters for one VM instance. Every field has a default
/// matching the spec's stated defaults; callers override only what they
/// need, mirroring how an interpreter's parameter struct is usually built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Total size in bytes of the heap's backing slab.
    pub heap_size: usize,
    /// Allocation alignment in bytes. Must be a power of two.
    pub heap_alignment: usize,
    /// Maximum number of `Value` entries the operand stack may hold.
    pub max_stack_entries: usize,
    /// Maximum number of nested call frames before `StackOverflow`.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            heap_alignment: DEFAULT_ALIGNMENT,
            max_stack_entries: DEFAULT_MAX_STACK_ENTRIES,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl VmConfig {
    /// Whether the configured heap is large enough to host all three
    /// fixed generations (spec §4.7); if not, the heap falls back to a
    /// single generation spanning the whole slab.
    pub fn fits_three_generations(&self) -> bool {
        self.heap_size >= YOUNG_GEN_SIZE + OLD_GEN_SIZE + PERM_GEN_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fits_three_generations() {
        assert!(VmConfig::default().fits_three_generations());
    }

    #[test]
    fn undersized_heap_does_not_fit_three_generations() {
        let config = VmConfig {
            heap_size: 1024,
            ..VmConfig::default()
        };
        assert!(!config.fits_three_generations());
    }
}
