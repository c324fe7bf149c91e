//! Host resource introspection used for the memory-constrained detection
//! heuristic (§5, §9): submit to the detection pool only when the pool is
//! non-busy, if either the operator set `memory_constrained` explicitly or the
//! host has less than 1 GiB of physical RAM.

use std::sync::OnceLock;

use sysinfo::System;

pub const LOW_MEMORY_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;

/// Total physical RAM in bytes, read once and cached for the process lifetime --
/// this does not change at runtime, so there is no reason to re-probe it on every
/// keyframe.
pub fn total_memory_bytes() -> u64 {
    static TOTAL_MEMORY: OnceLock<u64> = OnceLock::new();
    *TOTAL_MEMORY.get_or_init(|| {
        let mut system = System::new();
        system.refresh_memory();
        system.total_memory()
    })
}

/// Whether the host should be treated as memory-constrained for the purpose of
/// gating detection submission: either the operator forced it via config, or the
/// host genuinely has less than 1 GiB of RAM.
pub fn is_memory_constrained(config_flag: bool) -> bool {
    config_flag || total_memory_bytes() < LOW_MEMORY_THRESHOLD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flag_forces_constrained_regardless_of_ram() {
        assert!(is_memory_constrained(true));
    }

    #[test]
    fn total_memory_is_cached_and_nonzero_on_a_real_host() {
        let first = total_memory_bytes();
        let second = total_memory_bytes();
        assert_eq!(first, second);
    }
}
