// src/driver/debug.rs
//! Debug flags, parsed once from the `FERRET_DEBUG` environment variable.
//!
//! Single-letter flags:
//!
//!   f   trace facts as they are created and inherited
//!   p   disable parallel execution of analyzers
//!   s   sanity-check fact serialization (round-trip + determinism)
//!   t   show per-action timing (use with 'p' to avoid scheduler noise)
//!   v   verbose logging

use std::sync::LazyLock;

pub const DEBUG_ENV: &str = "FERRET_DEBUG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub facts: bool,
    pub no_parallel: bool,
    pub sanity: bool,
    pub timing: bool,
    pub verbose: bool,
}

impl DebugFlags {
    pub fn parse(letters: &str) -> DebugFlags {
        let mut flags = DebugFlags::default();
        for c in letters.chars() {
            match c {
                'f' => flags.facts = true,
                'p' => flags.no_parallel = true,
                's' => flags.sanity = true,
                't' => flags.timing = true,
                'v' => flags.verbose = true,
                _ => {}
            }
        }
        flags
    }
}

/// The process-wide flags.
pub fn debug_flags() -> DebugFlags {
    static FLAGS: LazyLock<DebugFlags> = LazyLock::new(|| {
        DebugFlags::parse(&std::env::var(DEBUG_ENV).unwrap_or_default())
    });
    *FLAGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_letters_and_ignores_others() {
        let flags = DebugFlags::parse("fspx");
        assert!(flags.facts);
        assert!(flags.sanity);
        assert!(flags.no_parallel);
        assert!(!flags.timing);
        assert!(!flags.verbose);
    }

    #[test]
    fn empty_spec_is_all_off() {
        assert_eq!(DebugFlags::parse(""), DebugFlags::default());
    }
}
