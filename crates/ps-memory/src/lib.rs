//! Hierarchical memory: volatile short-term windows with forgetting, and
//! keyword-indexed long-term knowledge bases persisted under
//! `.ps-memory/<name>/ltm.json`.

pub mod ltm;
pub mod stm;
pub mod store;

pub use ltm::LongTermMemory;
pub use stm::{Checkpoint, ForgetMode, Milestone, ShortTermMemory, StmEvent};
pub use store::MemoryStore;

/// Token estimate used by forget accounting: `ceil(serialized_len / 4)`.
/// Deliberately uncalibrated; callers compare ratios, not absolutes.
pub fn estimate_tokens(serialized_len: usize) -> u64 {
    (serialized_len as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }
}
