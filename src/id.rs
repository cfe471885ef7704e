use std::sync::atomic::{AtomicU64, Ordering};

const PREFIX: &str = "balloon_";
const WIDTH: usize = 4;

/// Issues monotonically increasing, never-reused balloon ids of the form
/// `balloon_0001`. The floor is rehydrated at startup from the store's
/// `max_numeric_id() + 1` (§4, Global mutable state design note) — this
/// counter itself holds no I/O, it only guards the in-memory next value.
pub struct IdCounter {
    next: AtomicU64,
}

impl IdCounter {
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next),
        }
    }

    pub fn issue(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{PREFIX}{n:0width$}", width = WIDTH)
    }
}

/// Extracts the numeric suffix of a balloon id, if well-formed.
pub fn numeric_suffix(id: &str) -> Option<u64> {
    id.strip_prefix(PREFIX)?.parse().ok()
}
