//! Small shared helpers: id generation and wall-clock timestamps.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of process-unique string ids.
pub trait IdGenerator: Send + Sync {
    fn generate_id(&self) -> String;
}

/// Generates ids as `<prefix><sequence>` from an incrementing counter.
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicI64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicI64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}", self.prefix, seq)
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}
