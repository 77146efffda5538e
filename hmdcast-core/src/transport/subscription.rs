//! Per-subscriber topic filter.

use std::collections::HashMap;

use bytes::Bytes;

use crate::transport::zmtp::SubscriptionChange;

/// Prefixes a subscriber asked for, with reference counts so repeated
/// subscribe/cancel pairs balance out.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    prefixes: HashMap<Bytes, usize>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, prefix: Bytes) {
        *self.prefixes.entry(prefix).or_insert(0) += 1;
    }

    /// Drop one reference to `prefix`. Unknown prefixes are ignored.
    pub fn cancel(&mut self, prefix: &[u8]) {
        if let Some(count) = self.prefixes.get_mut(prefix) {
            *count -= 1;
            if *count == 0 {
                self.prefixes.remove(prefix);
            }
        }
    }

    pub fn apply(&mut self, change: SubscriptionChange) {
        match change {
            SubscriptionChange::Subscribe(prefix) => self.subscribe(prefix),
            SubscriptionChange::Cancel(prefix) => self.cancel(&prefix),
        }
    }

    /// Whether a message with this topic should be delivered.
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes.keys().any(|p| topic.starts_with(p))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}
