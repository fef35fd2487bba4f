//! Incremental statistics engine.
//!
//! Statistics roll up through four levels:
//! - [`MessageStats`]: facts extracted from one chat line
//! - [`ChatStats`]: one chat file, with per-message accumulators
//! - [`CharacterStats`]: all chats of one character (and the global record)
//! - [`StatsCollection`]: the global record plus every character
//!
//! Replacing a chat always rolls its previous contribution back before the
//! new one is rolled in, so repeated processing never double counts.

mod aggregate;
mod character;
mod chat;
mod collection;
mod message;

pub use aggregate::AggregateAccumulator;
pub use character::CharacterStats;
pub use chat::{ChatStats, MessageAggregates, process_chat};
pub use collection::{STATS_VERSION, StatsCollection};
pub use message::{MessageStats, extract_message_stats};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-model usage: occurrences and tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub count: u64,
    pub tokens: u64,
}

impl std::ops::AddAssign for ModelUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.count = self.count.saturating_add(rhs.count);
        self.tokens = self.tokens.saturating_add(rhs.tokens);
    }
}

impl std::ops::SubAssign for ModelUsage {
    fn sub_assign(&mut self, rhs: Self) {
        self.count = self.count.saturating_sub(rhs.count);
        self.tokens = self.tokens.saturating_sub(rhs.tokens);
    }
}

/// Model name -> usage. Entries that drop to zero are removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelUsageMap(BTreeMap<String, ModelUsage>);

impl ModelUsageMap {
    /// Record `count` occurrences of `model` using `tokens` tokens.
    pub fn record(&mut self, model: &str, tokens: u64, count: u64) {
        *self.0.entry(model.to_string()).or_default() += ModelUsage { count, tokens };
    }

    pub fn merge(&mut self, other: &ModelUsageMap) {
        for (model, usage) in &other.0 {
            *self.0.entry(model.clone()).or_default() += *usage;
        }
    }

    pub fn unmerge(&mut self, other: &ModelUsageMap) {
        for (model, usage) in &other.0 {
            if let Some(existing) = self.0.get_mut(model) {
                *existing -= *usage;
                if existing.count == 0 && existing.tokens == 0 {
                    self.0.remove(model);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, model: &str) -> Option<&ModelUsage> {
        self.0.get(model)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelUsage)> {
        self.0.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests;
