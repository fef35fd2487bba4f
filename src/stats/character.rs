//! Character-level (and global) roll-up of chat statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AggregateAccumulator, ChatStats, MessageAggregates, ModelUsageMap};
use crate::utils::now;

/// Fourteen accumulators fed with one value per owned chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatAggregates {
    pub chat_size: AggregateAccumulator,
    pub chatting_time: AggregateAccumulator,
    pub messages: AggregateAccumulator,
    pub system_messages: AggregateAccumulator,
    pub user_messages: AggregateAccumulator,
    pub char_messages: AggregateAccumulator,
    // Per-chat totals of the per-message accumulators
    pub gen_time: AggregateAccumulator,
    pub gen_token_count: AggregateAccumulator,
    pub swipe_gen_time: AggregateAccumulator,
    pub swipes: AggregateAccumulator,
    pub user_response_time: AggregateAccumulator,
    pub words: AggregateAccumulator,
    pub user_words: AggregateAccumulator,
    pub char_words: AggregateAccumulator,
}

impl ChatAggregates {
    #[cfg(test)]
    pub fn accumulators(&self) -> [&AggregateAccumulator; 14] {
        [
            &self.chat_size,
            &self.chatting_time,
            &self.messages,
            &self.system_messages,
            &self.user_messages,
            &self.char_messages,
            &self.gen_time,
            &self.gen_token_count,
            &self.swipe_gen_time,
            &self.swipes,
            &self.user_response_time,
            &self.words,
            &self.user_words,
            &self.char_words,
        ]
    }

    fn totals_mut(&mut self) -> [&mut AggregateAccumulator; 8] {
        [
            &mut self.gen_time,
            &mut self.gen_token_count,
            &mut self.swipe_gen_time,
            &mut self.swipes,
            &mut self.user_response_time,
            &mut self.words,
            &mut self.user_words,
            &mut self.char_words,
        ]
    }

    fn scalars_mut(&mut self) -> [&mut AggregateAccumulator; 5] {
        [
            &mut self.chat_size,
            &mut self.messages,
            &mut self.system_messages,
            &mut self.user_messages,
            &mut self.char_messages,
        ]
    }

    fn chat_scalars(chat: &ChatStats) -> [f64; 5] {
        [
            chat.chat_size as f64,
            f64::from(chat.messages),
            f64::from(chat.system_messages),
            f64::from(chat.user_messages),
            f64::from(chat.char_messages),
        ]
    }

    pub fn add_chat(&mut self, chat: &ChatStats) {
        for (acc, value) in self.scalars_mut().into_iter().zip(Self::chat_scalars(chat)) {
            acc.add(value);
        }
        self.chatting_time.add_opt(chat.chatting_time);
        for (acc, total) in self.totals_mut().into_iter().zip(chat.per_message.totals()) {
            acc.add(total);
        }
    }

    /// Returns the number of values that were not present.
    pub fn remove_chat(&mut self, chat: &ChatStats) -> usize {
        let mut missing = 0;
        for (acc, value) in self.scalars_mut().into_iter().zip(Self::chat_scalars(chat)) {
            missing += usize::from(!acc.remove(value));
        }
        missing += usize::from(!self.chatting_time.remove_opt(chat.chatting_time));
        for (acc, total) in self.totals_mut().into_iter().zip(chat.per_message.totals()) {
            missing += usize::from(!acc.remove(total));
        }
        missing
    }
}

/// Statistics for one character, or for all characters when used as the
/// global record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub key: String,
    pub name: String,

    pub chats: u32,
    pub chat_size: u64,

    pub first_create_date: Option<DateTime<Utc>>,
    pub last_create_date: Option<DateTime<Utc>>,
    pub first_interaction_date: Option<DateTime<Utc>>,
    pub last_interaction_date: Option<DateTime<Utc>>,

    pub per_chat: ChatAggregates,
    pub per_message: MessageAggregates,
    pub model_usage: ModelUsageMap,

    pub chats_stats: Vec<ChatStats>,
    pub calculated: DateTime<Utc>,
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

impl CharacterStats {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            calculated: now(),
            ..Default::default()
        }
    }

    /// The record aggregating every character.
    pub fn global() -> Self {
        Self::new("global", "Global")
    }

    /// Build a record from freshly processed chats.
    pub fn from_chats(
        key: impl Into<String>,
        name: impl Into<String>,
        chats: impl IntoIterator<Item = ChatStats>,
    ) -> Self {
        let mut stats = Self::new(key, name);
        for chat in chats {
            stats.update_with_chat(chat);
        }
        stats
    }

    #[cfg(test)]
    pub fn find_chat(&self, character: &str, chat_name: &str) -> Option<&ChatStats> {
        self.chats_stats.iter().find(|c| c.is(character, chat_name))
    }

    /// Look up an owned chat by name alone (unique within one character).
    pub fn chat(&self, chat_name: &str) -> Option<&ChatStats> {
        self.chats_stats.iter().find(|c| c.chat_name == chat_name)
    }

    /// Insert `chat`, replacing any previous version of the same chat.
    pub fn update_with_chat(&mut self, chat: ChatStats) {
        self.remove_chat(&chat.character, &chat.chat_name);

        self.chats += 1;
        self.chat_size += chat.chat_size;

        self.first_create_date = earliest(self.first_create_date, chat.create_date);
        self.last_create_date = latest(self.last_create_date, chat.create_date);
        self.first_interaction_date =
            earliest(self.first_interaction_date, chat.last_interaction_date);
        self.last_interaction_date =
            latest(self.last_interaction_date, chat.last_interaction_date);

        self.per_chat.add_chat(&chat);
        self.per_message.merge(&chat.per_message);
        self.model_usage.merge(&chat.model_usage);

        debug!(
            owner = %self.key,
            character = %chat.character,
            chat = %chat.chat_name,
            messages = chat.messages,
            "rolled chat into stats"
        );

        self.chats_stats.push(chat);
        self.calculated = now();
    }

    /// Roll back the contribution of one chat. Returns the removed record,
    /// or `None` when the chat was never part of this record.
    pub fn remove_chat(&mut self, character: &str, chat_name: &str) -> Option<ChatStats> {
        let pos = self
            .chats_stats
            .iter()
            .position(|c| c.is(character, chat_name))?;
        let chat = self.chats_stats.remove(pos);

        self.chats -= 1;
        self.chat_size = self.chat_size.saturating_sub(chat.chat_size);

        let missing =
            self.per_chat.remove_chat(&chat) + self.per_message.unmerge(&chat.per_message);
        if missing > 0 {
            warn!(
                owner = %self.key,
                character,
                chat = chat_name,
                missing,
                "chat roll-back found values that were never rolled in"
            );
        }
        self.model_usage.unmerge(&chat.model_usage);
        self.recompute_date_extrema();

        debug!(owner = %self.key, character, chat = chat_name, "rolled chat out of stats");
        self.calculated = now();
        Some(chat)
    }

    /// Extrema over the chats that are still owned.
    fn recompute_date_extrema(&mut self) {
        let (mut first_create, mut last_create) = (None, None);
        let (mut first_active, mut last_active) = (None, None);
        for chat in &self.chats_stats {
            first_create = earliest(first_create, chat.create_date);
            last_create = latest(last_create, chat.create_date);
            first_active = earliest(first_active, chat.last_interaction_date);
            last_active = latest(last_active, chat.last_interaction_date);
        }
        self.first_create_date = first_create;
        self.last_create_date = last_create;
        self.first_interaction_date = first_active;
        self.last_interaction_date = last_active;
    }

    pub fn is_empty(&self) -> bool {
        self.chats == 0
    }
}
