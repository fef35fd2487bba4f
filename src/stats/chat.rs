//! Chat-level statistics built from one chat file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AggregateAccumulator, MessageStats, ModelUsageMap, extract_message_stats};
use crate::types::ChatRecord;
use crate::utils::{duration_ms, parse_timestamp_opt};

/// The eight accumulators fed by individual messages.
///
/// A chat holds one value per message; a character merges the values of
/// every chat it owns, so message-level extrema survive the roll-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageAggregates {
    pub gen_time: AggregateAccumulator,
    pub gen_token_count: AggregateAccumulator,
    pub swipe_gen_time: AggregateAccumulator,
    pub swipes: AggregateAccumulator,
    pub user_response_time: AggregateAccumulator,
    pub words: AggregateAccumulator,
    pub user_words: AggregateAccumulator,
    pub char_words: AggregateAccumulator,
}

impl MessageAggregates {
    pub fn add_message(&mut self, msg: &MessageStats, response_time: Option<f64>) {
        self.gen_time.add_opt(msg.gen_time);
        self.gen_token_count
            .add_opt(msg.gen_token_count.map(|t| t as f64));
        self.swipe_gen_time.add_opt(msg.swipe_gen_time);
        self.swipes.add_opt(msg.swipes.map(f64::from));
        self.user_response_time.add_opt(response_time);
        self.words.add(f64::from(msg.words));
        if msg.is_user {
            self.user_words.add(f64::from(msg.words));
        }
        if msg.is_char {
            self.char_words.add(f64::from(msg.words));
        }
    }

    pub fn accumulators(&self) -> [&AggregateAccumulator; 8] {
        [
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

    fn accumulators_mut(&mut self) -> [&mut AggregateAccumulator; 8] {
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

    /// Sum of each accumulator, in field order.
    pub fn totals(&self) -> [f64; 8] {
        self.accumulators().map(|a| a.total)
    }

    pub fn merge(&mut self, other: &MessageAggregates) {
        for (mine, theirs) in self.accumulators_mut().into_iter().zip(other.accumulators()) {
            mine.merge(theirs);
        }
    }

    /// Returns the number of values that were not present.
    pub fn unmerge(&mut self, other: &MessageAggregates) -> usize {
        self.accumulators_mut()
            .into_iter()
            .zip(other.accumulators())
            .map(|(mine, theirs)| mine.unmerge(theirs))
            .sum()
    }
}

/// Statistics for one chat file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatStats {
    /// Key of the owning character
    pub character: String,
    pub chat_name: String,
    pub chat_id: Option<u64>,
    pub chat_size: u64,
    pub create_date: Option<DateTime<Utc>>,
    pub last_interaction_date: Option<DateTime<Utc>>,
    /// Milliseconds from creation to last interaction
    pub chatting_time: Option<f64>,

    pub messages: u32,
    pub system_messages: u32,
    pub user_messages: u32,
    pub char_messages: u32,

    pub per_message: MessageAggregates,
    pub model_usage: ModelUsageMap,
    #[serde(default)]
    pub message_stats: Vec<MessageStats>,
}

impl ChatStats {
    /// Whether this record belongs to `character` and is named `chat_name`.
    #[inline]
    pub fn is(&self, character: &str, chat_name: &str) -> bool {
        self.character == character && self.chat_name == chat_name
    }
}

/// Build [`ChatStats`] from the ordered records of one chat file.
///
/// Returns `None` when there are no records at all. A leading metadata
/// record supplies the creation date and chat id and is not counted as a
/// message.
pub fn process_chat(
    character: &str,
    chat_name: &str,
    records: &[ChatRecord],
    file_size: u64,
    character_name: Option<&str>,
) -> Option<ChatStats> {
    let (first, _) = records.split_first()?;

    let mut chat = ChatStats {
        character: character.to_string(),
        chat_name: chat_name.to_string(),
        chat_size: file_size,
        ..Default::default()
    };

    let messages = if first.is_metadata() {
        chat.create_date = parse_timestamp_opt(first.create_date.as_ref());
        chat.chat_id = first.chat_metadata.as_ref().and_then(|m| m.chat_id_hash);
        &records[1..]
    } else {
        records
    };

    let mut previous: Option<MessageStats> = None;

    for record in messages {
        let msg = extract_message_stats(record, character_name);
        let response_time = if msg.is_user {
            user_response_time(previous.as_ref(), &msg)
        } else {
            None
        };

        chat.per_message.add_message(&msg, response_time);

        chat.messages += 1;
        if msg.is_system {
            chat.system_messages += 1;
        }
        if msg.is_user {
            chat.user_messages += 1;
        }
        if msg.is_char {
            chat.char_messages += 1;
        }

        if let Some(active) = msg.last_activity() {
            chat.last_interaction_date = Some(
                chat.last_interaction_date
                    .map_or(active, |last| last.max(active)),
            );
        }
        chat.model_usage.merge(&msg.model_usage);

        chat.message_stats.push(msg.clone());
        previous = Some(msg);
    }

    if let (Some(created), Some(last)) = (chat.create_date, chat.last_interaction_date) {
        chat.chatting_time = Some(duration_ms(created, last));
    }

    Some(chat)
}

/// Time the user took to answer the previous message.
///
/// Measured from the previous message's latest completion before `current`
/// was sent, or from its send date when it has none.
fn user_response_time(previous: Option<&MessageStats>, current: &MessageStats) -> Option<f64> {
    let previous = previous?;
    let sent = current.send_date?;
    let since = previous
        .last_gen_end_before(sent)
        .or(previous.send_date)?;
    let elapsed = duration_ms(since, sent);
    (elapsed >= 0.0).then_some(elapsed)
}
