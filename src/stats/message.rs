//! Per-message fact extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelUsageMap;
use crate::types::ChatRecord;
use crate::utils::{count_words, duration_ms, hash_text, parse_timestamp_opt};

/// Facts extracted from a single chat message.
///
/// Generation fields are `None` for messages that were not generated by a
/// model (user messages, imported text), which is distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageStats {
    pub is_user: bool,
    pub is_char: bool,
    #[serde(default)]
    pub is_system: bool,
    pub hash: String,
    pub send_date: Option<DateTime<Utc>>,
    /// Milliseconds, including alternate swipes
    pub gen_time: Option<f64>,
    pub gen_token_count: Option<u64>,
    /// Milliseconds spent generating alternate swipes only
    pub swipe_gen_time: Option<f64>,
    pub swipes: Option<u32>,
    pub words: u32,
    /// One completion timestamp per generated reply
    #[serde(default)]
    pub gen_end_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub model_usage: ModelUsageMap,
}

impl MessageStats {
    /// Latest completion strictly before `before`.
    pub fn last_gen_end_before(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.gen_end_dates
            .iter()
            .copied()
            .filter(|&d| d < before)
            .max()
    }

    /// Latest of the send date and all completion timestamps.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.gen_end_dates
            .iter()
            .copied()
            .chain(self.send_date)
            .max()
    }
}

/// Reduce one message record to [`MessageStats`].
///
/// When `character_name` is given, only messages sent under that name count
/// as character messages (group chats carry several speakers).
pub fn extract_message_stats(record: &ChatRecord, character_name: Option<&str>) -> MessageStats {
    let body = record.mes.as_deref().unwrap_or_default();
    let is_user = record.is_user;
    let is_char = !is_user
        && !record.is_system
        && character_name.is_none_or(|expected| record.name.as_deref() == Some(expected));

    let mut stats = MessageStats {
        is_user,
        is_char,
        is_system: record.is_system,
        hash: hash_text(body),
        send_date: parse_timestamp_opt(record.send_date.as_ref()),
        words: count_words(body),
        ..Default::default()
    };

    if is_user {
        return stats;
    }

    let primary_start = parse_timestamp_opt(record.gen_started.as_ref());
    let primary_end = parse_timestamp_opt(record.gen_finished.as_ref());

    if let (Some(start), Some(end)) = (primary_start, primary_end) {
        let tokens = record.extra.token_count.unwrap_or(0);
        stats.gen_time = Some(duration_ms(start, end));
        stats.gen_token_count = Some(tokens);
        stats.swipe_gen_time = Some(0.0);
        stats.gen_end_dates.push(end);
        if let Some(model) = &record.extra.model {
            stats.model_usage.record(model, tokens, 1);
        }
    }

    for swipe in &record.swipe_info {
        let start = parse_timestamp_opt(swipe.gen_started.as_ref());
        let end = parse_timestamp_opt(swipe.gen_finished.as_ref());
        let (Some(start), Some(end)) = (start, end) else {
            continue;
        };
        // The canonical reply is listed among the swipes as well.
        if Some(start) == primary_start {
            continue;
        }

        let elapsed = duration_ms(start, end);
        let tokens = swipe.extra.token_count.unwrap_or(0);
        *stats.gen_time.get_or_insert(0.0) += elapsed;
        *stats.swipe_gen_time.get_or_insert(0.0) += elapsed;
        *stats.gen_token_count.get_or_insert(0) += tokens;
        stats.gen_end_dates.push(end);
        if let Some(model) = &swipe.extra.model {
            stats.model_usage.record(model, tokens, 1);
        }
    }

    if !record.swipes.is_empty() {
        stats.swipes = Some(record.swipes.len() as u32 - 1);
    }

    stats
}
