//! Roll-up, roll-back and rebuild tests.
//!
//! - roll_up: CharacterStats insert / replace / remove
//! - collection: StatsCollection driven through a ChatSource
//! - model_usage: ModelUsageMap bookkeeping


use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{Result, StatsError};
use crate::source::{CharacterInfo, ChatSource, sanitize_name};
use crate::stats::{AggregateAccumulator, CharacterStats, ChatStats, process_chat};
use crate::types::{ChatFile, ChatMetadata, ChatRecord, MessageExtra, RawTimestamp};

// ============================================================================
// Test Helpers
// ============================================================================

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
}

fn raw(secs: i64) -> Option<RawTimestamp> {
    Some(RawTimestamp::Text(at(secs).to_rfc3339()))
}

pub fn metadata(created: i64) -> ChatRecord {
    ChatRecord {
        user_name: Some("You".into()),
        character_name: Some("Alice".into()),
        create_date: raw(created),
        chat_metadata: Some(ChatMetadata {
            chat_id_hash: Some(7),
        }),
        ..Default::default()
    }
}

pub fn user(text: &str, sent: i64) -> ChatRecord {
    ChatRecord {
        name: Some("You".into()),
        is_user: true,
        mes: Some(text.into()),
        send_date: raw(sent),
        ..Default::default()
    }
}

pub fn reply(text: &str, start: i64, end: i64, model: &str, tokens: u64) -> ChatRecord {
    ChatRecord {
        name: Some("Alice".into()),
        mes: Some(text.into()),
        send_date: raw(start),
        gen_started: raw(start),
        gen_finished: raw(end),
        extra: MessageExtra {
            model: Some(model.into()),
            token_count: Some(tokens),
        },
        swipes: vec![text.into()],
        ..Default::default()
    }
}

pub fn system(text: &str, sent: i64) -> ChatRecord {
    ChatRecord {
        name: Some("System".into()),
        is_system: true,
        mes: Some(text.into()),
        send_date: raw(sent),
        ..Default::default()
    }
}

/// A short conversation starting at `offset` seconds.
pub fn conversation(offset: i64, extra_turns: usize) -> Vec<ChatRecord> {
    let mut records = vec![
        metadata(offset),
        user("hello there how are you", offset + 10),
        reply("I am fine thank you", offset + 12, offset + 15, "gpt-4o", 30),
    ];
    for turn in 0..extra_turns {
        let t = offset + 60 * (turn as i64 + 1);
        records.push(user("tell me more", t));
        records.push(reply("here is more detail for you", t + 2, t + 7, "claude-3", 50));
    }
    records
}

pub fn chat(character: &str, name: &str, records: &[ChatRecord]) -> ChatStats {
    process_chat(character, name, records, 100 * records.len() as u64, None).expect("chat stats")
}

/// Accumulator with its values sorted, since roll-back may reorder them.
fn normalized(acc: &AggregateAccumulator) -> AggregateAccumulator {
    let mut acc = acc.clone();
    acc.values.sort_by(f64::total_cmp);
    acc
}

/// Assert two records hold the same statistics, ignoring value order and
/// calculation timestamps.
pub fn assert_equivalent(left: &CharacterStats, right: &CharacterStats) {
    assert_eq!(left.chats, right.chats, "chats");
    assert_eq!(left.chat_size, right.chat_size, "chat_size");
    assert_eq!(left.first_create_date, right.first_create_date);
    assert_eq!(left.last_create_date, right.last_create_date);
    assert_eq!(left.first_interaction_date, right.first_interaction_date);
    assert_eq!(left.last_interaction_date, right.last_interaction_date);
    assert_eq!(left.model_usage, right.model_usage);

    let per_chat = left
        .per_chat
        .accumulators()
        .into_iter()
        .zip(right.per_chat.accumulators());
    for (i, (l, r)) in per_chat.enumerate() {
        assert_eq!(normalized(l), normalized(r), "per-chat accumulator {i}");
    }
    let per_message = left
        .per_message
        .accumulators()
        .into_iter()
        .zip(right.per_message.accumulators());
    for (i, (l, r)) in per_message.enumerate() {
        assert_eq!(normalized(l), normalized(r), "per-message accumulator {i}");
    }

    let mut left_chats: Vec<_> = left.chats_stats.iter().collect();
    let mut right_chats: Vec<_> = right.chats_stats.iter().collect();
    left_chats.sort_by(|a, b| (&a.character, &a.chat_name).cmp(&(&b.character, &b.chat_name)));
    right_chats.sort_by(|a, b| (&a.character, &a.chat_name).cmp(&(&b.character, &b.chat_name)));
    assert_eq!(left_chats, right_chats);
}

/// In-memory chat source. Chats can be edited between calls.
#[derive(Default)]
pub struct MemorySource {
    chats: Mutex<BTreeMap<String, BTreeMap<String, Option<Vec<ChatRecord>>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a character directory with no chats.
    pub fn add_character(&self, character: &str) {
        self.chats
            .lock()
            .unwrap()
            .entry(character.to_string())
            .or_default();
    }

    pub fn put(&self, character: &str, chat: &str, records: Vec<ChatRecord>) {
        self.chats
            .lock()
            .unwrap()
            .entry(character.to_string())
            .or_default()
            .insert(chat.to_string(), Some(records));
    }

    /// Register a chat whose content cannot be parsed.
    pub fn put_malformed(&self, character: &str, chat: &str) {
        self.chats
            .lock()
            .unwrap()
            .entry(character.to_string())
            .or_default()
            .insert(chat.to_string(), None);
    }

    pub fn delete(&self, character: &str, chat: &str) {
        if let Some(chats) = self.chats.lock().unwrap().get_mut(character) {
            chats.remove(chat);
        }
    }
}

impl ChatSource for MemorySource {
    fn list_characters(&self) -> Result<Vec<CharacterInfo>> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .keys()
            .map(|k| CharacterInfo::from_key(k))
            .collect())
    }

    fn list_chats(&self, character: &str) -> Result<Vec<String>> {
        self.chats
            .lock()
            .unwrap()
            .get(character)
            .map(|chats| chats.keys().cloned().collect())
            .ok_or_else(|| StatsError::MissingFile {
                path: character.into(),
            })
    }

    fn read_chat(&self, character: &str, chat_name: &str) -> Result<ChatFile> {
        sanitize_name(chat_name)?;
        let guard = self.chats.lock().unwrap();
        let path = format!("{character}/{chat_name}");
        match guard.get(character).and_then(|c| c.get(chat_name)) {
            None => Err(StatsError::MissingFile { path: path.into() }),
            Some(None) => Err(StatsError::malformed(path, "unparsable")),
            Some(Some(records)) => Ok(ChatFile {
                size: 100 * records.len() as u64,
                records: records.clone(),
            }),
        }
    }
}
