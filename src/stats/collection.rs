//! Top-level statistics: the global record plus one record per character.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CharacterStats, ChatStats, process_chat};
use crate::error::{Result, StatsError};
use crate::source::{CharacterInfo, ChatSource};
use crate::utils::now;

/// Current schema version. Snapshots with another version are rebuilt.
pub const STATS_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsCollection {
    pub version: u32,
    pub global: CharacterStats,
    pub characters: BTreeMap<String, CharacterStats>,
    /// Last mutation
    pub calculated: DateTime<Utc>,
    /// Last full rebuild
    pub recalculated: DateTime<Utc>,
}

impl Default for StatsCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollection {
    pub fn new() -> Self {
        let now = now();
        Self {
            version: STATS_VERSION,
            global: CharacterStats::global(),
            characters: BTreeMap::new(),
            calculated: now,
            recalculated: now,
        }
    }

    pub fn is_compatible_version(&self) -> bool {
        self.version == STATS_VERSION
    }

    /// Whether there are changes newer than `last_saved`.
    pub fn is_dirty_since(&self, last_saved: Option<DateTime<Utc>>) -> bool {
        last_saved.is_none_or(|saved| self.calculated > saved)
    }

    fn touch(&mut self) {
        self.calculated = now();
    }

    // --- Queries ---

    pub fn global(&self) -> &CharacterStats {
        &self.global
    }

    pub fn character(&self, key: &str) -> Option<&CharacterStats> {
        self.characters.get(key)
    }

    pub fn chat(&self, key: &str, chat_name: &str) -> Option<&ChatStats> {
        self.characters.get(key)?.chat(chat_name)
    }

    pub fn all(&self) -> &Self {
        self
    }

    // --- Single chat operations ---

    /// Roll `chat` into its character (created on demand) and into global,
    /// replacing any earlier version of the same chat.
    pub fn apply_chat(&mut self, character_name: &str, chat: ChatStats) {
        let key = chat.character.clone();
        self.global.update_with_chat(chat.clone());
        self.characters
            .entry(key.clone())
            .or_insert_with(|| CharacterStats::new(key, character_name))
            .update_with_chat(chat);
        self.touch();
    }

    /// Roll a chat back out of its character and global.
    /// Characters left without chats are dropped.
    pub fn remove_chat(&mut self, key: &str, chat_name: &str) -> Option<ChatStats> {
        let character = self.characters.get_mut(key)?;
        let removed = character.remove_chat(key, chat_name)?;
        if character.is_empty() {
            self.characters.remove(key);
        }
        if self.global.remove_chat(key, chat_name).is_none() {
            warn!(character = key, chat = chat_name, "chat was missing from global stats");
        }
        self.touch();
        Some(removed)
    }

    /// Reprocess one chat file. Returns true when stats changed.
    ///
    /// A missing file rolls back the previous contribution; unreadable
    /// content leaves it in place.
    pub fn update_chat<S: ChatSource + ?Sized>(
        &mut self,
        source: &S,
        key: &str,
        chat_name: &str,
    ) -> Result<bool> {
        let info = CharacterInfo::from_key(key);
        match read_chat_stats(source, &info, chat_name) {
            Ok(chat) => {
                self.apply_chat(&info.name, chat);
                Ok(true)
            }
            Err(StatsError::MissingFile { .. }) => Ok(self.remove_chat(key, chat_name).is_some()),
            Err(e @ StatsError::MalformedData { .. }) => {
                warn!("Skipping chat: {e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // --- Rebuilds ---

    /// Discard everything and rebuild from every character's chats.
    ///
    /// Characters are processed in parallel; their chats are rolled into the
    /// global record one character at a time.
    pub fn recreate_stats<S: ChatSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        let characters = match source.list_characters() {
            Ok(c) => c,
            Err(e) if e.is_skippable() => {
                warn!("No characters found: {e}");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let built: Vec<Result<Option<CharacterStats>>> = characters
            .par_iter()
            .map(|info| build_character(source, info))
            .collect();

        let mut fresh = Self::new();
        for result in built {
            let Some(character) = result? else {
                continue;
            };
            for chat in &character.chats_stats {
                fresh.global.update_with_chat(chat.clone());
            }
            fresh.characters.insert(character.key.clone(), character);
        }

        info!(
            characters = fresh.characters.len(),
            chats = fresh.global.chats,
            "recalculated stats"
        );
        *self = fresh;
        Ok(())
    }

    /// Rebuild one character from its chat files.
    ///
    /// Returns `None` when the character has no readable chats.
    pub fn recreate_character_stats<S: ChatSource + ?Sized>(
        &mut self,
        source: &S,
        key: &str,
    ) -> Result<Option<&CharacterStats>> {
        if let Some(old) = self.characters.remove(key) {
            for chat in &old.chats_stats {
                self.global.remove_chat(&chat.character, &chat.chat_name);
            }
        }
        self.touch();

        let Some(character) = build_character(source, &CharacterInfo::from_key(key))? else {
            return Ok(None);
        };
        for chat in &character.chats_stats {
            self.global.update_with_chat(chat.clone());
        }
        self.characters.insert(key.to_string(), character);
        Ok(self.characters.get(key))
    }
}

fn read_chat_stats<S: ChatSource + ?Sized>(
    source: &S,
    info: &CharacterInfo,
    chat_name: &str,
) -> Result<ChatStats> {
    let file = source.read_chat(&info.key, chat_name)?;
    let speaker = source.match_character_name().then_some(info.name.as_str());
    process_chat(&info.key, chat_name, &file.records, file.size, speaker).ok_or_else(|| {
        StatsError::malformed(format!("{}/{}", info.key, chat_name), "chat has no records")
    })
}

/// Process every chat of one character into a fresh record.
fn build_character<S: ChatSource + ?Sized>(
    source: &S,
    info: &CharacterInfo,
) -> Result<Option<CharacterStats>> {
    let chat_names = match source.list_chats(&info.key) {
        Ok(names) => names,
        Err(e) if e.is_skippable() => {
            debug!(character = %info.key, "no chats: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut chats = Vec::with_capacity(chat_names.len());
    for chat_name in &chat_names {
        match read_chat_stats(source, info, chat_name) {
            Ok(chat) => chats.push(chat),
            Err(e @ StatsError::InvalidName { .. }) => {
                warn!(character = %info.key, "Skipping chat: {e}")
            }
            Err(e) if e.is_skippable() => warn!("Skipping chat: {e}"),
            Err(e) => return Err(e),
        }
    }

    if chats.is_empty() {
        return Ok(None);
    }
    Ok(Some(CharacterStats::from_chats(
        info.key.clone(),
        info.name.clone(),
        chats,
    )))
}
