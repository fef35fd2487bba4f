use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Result, StatsError};
use crate::types::{ChatFile, ChatRecord};

/// File extension of chat logs
pub const CHAT_EXTENSION: &str = "jsonl";

/// Identity of a character whose chats are tracked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterInfo {
    pub key: String,
    pub name: String,
}

impl CharacterInfo {
    /// Characters are keyed by their directory name, which doubles as the
    /// display name.
    pub fn from_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
        }
    }
}

/// Where chat logs come from
pub trait ChatSource: Send + Sync {
    /// Enumerate known characters
    fn list_characters(&self) -> Result<Vec<CharacterInfo>>;

    /// Enumerate chat names owned by a character
    fn list_chats(&self, character: &str) -> Result<Vec<String>>;

    /// Read one chat as ordered records
    fn read_chat(&self, character: &str, chat_name: &str) -> Result<ChatFile>;

    /// Only count messages sent under the character's own name as
    /// character messages
    fn match_character_name(&self) -> bool {
        false
    }
}

/// Reject names that would escape the data directory. Accepted names are
/// used verbatim, so the path always matches the key stats are stored under.
pub fn sanitize_name(name: &str) -> Result<&str> {
    if name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StatsError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(name)
}

/// Drop listed names that could not be addressed again.
fn addressable(name: &str) -> bool {
    match sanitize_name(name) {
        Ok(_) => true,
        Err(e) => {
            warn!("Ignoring entry: {e}");
            false
        }
    }
}

/// Parse JSON-lines chat content. Blank lines are skipped; any other
/// unparsable line makes the whole chat malformed.
pub fn parse_chat_lines(path: &Path, buffer: &[u8]) -> Result<Vec<ChatRecord>> {
    let mut records = Vec::with_capacity(64);

    for (i, line) in buffer.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() || line.iter().all(|&b| b.is_ascii_whitespace()) {
            continue;
        }

        let mut line_buf = line.to_vec();
        let record = simd_json::from_slice::<ChatRecord>(&mut line_buf)
            .map_err(|e| StatsError::malformed(path, format!("line {}: {e}", i + 1)))?;
        records.push(record);
    }

    if records.is_empty() {
        return Err(StatsError::malformed(path, "chat file is empty"));
    }
    Ok(records)
}

/// Chats stored as `<root>/<character>/<chat>.jsonl`
#[derive(Debug, Clone)]
pub struct DirectoryChatSource {
    root: PathBuf,
    match_character_name: bool,
}

impl DirectoryChatSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            match_character_name: false,
        }
    }

    pub fn with_character_name_matching(mut self, enabled: bool) -> Self {
        self.match_character_name = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn character_dir(&self, character: &str) -> Result<PathBuf> {
        Ok(self.root.join(sanitize_name(character)?))
    }

    pub fn chat_path(&self, character: &str, chat_name: &str) -> Result<PathBuf> {
        Ok(self
            .character_dir(character)?
            .join(format!("{}.{CHAT_EXTENSION}", sanitize_name(chat_name)?)))
    }

    /// Map a chat file path back to `(character, chat)`.
    pub fn identify(&self, path: &Path) -> Option<(String, String)> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let character = components.next()?.as_os_str().to_str()?.to_string();
        let file = Path::new(components.next()?.as_os_str());
        if components.next().is_some()
            || file.extension().and_then(|e| e.to_str()) != Some(CHAT_EXTENSION)
        {
            return None;
        }
        let chat = file.file_stem()?.to_str()?.to_string();
        Some((character, chat))
    }
}

impl ChatSource for DirectoryChatSource {
    fn list_characters(&self) -> Result<Vec<CharacterInfo>> {
        if !self.root.is_dir() {
            return Err(StatsError::MissingFile {
                path: self.root.clone(),
            });
        }

        let mut characters: Vec<CharacterInfo> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .filter(|key| addressable(key))
            .map(|key| CharacterInfo::from_key(&key))
            .collect();
        characters.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(characters)
    }

    fn list_chats(&self, character: &str) -> Result<Vec<String>> {
        let dir = self.character_dir(character)?;
        if !dir.is_dir() {
            return Err(StatsError::MissingFile { path: dir });
        }

        let pattern = dir.join(format!("*.{CHAT_EXTENSION}"));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| StatsError::malformed(&dir, format!("bad chat pattern: {e}")))?;

        let mut chats: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .filter_map(|path| path.file_stem()?.to_str().map(String::from))
            .filter(|chat| addressable(chat))
            .collect();
        chats.sort();
        Ok(chats)
    }

    fn read_chat(&self, character: &str, chat_name: &str) -> Result<ChatFile> {
        let path = self.chat_path(character, chat_name)?;
        let buffer = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StatsError::MissingFile { path });
            }
            Err(e) => return Err(e.into()),
        };

        let records = parse_chat_lines(&path, &buffer)?;
        Ok(ChatFile {
            records,
            size: buffer.len() as u64,
        })
    }

    fn match_character_name(&self) -> bool {
        self.match_character_name
    }
}
