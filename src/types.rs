use serde::{Deserialize, Serialize};

// CHAT JSONL FILES SCHEMA
//
// The first line of a chat file may be a metadata header:
//   {"user_name":"You","character_name":"Alice","create_date":"...","chat_metadata":{...}}
// Every other line is one message:
//   {"name":"Alice","is_user":false,"is_system":false,"send_date":"...","mes":"...",
//    "gen_started":"...","gen_finished":"...","extra":{"model":"...","token_count":42},
//    "swipes":["..."],"swipe_info":[{"send_date":"...","gen_started":"...", ...}]}

/// Timestamps appear either as strings in several formats or as epoch millis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMetadata {
    #[serde(default)]
    pub chat_id_hash: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageExtra {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub token_count: Option<u64>,
}

/// Generation details for one alternate reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwipeInfo {
    #[serde(default)]
    pub send_date: Option<RawTimestamp>,
    #[serde(default)]
    pub gen_started: Option<RawTimestamp>,
    #[serde(default)]
    pub gen_finished: Option<RawTimestamp>,
    #[serde(default)]
    pub extra: MessageExtra,
}

/// One line of a chat file. Metadata and message lines share this shape;
/// unused fields stay at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    // Metadata header fields
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub character_name: Option<String>,
    #[serde(default)]
    pub create_date: Option<RawTimestamp>,
    #[serde(default)]
    pub chat_metadata: Option<ChatMetadata>,

    // Message fields
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub send_date: Option<RawTimestamp>,
    #[serde(default)]
    pub mes: Option<String>,
    #[serde(default)]
    pub gen_started: Option<RawTimestamp>,
    #[serde(default)]
    pub gen_finished: Option<RawTimestamp>,
    #[serde(default)]
    pub extra: MessageExtra,
    #[serde(default)]
    pub swipes: Vec<String>,
    #[serde(default)]
    pub swipe_info: Vec<SwipeInfo>,
}

impl ChatRecord {
    /// A header line carries chat-level data and no message body.
    pub fn is_metadata(&self) -> bool {
        self.mes.is_none() && (self.chat_metadata.is_some() || self.create_date.is_some())
    }
}

/// Parsed content of one chat file.
#[derive(Debug, Clone, Default)]
pub struct ChatFile {
    pub records: Vec<ChatRecord>,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_line_is_detected() {
        let mut line = br#"{"user_name":"You","character_name":"Alice","create_date":"2024-01-05@10h00m00s","chat_metadata":{"chat_id_hash":123}}"#.to_vec();
        let record: ChatRecord = simd_json::from_slice(&mut line).unwrap();
        assert!(record.is_metadata());
        assert_eq!(record.chat_metadata.unwrap().chat_id_hash, Some(123));
    }

    #[test]
    fn message_line_parses_swipes_and_numeric_dates() {
        let mut line = br#"{"name":"Alice","is_user":false,"send_date":1704448800000,"mes":"Hi there","extra":{"model":"gpt-4o","token_count":12},"swipes":["Hi there","Hello"],"swipe_info":[{"gen_started":"2024-01-05T10:00:00Z","gen_finished":"2024-01-05T10:00:02Z"}]}"#.to_vec();
        let record: ChatRecord = simd_json::from_slice(&mut line).unwrap();
        assert!(!record.is_metadata());
        assert_eq!(record.send_date, Some(RawTimestamp::Millis(1_704_448_800_000)));
        assert_eq!(record.extra.token_count, Some(12));
        assert_eq!(record.swipes.len(), 2);
        assert_eq!(record.swipe_info.len(), 1);
    }
}
