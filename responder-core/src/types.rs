use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Number of processed article ids retained for idempotence.
pub const PROCESSED_HISTORY_CAP: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
    pub board_id: u64,
    pub author: String,
    pub author_tier: i64,
    pub subject: String,
    pub body: String,
    pub comments: Vec<Comment>,
    pub readable: bool,
    pub commentable: bool,
}

impl Post {
    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    pub fn comments_by<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a Comment> + 'a {
        self.comments.iter().filter(move |c| c.author == author)
    }

    /// Highest comment id written by `author`, if any.
    pub fn last_comment_id_by(&self, author: &str) -> Option<u64> {
        self.comments_by(author).map(|c| c.id).max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    #[serde(rename = "writer_nick")]
    pub author: String,
    #[serde(default)]
    pub subject: String,
    #[serde(rename = "last_comment_count", default)]
    pub last_comment_count: usize,
    #[serde(default)]
    pub checks_remaining: u32,
    #[serde(
        rename = "added_at",
        default = "Utc::now",
        deserialize_with = "lenient_time::deserialize"
    )]
    pub created_at: DateTime<Utc>,
}

impl WatchEntry {
    pub fn new(author: String, subject: String, comment_count: usize, max_checks: u32) -> Self {
        Self {
            author,
            subject,
            last_comment_count: comment_count,
            checks_remaining: max_checks,
            created_at: Utc::now(),
        }
    }
}

/// Process-wide persisted record.
///
/// Field names on disk match the historical `state.json` layout so an
/// existing file keeps working after an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PollState {
    #[serde(rename = "last_article_id", default)]
    last_scanned_id: u64,
    #[serde(rename = "processed_articles", default)]
    processed: VecDeque<u64>,
    #[serde(rename = "watched_articles", default, with = "watch_map")]
    pub watched: BTreeMap<u64, WatchEntry>,
    #[serde(default, deserialize_with = "lenient_time::deserialize_option")]
    pub last_run: Option<DateTime<Utc>>,
}

impl PollState {
    pub fn last_scanned_id(&self) -> u64 {
        self.last_scanned_id
    }

    /// Moves the scan cursor forward. Smaller values are ignored so the
    /// cursor never goes backwards.
    pub fn advance_scanned(&mut self, id: u64) -> bool {
        if id > self.last_scanned_id {
            self.last_scanned_id = id;
            true
        } else {
            false
        }
    }

    /// Explicit operator override, used by `--start-id`.
    pub fn reset_scan_cursor(&mut self, id: u64) {
        self.last_scanned_id = id;
    }

    pub fn is_processed(&self, id: u64) -> bool {
        self.processed.contains(&id)
    }

    pub fn processed(&self) -> impl Iterator<Item = u64> + '_ {
        self.processed.iter().copied()
    }

    pub fn mark_processed(&mut self, id: u64) {
        if self.is_processed(id) {
            return;
        }
        self.processed.push_back(id);
        while self.processed.len() > PROCESSED_HISTORY_CAP {
            self.processed.pop_front();
        }
    }

    pub fn forget_processed(&mut self, id: u64) -> bool {
        let before = self.processed.len();
        self.processed.retain(|p| *p != id);
        before != self.processed.len()
    }

    /// Restores the history invariants after loading an arbitrary file:
    /// duplicates dropped (first occurrence wins), oldest evicted past the cap.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.processed.retain(|id| seen.insert(*id));
        while self.processed.len() > PROCESSED_HISTORY_CAP {
            self.processed.pop_front();
        }
    }

    pub fn touch(&mut self) {
        self.last_run = Some(Utc::now());
    }
}

/// Timestamps written without an offset are taken as UTC. Anything that
/// cannot be read as a time is dropped rather than failing the record.
mod lenient_time {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
            return Some(time.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.as_str().and_then(parse))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        Ok(deserialize_option(deserializer)?.unwrap_or_else(Utc::now))
    }
}

/// Watch entries are keyed by article id, stored with string keys in JSON.
mod watch_map {
    use super::WatchEntry;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<u64, WatchEntry>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: BTreeMap<String, &WatchEntry> =
            map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u64, WatchEntry>, D::Error> {
        let raw: BTreeMap<String, WatchEntry> = BTreeMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<u64>()
                    .map(|id| (id, v))
                    .map_err(|_| D::Error::custom(format!("invalid article id key: {k}")))
            })
            .collect()
    }
}
